//! bus
//!
//! Routes accesses to downstream targets mapped at non-overlapping ranges.
//! Requests, grants and invalidations are rebased between bus addresses and
//! the target's own addresses on the way through.

use std::ops::Range as Span;

use iset::IntervalMap;
use log::debug;

use fabric_range::Range;

use crate::{AccessInfo, DirectWindow, Error, Invalidator, Response, Target};

pub type BoxedTarget = Box<dyn Target + Send>;

struct Port {
    range: Range,
    offset: u64,
    /// the target's own addresses behind `range`
    visible: Range,
    target: BoxedTarget,
}

// spans are one past the inclusive end, so the top byte of the address
// space stays mappable
fn span(range: &Range) -> Span<u128> {
    range.start() as u128..range.end() as u128 + 1
}

pub struct Bus {
    ports: IntervalMap<u128, Port>,
    /// forwards to every socket the bus is attached to
    invalidator: Invalidator,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            ports: IntervalMap::new(),
            invalidator: Invalidator::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// maps `target` at `range`; the target sees addresses from zero
    pub fn map(&mut self, range: Range, target: impl Target + Send + 'static) -> Result<(), Error> {
        self.map_with_offset(range, 0, target)
    }

    /// maps `target` at `range`; the target sees addresses from `offset`
    /// and withdraws its windows through an invalidator rebased to `range`
    pub fn map_with_offset(
        &mut self,
        range: Range,
        offset: u64,
        target: impl Target + Send + 'static,
    ) -> Result<(), Error> {
        if range.is_empty() {
            return Err(fabric_range::Error::InvalidRange {
                start: range.start(),
                end: range.end(),
            }
            .into());
        }
        let visible = range
            .checked_sub(range.start())
            .and_then(|r| r.checked_add(offset))?;

        let span = span(&range);
        if let Some((_, existing)) = self.ports.iter(span.clone()).next() {
            return Err(Error::MapConflict(range, existing.range));
        }

        debug!("mapping target at {} (offset {:#x})", range, offset);
        let mut target = target;
        target.attach(self.invalidator.rebased(visible, range.start()));
        self.ports.insert(
            span,
            Port {
                range,
                offset,
                visible,
                target: Box::new(target),
            },
        );
        Ok(())
    }

    /// removes the target mapped at exactly `range`, withdrawing any direct
    /// windows over it
    pub fn unmap(&mut self, range: &Range) -> Result<BoxedTarget, Error> {
        let port = self
            .ports
            .remove(span(range))
            .ok_or(Error::NotMapped(*range))?;

        debug!("unmapping target at {}", range);
        self.invalidator.invalidate(range);
        Ok(port.target)
    }

    /// the mapped range covering `address`
    pub fn lookup(&self, address: u64) -> Option<Range> {
        self.ports
            .overlap(address as u128)
            .next()
            .map(|(_, port)| port.range)
    }

    /// mapped ranges in address order, with their offsets
    pub fn mappings(&self) -> impl Iterator<Item = (Range, u64)> + '_ {
        self.ports.iter(..).map(|(_, port)| (port.range, port.offset))
    }

    fn route(&mut self, range: &Range) -> Option<(&mut Port, Range)> {
        let (_, port) = self.ports.overlap_mut(range.start() as u128).next()?;
        if !port.range.contains(range) {
            debug!("{} crosses the end of mapping {}", range, port.range);
            return None;
        }
        let local = range
            .checked_sub(port.range.start())
            .and_then(|r| r.checked_add(port.offset))
            .ok()?;
        Some((port, local))
    }
}

impl Target for Bus {
    fn read(&mut self, range: &Range, data: &mut [u8], info: &AccessInfo) -> Response {
        match self.route(range) {
            Some((port, local)) => port.target.read(&local, data, info),
            None => Response::AddressError,
        }
    }

    fn write(&mut self, range: &Range, data: &[u8], info: &AccessInfo) -> Response {
        match self.route(range) {
            Some((port, local)) => port.target.write(&local, data, info),
            None => Response::AddressError,
        }
    }

    fn direct_window(&mut self, range: &Range, info: &AccessInfo) -> Option<DirectWindow> {
        let (port, local) = self.route(range)?;
        let window = port.target.direct_window(&local, info)?;

        window
            .restrict(&port.visible)?
            .checked_sub(port.offset)
            .and_then(|w| w.checked_add(port.range.start()))
            .ok()
    }

    fn attach(&mut self, invalidator: Invalidator) {
        self.invalidator.forward(invalidator);
    }
}
