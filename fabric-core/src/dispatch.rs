//! transaction dispatch
//!
//! A [`Dispatcher`] is the target socket of an endpoint. It validates an
//! incoming transaction against the socket configuration, admits it through
//! the exclusive monitor, breaks it into contiguous sub-accesses and
//! forwards them to the target.

use log::{debug, trace, warn};
use smallvec::SmallVec;

use fabric_range::Range;

use crate::{
    Access, AccessInfo, Clock, Command, Cycles, DirectWindow, DmiCache, Error, ExclusiveMonitor,
    Invalidator, Response, SharedDmiCache, SocketConfig, Target, Transaction,
};

/// One contiguous access issued to a target. `offset` locates its bytes
/// in the transaction's data buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubAccess {
    pub address: u64,
    pub offset: usize,
    pub len: usize,
}

/// Splits an access of `len` bytes at `address` into the ordered sub-accesses
/// a target sees.
///
/// With a streaming width `w < len`, the access repeats `len / w` times at
/// `address`, each pulse moving the next `w` bytes of data. A byte-enable
/// mask further splits every pulse into maximal runs of enabled (non-zero)
/// bytes; disabled bytes are not accessed. The mask is indexed modulo its
/// length. Inputs are assumed to have passed socket validation.
pub fn decompose(
    address: u64,
    len: usize,
    streaming_width: Option<usize>,
    byte_enable: Option<&[u8]>,
) -> SmallVec<[SubAccess; 4]> {
    let mut plan = SmallVec::new();
    if len == 0 {
        return plan;
    }

    let width = streaming_width
        .filter(|w| *w > 0 && *w < len)
        .unwrap_or(len);
    let pulses = len / width;
    let mask = byte_enable.filter(|m| !m.is_empty());

    for pulse in 0..pulses {
        let base = pulse * width;
        let Some(mask) = mask else {
            plan.push(SubAccess {
                address,
                offset: base,
                len: width,
            });
            continue;
        };

        let mut run: Option<(usize, usize)> = None;
        for byte in 0..=width {
            let enabled = byte < width && mask[byte % mask.len()] != 0;
            match run {
                Some((first, n)) if enabled => run = Some((first, n + 1)),
                Some((first, n)) => {
                    plan.push(SubAccess {
                        address: address.wrapping_add(first as u64),
                        offset: base + first,
                        len: n,
                    });
                    run = None;
                }
                None if enabled => run = Some((byte, 1)),
                None => (),
            }
        }
    }

    plan
}

/// Outcome of a dispatched transaction, alongside its response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// bytes moved by sub-accesses that completed
    pub bytes: u64,
    /// sub-accesses that completed
    pub accesses: usize,
    /// cycles charged to the socket clock
    pub cycles: Cycles,
    /// a direct window the initiator may cache
    pub grant: Option<DirectWindow>,
}

/// The initiator-facing side of a target socket.
pub trait Transport {
    fn transport(&mut self, tx: &mut Transaction) -> Result<Dispatched, Error>;

    /// registers an initiator's cache to receive invalidations
    fn bind(&mut self, cache: SharedDmiCache);
}

pub struct Dispatcher<T: Target> {
    target: T,
    config: SocketConfig,
    monitor: ExclusiveMonitor,
    grants: SharedDmiCache,
    invalidator: Invalidator,
    clock: Clock,
}

impl<T: Target> Dispatcher<T> {
    pub fn new(target: T) -> Self {
        Self::with_config(target, SocketConfig::default())
    }

    pub fn with_config(mut target: T, config: SocketConfig) -> Self {
        let grants = DmiCache::with_limit(config.dmi_entry_limit).shared();
        let invalidator = Invalidator::new();
        invalidator.bind(grants.clone());
        target.attach(invalidator.clone());

        Self {
            target,
            config,
            monitor: ExclusiveMonitor::new(),
            grants,
            invalidator,
            clock: Clock::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ExclusiveMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut ExclusiveMonitor {
        &mut self.monitor
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// windows granted by the target, before reservations are carved out
    pub fn grants(&self) -> &SharedDmiCache {
        &self.grants
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn bind(&mut self, cache: SharedDmiCache) {
        self.invalidator.bind(cache);
    }

    /// withdraws `range` from the target-side cache and every bound
    /// initiator cache; false if none held it
    pub fn invalidate_direct_windows(&mut self, range: &Range) -> bool {
        self.invalidator.invalidate(range) > 0
    }

    fn validate(&self, tx: &Transaction) -> Result<(), &'static str> {
        let len = tx.data.len();

        if let Some(w) = tx.streaming_width {
            if w != len && !self.config.streaming {
                return Err("streaming not supported");
            }
            if w == 0 || w > len || len % w != 0 {
                return Err("streaming width does not divide length");
            }
        }
        // a streaming burst reaches the target as `len / width` accesses of
        // `width` bytes, so size and alignment limits apply per pulse
        let width = tx.streaming_width.unwrap_or(len);

        if let Some(mask) = &tx.byte_enable {
            if !self.config.byte_enable {
                return Err("byte enables not supported");
            }
            if mask.len() != width {
                return Err("byte enable length differs from access width");
            }
        }

        if let Some(max) = self.config.max_access_size {
            if width as u64 > max {
                return Err("access exceeds maximum size");
            }
        }

        if !self.config.alignment.permits(tx.address, width as u64) {
            return Err("misaligned access");
        }

        Ok(())
    }

    pub fn transport(&mut self, tx: &mut Transaction) -> Result<Dispatched, Error> {
        if !tx.response.is_incomplete() {
            return Err(Error::StaleResponse {
                address: tx.address,
                response: tx.response,
            });
        }
        if tx.data.is_empty() {
            return Err(Error::EmptyTransaction(tx.address));
        }

        tx.dmi_allowed = false;
        let mut done = Dispatched::default();

        let Ok(range) = tx.range() else {
            debug!("{} at {:#x} wraps the address space", tx.command, tx.address);
            tx.response = Response::AddressError;
            return Ok(done);
        };

        if tx.command.is_ignore() {
            tx.response = Response::Ok;
            return Ok(done);
        }

        if let Err(reason) = self.validate(tx) {
            debug!("rejecting {} of {}: {}", tx.command, range, reason);
            tx.response = Response::CommandError;
            return Ok(done);
        }

        if !tx.is_debug && self.config.allow_dmi {
            if tx.is_exclusive {
                if tx.command.is_read() {
                    self.invalidator.invalidate(&range);
                }
            } else {
                tx.dmi_allowed = true;
            }
        }

        let info = AccessInfo {
            space: self.config.space,
            owner: tx.owner,
            is_debug: tx.is_debug,
            is_exclusive: tx.is_exclusive,
        };
        let latency = match tx.command {
            Command::Read => self.config.read_latency,
            _ => self.config.write_latency,
        };

        // an exclusive access is admitted or refused as a whole, over the
        // bytes it touches, before the target sees any of it
        if tx.is_exclusive && !tx.is_debug {
            let width = tx.streaming_width.unwrap_or(tx.data.len());
            let access = Access {
                range: Range::with_len(tx.address, width as u64)?,
                command: tx.command,
                owner: tx.owner,
                is_exclusive: true,
            };
            if !self.monitor.update(&access) {
                tx.response = Response::CommandError;
                tx.dmi_allowed = false;
                return Ok(done);
            }
        }

        let plan = decompose(
            tx.address,
            tx.data.len(),
            tx.streaming_width,
            tx.byte_enable.as_deref(),
        );

        let mut response = Response::Ok;
        for sub in plan {
            let sub_range = Range::with_len(sub.address, sub.len as u64)?;

            if !tx.is_debug {
                if self.monitor.is_watched(&sub_range) {
                    tx.dmi_allowed = false;
                }
                if !tx.is_exclusive {
                    self.monitor.update(&Access::new(tx.command, tx.owner, sub_range));
                }
            }

            let data = &mut tx.data[sub.offset..sub.offset + sub.len];
            let rs = match tx.command {
                Command::Read => self.target.read(&sub_range, data, &info),
                Command::Write => self.target.write(&sub_range, data, &info),
                Command::Ignore => Response::Ok,
            };
            trace!("{} {} -> {}", tx.command, sub_range, rs);

            let rs = if rs.is_incomplete() {
                warn!("target left {} of {} incomplete", tx.command, sub_range);
                Response::AddressError
            } else {
                rs
            };
            if !rs.is_ok() {
                response = rs;
                break;
            }

            done.accesses += 1;
            done.bytes += sub.len as u64;
            if !tx.is_debug {
                self.clock.charge(latency);
                done.cycles += latency;
            }
        }

        tx.response = response;
        if !response.is_ok() {
            tx.dmi_allowed = false;
        }

        if tx.dmi_allowed {
            let access = tx.access()?;
            done.grant = self.get_direct_window(&access);
        }

        Ok(done)
    }

    /// a direct window covering `access`, with reserved addresses removed;
    /// raw grants are cached so the target is only asked on a miss
    pub fn get_direct_window(&mut self, access: &Access) -> Option<DirectWindow> {
        if !self.config.allow_dmi {
            return None;
        }

        let cached = self.grants.lock().lookup_range(&access.range, access.command);
        let mut window = match cached {
            Some(window) => window,
            None => {
                let info = AccessInfo {
                    space: self.config.space,
                    owner: access.owner,
                    is_debug: false,
                    is_exclusive: access.is_exclusive,
                };
                let window = self.target.direct_window(&access.range, &info)?;
                debug!("target granted direct window {}", window.range());
                self.grants.lock().insert(window);
                window
            }
        };

        self.monitor
            .override_dmi(access, &mut window)
            .then_some(window)
    }
}

impl<T: Target> Transport for Dispatcher<T> {
    fn transport(&mut self, tx: &mut Transaction) -> Result<Dispatched, Error> {
        Dispatcher::transport(self, tx)
    }

    fn bind(&mut self, cache: SharedDmiCache) {
        Dispatcher::bind(self, cache)
    }
}

impl<P: Transport + ?Sized> Transport for &mut P {
    fn transport(&mut self, tx: &mut Transaction) -> Result<Dispatched, Error> {
        (**self).transport(tx)
    }

    fn bind(&mut self, cache: SharedDmiCache) {
        (**self).bind(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Alignment, Memory, Sink};

    fn plan(
        address: u64,
        len: usize,
        width: Option<usize>,
        mask: Option<&[u8]>,
    ) -> Vec<(u64, usize, usize)> {
        decompose(address, len, width, mask)
            .into_iter()
            .map(|s| (s.address, s.offset, s.len))
            .collect()
    }

    #[test]
    fn test_decompose_whole() {
        assert_eq!(plan(0x40, 8, None, None), vec![(0x40, 0, 8)]);
        assert_eq!(plan(0x40, 8, Some(8), None), vec![(0x40, 0, 8)]);
        assert!(plan(0x40, 0, None, None).is_empty());
    }

    #[test]
    fn test_decompose_streaming() {
        assert_eq!(
            plan(0x40, 8, Some(2), None),
            vec![(0x40, 0, 2), (0x40, 2, 2), (0x40, 4, 2), (0x40, 6, 2)]
        );
    }

    #[test]
    fn test_decompose_byte_enable() {
        let mask = [0xff, 0x00, 0xff, 0x00];
        assert_eq!(plan(4, 4, None, Some(&mask)), vec![(4, 0, 1), (6, 2, 1)]);

        let mask = [0xff, 0xff, 0x00, 0xff];
        assert_eq!(plan(0, 4, None, Some(&mask)), vec![(0, 0, 2), (3, 3, 1)]);

        assert!(plan(0, 4, None, Some(&[0, 0, 0, 0])).is_empty());
    }

    #[test]
    fn test_decompose_streaming_with_byte_enable() {
        let mask = [0x00, 0xff];
        assert_eq!(
            plan(0x10, 6, Some(2), Some(&mask)),
            vec![(0x11, 1, 1), (0x11, 3, 1), (0x11, 5, 1)]
        );
    }

    #[test]
    fn test_validation() {
        let config = SocketConfig::default()
            .with_max_access_size(4)
            .with_alignment(Alignment::Natural)
            .with_streaming(false)
            .with_byte_enable(false);
        let mut socket = Dispatcher::with_config(Sink::new(), config);

        let rejected = [
            Transaction::read(0, 8),
            Transaction::read(2, 4),
            Transaction::read(0, 3),
            Transaction::read(0, 4).with_streaming_width(2),
            Transaction::write(0, [0u8; 4]).with_byte_enable([0xffu8; 4]),
        ];
        for mut tx in rejected {
            let done = socket.transport(&mut tx).unwrap();
            assert_eq!(tx.response, Response::CommandError, "{:?}", tx);
            assert_eq!(done.accesses, 0);
        }
        assert!(socket.target().seen().is_empty());

        let mut tx = Transaction::read(4, 4);
        socket.transport(&mut tx).unwrap();
        assert!(tx.response.is_ok());
    }

    #[test]
    fn test_size_limit_applies_per_pulse() {
        let config = SocketConfig::default().with_max_access_size(4);
        let mut socket = Dispatcher::with_config(Sink::new(), config);

        let mut tx = Transaction::write(0x40, [0u8; 8]).with_streaming_width(4);
        let done = socket.transport(&mut tx).unwrap();
        assert!(tx.response.is_ok());
        assert_eq!(done.accesses, 2);

        let mut tx = Transaction::write(0x40, [0u8; 8]);
        socket.transport(&mut tx).unwrap();
        assert_eq!(tx.response, Response::CommandError);

        let mut tx = Transaction::write(0x40, [0u8; 16]).with_streaming_width(8);
        socket.transport(&mut tx).unwrap();
        assert_eq!(tx.response, Response::CommandError);
        assert_eq!(socket.target().seen().len(), 2);
    }

    #[test]
    fn test_inconsistent_streaming_width() {
        let mut socket = Dispatcher::new(Sink::new());
        for width in [0, 3, 9] {
            let mut tx = Transaction::read(0, 8).with_streaming_width(width);
            socket.transport(&mut tx).unwrap();
            assert_eq!(tx.response, Response::CommandError);
        }

        let mut tx = Transaction::read(0, 8).with_streaming_width(4).with_byte_enable([1u8; 8]);
        socket.transport(&mut tx).unwrap();
        assert_eq!(tx.response, Response::CommandError);
    }

    #[test]
    fn test_stale_and_empty() {
        let mut socket = Dispatcher::new(Sink::new());

        let mut tx = Transaction::read(0, 4);
        tx.response = Response::Ok;
        assert!(matches!(
            socket.transport(&mut tx),
            Err(Error::StaleResponse { .. })
        ));

        let mut tx = Transaction::read(0, 0);
        assert!(matches!(
            socket.transport(&mut tx),
            Err(Error::EmptyTransaction(0))
        ));
    }

    #[test]
    fn test_ignore_and_wrap() {
        let mut socket = Dispatcher::new(Sink::new());

        let mut tx = Transaction::ignore(0x100, 4);
        socket.transport(&mut tx).unwrap();
        assert!(tx.response.is_ok());

        let mut tx = Transaction::read(u64::MAX - 1, 4);
        socket.transport(&mut tx).unwrap();
        assert_eq!(tx.response, Response::AddressError);
        assert!(socket.target().seen().is_empty());
    }

    #[test]
    fn test_failure_stops_dispatch() {
        let mut socket = Dispatcher::new(Memory::new(8));

        let mut tx = Transaction::write(6, [1u8, 2, 3, 4]).with_byte_enable([0xffu8, 0, 0xff, 0xff]);
        let done = socket.transport(&mut tx).unwrap();
        assert_eq!(tx.response, Response::AddressError);
        assert_eq!(done.accesses, 1);
        assert_eq!(done.bytes, 1);
    }

    #[test]
    fn test_latency() {
        let config = SocketConfig::default().with_latency(3, 5);
        let mut socket = Dispatcher::with_config(Sink::new(), config);

        let mut tx = Transaction::read(0, 8).with_streaming_width(4);
        let done = socket.transport(&mut tx).unwrap();
        assert_eq!(done.cycles, 6);

        let mut tx = Transaction::write(0, [0u8; 2]);
        socket.transport(&mut tx).unwrap();

        let mut tx = Transaction::write(0, [0u8; 2]).debug();
        let done = socket.transport(&mut tx).unwrap();
        assert_eq!(done.cycles, 0);
        assert_eq!(done.accesses, 1);

        assert_eq!(socket.clock().cycles(), 11);
    }

    #[test]
    fn test_exclusive_write_vetoed() {
        let mut socket = Dispatcher::new(Sink::new());

        let mut sc = Transaction::write(0x20, [1u8; 4]).with_owner(1).exclusive();
        let done = socket.transport(&mut sc).unwrap();
        assert_eq!(sc.response, Response::CommandError);
        assert_eq!(done.bytes, 0);
        assert!(socket.target().seen().is_empty());

        let mut ll = Transaction::read(0x20, 4).with_owner(1).exclusive();
        socket.transport(&mut ll).unwrap();
        assert!(ll.response.is_ok());
        assert!(!ll.dmi_allowed);

        let mut sc = Transaction::write(0x20, [1u8; 4]).with_owner(1).exclusive();
        socket.transport(&mut sc).unwrap();
        assert!(sc.response.is_ok());
        assert_eq!(socket.target().seen().len(), 2);
    }

    #[test]
    fn test_exclusive_write_with_byte_enable() {
        let mut socket = Dispatcher::new(Memory::new(0x10));

        let mut sc = Transaction::write(0, [0xaau8; 4])
            .with_byte_enable([0xffu8, 0x00, 0xff, 0x00])
            .with_owner(1)
            .exclusive();
        let done = socket.transport(&mut sc).unwrap();
        assert_eq!(sc.response, Response::CommandError);
        assert_eq!(done.bytes, 0);
        assert_eq!(&socket.target().as_slice()[..4], &[0; 4]);

        let mut ll = Transaction::read(0, 4).with_owner(1).exclusive();
        socket.transport(&mut ll).unwrap();
        assert_eq!(socket.monitor().locks().len(), 1);

        let mut sc = Transaction::write(0, [0xaau8; 4])
            .with_byte_enable([0xffu8, 0x00, 0xff, 0x00])
            .with_owner(1)
            .exclusive();
        let done = socket.transport(&mut sc).unwrap();
        assert!(sc.response.is_ok());
        assert_eq!(done.accesses, 2);
        assert_eq!(done.bytes, 2);
        assert_eq!(&socket.target().as_slice()[..4], &[0xaa, 0, 0xaa, 0]);
        assert!(socket.monitor().locks().is_empty());
    }

    #[test]
    fn test_exclusive_streaming_write() {
        let mut socket = Dispatcher::new(Memory::new(0x10));

        let mut sc = Transaction::write(8, [1u8, 2, 3, 4])
            .with_streaming_width(2)
            .with_owner(1)
            .exclusive();
        socket.transport(&mut sc).unwrap();
        assert_eq!(sc.response, Response::CommandError);
        assert_eq!(&socket.target().as_slice()[8..12], &[0; 4]);

        let mut ll = Transaction::read(8, 2).with_owner(1).exclusive();
        socket.transport(&mut ll).unwrap();

        let mut sc = Transaction::write(8, [1u8, 2, 3, 4])
            .with_streaming_width(2)
            .with_owner(1)
            .exclusive();
        let done = socket.transport(&mut sc).unwrap();
        assert!(sc.response.is_ok());
        assert_eq!(done.accesses, 2);
        assert_eq!(&socket.target().as_slice()[8..12], &[3, 4, 0, 0]);
    }

    #[test]
    fn test_debug_skips_monitor() {
        let mut socket = Dispatcher::new(Sink::new());
        socket
            .monitor_mut()
            .add_lock(2, Range::new(0, 3).unwrap());

        let mut tx = Transaction::write(0, [0u8; 4]).debug();
        socket.transport(&mut tx).unwrap();
        assert!(tx.response.is_ok());
        assert_eq!(socket.monitor().locks().len(), 1);

        let mut tx = Transaction::write(0, [0u8; 4]);
        socket.transport(&mut tx).unwrap();
        assert!(socket.monitor().locks().is_empty());
    }

    #[test]
    fn test_grant() {
        let mut socket = Dispatcher::new(Memory::new(0x1000));

        let mut tx = Transaction::read(0x100, 4);
        let done = socket.transport(&mut tx).unwrap();
        assert!(tx.dmi_allowed);
        let grant = done.grant.unwrap();
        assert_eq!(grant.range(), Range::new(0, 0xfff).unwrap());

        socket
            .monitor_mut()
            .add_lock(7, Range::new(0x200, 0x2ff).unwrap());

        let mut tx = Transaction::read(0x100, 4);
        let done = socket.transport(&mut tx).unwrap();
        assert_eq!(done.grant.unwrap().range(), Range::new(0, 0x1ff).unwrap());

        let mut tx = Transaction::read(0x200, 4);
        let done = socket.transport(&mut tx).unwrap();
        assert!(!tx.dmi_allowed);
        assert!(done.grant.is_none());
    }
}
