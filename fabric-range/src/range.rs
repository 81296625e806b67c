use std::cmp::{max, min};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// An inclusive address interval `[start, end]`.
///
/// A range whose `end` is exactly one below its `start` is empty; any other
/// `end < start` is rejected on construction. The empty range at address zero
/// is not representable since `[0, u64::MAX]` denotes the whole address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "RawRange", into = "RawRange")]
pub struct Range {
    start: u64,
    end: u64,
}

#[derive(Serialize, Deserialize)]
struct RawRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawRange> for Range {
    type Error = Error;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Range::new(raw.start, raw.end)
    }
}

impl From<Range> for RawRange {
    fn from(r: Range) -> Self {
        RawRange { start: r.start, end: r.end }
    }
}

/// The remains of a range after cutting another range out of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Split {
    Empty,
    One(Range),
    Two(Range, Range),
}

impl Split {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::One(_) => 1,
            Self::Two(_, _) => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn into_ranges(self) -> impl Iterator<Item = Range> {
        let (a, b) = match self {
            Self::Empty => (None, None),
            Self::One(r) => (Some(r), None),
            Self::Two(lo, hi) => (Some(lo), Some(hi)),
        };
        a.into_iter().chain(b)
    }
}

impl Range {
    pub fn new(start: u64, end: u64) -> Result<Self, Error> {
        if end < start && start - end > 1 {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// the range covering `len` bytes from `start`; `len == 0` gives an
    /// empty range, which cannot be placed at address zero
    pub fn with_len(start: u64, len: u64) -> Result<Self, Error> {
        if len == 0 {
            return start
                .checked_sub(1)
                .map(|end| Self { start, end })
                .ok_or(Error::InvalidRange { start, end: u64::MAX });
        }

        start
            .checked_add(len - 1)
            .map(|end| Self { start, end })
            .ok_or(Error::Overflow { start, end: start, offset: len - 1 })
    }

    /// the single-byte range at `address`
    #[inline]
    pub fn at(address: u64) -> Self {
        Self { start: address, end: address }
    }

    /// the entire 64-bit address space
    #[inline]
    pub fn full() -> Self {
        Self { start: 0, end: u64::MAX }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// number of bytes covered; saturates for the full address space
    pub fn length(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    #[inline]
    pub fn includes(&self, address: u64) -> bool {
        address >= self.start && address <= self.end
    }

    /// true if every byte of `other` lies within `self`
    pub fn contains(&self, other: &Range) -> bool {
        self.includes(other.start) && self.includes(other.end)
    }

    pub fn inside(&self, other: &Range) -> bool {
        other.contains(self)
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && other.end >= self.start
            && other.start <= self.end
    }

    /// true if the ranges touch without sharing an address
    pub fn connects(&self, other: &Range) -> bool {
        self.end.checked_add(1) == Some(other.start)
            || other.end.checked_add(1) == Some(self.start)
    }

    /// true if `self` lies entirely below `other`
    pub fn is_below(&self, other: &Range) -> bool {
        self.end < other.start
    }

    /// true if `self` lies entirely above `other`
    pub fn is_above(&self, other: &Range) -> bool {
        self.start > other.end
    }

    pub fn intersect(&self, other: &Range) -> Option<Range> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Range {
            start: max(self.start, other.start),
            end: min(self.end, other.end),
        })
    }

    /// smallest range covering both `self` and `other`
    pub fn hull(&self, other: &Range) -> Range {
        Range {
            start: min(self.start, other.start),
            end: max(self.end, other.end),
        }
    }

    /// removes `cut` from `self`, leaving up to two fragments
    pub fn subtract(&self, cut: &Range) -> Split {
        if !self.overlaps(cut) {
            return if self.is_empty() {
                Split::Empty
            } else {
                Split::One(*self)
            };
        }

        let front = (cut.start > self.start).then(|| Range {
            start: self.start,
            end: cut.start - 1,
        });
        let back = (cut.end < self.end).then(|| Range {
            start: cut.end + 1,
            end: self.end,
        });

        match (front, back) {
            (None, None) => Split::Empty,
            (Some(r), None) | (None, Some(r)) => Split::One(r),
            (Some(lo), Some(hi)) => Split::Two(lo, hi),
        }
    }

    pub fn checked_add(&self, offset: u64) -> Result<Range, Error> {
        match (self.start.checked_add(offset), self.end.checked_add(offset)) {
            (Some(start), Some(end)) => Ok(Range { start, end }),
            _ => Err(Error::Overflow {
                start: self.start,
                end: self.end,
                offset,
            }),
        }
    }

    pub fn checked_sub(&self, offset: u64) -> Result<Range, Error> {
        match (self.start.checked_sub(offset), self.end.checked_sub(offset)) {
            (Some(start), Some(end)) => Ok(Range { start, end }),
            _ => Err(Error::Underflow {
                start: self.start,
                end: self.end,
                offset,
            }),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wide = self.start > u32::MAX as u64 || self.end > u32::MAX as u64;
        if wide {
            write!(f, "0x{:016x}..0x{:016x}", self.start, self.end)
        } else {
            write!(f, "0x{:08x}..0x{:08x}", self.start, self.end)
        }
    }
}

impl FromStr for Range {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            let digits = part
                .trim()
                .strip_prefix("0x")
                .or_else(|| part.trim().strip_prefix("0X"))?;
            u64::from_str_radix(digits, 16).ok()
        };

        let (lo, hi) = s.split_once("..").ok_or_else(|| Error::Parse(s.to_owned()))?;
        match (parse(lo), parse(hi)) {
            (Some(start), Some(end)) => Range::new(start, end),
            _ => Err(Error::Parse(s.to_owned())),
        }
    }
}
