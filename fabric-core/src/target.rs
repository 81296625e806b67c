//! target traits
//!
//! A target is whatever sits behind a target socket: memory, a bus, a
//! device model. It sees sub-accesses after the socket has validated and
//! decomposed the transaction, so every call covers one contiguous range.

use std::sync::Arc;

use parking_lot::Mutex;

use fabric_range::Range;

use crate::{AddressSpace, Command, DirectWindow, Invalidator, Owner, Response};

/// Attributes of the transaction a sub-access belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct AccessInfo {
    pub space: AddressSpace,
    pub owner: Owner,
    pub is_debug: bool,
    pub is_exclusive: bool,
}

pub trait Target {
    /// fill `data` from `range`; `data.len()` equals the range length
    fn read(&mut self, range: &Range, data: &mut [u8], info: &AccessInfo) -> Response;

    /// store `data` to `range`; `data.len()` equals the range length
    fn write(&mut self, range: &Range, data: &[u8], info: &AccessInfo) -> Response;

    /// a window of host memory backing at least part of `range`
    fn direct_window(&mut self, _range: &Range, _info: &AccessInfo) -> Option<DirectWindow> {
        None
    }

    /// called once when the target is bound to a socket; the handle lets
    /// the target withdraw windows it has granted
    fn attach(&mut self, _invalidator: Invalidator) {}
}

impl<T: Target + ?Sized> Target for Box<T> {
    fn read(&mut self, range: &Range, data: &mut [u8], info: &AccessInfo) -> Response {
        (**self).read(range, data, info)
    }

    fn write(&mut self, range: &Range, data: &[u8], info: &AccessInfo) -> Response {
        (**self).write(range, data, info)
    }

    fn direct_window(&mut self, range: &Range, info: &AccessInfo) -> Option<DirectWindow> {
        (**self).direct_window(range, info)
    }

    fn attach(&mut self, invalidator: Invalidator) {
        (**self).attach(invalidator)
    }
}

/// A target shared by several sockets. Each socket attaches its own
/// invalidator, so the target should keep every handle it is given.
impl<T: Target + ?Sized> Target for Arc<Mutex<T>> {
    fn read(&mut self, range: &Range, data: &mut [u8], info: &AccessInfo) -> Response {
        self.lock().read(range, data, info)
    }

    fn write(&mut self, range: &Range, data: &[u8], info: &AccessInfo) -> Response {
        self.lock().write(range, data, info)
    }

    fn direct_window(&mut self, range: &Range, info: &AccessInfo) -> Option<DirectWindow> {
        self.lock().direct_window(range, info)
    }

    fn attach(&mut self, invalidator: Invalidator) {
        self.lock().attach(invalidator)
    }
}

/// A target that accepts everything: reads return a fill byte and writes
/// are dropped. Each sub-access it sees is recorded.
#[derive(Debug, Clone, Default)]
pub struct Sink {
    fill: u8,
    seen: Vec<(Command, Range, AccessInfo)>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fill(fill: u8) -> Self {
        Self {
            fill,
            seen: Vec::new(),
        }
    }

    pub fn seen(&self) -> &[(Command, Range, AccessInfo)] {
        &self.seen
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

impl Target for Sink {
    fn read(&mut self, range: &Range, data: &mut [u8], info: &AccessInfo) -> Response {
        self.seen.push((Command::Read, *range, *info));
        data.fill(self.fill);
        Response::Ok
    }

    fn write(&mut self, range: &Range, _data: &[u8], info: &AccessInfo) -> Response {
        self.seen.push((Command::Write, *range, *info));
        Response::Ok
    }
}
