use log::debug;

use fabric_range::Range;

use crate::{
    AccessInfo, DirectWindow, Error, HostPtr, Invalidator, Permission, Response, Target,
};

/// Fixed-size RAM endpoint. Addresses are offsets into the backing store.
///
/// The backing store never moves, so its whole extent is offered as one
/// direct window. Read-only memory accepts debug writes only; memory that
/// discards writes completes them without storing anything.
#[derive(Debug)]
pub struct Memory {
    backing: Box<[u8]>,
    readonly: bool,
    discard_writes: bool,
    poison: u8,
    invalidators: Vec<Invalidator>,
}

impl Memory {
    fn with_backing(backing: Box<[u8]>, readonly: bool) -> Self {
        Self {
            backing,
            readonly,
            discard_writes: false,
            poison: 0,
            invalidators: Vec::new(),
        }
    }

    pub fn new(size: usize) -> Self {
        Self::with_backing(vec![0u8; size].into_boxed_slice(), false)
    }

    pub fn read_only(size: usize) -> Self {
        Self::with_backing(vec![0u8; size].into_boxed_slice(), true)
    }

    pub fn from_vec(values: Vec<u8>) -> Self {
        Self::with_backing(values.into_boxed_slice(), false)
    }

    /// fills the backing store with `poison` now and on every reset
    pub fn with_poison(mut self, poison: u8) -> Self {
        self.poison = poison;
        self.backing.fill(poison);
        self
    }

    pub fn with_discard_writes(mut self, discard: bool) -> Self {
        self.discard_writes = discard;
        self
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        if readonly != self.readonly {
            self.readonly = readonly;
            self.withdraw_windows();
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn len(&self) -> usize {
        self.backing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backing.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.backing
    }

    pub fn reset(&mut self) {
        self.backing.fill(self.poison);
    }

    /// copies an image into memory at `offset`
    pub fn load(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        let oob = || Error::OutOfBounds {
            offset,
            size: bytes.len(),
            capacity: self.backing.len(),
        };
        let start = usize::try_from(offset).map_err(|_| oob())?;
        let end = start.checked_add(bytes.len()).ok_or_else(oob)?;
        if end > self.backing.len() {
            return Err(oob());
        }
        self.backing[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn extent(&self) -> Option<Range> {
        Range::with_len(0, self.backing.len() as u64).ok()
    }

    fn view(&self, range: &Range) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(range.start()).ok()?;
        let len = usize::try_from(range.length()).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.backing.len()).then_some(start..end)
    }

    fn withdraw_windows(&self) {
        if let Some(extent) = self.extent() {
            for invalidator in &self.invalidators {
                invalidator.invalidate(&extent);
            }
        }
    }
}

impl Target for Memory {
    fn read(&mut self, range: &Range, data: &mut [u8], _info: &AccessInfo) -> Response {
        match self.view(range) {
            Some(view) => {
                data.copy_from_slice(&self.backing[view]);
                Response::Ok
            }
            None => Response::AddressError,
        }
    }

    fn write(&mut self, range: &Range, data: &[u8], info: &AccessInfo) -> Response {
        let Some(view) = self.view(range) else {
            return Response::AddressError;
        };

        if !info.is_debug {
            if self.readonly {
                debug!("write to read-only memory at {}", range);
                return Response::CommandError;
            }
            if self.discard_writes {
                return Response::Ok;
            }
        }

        self.backing[view].copy_from_slice(data);
        Response::Ok
    }

    fn direct_window(&mut self, range: &Range, _info: &AccessInfo) -> Option<DirectWindow> {
        let extent = self.extent()?;
        if !extent.contains(range) {
            return None;
        }

        let permission = if self.readonly || self.discard_writes {
            Permission::READ
        } else {
            Permission::READ_WRITE
        };
        Some(DirectWindow::new(
            extent,
            HostPtr::new(self.backing.as_mut_ptr()),
            permission,
        ))
    }

    fn attach(&mut self, invalidator: Invalidator) {
        self.invalidators.push(invalidator);
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        self.withdraw_windows();
    }
}
