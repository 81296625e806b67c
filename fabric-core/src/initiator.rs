//! initiator sockets
//!
//! An initiator socket issues accesses on behalf of one owner. Plain
//! accesses go through cached direct windows when possible and fall back
//! to a transaction through the bound [`Transport`] otherwise.

use log::trace;

use fabric_range::Range;

use crate::{
    Command, DmiCache, Error, HostPtr, Owner, Response, SharedDmiCache, Transaction, Transport,
};

/// Per-access attributes supplied by the caller.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Sideband {
    pub is_debug: bool,
    pub is_exclusive: bool,
    /// skip the direct-window fast path for this access
    pub is_nodmi: bool,
}

impl Sideband {
    pub const NONE: Self = Self {
        is_debug: false,
        is_exclusive: false,
        is_nodmi: false,
    };

    pub const DEBUG: Self = Self {
        is_debug: true,
        ..Self::NONE
    };

    pub const EXCLUSIVE: Self = Self {
        is_exclusive: true,
        ..Self::NONE
    };

    pub const NODMI: Self = Self {
        is_nodmi: true,
        ..Self::NONE
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Completion {
    pub response: Response,
    pub bytes: u64,
    /// true if the access went through a direct window
    pub direct: bool,
}

impl Completion {
    pub fn is_ok(&self) -> bool {
        self.response.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct InitiatorSocket {
    owner: Owner,
    allow_dmi: bool,
    cache: SharedDmiCache,
}

impl InitiatorSocket {
    pub fn new(owner: Owner) -> Self {
        Self::with_cache(owner, DmiCache::new())
    }

    pub fn with_cache(owner: Owner, cache: DmiCache) -> Self {
        Self {
            owner,
            allow_dmi: true,
            cache: cache.shared(),
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn allows_dmi(&self) -> bool {
        self.allow_dmi
    }

    /// disabling the fast path also drops every cached window
    pub fn set_allow_dmi(&mut self, allow: bool) {
        self.allow_dmi = allow;
        if !allow {
            self.cache.lock().clear();
        }
    }

    pub fn cache(&self) -> &SharedDmiCache {
        &self.cache
    }

    /// registers this socket's cache with `port` so windows it hands out
    /// can be withdrawn; done implicitly when `port` first grants a window
    pub fn bind<P: Transport + ?Sized>(&self, port: &mut P) {
        port.bind(self.cache.clone());
    }

    pub fn invalidate_direct_windows(&self, range: &Range) -> bool {
        self.cache.lock().invalidate_range(range)
    }

    /// host pointer for the first byte of `range`, if a cached window
    /// covers it with a permission allowing `command`
    pub fn lookup_dmi_ptr(&self, range: &Range, command: Command) -> Option<HostPtr> {
        if !self.allow_dmi {
            return None;
        }
        let window = self.cache.lock().lookup_range(range, command)?;
        window.ptr_at(range.start()).filter(|ptr| !ptr.is_null())
    }

    fn fast_path(&self, command: Command, address: u64, len: usize, sideband: Sideband) -> Option<HostPtr> {
        if sideband.is_exclusive || sideband.is_nodmi || len == 0 {
            return None;
        }
        let range = Range::with_len(address, len as u64).ok()?;
        let command = if sideband.is_debug { Command::Read } else { command };
        self.lookup_dmi_ptr(&range, command)
    }

    pub fn read<P: Transport + ?Sized>(
        &self,
        port: &mut P,
        address: u64,
        data: &mut [u8],
        sideband: Sideband,
    ) -> Result<Completion, Error> {
        if let Some(ptr) = self.fast_path(Command::Read, address, data.len(), sideband) {
            // the window covers all of `data.len()` bytes from `ptr`
            unsafe {
                std::ptr::copy_nonoverlapping(ptr.as_ptr() as *const u8, data.as_mut_ptr(), data.len());
            }
            trace!("owner {} read {} bytes at {:#x} directly", self.owner, data.len(), address);
            return Ok(Completion {
                response: Response::Ok,
                bytes: data.len() as u64,
                direct: true,
            });
        }

        let mut tx = self.transaction(Transaction::read(address, data.len()), sideband);
        let completion = self.dispatch(port, &mut tx, sideband)?;
        data.copy_from_slice(&tx.data);
        Ok(completion)
    }

    pub fn write<P: Transport + ?Sized>(
        &self,
        port: &mut P,
        address: u64,
        data: &[u8],
        sideband: Sideband,
    ) -> Result<Completion, Error> {
        if let Some(ptr) = self.fast_path(Command::Write, address, data.len(), sideband) {
            // the window covers all of `data.len()` bytes from `ptr`
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
            }
            trace!("owner {} wrote {} bytes at {:#x} directly", self.owner, data.len(), address);
            return Ok(Completion {
                response: Response::Ok,
                bytes: data.len() as u64,
                direct: true,
            });
        }

        let mut tx = self.transaction(Transaction::write(address, data), sideband);
        self.dispatch(port, &mut tx, sideband)
    }

    /// reads or writes through `data` depending on `command`
    pub fn access<P: Transport + ?Sized>(
        &self,
        port: &mut P,
        command: Command,
        address: u64,
        data: &mut [u8],
        sideband: Sideband,
    ) -> Result<Completion, Error> {
        match command {
            Command::Read => self.read(port, address, data, sideband),
            Command::Write => self.write(port, address, data, sideband),
            Command::Ignore => {
                let mut tx = self.transaction(Transaction::ignore(address, data.len()), sideband);
                self.dispatch(port, &mut tx, sideband)
            }
        }
    }

    fn transaction(&self, tx: Transaction, sideband: Sideband) -> Transaction {
        let mut tx = tx.with_owner(self.owner);
        tx.is_debug = sideband.is_debug;
        tx.is_exclusive = sideband.is_exclusive;
        tx
    }

    fn dispatch<P: Transport + ?Sized>(
        &self,
        port: &mut P,
        tx: &mut Transaction,
        sideband: Sideband,
    ) -> Result<Completion, Error> {
        let done = port.transport(tx)?;

        if let Some(grant) = done.grant {
            if self.allow_dmi && !sideband.is_nodmi {
                // a cached window must be withdrawable by the port granting it
                port.bind(self.cache.clone());
                self.cache.lock().insert(grant);
            }
        }

        let bytes = if sideband.is_exclusive && !tx.response.is_ok() {
            0
        } else {
            done.bytes
        };
        Ok(Completion {
            response: tx.response,
            bytes,
            direct: false,
        })
    }
}
