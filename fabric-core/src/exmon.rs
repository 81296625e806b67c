//! exclusive monitor
//!
//! Tracks load-linked reservations per owner and decides whether a
//! store-conditional may proceed. Any successful write to a reserved range
//! breaks the reservations over it, regardless of who holds them.

use log::debug;

use fabric_range::Range;

use crate::{Access, Command, DirectWindow, Owner};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Reservation {
    pub owner: Owner,
    pub range: Range,
}

#[derive(Debug, Clone, Default)]
pub struct ExclusiveMonitor {
    locks: Vec<Reservation>,
}

impl ExclusiveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &[Reservation] {
        &self.locks
    }

    pub fn clear(&mut self) {
        self.locks.clear();
    }

    /// records a reservation; an owner may hold several
    pub fn add_lock(&mut self, owner: Owner, range: Range) {
        debug!("owner {} reserves {}", owner, range);
        self.locks.push(Reservation { owner, range });
    }

    /// drops every reservation overlapping `range`, returning how many
    pub fn break_locks(&mut self, range: &Range) -> usize {
        let before = self.locks.len();
        self.locks.retain(|lock| !lock.range.overlaps(range));
        before - self.locks.len()
    }

    /// drops every reservation held by `owner`, returning how many
    pub fn break_owner(&mut self, owner: Owner) -> usize {
        let before = self.locks.len();
        self.locks.retain(|lock| lock.owner != owner);
        before - self.locks.len()
    }

    pub fn has_lock(&self, owner: Owner, range: &Range) -> bool {
        self.locks
            .iter()
            .any(|lock| lock.owner == owner && lock.range.overlaps(range))
    }

    /// true if any reservation overlaps `range`
    pub fn is_watched(&self, range: &Range) -> bool {
        self.locks.iter().any(|lock| lock.range.overlaps(range))
    }

    /// applies `access` to the reservation set; false vetoes the access
    pub fn update(&mut self, access: &Access) -> bool {
        if !access.is_exclusive {
            if access.command.is_write() {
                let broken = self.break_locks(&access.range);
                if broken > 0 {
                    debug!("write to {} broke {} reservations", access.range, broken);
                }
            }
            return true;
        }

        match access.command {
            Command::Read => {
                self.add_lock(access.owner, access.range);
                true
            }
            Command::Write => {
                if self.has_lock(access.owner, &access.range) {
                    self.break_locks(&access.range);
                    true
                } else {
                    debug!(
                        "exclusive write to {} by owner {} has no reservation",
                        access.range, access.owner
                    );
                    false
                }
            }
            Command::Ignore => true,
        }
    }

    /// narrows `window` so it holds no reserved address, keeping the part
    /// around the first unreserved address of `access`. false if no such
    /// part exists, in which case `window` is left as it was.
    pub fn override_dmi(&self, access: &Access, window: &mut DirectWindow) -> bool {
        let range = if access.range.is_empty() {
            Range::at(access.range.start())
        } else {
            access.range
        };

        let mut cursor = range.start();
        let pivot = loop {
            let covered = self
                .locks
                .iter()
                .filter(|lock| lock.range.includes(cursor))
                .map(|lock| lock.range.end())
                .max();
            match covered {
                None => break Some(cursor),
                Some(end) if end >= range.end() => break None,
                Some(end) => cursor = end + 1,
            }
        };

        let Some(pivot) = pivot else {
            debug!("denying direct window: {} is reserved", range);
            return false;
        };

        let mut lo = window.start();
        let mut hi = window.end();
        for lock in &self.locks {
            if lock.range.end() < pivot && lock.range.end() >= lo {
                lo = lock.range.end() + 1;
            }
            if lock.range.start() > pivot && lock.range.start() <= hi {
                hi = lock.range.start() - 1;
            }
        }

        let narrowed = Range::new(lo, hi)
            .ok()
            .and_then(|allowed| window.restrict(&allowed));
        match narrowed {
            Some(narrowed) => {
                if narrowed != *window {
                    debug!(
                        "narrowing direct window {} to {}",
                        window.range(),
                        narrowed.range()
                    );
                }
                *window = narrowed;
                true
            }
            None => false,
        }
    }
}
