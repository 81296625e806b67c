//! direct memory interface windows
//!
//! A [`DirectWindow`] hands an initiator a host pointer backing a range of
//! target addresses, letting it bypass the fabric for plain accesses. The
//! [`DmiCache`] keeps an address-ordered set of such windows, merging
//! windows that are adjacent in both address and host memory.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use fabric_range::Range;

use crate::{Command, Permission};

/// A raw host pointer that may be shared between threads.
///
/// The fabric never dereferences a `HostPtr` itself. Whoever dereferences
/// it must ensure that the backing memory outlives the window that carries
/// it; a target must invalidate its windows before releasing that memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HostPtr(*mut u8);

unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

impl HostPtr {
    pub fn new(ptr: *mut u8) -> Self {
        Self(ptr)
    }

    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn wrapping_add(&self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset as usize))
    }

    fn addr(&self) -> usize {
        self.0 as usize
    }
}

/// A contiguous range of target addresses backed by host memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DirectWindow {
    range: Range,
    ptr: HostPtr,
    permission: Permission,
}

impl DirectWindow {
    /// `ptr` backs `range.start()`
    pub fn new(range: Range, ptr: HostPtr, permission: Permission) -> Self {
        Self {
            range,
            ptr,
            permission,
        }
    }

    #[inline]
    pub fn range(&self) -> Range {
        self.range
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.range.start()
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.range.end()
    }

    #[inline]
    pub fn ptr(&self) -> HostPtr {
        self.ptr
    }

    #[inline]
    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// host pointer backing `address`, if the window covers it
    pub fn ptr_at(&self, address: u64) -> Option<HostPtr> {
        self.range
            .includes(address)
            .then(|| self.ptr.wrapping_add(address - self.range.start()))
    }

    /// raises the window's start, advancing its pointer by the same amount.
    /// `start` may be at most one past the current end, leaving the window
    /// empty; anything else is refused.
    pub fn set_start(&mut self, start: u64) -> bool {
        if start < self.start() {
            return false;
        }
        match Range::new(start, self.end()) {
            Ok(range) => {
                self.ptr = self.ptr.wrapping_add(start - self.start());
                self.range = range;
                true
            }
            Err(_) => false,
        }
    }

    /// the part of this window inside `range`, its pointer advanced to match
    pub fn restrict(&self, range: &Range) -> Option<DirectWindow> {
        let range = self.range.intersect(range)?;
        Some(Self {
            range,
            ptr: self.ptr.wrapping_add(range.start() - self.range.start()),
            permission: self.permission,
        })
    }

    /// the same host memory seen at addresses shifted up by `offset`
    pub fn checked_add(&self, offset: u64) -> Result<DirectWindow, fabric_range::Error> {
        Ok(Self {
            range: self.range.checked_add(offset)?,
            ..*self
        })
    }

    /// the same host memory seen at addresses shifted down by `offset`
    pub fn checked_sub(&self, offset: u64) -> Result<DirectWindow, fabric_range::Error> {
        Ok(Self {
            range: self.range.checked_sub(offset)?,
            ..*self
        })
    }

    /// true if both windows have the same permission, overlap or touch, and
    /// map their addresses onto one contiguous stretch of host memory
    pub fn is_mergeable(&self, other: &DirectWindow) -> bool {
        if self.permission != other.permission || self.is_empty() || other.is_empty() {
            return false;
        }

        if !self.range.overlaps(&other.range) && !self.range.connects(&other.range) {
            return false;
        }

        let shift = other.start().wrapping_sub(self.start()) as usize;
        self.ptr.addr().wrapping_add(shift) == other.ptr.addr()
    }

    /// the hull of two mergeable windows
    pub fn merge(&self, other: &DirectWindow) -> DirectWindow {
        let ptr = if other.start() < self.start() {
            other.ptr
        } else {
            self.ptr
        };
        Self {
            range: self.range.hull(&other.range),
            ptr,
            permission: self.permission,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Entry {
    window: DirectWindow,
    last_hit: u64,
}

/// Address-ordered collection of direct windows.
///
/// No two entries of the same permission overlap or touch while mapping
/// contiguous host memory; such entries are merged on insertion. When an
/// entry limit is set, the least recently hit entry is evicted first.
#[derive(Debug, Clone)]
pub struct DmiCache {
    entries: Vec<Entry>,
    limit: Option<usize>,
    tick: u64,
}

impl Default for DmiCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DmiCache {
    /// an unbounded cache
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// evicts the least recently hit entry once more than `limit` are held
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            limit,
            tick: 0,
        }
    }

    pub fn shared(self) -> SharedDmiCache {
        Arc::new(Mutex::new(self))
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectWindow> {
        self.entries.iter().map(|e| &e.window)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn insert(&mut self, window: DirectWindow) {
        if window.is_empty() || self.limit == Some(0) {
            return;
        }

        let mut merged = window;
        while let Some(pos) = self.entries.iter().position(|e| e.window.is_mergeable(&merged)) {
            let entry = self.entries.remove(pos);
            merged = merged.merge(&entry.window);
        }

        let last_hit = self.next_tick();
        let key = (merged.start(), merged.permission());
        let pos = self
            .entries
            .partition_point(|e| (e.window.start(), e.window.permission()) < key);
        self.entries.insert(
            pos,
            Entry {
                window: merged,
                last_hit,
            },
        );

        if let Some(limit) = self.limit {
            while self.entries.len() > limit {
                let victim = self
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.last_hit)
                    .map(|(i, _)| i);
                if let Some(victim) = victim {
                    let evicted = self.entries.remove(victim);
                    debug!("evicting direct window {}", evicted.window.range());
                }
            }
        }
    }

    /// a window covering `len` bytes from `address` that permits `command`
    pub fn lookup(&mut self, address: u64, len: u64, command: Command) -> Option<DirectWindow> {
        let range = Range::with_len(address, len).ok()?;
        self.lookup_range(&range, command)
    }

    pub fn lookup_range(&mut self, range: &Range, command: Command) -> Option<DirectWindow> {
        let tick = self.next_tick();
        for entry in self.entries.iter_mut() {
            if entry.window.start() > range.start() {
                break;
            }
            if entry.window.range().contains(range) && entry.window.permission().allows(command) {
                entry.last_hit = tick;
                return Some(entry.window);
            }
        }
        None
    }

    /// removes `[start, end]` from every cached window; false if nothing
    /// cached intersected it
    pub fn invalidate(&mut self, start: u64, end: u64) -> bool {
        match Range::new(start, end) {
            Ok(range) => self.invalidate_range(&range),
            Err(_) => false,
        }
    }

    pub fn invalidate_range(&mut self, cut: &Range) -> bool {
        if !self.entries.iter().any(|e| e.window.range().overlaps(cut)) {
            return false;
        }

        let mut kept = Vec::with_capacity(self.entries.len() + 1);
        for entry in self.entries.drain(..) {
            if !entry.window.range().overlaps(cut) {
                kept.push(entry);
                continue;
            }
            for fragment in entry.window.range().subtract(cut).into_ranges() {
                if let Some(window) = entry.window.restrict(&fragment) {
                    kept.push(Entry { window, ..entry });
                }
            }
        }
        kept.sort_by_key(|e| (e.window.start(), e.window.permission()));
        self.entries = kept;

        debug!("invalidated direct windows over {}", cut);
        true
    }
}

pub type SharedDmiCache = Arc<Mutex<DmiCache>>;

/// Places a downstream target's addresses in the address space of the
/// invalidator it forwards to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Rebase {
    /// downstream addresses visible upstream
    visible: Range,
    /// upstream address of `visible.start()`
    base: u64,
}

impl Rebase {
    fn apply(&self, range: &Range) -> Option<Range> {
        self.visible
            .intersect(range)?
            .checked_sub(self.visible.start())
            .and_then(|r| r.checked_add(self.base))
            .ok()
    }
}

#[derive(Debug, Default)]
struct Bindings {
    caches: Vec<SharedDmiCache>,
    upstream: Vec<(Invalidator, Option<Rebase>)>,
}

/// Handle a target uses to withdraw direct windows it has granted from
/// every cache bound to the socket it is attached to.
///
/// Invalidators chain: a router hands each downstream target an invalidator
/// that rebases withdrawn ranges into its own address space and forwards
/// them to the invalidators it was attached with.
#[derive(Debug, Clone, Default)]
pub struct Invalidator {
    bindings: Arc<Mutex<Bindings>>,
}

impl Invalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, cache: SharedDmiCache) {
        let mut bindings = self.bindings.lock();
        if !bindings.caches.iter().any(|c| Arc::ptr_eq(c, &cache)) {
            bindings.caches.push(cache);
        }
    }

    pub fn unbind(&self, cache: &SharedDmiCache) {
        self.bindings.lock().caches.retain(|c| !Arc::ptr_eq(c, cache));
    }

    /// number of directly bound caches
    pub fn len(&self) -> usize {
        self.bindings.lock().caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().caches.is_empty()
    }

    /// passes every range this invalidator withdraws on to `upstream`
    pub fn forward(&self, upstream: Invalidator) {
        if Arc::ptr_eq(&self.bindings, &upstream.bindings) {
            return;
        }
        let mut bindings = self.bindings.lock();
        let known = bindings
            .upstream
            .iter()
            .any(|(u, rebase)| rebase.is_none() && Arc::ptr_eq(&u.bindings, &upstream.bindings));
        if !known {
            bindings.upstream.push((upstream, None));
        }
    }

    /// a new invalidator for a downstream target whose addresses in
    /// `visible` appear here from `base` on; withdrawn ranges outside
    /// `visible` are dropped
    pub fn rebased(&self, visible: Range, base: u64) -> Invalidator {
        let child = Invalidator::new();
        child
            .bindings
            .lock()
            .upstream
            .push((self.clone(), Some(Rebase { visible, base })));
        child
    }

    /// number of caches, here or upstream, that held a window intersecting
    /// `range`
    pub fn invalidate(&self, range: &Range) -> usize {
        let (caches, upstream) = {
            let bindings = self.bindings.lock();
            (bindings.caches.clone(), bindings.upstream.clone())
        };

        let mut hit = caches
            .iter()
            .filter(|cache| cache.lock().invalidate_range(range))
            .count();

        for (next, rebase) in &upstream {
            let mapped = match rebase {
                Some(rebase) => rebase.apply(range),
                None => Some(*range),
            };
            if let Some(mapped) = mapped {
                hit += next.invalidate(&mapped);
            }
        }
        hit
    }
}
