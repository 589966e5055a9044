//! Bounded page cache with exclusive per-page handles.
//!
//! The cache keeps the most recently used pages in memory and evicts the
//! least recently used ones when it grows past its capacity. A lookup
//! checks the page *out* of the cache: the returned `PageHandle` owns the
//! page value until it is dropped, at which point the page is checked back
//! in. While a page is checked out:
//!
//! - other threads asking for the same key block until it is returned
//! - the thread that holds it asking for it again is a programming error
//!   and panics (a second live handle could observe a half-applied split)
//! - it is never chosen as an eviction victim
//!
//! `PageHandle` is not `Clone`, so one handle can never be duplicated.
//!
//! Misses are loaded through `get_or_load`, which reserves the key while the
//! loader runs so two threads never load the same page at once: the loser of
//! the race waits for the winner and then receives the loaded page.
//!
//! Dirty pages are written back through the cache's `WriteBack` before they
//! are evicted. If the write fails the page stays resident and the caller
//! gets `CacheError::Durability`.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Persists a page that is about to leave the cache.
pub trait WriteBack<K, V> {
    type Error;

    /// Write `value` to durable storage under `key`.
    fn write_back(&self, key: &K, value: &V) -> Result<(), Self::Error>;
}

/// Errors returned by cache operations.
#[derive(Debug)]
pub enum CacheError<K, E> {
    /// The loader passed to `get_or_load` failed.
    Load(E),
    /// Writing back a dirty page failed; the page is still cached.
    Durability { key: K, source: E },
}

impl<K: Debug, E: std::fmt::Display> std::fmt::Display for CacheError<K, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(e) => write!(f, "failed to load page: {e}"),
            Self::Durability { key, source } => {
                write!(f, "failed to write back page {key:?}: {source}")
            }
        }
    }
}

impl<K: Debug, E: std::error::Error + 'static> std::error::Error for CacheError<K, E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load(e) | Self::Durability { source: e, .. } => Some(e),
        }
    }
}

enum SlotState<V> {
    Resident { value: V, dirty: bool },
    CheckedOut { holder: ThreadId, token: u64 },
    Loading { holder: ThreadId, token: u64 },
}

struct Slot<V> {
    /// Position in the recency order; 0 while loading.
    tick: u64,
    state: SlotState<V>,
}

enum Probe {
    Absent,
    Resident,
    Busy,
    HeldByCaller,
}

struct CacheState<K, V> {
    /// Maximum number of entries, 0 for unlimited.
    capacity: usize,
    slots: BTreeMap<K, Slot<V>>,
    /// tick -> key, oldest first.
    recency: BTreeMap<u64, K>,
    next_tick: u64,
    /// Resident plus checked-out slots.
    entries: usize,
}

impl<K: Ord + Clone, V> CacheState<K, V> {
    const fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Move `key` to the most-recently-used end.
    fn touch(&mut self, key: &K) {
        let tick = self.bump();
        if let Some(slot) = self.slots.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn probe(&self, key: &K, caller: ThreadId) -> Probe {
        match self.slots.get(key).map(|slot| &slot.state) {
            None => Probe::Absent,
            Some(SlotState::Resident { .. }) => Probe::Resident,
            Some(
                SlotState::CheckedOut { holder, .. } | SlotState::Loading { holder, .. },
            ) => {
                if *holder == caller {
                    Probe::HeldByCaller
                } else {
                    Probe::Busy
                }
            }
        }
    }

    /// Take the value of a resident slot, leaving a checked-out marker.
    fn check_out(&mut self, key: &K, holder: ThreadId) -> Option<(V, bool, u64)> {
        let token = self.bump();
        let slot = self.slots.get_mut(key)?;
        if !matches!(slot.state, SlotState::Resident { .. }) {
            return None;
        }
        let SlotState::Resident { value, dirty } =
            std::mem::replace(&mut slot.state, SlotState::CheckedOut { holder, token })
        else {
            return None;
        };
        self.touch(key);
        Some((value, dirty, token))
    }

    fn is_reserved(&self, key: &K, token: u64) -> bool {
        matches!(
            self.slots.get(key).map(|slot| &slot.state),
            Some(SlotState::Loading { token: t, .. }) if *t == token
        )
    }

    /// Evict least-recently-used resident entries until the entry count is
    /// within capacity. `keep` is never evicted.
    ///
    /// Stops early, leaving the cache over capacity, when every remaining
    /// candidate is checked out.
    fn evict_to_capacity<W: WriteBack<K, V>>(
        &mut self,
        writer: &W,
        keep: Option<&K>,
    ) -> Result<usize, CacheError<K, W::Error>> {
        if self.capacity == 0 {
            return Ok(0);
        }

        let mut evicted = 0;
        while self.entries > self.capacity {
            let victim = self
                .recency
                .values()
                .find(|candidate| {
                    keep != Some(*candidate)
                        && matches!(
                            self.slots.get(*candidate).map(|slot| &slot.state),
                            Some(SlotState::Resident { .. })
                        )
                })
                .cloned();
            let Some(victim) = victim else {
                break;
            };

            if let Some(Slot {
                state: SlotState::Resident { value, dirty: true },
                ..
            }) = self.slots.get(&victim)
            {
                writer
                    .write_back(&victim, value)
                    .map_err(|source| CacheError::Durability {
                        key: victim.clone(),
                        source,
                    })?;
            }

            if let Some(slot) = self.slots.remove(&victim) {
                self.recency.remove(&slot.tick);
            }
            self.entries -= 1;
            evicted += 1;
        }
        Ok(evicted)
    }
}

/// A bounded LRU cache of pages keyed by `K`.
///
/// # Invariants
///
/// - At most one slot exists per key.
/// - At most one `PageHandle` per key is alive at any time.
/// - After `put`, `get_or_load`, or `set_capacity` return `Ok`,
///   `size() <= capacity()` unless the excess consists of checked-out
///   pages (capacity 0 means unlimited).
pub struct PageCache<K, V, W> {
    state: Mutex<CacheState<K, V>>,
    available: Condvar,
    writer: W,
}

impl<K, V, W> PageCache<K, V, W>
where
    K: Ord + Clone + Debug,
    W: WriteBack<K, V>,
{
    /// Create an empty cache. A `capacity` of 0 means unlimited.
    pub const fn new(capacity: usize, writer: W) -> Self {
        Self {
            state: Mutex::new(CacheState {
                capacity,
                slots: BTreeMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                entries: 0,
            }),
            available: Condvar::new(),
            writer,
        }
    }

    /// The write-back target used for evicted dirty pages.
    pub const fn writer(&self) -> &W {
        &self.writer
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn wait<'a>(&self, guard: MutexGuard<'a, CacheState<K, V>>) -> MutexGuard<'a, CacheState<K, V>> {
        self.available.wait(guard).expect("lock poisoned")
    }

    /// Wait until `key` is either absent or resident, then check it out if
    /// resident.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds `key`.
    fn acquire<'a>(
        &'a self,
        mut state: MutexGuard<'a, CacheState<K, V>>,
        key: &K,
    ) -> (MutexGuard<'a, CacheState<K, V>>, Option<(V, bool, u64)>) {
        let caller = thread::current().id();
        loop {
            match state.probe(key, caller) {
                Probe::Absent => return (state, None),
                Probe::Resident => {
                    let checked_out = state.check_out(key, caller);
                    return (state, checked_out);
                }
                Probe::Busy => state = self.wait(state),
                Probe::HeldByCaller => {
                    drop(state);
                    panic!("page {key:?} is already checked out by this thread");
                }
            }
        }
    }

    const fn handle(&self, key: K, value: V, dirty: bool, token: u64) -> PageHandle<'_, K, V, W> {
        PageHandle {
            cache: self,
            key,
            token,
            value: Some(value),
            dirty,
        }
    }

    /// Check out `key` if it is cached, moving it to the most-recently-used
    /// end. Returns `None` if the key is not cached; the caller must then
    /// load it from storage and `put` it (or use `get_or_load`).
    ///
    /// Blocks while another thread holds the page.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds a handle to `key`.
    pub fn get(&self, key: &K) -> Option<PageHandle<'_, K, V, W>> {
        let (state, hit) = self.acquire(self.lock(), key);
        drop(state);
        hit.map(|(value, dirty, token)| self.handle(key.clone(), value, dirty, token))
    }

    /// Check out `key`, running `load` to produce it on a miss.
    ///
    /// The key is reserved while `load` runs (without holding the cache
    /// lock); concurrent callers for the same key wait for the result
    /// instead of loading a duplicate.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds a handle to `key`.
    pub fn get_or_load<F>(
        &self,
        key: &K,
        load: F,
    ) -> Result<PageHandle<'_, K, V, W>, CacheError<K, W::Error>>
    where
        F: FnOnce(&K) -> Result<V, W::Error>,
    {
        let caller = thread::current().id();
        let (mut state, hit) = self.acquire(self.lock(), key);
        if let Some((value, dirty, token)) = hit {
            return Ok(self.handle(key.clone(), value, dirty, token));
        }

        let token = state.bump();
        state.slots.insert(
            key.clone(),
            Slot {
                tick: 0,
                state: SlotState::Loading {
                    holder: caller,
                    token,
                },
            },
        );
        drop(state);

        let loaded = load(key);

        let mut state = self.lock();
        let reserved = state.is_reserved(key, token);
        let value = match loaded {
            Ok(value) => value,
            Err(e) => {
                if reserved {
                    state.slots.remove(key);
                }
                drop(state);
                self.available.notify_all();
                return Err(CacheError::Load(e));
            }
        };

        if !reserved {
            // The cache was flushed while loading; hand out a detached page
            // that is discarded when released.
            drop(state);
            self.available.notify_all();
            return Ok(self.handle(key.clone(), value, false, token));
        }

        if let Some(slot) = state.slots.get_mut(key) {
            slot.state = SlotState::CheckedOut {
                holder: caller,
                token,
            };
        }
        state.touch(key);
        state.entries += 1;
        let evicted = state.evict_to_capacity(&self.writer, Some(key));
        drop(state);
        self.available.notify_all();

        let handle = self.handle(key.clone(), value, false, token);
        evicted.map(|_| handle)
    }

    /// Insert `value` under `key` at the most-recently-used end, marked
    /// dirty, replacing any cached value. Evicts least-recently-used pages
    /// (writing dirty ones back) until the cache is within capacity.
    ///
    /// Blocks while another thread holds the page.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds a handle to `key`.
    pub fn put(&self, key: K, value: V) -> Result<(), CacheError<K, W::Error>> {
        let (mut state, previous) = self.acquire(self.lock(), &key);
        if previous.is_some() {
            if let Some(slot) = state.slots.get_mut(&key) {
                slot.state = SlotState::Resident { value, dirty: true };
            }
        } else {
            let tick = state.bump();
            state.recency.insert(tick, key.clone());
            state.slots.insert(
                key.clone(),
                Slot {
                    tick,
                    state: SlotState::Resident { value, dirty: true },
                },
            );
            state.entries += 1;
        }
        state.touch(&key);
        let evicted = state.evict_to_capacity(&self.writer, Some(&key));
        drop(state);
        self.available.notify_all();
        evicted.map(|_| ())
    }

    /// Discard every entry without writing anything back.
    ///
    /// Handles that are checked out at the time become detached: their pages
    /// are dropped when released instead of returning to the cache.
    pub fn flush(&self) {
        let mut state = self.lock();
        state.slots.clear();
        state.recency.clear();
        state.entries = 0;
        drop(state);
        self.available.notify_all();
    }

    /// Write back every resident dirty page, leaving it cached and clean.
    ///
    /// Pages that are checked out are skipped; they return to the cache
    /// dirty and are written on the next call or on eviction.
    pub fn write_back_all(&self) -> Result<usize, CacheError<K, W::Error>> {
        let mut state = self.lock();
        let mut written = 0;
        for (key, slot) in &mut state.slots {
            if let SlotState::Resident { value, dirty } = &mut slot.state
                && *dirty
            {
                self.writer
                    .write_back(key, value)
                    .map_err(|source| CacheError::Durability {
                        key: key.clone(),
                        source,
                    })?;
                *dirty = false;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Change the capacity (0 = unlimited), evicting immediately if the
    /// cache is now over it. Returns the number of pages evicted.
    pub fn set_capacity(&self, capacity: usize) -> Result<usize, CacheError<K, W::Error>> {
        let mut state = self.lock();
        state.capacity = capacity;
        state.evict_to_capacity(&self.writer, None)
    }

    /// Number of cached pages, checked-out pages included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().entries
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Cached keys from least to most recently used.
    #[must_use]
    pub fn recency_order(&self) -> Vec<K> {
        self.lock().recency.values().cloned().collect()
    }
}

/// Exclusive access to one cached page.
///
/// Dereferences to the page value. Mutable access marks the page dirty so
/// it is written back before eviction. Dropping the handle returns the page
/// to the cache and wakes any thread waiting for it.
pub struct PageHandle<'a, K, V, W>
where
    K: Ord + Clone + Debug,
    W: WriteBack<K, V>,
{
    cache: &'a PageCache<K, V, W>,
    key: K,
    token: u64,
    /// Present until the handle is dropped.
    value: Option<V>,
    dirty: bool,
}

impl<K, V, W> PageHandle<'_, K, V, W>
where
    K: Ord + Clone + Debug,
    W: WriteBack<K, V>,
{
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the page as modified without touching it.
    pub const fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl<K, V, W> Deref for PageHandle<'_, K, V, W>
where
    K: Ord + Clone + Debug,
    W: WriteBack<K, V>,
{
    type Target = V;

    fn deref(&self) -> &V {
        match &self.value {
            Some(value) => value,
            None => unreachable!("page value is present until the handle is dropped"),
        }
    }
}

impl<K, V, W> DerefMut for PageHandle<'_, K, V, W>
where
    K: Ord + Clone + Debug,
    W: WriteBack<K, V>,
{
    fn deref_mut(&mut self) -> &mut V {
        self.dirty = true;
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("page value is present until the handle is dropped"),
        }
    }
}

impl<K, V, W> Drop for PageHandle<'_, K, V, W>
where
    K: Ord + Clone + Debug,
    W: WriteBack<K, V>,
{
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        // Never panic in drop; a poisoned lock still guards consistent state
        // because every mutation above completes before it can unwind.
        let mut state = self
            .cache
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = state.slots.get_mut(&self.key)
            && matches!(slot.state, SlotState::CheckedOut { token, .. } if token == self.token)
        {
            slot.state = SlotState::Resident {
                value,
                dirty: self.dirty,
            };
        }
        drop(state);
        self.cache.available.notify_all();
    }
}
