//! The bounded key/value store underneath a [`Herd`](crate::Herd).
//!
//! Capacity and LRU bookkeeping is delegated to a [`moka`] cache configured with the LRU
//! eviction policy. Age is tracked here instead of inside moka, because moka hides expired
//! entries entirely while we need to serve them one last time in `stale` mode.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Entry;
use moka::notification::RemovalCause;
use moka::ops::compute::{CompResult, Op};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::config::HerdConfig;

/// Values that may be waiting on an unfinished computation.
///
/// Unsettled values are exempt from age based expiry.
pub trait Settle {
    fn is_settled(&self) -> bool;
}

/// An item saved in the moka cache.
#[derive(Clone, Debug)]
struct Slot<T> {
    /// The actual data.
    value: T,
    /// When the item was stored, which is where its age is counted from.
    inserted: Instant,
    /// Distinguishes this item from earlier and later ones stored under the same key.
    generation: u64,
}

/// The outcome of [`BoundedStore::get_or_insert_with`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    /// A live entry was found and kept.
    Hit(T),
    /// An expired entry was served one last time and purged.
    Stale(T),
    /// No usable entry existed, and a new value was created.
    Miss(T),
}

impl<T> Lookup<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Hit(value) | Self::Stale(value) | Self::Miss(value) => value,
        }
    }
}

/// A capacity and age limited map with LRU eviction.
pub struct BoundedStore<K, T> {
    name: Arc<str>,
    cache: Cache<K, Slot<T>>,
    /// Mirrors `cache`, so entries can be inspected without counting as an access.
    index: Cache<K, Slot<T>>,
    max_age: Option<Duration>,
    stale: bool,
    bounded: bool,
    generations: AtomicU64,
}

impl<K, T> fmt::Debug for BoundedStore<K, T>
where
    K: Hash + Eq + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedStore")
            .field("name", &self.name)
            .field("entries", &self.cache.entry_count())
            .field("max_age", &self.max_age)
            .field("stale", &self.stale)
            .finish()
    }
}

impl<K, T> BoundedStore<K, T>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    T: Settle + Clone + Send + Sync + 'static,
{
    pub fn new(config: &HerdConfig) -> Self {
        let name: Arc<str> = Arc::from(config.name.as_str());
        let capacity = config.capacity();
        let index: Cache<K, Slot<T>> = Cache::builder().build();

        let listener_name = Arc::clone(&name);
        let listener_index = index.clone();
        let mut builder = Cache::builder()
            .name(&config.name)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<K>, slot: Slot<T>, cause: RemovalCause| {
                if matches!(cause, RemovalCause::Size) {
                    untrack(&listener_index, &key, slot.generation);
                    tracing::trace!(herd = %listener_name, ?key, "Evicted least recently used entry");
                    metric!(counter("herd.evicted") += 1, "herd" => &listener_name);
                }
            });
        if let Some(capacity) = capacity {
            builder = builder.max_capacity(capacity);
        }

        Self {
            name,
            cache: builder.build(),
            index,
            max_age: config.max_age,
            stale: config.stale,
            bounded: capacity.is_some(),
            generations: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, slot: &Slot<T>) -> bool {
        match self.max_age {
            Some(max_age) => slot.value.is_settled() && slot.inserted.elapsed() > max_age,
            None => false,
        }
    }

    /// Applies pending capacity evictions right away.
    ///
    /// moka batches its LRU bookkeeping, so without this the store could briefly hold more
    /// entries than allowed, and evict in insertion rather than access order.
    fn maintain(&self) {
        if self.bounded {
            self.cache.run_pending_tasks();
        }
    }

    /// Returns the live value for `key`, counting as an access.
    ///
    /// An expired entry is purged. In `stale` mode the purging read still returns it.
    pub fn get(&self, key: &K) -> Option<T> {
        let slot = self.cache.get(key)?;
        if !self.is_expired(&slot) {
            self.record_hit(key);
            return Some(slot.value);
        }

        // only the reader that actually purged the entry gets to serve it stale
        let purged = self.remove_generation(key, slot.generation);
        if self.stale && purged {
            self.record_stale_hit(key);
            return Some(slot.value);
        }
        None
    }

    fn record_hit(&self, key: &K) {
        metric!(counter("herd.memory.hit") += 1, "herd" => &self.name);
        tracing::trace!(herd = %self.name, ?key, "Found live entry");
    }

    fn record_stale_hit(&self, key: &K) {
        metric!(counter("herd.stale.hit") += 1, "herd" => &self.name);
        tracing::trace!(herd = %self.name, ?key, "Serving expired entry one last time");
    }

    /// Inserts or replaces the value for `key`, restarting its age.
    pub fn set(&self, key: K, value: T) {
        let slot = Slot {
            value,
            inserted: Instant::now(),
            generation: self.next_generation(),
        };
        self.index.insert(key.clone(), slot.clone());
        self.cache.insert(key, slot);
        self.maintain();
    }

    /// Looks `key` up and, if there is no usable entry, creates one with `init`.
    ///
    /// The whole read-decide-write runs while holding the lock for `key`, so concurrent callers
    /// for the same key will see at most one `init` call between them.
    ///
    /// `init` receives the generation of the new entry and returns the value together with
    /// whether it should be stored at all. A value that is not stored is still returned as a
    /// [`Lookup::Miss`]. An expired entry it would have replaced stays until the next read purges
    /// it.
    pub fn get_or_insert_with<F>(&self, key: K, init: F) -> Lookup<T>
    where
        F: FnOnce(u64) -> (T, bool),
    {
        let result = self
            .cache
            .entry(key.clone())
            .and_try_compute_with(|entry| {
                if let Some(slot) = entry.map(Entry::into_value) {
                    if !self.is_expired(&slot) {
                        return Ok(Op::Nop);
                    }
                    if self.stale {
                        return Ok(Op::Remove);
                    }
                }

                let generation = self.next_generation();
                let (value, admit) = init(generation);
                if !admit {
                    return Err(value);
                }

                let slot = Slot {
                    value,
                    inserted: Instant::now(),
                    generation,
                };
                self.index.insert(key.clone(), slot.clone());
                Ok(Op::Put(slot))
            });

        match result {
            Ok(CompResult::Unchanged(entry)) => {
                self.record_hit(&key);
                Lookup::Hit(entry.into_value().value)
            }
            Ok(CompResult::Removed(entry)) => {
                let slot = entry.into_value();
                untrack(&self.index, &key, slot.generation);
                self.record_stale_hit(&key);
                Lookup::Stale(slot.value)
            }
            Ok(CompResult::Inserted(entry) | CompResult::ReplacedWith(entry)) => {
                self.maintain();
                Lookup::Miss(entry.into_value().value)
            }
            Err(value) => Lookup::Miss(value),
            // `Nop` and `Remove` are only returned for an entry that is present
            Ok(CompResult::StillNone(_)) => unreachable!("entry vanished under its own lock"),
        }
    }

    /// Removes `key` only if its entry is still the one created as `generation`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove_generation(&self, key: &K, generation: u64) -> bool {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|entry| match entry {
                Some(entry) if entry.value().generation == generation => Op::Remove,
                _ => Op::Nop,
            });

        let removed = matches!(result, CompResult::Removed(_));
        if removed {
            untrack(&self.index, key, generation);
        }
        removed
    }

    pub fn delete(&self, key: &K) {
        self.cache.invalidate(key);
        self.index.invalidate(key);
    }

    /// Whether a live entry exists for `key`.
    ///
    /// Unlike [`get`](Self::get), this does not count as an access and never purges. An expired
    /// entry is reported as missing even in `stale` mode.
    pub fn has(&self, key: &K) -> bool {
        self.cache.contains_key(key)
            && self
                .index
                .get(key)
                .is_some_and(|slot| !self.is_expired(&slot))
    }

    /// The number of live entries.
    pub fn count(&self) -> u64 {
        self.cache.run_pending_tasks();
        let count = self
            .cache
            .iter()
            .filter(|(_, slot)| !self.is_expired(slot))
            .count() as u64;
        metric!(gauge("herd.entries") = count, "herd" => &self.name);
        count
    }

    /// Removes every entry.
    pub fn reset_all(&self) {
        // `invalidate_all` leaves entries visible to `iter` until maintenance catches up
        for (key, _) in self.cache.iter() {
            self.cache.invalidate(&*key);
        }
        self.cache.run_pending_tasks();
        self.index.invalidate_all();
    }
}

/// Drops the index entry for `key` if it still describes `generation`.
fn untrack<K, T>(index: &Cache<K, Slot<T>>, key: &K, generation: u64)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    index
        .entry_by_ref(key)
        .and_compute_with(|entry| match entry {
            Some(entry) if entry.value().generation == generation => Op::Remove,
            _ => Op::Nop,
        });
}
