use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;

use crate::config::HerdConfig;
use crate::store::{BoundedStore, Lookup};
use crate::work::{Computation, Work};

/// A memoizing cache that runs at most one computation per key at a time.
///
/// Concurrent and subsequent callers asking for the same key receive the same [`Computation`]
/// until its entry expires or is evicted, so the producer of a key runs once per fresh period
/// no matter how many callers pile up while it is running.
///
/// Cloning a `Herd` gives another handle onto the same entries.
pub struct Herd<K, V, E> {
    name: Arc<str>,
    store: Arc<BoundedStore<K, Computation<V, E>>>,
    evict_on_reject: bool,
}

impl<K, V, E> Clone for Herd<K, V, E> {
    fn clone(&self) -> Self {
        Herd {
            name: Arc::clone(&self.name),
            store: Arc::clone(&self.store),
            evict_on_reject: self.evict_on_reject,
        }
    }
}

impl<K, V, E> fmt::Debug for Herd<K, V, E>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Herd")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("evict_on_reject", &self.evict_on_reject)
            .finish()
    }
}

impl<K, V, E> Default for Herd<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(HerdConfig::default())
    }
}

impl<K, V, E> Herd<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: HerdConfig) -> Self {
        Herd {
            name: Arc::from(config.name.as_str()),
            store: Arc::new(BoundedStore::new(&config)),
            evict_on_reject: config.evict_on_reject,
        }
    }

    /// Returns the computation for `key`, starting it with `producer` if there is none.
    ///
    /// If a live entry exists (or an expired one may be served once more in `stale` mode), it is
    /// returned as is and `producer` is not called. Otherwise `producer` is called right away and
    /// its [`Work`] is stored before this returns, so every later call finds it, whether it has
    /// settled yet or not.
    ///
    /// This never blocks on the computation. Await the returned [`Computation`] to get its
    /// outcome, which is exactly what the producer yielded, shared by every caller. When called
    /// from within a tokio runtime, pending work is spawned onto it and settles whether or not
    /// anyone awaits it.
    ///
    /// `producer` runs while the entry for `key` is locked. It must not call `obtain` on this
    /// herd for the same key.
    pub fn obtain<F>(&self, key: K, producer: F) -> Computation<V, E>
    where
        F: FnOnce() -> Work<V, E>,
    {
        metric!(counter("herd.access") += 1, "herd" => &self.name);

        if let Some(computation) = self.store.get(&key) {
            tracing::trace!(herd = %self.name, ?key, "Reusing cached computation");
            return computation;
        }

        let lookup = self
            .store
            .get_or_insert_with(key.clone(), |generation| {
                self.start(&key, producer, generation)
            });

        match lookup {
            Lookup::Miss(computation) => {
                self.spawn_computation(&key, &computation);
                computation
            }
            // another caller got to the entry in between
            lookup => lookup.into_inner(),
        }
    }

    /// Drives a pending computation on the current tokio runtime.
    ///
    /// Stored work then settles, and is rejected or expires, even if every caller drops its
    /// handle. Outside of a runtime, the computation only progresses while it is awaited.
    fn spawn_computation(&self, key: &K, computation: &Computation<V, E>) {
        if computation.is_settled() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(computation.clone().map(|_| ()));
            }
            Err(_) => {
                tracing::trace!(herd = %self.name, ?key, "No runtime to drive computation");
            }
        }
    }

    /// Invokes the producer and decides whether its computation gets stored.
    fn start<F>(&self, key: &K, producer: F, generation: u64) -> (Computation<V, E>, bool)
    where
        F: FnOnce() -> Work<V, E>,
    {
        metric!(counter("herd.computation") += 1, "herd" => &self.name);
        tracing::trace!(herd = %self.name, ?key, "Starting computation");

        match producer() {
            Work::Ready(Ok(value)) => (Computation::settled(Ok(value)), true),
            Work::Ready(Err(error)) => {
                record_rejection(&self.name, key);
                // a failure we know about up front never has to be evicted later
                (Computation::settled(Err(error)), !self.evict_on_reject)
            }
            Work::Pending(future) => {
                let future = self.watch(key.clone(), generation, future);
                (Computation::new(future), true)
            }
        }
    }

    /// Attaches the rejection policy to asynchronous work.
    ///
    /// The store is only referenced weakly, as it owns the computation this future ends up in.
    fn watch(
        &self,
        key: K,
        generation: u64,
        future: BoxFuture<'static, Result<V, E>>,
    ) -> BoxFuture<'static, Result<V, E>> {
        let name = Arc::clone(&self.name);
        let store = Arc::downgrade(&self.store);
        let evict_on_reject = self.evict_on_reject;

        async move {
            let result = future.await;
            if result.is_err() {
                record_rejection(&name, &key);
                if evict_on_reject {
                    if let Some(store) = store.upgrade() {
                        if store.remove_generation(&key, generation) {
                            tracing::debug!(herd = %name, ?key, "Evicted rejected computation");
                        }
                    }
                }
            }
            result
        }
        .boxed()
    }

    /// Removes the entry for `key`.
    ///
    /// A computation that is still running keeps running for everyone already holding it.
    pub fn delete(&self, key: &K) {
        self.store.delete(key);
    }

    /// Removes all entries.
    pub fn reset_all(&self) {
        self.store.reset_all();
    }

    /// Whether a live entry exists for `key`.
    pub fn has(&self, key: &K) -> bool {
        self.store.has(key)
    }

    /// The number of live entries.
    pub fn count(&self) -> u64 {
        self.store.count()
    }
}

fn record_rejection<K: fmt::Debug>(name: &str, key: &K) {
    metric!(counter("herd.rejected") += 1, "herd" => name);
    tracing::debug!(herd = %name, ?key, "Computation was rejected");
}
