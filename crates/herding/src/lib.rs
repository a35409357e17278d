//! # Herding
//!
//! A single-flight memoizing cache. Given a key and a producer, a [`Herd`] makes sure that at most
//! one computation per key is in flight at any time, and that every caller asking for the same key
//! in the meantime gets the very same pending or completed result.
//!
//! ## Layers
//!
//! - The [`BoundedStore`](store::BoundedStore) is an in-memory map with an optional upper bound
//!   on the number of entries, evicting the least recently used entry first, and an optional
//!   maximum age per entry.
//! - The [`Herd`] sits on top of it. On a miss it invokes the producer exactly once and stores the
//!   resulting [`Computation`] *before* it has settled, so that concurrent callers find and share
//!   it instead of starting their own.
//!
//! A call to [`Herd::obtain`] goes through the following steps:
//! - It looks the key up in the store. A live entry is returned as is.
//! - On miss, it takes the lock for the key, checks again, invokes the producer and stores its
//!   [`Work`] as a [`Computation`].
//! - The caller awaits the computation, which settles to whatever the producer yielded. Inside a
//!   tokio runtime, pending work is also spawned onto the runtime, so it settles even if every
//!   caller gives up on it.
//!
//! ## Expiry and Staleness
//!
//! With [`HerdConfig::max_age`] set, entries expire that long after they were stored. Entries
//! whose computation has not settled yet do not expire, otherwise a slow producer could end up
//! running twice for the same key.
//!
//! Reading an expired entry purges it. By default that read is a plain miss. With
//! [`HerdConfig::stale`], the purging read still serves the expired value one last time, and only
//! the next read starts a new computation.
//!
//! ## Rejections
//!
//! Producer errors are never wrapped or interpreted, they are replayed verbatim to every holder of
//! the computation. A failed computation stays cached like a successful one, unless
//! [`HerdConfig::evict_on_reject`] is set, in which case its entry is removed as soon as it
//! settles.
//!
//! ## Metrics
//!
//! When statsd is configured via [`metrics::configure`], a couple of metrics are collected, each
//! tagged with the `herd` name:
//!
//! - `herd.access`: All calls to [`Herd::obtain`].
//! - `herd.memory.hit`: Calls served by a live entry.
//! - `herd.stale.hit`: Calls served by an expired entry one last time.
//! - `herd.computation`: Producer invocations.
//! - `herd.rejected`: Computations that settled to an error.
//! - `herd.evicted`: Entries evicted because the herd was full.
//! - `herd.entries`: A gauge updated by [`Herd::count`].

#[macro_use]
pub mod metrics;

pub mod config;
mod herd;
pub mod store;
mod work;


pub use config::{HerdConfig, MetricsConfig};
pub use herd::Herd;
pub use work::{Computation, Work};
