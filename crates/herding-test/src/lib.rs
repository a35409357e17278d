//! Helpers for testing the herding cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Producers handed to `Herd::obtain` are `FnOnce`, so counting how often they ran needs
//!    shared state. Clone an [`Invocations`] into each producer and call
//!    [`record`](Invocations::record) from inside it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `herding` crate and mutes all
///    other logs (such as moka).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("herding=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counts how many times a producer was invoked.
#[derive(Clone, Debug, Default)]
pub struct Invocations(Arc<AtomicUsize>);

impl Invocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation and returns the zero-based index of it.
    pub fn record(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// The number of invocations recorded so far.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An error a test producer can fail with.
///
/// Herds replay errors to every waiter, so this is cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    /// The producer gave up with the attached message.
    #[error("producer failed: {0}")]
    Failed(String),
    /// The producer timed out.
    #[error("producer timed out")]
    Timeout,
}

impl ProducerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
