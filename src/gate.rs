//! Process-wide bound on concurrent outbound fetches (spec.md §4.1).
//!
//! Every outbound HTTP request — index-page GET, file-content GET, or the
//! cheap `HEAD` used for approximate sizing — acquires a permit before the
//! network call and releases it on completion. The gate is the *only*
//! concurrency throttle in the crate; [`crate::tree`] and [`crate::cache`]
//! fan out as many tasks as the traversal wants and let the gate do the
//! actual backpressure, the same separation of concerns the design notes
//! (spec.md §9) recommend over ad hoc global mutable state.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Default concurrent-fetch cap (spec.md §4.1).
pub const DEFAULT_FETCH_LIMIT: usize = 40;

/// A cloneable capability that bounds concurrent network calls.
///
/// Cloning shares the same underlying semaphore; this is passed into every
/// component that may fetch (the index client, the cache store) rather than
/// reached for as global mutable state, per the design note in spec.md §9.
#[derive(Clone)]
pub struct FetchGate {
    semaphore: Arc<Semaphore>,
}

impl FetchGate {
    pub fn new(fetch_limit: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(fetch_limit.max(1))) }
    }

    /// Acquires a permit, suspending the caller until one is available.
    /// FIFO-fair enough that no caller starves under steady load (the
    /// `tokio::sync::Semaphore` wakes waiters in acquire order).
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("FetchGate semaphore is never closed")
    }

    /// Number of permits currently available, useful for tests asserting
    /// the admission cap (spec.md §8, property 3).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
