//! Background task pool and the extraction reaper
//!
//! Extraction work is fire-and-forget from the request path, but the
//! number of in-flight workers is bounded by a semaphore so a burst of
//! writes cannot flood the LLM provider. The queue is in-process and
//! lossy on crash; the `pending -> done|failed` state machine plus the
//! reaper make that recoverable without a persistent queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::graph::GraphStore;

// ============================================================================
// TASK POOL
// ============================================================================

/// Semaphore-bounded spawner for background work
#[derive(Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
}

impl TaskPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Spawn a task that runs once a slot frees up. The caller never
    /// waits; backpressure happens inside the spawned task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(_permit) => future.await,
                // Closed semaphore means shutdown; drop the work.
                Err(_) => debug!("task pool closed; dropping background task"),
            }
        })
    }

    /// Stop accepting new work.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

// ============================================================================
// REAPER
// ============================================================================

/// Periodically sweep memories stuck in `pending` with exhausted attempts
/// back to `failed`, so a crashed worker never wedges a record.
pub fn spawn_extraction_reaper(
    graph: Arc<dyn GraphStore>,
    max_attempts: u32,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match graph.sweep_stuck_extractions(max_attempts).await {
                Ok(0) => {}
                Ok(swept) => warn!(swept, "swept stuck extractions to failed"),
                Err(err) => warn!(error = %err, "extraction reaper sweep failed"),
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
