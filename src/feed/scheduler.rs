//! Periodic aggregation loop.
//!
//! Every tick the scheduler picks the stalest feed that is not already being
//! ingested and hands it to a worker. Workers are bounded by a semaphore, so
//! a slow feed occupies one slot without delaying ticks for the others.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::ingest::{IngestReport, IngestionEngine};
use crate::shutdown::Shutdown;
use crate::storage::{Feed, FeedStore};

type InFlight = Arc<Mutex<HashSet<Uuid>>>;

/// A feed reserved for one worker. Dropping it releases the reservation,
/// including when the worker panics.
struct Claim {
    feed: Feed,
    in_flight: InFlight,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.feed.id);
    }
}

pub struct Scheduler {
    engine: Arc<IngestionEngine>,
    store: Arc<dyn FeedStore>,
    interval: Duration,
    workers: Arc<Semaphore>,
    in_flight: InFlight,
}

impl Scheduler {
    /// `workers` is clamped to at least one.
    pub fn new(
        engine: Arc<IngestionEngine>,
        store: Arc<dyn FeedStore>,
        interval: Duration,
        workers: usize,
    ) -> Self {
        Self {
            engine,
            store,
            interval,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ingests the stalest idle feed and waits for the result.
    ///
    /// Returns `None` when there are no feeds or every feed is in flight.
    pub async fn tick_once(&self, shutdown: &Shutdown) -> Option<IngestReport> {
        let _permit = self.acquire_worker(shutdown).await?;
        let claim = self.claim_stalest().await?;
        Some(self.engine.run(&claim.feed, shutdown).await)
    }

    /// Ticks every `interval` until `shutdown` fires.
    ///
    /// The first tick happens immediately. Ticks that fall behind are
    /// delayed rather than bunched. On shutdown no new work starts; fetches
    /// in flight observe the same signal, and this returns once they finish.
    pub async fn run_forever(&self, shutdown: &Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<IngestReport> = JoinSet::new();

        tracing::info!(interval = ?self.interval, "Collecting feeds");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Some(result) = tasks.try_join_next() {
                log_join_result(result);
            }

            let Some(permit) = self.acquire_worker(shutdown).await else {
                break;
            };
            let Some(claim) = self.claim_stalest().await else {
                tracing::debug!("No idle feeds this tick");
                continue;
            };

            tracing::debug!(feed = %claim.feed.url, "Dispatching feed");
            let engine = Arc::clone(&self.engine);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let _permit: OwnedSemaphorePermit = permit;
                engine.run(&claim.feed, &shutdown).await
            });
        }

        if !tasks.is_empty() {
            tracing::info!(workers = tasks.len(), "Waiting for in-flight feeds");
        }
        while let Some(result) = tasks.join_next().await {
            log_join_result(result);
        }
        tracing::info!("Collector stopped");
    }

    /// Waits for a free worker slot, giving up if `shutdown` fires first.
    async fn acquire_worker(&self, shutdown: &Shutdown) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok(),
        }
    }

    async fn claim_stalest(&self) -> Option<Claim> {
        let feeds = match self.store.list_feeds_by_staleness().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list feeds");
                return None;
            }
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let feed = feeds.into_iter().find(|f| !in_flight.contains(&f.id))?;
        in_flight.insert(feed.id);
        drop(in_flight);

        Some(Claim {
            feed,
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

fn log_join_result(result: Result<IngestReport, JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Ingestion worker panicked");
    }
}
