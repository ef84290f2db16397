//! # Retention Sweeper
//!
//! Time-windowed garbage collection over the cycle index. Collections whose
//! last `add` is at or below a cutoff timestamp are purged: every metadata
//! record, the item sequence, and the cycle-index entry go in one atomic
//! batch per collection. A failure purging one collection is reported and
//! counted, and the sweep moves on to the next.
//!
//! The recurring scheduler is the only cancellable background task in the
//! system; `stop` is idempotent and `start` on a running sweeper restarts the
//! timer without leaking the previous task.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::config::CorralConfig;
use crate::error::Result;
use crate::events::LifecycleBus;
use crate::store::{Store, StoreCommand};

/// Counters for one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SweepStats {
    /// Collections fully purged
    pub swept: usize,
    /// Collections whose purge failed and was skipped
    pub failed: usize,
}

/// Periodic garbage collector for stale collections
pub struct RetentionSweeper<S> {
    store: Arc<S>,
    config: CorralConfig,
    lifecycle: LifecycleBus,
    scheduler: Arc<Mutex<Option<JoinHandle<()>>>>,
}

// Manual impl: `S` itself need not be Clone behind the Arc.
impl<S> Clone for RetentionSweeper<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            lifecycle: self.lifecycle.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<S> RetentionSweeper<S>
where
    S: Store + 'static,
{
    pub fn new(store: Arc<S>, config: CorralConfig, lifecycle: LifecycleBus) -> Self {
        Self {
            store,
            config,
            lifecycle,
            scheduler: Arc::new(Mutex::new(None)),
        }
    }

    /// Purge every collection whose last-write timestamp is `<= cutoff`
    ///
    /// Failures are isolated per collection: one bad entry is reported on the
    /// lifecycle bus and counted, and the sweep continues. Only a failure to
    /// read the cycle index itself aborts the pass.
    #[instrument(skip(self), fields(cutoff))]
    pub async fn truncate(&self, cutoff: i64) -> Result<SweepStats> {
        let stale = self
            .store
            .sorted_range_by_score(&self.config.cycle_key(), 0, cutoff)
            .await
            .inspect_err(|e| self.lifecycle.report(e))?;

        let mut stats = SweepStats::default();
        for uuid in stale {
            match self.purge(&uuid).await {
                Ok(()) => stats.swept += 1,
                Err(e) => {
                    warn!(uuid = %uuid, error = %e, "failed to purge collection");
                    self.lifecycle.report(&e);
                    stats.failed += 1;
                }
            }
        }

        debug!(swept = stats.swept, failed = stats.failed, "sweep complete");
        Ok(stats)
    }

    /// Purge every collection not refreshed within the configured retention
    /// window, i.e. [`truncate`](Self::truncate) at `now - retention_seconds`
    pub async fn truncate_stale(&self) -> Result<SweepStats> {
        let cutoff = chrono::Utc::now().timestamp() - self.config.retention_seconds as i64;
        self.truncate(cutoff).await
    }

    /// Delete one collection's metadata, items, and cycle entry atomically
    async fn purge(&self, uuid: &str) -> Result<()> {
        let meta_key = self.config.meta_key();
        let fields = self
            .store
            .hash_scan_prefix(&meta_key, &format!("{uuid}:"))
            .await?;

        let mut commands: Vec<StoreCommand> = fields
            .into_iter()
            .map(|(field, _)| StoreCommand::HashDelete {
                key: meta_key.clone(),
                field,
            })
            .collect();
        commands.push(StoreCommand::Delete {
            key: self.config.items_key(uuid),
        });
        commands.push(StoreCommand::SortedSetRemove {
            key: self.config.cycle_key(),
            member: uuid.to_string(),
        });

        self.store.execute_batch(commands).await
    }

    /// Start the recurring sweep, running
    /// [`truncate_stale`](Self::truncate_stale) every `interval_seconds`
    ///
    /// The first sweep happens one full interval after this call. Starting a
    /// running sweeper restarts its timer.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock();
        if let Some(previous) = scheduler.take() {
            previous.abort();
        }

        let sweeper = self.clone();
        let period = Duration::from_secs(self.config.interval_seconds);
        *scheduler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // interval fires immediately; swallow that tick so the first
            // sweep lands one full period after start
            ticker.tick().await;

            loop {
                ticker.tick().await;
                // errors already reported on the lifecycle bus
                if let Err(e) = sweeper.truncate_stale().await {
                    warn!(error = %e, "scheduled sweep failed");
                }
            }
        }));
    }

    /// Stop the recurring sweep; safe to call when already stopped
    pub fn stop(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.abort();
        }
    }

    /// Whether the recurring sweep is currently scheduled
    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<S> Drop for RetentionSweeper<S> {
    fn drop(&mut self) {
        // Only the last clone tears the scheduler down.
        if Arc::strong_count(&self.scheduler) == 1 {
            if let Some(scheduler) = self.scheduler.lock().take() {
                scheduler.abort();
            }
        }
    }
}
