//! # Exclusion Guard
//!
//! Time-bounded, best-effort distributed mutual exclusion keyed by collection
//! uuid. At most one coordinator instance runs a guarded operation per uuid at
//! a time; the lock flag carries a TTL so a crashed holder cannot wedge the
//! lock forever.
//!
//! Acquisition is a single atomic conditional-set-with-expiry, so two
//! instances cannot both observe "absent" and both proceed. This is still not
//! a fencing-token lock: a holder that outlives the TTL can overlap with the
//! next holder, which is accepted for the short side-effecting sections this
//! guards.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::CorralConfig;
use crate::error::Result;
use crate::events::LifecycleBus;
use crate::store::Store;

/// Outcome of a [`run_exclusive`](ExclusionGuard::run_exclusive) attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusiveOutcome<T> {
    /// The work ran to completion under the lock
    Completed(T),

    /// Another holder was mid-way through a guarded operation for this uuid;
    /// the work was not invoked. A normal outcome, not an error.
    Busy,
}

impl<T> ExclusiveOutcome<T> {
    /// Whether the attempt was skipped because the lock was held
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// The completed value, if the work ran
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Busy => None,
        }
    }
}

/// TTL-bounded distributed mutual-exclusion primitive
pub struct ExclusionGuard<S> {
    store: Arc<S>,
    config: CorralConfig,
    lifecycle: LifecycleBus,
}

impl<S> ExclusionGuard<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>, config: CorralConfig, lifecycle: LifecycleBus) -> Self {
        Self {
            store,
            config,
            lifecycle,
        }
    }

    /// Run `work` only if no other holder is mid-way through a guarded
    /// operation for this uuid
    ///
    /// Store failures before the work runs are published on the lifecycle bus
    /// and returned without invoking the work. The lock is released when the
    /// work finishes, success or failure; a release failure is reported on the
    /// bus but never masks the work's own result (the TTL reclaims the flag).
    #[instrument(skip(self, work), fields(uuid = %uuid))]
    pub async fn run_exclusive<F, Fut, T>(&self, uuid: &str, work: F) -> Result<ExclusiveOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock_key = self.config.atomic_key(uuid);
        let ttl = Duration::from_secs(self.config.ttl_seconds);

        let acquired = self
            .store
            .set_if_absent(&lock_key, uuid, ttl)
            .await
            .inspect_err(|e| self.lifecycle.report(e))?;

        if !acquired {
            debug!(uuid = %uuid, "guarded operation already in progress");
            return Ok(ExclusiveOutcome::Busy);
        }

        let outcome = work().await;

        if let Err(e) = self.store.delete(&lock_key).await {
            self.lifecycle.report(&e);
        }

        outcome.map(ExclusiveOutcome::Completed)
    }
}
