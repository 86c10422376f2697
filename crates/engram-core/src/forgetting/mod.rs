//! Forgetting agent
//!
//! Background decay of importance on a forgetting curve, with threshold-based
//! pruning under transactional deletes, plus the operator-facing nuke with a
//! cancellable countdown.
//!
//! The agent is a singleton: passes serialize on one guard, and a nuke fire
//! takes the same guard so it never overlaps a pass. A pass is cancellable at
//! page boundaries and never holds a page snapshot longer than one batch.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ForgettingAgentConfig;
use crate::error::{MemoryError, Result};
use crate::memory::MemoryFilter;
use crate::sparse::SparseIndex;
use crate::storage::MemoryStore;

// ============================================================================
// DECAY MATH (pure functions)
// ============================================================================

/// `importance · (1 − decay_rate)^age_days`
pub fn decayed_importance(importance: f64, age_days: f64, decay_rate: f64) -> f64 {
    if age_days <= 0.0 {
        return importance;
    }
    importance * (1.0 - decay_rate).powf(age_days)
}

/// A memory is forgotten only when it is past retention AND its decayed
/// importance sits below the threshold.
pub fn is_eligible(importance: f64, age_days: f64, config: &ForgettingAgentConfig) -> bool {
    age_days > config.retention_days
        && decayed_importance(importance, age_days, config.importance_decay_rate)
            < config.importance_threshold
}

// ============================================================================
// PASS SUMMARY
// ============================================================================

/// Outcome of one forgetting pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Active memories examined
    pub scanned: usize,
    /// Memories deleted
    pub deleted: usize,
    /// Wall-clock duration
    pub elapsed_ms: u64,
}

// ============================================================================
// NUKE
// ============================================================================

/// Lifecycle of a nuke operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NukeState {
    /// Countdown running; cancellable
    Pending,
    /// Cancelled before fire
    Cancelled,
    /// Countdown elapsed; the wipe ran (or is running)
    Fired,
}

/// Snapshot of the current nuke operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NukeStatus {
    /// Operation id handed back by `request_nuke`
    pub operation_id: Uuid,
    /// Unix seconds when requested
    pub scheduled_at: i64,
    /// Unix seconds when the countdown elapses
    pub fire_at: i64,
    /// Current state
    pub state: NukeState,
}

struct NukeOperation {
    status: NukeStatus,
    cancel: CancellationToken,
}

// ============================================================================
// FORGETTING AGENT
// ============================================================================

/// State shared with the countdown and scheduler tasks
struct AgentInner {
    store: Arc<MemoryStore>,
    sparse: Arc<RwLock<SparseIndex>>,
    config: ForgettingAgentConfig,
    /// Serializes passes against each other and against nuke fires
    pass_guard: tokio::sync::Mutex<()>,
    nuke: Mutex<Option<NukeOperation>>,
    last_pass: Mutex<Option<PassSummary>>,
}

/// Periodic and on-demand memory pruning.
pub struct ForgettingAgent {
    inner: Arc<AgentInner>,
}

impl ForgettingAgent {
    /// Build an agent over shared storage and the sparse index.
    pub fn new(
        store: Arc<MemoryStore>,
        sparse: Arc<RwLock<SparseIndex>>,
        config: ForgettingAgentConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                store,
                sparse,
                config,
                pass_guard: tokio::sync::Mutex::new(()),
                nuke: Mutex::new(None),
                last_pass: Mutex::new(None),
            }),
        }
    }

    /// Summary of the most recent completed pass.
    pub fn last_pass(&self) -> Option<PassSummary> {
        self.inner
            .last_pass
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .copied()
    }

    /// Run one forgetting pass. Cancellation is honored at page boundaries;
    /// deletes already committed stay committed.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<PassSummary> {
        self.inner.run_pass(cancel).await
    }

    /// Spawn the periodic scheduler. One instance only; the returned handle
    /// finishes when `cancel` fires.
    pub fn spawn_scheduler(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let interval = Duration::from_secs_f64(inner.config.check_interval_hours * 3600.0);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        match inner.run_pass(&cancel).await {
                            Ok(_) => {}
                            Err(MemoryError::Cancelled) => break,
                            Err(e) => warn!(error = %e, "forgetting pass failed"),
                        }
                    }
                }
            }
        })
    }

    // ========================================================================
    // NUKE
    // ========================================================================

    /// Schedule a wipe of all memories after the configured countdown.
    /// Only one nuke can be pending at a time.
    pub fn request_nuke(&self) -> Result<NukeStatus> {
        let mut slot = self.inner.lock_nuke();
        if let Some(op) = slot.as_ref() {
            if op.status.state == NukeState::Pending {
                return Err(MemoryError::StorageConflict(
                    "a nuke is already pending".into(),
                ));
            }
        }

        let delay = Duration::from_secs_f64(self.inner.config.nuke_delay_secs);
        let now = crate::clock::now_unix();
        let status = NukeStatus {
            operation_id: Uuid::new_v4(),
            scheduled_at: now,
            fire_at: now + delay.as_secs() as i64,
            state: NukeState::Pending,
        };
        let cancel = CancellationToken::new();
        *slot = Some(NukeOperation {
            status,
            cancel: cancel.clone(),
        });
        drop(slot);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(operation = %status.operation_id, "nuke cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    inner.fire_nuke(status.operation_id).await;
                }
            }
        });

        info!(operation = %status.operation_id, fire_at = status.fire_at, "nuke scheduled");
        Ok(status)
    }

    /// Cancel a pending nuke. Succeeds only while the countdown is running
    /// and the id matches.
    pub fn cancel_nuke(&self, operation_id: Uuid) -> Result<bool> {
        let mut slot = self.inner.lock_nuke();
        match slot.as_mut() {
            Some(op)
                if op.status.operation_id == operation_id
                    && op.status.state == NukeState::Pending =>
            {
                op.status.state = NukeState::Cancelled;
                op.cancel.cancel();
                info!(operation = %operation_id, "nuke cancelled before fire");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Snapshot of the current nuke operation, if any was requested.
    pub fn nuke_status(&self) -> Option<NukeStatus> {
        self.inner.lock_nuke().as_ref().map(|op| op.status)
    }
}

impl AgentInner {
    fn lock_nuke(&self) -> std::sync::MutexGuard<'_, Option<NukeOperation>> {
        self.nuke
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One scan-and-delete pass over the active set.
    async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassSummary> {
        let _guard = self.pass_guard.lock().await;
        let started = Instant::now();
        let now = crate::clock::now_unix();

        let mut cursor = self
            .store
            .scan_paginated(self.config.forgetting_batch_size, MemoryFilter::active());
        let mut scanned = 0usize;
        let mut deleted = 0usize;

        while let Some(page) = cursor.next_page().await? {
            if cancel.is_cancelled() {
                debug!(scanned, deleted, "forgetting pass cancelled at page boundary");
                return Err(MemoryError::Cancelled);
            }

            let mut doomed: Vec<i64> = Vec::new();
            for record in &page {
                scanned += 1;
                if is_eligible(record.importance, record.age_days(now), &self.config) {
                    doomed.push(record.doc_id);
                }
            }

            if !doomed.is_empty() {
                deleted += self.store.delete_many(&doomed, now)?;
                let mut sparse = self
                    .sparse
                    .write()
                    .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))?;
                for doc_id in &doomed {
                    sparse.remove(*doc_id);
                }
            }
        }

        // Tombstones past their retention window leave the document index
        self.store.compact(now, self.config.tombstone_retention_days)?;

        let summary = PassSummary {
            scanned,
            deleted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            scanned = summary.scanned,
            deleted = summary.deleted,
            elapsed_ms = summary.elapsed_ms,
            "forgetting pass complete"
        );
        *self
            .last_pass
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary);
        Ok(summary)
    }

    /// Countdown elapsed: flip to fired under the slot lock, then wipe.
    async fn fire_nuke(&self, operation_id: Uuid) {
        {
            let mut slot = self.lock_nuke();
            match slot.as_mut() {
                Some(op)
                    if op.status.operation_id == operation_id
                        && op.status.state == NukeState::Pending =>
                {
                    op.status.state = NukeState::Fired;
                }
                // Cancelled in the race window; nothing to do
                _ => return,
            }
        }

        // Never overlap a forgetting pass
        let _guard = self.pass_guard.lock().await;
        let result: Result<()> = (|| {
            let removed = self.store.delete_all()?;
            self.sparse
                .write()
                .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))?
                .clear();
            info!(operation = %operation_id, removed, "nuke fired");
            Ok(())
        })();
        if let Err(e) = result {
            warn!(operation = %operation_id, error = %e, "nuke fire failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
