//! Secondary-store reconciliation
//!
//! The coordinator re-runs role resolution for a batch of subjects and
//! writes the result to a denormalized secondary role record, tracking one
//! live status record per subject. Subjects reconcile independently: one
//! subject's failure never blocks or fails the rest of the batch.

use crate::error::{AccessError, Result};
use crate::resolver::RoleResolver;
use crate::store::AuthorityStore;
use crate::types::{current_timestamp_ms, SubjectId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::task::JoinHandle;

/// Reconciliation status for one subject.
///
/// Transitions are restricted to:
/// `Idle→Started`, `Started→Completed`, `Started→Failed`,
/// `Failed→Started` (retry), `Completed→Started` (re-trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Started,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Started => "started",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Idle, SyncStatus::Started)
                | (SyncStatus::Started, SyncStatus::Completed)
                | (SyncStatus::Started, SyncStatus::Failed)
                | (SyncStatus::Failed, SyncStatus::Started)
                | (SyncStatus::Completed, SyncStatus::Started)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the denormalized secondary role record for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    /// No successful write yet
    Pending,
    /// Last reconciliation wrote the record successfully
    Ready,
    /// Last write attempt failed
    Error,
}

/// Live reconciliation record for one subject; updated in place, latest
/// state is canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    pub subject: SubjectId,
    pub status: SyncStatus,
    /// First-attempt timestamp; preserved across retries of a failed sync
    pub started_at: Option<u64>,
    pub last_attempted_at: Option<u64>,
    pub error_message: Option<String>,
    pub store_status: StoreStatus,
    pub store_error: Option<String>,
}

impl SyncStatusRecord {
    fn idle(subject: SubjectId) -> Self {
        Self {
            subject,
            status: SyncStatus::Idle,
            started_at: None,
            last_attempted_at: None,
            error_message: None,
            store_status: StoreStatus::Pending,
            store_error: None,
        }
    }
}

struct SyncInner<S> {
    resolver: Arc<RoleResolver<S>>,
    records: DashMap<SubjectId, SyncStatusRecord>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Drives secondary-store reconciliation for batches of subjects.
///
/// Cloning is cheap; clones share the status registry.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use membership_authz::resolver::RoleResolver;
/// use membership_authz::store::MemoryAuthorityStore;
/// use membership_authz::sync::SyncCoordinator;
/// use membership_authz::types::SubjectId;
///
/// # async fn example() {
/// let store = Arc::new(MemoryAuthorityStore::new());
/// let resolver = Arc::new(RoleResolver::new(store));
/// let coordinator = SyncCoordinator::new(resolver);
///
/// let started = coordinator.trigger([SubjectId::new("user-1")]);
/// assert_eq!(started.len(), 1);
/// coordinator.await_quiescent().await;
/// # }
/// ```
pub struct SyncCoordinator<S> {
    inner: Arc<SyncInner<S>>,
}

impl<S> Clone for SyncCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AuthorityStore + 'static> SyncCoordinator<S> {
    pub fn new(resolver: Arc<RoleResolver<S>>) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                resolver,
                records: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts reconciliation for a batch of subjects.
    ///
    /// Returns the per-subject records already moved to `Started`; each
    /// subject's reconciliation then proceeds on its own task and settles
    /// the record to `Completed` or `Failed`. A subject whose record is
    /// already `Started` is skipped with a warning rather than failing the
    /// batch.
    ///
    /// A retry of a `Failed` subject keeps `started_at` from the first
    /// attempt; triggering from `Idle` or `Completed` begins a new cycle
    /// with a fresh `started_at`.
    pub fn trigger(&self, subjects: impl IntoIterator<Item = SubjectId>) -> Vec<SyncStatusRecord> {
        let mut started = Vec::new();

        for subject in subjects {
            let now = current_timestamp_ms();
            let mut entry = self
                .inner
                .records
                .entry(subject.clone())
                .or_insert_with(|| SyncStatusRecord::idle(subject.clone()));

            if !entry.status.can_transition_to(SyncStatus::Started) {
                tracing::warn!(subject = %subject, status = %entry.status,
                    "sync already in progress, skipping");
                continue;
            }

            if entry.status != SyncStatus::Failed {
                entry.started_at = Some(now);
            }
            entry.status = SyncStatus::Started;
            entry.last_attempted_at = Some(now);
            entry.error_message = None;
            started.push(entry.clone());
            drop(entry);

            tracing::debug!(subject = %subject, "sync started");
            let coordinator = self.clone();
            let handle = tokio::spawn(async move {
                coordinator.reconcile(subject).await;
            });
            if let Ok(mut tasks) = self.inner.tasks.lock() {
                tasks.retain(|t| !t.is_finished());
                tasks.push(handle);
            }
        }

        started
    }

    /// Snapshot of every status record, ordered by subject. Query surface
    /// for the operational dashboard.
    pub fn records(&self) -> Vec<SyncStatusRecord> {
        let mut all: Vec<SyncStatusRecord> =
            self.inner.records.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.subject.cmp(&b.subject));
        all
    }

    /// Latest status record for one subject.
    pub fn record(&self, subject: &SubjectId) -> Option<SyncStatusRecord> {
        self.inner.records.get(subject).map(|r| r.clone())
    }

    /// Awaits every reconciliation task spawned so far. Used by tests and
    /// graceful shutdown.
    pub async fn await_quiescent(&self) {
        loop {
            let drained = match self.inner.tasks.lock() {
                Ok(mut tasks) => std::mem::take(&mut *tasks),
                Err(_) => return,
            };
            if drained.is_empty() {
                return;
            }
            for handle in drained {
                let _ = handle.await;
            }
        }
    }

    /// Reconciles one subject: resolve, write the secondary record, settle
    /// the status.
    async fn reconcile(&self, subject: SubjectId) {
        let outcome = self.run_reconciliation(&subject).await;
        match outcome {
            Ok(()) => self.settle_completed(&subject),
            Err(err) => self.settle_failed(&subject, err),
        }
    }

    async fn run_reconciliation(&self, subject: &SubjectId) -> Result<()> {
        let role = self.inner.resolver.resolve(subject).await?;
        self.inner
            .resolver
            .store()
            .upsert_secondary_role_record(subject, role)
            .await
            .map_err(|err| AccessError::SyncWriteFailure {
                reason: err.to_string(),
            })?;
        Ok(())
    }

    fn settle_completed(&self, subject: &SubjectId) {
        if let Some(mut record) = self.inner.records.get_mut(subject) {
            record.status = SyncStatus::Completed;
            record.store_status = StoreStatus::Ready;
            record.store_error = None;
            record.error_message = None;
            tracing::debug!(subject = %subject, "sync completed");
        }
    }

    fn settle_failed(&self, subject: &SubjectId, err: AccessError) {
        if let Some(mut record) = self.inner.records.get_mut(subject) {
            record.status = SyncStatus::Failed;
            record.error_message = Some(err.to_string());
            if let AccessError::SyncWriteFailure { reason } = &err {
                // Resolution succeeded, the write did not
                record.store_status = StoreStatus::Error;
                record.store_error = Some(reason.clone());
            }
            tracing::warn!(subject = %subject, error = %err, "sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{sources, MemoryAuthorityStore};
    use crate::types::Role;
    use proptest::prelude::*;

    fn setup() -> (Arc<MemoryAuthorityStore>, SyncCoordinator<MemoryAuthorityStore>) {
        let store = Arc::new(MemoryAuthorityStore::new());
        let resolver = Arc::new(RoleResolver::new(Arc::clone(&store)));
        (store, SyncCoordinator::new(resolver))
    }

    #[tokio::test]
    async fn test_trigger_returns_started_records() {
        let (store, coordinator) = setup();
        let subject = SubjectId::new("s1");
        store.grant_role(&subject, Role::Admin);

        let started = coordinator.trigger([subject.clone()]);
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].status, SyncStatus::Started);
        assert!(started[0].started_at.is_some());

        coordinator.await_quiescent().await;
        let record = coordinator.record(&subject).unwrap();
        assert_eq!(record.status, SyncStatus::Completed);
        assert_eq!(record.store_status, StoreStatus::Ready);
        assert_eq!(store.secondary_role(&subject), Some(Some(Role::Admin)));
    }

    #[tokio::test]
    async fn test_batch_failures_are_independent() {
        let (store, coordinator) = setup();
        let s5 = SubjectId::new("s5");
        let s6 = SubjectId::new("s6");
        let s7 = SubjectId::new("s7");
        store.grant_role(&s5, Role::Admin);
        store.grant_role(&s7, Role::Admin);
        // s5 and s7 short-circuit at the admin step and never reach the
        // collector source; only s6 does, and it is down past the retry
        // budget.
        store.inject_failures(sources::COLLECTOR_MEMBERSHIPS, 2);
        coordinator.trigger([s5.clone(), s6.clone(), s7.clone()]);
        coordinator.await_quiescent().await;

        assert_eq!(coordinator.record(&s5).unwrap().status, SyncStatus::Completed);
        assert_eq!(coordinator.record(&s7).unwrap().status, SyncStatus::Completed);

        let failed = coordinator.record(&s6).unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert!(failed.error_message.is_some());
        assert_eq!(failed.store_status, StoreStatus::Pending);

        // Transient fault gone: retry completes
        coordinator.trigger([s6.clone()]);
        coordinator.await_quiescent().await;
        assert_eq!(coordinator.record(&s6).unwrap().status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_retry_preserves_first_attempt_provenance() {
        let (store, coordinator) = setup();
        let subject = SubjectId::new("s8");
        store.inject_failures(sources::ROLE_ASSIGNMENTS, 2);

        coordinator.trigger([subject.clone()]);
        coordinator.await_quiescent().await;
        let failed = coordinator.record(&subject).unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        let first_started = failed.started_at;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        coordinator.trigger([subject.clone()]);
        coordinator.await_quiescent().await;
        let retried = coordinator.record(&subject).unwrap();
        assert_eq!(retried.status, SyncStatus::Completed);
        assert_eq!(retried.started_at, first_started);
        assert!(retried.last_attempted_at >= first_started);
    }

    #[tokio::test]
    async fn test_write_failure_records_store_error() {
        let (store, coordinator) = setup();
        let subject = SubjectId::new("s9");
        store.grant_role(&subject, Role::Admin);
        store.inject_failures(sources::SECONDARY_ROLES, 2);

        coordinator.trigger([subject.clone()]);
        coordinator.await_quiescent().await;

        let record = coordinator.record(&subject).unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.store_status, StoreStatus::Error);
        assert!(record.store_error.is_some());
    }

    #[tokio::test]
    async fn test_started_subject_is_not_re_triggered() {
        let (store, coordinator) = setup();
        let subject = SubjectId::new("s10");
        store.grant_role(&subject, Role::Admin);
        store.set_latency(std::time::Duration::from_millis(50));

        let first = coordinator.trigger([subject.clone()]);
        assert_eq!(first.len(), 1);

        // Still in flight: the second trigger is ignored for this subject
        let second = coordinator.trigger([subject.clone()]);
        assert!(second.is_empty());

        coordinator.await_quiescent().await;
        assert_eq!(
            coordinator.record(&subject).unwrap().status,
            SyncStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_completed_subject_can_re_trigger() {
        let (store, coordinator) = setup();
        let subject = SubjectId::new("s11");
        store.grant_role(&subject, Role::Member);

        coordinator.trigger([subject.clone()]);
        coordinator.await_quiescent().await;
        let first = coordinator.record(&subject).unwrap();
        assert_eq!(first.status, SyncStatus::Completed);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let started = coordinator.trigger([subject.clone()]);
        assert_eq!(started.len(), 1);
        coordinator.await_quiescent().await;
        let second = coordinator.record(&subject).unwrap();
        assert_eq!(second.status, SyncStatus::Completed);
        // New cycle, new first-attempt timestamp
        assert!(second.started_at >= first.started_at);
    }

    #[test]
    fn test_declared_transitions_only() {
        use SyncStatus::*;
        let legal = [
            (Idle, Started),
            (Started, Completed),
            (Started, Failed),
            (Failed, Started),
            (Completed, Started),
        ];
        for from in [Idle, Started, Completed, Failed] {
            for to in [Idle, Started, Completed, Failed] {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    proptest! {
        /// Applying any sequence of requested transitions, accepting only
        /// legal ones, never leaves the declared state machine.
        #[test]
        fn prop_transition_sequences_stay_legal(requests in prop::collection::vec(0u8..4, 0..64)) {
            use SyncStatus::*;
            let states = [Idle, Started, Completed, Failed];
            let mut current = Idle;
            for request in requests {
                let next = states[request as usize];
                if current.can_transition_to(next) {
                    // Started is the only state with two successors;
                    // every accepted move matches a declared edge.
                    prop_assert!(matches!(
                        (current, next),
                        (Idle, Started)
                            | (Started, Completed)
                            | (Started, Failed)
                            | (Failed, Started)
                            | (Completed, Started)
                    ));
                    current = next;
                }
            }
        }
    }
}
