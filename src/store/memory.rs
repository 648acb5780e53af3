//! In-memory authority store
//!
//! Backs the dev profile and the test suite. Keeps the three authority
//! collections plus the denormalized secondary role records in process
//! memory, with per-source query counters, injectable latency, and
//! injectable failures so callers can exercise the transient-fault paths.

use super::sources;
use crate::error::{AccessError, Result};
use crate::types::{
    current_timestamp_ms, CollectorMembership, MemberRecord, Role, RoleAssignment, SubjectId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Thread-safe in-memory [`AuthorityStore`](super::AuthorityStore).
///
/// # Examples
///
/// ```
/// use membership_authz::store::MemoryAuthorityStore;
/// use membership_authz::types::{Role, SubjectId};
///
/// # async fn example() -> membership_authz::Result<()> {
/// use membership_authz::store::AuthorityStore;
///
/// let store = MemoryAuthorityStore::new();
/// let subject = SubjectId::new("user-1");
/// store.grant_role(&subject, Role::Admin);
///
/// let found = store
///     .find_role_assignment(&subject, Some(Role::Admin))
///     .await?;
/// assert!(found.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryAuthorityStore {
    assignments: DashMap<SubjectId, Vec<RoleAssignment>>,
    memberships: DashMap<SubjectId, CollectorMembership>,
    members: DashMap<SubjectId, MemberRecord>,
    secondary: DashMap<SubjectId, Option<Role>>,
    /// Remaining injected transient failures per source
    failures: DashMap<&'static str, u32>,
    /// Sources that answer with an explicit denial
    denials: DashMap<&'static str, ()>,
    counts: DashMap<&'static str, u64>,
    latency_ms: AtomicU64,
}

impl MemoryAuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants an explicit role assignment to a subject.
    pub fn grant_role(&self, subject: &SubjectId, role: Role) {
        let assignment = RoleAssignment {
            subject: subject.clone(),
            role,
            created_at: current_timestamp_ms(),
        };
        self.assignments
            .entry(subject.clone())
            .or_default()
            .push(assignment);
    }

    /// Removes all assignments of `role` for the subject.
    pub fn revoke_role(&self, subject: &SubjectId, role: Role) {
        if let Some(mut list) = self.assignments.get_mut(subject) {
            list.retain(|a| a.role != role);
        }
    }

    pub fn upsert_collector_membership(&self, membership: CollectorMembership) {
        self.memberships
            .insert(membership.subject.clone(), membership);
    }

    pub fn upsert_member_record(&self, record: MemberRecord) {
        self.members.insert(record.subject.clone(), record);
    }

    /// Reads back the denormalized secondary role record, if one has been
    /// written. Outer `None` means no record exists yet.
    pub fn secondary_role(&self, subject: &SubjectId) -> Option<Option<Role>> {
        self.secondary.get(subject).map(|r| *r)
    }

    /// Makes the next `count` queries against `source` fail transiently.
    pub fn inject_failures(&self, source: &'static str, count: u32) {
        self.failures.insert(source, count);
    }

    /// Makes every query against `source` answer with an explicit denial.
    pub fn inject_denial(&self, source: &'static str) {
        self.denials.insert(source, ());
    }

    /// Adds fixed latency to every query. Zero disables.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of queries issued against `source` so far.
    pub fn query_count(&self, source: &'static str) -> u64 {
        self.counts.get(source).map(|c| *c).unwrap_or(0)
    }

    async fn begin(&self, source: &'static str) -> Result<()> {
        *self.counts.entry(source).or_insert(0) += 1;

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.denials.contains_key(source) {
            return Err(AccessError::Unauthorized {
                authority: source,
                reason: "access denied by source policy".to_string(),
            });
        }

        if let Some(mut remaining) = self.failures.get_mut(source) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AccessError::AuthorityUnavailable {
                    authority: source,
                    reason: "injected transient fault".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl super::AuthorityStore for MemoryAuthorityStore {
    async fn find_role_assignment(
        &self,
        subject: &SubjectId,
        role: Option<Role>,
    ) -> Result<Option<RoleAssignment>> {
        self.begin(sources::ROLE_ASSIGNMENTS).await?;
        Ok(self.assignments.get(subject).and_then(|list| {
            list.iter()
                .find(|a| role.map_or(true, |r| a.role == r))
                .cloned()
        }))
    }

    async fn find_active_collector_membership(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<CollectorMembership>> {
        self.begin(sources::COLLECTOR_MEMBERSHIPS).await?;
        Ok(self
            .memberships
            .get(subject)
            .filter(|m| m.active)
            .map(|m| m.clone()))
    }

    async fn find_member_record(&self, subject: &SubjectId) -> Result<Option<MemberRecord>> {
        self.begin(sources::MEMBER_RECORDS).await?;
        Ok(self.members.get(subject).map(|m| m.clone()))
    }

    async fn upsert_secondary_role_record(
        &self,
        subject: &SubjectId,
        role: Option<Role>,
    ) -> Result<()> {
        self.begin(sources::SECONDARY_ROLES).await?;
        self.secondary.insert(subject.clone(), role);
        Ok(())
    }
}
