//! Authority-source boundary
//!
//! The three read collections (role assignments, collector memberships,
//! member records) plus the secondary-store write used by reconciliation are
//! modelled as one async trait. Each collection is individually consistent
//! but the collections are not transactionally joined; every query is an
//! independent remote call that can fail on its own.

use crate::error::{AccessError, Result};
use crate::types::{CollectorMembership, MemberRecord, Role, RoleAssignment, SubjectId};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryAuthorityStore;

/// Source names used in errors, logs, and fault injection. These mirror the
/// backing collections in the remote data platform.
pub mod sources {
    pub const ROLE_ASSIGNMENTS: &str = "user_roles";
    pub const COLLECTOR_MEMBERSHIPS: &str = "members_collectors";
    pub const MEMBER_RECORDS: &str = "members";
    pub const SECONDARY_ROLES: &str = "sync_roles";
}

/// Remote store exposing the independent authority-source collections.
///
/// Read methods return `Ok(None)` for "queried and no match" — that is a
/// successful answer, distinct from a query failure. Implementations map
/// transport failures to [`AccessError::AuthorityUnavailable`] and explicit
/// denials to [`AccessError::Unauthorized`].
#[async_trait]
pub trait AuthorityStore: Send + Sync {
    /// Finds an explicit role assignment for the subject, optionally
    /// filtered to a specific role.
    async fn find_role_assignment(
        &self,
        subject: &SubjectId,
        role: Option<Role>,
    ) -> Result<Option<RoleAssignment>>;

    /// Finds a collector-membership record with `active == true`.
    async fn find_active_collector_membership(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<CollectorMembership>>;

    /// Finds a generic member record for the subject.
    async fn find_member_record(&self, subject: &SubjectId) -> Result<Option<MemberRecord>>;

    /// Writes the denormalized secondary role representation for a subject.
    /// Used only by the sync coordinator.
    async fn upsert_secondary_role_record(
        &self,
        subject: &SubjectId,
        role: Option<Role>,
    ) -> Result<()>;
}

/// Bounds applied to each individual authority-source query.
#[derive(Debug, Clone)]
pub struct QueryBounds {
    /// Maximum wait before a query converts to `AuthorityUnavailable`
    pub timeout: Duration,

    /// Additional attempts after the first, for transient failures only
    pub retries: u32,
}

impl Default for QueryBounds {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 1,
        }
    }
}

/// Runs one authority-source query with a bounded wait and bounded retry.
///
/// Timeouts convert to [`AccessError::AuthorityUnavailable`] rather than
/// hanging the caller. Only `AuthorityUnavailable` is retried — an explicit
/// [`AccessError::Unauthorized`] surfaces immediately. Retries are safe here
/// because every read is idempotent.
pub(crate) async fn bounded_query<T, F, Fut>(
    source: &'static str,
    bounds: &QueryBounds,
    mut query: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(bounds.timeout, query()).await {
            Ok(result) => result,
            Err(_) => Err(AccessError::AuthorityUnavailable {
                authority: source,
                reason: format!("timed out after {:?}", bounds.timeout),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(AccessError::AuthorityUnavailable { reason, .. }) if attempt < bounds.retries => {
                attempt += 1;
                tracing::debug!(source, attempt, %reason, "retrying authority query");
            }
            Err(err) => return Err(err),
        }
    }
}
