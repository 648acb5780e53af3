//! Fixed-precedence role resolution
//!
//! Given a subject, the resolver consults the authority sources strictly in
//! precedence order (admin, then collector, then member) and returns the
//! first match. A later source is never queried once an earlier one matches,
//! so an early match does not pay later queries' cost or inherit their
//! failure modes.

use crate::error::Result;
use crate::store::{bounded_query, sources, AuthorityStore, QueryBounds};
use crate::types::{Role, SubjectId};
use std::sync::Arc;

/// Configuration for role resolution
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    /// Timeout and retry bounds applied to each source query
    pub query_bounds: QueryBounds,
}

/// Pure, ordered role resolver over an [`AuthorityStore`].
///
/// Resolution is read-only and side-effect free. A transient failure on any
/// step surfaces as [`AccessError::AuthorityUnavailable`] — it is never
/// silently treated as "no match", which would let a true admin resolve as a
/// lower role while the admin source is down.
///
/// [`AccessError::AuthorityUnavailable`]: crate::AccessError::AuthorityUnavailable
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use membership_authz::resolver::RoleResolver;
/// use membership_authz::store::MemoryAuthorityStore;
/// use membership_authz::types::{Role, SubjectId};
///
/// # async fn example() -> membership_authz::Result<()> {
/// let store = Arc::new(MemoryAuthorityStore::new());
/// let subject = SubjectId::new("user-1");
/// store.grant_role(&subject, Role::Admin);
///
/// let resolver = RoleResolver::new(store);
/// assert_eq!(resolver.resolve(&subject).await?, Some(Role::Admin));
/// # Ok(())
/// # }
/// ```
pub struct RoleResolver<S> {
    store: Arc<S>,
    config: ResolverConfig,
}

impl<S: AuthorityStore> RoleResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ResolverConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolves the subject's effective role.
    ///
    /// Walks [`Role::PRECEDENCE`] in order, short-circuiting on the first
    /// authority source that matches:
    ///
    /// 1. explicit admin role assignment
    /// 2. collector membership with `active == true`
    /// 3. explicit member role assignment, or failing that an existing
    ///    member record
    ///
    /// Returns `Ok(None)` only when every source answered and none matched.
    ///
    /// # Errors
    ///
    /// Propagates the first source failure after bounded retry; the result
    /// is then undetermined, not a lower role.
    pub async fn resolve(&self, subject: &SubjectId) -> Result<Option<Role>> {
        for role in Role::PRECEDENCE {
            if self.check(subject, role).await? {
                tracing::debug!(subject = %subject, role = %role, "resolved role");
                return Ok(Some(role));
            }
        }

        tracing::debug!(subject = %subject, "no qualifying record in any authority source");
        Ok(None)
    }

    /// Checks one precedence step against its authority source(s).
    async fn check(&self, subject: &SubjectId, role: Role) -> Result<bool> {
        let bounds = &self.config.query_bounds;
        match role {
            Role::Admin => {
                let assignment = bounded_query(sources::ROLE_ASSIGNMENTS, bounds, || {
                    self.store.find_role_assignment(subject, Some(Role::Admin))
                })
                .await?;
                Ok(assignment.is_some())
            }
            Role::Collector => {
                let membership = bounded_query(sources::COLLECTOR_MEMBERSHIPS, bounds, || {
                    self.store.find_active_collector_membership(subject)
                })
                .await?;
                // Inactive records must never elevate, even if a store
                // implementation forgets to filter them.
                Ok(membership.map_or(false, |m| m.active))
            }
            Role::Member => {
                let assignment = bounded_query(sources::ROLE_ASSIGNMENTS, bounds, || {
                    self.store.find_role_assignment(subject, Some(Role::Member))
                })
                .await?;
                if assignment.is_some() {
                    return Ok(true);
                }

                let record = bounded_query(sources::MEMBER_RECORDS, bounds, || {
                    self.store.find_member_record(subject)
                })
                .await?;
                Ok(record.is_some())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::store::MemoryAuthorityStore;
    use crate::types::{CollectorMembership, MemberRecord};

    fn setup() -> (Arc<MemoryAuthorityStore>, RoleResolver<MemoryAuthorityStore>) {
        let store = Arc::new(MemoryAuthorityStore::new());
        let resolver = RoleResolver::new(Arc::clone(&store));
        (store, resolver)
    }

    fn collector(subject: &SubjectId, active: bool) -> CollectorMembership {
        CollectorMembership {
            subject: subject.clone(),
            member_number: "AB123".to_string(),
            name: "J. Smith".to_string(),
            email: Some("j.smith@example.com".to_string()),
            phone: None,
            active,
        }
    }

    fn member(subject: &SubjectId) -> MemberRecord {
        MemberRecord {
            subject: subject.clone(),
            member_number: "AB123".to_string(),
            full_name: "John Smith".to_string(),
        }
    }

    #[tokio::test]
    async fn test_admin_outranks_active_collector() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s1");
        store.grant_role(&subject, Role::Admin);
        store.upsert_collector_membership(collector(&subject, true));

        assert_eq!(resolver.resolve(&subject).await.unwrap(), Some(Role::Admin));
        // Short-circuit: the collector source was never consulted
        assert_eq!(
            store.query_count(crate::store::sources::COLLECTOR_MEMBERSHIPS),
            0
        );
    }

    #[tokio::test]
    async fn test_active_collector_resolves_collector() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s2");
        store.upsert_collector_membership(collector(&subject, true));

        assert_eq!(
            resolver.resolve(&subject).await.unwrap(),
            Some(Role::Collector)
        );
    }

    #[tokio::test]
    async fn test_inactive_collector_never_elevates() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s2b");
        store.upsert_collector_membership(collector(&subject, false));

        assert_eq!(resolver.resolve(&subject).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_member_record_implies_member() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s3");
        store.upsert_member_record(member(&subject));

        assert_eq!(
            resolver.resolve(&subject).await.unwrap(),
            Some(Role::Member)
        );
    }

    #[tokio::test]
    async fn test_explicit_member_assignment_without_record() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s3b");
        store.grant_role(&subject, Role::Member);

        assert_eq!(
            resolver.resolve(&subject).await.unwrap(),
            Some(Role::Member)
        );
        // The member-record source was not needed
        assert_eq!(store.query_count(crate::store::sources::MEMBER_RECORDS), 0);
    }

    #[tokio::test]
    async fn test_no_records_resolves_none() {
        let (_store, resolver) = setup();
        let subject = SubjectId::new("s4");

        assert_eq!(resolver.resolve(&subject).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_source_failure_is_not_a_lower_role() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s5");
        store.grant_role(&subject, Role::Admin);
        // Exhaust the retry budget: default bounds retry once
        store.inject_failures(crate::store::sources::ROLE_ASSIGNMENTS, 2);

        let result = resolver.resolve(&subject).await;
        assert!(matches!(
            result,
            Err(AccessError::AuthorityUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_recovered_by_retry() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s6");
        store.grant_role(&subject, Role::Admin);
        store.inject_failures(crate::store::sources::ROLE_ASSIGNMENTS, 1);

        assert_eq!(resolver.resolve(&subject).await.unwrap(), Some(Role::Admin));
    }

    #[tokio::test]
    async fn test_denial_surfaces_immediately() {
        let (store, resolver) = setup();
        let subject = SubjectId::new("s7");
        store.inject_denial(crate::store::sources::ROLE_ASSIGNMENTS);

        let result = resolver.resolve(&subject).await;
        assert!(matches!(result, Err(AccessError::Unauthorized { .. })));
        assert_eq!(store.query_count(crate::store::sources::ROLE_ASSIGNMENTS), 1);
    }
}
