//! # Membership Authorization Engine (membership-authz)
//!
//! Role resolution and access control for membership services, with support
//! for:
//! - Fixed-precedence resolution across independent authority sources
//!   (explicit role assignments, collector memberships, member records)
//! - TTL-bound caching with single-flight coalescing and
//!   stale-while-revalidate
//! - Identity-lifecycle invalidation (sign-in / sign-out / token refresh)
//! - Asynchronous secondary-store reconciliation with per-subject status
//! - Role gates and tab-permission checks for UI consumers
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use membership_authz::{
//!     CacheConfig, RoleCache, RoleResolver, MemoryAuthorityStore, SubjectId,
//! };
//! use membership_authz::guard::{can_access_tab, Tab};
//!
//! # async fn example() -> membership_authz::Result<()> {
//! let store = Arc::new(MemoryAuthorityStore::new());
//! let resolver = Arc::new(RoleResolver::new(store));
//! let cache = RoleCache::new(resolver, CacheConfig::default());
//!
//! let role = cache.get(&SubjectId::new("user-1")).await?;
//! if can_access_tab(role, Tab::Finance) {
//!     // render the finance tab
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod guard;
pub mod resolver;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;

pub use cache::{CacheConfig, CacheStats, RoleCache};
pub use error::{AccessError, Result};
pub use guard::{can_access_tab, effective_role, is_allowed, RequireMode, RoleGate, Tab};
pub use resolver::{ResolverConfig, RoleResolver};
pub use session::{SessionEvent, SessionProvider};
pub use store::{AuthorityStore, MemoryAuthorityStore, QueryBounds};
pub use sync::{StoreStatus, SyncCoordinator, SyncStatus, SyncStatusRecord};
pub use types::{Role, SubjectId};
