//! Role-based gating for routes, tabs, and UI regions
//!
//! Pure decision functions: nothing here navigates or renders. Consumers
//! redirect or swap in the fallback themselves, which keeps every check
//! independently testable.

use crate::error::Result;
use crate::types::Role;
use serde::{Deserialize, Serialize};

/// How a required-role set is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequireMode {
    /// The resolved role must be a member of the required set
    Any,
    /// The resolved role must equal every element of the required set.
    /// A subject carries a single primary role, so a multi-element `All`
    /// requirement is never satisfiable; that is the documented contract,
    /// not a bug.
    All,
}

/// Checks a resolved role against a required set.
///
/// An empty required set grants access unconditionally. No role (`None`)
/// satisfies nothing but the empty set.
///
/// # Examples
///
/// ```
/// use membership_authz::guard::{is_allowed, RequireMode};
/// use membership_authz::types::Role;
///
/// assert!(is_allowed(Some(Role::Admin), &[], RequireMode::Any));
/// assert!(is_allowed(
///     Some(Role::Collector),
///     &[Role::Admin, Role::Collector],
///     RequireMode::Any
/// ));
/// assert!(!is_allowed(None, &[Role::Member], RequireMode::Any));
/// ```
pub fn is_allowed(resolved: Option<Role>, required: &[Role], mode: RequireMode) -> bool {
    if required.is_empty() {
        return true;
    }
    let Some(role) = resolved else {
        return false;
    };
    match mode {
        RequireMode::Any => required.contains(&role),
        RequireMode::All => required.iter().all(|r| *r == role),
    }
}

/// Navigation tab in the member-facing application shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    Dashboard,
    Users,
    Collectors,
    Registrations,
    Database,
    Finance,
    Support,
    Profile,
}

/// Fixed tab-permission table keyed by resolved role.
///
/// Admins see every tab, collectors see dashboard and users, members see
/// only the dashboard, and an unresolved or absent role sees nothing.
pub fn can_access_tab(resolved: Option<Role>, tab: Tab) -> bool {
    match resolved {
        Some(Role::Admin) => true,
        Some(Role::Collector) => matches!(tab, Tab::Dashboard | Tab::Users),
        Some(Role::Member) => matches!(tab, Tab::Dashboard),
        None => false,
    }
}

/// Collapses a resolution outcome to the role used for gating.
///
/// An undetermined role (resolver failure) gates exactly like no role —
/// fail closed. Callers keep the error itself for user messaging, where
/// a transient fault and a confirmed lack of access read differently.
pub fn effective_role(resolution: &Result<Option<Role>>) -> Option<Role> {
    match resolution {
        Ok(role) => *role,
        Err(_) => None,
    }
}

/// Declarative gate mirroring the conditional-render wrapper in the UI:
/// a set of allowed roles, an any/all flag, and a caller-supplied fallback.
#[derive(Debug, Clone, Default)]
pub struct RoleGate {
    allowed_roles: Vec<Role>,
    require_all: bool,
}

impl RoleGate {
    /// Gate on the given roles with any-of semantics.
    pub fn new(allowed_roles: impl Into<Vec<Role>>) -> Self {
        Self {
            allowed_roles: allowed_roles.into(),
            require_all: false,
        }
    }

    /// Switches to all-of semantics.
    pub fn require_all(mut self, require_all: bool) -> Self {
        self.require_all = require_all;
        self
    }

    pub fn check(&self, resolved: Option<Role>) -> bool {
        let mode = if self.require_all {
            RequireMode::All
        } else {
            RequireMode::Any
        };
        is_allowed(resolved, &self.allowed_roles, mode)
    }

    /// Returns `content` when the gate passes, the fallback otherwise.
    pub fn select<T>(&self, resolved: Option<Role>, content: T, fallback: T) -> T {
        if self.check(resolved) {
            content
        } else {
            fallback
        }
    }
}
