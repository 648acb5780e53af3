//! Core value types: subjects, roles, and authority-source records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identity handle issued by the session provider.
///
/// A `SubjectId` exists for the lifetime of an authenticated session and is
/// the key for every authority-source lookup.
///
/// # Examples
///
/// ```
/// use membership_authz::types::SubjectId;
///
/// let subject = SubjectId::new("user-42");
/// assert_eq!(subject.as_str(), "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Authorization role held by a subject.
///
/// The role model is a small closed set with a fixed precedence:
/// `Admin > Collector > Member`. A subject with no qualifying record in any
/// authority source resolves to no role at all (`Option<Role>` is `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Collector,
    Member,
}

impl Role {
    /// Fixed resolution precedence, highest rank first.
    ///
    /// Resolution walks this list in order and short-circuits on the first
    /// authority source that matches, so precedence lives here rather than
    /// in conditionals scattered across call sites.
    pub const PRECEDENCE: [Role; 3] = [Role::Admin, Role::Collector, Role::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Collector => "collector",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit, administrator-granted role record.
///
/// Immutable once created except for deletion; a subject may hold zero or
/// more assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub subject: SubjectId,
    pub role: Role,
    /// Epoch milliseconds
    pub created_at: u64,
}

/// Collector-status record linked to a subject.
///
/// Records with `active == false` must never elevate resolution above
/// member/none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorMembership {
    pub subject: SubjectId,
    pub member_number: String,
    /// Display name, e.g. "J. Smith"
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
}

/// Generic member record; existence alone implies baseline member
/// authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub subject: SubjectId,
    pub member_number: String,
    pub full_name: String,
}

/// Returns current timestamp in milliseconds
pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert_eq!(
            Role::PRECEDENCE,
            [Role::Admin, Role::Collector, Role::Member]
        );
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Admin.to_string(), "admin");
        assert_eq!(Role::Collector.to_string(), "collector");
        assert_eq!(Role::Member.to_string(), "member");
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Role::Collector).unwrap();
        assert_eq!(json, "\"collector\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_subject_id() {
        let subject = SubjectId::new("user-1");
        assert_eq!(subject.as_str(), "user-1");
        assert_eq!(format!("{}", subject), "user-1");
        assert_eq!(SubjectId::from("user-1"), subject);
    }
}
