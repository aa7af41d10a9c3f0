//! Identity record returned by the "who am I" endpoint.

use serde::{Deserialize, Serialize};

use super::id::UserId;
use super::role::{Permission, Role};

/// The authenticated user as reported by the API.
///
/// Every field is optional on the wire; a missing `roles` array is treated as
/// "no roles".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl User {
    /// Returns true if the user holds any of `roles`.
    #[must_use]
    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.roles.contains(role))
    }

    /// Returns true if any of the user's roles grants `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.roles.iter().any(|role| role.grants(permission))
    }

    /// Best human-readable label: name, then email, then id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .or_else(|| self.id.as_ref().map(UserId::as_str))
            .unwrap_or("unknown user")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial_record() {
        let user: User = serde_json::from_str(r#"{"id":"1","roles":["USER"]}"#).unwrap();
        assert_eq!(user.id, Some(UserId::new("1")));
        assert_eq!(user.roles, vec![Role::User]);
        assert!(user.name.is_none());
    }

    #[test]
    fn test_missing_roles_means_no_permissions() {
        let user: User = serde_json::from_str(r#"{"email":"a@b.com"}"#).unwrap();
        assert!(user.roles.is_empty());
        assert!(!user.has_permission(Permission::Dashboard));
        assert_eq!(user.display_name(), "a@b.com");
    }

    #[test]
    fn test_has_role_matches_any() {
        let user = User {
            roles: vec![Role::Manager],
            ..User::default()
        };
        assert!(user.has_role(&[Role::User, Role::Manager]));
        assert!(!user.has_role(&[Role::Administrator]));
        assert!(user.has_permission(Permission::Reports));
    }
}
