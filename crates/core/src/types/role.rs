//! Roles and the permissions they grant.

use serde::{Deserialize, Serialize};

/// Role assigned to a dashboard user by the API.
///
/// Unknown role names are kept as [`Role::Other`] so a role added on the
/// server never breaks deserialization of the user record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Regular dashboard user.
    User,
    /// Manager with access to reports.
    Manager,
    /// Full administrative access.
    Administrator,
    /// A role this client does not know about.
    Other(String),
}

impl Role {
    /// Permissions granted by this role.
    #[must_use]
    pub const fn permissions(&self) -> &'static [Permission] {
        match self {
            Self::User => &[
                Permission::Dashboard,
                Permission::Products,
                Permission::Payments,
                Permission::Users,
                Permission::Orders,
            ],
            Self::Manager | Self::Administrator => &[
                Permission::Dashboard,
                Permission::Products,
                Permission::Payments,
                Permission::Users,
                Permission::Orders,
                Permission::Reports,
            ],
            Self::Other(_) => &[],
        }
    }

    /// Whether this role grants `permission`.
    #[must_use]
    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "USER",
            Self::Manager => "MANAGER",
            Self::Administrator => "ADMINISTRATOR",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        match name.as_str() {
            "USER" => Self::User,
            "MANAGER" => Self::Manager,
            "ADMINISTRATOR" => Self::Administrator,
            _ => Self::Other(name),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

/// Feature area a user may be allowed to access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Dashboard,
    Products,
    Orders,
    Users,
    Payments,
    Reports,
}

impl Permission {
    /// Every permission, in menu order.
    pub const ALL: [Self; 6] = [
        Self::Dashboard,
        Self::Products,
        Self::Orders,
        Self::Users,
        Self::Payments,
        Self::Reports,
    ];
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dashboard => write!(f, "DASHBOARD"),
            Self::Products => write!(f, "PRODUCTS"),
            Self::Orders => write!(f, "ORDERS"),
            Self::Users => write!(f, "USERS"),
            Self::Payments => write!(f, "PAYMENTS"),
            Self::Reports => write!(f, "REPORTS"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DASHBOARD" => Ok(Self::Dashboard),
            "PRODUCTS" => Ok(Self::Products),
            "ORDERS" => Ok(Self::Orders),
            "USERS" => Ok(Self::Users),
            "PAYMENTS" => Ok(Self::Payments),
            "REPORTS" => Ok(Self::Reports),
            _ => Err(format!("invalid permission: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_cannot_see_reports() {
        assert!(Role::User.grants(Permission::Orders));
        assert!(!Role::User.grants(Permission::Reports));
    }

    #[test]
    fn test_manager_and_administrator_have_everything() {
        for role in [Role::Manager, Role::Administrator] {
            assert!(role.grants(Permission::Reports));
            assert_eq!(role.permissions().len(), 6);
        }
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        let roles: Vec<Role> = serde_json::from_str(r#"["USER","AUDITOR"]"#).unwrap();
        assert_eq!(roles, vec![Role::User, Role::Other("AUDITOR".to_owned())]);
        assert!(roles[1].permissions().is_empty());
        assert_eq!(
            serde_json::to_string(&roles).unwrap(),
            r#"["USER","AUDITOR"]"#
        );
    }

    #[test]
    fn test_permission_from_str() {
        assert_eq!("reports".parse::<Permission>().unwrap(), Permission::Reports);
        assert!("billing".parse::<Permission>().is_err());
    }
}
