//! Identity kinds, roles and the session slots they live in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A role row as stored by the backend (`user_roles.role`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    SystemAdmin,
    BranchAdmin,
    Carer,
    Client,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::SuperAdmin,
        Role::SystemAdmin,
        Role::BranchAdmin,
        Role::Carer,
        Role::Client,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::SystemAdmin => "system_admin",
            Role::BranchAdmin => "branch_admin",
            Role::Carer => "carer",
            Role::Client => "client",
        }
    }

    pub fn user_type(&self) -> UserType {
        match self {
            Role::SuperAdmin | Role::BranchAdmin => UserType::Admin,
            Role::SystemAdmin => UserType::System,
            Role::Carer => UserType::Carer,
            Role::Client => UserType::Client,
        }
    }

    /// The only implied relation: a super admin can stand in for a branch admin.
    pub fn implies(&self, other: Role) -> bool {
        *self == other || (*self == Role::SuperAdmin && other == Role::BranchAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `userType` a page declares. Each user type signs in through its own
/// entry point and keeps its own session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Admin,
    System,
    Carer,
    Client,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::System => "system",
            UserType::Carer => "carer",
            UserType::Client => "client",
        }
    }

    pub fn roles(&self) -> &'static [Role] {
        match self {
            UserType::Admin => &[Role::SuperAdmin, Role::BranchAdmin],
            UserType::System => &[Role::SystemAdmin],
            UserType::Carer => &[Role::Carer],
            UserType::Client => &[Role::Client],
        }
    }

    pub fn slot(&self) -> SessionSlot {
        match self {
            UserType::Admin => SessionSlot::Admin,
            UserType::System => SessionSlot::System,
            UserType::Carer => SessionSlot::Carer,
            UserType::Client => SessionSlot::Client,
        }
    }

    pub fn default_login_path(&self) -> &'static str {
        match self {
            UserType::Admin => "/login",
            UserType::System => "/system-login",
            UserType::Carer => "/carer-login",
            UserType::Client => "/client-login",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent session storage per user type. A carer session and an admin
/// session can coexist in one browser without seeing each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSlot {
    Admin,
    System,
    Carer,
    Client,
}

impl SessionSlot {
    pub fn default_cookie_name(&self) -> &'static str {
        match self {
            SessionSlot::Admin => "ic_admin_session",
            SessionSlot::System => "system_session_token",
            SessionSlot::Carer => "ic_carer_session",
            SessionSlot::Client => "ic_client_session",
        }
    }
}

/// The authenticated actor behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub kind: Role,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub organization_slug: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,
}

/// One row of `user_roles`. A user may hold several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,
}

impl RoleAssignment {
    /// Whether the row grants its role inside `organization_id`. Rows without
    /// an organization apply everywhere.
    pub fn applies_in(&self, organization_id: Option<&str>) -> bool {
        match self.organization_id.as_deref() {
            None => true,
            Some(own) => organization_id == Some(own),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        let role: Role = serde_json::from_str("\"branch_admin\"").unwrap();
        assert_eq!(role, Role::BranchAdmin);
        assert_eq!(serde_json::to_string(&Role::SuperAdmin).unwrap(), "\"super_admin\"");
    }

    #[test]
    fn test_every_role_belongs_to_its_user_type() {
        for role in Role::ALL {
            assert!(role.user_type().roles().contains(&role));
        }
    }

    #[test]
    fn test_assignment_scope() {
        let row = RoleAssignment {
            user_id: "u1".to_string(),
            role: Role::BranchAdmin,
            organization_id: Some("org_1".to_string()),
            branch_id: None,
        };
        assert!(row.applies_in(Some("org_1")));
        assert!(!row.applies_in(Some("org_2")));
        assert!(!row.applies_in(None));

        let global = RoleAssignment { organization_id: None, ..row };
        assert!(global.applies_in(Some("org_2")));
        assert!(global.applies_in(None));
    }

    #[test]
    fn test_implies_is_one_directional() {
        assert!(Role::SuperAdmin.implies(Role::BranchAdmin));
        assert!(!Role::BranchAdmin.implies(Role::SuperAdmin));
        assert!(!Role::SystemAdmin.implies(Role::SuperAdmin));
        assert!(Role::Carer.implies(Role::Carer));
    }
}
