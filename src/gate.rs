//! The single allow/redirect decision point for guarded routes.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, Role, RoleAssignment, SessionSlot, UserType};
use crate::resolver::TenantState;

/// What a page demands: a whole user type, one role, or any of a list of roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredRole {
    UserType(UserType),
    Role(Role),
    AnyOf(Vec<Role>),
}

impl RequiredRole {
    pub fn roles(&self) -> Vec<Role> {
        match self {
            RequiredRole::UserType(user_type) => user_type.roles().to_vec(),
            RequiredRole::Role(role) => vec![*role],
            RequiredRole::AnyOf(roles) => roles.clone(),
        }
    }

    /// User types whose sessions may satisfy this requirement, in declaration order.
    pub fn user_types(&self) -> Vec<UserType> {
        let mut types = Vec::new();
        for role in self.roles() {
            let user_type = role.user_type();
            if !types.contains(&user_type) {
                types.push(user_type);
            }
        }
        types
    }

    pub fn slots(&self) -> Vec<SessionSlot> {
        self.user_types().iter().map(|t| t.slot()).collect()
    }
}

/// How held roles are compared against required roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleMatching {
    /// Plain set membership.
    #[default]
    Exact,
    /// Super admins additionally satisfy branch admin requirements.
    Hierarchical,
}

impl RoleMatching {
    pub fn satisfies(&self, held: Role, required: Role) -> bool {
        match self {
            RoleMatching::Exact => held == required,
            RoleMatching::Hierarchical => held.implies(required),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    pub required_role: RequiredRole,
    #[serde(default = "default_require_auth")]
    pub require_auth: bool,
    /// Where unauthenticated visitors go. Defaults to the login page of the
    /// first required user type.
    #[serde(default)]
    pub redirect_to: Option<String>,
    /// Where signed-in visitors without the right role or tenant go. Defaults
    /// to their own landing page.
    #[serde(default)]
    pub unauthorized_redirect: Option<String>,
    #[serde(default)]
    pub matching: RoleMatching,
}

fn default_require_auth() -> bool {
    true
}

impl GateConfig {
    pub fn new(required_role: RequiredRole) -> Self {
        Self {
            required_role,
            require_auth: true,
            redirect_to: None,
            unauthorized_redirect: None,
            matching: RoleMatching::Exact,
        }
    }

    pub fn redirect_to(&self) -> String {
        if let Some(path) = &self.redirect_to {
            return path.clone();
        }
        self.required_role
            .user_types()
            .first()
            .map(|t| t.default_login_path())
            .unwrap_or("/login")
            .to_string()
    }
}

/// Default landing path per identity kind. `{tenant}` is replaced by the
/// identity's organization slug.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LandingPaths {
    pub super_admin: String,
    pub system_admin: String,
    pub branch_admin: String,
    pub carer: String,
    pub client: String,
}

impl Default for LandingPaths {
    fn default() -> Self {
        Self {
            super_admin: "/{tenant}/admin/dashboard".to_string(),
            system_admin: "/system-dashboard".to_string(),
            branch_admin: "/{tenant}/admin/dashboard".to_string(),
            carer: "/{tenant}/carer/dashboard".to_string(),
            client: "/{tenant}/client/dashboard".to_string(),
        }
    }
}

impl LandingPaths {
    pub fn template(&self, role: Role) -> &str {
        match role {
            Role::SuperAdmin => &self.super_admin,
            Role::SystemAdmin => &self.system_admin,
            Role::BranchAdmin => &self.branch_admin,
            Role::Carer => &self.carer,
            Role::Client => &self.client,
        }
    }

    /// Landing path for `identity`, or `None` when it needs a tenant the
    /// identity does not carry.
    pub fn for_identity(&self, identity: &Identity) -> Option<String> {
        let template = self.template(identity.kind);
        if !template.contains("{tenant}") {
            return Some(template.to_string());
        }
        identity
            .organization_slug
            .as_deref()
            .map(|slug| template.replace("{tenant}", slug))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    Pending,
    Ready(T),
}

impl<T> Resolution<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleLookup<'a> {
    Pending,
    Ready(&'a [RoleAssignment]),
    Failed,
}

/// Everything the gate reads. `tenant` is `None` for routes that are not
/// tenant-scoped.
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub requested_path: &'a str,
    pub session: Resolution<Option<&'a Identity>>,
    pub roles: RoleLookup<'a>,
    pub tenant: Option<&'a TenantState>,
}

impl GateInputs<'_> {
    pub fn is_loading(&self) -> bool {
        self.session.is_pending()
            || matches!(self.roles, RoleLookup::Pending)
            || self.tenant.is_some_and(|t| t.is_loading())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Unauthenticated,
    Unauthorized,
    WrongTenant,
    RoleLookupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Allow,
    Redirect { location: String, reason: DenyReason },
}

/// Decide whether the navigation may proceed. Never allows while any input
/// is still resolving.
pub fn decide(gate: &GateConfig, inputs: &GateInputs<'_>, landing: &LandingPaths) -> Decision {
    if inputs.is_loading() {
        return Decision::Pending;
    }
    if !gate.require_auth {
        return Decision::Allow;
    }

    let identity = match inputs.session {
        Resolution::Ready(Some(identity)) => identity,
        _ => return deny(gate, inputs, None, DenyReason::Unauthenticated, gate.redirect_to()),
    };

    // A session of another kind does not count on this route.
    if !gate
        .required_role
        .user_types()
        .contains(&identity.kind.user_type())
    {
        return deny(
            gate,
            inputs,
            Some(identity),
            DenyReason::Unauthenticated,
            gate.redirect_to(),
        );
    }

    let assignments = match inputs.roles {
        RoleLookup::Ready(assignments) => assignments,
        _ => {
            return deny(
                gate,
                inputs,
                Some(identity),
                DenyReason::RoleLookupFailed,
                gate.redirect_to(),
            )
        }
    };

    // Rows only count inside the organization being visited, or the
    // session's own organization on routes without a tenant.
    let scope = inputs
        .tenant
        .and_then(|t| t.organization())
        .map(|o| o.id.as_str())
        .or(identity.organization_id.as_deref());
    let held = std::iter::once(identity.kind).chain(
        assignments
            .iter()
            .filter(|a| a.user_id == identity.id && a.applies_in(scope))
            .map(|a| a.role),
    );
    let required = gate.required_role.roles();
    let role_ok = held
        .into_iter()
        .any(|h| required.iter().any(|r| gate.matching.satisfies(h, *r)));
    if !role_ok {
        let target = unauthorized_target(gate, inputs, identity, landing);
        return deny(gate, inputs, Some(identity), DenyReason::Unauthorized, target);
    }

    if let Some(tenant) = inputs.tenant {
        let same_tenant = match (tenant.organization(), identity.organization_id.as_deref()) {
            (Some(organization), Some(org_id)) => organization.id == org_id,
            _ => false,
        };
        if !same_tenant {
            let target = unauthorized_target(gate, inputs, identity, landing);
            return deny(gate, inputs, Some(identity), DenyReason::WrongTenant, target);
        }
    }

    Decision::Allow
}

fn unauthorized_target(
    gate: &GateConfig,
    inputs: &GateInputs<'_>,
    identity: &Identity,
    landing: &LandingPaths,
) -> String {
    let candidate = match &gate.unauthorized_redirect {
        Some(template) if template.contains("{tenant}") => identity
            .organization_slug
            .as_deref()
            .map(|slug| template.replace("{tenant}", slug)),
        Some(path) => Some(path.clone()),
        None => landing.for_identity(identity),
    };
    match candidate {
        Some(path) if path != inputs.requested_path => path,
        _ => gate.redirect_to(),
    }
}

fn deny(
    gate: &GateConfig,
    inputs: &GateInputs<'_>,
    identity: Option<&Identity>,
    reason: DenyReason,
    location: String,
) -> Decision {
    tracing::info!(
        path = %inputs.requested_path,
        required = ?gate.required_role,
        has_identity = identity.is_some(),
        role = ?identity.map(|i| i.kind),
        reason = ?reason,
        target = %location,
        "Gate redirect"
    );
    Decision::Redirect { location, reason }
}
