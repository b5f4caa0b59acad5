//! Route composition: ties tenant resolution, session resolution and the gate
//! together for one navigation and decides what the browser gets back.

use axum::http::header::HOST;
use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::directory::Organization;
use crate::gate::{
    self, Decision, DenyReason, GateConfig, GateInputs, LandingPaths, RequiredRole, Resolution,
    RoleLookup,
};
use crate::identity::{Identity, RoleAssignment, SessionSlot, UserType};
use crate::resolver::{SessionResolver, TenantResolver, TenantState};
use crate::route_matcher::{match_path, match_route, substitute};
use crate::GatewayState;

/// Number of tenants offered by the development switcher.
const SWITCHER_LIMIT: usize = 20;

/// The route rule a path falls under, with its tenant and gate resolved.
#[derive(Debug, Clone)]
pub struct RoutePlan<'a> {
    pub path: String,
    pub tenant_slug: Option<String>,
    pub gate: Option<&'a GateConfig>,
}

impl RoutePlan<'_> {
    pub fn is_public(&self) -> bool {
        self.tenant_slug.is_none() && self.gate.is_none()
    }
}

pub fn plan_route<'a>(config: &'a GatewayConfig, method: &str, path: &str) -> RoutePlan<'a> {
    let Some((rule, params)) = match_route(&config.routes, path, method) else {
        return RoutePlan {
            path: path.to_string(),
            tenant_slug: None,
            gate: None,
        };
    };
    RoutePlan {
        path: path.to_string(),
        tenant_slug: rule
            .tenant
            .as_ref()
            .and_then(|param| params.get(param).cloned()),
        gate: rule.gate.as_ref().and_then(|name| config.gates.get(name)),
    }
}

/// Computed per navigation. Exposed to the single-page app through
/// `/auth/context` so it can show its own loading state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteContext {
    pub tenant_slug: Option<String>,
    pub required_role: Option<RequiredRole>,
    pub is_loading: bool,
    pub is_authorized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// No tenant and no gate: pass through untouched.
    Public,
    Loading,
    TenantNotFound {
        slug: String,
        message: String,
        show_switcher: bool,
    },
    Redirect {
        location: String,
        reason: DenyReason,
    },
    Render,
}

/// Pure composition of an already-resolved navigation. Tenant problems take
/// precedence over the gate so a bad slug never bounces to a login page.
pub fn compose(
    plan: &RoutePlan<'_>,
    tenant: &TenantState,
    decision: Option<&Decision>,
    dev_host: bool,
) -> RouteOutcome {
    if plan.is_public() {
        return RouteOutcome::Public;
    }
    if plan.tenant_slug.is_some() {
        match tenant {
            TenantState::Resolving { .. } | TenantState::Idle => return RouteOutcome::Loading,
            TenantState::NotFound { slug, message } | TenantState::Error { slug, message } => {
                return RouteOutcome::TenantNotFound {
                    slug: slug.clone(),
                    message: message.clone(),
                    show_switcher: dev_host,
                }
            }
            TenantState::Resolved { .. } => {}
        }
    }
    match decision {
        None | Some(Decision::Allow) => RouteOutcome::Render,
        Some(Decision::Pending) => RouteOutcome::Loading,
        Some(Decision::Redirect { location, reason }) => RouteOutcome::Redirect {
            location: location.clone(),
            reason: *reason,
        },
    }
}

#[derive(Debug, Clone)]
pub struct Navigation {
    pub context: RouteContext,
    pub outcome: RouteOutcome,
    pub identity: Option<Arc<Identity>>,
    pub organization: Option<Arc<Organization>>,
    /// Known tenants, filled only when the switcher is shown.
    pub switcher: Vec<Organization>,
}

/// Resolve everything a navigation to `path` depends on and compose the
/// outcome. Tenant and session resolution run concurrently.
pub async fn navigate(
    state: &GatewayState,
    method: &str,
    path: &str,
    headers: &HeaderMap,
) -> Navigation {
    let plan = plan_route(&state.config, method, path);
    if plan.is_public() {
        return Navigation {
            context: RouteContext {
                tenant_slug: None,
                required_role: None,
                is_loading: false,
                is_authorized: true,
            },
            outcome: RouteOutcome::Public,
            identity: None,
            organization: None,
            switcher: Vec::new(),
        };
    }

    let timeout = state.config.resolution.timeout();
    let tenant = TenantResolver::new(Arc::clone(&state.organizations), timeout);
    tenant.set_slug(plan.tenant_slug.as_deref());

    let slots = plan
        .gate
        .map(|g| g.required_role.slots())
        .unwrap_or_default();

    let (tenant_state, candidates) = tokio::join!(
        tenant.settled(),
        resolve_identities(state, headers, &slots),
    );

    let (identity, decision) = match plan.gate {
        Some(gate_config) => {
            let scoped = plan.tenant_slug.as_ref().map(|_| &tenant_state);
            let (identity, decision) =
                decide_among(gate_config, path, scoped, candidates, &state.config.landing);
            (identity, Some(decision))
        }
        None => (None, None),
    };

    let dev_host = is_dev_host(headers, &state.config.server.dev_hosts);
    let outcome = compose(&plan, &tenant_state, decision.as_ref(), dev_host);

    let switcher = match &outcome {
        RouteOutcome::TenantNotFound { show_switcher: true, .. } => known_tenants(state).await,
        _ => Vec::new(),
    };

    Navigation {
        context: RouteContext {
            tenant_slug: plan.tenant_slug.clone(),
            required_role: plan.gate.map(|g| g.required_role.clone()),
            is_loading: outcome == RouteOutcome::Loading,
            is_authorized: outcome == RouteOutcome::Render,
        },
        organization: tenant_state.organization().cloned(),
        identity,
        outcome,
        switcher,
    }
}

enum RoleRows {
    Loaded(Vec<RoleAssignment>),
    Failed,
}

/// Every authenticated session among `slots`, in slot order, with its role
/// rows.
async fn resolve_identities(
    state: &GatewayState,
    headers: &HeaderMap,
    slots: &[SessionSlot],
) -> Vec<(Arc<Identity>, RoleRows)> {
    let timeout = state.config.resolution.timeout();
    let mut candidates = Vec::new();
    for slot in slots {
        let resolver = SessionResolver::new(*slot);
        let load = async {
            let record = state
                .session_manager
                .load(headers, *slot, state.auth_provider.as_ref())
                .await?;
            Ok(record.map(|r| r.identity))
        };
        let Some(identity) = resolver.resolve(load, timeout).await.identity else {
            continue;
        };

        let rows = match tokio::time::timeout(timeout, state.roles.roles_for(&identity.id)).await {
            Ok(Ok(rows)) => RoleRows::Loaded(rows),
            Ok(Err(e)) => {
                tracing::warn!("Role lookup failed for user {}: {}", identity.id, e);
                RoleRows::Failed
            }
            Err(_) => {
                tracing::warn!("Role lookup timed out for user {}", identity.id);
                RoleRows::Failed
            }
        };
        candidates.push((identity, rows));
    }
    candidates
}

/// Run the gate for each signed-in session. The first one the gate allows
/// wins; otherwise the first session's denial stands.
fn decide_among(
    gate_config: &GateConfig,
    path: &str,
    tenant: Option<&TenantState>,
    candidates: Vec<(Arc<Identity>, RoleRows)>,
    landing: &LandingPaths,
) -> (Option<Arc<Identity>>, Decision) {
    let mut denied: Option<(Arc<Identity>, Decision)> = None;
    for (identity, rows) in candidates {
        let roles = match &rows {
            RoleRows::Loaded(rows) => RoleLookup::Ready(rows.as_slice()),
            RoleRows::Failed => RoleLookup::Failed,
        };
        let inputs = GateInputs {
            requested_path: path,
            session: Resolution::Ready(Some(identity.as_ref())),
            roles,
            tenant,
        };
        let decision = gate::decide(gate_config, &inputs, landing);
        if decision == Decision::Allow {
            return (Some(identity), decision);
        }
        if denied.is_none() {
            denied = Some((identity, decision));
        }
    }

    match denied {
        Some((identity, decision)) => (Some(identity), decision),
        None => {
            let inputs = GateInputs {
                requested_path: path,
                session: Resolution::Ready(None),
                roles: RoleLookup::Ready(&[]),
                tenant,
            };
            (None, gate::decide(gate_config, &inputs, landing))
        }
    }
}

async fn known_tenants(state: &GatewayState) -> Vec<Organization> {
    let timeout = state.config.resolution.timeout();
    match tokio::time::timeout(timeout, state.organizations.list(SWITCHER_LIMIT)).await {
        Ok(Ok(tenants)) => tenants,
        Ok(Err(e)) => {
            tracing::warn!("Tenant listing failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("Tenant listing timed out");
            Vec::new()
        }
    }
}

/// Whether the request's `Host` is a development host. Ports are ignored
/// and any `*.localhost` name counts.
pub fn is_dev_host(headers: &HeaderMap, dev_hosts: &[String]) -> bool {
    let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    name.ends_with(".localhost") || dev_hosts.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Target of a configured legacy redirect for `path`, if one applies.
/// `{tenant}` comes from the admin session; without one the visitor is sent
/// to the admin login.
pub async fn legacy_redirect(
    state: &GatewayState,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Option<String> {
    let (shim, params) = state
        .config
        .redirects
        .iter()
        .find_map(|shim| match_path(&shim.from, path).map(|params| (shim, params)))?;

    let mut vars = HashMap::new();
    let admin = if shim.to.contains("{tenant}") {
        state
            .session_manager
            .load(headers, SessionSlot::Admin, state.auth_provider.as_ref())
            .await
            .ok()
            .flatten()
    } else {
        None
    };
    if let Some(slug) = admin
        .as_ref()
        .and_then(|record| record.identity.organization_slug.as_deref())
    {
        vars.insert("tenant", slug);
    }

    let target = match substitute(&shim.to, &params, &vars) {
        Some(target) => target,
        None => {
            tracing::debug!("Legacy path {} needs an admin session", path);
            return Some(UserType::Admin.default_login_path().to_string());
        }
    };
    Some(match query {
        Some(q) if !q.is_empty() => format!("{}?{}", target, q),
        _ => target,
    })
}
