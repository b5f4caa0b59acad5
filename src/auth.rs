use axum::body::Body;
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::LoginEntry;
use crate::directory::Organization;
use crate::error::AuthError;
use crate::identity::{Identity, Role, RoleAssignment, UserType};
use crate::navigation::{navigate, plan_route, RouteContext, RouteOutcome};
use crate::session::SessionRecord;
use crate::GatewayState;

/// Form posted to a login entry point.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Where to go after a successful sign-in. Only local paths are honoured.
    #[serde(default)]
    pub redirect: Option<String>,
}

/// Query params for /auth/logout
#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub redirect: Option<String>,
}

/// Query params for /auth/session
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub user_type: Option<UserType>,
}

/// Query params for /auth/context
#[derive(Debug, Default, Deserialize)]
pub struct ContextQuery {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextResponse {
    #[serde(flatten)]
    context: RouteContext,
    redirect_to: Option<String>,
    organization: Option<Organization>,
}

// ============================================================================
// LOGIN
// ============================================================================

/// Handle POST on a login entry point.
///
/// Exchanges the credentials, creates the session for the entry point's user
/// type and sends the browser on with a 303. Any failure goes back to the
/// entry point with an `error` code.
pub async fn handle_login(
    state: &GatewayState,
    entry: &LoginEntry,
    headers: &HeaderMap,
    body: &[u8],
) -> Response<Body> {
    let form: LoginForm = match serde_urlencoded::from_bytes(body) {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!("Malformed login form on {}: {}", entry.path, e);
            return login_failed(entry, "invalid_request");
        }
    };

    let redirect = form.redirect.as_deref().and_then(safe_local_path);
    let tenant = redirect.and_then(|path| plan_route(&state.config, "GET", path).tenant_slug);

    let record = match authenticate(state, entry, &form.email, &form.password, tenant.as_deref()).await {
        Ok(record) => record,
        Err(e) => {
            tracing::info!("Sign-in on {} rejected: {}", entry.path, e);
            return login_failed(entry, e.code());
        }
    };

    // One session per slot: signing in replaces whatever was there.
    let slot = record.slot;
    if let Some(previous) = state.session_manager.extract_session_id(headers, slot) {
        state.session_manager.destroy_session(&previous).await;
    }

    let location = redirect
        .map(str::to_string)
        .or_else(|| state.config.landing.for_identity(&record.identity))
        .unwrap_or_else(|| "/".to_string());

    tracing::info!(
        "{} signed in as {} via {}",
        record.identity.id,
        record.identity.kind,
        entry.path
    );

    let cookie = match state.session_manager.create_session(record).await {
        Ok(cookie) => cookie,
        Err(e) => {
            tracing::error!("Session create failed: {}", e);
            return login_failed(entry, "unavailable");
        }
    };

    (
        StatusCode::SEE_OTHER,
        [(LOCATION, location), (SET_COOKIE, cookie)],
    )
        .into_response()
}

/// Exchange credentials and build the session record for `entry`.
///
/// The identity kind is the first role in the entry point's accepted list
/// that the user actually holds. When the sign-in is headed for a tenant,
/// roles held in that organization are preferred.
pub async fn authenticate(
    state: &GatewayState,
    entry: &LoginEntry,
    email: &str,
    password: &str,
    tenant_slug: Option<&str>,
) -> Result<SessionRecord, AuthError> {
    let tokens = state.auth_provider.sign_in(email, password).await?;
    if let Some(verifier) = &state.token_verifier {
        verifier.verify(&tokens.access_token, &tokens.user.id)?;
    }

    // Role changes take effect at the next sign-in.
    state.roles.invalidate(&tokens.user.id).await;
    let rows = state.roles.roles_for(&tokens.user.id).await?;
    let preferred = match tenant_slug {
        Some(slug) => state
            .organizations
            .find_by_slug(slug)
            .await?
            .map(|organization| organization.id),
        None => None,
    };
    let chosen = choose_assignment(
        entry.accepted_roles(),
        &tokens.user.id,
        &rows,
        preferred.as_deref(),
    );

    let Some(assignment) = chosen else {
        if let Err(e) = state.auth_provider.sign_out(&tokens.access_token).await {
            tracing::warn!("Revoking rejected sign-in failed: {}", e);
        }
        return Err(AuthError::RoleNotPermitted);
    };

    let organization_slug = match (&assignment.organization_id, assignment.role) {
        (_, Role::SystemAdmin) | (None, _) => None,
        (Some(org_id), _) => state
            .organizations
            .find_by_id(org_id)
            .await?
            .map(|organization| organization.slug),
    };

    let identity = Identity {
        id: tokens.user.id.clone(),
        email: tokens
            .user
            .email
            .clone()
            .unwrap_or_else(|| email.to_string()),
        kind: assignment.role,
        organization_id: assignment.organization_id.clone(),
        organization_slug,
        branch_id: assignment.branch_id.clone(),
    };
    Ok(SessionRecord::new(entry.user_type.slot(), identity, &tokens))
}

fn login_failed(entry: &LoginEntry, code: &str) -> Response<Body> {
    let location = format!("{}?error={}", entry.path, urlencoding::encode(code));
    (StatusCode::SEE_OTHER, [(LOCATION, location)]).into_response()
}

// ============================================================================
// LOGOUT
// ============================================================================

/// Handle GET /auth/logout
///
/// Destroy the session of one user type, revoke its token upstream and clear
/// the cookie. Other user types' sessions are left alone.
pub async fn handle_logout(
    state: &GatewayState,
    headers: &HeaderMap,
    query: LogoutQuery,
) -> Response<Body> {
    let user_type = query.user_type.unwrap_or(UserType::Admin);
    let slot = user_type.slot();

    if let Some(session_id) = state.session_manager.extract_session_id(headers, slot) {
        if let Some(record) = state.session_manager.get_session(&session_id, slot).await {
            if let Err(e) = state.auth_provider.sign_out(&record.access_token).await {
                tracing::warn!("Upstream sign-out failed for {}: {}", record.identity.id, e);
            }
        }
        state.session_manager.destroy_session(&session_id).await;
    }

    let location = query
        .redirect
        .as_deref()
        .and_then(safe_local_path)
        .unwrap_or(user_type.default_login_path())
        .to_string();

    (
        StatusCode::FOUND,
        [
            (LOCATION, location),
            (SET_COOKIE, state.session_manager.clear_cookie(slot)),
        ],
    )
        .into_response()
}

// ============================================================================
// SESSION / CONTEXT
// ============================================================================

/// Handle GET /auth/session: the current identity for one user type.
pub async fn handle_session(
    state: &GatewayState,
    headers: &HeaderMap,
    query: SessionQuery,
) -> Response<Body> {
    let user_type = query.user_type.unwrap_or(UserType::Admin);
    let loaded = state
        .session_manager
        .load(headers, user_type.slot(), state.auth_provider.as_ref())
        .await;

    match loaded {
        Ok(Some(record)) => Json(serde_json::json!({
            "authenticated": true,
            "user_type": user_type,
            "identity": record.identity,
            "expires_at": record.expires_at,
        }))
        .into_response(),
        Ok(None) => unauthenticated(),
        Err(e) => {
            tracing::warn!("Session lookup failed: {}", e);
            unauthenticated()
        }
    }
}

fn unauthenticated() -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "authenticated": false })),
    )
        .into_response()
}

/// Handle GET /auth/context?path=...: the route context a navigation to
/// `path` would see right now.
pub async fn handle_context(
    state: &GatewayState,
    headers: &HeaderMap,
    query: ContextQuery,
) -> Response<Body> {
    let Some(path) = query.path.as_deref().and_then(safe_local_path) else {
        return crate::middleware::json_error(StatusCode::BAD_REQUEST, "A local path is required");
    };

    let navigation = navigate(state, "GET", path, headers).await;
    let redirect_to = match &navigation.outcome {
        RouteOutcome::Redirect { location, .. } => Some(location.clone()),
        _ => None,
    };
    // The organization record is only disclosed to a caller allowed in.
    let organization = match navigation.outcome {
        RouteOutcome::Render => navigation.organization.map(|o| o.as_ref().clone()),
        _ => None,
    };
    Json(ContextResponse {
        context: navigation.context,
        redirect_to,
        organization,
    })
    .into_response()
}

// ============================================================================
// HELPERS
// ============================================================================

/// The row a session is built from. Kind and organization always come from
/// the same row, so a role held elsewhere never travels with it.
fn choose_assignment<'a>(
    accepted: &[Role],
    user_id: &str,
    rows: &'a [RoleAssignment],
    preferred_org: Option<&str>,
) -> Option<&'a RoleAssignment> {
    let pick = |in_preferred: bool| {
        accepted.iter().find_map(|role| {
            rows.iter().find(|row| {
                row.user_id == user_id
                    && row.role == *role
                    && (!in_preferred || row.organization_id.as_deref() == preferred_org)
            })
        })
    };
    preferred_org.and_then(|_| pick(true)).or_else(|| pick(false))
}

/// `target` if it is a path on this host. Rejects absolute and
/// protocol-relative URLs.
pub fn safe_local_path(target: &str) -> Option<&str> {
    let is_local = target.starts_with('/')
        && !target.starts_with("//")
        && !target.starts_with("/\\")
        && !target.contains("://");
    is_local.then_some(target)
}
