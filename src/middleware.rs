use axum::body::Body;
use axum::http::header::LOCATION;
use axum::http::{Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::auth;
use crate::navigation::{legacy_redirect, navigate, RouteOutcome};
use crate::preferences;
use crate::reverse_proxy::build_identity_headers;
use crate::views;
use crate::GatewayState;

/// Largest form or preference body accepted by the gateway's own endpoints.
const MAX_FORM_BYTES: usize = 16 * 1024;

/// Main request handler: auth endpoints, entry points, legacy shims, then
/// tenant + session + gate resolution and forwarding.
pub async fn handle_request(state: Arc<GatewayState>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    // ── Gateway endpoints (handled directly, not proxied) ────────────
    if let Some(rest) = path.strip_prefix("/auth/") {
        return handle_auth_route(&state, req, rest).await;
    }

    // ── Login entry points ───────────────────────────────────────────
    if method == Method::POST {
        if let Some(entry) = state.config.logins.iter().find(|e| e.path == path) {
            let (parts, body) = req.into_parts();
            let body = match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
                Ok(body) => body,
                Err(_) => return json_error(StatusCode::PAYLOAD_TOO_LARGE, "Form too large"),
            };
            return auth::handle_login(&state, entry, &parts.headers, &body).await;
        }
    }

    // ── Legacy flat paths ────────────────────────────────────────────
    if method == Method::GET || method == Method::HEAD {
        if let Some(target) = legacy_redirect(&state, &path, query.as_deref(), req.headers()).await {
            tracing::debug!("Legacy redirect {} → {}", path, target);
            return redirect(StatusCode::MOVED_PERMANENTLY, target);
        }
    }

    // ── Tenant, session and gate ─────────────────────────────────────
    let navigation = navigate(&state, method.as_str(), &path, req.headers()).await;

    let identity_headers = match &navigation.outcome {
        RouteOutcome::Public => None,
        RouteOutcome::Render => Some(build_identity_headers(
            navigation.identity.as_deref(),
            navigation.organization.as_deref(),
        )),
        RouteOutcome::Redirect { location, .. } => {
            return redirect(StatusCode::FOUND, location.clone());
        }
        RouteOutcome::TenantNotFound { slug, message, .. } => {
            tracing::debug!("Tenant '{}' not found: {}", slug, message);
            return views::tenant_not_found(slug, message, &path, &navigation.switcher);
        }
        RouteOutcome::Loading => return views::loading(),
    };

    // ── Forward request ─────────────────────────────────────────────
    match state.upstream.forward(req, identity_headers).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("Proxy forward error: {}", e);
            json_error(StatusCode::BAD_GATEWAY, "Upstream service unavailable")
        }
    }
}

/// Route /auth/* requests to the appropriate handler.
async fn handle_auth_route(state: &GatewayState, req: Request<Body>, path: &str) -> Response<Body> {
    match path {
        "logout" => auth::handle_logout(state, req.headers(), query(&req)).await,
        "session" => auth::handle_session(state, req.headers(), query(&req)).await,
        "context" => auth::handle_context(state, req.headers(), query(&req)).await,
        _ => {
            if let Some(context) = path.strip_prefix("preferences/sidebar/") {
                let (parts, body) = req.into_parts();
                let body = match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
                    Ok(body) => body,
                    Err(_) => return json_error(StatusCode::PAYLOAD_TOO_LARGE, "Body too large"),
                };
                return preferences::handle_sidebar(
                    &parts.method,
                    context,
                    &parts.headers,
                    &body,
                    state.config.session.secure,
                );
            }
            json_error(StatusCode::NOT_FOUND, "Unknown auth endpoint")
        }
    }
}

/// Query parameters of `req`; anything unparseable reads as defaults.
fn query<T: DeserializeOwned + Default>(req: &Request<Body>) -> T {
    req.uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default()
}

fn redirect(status: StatusCode, location: String) -> Response<Body> {
    (status, [(LOCATION, location)]).into_response()
}

pub(crate) fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
