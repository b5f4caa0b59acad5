//! Per-context sidebar state, persisted in a plain cookie.

use axum::body::Body;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::middleware::json_error;
use crate::session::cookie_value;

/// Sidebars start open.
pub const DEFAULT_OPEN: bool = true;

const MAX_AGE_SECONDS: u64 = 60 * 60 * 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidebarState {
    pub open: bool,
}

pub fn cookie_name(context: &str) -> String {
    format!("sidebar-state-{}", context)
}

/// Contexts are short identifiers such as `admin` or `carer`.
pub fn is_valid_context(context: &str) -> bool {
    !context.is_empty()
        && context.len() <= 32
        && context
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Stored state for `context`. Missing or unreadable values read as the default.
pub fn read_sidebar(headers: &HeaderMap, context: &str) -> SidebarState {
    let open = match cookie_value(headers, &cookie_name(context)) {
        Some("true") => true,
        Some("false") => false,
        _ => DEFAULT_OPEN,
    };
    SidebarState { open }
}

pub fn sidebar_cookie(context: &str, state: SidebarState, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; SameSite=Lax; Path=/; Max-Age={}",
        cookie_name(context),
        state.open,
        MAX_AGE_SECONDS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Handle GET/POST /auth/preferences/sidebar/:context
pub fn handle_sidebar(
    method: &Method,
    context: &str,
    headers: &HeaderMap,
    body: &[u8],
    secure: bool,
) -> Response<Body> {
    if !is_valid_context(context) {
        return json_error(StatusCode::NOT_FOUND, "Unknown preference context");
    }

    match *method {
        Method::GET => Json(read_sidebar(headers, context)).into_response(),
        Method::POST | Method::PUT => {
            let state: SidebarState = match serde_json::from_slice(body) {
                Ok(state) => state,
                Err(e) => {
                    tracing::debug!("Rejected sidebar preference for {}: {}", context, e);
                    return json_error(StatusCode::BAD_REQUEST, "Expected {\"open\": bool}");
                }
            };
            (
                [(SET_COOKIE, sidebar_cookie(context, state, secure))],
                Json(state),
            )
                .into_response()
        }
        _ => json_error(StatusCode::METHOD_NOT_ALLOWED, "Use GET or POST"),
    }
}
