//! Identity-aware front door for the Infinite Care web app: resolves the
//! tenant in the path and the visitor's session, gates each navigation by
//! role and forwards what passes to the single-page application bundle.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod facade;
pub mod gate;
pub mod identity;
pub mod jwt;
pub mod middleware;
pub mod navigation;
pub mod preferences;
pub mod resolver;
pub mod reverse_proxy;
pub mod route_matcher;
pub mod session;
pub mod views;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::GatewayConfig;
use directory::{OrganizationDirectory, RoleDirectory};
use facade::AuthProvider;
use jwt::TokenVerifier;
use reverse_proxy::ReverseProxy;
use session::SessionManager;

/// Shared application state available to all request handlers.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub session_manager: SessionManager,
    pub organizations: Arc<dyn OrganizationDirectory>,
    pub roles: Arc<dyn RoleDirectory>,
    pub auth_provider: Arc<dyn AuthProvider>,
    pub token_verifier: Option<TokenVerifier>,
    pub upstream: ReverseProxy,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        organizations: Arc<dyn OrganizationDirectory>,
        roles: Arc<dyn RoleDirectory>,
        auth_provider: Arc<dyn AuthProvider>,
    ) -> Self {
        let session_manager = SessionManager::new(&config.session);
        let token_verifier = config.backend.jwt_secret.as_deref().map(TokenVerifier::new);
        let upstream = ReverseProxy::new(&config.server.upstream);
        Self {
            config,
            session_manager,
            organizations,
            roles,
            auth_provider,
            token_verifier,
            upstream,
        }
    }
}

/// Every request goes through [`middleware::handle_request`].
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .fallback(move |req: Request<Body>| {
            let state = Arc::clone(&state);
            async move { middleware::handle_request(state, req).await }
        })
        .layer(TraceLayer::new_for_http())
}
