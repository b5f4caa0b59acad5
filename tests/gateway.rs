use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{COOKIE, HOST, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, Response, StatusCode, Uri};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use infinite_care_gateway::config::GatewayConfig;
use infinite_care_gateway::error::AuthError;
use infinite_care_gateway::facade::{AuthProvider, AuthSession, AuthUser};
use infinite_care_gateway::{build_router, GatewayState};

const CONFIG: &str = r#"
server:
  upstream: "UPSTREAM"
backend:
  url: "http://127.0.0.1:9"
  anon_key: "anon"
session:
  secret: "integration-secret"
gates:
  admin:
    required_role: admin
  reports:
    required_role: [super_admin]
    unauthorized_redirect: "/{tenant}/admin/access-denied"
  carer:
    required_role: carer
  system:
    required_role: system
routes:
  - match: { path: "/system-dashboard/**" }
    gate: system
  - match: { path: "/:tenant/admin/reports/**" }
    tenant: tenant
    gate: reports
  - match: { path: "/:tenant/admin/**" }
    tenant: tenant
    gate: admin
  - match: { path: "/:tenant/carer/**" }
    tenant: tenant
    gate: carer
redirects:
  - from: "/admin/branch-details/:id"
    to: "/{tenant}/admin/branch-details/:id"
directory:
  organizations:
    - { id: org_1, slug: acme, name: Acme Care, status: active }
    - { id: org_2, slug: globex, name: Globex Care, status: active }
  roles:
    - { user_id: u1, role: branch_admin, organization_id: org_1 }
    - { user_id: c1, role: carer, organization_id: org_1, branch_id: b-1 }
    - { user_id: u2, role: branch_admin, organization_id: org_1 }
    - { user_id: u2, role: super_admin, organization_id: org_2 }
"#;

/// Users sign in as `<id>@example.com` with password `secret`.
struct PasswordAuth;

#[async_trait]
impl AuthProvider for PasswordAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let id = email
            .strip_suffix("@example.com")
            .ok_or(AuthError::InvalidCredentials)?;
        if password != "secret" {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(AuthSession {
            access_token: format!("token-{}", id),
            refresh_token: None,
            expires_in: 3600,
            user: AuthUser {
                id: id.to_string(),
                email: Some(email.to_string()),
            },
        })
    }

    async fn refresh(&self, _: &str) -> Result<AuthSession, AuthError> {
        Err(AuthError::InvalidToken("expired".to_string()))
    }

    async fn sign_out(&self, _: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Stand-in for the app bundle: echoes the path and the identity headers it got.
async fn echo(headers: HeaderMap, uri: Uri) -> Json<Value> {
    let identity: serde_json::Map<String, Value> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-infinitecare-"))
        .map(|(name, value)| {
            (
                name.to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    Json(serde_json::json!({ "path": uri.path(), "identity": identity }))
}

async fn spawn_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(echo))
            .await
            .unwrap();
    });
    format!("http://{}", addr)
}

async fn gateway() -> Router {
    let upstream = spawn_upstream().await;
    let config = GatewayConfig::from_yaml(&CONFIG.replace("UPSTREAM", &upstream)).unwrap();
    let directory = Arc::new(config.directory.clone().unwrap());
    let state = GatewayState::new(config, directory.clone(), directory, Arc::new(PasswordAuth));
    build_router(Arc::new(state))
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

fn get(path: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(path).header(HOST, "app.infinitecare.test");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

async fn sign_in(app: &Router, entry: &str, user: &str) -> String {
    let request = Request::post(entry)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(format!("email={}%40example.com&password=secret", user)))
        .unwrap();
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(response: &Response<Body>) -> &str {
    response.headers()[LOCATION].to_str().unwrap()
}

#[tokio::test]
async fn test_public_paths_pass_through_without_identity() {
    let app = gateway().await;
    let request = Request::get("/assets/app.js")
        .header("x-infinitecare-user-id", "spoofed")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["path"], "/assets/app.js");
    assert!(body["identity"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_unauthenticated_admin_page_redirects_to_login() {
    let app = gateway().await;
    let response = send(&app, get("/acme/admin/dashboard", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_signed_in_admin_reaches_upstream_with_identity() {
    let app = gateway().await;
    let cookie = sign_in(&app, "/login", "u1").await;

    let response = send(&app, get("/acme/admin/dashboard", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["identity"]["x-infinitecare-user-id"], "u1");
    assert_eq!(body["identity"]["x-infinitecare-role"], "branch_admin");
    assert_eq!(body["identity"]["x-infinitecare-organization-id"], "org_1");
    assert_eq!(body["identity"]["x-infinitecare-tenant-slug"], "acme");
}

#[tokio::test]
async fn test_wrong_role_and_wrong_tenant_redirects() {
    let app = gateway().await;
    let cookie = sign_in(&app, "/login", "u1").await;

    let reports = send(&app, get("/acme/admin/reports/weekly", Some(&cookie))).await;
    assert_eq!(reports.status(), StatusCode::FOUND);
    assert_eq!(location(&reports), "/acme/admin/access-denied");

    let other = send(&app, get("/globex/admin/dashboard", Some(&cookie))).await;
    assert_eq!(location(&other), "/acme/admin/dashboard");
}

#[tokio::test]
async fn test_carer_session_does_not_open_admin_pages() {
    let app = gateway().await;
    let cookie = sign_in(&app, "/carer-login", "c1").await;
    assert!(cookie.starts_with("ic_carer_session="));

    let admin = send(&app, get("/acme/admin/dashboard", Some(&cookie))).await;
    assert_eq!(location(&admin), "/login");

    let carer = send(&app, get("/acme/carer/dashboard", Some(&cookie))).await;
    assert_eq!(carer.status(), StatusCode::OK);
    let body = json(carer).await;
    assert_eq!(body["identity"]["x-infinitecare-branch-id"], "b-1");
}

#[tokio::test]
async fn test_login_with_wrong_role_is_rejected() {
    let app = gateway().await;
    let request = Request::post("/system-login")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("email=c1%40example.com&password=secret"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(location(&response), "/system-login?error=unauthorized_role");
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_unknown_tenant_renders_not_found() {
    let app = gateway().await;
    let response = send(&app, get("/doesnotexist/admin/dashboard", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let html = String::from_utf8(response.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap();
    assert!(html.contains("doesnotexist"));
    assert!(!html.contains("Switch tenant"));

    let request = Request::get("/doesnotexist/admin/dashboard")
        .header(HOST, "localhost:4000")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    let html = String::from_utf8(response.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap();
    assert!(html.contains("href=\"/acme/admin/dashboard\""));
}

#[tokio::test]
async fn test_legacy_path_redirects_into_tenant() {
    let app = gateway().await;
    let cookie = sign_in(&app, "/login", "u1").await;
    let response = send(&app, get("/admin/branch-details/b-9", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(location(&response), "/acme/admin/branch-details/b-9");
}

#[tokio::test]
async fn test_context_and_session_endpoints() {
    let app = gateway().await;
    let cookie = sign_in(&app, "/login", "u1").await;

    let context = json(send(&app, get("/auth/context?path=%2Facme%2Fadmin%2Fdashboard", Some(&cookie))).await).await;
    assert_eq!(context["tenantSlug"], "acme");
    assert_eq!(context["requiredRole"], "admin");
    assert_eq!(context["isAuthorized"], true);
    assert_eq!(context["isLoading"], false);
    assert_eq!(context["organization"]["id"], "org_1");

    let session = send(&app, get("/auth/session?user_type=admin", Some(&cookie))).await;
    assert_eq!(session.status(), StatusCode::OK);
    assert_eq!(json(session).await["identity"]["kind"], "branch_admin");

    let logout = send(&app, get("/auth/logout?user_type=admin", Some(&cookie))).await;
    assert_eq!(location(&logout), "/login");
    let session = send(&app, get("/auth/session?user_type=admin", Some(&cookie))).await;
    assert_eq!(session.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sidebar_preference_roundtrip() {
    let app = gateway().await;
    let read = json(send(&app, get("/auth/preferences/sidebar/admin", None)).await).await;
    assert_eq!(read["open"], true);

    let request = Request::post("/auth/preferences/sidebar/admin")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"open":false}"#))
        .unwrap();
    let response = send(&app, request).await;
    let cookie = response.headers()[SET_COOKIE].to_str().unwrap().split(';').next().unwrap().to_string();

    let read = json(send(&app, get("/auth/preferences/sidebar/admin", Some(&cookie))).await).await;
    assert_eq!(read["open"], false);
}

#[tokio::test]
async fn test_role_held_in_another_tenant_does_not_open_pages() {
    let app = gateway().await;
    let request = Request::post("/login")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(
            "email=u2%40example.com&password=secret&redirect=%2Facme%2Fadmin%2Fdashboard",
        ))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(location(&response), "/acme/admin/dashboard");
    let cookie = response.headers()[SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let dashboard = send(&app, get("/acme/admin/dashboard", Some(&cookie))).await;
    assert_eq!(dashboard.status(), StatusCode::OK);
    assert_eq!(json(dashboard).await["identity"]["x-infinitecare-role"], "branch_admin");

    let reports = send(&app, get("/acme/admin/reports/weekly", Some(&cookie))).await;
    assert_eq!(reports.status(), StatusCode::FOUND);
    assert_eq!(location(&reports), "/acme/admin/access-denied");
}

#[tokio::test]
async fn test_path_variants_are_gated_like_the_canonical_path() {
    let app = gateway().await;
    for path in [
        "/acme/ADMIN/dashboard",
        "/acme/%61dmin/dashboard",
        "/acme/Admin/reports/weekly",
        "/acme/carer/../admin/dashboard",
    ] {
        let response = send(&app, get(path, None)).await;
        assert_eq!(response.status(), StatusCode::FOUND, "{}", path);
        assert_eq!(location(&response), "/login", "{}", path);
    }
}
