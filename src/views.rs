//! Pages the gateway renders itself instead of forwarding.

use askama::Template;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, RETRY_AFTER};
use axum::http::{Response, StatusCode};
use axum::response::{Html, IntoResponse};

use crate::directory::Organization;

struct SwitcherLink {
    href: String,
    name: String,
    slug: String,
}

#[derive(Template)]
#[template(path = "tenant_not_found.html")]
struct TenantNotFoundTemplate<'a> {
    slug: &'a str,
    message: &'a str,
    switcher: Vec<SwitcherLink>,
}

#[derive(Template)]
#[template(path = "loading.html")]
struct LoadingTemplate;

fn render(template: &impl Template) -> String {
    template.render().unwrap_or_else(|e| {
        tracing::error!("Template render error: {}", e);
        "Error rendering page".to_string()
    })
}

/// 404 for a slug that names no usable organization. On development hosts
/// `switcher` lists tenants to jump to, keeping the rest of the path.
pub fn tenant_not_found(
    slug: &str,
    message: &str,
    requested_path: &str,
    switcher: &[Organization],
) -> Response<Body> {
    let template = TenantNotFoundTemplate {
        slug,
        message,
        switcher: switcher
            .iter()
            .map(|organization| SwitcherLink {
                href: switch_path(requested_path, &organization.slug),
                name: organization.name.clone(),
                slug: organization.slug.clone(),
            })
            .collect(),
    };
    (StatusCode::NOT_FOUND, Html(render(&template))).into_response()
}

/// Placeholder while a resolver has not settled. Only reachable when a
/// lookup outlives the request.
pub fn loading() -> Response<Body> {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(RETRY_AFTER, "1"), (CACHE_CONTROL, "no-store")],
        Html(render(&LoadingTemplate)),
    )
        .into_response()
}

/// `path` with its first segment replaced by `slug`.
fn switch_path(path: &str, slug: &str) -> String {
    let rest = path
        .trim_start_matches('/')
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    if rest.is_empty() {
        format!("/{}", slug)
    } else {
        format!("/{}/{}", slug, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::org;
    use http_body_util::BodyExt;

    async fn body_text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_switch_path() {
        assert_eq!(switch_path("/ghost/admin/dashboard", "acme"), "/acme/admin/dashboard");
        assert_eq!(switch_path("/ghost", "acme"), "/acme");
    }

    #[tokio::test]
    async fn test_not_found_escapes_slug() {
        let response = tenant_not_found("<script>", "No organization found for '<script>'", "/<script>/admin", &[]);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let html = body_text(response).await;
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("Switch tenant"));
    }

    #[tokio::test]
    async fn test_not_found_lists_switcher() {
        let tenants = vec![org("org_1", "acme"), org("org_2", "globex")];
        let html = body_text(tenant_not_found("ghost", "missing", "/ghost/carer/dashboard", &tenants)).await;
        assert!(html.contains("href=\"/acme/carer/dashboard\""));
        assert!(html.contains("globex Care"));
    }

    #[test]
    fn test_loading_is_retryable() {
        let response = loading();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[RETRY_AFTER], "1");
    }
}
