use axum::body::Body;
use axum::http::header::{CONNECTION, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::str::FromStr;

use crate::directory::Organization;
use crate::identity::Identity;

/// Headers that should NOT be forwarded between hops.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const USER_ID: &str = "x-infinitecare-user-id";
pub const USER_EMAIL: &str = "x-infinitecare-user-email";
pub const ROLE: &str = "x-infinitecare-role";
pub const ORGANIZATION_ID: &str = "x-infinitecare-organization-id";
pub const TENANT_SLUG: &str = "x-infinitecare-tenant-slug";
pub const BRANCH_ID: &str = "x-infinitecare-branch-id";

/// Identity headers the gateway injects. Incoming copies are stripped so a
/// client cannot impersonate anyone.
const IDENTITY_HEADERS: &[&str] = &[USER_ID, USER_EMAIL, ROLE, ORGANIZATION_ID, TENANT_SLUG, BRANCH_ID];

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Forwards navigations to the single-page application bundle. Bodies stream
/// through in both directions.
pub struct ReverseProxy {
    client: Client<HttpConnector, Body>,
    upstream: String,
}

impl ReverseProxy {
    pub fn new(upstream: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
        }
    }

    pub async fn forward(
        &self,
        req: Request<Body>,
        identity_headers: Option<HeaderMap>,
    ) -> Result<Response<Body>, BoxError> {
        let (mut parts, body) = req.into_parts();

        let target = format!(
            "{}{}",
            self.upstream,
            parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        );
        parts.uri = Uri::from_str(&target)?;

        let original_host = parts.headers.remove(HOST);
        strip_request_headers(&mut parts.headers);
        if let Some(host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
        if let Some(id_headers) = identity_headers {
            parts.headers.extend(id_headers);
        }

        tracing::debug!(method = %parts.method, uri = %parts.uri, "Forwarding to app bundle");

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await?;
        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(incoming)))
    }
}

/// Drop hop-by-hop headers, including any the `Connection` header names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_str(token.trim()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Inbound cleanup before forwarding: hop-by-hop headers and any
/// client-supplied identity headers.
fn strip_request_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    for name in IDENTITY_HEADERS {
        headers.remove(*name);
    }
}

/// Build identity headers for an authorized navigation. The tenant headers
/// describe the organization resolved from the path, when there is one.
pub fn build_identity_headers(
    identity: Option<&Identity>,
    organization: Option<&Organization>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut put = |name: &'static str, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), v);
        }
    };

    if let Some(identity) = identity {
        put(USER_ID, &identity.id);
        put(USER_EMAIL, &identity.email);
        put(ROLE, identity.kind.as_str());
        if let Some(branch) = &identity.branch_id {
            put(BRANCH_ID, branch);
        }
    }
    if let Some(organization) = organization {
        put(ORGANIZATION_ID, &organization.id);
        put(TENANT_SLUG, &organization.slug);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::org;
    use crate::identity::Role;
    use crate::session::tests::identity;

    #[test]
    fn test_identity_headers() {
        let mut carer = identity("c1", Role::Carer);
        carer.branch_id = Some("b-1".to_string());
        let acme = org("org_1", "acme");

        let headers = build_identity_headers(Some(&carer), Some(&acme));
        assert_eq!(headers[USER_ID], "c1");
        assert_eq!(headers[USER_EMAIL], "c1@example.com");
        assert_eq!(headers[ROLE], "carer");
        assert_eq!(headers[BRANCH_ID], "b-1");
        assert_eq!(headers[ORGANIZATION_ID], "org_1");
        assert_eq!(headers[TENANT_SLUG], "acme");
    }

    #[test]
    fn test_tenant_only_headers() {
        let acme = org("org_1", "acme");
        let headers = build_identity_headers(None, Some(&acme));
        assert!(headers.get(USER_ID).is_none());
        assert_eq!(headers[TENANT_SLUG], "acme");
        assert!(build_identity_headers(None, None).is_empty());
    }

    #[test]
    fn test_request_headers_are_cleaned() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID, HeaderValue::from_static("spoofed"));
        headers.insert(ROLE, HeaderValue::from_static("super_admin"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("accept", HeaderValue::from_static("text/html"));
        headers.insert("content-length", HeaderValue::from_static("12"));

        strip_request_headers(&mut headers);

        assert!(headers.get(USER_ID).is_none());
        assert!(headers.get(ROLE).is_none());
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("x-trace-hop").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert_eq!(headers["accept"], "text/html");
        assert_eq!(headers["content-length"], "12");
    }
}
