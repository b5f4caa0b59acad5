//! HTTP client for the hosted backend: table reads over `/rest/v1`,
//! serverless functions over `/functions/v1`, and password auth over
//! `/auth/v1`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::directory::{Organization, OrganizationDirectory, RoleDirectory};
use crate::error::{AuthError, DirectoryError};
use crate::identity::RoleAssignment;

const ORGANIZATIONS: &str = "organizations";
const USER_ROLES: &str = "user_roles";
const LIST_TENANTS_FUNCTION: &str = "list-tenants";

/// Tokens handed back by a successful credential exchange or refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct ListTenantsRequest {
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ListTenantsResponse {
    tenants: Vec<Organization>,
}

pub struct RestFacade {
    base_url: String,
    anon_key: String,
    service_key: Option<String>,
    http_client: reqwest::Client,
}

impl RestFacade {
    pub fn new(config: &BackendConfig, http_client: reqwest::Client) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            service_key: config.service_key.clone(),
            http_client,
        }
    }

    /// Read rows of `collection` whose columns equal the given values.
    pub async fn select<T: DeserializeOwned>(
        &self,
        collection: &str,
        filters: &[(&str, &str)],
        limit: Option<usize>,
    ) -> Result<Vec<T>, DirectoryError> {
        let mut url = format!("{}/rest/v1/{}?select=*", self.base_url, collection);
        for (column, value) in filters {
            url.push_str(&format!("&{}=eq.{}", column, urlencoding::encode(value)));
        }
        if let Some(limit) = limit {
            url.push_str(&format!("&limit={}", limit));
        }

        tracing::debug!("Directory select {}", url);

        let resp = self
            .http_client
            .get(&url)
            .headers(self.api_headers(self.read_key()))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::Status { status, body });
        }

        Ok(resp.json::<Vec<T>>().await?)
    }

    /// Invoke a privileged serverless function.
    pub async fn call_function<A: Serialize, T: DeserializeOwned>(
        &self,
        name: &str,
        args: &A,
    ) -> Result<T, DirectoryError> {
        let url = format!("{}/functions/v1/{}", self.base_url, name);

        let resp = self
            .http_client
            .post(&url)
            .headers(self.api_headers(self.read_key()))
            .json(args)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::Status { status, body });
        }

        Ok(resp.json::<T>().await?)
    }

    async fn token_request<B: Serialize>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<AuthSession, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.base_url, grant_type);

        let resp = self
            .http_client
            .post(&url)
            .headers(self.api_headers(&self.anon_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<AuthSession>()
            .await
            .map_err(|e| AuthError::Transport(format!("token response parse error: {}", e)))
    }

    fn read_key(&self) -> &str {
        self.service_key.as_deref().unwrap_or(&self.anon_key)
    }

    fn api_headers(&self, bearer: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, v);
        }
        headers
    }
}

#[async_trait]
impl OrganizationDirectory for RestFacade {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Organization>, DirectoryError> {
        let rows: Vec<Organization> = self.select(ORGANIZATIONS, &[("slug", slug)], Some(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Organization>, DirectoryError> {
        let rows: Vec<Organization> = self.select(ORGANIZATIONS, &[("id", id)], Some(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Organization>, DirectoryError> {
        let resp: ListTenantsResponse = self
            .call_function(LIST_TENANTS_FUNCTION, &ListTenantsRequest { limit })
            .await?;
        Ok(resp.tenants)
    }
}

#[async_trait]
impl RoleDirectory for RestFacade {
    async fn roles_for(&self, user_id: &str) -> Result<Vec<RoleAssignment>, DirectoryError> {
        self.select(USER_ROLES, &[("user_id", user_id)], None).await
    }
}

#[async_trait]
impl AuthProvider for RestFacade {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.token_request("password", &PasswordGrant { email, password })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        self.token_request("refresh_token", &RefreshGrant { refresh_token })
            .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        let resp = self
            .http_client
            .post(&url)
            .headers(self.api_headers(access_token))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Status { status, body });
        }
        Ok(())
    }
}
