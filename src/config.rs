use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::directory::StaticDirectory;
use crate::error::ConfigError;
use crate::gate::{GateConfig, LandingPaths};
use crate::identity::{Role, SessionSlot, UserType};

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub landing: LandingPaths,
    #[serde(default)]
    pub gates: HashMap<String, GateConfig>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default = "default_logins")]
    pub logins: Vec<LoginEntry>,
    #[serde(default)]
    pub redirects: Vec<LegacyRedirect>,
    /// Seed data served instead of the hosted backend (local development).
    #[serde(default)]
    pub directory: Option<StaticDirectory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Where the single-page application bundle is served from.
    pub upstream: String,
    /// Hostnames where the tenant switcher is offered on the not-found view.
    #[serde(default = "default_dev_hosts")]
    pub dev_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default)]
    pub service_key: Option<String>,
    /// HS256 secret used to verify access tokens after sign-in.
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    #[serde(default)]
    pub cookies: SessionCookies,
    #[serde(default)]
    pub cookie_domain: String,
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionCookies {
    pub admin: String,
    pub system: String,
    pub carer: String,
    pub client: String,
}

impl Default for SessionCookies {
    fn default() -> Self {
        Self {
            admin: SessionSlot::Admin.default_cookie_name().to_string(),
            system: SessionSlot::System.default_cookie_name().to_string(),
            carer: SessionSlot::Carer.default_cookie_name().to_string(),
            client: SessionSlot::Client.default_cookie_name().to_string(),
        }
    }
}

impl SessionCookies {
    pub fn name(&self, slot: SessionSlot) -> &str {
        match slot {
            SessionSlot::Admin => &self.admin,
            SessionSlot::System => &self.system,
            SessionSlot::Carer => &self.carer,
            SessionSlot::Client => &self.client,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Upper bound on any single session, tenant or role lookup.
    pub timeout_seconds: u64,
    pub cache_capacity: u64,
    pub cache_ttl_seconds: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 12,
            cache_capacity: 1_000,
            cache_ttl_seconds: 60,
        }
    }
}

impl ResolutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteRule {
    #[serde(rename = "match")]
    pub match_rule: MatchRule,
    /// Name of the path parameter holding the tenant slug.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Name of the gate guarding this route. No gate means public.
    #[serde(default)]
    pub gate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchRule {
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginEntry {
    pub path: String,
    pub user_type: UserType,
    /// Roles accepted at this entry point, in order of preference.
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl LoginEntry {
    pub fn new(path: &str, user_type: UserType, roles: &[Role]) -> Self {
        Self {
            path: path.to_string(),
            user_type,
            roles: roles.to_vec(),
        }
    }

    pub fn accepted_roles(&self) -> &[Role] {
        if self.roles.is_empty() {
            self.user_type.roles()
        } else {
            &self.roles
        }
    }
}

/// A flat path kept alive by redirecting it into the current route tree.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRedirect {
    pub from: String,
    /// Target template; `:param` copies a captured segment, `{tenant}` is the
    /// admin session's organization slug.
    pub to: String,
}

fn default_listen() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_dev_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

fn default_max_age() -> u64 {
    86400
}

pub fn default_logins() -> Vec<LoginEntry> {
    vec![
        LoginEntry::new("/login", UserType::Admin, &[Role::SuperAdmin, Role::BranchAdmin]),
        LoginEntry::new("/super-admin-login", UserType::Admin, &[Role::SuperAdmin]),
        LoginEntry::new("/system-login", UserType::System, &[Role::SystemAdmin]),
        LoginEntry::new("/carer-login", UserType::Carer, &[Role::Carer]),
        LoginEntry::new("/client-login", UserType::Client, &[Role::Client]),
    ]
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.routes {
            let path = &rule.match_rule.path;
            if let Some(gate) = &rule.gate {
                if !self.gates.contains_key(gate) {
                    return Err(ConfigError::Invalid(format!(
                        "route '{}' references unknown gate '{}'",
                        path, gate
                    )));
                }
            }
            if let Some(param) = &rule.tenant {
                let captured = path
                    .split('/')
                    .any(|segment| segment.strip_prefix(':') == Some(param.as_str()));
                if !captured {
                    return Err(ConfigError::Invalid(format!(
                        "route '{}' declares tenant ':{}' but does not capture it",
                        path, param
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for entry in &self.logins {
            if !seen.insert(entry.path.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "login path '{}' declared twice",
                    entry.path
                )));
            }
            if let Some(role) = entry
                .accepted_roles()
                .iter()
                .find(|role| role.user_type() != entry.user_type)
            {
                return Err(ConfigError::Invalid(format!(
                    "login '{}' for {} users cannot accept role {}",
                    entry.path, entry.user_type, role
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
server:
  upstream: "http://127.0.0.1:5173"
backend:
  url: "https://backend.example.com"
  anon_key: "anon"
session:
  secret: "test-secret"
gates:
  admin:
    required_role: admin
  super_admin:
    required_role: [super_admin]
    unauthorized_redirect: "/{tenant}/admin/access-denied"
  carer:
    required_role: carer
routes:
  - match: { path: "/login" }
  - match: { path: "/:tenant/admin/reports/**" }
    tenant: tenant
    gate: super_admin
  - match: { path: "/:tenant/admin/**" }
    tenant: tenant
    gate: admin
  - match: { path: "/:tenant/carer/**" }
    tenant: tenant
    gate: carer
redirects:
  - from: "/admin/branch-details/:id"
    to: "/{tenant}/admin/branch-details/:id"
"#;

    #[test]
    fn test_sample_parses_with_defaults() {
        let config = GatewayConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:4000");
        assert_eq!(config.resolution.timeout(), Duration::from_secs(12));
        assert_eq!(config.logins.len(), 5);
        assert_eq!(config.session.cookies.name(SessionSlot::System), "system_session_token");
        assert_eq!(config.routes[1].gate.as_deref(), Some("super_admin"));
    }

    #[test]
    fn test_unknown_gate_rejected() {
        let yaml = SAMPLE.replace("gate: carer", "gate: nurse");
        let err = GatewayConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown gate 'nurse'"));
    }

    #[test]
    fn test_uncaptured_tenant_rejected() {
        let yaml = SAMPLE.replace("/:tenant/carer/**", "/carer/**");
        assert!(matches!(
            GatewayConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_login_role_must_match_user_type() {
        let yaml = format!(
            "{}\nlogins:\n  - path: /carer-login\n    user_type: carer\n    roles: [client]\n",
            SAMPLE
        );
        assert!(GatewayConfig::from_yaml(&yaml).is_err());
    }
}
