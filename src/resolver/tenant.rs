use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;

use crate::directory::{Organization, OrganizationDirectory};

/// `Idle -> Resolving -> {Resolved, NotFound, Error}`, re-entering
/// `Resolving` whenever the slug changes.
#[derive(Debug, Clone, PartialEq)]
pub enum TenantState {
    Idle,
    Resolving { slug: String, request: u64 },
    Resolved { slug: String, organization: Arc<Organization> },
    NotFound { slug: String, message: String },
    Error { slug: String, message: String },
}

impl TenantState {
    pub fn is_loading(&self) -> bool {
        matches!(self, TenantState::Resolving { .. })
    }

    pub fn slug(&self) -> Option<&str> {
        match self {
            TenantState::Idle => None,
            TenantState::Resolving { slug, .. }
            | TenantState::Resolved { slug, .. }
            | TenantState::NotFound { slug, .. }
            | TenantState::Error { slug, .. } => Some(slug),
        }
    }

    pub fn organization(&self) -> Option<&Arc<Organization>> {
        match self {
            TenantState::Resolved { organization, .. } => Some(organization),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TenantState::NotFound { message, .. } | TenantState::Error { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }
}

/// Resolves the tenant slug of the current path to an organization.
pub struct TenantResolver {
    directory: Arc<dyn OrganizationDirectory>,
    timeout: Duration,
    state: Arc<watch::Sender<TenantState>>,
    next_request: AtomicU64,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn OrganizationDirectory>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(TenantState::Idle);
        Self {
            directory,
            timeout,
            state: Arc::new(state),
            next_request: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> TenantState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TenantState> {
        self.state.subscribe()
    }

    /// Point the resolver at a new slug. `None` returns to `Idle` without a
    /// lookup. The current slug is a no-op in any state, so a settled tenant
    /// never flickers and failures are not retried automatically. Must be
    /// called from within a Tokio runtime.
    pub fn set_slug(&self, slug: Option<&str>) {
        let Some(slug) = slug else {
            self.state.send_if_modified(|state| {
                if *state == TenantState::Idle {
                    false
                } else {
                    *state = TenantState::Idle;
                    true
                }
            });
            return;
        };

        let request = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let started = self.state.send_if_modified(|state| {
            if state.slug() == Some(slug) {
                return false;
            }
            *state = TenantState::Resolving {
                slug: slug.to_string(),
                request,
            };
            true
        });
        if !started {
            tracing::debug!("Tenant '{}' already current", slug);
            return;
        }

        tokio::spawn(lookup(
            Arc::clone(&self.directory),
            Arc::clone(&self.state),
            slug.to_string(),
            request,
            self.timeout,
        ));
    }

    /// Wait until the resolver is not resolving.
    pub async fn settled(&self) -> TenantState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.state(),
        };
        state
    }
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("slug pattern compiles")
    })
}

pub fn is_valid_slug(slug: &str) -> bool {
    slug_pattern().is_match(slug)
}

async fn lookup(
    directory: Arc<dyn OrganizationDirectory>,
    state: Arc<watch::Sender<TenantState>>,
    slug: String,
    request: u64,
    timeout: Duration,
) {
    let outcome = if !is_valid_slug(&slug) {
        TenantState::NotFound {
            message: format!("'{}' is not a valid organization address", slug),
            slug: slug.clone(),
        }
    } else {
        match tokio::time::timeout(timeout, directory.find_by_slug(&slug)).await {
            Ok(Ok(Some(organization))) if organization.is_active() => TenantState::Resolved {
                slug: slug.clone(),
                organization: Arc::new(organization),
            },
            Ok(Ok(Some(organization))) => {
                tracing::debug!("Tenant '{}' is {}", slug, organization.status);
                TenantState::NotFound {
                    message: format!("Organization '{}' is {}", slug, organization.status),
                    slug: slug.clone(),
                }
            }
            Ok(Ok(None)) => {
                tracing::debug!("No tenant for slug '{}'", slug);
                TenantState::NotFound {
                    message: format!("No organization found for '{}'", slug),
                    slug: slug.clone(),
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Tenant lookup for '{}' failed: {}", slug, e);
                TenantState::Error {
                    message: format!("Could not load organization '{}'", slug),
                    slug: slug.clone(),
                }
            }
            Err(_) => {
                tracing::warn!("Tenant lookup for '{}' timed out after {:?}", slug, timeout);
                TenantState::Error {
                    message: format!("Timed out loading organization '{}'", slug),
                    slug: slug.clone(),
                }
            }
        }
    };

    let applied = state.send_if_modified(|current| {
        let is_current = matches!(
            current,
            TenantState::Resolving { slug: s, request: r } if *s == slug && *r == request
        );
        if is_current {
            *current = outcome;
        }
        is_current
    });
    if !applied {
        tracing::debug!("Discarding stale tenant response for '{}'", slug);
    }
}
