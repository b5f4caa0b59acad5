use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use infinite_care_gateway::config::GatewayConfig;
use infinite_care_gateway::directory::{CachedDirectory, OrganizationDirectory, RoleDirectory};
use infinite_care_gateway::facade::{AuthProvider, RestFacade};
use infinite_care_gateway::{build_router, GatewayState};

/// How often expired sessions are swept.
const SESSION_CLEANUP_SECS: u64 = 300;

/// Infinite Care tenant-aware gateway
#[derive(Parser)]
#[command(
    name = "infinite-care-gateway",
    about = "Tenant and role aware front door for the Infinite Care web app"
)]
struct Cli {
    /// Path to the gateway configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "gateway.yaml")]
    config: PathBuf,
}

fn cached_directory<D>(
    inner: Arc<D>,
    config: &GatewayConfig,
) -> (Arc<dyn OrganizationDirectory>, Arc<dyn RoleDirectory>)
where
    D: OrganizationDirectory + RoleDirectory + 'static,
{
    let cached = Arc::new(CachedDirectory::new(
        inner,
        config.resolution.cache_capacity,
        config.resolution.cache_ttl(),
    ));
    (cached.clone(), cached)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infinite_care_gateway=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = GatewayConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {:?}: {}", cli.config, e);
        std::process::exit(1);
    });

    tracing::info!("Infinite Care gateway starting");
    tracing::info!("  Upstream: {}", config.server.upstream);
    tracing::info!("  Backend:  {}", config.backend.url);
    tracing::info!("  Listen:   {}", config.server.listen);
    tracing::info!("  Routes:   {} rules, {} gates", config.routes.len(), config.gates.len());

    let facade = Arc::new(RestFacade::new(&config.backend, reqwest::Client::new()));
    let (organizations, roles) = match &config.directory {
        Some(seed) => {
            tracing::info!(
                "  Directory: static ({} organizations)",
                seed.organizations.len()
            );
            cached_directory(Arc::new(seed.clone()), &config)
        }
        None => cached_directory(Arc::clone(&facade), &config),
    };
    let auth_provider: Arc<dyn AuthProvider> = facade;

    let listen_addr = config.server.listen.clone();
    let state = Arc::new(GatewayState::new(config, organizations, roles, auth_provider));
    if state.token_verifier.is_none() {
        tracing::warn!("No backend.jwt_secret configured; access tokens are not verified");
    }

    state.session_manager.start_cleanup_task(SESSION_CLEANUP_SECS);

    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to bind to {}: {}", listen_addr, e);
            std::process::exit(1);
        });

    tracing::info!("Infinite Care gateway listening on {}", listen_addr);

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    });
}
