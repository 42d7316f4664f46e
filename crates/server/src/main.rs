use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadflow_core::scheduler::ActionHandler;
use leadflow_core::{
    load_config, validate_config, ActionStore, AdapterRegistry, CampaignCoordinator,
    CampaignStore, Capability, Config, FollowupScheduler, Governor, HttpAgentAdapter, LeadStore,
    IntelCache, OrchestrationEngine, SqliteActionStore, SqliteCampaignStore, SqliteIntelCache,
    SqliteLeadStore,
};
use leadflow_server::api::create_router;
use leadflow_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("LEADFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Database path: {:?}", config.database.path);
    info!("Agent service: {}", config.agents.base_url);

    // Stores
    let leads: Arc<dyn LeadStore> = Arc::new(
        SqliteLeadStore::new(&config.database.path).context("Failed to create lead store")?,
    );
    let campaigns: Arc<dyn CampaignStore> = Arc::new(
        SqliteCampaignStore::new(&config.database.path)
            .context("Failed to create campaign store")?,
    );
    let actions: Arc<dyn ActionStore> = Arc::new(
        SqliteActionStore::new(&config.database.path)
            .context("Failed to create action store")?,
    );
    let intel_cache = Arc::new(
        SqliteIntelCache::new(&config.database.path)
            .context("Failed to create company intel cache")?,
    );
    match intel_cache.purge_expired(chrono::Utc::now()) {
        Ok(0) => {}
        Ok(removed) => info!("Purged {} expired company intel entries", removed),
        Err(e) => warn!("Failed to purge company intel cache: {}", e),
    }
    info!("Stores initialized");

    let governor = Arc::new(Governor::new(config.governor.clone()));
    let adapters = build_adapters(&config)?;
    let scheduler = Arc::new(FollowupScheduler::new(config.scheduler.clone(), actions));

    let engine = Arc::new(
        OrchestrationEngine::new(
            config.engine.clone(),
            leads,
            Arc::clone(&campaigns),
            Arc::clone(&scheduler),
            governor,
            adapters,
        )
        .with_default_campaign(config.campaign.defaults.clone())
        .with_intel_cache(intel_cache),
    );

    let coordinator = Arc::new(CampaignCoordinator::new(
        config.campaign.clone(),
        Arc::clone(&engine),
        campaigns,
    ));

    // Finish interrupted work before the scheduler starts firing
    match coordinator.resume().await {
        Ok(report) => info!(
            resumed_attempts = report.resumed_attempts,
            rescheduled_followups = report.rescheduled_followups,
            closed_sequences = report.closed_sequences,
            redriven_leads = report.redriven_leads,
            "Recovery finished"
        ),
        Err(e) => warn!("Recovery failed: {}", e),
    }

    scheduler.start(Arc::clone(&engine) as Arc<dyn ActionHandler>);
    info!("Follow-up scheduler started");

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), coordinator));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    scheduler.stop().await;
    info!("Follow-up scheduler stopped");

    Ok(())
}

/// Install the tracing subscriber. `LEADFLOW_LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("LEADFLOW_LOG_FORMAT").is_ok_and(|format| format == "json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// One HTTP adapter per capability, each billed against its configured service.
fn build_adapters(config: &Config) -> Result<AdapterRegistry> {
    let timeout = Duration::from_millis(config.agents.timeout_ms);
    let mut builder = AdapterRegistry::builder();
    for capability in Capability::ALL {
        let service = config.agents.service_for(capability);
        let adapter = HttpAgentAdapter::new(&config.agents.base_url, service, timeout)
            .with_context(|| format!("Failed to create adapter for {}", capability))?
            .with_api_key(config.agents.api_key.clone());
        builder = builder.with(capability, Arc::new(adapter));
    }
    Ok(builder.build())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
