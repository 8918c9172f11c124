use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::error_handling::HandleErrorLayer;
use axum::http::{HeaderValue, Method, StatusCode};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use rc_domain::config::{Config, ConfigSeverity};
use rc_drivers::{DriverRegistry, SimulatedController};
use rc_gateway::api;
use rc_gateway::state::AppState;
use rc_gateway::workers::{AlertWorker, PollerWorker, SchedulerWorker};
use rc_store::Store;
use rc_timing::SystemClock;

#[derive(Parser)]
#[command(name = "reefcored", about = "ReefCore automation core")]
struct Cli {
    /// Path to the TOML config file. Missing file = defaults + env.
    #[arg(long, default_value = "reefcore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API plus every worker enabled in config (default).
    Serve,
    /// Run only the scheduler worker (single-writer deployment).
    Scheduler,
    /// Run only the poller worker.
    Poller,
    /// Run only the alert evaluator.
    Alerts,
    /// Bootstrap the database schema and exit.
    Migrate,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Scheduler) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_scheduler_only(Arc::new(config)).await
        }
        Some(Command::Poller) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_poller_only(Arc::new(config)).await
        }
        Some(Command::Alerts) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_alerts_only(Arc::new(config)).await
        }
        Some(Command::Migrate) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            let store = connect_store(&config).await?;
            store.migrate().await.context("running schema bootstrap")?;
            tracing::info!(url = %config.database.url, "schema up to date");
            Ok(())
        }
        Some(Command::Version) => {
            println!("reefcored {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rc_gateway=debug")),
        )
        .json()
        .init();
}

/// Read the TOML config (missing file is fine) and overlay env vars.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Validate and log config issues; error severity aborts startup.
fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

async fn connect_store(config: &Config) -> anyhow::Result<Store> {
    let store = Store::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("connecting to {}", config.database.url))?;
    tracing::info!(
        url = %config.database.url,
        pool = config.database.max_connections,
        "store ready"
    );
    Ok(store)
}

/// Cancellation token that trips on ctrl-c / SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            trip.cancel();
        }
    });
    token
}

/// Build the full worker set. Loops are spawned separately so the API
/// process can hold worker handles without running them.
fn build_workers(
    config: &Config,
    store: &Store,
) -> (Arc<SchedulerWorker>, Arc<PollerWorker>, Arc<AlertWorker>) {
    let clock = Arc::new(SystemClock);

    let scheduler = Arc::new(SchedulerWorker::new(
        store.clone(),
        Arc::new(SimulatedController),
        clock.clone(),
        config.scheduler.clamped_interval_secs(),
    ));
    let poller = PollerWorker::new(
        store.clone(),
        Arc::new(DriverRegistry::simulated()),
        clock.clone(),
        config.poller.refresh_interval_secs,
        config.poller.retention_days,
    );
    let alerts = Arc::new(AlertWorker::new(
        store.clone(),
        clock,
        config.alerts.interval_secs,
    ));
    (scheduler, poller, alerts)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serve
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("ReefCore starting");
    check_config(&config)?;

    let store = connect_store(&config).await?;
    let (scheduler, poller, alerts) = build_workers(&config, &store);
    let shutdown = shutdown_token();

    // ── Worker loops (per-process enablement) ────────────────────────
    if config.scheduler.enabled {
        let worker = scheduler.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await });
        tracing::info!(
            interval_secs = config.scheduler.clamped_interval_secs(),
            "scheduler worker spawned"
        );
    }
    if config.poller.enabled {
        let worker = poller.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await });
        tracing::info!(
            refresh_secs = config.poller.refresh_interval_secs,
            "poller worker spawned"
        );
    }
    if config.alerts.enabled {
        let worker = alerts.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await });
        tracing::info!(interval_secs = config.alerts.interval_secs, "alert worker spawned");
    }

    // ── API tokens (read once, hash for constant-time comparison) ────
    let api_token_hash = api::auth::token_hash_from_env(&config.server.api_token_env);
    match &api_token_hash {
        Some(_) => tracing::info!(env_var = %config.server.api_token_env, "API bearer-token auth enabled"),
        None => tracing::warn!(
            env_var = %config.server.api_token_env,
            "API bearer-token auth DISABLED — set the env var to enable"
        ),
    }
    let service_token_hash = api::auth::token_hash_from_env(&config.server.service_token_env);
    if service_token_hash.is_some() {
        tracing::info!(env_var = %config.server.service_token_env, "service token accepted");
    }

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        store,
        scheduler,
        poller,
        alerts,
        api_token_hash,
        service_token_hash,
    };

    // ── Layers: CORS, per-request deadline, concurrency limit ────────
    let cors_layer = build_cors_layer(&config.server.cors.allowed_origins);
    let timeout_layer = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
            StatusCode::REQUEST_TIMEOUT
        }))
        .layer(tower::timeout::TimeoutLayer::new(
            std::time::Duration::from_secs(config.server.request_timeout_secs),
        ));
    tracing::info!(
        max_concurrent = config.server.max_concurrent_requests,
        request_timeout_secs = config.server.request_timeout_secs,
        "request limits set"
    );

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(timeout_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "ReefCore listening");

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .context("axum server error")?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// single-worker processes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_scheduler_only(config: Arc<Config>) -> anyhow::Result<()> {
    check_config(&config)?;
    let store = connect_store(&config).await?;
    let (scheduler, _, _) = build_workers(&config, &store);
    scheduler.run(shutdown_token()).await;
    Ok(())
}

async fn run_poller_only(config: Arc<Config>) -> anyhow::Result<()> {
    check_config(&config)?;
    let store = connect_store(&config).await?;
    let (_, poller, _) = build_workers(&config, &store);
    poller.run(shutdown_token()).await;
    Ok(())
}

async fn run_alerts_only(config: Arc<Config>) -> anyhow::Result<()> {
    check_config(&config)?;
    let store = connect_store(&config).await?;
    let (_, _, alerts) = build_workers(&config, &store);
    alerts.run(shutdown_token()).await;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thin CORS wiring over the configured origin list (`ALLOWED_HOSTS`).
/// Origin policy lives outside the core; this only switches between a
/// permissive dev mode (`["*"]`) and an exact allow-list.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS allows all origins (dev mode)");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(headers)
}
