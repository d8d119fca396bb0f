#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use fg_codestore::CodeStore;
use fg_config::{load_config, validate_config, GatewayConfig};
use fg_credentials::CredentialStore;
use fg_deploy::Deployer;
use fg_gateway::{build_app, AppState, CorsConfig};
use fg_kv::InMemoryKv;
use fg_loader::Loader;
use fg_orchestrator::Orchestrator;
use fg_ratelimit::{CompositeLimiter, Limiter, LimiterConfig};
use fg_registry::Registry;
use fg_sandbox::MockSandbox;
use fg_telemetry::MetricsCollector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fg-gateway", version, about = "Multi-tenant serverless function gateway")]
struct Args {
    /// Address to bind the HTTP listener to. Overrides the config file.
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("load configuration")?;
    if let Some(bind) = args.bind.clone() {
        config.bind_addr = Some(bind);
    }
    for warning in validate_config(&config).context("validate configuration")? {
        tracing::warn!(%warning, "configuration warning");
    }

    let filter = if args.debug {
        EnvFilter::new("fg=debug,fg_gateway=debug")
    } else {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let kv = Arc::new(InMemoryKv::new());
    let credentials = Arc::new(CredentialStore::new(kv.clone()));
    let registry = Arc::new(Registry::new(kv.clone()));
    let codestore = Arc::new(CodeStore::new(kv.clone()));
    let loader = Arc::new(Loader::new(registry.clone(), codestore.clone()));

    let limiter = Arc::new(
        CompositeLimiter::new()
            .register(
                "ip",
                Limiter::new(LimiterConfig {
                    window_ms: config.rate_limit.ip_window_ms,
                    max_requests: config.rate_limit.ip_max,
                }),
            )
            .register(
                "function",
                Limiter::new(LimiterConfig {
                    window_ms: config.rate_limit.fn_window_ms,
                    max_requests: config.rate_limit.fn_max,
                }),
            ),
    );

    let sandbox = Arc::new(MockSandbox::new(None));
    let sandbox_timeout = Duration::from_secs(
        config
            .sandbox_timeout_secs
            .unwrap_or(fg_config::DEFAULT_SANDBOX_TIMEOUT_SECS),
    );

    let orchestrator = Arc::new(
        Orchestrator::new(
            credentials.clone(),
            limiter.clone(),
            registry.clone(),
            loader.clone(),
            Some(sandbox),
        )
        .with_public_paths(config.public_endpoints.clone())
        .with_sandbox_timeout(sandbox_timeout)
        .with_executed_with("worker_loaders"),
    );

    let deployer = Arc::new(Deployer::new(
        registry.clone(),
        codestore.clone(),
        loader.clone(),
        None,
        "https://gateway.example.com",
    ));

    let state = Arc::new(AppState {
        credentials,
        registry,
        codestore,
        loader,
        orchestrator,
        deployer,
        metrics: Arc::new(MetricsCollector::new()),
        log_store: None,
        cors: CorsConfig::default(),
    });

    let app = build_app(state);

    let bind_addr = config.bind_addr.clone().unwrap_or_else(|| "127.0.0.1:8787".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(bind = %bind_addr, "fg-gateway listening");

    axum::serve(listener, app).await.context("serve")
}
