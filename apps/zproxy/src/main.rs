use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use zproxy_core::{ChatEngine, EngineConfig, UpstreamClientConfig, WreqUpstreamClient};
use zproxy_provider_core::{
    ChatBackend, CredentialKind, CredentialPool, CredentialValidator, PoolConfig,
};
use zproxy_provider_impl::{ZaiBackend, ZaiValidator};
use zproxy_router::{AppState, admin_router, api_router};
use zproxy_storage::CredentialStorage;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("zproxy failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let backend = Arc::new(ZaiBackend::new(cli.base_url.clone())?);
    let validator: Arc<dyn CredentialValidator> = Arc::new(ZaiValidator::new(cli.base_url.clone())?);

    let pool = Arc::new(CredentialPool::new(PoolConfig {
        failure_threshold: cli.failure_threshold,
        recovery_timeout: Duration::from_secs(cli.recovery_timeout),
    }));

    let storage = if cli.dsn.trim().is_empty() {
        None
    } else {
        let storage = CredentialStorage::connect(cli.dsn.trim()).await?;
        storage.sync().await?;
        info!(event = "storage_ready", dsn = %cli.dsn.trim());
        Some(storage)
    };

    bootstrap_pool(&cli, backend.name(), &pool, storage.as_ref()).await?;

    if !cli.anonymous {
        let outcome = pool.health_check_all(validator.clone()).await;
        info!(
            event = "credential_health_check",
            probed = outcome.probed,
            user = outcome.user,
            guest = outcome.guest,
            unknown = outcome.unknown,
            failures = outcome.failures
        );
        if cli.health_interval > 0 {
            pool.spawn_health_loop(validator.clone(), Duration::from_secs(cli.health_interval));
        }
    }

    let client = WreqUpstreamClient::new(UpstreamClientConfig {
        proxy: cli.proxy.clone(),
        ..Default::default()
    })?;
    let engine = Arc::new(ChatEngine::new(
        backend.clone() as Arc<dyn ChatBackend>,
        pool.clone(),
        storage.clone(),
        client,
        EngineConfig {
            max_attempts: cli.max_attempts,
            anonymous: cli.anonymous,
            ..Default::default()
        },
    ));

    let state = AppState {
        engine,
        pool,
        storage,
        backend_name: backend.name().to_string(),
        validator,
    };
    let app = api_router(state.clone()).merge(admin_router(state));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, anonymous = cli.anonymous, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// CLI tokens are persisted first (when a store exists), then the pool
/// membership comes from the store so earlier runs survive restarts.
async fn bootstrap_pool(
    cli: &Cli,
    backend_name: &str,
    pool: &CredentialPool,
    storage: Option<&CredentialStorage>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let tokens: Vec<&str> = cli
        .tokens
        .iter()
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .collect();

    match storage {
        Some(storage) => {
            for token in &tokens {
                storage
                    .upsert_credential(backend_name, token, CredentialKind::Unknown, true)
                    .await?;
            }
            let seeds = storage.seeds_for_backend(backend_name).await?;
            info!(event = "pool_bootstrap", credentials = seeds.len());
            pool.reload(seeds);
        }
        None => {
            for token in &tokens {
                pool.insert(*token, CredentialKind::Unknown);
            }
            info!(event = "pool_bootstrap", credentials = tokens.len());
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler means we only stop when killed
        std::future::pending::<()>().await;
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zproxy=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
