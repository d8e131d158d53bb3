use std::net::SocketAddr;
use std::sync::Arc;

use relaykit::config::Config;
use relaykit::credential::CredentialStore;
use relaykit::pool::AccountPool;
use relaykit::quota::QuotaLedger;
use relaykit::server::{AppState, build_router};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let auth_dir = match config.auth_dir_path() {
        Ok(path) => path,
        Err(err) => {
            tracing::error!(error = %err, "failed to resolve auth-dir");
            std::process::exit(1);
        }
    };

    let store = match CredentialStore::open(&auth_dir, &config.generative_language_api_key) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "failed to open credential store");
            std::process::exit(1);
        }
    };

    let ledger = Arc::new(QuotaLedger::new());

    let mut http_builder = reqwest::Client::builder();
    if let Some(proxy_url) = &config.proxy_url {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => http_builder = http_builder.proxy(proxy),
            Err(err) => tracing::warn!(error = %err, "ignoring invalid proxy-url"),
        }
    }
    let http = http_builder.build().expect("failed to build upstream HTTP client");

    let pool = Arc::new(AccountPool::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        http,
        config.quota_exceeded.switch_preview_model,
        config.quota_exceeded.switch_project,
    ));

    let state = AppState {
        pool,
        store,
        ledger,
        config: Arc::new(config.clone()),
    };

    let router = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr = %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %addr, "relaykit listening");

    if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
}
