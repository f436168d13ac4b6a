use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use taskflow::api::{AppState, build_router};
use taskflow::auth::{RateLimiter, TokenIssuer};
use taskflow::chat::ChatService;
use taskflow::config::ServerConfig;
use taskflow::llm::create_provider;
use taskflow::store::{Database, LibSqlBackend};
use taskflow::tools::ToolRegistry;
use taskflow::tools::builtin::register_task_tools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("📋 TaskFlow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   API: http://0.0.0.0:{}/api/v1", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Assistant ────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let tools = Arc::new(ToolRegistry::new());
    register_task_tools(&tools, Arc::clone(&db));
    eprintln!("   Tools: {} registered", tools.count());

    let chat = Arc::new(ChatService::new(
        Arc::clone(&db),
        llm,
        tools,
        config.chat.clone(),
    ));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let state = AppState {
        db,
        tokens: TokenIssuer::new(config.jwt_secret.clone(), config.token_ttl),
        rate_limiter: Arc::new(RateLimiter::new(
            config.auth_rate_limit,
            config.auth_rate_window,
        )),
        chat,
    };
    let app = build_router(state, &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "TaskFlow server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Stderr logging, plus a daily-rolling file when a log directory is set.
fn init_tracing(config: &ServerConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_target(false);

    match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "taskflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    eprintln!("\nShutting down...");
}
