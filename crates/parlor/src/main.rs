//! Parlor server entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parlor::backend::CliClientFactory;
use parlor_server::{ServerContext, router};
use parlor_settings::ParlorSettings;
use parlor_store::SessionStore;
use tracing::info;

/// Real-time conversational-agent backend.
#[derive(Debug, Parser)]
#[command(name = "parlor", version, about)]
struct Args {
    /// Bind host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path; `:memory:` for an ephemeral run.
    #[arg(long)]
    db: Option<String>,

    /// Log level when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Execution backend command to spawn per conversation.
    #[arg(long, default_value = "claude")]
    backend_cmd: String,
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_owned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings: ParlorSettings = (*parlor_settings::get_settings()).clone();
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(db) = args.db {
        settings.storage.db_path = db;
    }
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    parlor_core::logging::init(&settings.logging.level);
    parlor_settings::init_settings(settings.clone());

    let db_path = expand_home(&settings.storage.db_path);
    if db_path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = Arc::new(
        SessionStore::open(&db_path).with_context(|| format!("failed to open {db_path}"))?,
    );
    info!(db_path, "store ready");

    let factory = Arc::new(CliClientFactory::new(args.backend_cmd));
    let ctx = ServerContext::new(store, factory);
    let app = router(Arc::clone(&ctx));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr, "parlor listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    ctx.shutdown();
    info!("goodbye");
    Ok(())
}
