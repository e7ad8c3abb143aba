use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use haven_config::HavenConfig;
use haven_notify::{Notifier, NullNotifier, SlackNotifier};
use haven_store::{ResourceStore, SqliteResourceStore};
use rest_api::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Listen address for the HTTP API; overrides HAVEN_API_ADDR.
    #[arg(long)]
    api_addr: Option<String>,
    /// SQLite database path; overrides HAVEN_DB_PATH.
    #[arg(long)]
    db_path: Option<String>,
    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let o11y_cfg = o11y::O11yConfig {
        logging: o11y::logging::Config {
            level: None,
            json: args.json_logs,
            with_targets: false,
        },
        metrics: o11y::haven_metrics::Config { enable: true },
        install_panic_hook: true,
    };
    let _ = o11y::init_all(&o11y_cfg);

    let cfg = HavenConfig::load().context("load configuration")?;
    let db_path = args.db_path.unwrap_or_else(|| cfg.database.path.clone());
    let api_addr = args.api_addr.unwrap_or_else(|| cfg.api.addr.clone());

    if let Some(parent) = std::path::Path::new(&db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("create database directory")?;
    }
    let store: Arc<dyn ResourceStore> =
        Arc::new(SqliteResourceStore::new(&db_path).context("open resource store")?);

    let notifier: Arc<dyn Notifier> = match (
        &cfg.notifications.slack_token,
        &cfg.notifications.slack_channel_id,
    ) {
        (Some(token), Some(channel)) if cfg.notifications.is_configured() => {
            info!(%channel, "slack notifications enabled");
            Arc::new(SlackNotifier::new(token, channel))
        }
        _ => {
            info!("slack not configured, notifications disabled");
            Arc::new(NullNotifier)
        }
    };

    let state = AppState { store, notifier };
    let app: Router = rest_api::router(state).merge(o11y::haven_metrics::router_with_metrics());

    let addr: SocketAddr = api_addr.parse().context("api addr must be host:port")?;
    info!(%addr, %db_path, "haven api listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
