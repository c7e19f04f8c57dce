use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tingxie_backend::config::Config;
use tingxie_backend::db::DatabaseProxy;
use tingxie_backend::state::AppState;
use tingxie_backend::workers::WorkerManager;
use tingxie_backend::{backup, create_app, import, logging};

/// 听写小程序后端
#[derive(Parser, Debug)]
#[command(name = "tingxie-backend", version, about = "Dictation backend for the tingxie mini-program")]
struct Cli {
    /// Bind host, overrides HOST
    #[arg(long, global = true)]
    host: Option<IpAddr>,

    /// Bind port, overrides PORT
    #[arg(long, global = true)]
    port: Option<u16>,

    /// SQLite URL, overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending schema migrations and exit
    Migrate,
    /// Import curriculum words from a JSON file
    Import {
        file: PathBuf,
    },
    /// Write a database backup and prune old ones
    Backup {
        #[arg(long, env = "BACKUP_DIR")]
        dir: Option<PathBuf>,
        #[arg(long, env = "BACKUP_KEEP")]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let _log_guard = logging::init_tracing(&config.log_level, config.file_log_dir.as_deref());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            DatabaseProxy::from_config(&config)
                .await
                .context("failed to open database")?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Import { file } => {
            let db = DatabaseProxy::from_config(&config)
                .await
                .context("failed to open database")?;
            let report = import::import_file(db.pool(), &file)
                .await
                .with_context(|| format!("import of {} failed", file.display()))?;
            println!(
                "inserted {}, updated {}, skipped {}",
                report.inserted, report.updated, report.skipped
            );
            Ok(())
        }
        Command::Backup { dir, keep } => {
            let dir = dir.unwrap_or(config.backup.dir.clone());
            let keep = keep.unwrap_or(config.backup.keep);
            let db = DatabaseProxy::from_config(&config)
                .await
                .context("failed to open database")?;
            let path = backup::backup_database(db.pool(), &dir)
                .await
                .context("backup failed")?;
            let removed = backup::prune_backups(&dir, keep)
                .await
                .context("pruning old backups failed")?;
            println!("backup written to {} ({removed} old backups removed)", path.display());
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let db_proxy = match DatabaseProxy::from_config(&config).await {
        Ok(proxy) => Some(proxy),
        Err(err) => {
            tracing::warn!(error = %err, "database not initialized, serving in degraded mode");
            None
        }
    };

    let worker_manager = match db_proxy.as_ref() {
        Some(proxy) => match WorkerManager::new(Arc::clone(proxy), &config).await {
            Ok(manager) => {
                if let Err(e) = manager.start().await {
                    tracing::error!(error = %e, "failed to start workers");
                }
                Some(manager)
            }
            Err(e) => {
                tracing::warn!(error = %e, "worker manager not initialized");
                None
            }
        },
        None => None,
    };

    let addr: SocketAddr = config.bind_addr();
    let app = create_app(AppState::new(config, db_proxy));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "tingxie-backend listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("HTTP server stopped, initiating graceful shutdown sequence");
    if let Some(manager) = worker_manager.as_ref() {
        manager.stop().await;
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
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
