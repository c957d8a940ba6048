//! evilmsg server
//!
//! Serves the project/hit API, accepts beacon callbacks and builds beacons
//! on demand.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use evilmsg_core::config::{Config, default_database_path, load_config};
use evilmsg_core::tracing_init::init_tracing;
use evilmsg_server::builder::{BeaconBuilder, CallbackEndpoint};
use evilmsg_server::routes::{AppState, build_router};
use evilmsg_server::storage::AppDatabase;

#[derive(Parser, Debug)]
#[command(name = "evilmsg-server")]
#[command(version, about = "evilmsg server - project/hit tracking and beacon builds")]
struct Args {
    /// Listen address [default: 0.0.0.0:3000]
    #[arg(long, env = "EVILMSG_ADDR")]
    addr: Option<SocketAddr>,

    /// Host embedded in beacon callback URLs [default: 127.0.0.1]
    #[arg(long)]
    hit_host: Option<String>,

    /// Port embedded in beacon callback URLs (defaults to the listen port)
    #[arg(long)]
    hit_port: Option<u16>,

    /// Database file path [default: ~/.evilmsg/evilmsg.db]
    #[arg(long, env = "EVILMSG_DB_PATH")]
    db_path: Option<PathBuf>,

    /// JSON settings file (defaults to the global settings file, if any)
    #[arg(long, env = "EVILMSG_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory of the beacon build
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Build tool to run [default: make]
    #[arg(long)]
    build_program: Option<PathBuf>,

    /// Seconds before a beacon build is killed [default: 120]
    #[arg(long)]
    build_timeout: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "EVILMSG_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Command-line flags win over the settings file and environment.
    fn apply(self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.server.listen_addr = addr;
        }
        if let Some(host) = self.hit_host {
            config.server.hit_host = host;
        }
        if let Some(port) = self.hit_port {
            config.server.hit_port = Some(port);
        }
        if let Some(path) = self.db_path {
            config.server.database_path = Some(path);
        }
        if let Some(dir) = self.build_dir {
            config.builder.work_dir = dir;
        }
        if let Some(program) = self.build_program {
            config.builder.program = program;
        }
        if let Some(secs) = self.build_timeout {
            config.builder.timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("evilmsg_server=info,tower_http=info", args.log_json)?;

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let db_path = match config.server.database_path.clone() {
        Some(path) => path,
        None => default_database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = AppDatabase::open(&db_path).await?;

    let shutdown = CancellationToken::new();
    let callback = CallbackEndpoint::new(
        config.server.hit_host.clone(),
        config.server.callback_port(),
    );
    let builder = BeaconBuilder::new(&config.builder, callback, shutdown.clone());
    info!(
        hit_host = %builder.callback().host,
        hit_port = builder.callback().port,
        program = %config.builder.program.display(),
        work_dir = %config.builder.work_dir.display(),
        "Beacon builder ready"
    );

    let app = build_router(AppState::new(db.clone(), builder), &config.server);

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "evilmsg server listening");

    let signal = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
            () = signal.cancelled() => {}
        }
        signal.cancel();
    })
    .await?;

    shutdown.cancel();
    db.close().await;
    info!("evilmsg server stopped");
    Ok(())
}
