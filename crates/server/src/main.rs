//! tally HTTP server entry point.

mod error;
mod routes;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tally_ledger::DataDir;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "tally-server")]
#[command(about = "Serve a tally ledger over HTTP", long_about = None)]
struct Args {
    /// Directory holding ledger data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Identity whose public key is served (default: first local identity)
    #[arg(short, long)]
    identity: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let data = DataDir::new(&args.data_dir);
    let (config, ledger) = data
        .open_ledger()
        .with_context(|| format!("Failed to open ledger at {}", args.data_dir.display()))?;

    let authorized = data
        .authorized_keys()
        .context("Failed to load authorized keys")?;
    info!(
        blocks = ledger.len(),
        authorized = authorized.len(),
        required = config.required_signatures,
        "loaded ledger"
    );
    let check = ledger.verify_all(&authorized, config.required_signatures);
    if !check.is_valid() {
        warn!("serving a chain that does not verify; see /api/verify_chain");
    }

    let state = AppState::new(data, config, ledger, args.identity);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
