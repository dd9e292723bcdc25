//! CLI commands module.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::Path;
use tally_consensus::AuthorizedKeys;
use tally_ledger::{DataDir, Ledger, LedgerConfig};

mod block;
mod chain;
mod init;
mod key;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new ledger
    Init(init::InitArgs),
    /// Signing identity and authorized key management
    Key(key::KeyArgs),
    /// Record a new usage value for a subject
    Record(block::RecordArgs),
    /// Append a block from a JSON file
    Submit(block::SubmitArgs),
    /// Add a signature to a block file
    Cosign(block::CosignArgs),
    /// Show recent blocks
    Show(chain::ShowArgs),
    /// Verify the whole chain
    Verify(chain::VerifyArgs),
    /// Show the latest usage per subject
    Usage(chain::UsageArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args),
        Commands::Key(args) => key::run(args),
        Commands::Record(args) => block::record(args),
        Commands::Submit(args) => block::submit(args),
        Commands::Cosign(args) => block::cosign(args),
        Commands::Show(args) => chain::show(args),
        Commands::Verify(args) => chain::verify(args),
        Commands::Usage(args) => chain::usage(args),
    }
}

/// An initialized ledger together with its config and key registry.
pub(crate) struct Workspace {
    pub data: DataDir,
    pub config: LedgerConfig,
    pub ledger: Ledger,
}

impl Workspace {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let data = DataDir::new(data_dir);
        let (config, ledger) = data
            .open_ledger()
            .with_context(|| "Failed to open ledger. Did you run 'tally init'?")?;
        Ok(Self {
            data,
            config,
            ledger,
        })
    }

    /// Fresh snapshot of the authorized key registry.
    pub fn authorized(&self) -> Result<AuthorizedKeys> {
        self.data
            .authorized_keys()
            .with_context(|| "Failed to load authorized keys")
    }
}
