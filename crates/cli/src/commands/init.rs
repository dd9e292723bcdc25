//! Initialize ledger command.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tally_core::Keypair;
use tally_ledger::{DataDir, LedgerConfig, StorageBackend, DEFAULT_REQUIRED_SIGNATURES};

#[derive(Clone, Copy, ValueEnum)]
pub enum BackendArg {
    Json,
    Sled,
}

impl From<BackendArg> for StorageBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Json => StorageBackend::Json,
            BackendArg::Sled => StorageBackend::Sled,
        }
    }
}

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Distinct authorized signatures each block needs
    #[arg(short, long, default_value_t = DEFAULT_REQUIRED_SIGNATURES)]
    pub required_signatures: usize,

    /// Number of signing identities to generate and authorize
    #[arg(short, long, default_value = "2")]
    pub signers: usize,

    /// Chain storage backend
    #[arg(long, value_enum, default_value = "json")]
    pub storage: BackendArg,

    /// Name recorded as the author of new blocks
    #[arg(short, long, default_value = "admin")]
    pub author: String,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing tally ledger...".bold().cyan());
    println!();

    let data = DataDir::new(&args.data_dir);
    if data.is_initialized() {
        bail!(
            "A ledger already exists at {}",
            args.data_dir.display()
        );
    }

    let config = LedgerConfig {
        required_signatures: args.required_signatures,
        storage: args.storage.into(),
        author: args.author,
    };
    config.validate()?;

    let keys = data
        .init(&config)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;

    println!("{}  Created data directory", "✓".green().bold());

    println!();
    println!("{}", "Generating signing identities...".bold());

    for i in 1..=args.signers {
        let name = format!("signer-{i}");
        let keypair = Keypair::generate();
        keys.save_identity(&name, &keypair)?;
        keys.authorize(&name, &keypair.public_key)?;

        println!(
            "  {}: {}",
            name,
            keypair.public_key.fingerprint().bright_yellow()
        );
    }

    if args.signers < config.required_signatures {
        println!();
        println!(
            "{}",
            format!(
                "Only {} of {} required signers exist locally; add more with 'tally key'.",
                args.signers, config.required_signatures
            )
            .yellow()
        );
    }

    println!();
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        data.config_path().display().to_string().bright_black()
    );
    println!(
        "    Required signatures: {}",
        config.required_signatures.to_string().bright_cyan()
    );

    println!();
    println!("{}", "Ledger initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to record usage",
        "tally record <subject> <value>".bright_cyan()
    );
    println!(
        "  • Use {} to check the chain",
        "tally verify".bright_cyan()
    );

    Ok(())
}
