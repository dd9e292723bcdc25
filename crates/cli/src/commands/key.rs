//! Signing identity and authorized key management command.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tally_core::Keypair;
use tally_ledger::DataDir;

#[derive(Args)]
pub struct KeyArgs {
    #[command(subcommand)]
    command: KeyCommand,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Generate a new signing identity
    New {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Name of the identity
        name: String,

        /// Also add its public key to the authorized registry
        #[arg(long)]
        authorize: bool,
    },
    /// List signing identities and authorized keys
    List {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Add a PEM public key to the authorized registry
    Authorize {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Name to store the key under
        name: String,

        /// File holding the PEM public key
        pem_file: PathBuf,
    },
    /// Print an identity's PEM public key
    Export {
        /// Directory to store ledger data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Name of the identity
        name: String,
    },
}

pub fn run(args: KeyArgs) -> Result<()> {
    match args.command {
        KeyCommand::New {
            data_dir,
            name,
            authorize,
        } => new_identity(data_dir, name, authorize),
        KeyCommand::List { data_dir } => list_keys(data_dir),
        KeyCommand::Authorize {
            data_dir,
            name,
            pem_file,
        } => authorize_key(data_dir, name, pem_file),
        KeyCommand::Export { data_dir, name } => export_key(data_dir, name),
    }
}

fn new_identity(data_dir: PathBuf, name: String, authorize: bool) -> Result<()> {
    let keys = DataDir::new(data_dir).key_store();
    if keys.list_identities()?.contains(&name) {
        bail!("Identity '{}' already exists", name);
    }

    let keypair = Keypair::generate();
    let path = keys
        .save_identity(&name, &keypair)
        .with_context(|| format!("Failed to save identity '{}'", name))?;

    println!("{}", "Generated new signing identity:".bold().cyan());
    println!();
    println!("  Name:        {}", name.bright_yellow());
    println!(
        "  Fingerprint: {}",
        keypair.public_key.fingerprint().bright_yellow()
    );
    println!();
    println!(
        "{}  Saved to: {}",
        "✓".green().bold(),
        path.display().to_string().bright_black()
    );

    if authorize {
        keys.authorize(&name, &keypair.public_key)?;
        println!("{}  Added to the authorized registry", "✓".green().bold());
    }

    println!();
    println!("{}", "Keep your private key safe!".yellow().bold());
    Ok(())
}

fn list_keys(data_dir: PathBuf) -> Result<()> {
    let keys = DataDir::new(data_dir).key_store();

    println!();
    println!("{}", "Signing identities:".bold().cyan());
    let identities = keys.load_identities()?;
    if identities.is_empty() {
        println!("  {}", "(none)".bright_black());
    }
    for (name, keypair) in &identities {
        println!(
            "  {} {}",
            name.bright_yellow(),
            keypair.public_key.fingerprint().bright_black()
        );
    }

    println!();
    println!("{}", "Authorized keys:".bold().cyan());
    let names = keys.list_authorized()?;
    let authorized = keys
        .load_authorized()
        .with_context(|| "Failed to load authorized keys")?;
    if names.is_empty() {
        println!("  {}", "(none)".bright_black());
    }
    for (name, key) in names.iter().zip(&authorized) {
        println!(
            "  {} {}",
            name.bright_yellow(),
            key.fingerprint().bright_black()
        );
    }

    println!();
    Ok(())
}

fn authorize_key(data_dir: PathBuf, name: String, pem_file: PathBuf) -> Result<()> {
    let pem = fs::read_to_string(&pem_file)
        .with_context(|| format!("Failed to read {}", pem_file.display()))?;

    let keys = DataDir::new(data_dir).key_store();
    let key = keys
        .authorize_pem(&name, &pem)
        .with_context(|| format!("Failed to authorize key from {}", pem_file.display()))?;

    println!(
        "{}  Authorized {} ({})",
        "✓".green().bold(),
        name.bright_yellow(),
        key.fingerprint().bright_black()
    );
    Ok(())
}

fn export_key(data_dir: PathBuf, name: String) -> Result<()> {
    let keys = DataDir::new(data_dir).key_store();
    let keypair = keys
        .load_identity(&name)
        .with_context(|| format!("Failed to load identity '{}'", name))?;

    print!("{}", keypair.public_key_pem()?);
    Ok(())
}
