//! Block operations command.

use super::Workspace;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tally_core::{Block, Keypair};
use tally_ledger::DataDir;

/// How often `record` rebuilds its block when another append wins the race.
const RECORD_ATTEMPTS: usize = 3;

#[derive(Args)]
pub struct RecordArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Identifier of the metered resource
    pub subject: String,

    /// New cumulative usage value
    pub new_value: u64,

    /// Identity to sign with (repeatable; default: every local identity)
    #[arg(short, long = "signer")]
    pub signers: Vec<String>,
}

#[derive(Args)]
pub struct SubmitArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Block in JSON wire format
    pub file: PathBuf,
}

#[derive(Args)]
pub struct CosignArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Block in JSON wire format; rewritten in place
    pub file: PathBuf,

    /// Identity to sign with
    #[arg(short, long)]
    pub signer: String,
}

pub fn record(args: RecordArgs) -> Result<()> {
    let ws = Workspace::open(&args.data_dir)?;
    let identities = load_signers(&ws.data, &args.signers)?;
    let authorized = ws.authorized()?;

    // Fail fast on a decrease or no-op.
    let preview = ws
        .ledger
        .usage()
        .propose(&args.subject, args.new_value, &ws.config.author)?;

    println!("{}", "Recording usage...".bold().cyan());
    println!();
    println!("  Subject: {}", args.subject.bright_yellow());
    println!(
        "  Value:   {} → {}",
        preview.old_value.to_string().bright_black(),
        preview.new_value.to_string().bright_cyan()
    );
    println!(
        "  Signers: {}",
        identities.len().to_string().bright_cyan()
    );

    let tip = ws
        .ledger
        .append_with_retry(
            |prev_hash, usage| {
                let update = usage.propose(&args.subject, args.new_value, &ws.config.author)?;
                Ok(Block::build(update, prev_hash, identities.iter())?)
            },
            &authorized,
            ws.config.required_signatures,
            RECORD_ATTEMPTS,
        )
        .context("Block was not appended")?;

    println!();
    println!("{}  Block appended", "✓".green().bold());
    println!("    Hash:  {}", tip.bright_yellow());
    if let Some(block) = ws.ledger.tip() {
        if block.old_value != preview.old_value {
            println!(
                "    Value: {} → {} (another writer recorded {} first)",
                block.old_value.to_string().bright_black(),
                block.new_value.to_string().bright_cyan(),
                block.old_value
            );
        }
    }
    println!(
        "    Index: {}",
        (ws.ledger.len() - 1).to_string().bright_cyan()
    );
    println!();

    Ok(())
}

pub fn submit(args: SubmitArgs) -> Result<()> {
    let block = read_block(&args.file)?;
    let ws = Workspace::open(&args.data_dir)?;
    let authorized = ws.authorized()?;

    let tip = ws
        .ledger
        .append(block, &authorized, ws.config.required_signatures)
        .context("Block was not appended")?;

    println!("{}  Block appended", "✓".green().bold());
    println!("    Hash: {}", tip.bright_yellow());
    Ok(())
}

pub fn cosign(args: CosignArgs) -> Result<()> {
    let mut block = read_block(&args.file)?;
    if !block.hash_matches() {
        bail!("Refusing to sign: block hash does not match its content");
    }

    let identity = DataDir::new(&args.data_dir)
        .key_store()
        .load_identity(&args.signer)
        .with_context(|| format!("Failed to load identity '{}'", args.signer))?;
    let pem = identity.public_key_pem()?;
    if block.signer_keys.contains(&pem) {
        bail!("'{}' has already signed this block", args.signer);
    }

    block.add_signature(&identity)?;
    fs::write(&args.file, block.to_json()?)
        .with_context(|| format!("Failed to write {}", args.file.display()))?;

    println!(
        "{}  Signed by {} ({} signatures)",
        "✓".green().bold(),
        args.signer.bright_yellow(),
        block.signatures.len().to_string().bright_cyan()
    );
    Ok(())
}

fn read_block(path: &Path) -> Result<Block> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Block::from_json(&contents).with_context(|| format!("Invalid block in {}", path.display()))
}

fn load_signers(data: &DataDir, names: &[String]) -> Result<Vec<Keypair>> {
    let keys = data.key_store();
    let identities: Vec<Keypair> = if names.is_empty() {
        keys.load_identities()?
            .into_iter()
            .map(|(_, keypair)| keypair)
            .collect()
    } else {
        names
            .iter()
            .map(|name| {
                keys.load_identity(name)
                    .with_context(|| format!("Failed to load identity '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?
    };

    if identities.is_empty() {
        bail!("No signing identities found. Use 'tally key new' to create one.");
    }
    Ok(identities)
}
