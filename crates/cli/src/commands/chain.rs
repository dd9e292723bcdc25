//! Chain inspection commands.

use super::Workspace;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct ShowArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Number of blocks to show
    #[arg(short, long, default_value = "10")]
    pub count: usize,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,
}

#[derive(Args)]
pub struct UsageArgs {
    /// Directory to store ledger data
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Only show this subject
    pub subject: Option<String>,
}

pub fn show(args: ShowArgs) -> Result<()> {
    let ws = Workspace::open(&args.data_dir)?;
    let chain = ws.ledger.chain();

    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();

    if chain.is_empty() {
        println!("  {}", "(empty chain)".bright_black());
    }

    let start = chain.len().saturating_sub(args.count);
    for (index, block) in chain.iter().enumerate().skip(start).rev() {
        println!(
            "  {} {} {} {} → {} {}",
            format!("#{}", index).bright_black(),
            short_hash(&block.hash).bright_yellow(),
            block.subject_id.bright_cyan(),
            block.old_value,
            block.new_value,
            format!("({} sigs, {})", block.signatures.len(), block.timestamp).bright_black()
        );
    }

    println!();
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

pub fn verify(args: VerifyArgs) -> Result<()> {
    let ws = Workspace::open(&args.data_dir)?;
    let authorized = ws.authorized()?;
    let result = ws
        .ledger
        .verify_all(&authorized, ws.config.required_signatures);

    match &result.first_invalid {
        None => {
            println!(
                "{}  Chain verified ({} blocks, {} signatures required)",
                "✓".green().bold(),
                result.length.to_string().bright_cyan(),
                ws.config.required_signatures
            );
            Ok(())
        }
        Some(failure) => {
            println!(
                "{}  Chain invalid at block {}: {}",
                "✗".red().bold(),
                failure.index.to_string().bright_yellow(),
                failure.kind
            );
            bail!("verification failed at block {}", failure.index)
        }
    }
}

pub fn usage(args: UsageArgs) -> Result<()> {
    let ws = Workspace::open(&args.data_dir)?;
    let table = ws.ledger.usage();

    if let Some(subject) = args.subject {
        println!("{}", table.current(&subject));
        return Ok(());
    }

    println!();
    println!("{}", "Usage:".bold().cyan());
    println!();
    if table.is_empty() {
        println!("  {}", "(nothing recorded)".bright_black());
    }
    for (subject, value) in table.iter() {
        println!(
            "  {:<24} {}",
            subject.bright_yellow(),
            value.to_string().bright_cyan()
        );
    }
    println!();
    Ok(())
}
