//! aimi-db - inspect and edit the import fingerprint database

use aimi_import::config::{ImportConfig, TomlConfig, CliOverrides};
use aimi_import::db::SqliteStore;
use aimi_import::models::{FileIdentity, ImportRecord, ImportStatus};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "aimi-db", version, about = "Inspect the aimi import database")]
struct Cli {
    /// Fingerprint database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true, env = "AIMI_CONFIG")]
    config: Option<PathBuf>,

    /// Do not ask before deleting
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List records
    List {
        /// Only records with this status (pending, bulk_skipped, resolved, failed)
        #[arg(long)]
        status: Option<ImportStatus>,
    },
    /// Records whose artist, title or original file name contains TERM
    Search { term: String },
    /// Delete one record so the file is processed again
    Delete { identity: FileIdentity },
    /// Delete every bulk-skipped record
    PurgeBulk,
    /// Record counts per status
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml = TomlConfig::load(cli.config.as_deref())?;
    aimi_import::init_tracing(&toml.logging.level, false);

    let overrides = CliOverrides {
        database_path: cli.db.clone(),
        ..Default::default()
    };
    let config = ImportConfig::resolve(&overrides, toml)?;

    if !config.database_path.exists() {
        anyhow::bail!("Database not found: {}", config.database_path.display());
    }
    let store = SqliteStore::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut out = std::io::stdout();

    match cli.command {
        Command::List { status } => {
            let records = store.list(status).await?;
            print_records(&mut out, &records)?;
        }
        Command::Search { term } => {
            let records = store.search(&term).await?;
            print_records(&mut out, &records)?;
        }
        Command::Delete { identity } => {
            let question = format!("Delete record {}?", identity);
            if cli.yes || confirm(&question, &mut input, &mut out)? {
                if store.delete(&identity).await? {
                    writeln!(out, "Deleted {}", identity)?;
                } else {
                    writeln!(out, "No record for {}", identity)?;
                }
            } else {
                writeln!(out, "Cancelled")?;
            }
        }
        Command::PurgeBulk => {
            if cli.yes || confirm("Delete every bulk-skipped record?", &mut input, &mut out)? {
                let removed = store.purge_bulk().await?;
                writeln!(out, "Deleted {} bulk-skipped records", removed)?;
            } else {
                writeln!(out, "Cancelled")?;
            }
        }
        Command::Stats => {
            let counts = store.count_by_status().await?;
            let total: i64 = counts.iter().map(|(_, n)| n).sum();
            for (status, count) in counts {
                writeln!(out, "{:<14} {:>8}", status, count)?;
            }
            writeln!(out, "{:<14} {:>8}", "total", total)?;
        }
    }

    Ok(())
}

fn print_records(out: &mut impl Write, records: &[ImportRecord]) -> Result<()> {
    if records.is_empty() {
        writeln!(out, "No records")?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<12}  {:<12}  {:>3}  {:<30}  {:<30}  {}",
        "IDENTITY", "STATUS", "TRY", "ARTIST", "TITLE", "ORIGINAL NAME"
    )?;
    for record in records {
        let (artist, title) = record
            .metadata
            .as_ref()
            .map(|m| (m.artist.as_str(), m.title.as_str()))
            .unwrap_or(("-", "-"));
        writeln!(
            out,
            "{:<12}  {:<12}  {:>3}  {:<30}  {:<30}  {}",
            record.identity.short(),
            record.status,
            record.attempt_count,
            clip(artist, 30),
            clip(title, 30),
            record.original_name
        )?;
    }
    writeln!(out, "{} records", records.len())?;
    Ok(())
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(width - 1).collect();
        clipped.push('…');
        clipped
    }
}

fn confirm(question: &str, input: &mut impl BufRead, out: &mut impl Write) -> Result<bool> {
    write!(out, "{} [y/N] ", question)?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
