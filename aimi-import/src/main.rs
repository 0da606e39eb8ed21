//! aimi-import - AI-assisted music importer
//!
//! Scans a download directory and imports every file not seen before:
//! resolves clean metadata with an AI backend, tags the file and places it
//! in the library. Re-running over the same directory is a no-op for files
//! already handled.
//!
//! Exit codes: 0 success, 1 aborted run or configuration error, 2 missing
//! source directory or declined confirmation.

use aimi_import::config::{CliOverrides, ImportConfig, TomlConfig};
use aimi_import::db::SqliteStore;
use aimi_import::error::EXIT_OK;
use aimi_import::models::RunSummary;
use aimi_import::services::{
    bulk_import, dry_run, DriverOptions, FileScanner, FingerprintStore, ImportDriver,
    LibraryWriter, MemoryStore, PlacementMode, ResolverChain, ScanError,
};
use aimi_import::ImportError;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "aimi-import", version, about = "Import downloaded audio into the music library")]
struct Cli {
    /// Directory holding downloaded audio files
    source: PathBuf,

    /// Music library root (required for a normal run)
    dest: Option<PathBuf>,

    /// Scan and classify only: no store writes, no AI calls, no file writes
    #[arg(long)]
    dry_run: bool,

    /// Mark every file under SOURCE as already handled without resolving it
    #[arg(long, conflicts_with = "dry_run")]
    bulk_import: bool,

    /// Verbose logging for the importer
    #[arg(long)]
    debug: bool,

    /// Configuration file (default: ~/.config/aimi/config.toml)
    #[arg(long, env = "AIMI_CONFIG")]
    config: Option<PathBuf>,

    /// Fingerprint database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Resolution attempts allowed per file over the store's lifetime
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds allowed for one resolution call
    #[arg(long)]
    timeout: Option<u64>,

    /// Keep (copy) or delete (move) the source after a successful import
    #[arg(long, value_enum)]
    placement: Option<PlacementMode>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::from(EXIT_OK as u8),
        Err(e) => {
            if let Some(summary) = e.summary() {
                println!("{}", summary);
            }
            error!("{}", e);
            eprintln!("aimi-import: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), ImportError> {
    let toml = TomlConfig::load(cli.config.as_deref())?;
    aimi_import::init_tracing(&toml.logging.level, cli.debug);

    info!("Starting aimi-import");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let overrides = CliOverrides {
        database_path: cli.db.clone(),
        max_attempts: cli.max_attempts,
        resolve_timeout_secs: cli.timeout,
        placement: cli.placement,
    };
    let config = ImportConfig::resolve(&overrides, toml)?;
    info!("Database: {}", config.database_path.display());

    check_source(&cli.source)?;
    let scanner = FileScanner::with_extensions(&config.audio_extensions);

    let summary = if cli.dry_run {
        run_dry(&config, &scanner, &cli.source).await?
    } else if cli.bulk_import {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        if !confirm_bulk_import(&cli.source, &mut stdin.lock(), &mut stdout) {
            return Err(ImportError::Declined);
        }
        let store = SqliteStore::open(&config.database_path).await?;
        bulk_import(
            &store,
            &scanner,
            &cli.source,
            config.max_consecutive_store_errors,
        )
        .await?
    } else {
        let dest = cli.dest.clone().ok_or_else(|| {
            aimi_common::Error::Config("Destination library directory is required".to_string())
        })?;
        run_import(&config, scanner, &cli.source, dest).await?
    };

    println!("{}", summary);
    Ok(())
}

async fn run_import(
    config: &ImportConfig,
    scanner: FileScanner,
    source: &Path,
    dest: PathBuf,
) -> Result<RunSummary, ImportError> {
    config.validate_for_resolution()?;

    let resolver = ResolverChain::from_settings(&config.resolvers, config.resolve_timeout)?;
    info!(backends = resolver.len(), "Resolver ready");

    let store = SqliteStore::open(&config.database_path).await?;
    let driver = ImportDriver::new(
        Arc::new(store),
        Arc::new(resolver),
        Arc::new(LibraryWriter::new(dest)),
        scanner,
        DriverOptions::from_config(config),
    );

    driver.run(source).await
}

/// Dry runs never create the database
async fn run_dry(
    config: &ImportConfig,
    scanner: &FileScanner,
    source: &Path,
) -> Result<RunSummary, ImportError> {
    let store: Box<dyn FingerprintStore> = if config.database_path.exists() {
        Box::new(SqliteStore::open(&config.database_path).await?)
    } else {
        info!("No database yet; every file counts as new");
        Box::new(MemoryStore::new())
    };

    dry_run(
        store.as_ref(),
        scanner,
        source,
        config.max_attempts,
        config.max_consecutive_store_errors,
    )
    .await
}

fn check_source(source: &Path) -> Result<(), ImportError> {
    if !source.exists() {
        return Err(ScanError::PathNotFound(source.to_path_buf()).into());
    }
    if !source.is_dir() {
        return Err(ScanError::NotADirectory(source.to_path_buf()).into());
    }
    Ok(())
}

/// Ask the operator to confirm a bulk import; only `y` or `yes` proceeds
fn confirm_bulk_import(source: &Path, input: &mut impl BufRead, output: &mut impl Write) -> bool {
    let prompt = format!(
        "Bulk import marks every audio file under {} as already imported.\n\
         These files will never be sent for metadata resolution.\n\
         Proceed? [y/N] ",
        source.display()
    );
    if output
        .write_all(prompt.as_bytes())
        .and_then(|()| output.flush())
        .is_err()
    {
        return false;
    }

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}
