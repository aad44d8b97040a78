//! CLI entry point for flight-archive
//!
//! Read-only inspection of campaign archives:
//!
//! ```bash
//! flight-archive list campaign.h5
//! flight-archive show campaign.h5 --group 20220601_090000
//! flight-archive check campaign.h5
//! flight-archive config
//! ```
//!
//! Relative archive names resolve under `<base_data_path>/Processed/` when the
//! configuration sets a base path.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use flight_archive::config::{ArchiveConfig, DEFAULT_CONFIG_PATH};
use flight_archive::{logging, CampaignArchive, ColumnDict, OpenMode, Validity};

#[derive(Parser)]
#[command(name = "flight-archive")]
#[command(about = "Inspect airborne campaign archives", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the groups of an archive
    List {
        /// Archive path or name
        archive: PathBuf,
    },

    /// Show columns, units and extras of one group
    Show {
        /// Archive path or name
        archive: PathBuf,

        /// Group to show (defaults to the first group)
        #[arg(long)]
        group: Option<String>,
    },

    /// Exit with an error if the archive is missing or malformed
    Check {
        /// Archive path or name
        archive: PathBuf,
    },

    /// Print the effective configuration, environment overrides applied
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ArchiveConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::List { archive } => list(&config, &archive),
        Commands::Show { archive, group } => show(&config, &archive, group.as_deref()),
        Commands::Check { archive } => check(&config, &archive),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open(config: &ArchiveConfig, name: &Path) -> Result<CampaignArchive> {
    let path = config.resolve_archive_path(name);
    let archive = CampaignArchive::open(
        &path,
        OpenMode::Read,
        config.archive_settings()?,
        Arc::new(config.flag_registry()?),
    )?;
    Ok(archive)
}

fn list(config: &ArchiveConfig, name: &Path) -> Result<ExitCode> {
    let mut archive = open(config, name)?;
    println!("{}: {}", archive.path().display(), archive.validity());
    if archive.is_valid() {
        for group in archive.group_names()? {
            println!("  {group}");
        }
    }
    archive.close()?;
    Ok(ExitCode::SUCCESS)
}

fn show(config: &ArchiveConfig, name: &Path, group: Option<&str>) -> Result<ExitCode> {
    let mut archive = open(config, name)?;
    let (group, dict) = match group {
        Some(group) => (group.to_string(), archive.read_group(group)?),
        None => {
            let first = archive
                .group_names()?
                .into_iter()
                .next()
                .with_context(|| format!("{} has no groups", archive.path().display()))?;
            let dict = archive.read_group(&first)?;
            (first, dict)
        }
    };
    print_group(&group, &dict);
    archive.close()?;
    Ok(ExitCode::SUCCESS)
}

fn print_group(group: &str, dict: &ColumnDict) {
    println!("group {group}");
    println!("  date_time: {}", dict.date_time().to_rfc3339());
    println!("  rows: {}", dict.len());
    println!("  columns:");
    for column in dict.columns() {
        let width = if column.width() > 1 {
            format!(" x{}", column.width())
        } else {
            String::new()
        };
        println!(
            "    {}{} [{}]",
            column.name().unwrap_or("?"),
            width,
            column.unit().unwrap_or("-")
        );
    }
    if !dict.extras().is_empty() {
        println!("  extras:");
        for (tag, value) in dict.extras() {
            let unit = dict
                .registry()
                .canonical_unit(tag)
                .map(str::to_string)
                .unwrap_or_else(|_| "-".to_string());
            println!("    {tag} = {value} [{unit}]");
        }
    }
}

fn check(config: &ArchiveConfig, name: &Path) -> Result<ExitCode> {
    let mut archive = open(config, name)?;
    let status = match archive.validity() {
        Validity::Valid => {
            println!(
                "{}: valid, {} groups",
                archive.path().display(),
                archive.group_names()?.len()
            );
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("{}: {other}", archive.path().display());
            ExitCode::FAILURE
        }
    };
    archive.close()?;
    Ok(status)
}
