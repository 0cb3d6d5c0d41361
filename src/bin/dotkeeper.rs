// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotkeeper::{fetch::Git2Fetcher, path::Layout, store::KeepStore};

use anyhow::Result;
use clap::{error::ErrorKind, Parser, Subcommand};
use indicatif::ProgressBar;
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command ran to completion.
const EXIT_SUCCESS: i32 = 0;

/// Command line could not be understood.
const EXIT_USAGE: i32 = 1;

/// Requested operation was aborted.
const EXIT_FAILURE: i32 = 2;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotkeeper <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let layout = Layout::try_default()?;
        if layout.hostname().is_none() {
            warn!("cannot determine hostname, host overlays will not apply");
        }

        match self.command {
            Command::List => run_list(&layout),
            Command::Status => run_status(&layout),
            Command::Activate(opts) => run_activate(&layout, opts),
            Command::Deactivate => run_deactivate(&layout),
            Command::Fetch(opts) => run_fetch(&layout, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List available keeps.
    #[command(override_usage = "dotkeeper list")]
    List,

    /// Show currently active keep.
    #[command(override_usage = "dotkeeper status")]
    Status,

    /// Activate keep, deactivating current keep first.
    #[command(override_usage = "dotkeeper activate <keep_name>")]
    Activate(ActivateOptions),

    /// Deactivate current keep.
    #[command(override_usage = "dotkeeper deactivate")]
    Deactivate,

    /// Fetch keep from remote repository.
    #[command(override_usage = "dotkeeper fetch <url>")]
    Fetch(FetchOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ActivateOptions {
    /// Name of keep to activate.
    #[arg(required = true, value_name = "keep_name")]
    pub keep_name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FetchOptions {
    /// URL of remote to fetch keep from.
    #[arg(required = true, value_name = "url")]
    pub url: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_USAGE,
            };
            let _ = err.print();
            exit(code);
        }
    };

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(EXIT_FAILURE);
    }

    exit(EXIT_SUCCESS)
}

fn run_list(layout: &Layout) -> Result<()> {
    let keeps = KeepStore::open(layout).list_keeps()?;
    if keeps.is_empty() {
        info!("no keeps available in {:?}", layout.keep_store_dir().display());
        return Ok(());
    }

    info!("available keeps:");
    for keep in keeps {
        info!("- {keep}");
    }

    Ok(())
}

fn run_status(layout: &Layout) -> Result<()> {
    let record = KeepStore::open(layout).status()?;
    match record.active.name() {
        Some(name) => {
            info!("active keep: {name} ({} links)", record.links.len());
            for link in &record.links {
                info!("  {link}");
            }
        }
        None => info!("no keep active"),
    }

    Ok(())
}

fn run_activate(layout: &Layout, opts: ActivateOptions) -> Result<()> {
    let report = KeepStore::open(layout).activate(&opts.keep_name)?;

    for link in report.teardown.leftover() {
        warn!("left behind untracked symlink {:?}", link.target.display());
    }
    for failure in report.failures() {
        warn!("{failure}");
    }
    info!(
        "activated keep {}: {} created, {} failed",
        report.keep,
        report.created().len(),
        report.failures().len()
    );

    Ok(())
}

fn run_deactivate(layout: &Layout) -> Result<()> {
    let teardown = KeepStore::open(layout).deactivate()?;

    for link in teardown.leftover() {
        warn!("left behind untracked symlink {:?}", link.target.display());
    }
    info!(
        "deactivated: {} removed, {} skipped, {} failed",
        teardown.removed.len(),
        teardown.skipped.len(),
        teardown.failures.len()
    );

    Ok(())
}

fn run_fetch(layout: &Layout, opts: FetchOptions) -> Result<()> {
    let fetcher = Git2Fetcher::new(ProgressBar::new(0));
    let keep = KeepStore::open(layout).fetch(&opts.url, &fetcher)?;
    info!("fetched keep {} into {:?}", keep.name(), keep.root().display());

    Ok(())
}
