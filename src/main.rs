use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use rust_i18n::t;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod deps;
mod evaluate;
mod host;
mod metric;
mod pkg;
mod remediate;
mod report;
mod sources;

use crate::config::Config;
use crate::host::LocalHost;
use crate::remediate::Remediator;
use crate::report::HostSummary;

rust_i18n::i18n!("i18n", fallback = "en");

/// Single-host health check: hardware, storage, packages, containers and
/// network, with optional fixes.
#[derive(Parser)]
#[command(name = "syscheck", version)]
struct Cli {
    /// Apply the available fixes after the report
    #[arg(long)]
    fix: bool,
    /// Do not ask for confirmation before fixing
    #[arg(short, long, requires = "fix")]
    yes: bool,
    /// Read thresholds and collector settings from this file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// List the external tools syscheck uses and exit
    #[arg(long)]
    check_deps: bool,
    /// Report language
    #[arg(long, default_value = "en", value_parser = ["en", "es"])]
    lang: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SYSCHECK_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    init_tracing();
    rust_i18n::set_locale(&cli.lang);

    let host = LocalHost::new();
    if cli.check_deps {
        deps::check_deps(&host);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context(t!("config_invalid").to_string())?;
    let thresholds = config.thresholds()?;
    deps::require_baseline(&host)?;

    let collection = sources::collect_all(&host, &config);
    info!(
        metrics = collection.metrics.len(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "collection finished"
    );

    let evaluation = evaluate::evaluate(&collection.metrics, &thresholds);
    print!("{}", report::render_report(&HostSummary::gather(), &evaluation));

    let plan = remediate::plan(&evaluation.issues);
    if plan.is_empty() {
        return Ok(());
    }
    if !cli.fix {
        println!("\n{}", report::render_plan_hint(&plan));
        return Ok(());
    }

    // Without a terminal there is nobody to ask
    if !cli.yes && io::stdin().is_terminal() {
        let actions: Vec<String> = plan.iter().map(|action| action.title()).collect();
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("apply_fix_prompt", actions = actions.join(", ")).to_string())
            .default(false)
            .interact()?;
        if !proceed {
            println!("{}", t!("fix_declined").to_string().dimmed());
            return Ok(());
        }
    }

    let remediator = Remediator::new(&host, &collection.facts);
    let reports = remediator.execute(&plan, |command| {
        println!("{}", t!("running_step", command = command).to_string().dimmed());
    });
    let reboot = remediate::reboot_recommended(&collection.metrics, &reports);
    print!("{}", report::render_remediation(&reports, reboot));

    info!(
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "run finished"
    );
    Ok(())
}
