mod commands;
mod logging;
mod progress;

use std::process;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{BackupArgs, Cli, Commands, SourceArgs};
use dotenv::dotenv;
use hotcopy_core::scanner;
use hotcopy_core::{AppConfig, DiscoveredItem, HotcopyEngine, RunReport, StoreKind};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match hotcopy_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Backup(backup_args)) => {
            let success = run_backup(config, &backup_args)?;
            if !success {
                process::exit(1);
            }
        }
        Some(Commands::Discover(source_args)) => run_discover(config, &source_args),
        Some(Commands::Verify { source, backup }) => {
            let kind = scanner::classify(&source);
            if kind == StoreKind::Unknown {
                anyhow::bail!("{} is not a recognized store", source.display());
            }
            let item = DiscoveredItem {
                display_name: source
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                source_root: source.clone(),
                size_bytes: 0,
                path: source,
                kind,
            };
            let result = hotcopy_core::verify::verify(&item, &backup);
            if result.passed {
                info!("{} {}", "Backup matches source".green(), backup.display());
            } else {
                error!("{}", "Backup does not match source".red());
                return Err(hotcopy_core::Error::Verification(result.reason.unwrap_or_default()).into());
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_backup(mut config: AppConfig, args: &BackupArgs) -> anyhow::Result<bool> {
    args.apply(&mut config);
    if config.source_paths.is_empty() {
        anyhow::bail!("no source paths given on the command line or in the configuration");
    }

    let strict = config.strict;
    let engine = HotcopyEngine::new(config);

    if let Some(secs) = args.deadline_secs {
        let token = engine.cancel_token();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            warn!("Deadline of {}s reached, cancelling remaining items", secs);
            token.cancel();
        });
    }

    let reporter = CliReporter::new();
    let report = engine.run(&reporter).context("backup run failed")?;

    print_summary(&report);
    let success = report.overall_success(strict);
    if !success {
        error!(
            "Backup {} ({} mode)",
            "failed".red(),
            if strict { "strict" } else { "lenient" }
        );
    }
    Ok(success)
}

fn run_discover(mut config: AppConfig, args: &SourceArgs) {
    args.apply(&mut config);
    let engine = HotcopyEngine::new(config);
    let discovery = engine.discover();

    for item in &discovery.items {
        let lock = hotcopy_core::lock::check_lock(item);
        let status = if lock.is_locked {
            format!("locked ({})", lock.lock_kind).yellow()
        } else {
            "free".green()
        };
        println!(
            "{:<40} {:<13} {:>14} {}  {}",
            item.display_name,
            item.kind.to_string(),
            item.size_bytes,
            status,
            item.path.display()
        );
    }
    for err in &discovery.errors {
        error!("{}", err);
    }
    info!(
        "{} stores, {} bytes",
        format!("{}", discovery.items.len()).cyan(),
        format!("{}", discovery.total_bytes()).cyan(),
    );
}

fn print_summary(report: &RunReport) {
    println!();
    for (name, outcome) in &report.outcomes {
        let method = outcome
            .method
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        if outcome.is_ok() {
            println!(
                "  {} {:<40} {:<14} {} bytes",
                "ok".green(),
                name,
                method,
                outcome.bytes_written
            );
        } else if outcome.is_cancelled() {
            println!("  {} {}", "cancelled".yellow(), name);
        } else {
            let reason = match (&outcome.error, &outcome.verification) {
                (Some(e), _) => e.to_string(),
                (None, Some(v)) => format!(
                    "verification: {}",
                    v.reason.clone().unwrap_or_default()
                ),
                (None, None) => String::new(),
            };
            println!("  {} {:<40} {}", "FAILED".red(), name, reason);
        }
    }
    info!(
        "{} succeeded, {} failed, {} bytes written in {:.2}s",
        format!("{}", report.succeeded_count()).green(),
        format!("{}", report.failures().count()).red(),
        report.bytes_written(),
        report.elapsed.as_secs_f64(),
    );
}
