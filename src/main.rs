//! Describe what to back up once, in a descriptor file, and let this tool
//! turn it into the right rsync, tar, borg or duplicity invocation every
//! time. Remote sources are mounted over sshfs for the duration of their
//! backup, and a dry run shows exactly which commands would run.

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use backup::builders::reporter::ConsoleReporter;
use backup::core::config::{DescriptorLoader, DescriptorProvider, RunConfig, Verbosity};
use backup::core::engine::BackupEngine;
use backup::core::errors::BackupError;
use backup::core::process::SystemRunner;
use backup::core::signals;
use backup::utils;

#[derive(Parser)]
#[command(name = "backup")]
#[command(version, about = "Run the backups described in a descriptor file")]
struct Cli {
    /// Only check whether the descriptor is valid
    #[arg(long = "is-valid")]
    is_valid: bool,

    /// Print the commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Increase output, repeat for command renderings (-vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Skip the remaining sources once one has failed
    #[arg(long)]
    stop_on_failure: bool,

    /// The backup descriptor file
    descriptor: PathBuf,

    /// Backup target, overrides the descriptor's target
    target: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let run = RunConfig {
        target_override: cli.target,
        dry_run: cli.dry_run,
        verbosity: Verbosity::from_occurrences(cli.verbose),
        stop_on_failure: cli.stop_on_failure,
    };
    if let Err(err) = utils::init_logging(run.verbosity) {
        eprintln!("[CRITICAL] {err:#}");
        return ExitCode::FAILURE;
    }

    match execute(&cli.descriptor, cli.is_valid, run) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn execute(descriptor: &Path, validate_only: bool, run: RunConfig) -> Result<ExitCode> {
    let loader = DescriptorLoader::new(descriptor);
    let descriptor = loader.load_descriptor()?;

    if validate_only {
        tracing::info!("Descriptor file {} is valid.", loader.label());
        return Ok(ExitCode::SUCCESS);
    }
    tracing::debug!("Descriptor file {} is valid.", loader.label());

    let interrupt = signals::install()?;
    let engine = BackupEngine::new(
        descriptor,
        run,
        Arc::new(SystemRunner),
        Arc::new(ConsoleReporter::new()),
    )
    .with_interrupt(interrupt);

    let report = engine.run()?;
    Ok(ExitCode::from(report.exit_code() as u8))
}

/// One CRITICAL line per validation diagnostic, or the error chain.
fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<BackupError>() {
        Some(BackupError::Validation(issues)) => {
            for issue in issues {
                tracing::error!("{issue}");
            }
        }
        _ => tracing::error!("{err:#}"),
    }
}
