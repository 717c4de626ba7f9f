//! Scheduler kernel CLI entry point.
//!
//! There is no daemon/IPC surface: `run` boots a [`Scheduler`] in this
//! process and drives it to completion; every other subcommand boots the
//! same scheduler, applies one command through the in-process dispatch
//! API, then shuts down. Controlling an already-running workflow from a
//! separate process is explicitly out of scope (see `SPEC_FULL.md` §1).

use clap::Parser;
use eyre::{Context, Result};
use std::collections::HashMap;
use std::time::Duration as StdDuration;

use cylc_core::cli::{self, Cli, Command};
use cylc_core::{Calendar, CyclePoint, RunDirs, Scheduler, SchedulerConfig};

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) if other != "INFO" => {
            eprintln!("Warning: unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

fn parse_calendar(name: &str) -> Calendar {
    match name.to_lowercase().as_str() {
        "360day" | "360_day" => Calendar::Day360,
        "365day" | "365_day" => Calendar::Day365,
        "366day" | "366_day" => Calendar::Day366,
        _ => Calendar::Gregorian,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("failed to set up logging")?;

    let config = SchedulerConfig::load(cli.config.as_ref()).context("failed to load configuration")?;
    let calendar = parse_calendar(&config.workflow.calendar);
    let initial_cycle_point = match &config.workflow.initial_cycle_point {
        Some(s) => CyclePoint::parse(s, calendar).context("invalid initial_cycle_point in config")?,
        None => CyclePoint::integer(1),
    };

    let pipeline = cylc_core::SubmissionPipeline::new(
        cylc_core::ProcessPool::new(config.submission.process_pool_size),
        cylc_core::default_registry(),
        config.submission.submit_batch_size,
        StdDuration::from_secs(config.submission.submit_batch_delay_secs),
        StdDuration::from_secs(config.submission.process_timeout_secs),
    );
    let run_dirs = RunDirs {
        suite_run_dir: format!("./{}", config.workflow.name),
        suite_work_dir_root: format!("./{}/work", config.workflow.name),
        suite_def_path: format!("./{}/flow.cylc", config.workflow.name),
        suite_uuid: uuid::Uuid::now_v7().to_string(),
    };

    let (scheduler, handle) = Scheduler::new(
        HashMap::new(),
        calendar,
        initial_cycle_point,
        config.scheduling.max_active_cycle_points,
        config.scheduling.default_queue_limit as usize,
        pipeline,
        run_dirs,
        StdDuration::from_secs(1),
    );

    let task = tokio::spawn(scheduler.run(|| chrono::Utc::now().timestamp()));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            handle.shutdown().await;
        }
        other => {
            let reply = cli::dispatch(&handle, calendar, other).await;
            handle.shutdown().await;
            match reply {
                Ok(value) if !value.is_null() => println!("{}", serde_json::to_string_pretty(&value)?),
                Ok(_) => {}
                Err(err) => {
                    task.await.ok();
                    return Err(err);
                }
            }
        }
    }

    task.await.context("scheduler task panicked")?;
    Ok(())
}
