//! CLI command definitions and the in-process dispatch function. There is
//! no remote/IPC surface (spec Non-goals): every subcommand here operates
//! on a [`SchedulerHandle`] already running in the same process, matching
//! `coordinator/handle.rs`'s model of a caller holding a channel handle
//! rather than an out-of-process client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::cycling::{Calendar, CyclePoint};
use crate::scheduler::SchedulerHandle;

/// Cylc-core scheduler CLI.
#[derive(Parser, Debug)]
#[command(name = "cylc", about = "Cycling workflow scheduler kernel", version)]
pub struct Cli {
    /// Path to the workflow config file.
    #[arg(short, long, global = true, help = "Path to workflow.yml")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the scheduler in the foreground and run until stopped.
    Run,

    /// Release a held task so it can be admitted.
    Hold { name: String, cycle_point: String },

    /// Release a held task so it can be admitted.
    Release { name: String, cycle_point: String },

    /// Manually trigger a task regardless of its prerequisites.
    Trigger { name: String, cycle_point: String },

    /// Force an immediate liveness poll of a submitted/running job.
    Poll { name: String, cycle_point: String },

    /// Kill a submitted/running job.
    Kill { name: String, cycle_point: String },

    /// Print the current status of every task proxy.
    Status,

    /// Stop the scheduler.
    Stop {
        /// Stop as soon as the pool drains, ignoring `--at`.
        #[arg(long)]
        now: bool,
        /// Stop once every task at or before this cycle point has finished.
        #[arg(long)]
        at: Option<String>,
    },

    /// Broadcast settings overrides.
    Broadcast {
        #[command(subcommand)]
        command: BroadcastCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BroadcastCommand {
    /// Apply a settings override. `settings` is a JSON object.
    Put {
        #[arg(long = "cycle", value_name = "POINT|*")]
        cycles: Vec<String>,
        #[arg(long = "namespace", value_name = "NAME|root")]
        namespaces: Vec<String>,
        /// JSON object of dotted-path setting overrides.
        settings: String,
    },

    /// Clear a previously applied override.
    Clear {
        #[arg(long = "cycle", value_name = "POINT|*")]
        cycles: Vec<String>,
        #[arg(long = "namespace", value_name = "NAME|root")]
        namespaces: Vec<String>,
    },

    /// Drop all overrides at or before a cutoff cycle point.
    Expire { cutoff: String },

    /// Print every currently active override.
    Show,
}

/// Run one [`Command`] against an already-running scheduler, returning its
/// reply as JSON. `Run`/`Status` with no scheduler handle make no sense
/// here; callers needing to boot a scheduler do so themselves (see
/// `bin/cylc.rs`) and only reach this function afterwards.
pub async fn dispatch(handle: &SchedulerHandle, calendar: Calendar, command: Command) -> Result<Value> {
    debug!(?command, "cli: dispatching command");
    let point = |s: &str| CyclePoint::parse(s, calendar).context(format!("invalid cycle point: {s}"));

    let value = match command {
        Command::Run => {
            return Err(eyre::eyre!("Run starts a new scheduler; it cannot be dispatched to one already running"));
        }
        Command::Hold { name, cycle_point } => {
            handle.hold(name, point(&cycle_point)?).await;
            Value::Null
        }
        Command::Release { name, cycle_point } => {
            handle.release(name, point(&cycle_point)?).await;
            Value::Null
        }
        Command::Trigger { name, cycle_point } => {
            handle.trigger(name, point(&cycle_point)?).await;
            Value::Null
        }
        Command::Poll { name, cycle_point } => {
            handle.poll(name, point(&cycle_point)?).await;
            Value::Null
        }
        Command::Kill { name, cycle_point } => {
            handle.kill(name, point(&cycle_point)?).await;
            Value::Null
        }
        Command::Status => {
            let snapshot = handle.snapshot().await;
            serde_json::to_value(
                snapshot
                    .into_iter()
                    .map(|(name, cp, status)| serde_json::json!({ "name": name, "cycle_point": cp.to_string(), "status": status }))
                    .collect::<Vec<_>>(),
            )?
        }
        Command::Stop { now, at } => {
            let at = if now { None } else { at.as_deref().map(point).transpose()? };
            handle.stop(at).await;
            Value::Null
        }
        Command::Broadcast { command } => dispatch_broadcast(handle, calendar, command).await?,
    };
    Ok(value)
}

async fn dispatch_broadcast(handle: &SchedulerHandle, calendar: Calendar, command: BroadcastCommand) -> Result<Value> {
    let value = match command {
        BroadcastCommand::Put { cycles, namespaces, settings } => {
            let settings: Value = serde_json::from_str(&settings).context("broadcast settings must be a JSON object")?;
            handle.broadcast_put(cycles, namespaces, settings).await
        }
        BroadcastCommand::Clear { cycles, namespaces } => handle.broadcast_clear(cycles, namespaces).await,
        BroadcastCommand::Expire { cutoff } => {
            let cutoff = CyclePoint::parse(&cutoff, calendar).context("invalid cutoff cycle point")?;
            handle.broadcast_expire(cutoff).await;
            Value::Null
        }
        BroadcastCommand::Show => handle.broadcast_show().await,
    };
    Ok(value)
}
