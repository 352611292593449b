//! # Pool Binary
//!
//! Command line front end of the device pool: loads a pool configuration,
//! builds the controllers through the driver registry and runs one command.
//!
//! # Usage
//!
//! ```bash
//! # List controllers and elements
//! pool --config config/pool.toml list
//!
//! # Move one motor, or every motor of a group
//! pool --config config/pool.toml move mot01 10
//! pool --config config/pool.toml move-group mg01 1.5 -2
//!
//! # Count for 0.5 s, or until the master reaches 10000 counts
//! pool --config config/pool.toml acquire mntgrp01 --time 0.5
//! pool --config config/pool.toml -v --json acquire mntgrp01 --monitor 10000
//! ```
//!
//! Events are printed as they are delivered. Ctrl-C aborts the running
//! operation.

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use pool_common::config::{LogLevel, PoolConfig};
use pool_common::element::ElementId;
use pool_common::event::{ElementEvent, EventKind};
use pool_engine::drivers::register_all_drivers;
use pool_engine::{AcquisitionRequest, DriverRegistry, EngineError, NotificationSink, Pool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Device pool - coordinated motion and acquisition
#[derive(Parser, Debug)]
#[command(name = "pool")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Coordinated multi-axis operation engine")]
#[command(long_about = None)]
struct Args {
    /// Path to the pool configuration file
    #[arg(short, long, default_value = "/etc/pool/pool.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and events in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List controllers and elements
    List,
    /// Move a motor to a user position
    Move {
        element: String,
        #[arg(allow_negative_numbers = true)]
        position: f64,
    },
    /// Move every motor of a motor group, positions in member order
    MoveGroup {
        group: String,
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        positions: Vec<f64>,
    },
    /// Acquire on a channel or measurement group
    Acquire {
        element: String,
        /// Integration time in seconds
        #[arg(long, conflicts_with = "monitor", required_unless_present = "monitor")]
        time: Option<f64>,
        /// Monitor count
        #[arg(long)]
        monitor: Option<f64>,
    },
    /// Read the current value of a physical element
    Read { element: String },
}

/// Prints every delivered event on stdout.
struct PrintSink {
    json: bool,
}

impl NotificationSink for PrintSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn notify(&self, event: &ElementEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
            return;
        }
        match &event.kind {
            EventKind::State { old, new, status } => match status {
                Some(status) => println!("{:<12} state  {old} -> {new} ({status})", event.name),
                None => println!("{:<12} state  {old} -> {new}", event.name),
            },
            EventKind::Value { new: Some(v), .. } => {
                let mark = if event.priority { " (final)" } else { "" };
                println!("{:<12} value  {v}{mark}", event.name);
            }
            EventKind::Value { error, .. } => {
                println!(
                    "{:<12} value  error: {}",
                    event.name,
                    error.as_deref().unwrap_or("unknown")
                );
            }
            EventKind::OperationEnded { operation, state } => {
                println!("{:<12} ended  {operation} ({state})", event.name);
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("pool failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = PoolConfig::load_validated(&args.config);
    let log_level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    info!("Pool v{} starting...", env!("CARGO_PKG_VERSION"));
    let config = config?;

    let mut drivers = DriverRegistry::new();
    register_all_drivers(&mut drivers);
    let pool = Arc::new(Pool::from_config(&config, &drivers)?);
    pool.subscribe(Arc::new(PrintSink { json: args.json }));

    // Element of the running operation, for Ctrl-C.
    let running: Arc<Mutex<Option<ElementId>>> = Arc::new(Mutex::new(None));
    {
        let pool = Arc::clone(&pool);
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received interrupt, aborting");
            if let Some(id) = *running.lock() {
                if let Err(e) = pool.abort(id) {
                    error!("Abort failed: {}", e);
                }
            }
        })?;
    }

    let handle = match &args.command {
        Command::List => {
            list(&pool);
            return Ok(());
        }
        Command::Read { element } => {
            let id = lookup(&pool, element)?;
            println!("{element} = {}", pool.read_value(id)?);
            return Ok(());
        }
        Command::Move { element, position } => {
            let id = lookup(&pool, element)?;
            *running.lock() = Some(id);
            pool.move_motor(id, *position)?
        }
        Command::MoveGroup { group, positions } => {
            let id = lookup(&pool, group)?;
            *running.lock() = Some(id);
            pool.move_group(id, positions)?
        }
        Command::Acquire {
            element,
            time,
            monitor,
        } => {
            let id = lookup(&pool, element)?;
            let request = match (time, monitor) {
                (Some(t), _) => AcquisitionRequest::timer(*t),
                (None, Some(c)) => AcquisitionRequest::monitor(*c),
                (None, None) => {
                    return Err("either --time or --monitor is required".into());
                }
            };
            *running.lock() = Some(id);
            pool.acquire(id, request)?
        }
    };

    let outcome = handle.wait()?;
    *running.lock() = None;
    info!(
        "{} finished in state {}{}",
        outcome.operation,
        outcome.state,
        if outcome.aborted { " (aborted)" } else { "" }
    );
    Ok(())
}

/// Resolve an element by name, or by numeric id.
fn lookup(pool: &Pool, name: &str) -> Result<ElementId, EngineError> {
    if let Some(element) = pool.find(name) {
        return Ok(element.id());
    }
    let id = name
        .trim_start_matches('#')
        .parse::<u32>()
        .map(ElementId)
        .map_err(|_| EngineError::InvalidRequest(format!("no element named '{name}'")))?;
    pool.element(id).map(|e| e.id())
}

fn list(pool: &Pool) {
    for ctrl in pool.controllers() {
        println!("{:<8} {:<20} {} {:?}", ctrl.id(), ctrl.name(), ctrl.class(), ctrl.capabilities());
    }
    for element in pool.elements() {
        let location = match (element.controller(), element.axis()) {
            (Some(ctrl), Some(axis)) => format!("{ctrl}/{axis}"),
            _ => format!("{:?}", element.members()),
        };
        println!(
            "{:<8} {:<20} {:<18} {:<10} {}",
            element.id(),
            element.name(),
            element.kind(),
            element.state(),
            location
        );
    }
}

/// Setup tracing subscriber from the CLI arguments and the configured
/// `[shared] log_level`. `--verbose` overrides the configured level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let level = tracing_level(args.verbose, log_level);

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn tracing_level(verbose: bool, log_level: LogLevel) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        log_level.as_directive().parse().unwrap_or(Level::INFO)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
