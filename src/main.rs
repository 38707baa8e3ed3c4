//! CLI Entry Point for xyz-tank
//!
//! Provides command-line interface for:
//! - Running a measurement to completion (Ctrl-C stops and saves partial data)
//! - Printing the planned scan route of a settings file
//! - An interactive console driving the rig through its controller
//!
//! Acquisition is simulated by the mock hydrophone; motors are modeled in-core.
//!
//! # Usage
//!
//! ```bash
//! xyz-tank run --settings config/xyz_tank.toml --output scan.json
//! xyz-tank route --settings config/xyz_tank.toml
//! xyz-tank interactive --settings config/xyz_tank.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use xyz_tank::config::{Settings, DEFAULT_SETTINGS_PATH};
use xyz_tank::controller::{Controller, RigCommand};
use xyz_tank::error::{RigError, RigResult};
use xyz_tank::experiment::{plan_route, MeasurementPlan, Position, ScanOutcome, XyzSystem};
use xyz_tank::hardware::MockProbe;
use xyz_tank::logging;

#[derive(Parser)]
#[command(name = "xyz-tank")]
#[command(about = "XYZ tank scanner: resumable 3D grid measurements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured measurement to completion and save it
    Run {
        /// Settings file
        #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,

        /// Output file (defaults to a timestamped file in storage.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the scan route of the configured plan
    Route {
        /// Settings file
        #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,
    },

    /// Drive the rig from an interactive console
    Interactive {
        /// Settings file
        #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { settings, output } => run(&settings, output).await,
        Commands::Route { settings } => print_route(&settings),
        Commands::Interactive { settings } => interactive(&settings).await,
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let settings = Settings::load_from(path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    logging::init_from_settings(&settings)?;
    Ok(settings)
}

/// Rig with a simulated hydrophone focused at the middle of the tank.
fn build_rig(settings: &Settings) -> XyzSystem {
    let [dx, dy, dz] = settings.plan.tank.dimensions;
    let probe = MockProbe::new(Position::new(dx / 2.0, dy / 2.0, dz / 2.0))
        .with_latency(Duration::from_millis(settings.rig.sample_delay_ms));

    XyzSystem::new(Arc::new(probe), settings.initial_position())
}

async fn run(settings_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let plan = settings.measurement_plan()?;
    let rig = build_rig(&settings);

    info!(
        application = %settings.application.name,
        plan = %plan.name(),
        points = plan.grid().num_points(),
        "Running measurement"
    );
    rig.run_measurement(plan).await?;

    let stop = rig.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current point");
            stop.stop().await;
        }
    });

    let outcome = rig.wait().await;
    match &outcome {
        Ok(Some(ScanOutcome::Finished)) => info!("Measurement complete"),
        Ok(Some(ScanOutcome::Stopped { last_completed_index })) => {
            warn!(?last_completed_index, "Measurement stopped early")
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Measurement aborted"),
    }

    let path = match output {
        Some(path) => path,
        None => {
            let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
            settings.storage.output_dir.join(format!("measurement_{stamp}.json"))
        }
    };
    match rig.save_measurement(&path).await {
        Ok(result) => println!(
            "Saved {} of {} points to {}",
            result.points_recorded(),
            result.plan.grid().num_points(),
            path.display()
        ),
        Err(RigError::NoMeasurement) => println!("Nothing acquired, no file written"),
        Err(e) => return Err(e.into()),
    }

    outcome?;
    Ok(())
}

fn print_route(settings_path: &Path) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let plan = settings.measurement_plan()?;
    let route = plan_route(plan.grid());

    println!("{} ({} points)", plan.name(), route.len());
    println!("{:>6}  {:>4} {:>4} {:>4}  {:<14} position [m]", "index", "ix", "iy", "iz", "arrival");
    for (i, step) in route.iter().enumerate() {
        println!(
            "{:>6}  {:>4} {:>4} {:>4}  {:<14} {}",
            i,
            step.ix,
            step.iy,
            step.iz,
            step.arrival().to_string(),
            plan.position_of(step.ix, step.iy, step.iz)
        );
    }
    if let Some(last) = route.len().checked_sub(1) {
        if let Some(motion) = route.departure(last) {
            println!("{:>6}  end of route ({})", "", motion);
        }
    }
    Ok(())
}

async fn interactive(settings_path: &Path) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let rig = build_rig(&settings);

    let (tx, rx) = mpsc::channel(32);
    let controller = tokio::spawn(Controller::new(rig, settings.storage.output_dir.clone()).run(rx));

    println!("xyz-tank {} interactive mode", env!("CARGO_PKG_VERSION"));
    print_menu();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let argument = words.next().map(PathBuf::from);

        match command.to_lowercase().as_str() {
            "start" => {
                // A settings path starts a new plan; none resumes, or starts
                // the plan loaded at launch if nothing is configured yet
                let plan = match argument {
                    Some(path) => {
                        match Settings::load_from(&path).and_then(|s| s.measurement_plan()) {
                            Ok(plan) => Some(plan),
                            Err(e) => {
                                println!("Cannot load {}: {}", path.display(), e);
                                continue;
                            }
                        }
                    }
                    None => None,
                };
                let mut result = send_start(&tx, plan).await?;
                if matches!(result, Err(RigError::NoPlanConfigured)) {
                    result = send_start(&tx, Some(settings.measurement_plan()?)).await?;
                }
                match result {
                    Ok(run_uid) => println!("Measurement started ({run_uid})"),
                    Err(e) => println!("Cannot start: {e}"),
                }
            }
            "stop" => {
                let (cmd, reply) = RigCommand::stop();
                tx.send(cmd).await?;
                reply.await?;
                println!("Stopping measurement...");
            }
            "status" => {
                let (cmd, reply) = RigCommand::status();
                tx.send(cmd).await?;
                let status = reply.await?;
                println!(
                    "{}: {} {}% at {}",
                    status.plan_name.as_deref().unwrap_or("no plan"),
                    status.state,
                    status.percent_complete,
                    status.position
                );
                if let Some(error) = status.last_error {
                    println!("last error: {error}");
                }
            }
            "save" => {
                let (cmd, reply) = RigCommand::save(argument);
                tx.send(cmd).await?;
                match reply.await? {
                    Ok(path) => println!("Saved to {}", path.display()),
                    Err(e) => println!("Cannot save: {e}"),
                }
            }
            "exit" | "q" | "quit" => break,
            "help" => print_menu(),
            other => println!("Unknown command: '{other}'"),
        }
    }

    let (cmd, reply) = RigCommand::exit();
    tx.send(cmd).await?;
    if let Err(e) = reply.await? {
        warn!(error = %e, "Measurement ended with an error");
    }
    controller.await?;
    Ok(())
}

async fn send_start(
    tx: &mpsc::Sender<RigCommand>,
    plan: Option<MeasurementPlan>,
) -> Result<RigResult<Uuid>> {
    let (cmd, reply) = RigCommand::start(plan);
    tx.send(cmd).await?;
    Ok(reply.await?)
}

fn print_menu() {
    println!("------------------------------------------");
    println!("start [settings]  start a measurement (no path: resume or start the loaded plan)");
    println!("stop              stop after the current point");
    println!("status            show progress");
    println!("save [path]       save acquired data");
    println!("exit              stop and quit");
    println!("------------------------------------------");
}
