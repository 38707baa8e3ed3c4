//! Command-channel controller for a rig.
//!
//! Views (the interactive console, the CLI runner, tests) never touch the
//! [`XyzSystem`] directly. They send [`RigCommand`]s over an mpsc channel and
//! await the reply on the oneshot channel embedded in each command.
//!
//! # Message Flow
//!
//! ```text
//! View                               Controller Task
//! ----                               ---------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Drive the rig
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Failed commands are logged and answered with the error; they never end the
//! controller. Only `Exit`, or every sender being dropped, does.
//!
//! ```rust,ignore
//! let (tx, rx) = mpsc::channel(32);
//! tokio::spawn(Controller::new(rig, "data").run(rx));
//!
//! let (cmd, reply) = RigCommand::start(Some(plan));
//! tx.send(cmd).await?;
//! let run_uid = reply.await??;
//! ```

use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::RigResult;
use crate::experiment::{MeasurementPlan, RigStatus, XyzSystem};

/// Commands served by a [`Controller`].
#[derive(Debug)]
pub enum RigCommand {
    /// Start a measurement.
    ///
    /// With a plan: configure it, move to its start position and start.
    /// Without: start or resume the configured plan.
    Start {
        /// Plan to run, `None` to resume
        plan: Option<MeasurementPlan>,
        /// Run uid of the launched executor
        response: oneshot::Sender<RigResult<Uuid>>,
    },

    /// Request a cooperative stop. Always succeeds.
    Stop {
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },

    /// Save the acquired data as JSON.
    Save {
        /// Output file, `None` for a timestamped file in the output directory
        path: Option<PathBuf>,
        /// Path written
        response: oneshot::Sender<RigResult<PathBuf>>,
    },

    /// Report the rig status.
    Status {
        /// Current status
        response: oneshot::Sender<RigStatus>,
    },

    /// Stop any measurement, wait for it and end the controller.
    Exit {
        /// Shutdown result
        response: oneshot::Sender<RigResult<()>>,
    },
}

impl RigCommand {
    /// Helper to create a Start command
    pub fn start(plan: Option<MeasurementPlan>) -> (Self, oneshot::Receiver<RigResult<Uuid>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { plan, response: tx }, rx)
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create a Save command
    pub fn save(path: Option<PathBuf>) -> (Self, oneshot::Receiver<RigResult<PathBuf>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Save { path, response: tx }, rx)
    }

    /// Helper to create a Status command
    pub fn status() -> (Self, oneshot::Receiver<RigStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::Status { response: tx }, rx)
    }

    /// Helper to create an Exit command
    pub fn exit() -> (Self, oneshot::Receiver<RigResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Exit { response: tx }, rx)
    }
}

/// Serves [`RigCommand`]s against one rig.
pub struct Controller {
    rig: XyzSystem,
    output_dir: PathBuf,
}

impl Controller {
    /// Controller for `rig`, saving unnamed results under `output_dir`.
    pub fn new(rig: XyzSystem, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            rig,
            output_dir: output_dir.into(),
        }
    }

    /// Runs the controller loop until `Exit` or until every sender is dropped.
    ///
    /// Commands are processed sequentially in the order received.
    pub async fn run(self, mut command_rx: mpsc::Receiver<RigCommand>) {
        info!("Controller started");

        while let Some(command) = command_rx.recv().await {
            match command {
                RigCommand::Start { plan, response } => {
                    let result = match plan {
                        Some(plan) => self.rig.run_measurement(plan).await,
                        None => self.rig.start().await,
                    };
                    log_failure("start", &result);
                    let _ = response.send(result);
                }

                RigCommand::Stop { response } => {
                    self.rig.stop().await;
                    let _ = response.send(());
                }

                RigCommand::Save { path, response } => {
                    let result = self.save(path).await;
                    log_failure("save", &result);
                    let _ = response.send(result);
                }

                RigCommand::Status { response } => {
                    let _ = response.send(self.rig.status().await);
                }

                RigCommand::Exit { response } => {
                    info!("Exit command received");
                    let result = self.rig.exit().await;
                    log_failure("exit", &result);
                    let _ = response.send(result);
                    return;
                }
            }
        }

        warn!("Command channel closed, shutting the rig down");
        if let Err(e) = self.rig.exit().await {
            error!(error = %e, "Rig shutdown failed");
        }
    }

    async fn save(&self, path: Option<PathBuf>) -> RigResult<PathBuf> {
        match path {
            Some(path) => {
                self.rig.save_measurement(&path).await?;
                Ok(path)
            }
            None => {
                // The filename depends on the snapshot's timestamp, so save
                // once under a scratch name and rename.
                let scratch = self.output_dir.join(".pending.json");
                let result = self.rig.save_measurement(&scratch).await?;
                let path = self.output_dir.join(result.default_filename());
                std::fs::rename(&scratch, &path)?;
                Ok(path)
            }
        }
    }
}

fn log_failure<T>(action: &str, result: &RigResult<T>) {
    if let Err(e) = result {
        if e.is_rejection() {
            warn!(action, error = %e, "Command rejected");
        } else {
            error!(action, error = %e, "Command failed");
        }
    }
}
