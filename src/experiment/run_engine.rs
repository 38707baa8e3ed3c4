//! XYZ rig instance: lifecycle state machine plus the measurement executor.
//!
//! [`XyzSystem`] owns the configured plan, its route, the scan progress and the
//! three axis motors. Lifecycle operations are gated by
//! [`SystemState::next`]; a started scan runs on its own tokio task while the
//! caller stays free to `stop()`, query or subscribe.
//!
//! # Usage
//!
//! ```rust,ignore
//! let rig = XyzSystem::new(Arc::new(MockProbe::new(focus)), Position::default());
//! let mut events = rig.subscribe();
//!
//! rig.run_measurement(plan).await?;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ScanEvent::Progress { percent_complete, .. } => println!("{percent_complete}%"),
//!         ScanEvent::Finished { .. } | ScanEvent::Stopped { .. } | ScanEvent::Failed { .. } => break,
//!         ScanEvent::Started { .. } => {}
//!     }
//! }
//! rig.save_measurement("scan.json").await?;
//! ```
//!
//! # Executor protocol
//!
//! For route entry `i`, the executor:
//! 1. halts if the rig is no longer `Running` (checked once per point),
//! 2. samples at the current motor position,
//! 3. records the payload and advances progress,
//! 4. moves one motor by one grid step towards entry `i + 1`.
//!
//! Steps 3 and 4 commit under one write lock. A stop never interrupts a point
//! in flight; it is observed before the next one.

use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::plan::{MeasurementPlan, Position};
use super::progress::{MeasurementProgress, MeasurementResult};
use super::route::{plan_route, Motion, RouteStep, ScanRoute};
use super::state::{SystemState, Transition};
use crate::error::{RigError, RigResult};
use crate::hardware::{Acquisition, Motors};

/// Motors closer than this to a target are considered on it.
const POSITION_TOLERANCE: f64 = 1e-9;

/// Notifications published while a scan runs.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Executor launched
    Started {
        run_uid: Uuid,
        /// Route index the scan starts (or resumes) from
        from_index: usize,
        total_points: usize,
    },
    /// One point acquired and recorded
    Progress {
        run_uid: Uuid,
        index: usize,
        percent_complete: u8,
    },
    /// Executor halted after a stop request
    Stopped {
        run_uid: Uuid,
        last_completed_index: Option<usize>,
        percent_complete: u8,
    },
    /// Whole route walked
    Finished { run_uid: Uuid },
    /// Acquisition failed; progress kept up to the previous point
    Failed {
        run_uid: Uuid,
        index: usize,
        message: String,
    },
}

/// How an executor run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The route was completed
    Finished,
    /// The run halted on a stop request
    Stopped {
        /// Last recorded route index, `None` if halted before the first
        last_completed_index: Option<usize>,
    },
}

/// Point-in-time view of a rig.
#[derive(Debug, Clone, PartialEq)]
pub struct RigStatus {
    /// Lifecycle state
    pub state: SystemState,
    /// Name of the configured plan
    pub plan_name: Option<String>,
    /// Completion of the current progress
    pub percent_complete: u8,
    /// Last recorded route index
    pub last_completed_index: Option<usize>,
    /// Absolute motor position
    pub position: Position,
    /// Last acquisition failure
    pub last_error: Option<String>,
}

/// Mutable rig state, guarded by one lock.
struct RigCore {
    state: SystemState,
    plan: Option<MeasurementPlan>,
    route: Option<Arc<ScanRoute>>,
    progress: Option<MeasurementProgress>,
    /// Motor position of grid index (0, 0, 0) for the current progress
    origin: Option<Position>,
    motors: Motors,
    active_run: Option<Uuid>,
    last_error: Option<String>,
}

impl RigCore {
    fn percent_complete(&self) -> u8 {
        self.progress
            .as_ref()
            .map_or(0, MeasurementProgress::percent_complete)
    }

    fn last_completed_index(&self) -> Option<usize> {
        self.progress
            .as_ref()
            .and_then(MeasurementProgress::last_completed_index)
    }
}

struct RigInner {
    core: RwLock<RigCore>,
    acquisition: Arc<dyn Acquisition>,
    events: broadcast::Sender<ScanEvent>,
    executor: Mutex<Option<JoinHandle<RigResult<ScanOutcome>>>>,
    /// Serializes configure / move_to_start / start / exit
    lifecycle: Mutex<()>,
}

impl RigInner {
    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn request_stop(&self) {
        let mut core = self.core.write().await;
        if !core.state.can_stop() {
            warn!(state = %core.state, "Stop requested but no measurement is running");
            return;
        }
        // Running -> Stopped; infallible
        core.state = core.state.next(Transition::Stop).unwrap_or(SystemState::Stopped);
        info!(
            run_uid = ?core.active_run,
            last_completed_index = ?core.last_completed_index(),
            "Stop requested, halting after the current point"
        );
    }

    /// Join the executor task, if any.
    ///
    /// The slot stays locked and keeps the handle until the task has ended,
    /// so every other joiner queues behind this one instead of seeing an
    /// empty slot while the executor still runs.
    async fn join_executor(&self) -> Option<Result<RigResult<ScanOutcome>, JoinError>> {
        let mut slot = self.executor.lock().await;
        let handle = slot.as_mut()?;
        let joined = handle.await;
        *slot = None;
        Some(joined)
    }

    /// Join the previous executor task, if any.
    ///
    /// Its outcome was already reported through events and `last_error`.
    async fn drain(&self) {
        match self.join_executor().await {
            Some(Ok(Ok(outcome))) => debug!(?outcome, "Previous executor drained"),
            Some(Ok(Err(e))) => debug!(error = %e, "Previous executor ended with error"),
            Some(Err(e)) => error!(error = %e, "Previous executor panicked"),
            None => {}
        }
    }
}

/// Cloneable handle that requests a cooperative stop.
///
/// Holds the rig weakly, so collaborators (an acquisition device, a signal
/// handler) can keep one without keeping the rig alive.
#[derive(Clone)]
pub struct StopHandle {
    inner: Weak<RigInner>,
}

impl StopHandle {
    /// Request a stop. No-op (with a warning) if nothing is running.
    pub async fn stop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.request_stop().await;
        }
    }
}

/// One XYZ rig: plan, route, progress, motors and the scan executor.
#[derive(Clone)]
pub struct XyzSystem {
    inner: Arc<RigInner>,
}

impl XyzSystem {
    /// Create a rig with motors parked at `initial_position`.
    ///
    /// The rig starts `Stopped` with no plan configured.
    pub fn new(acquisition: Arc<dyn Acquisition>, initial_position: Position) -> Self {
        let (events, _) = broadcast::channel(1024);

        Self {
            inner: Arc::new(RigInner {
                core: RwLock::new(RigCore {
                    state: SystemState::default(),
                    plan: None,
                    route: None,
                    progress: None,
                    origin: None,
                    motors: Motors::at(initial_position),
                    active_run: None,
                    last_error: None,
                }),
                acquisition,
                events,
                executor: Mutex::new(None),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Handle for requesting a stop from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SystemState {
        self.inner.core.read().await.state
    }

    /// Configured plan, if any.
    pub async fn plan(&self) -> Option<MeasurementPlan> {
        self.inner.core.read().await.plan.clone()
    }

    /// Route of the configured plan, if any.
    pub async fn route(&self) -> Option<Arc<ScanRoute>> {
        self.inner.core.read().await.route.clone()
    }

    /// Snapshot of the scan progress. Always a route prefix.
    pub async fn progress(&self) -> Option<MeasurementProgress> {
        self.inner.core.read().await.progress.clone()
    }

    /// Absolute positions of the X, Y and Z motors.
    pub async fn motor_positions(&self) -> Position {
        self.inner.core.read().await.motors.position()
    }

    /// Message of the last acquisition failure, cleared by the next start.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.core.read().await.last_error.clone()
    }

    /// Point-in-time status of the rig.
    pub async fn status(&self) -> RigStatus {
        let core = self.inner.core.read().await;
        RigStatus {
            state: core.state,
            plan_name: core.plan.as_ref().map(|p| p.name().to_string()),
            percent_complete: core.percent_complete(),
            last_completed_index: core.last_completed_index(),
            position: core.motors.position(),
            last_error: core.last_error.clone(),
        }
    }

    /// Replace the plan, recompute the route and discard progress.
    ///
    /// # Errors
    ///
    /// `Busy` while running, `InvalidPlan` for a malformed plan. Nothing
    /// changes on error.
    #[instrument(skip(self, plan), fields(plan = %plan.name()), err)]
    pub async fn configure(&self, plan: MeasurementPlan) -> RigResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.core.read().await.state.next(Transition::Configure)?;
        plan.validate()?;

        self.inner.drain().await;

        let route = Arc::new(plan_route(plan.grid()));
        let mut core = self.inner.core.write().await;
        core.state = core.state.next(Transition::Configure)?;
        info!(
            points = route.len(),
            counts = ?route.counts(),
            tank = %plan.tank().name,
            "Measurement plan configured"
        );
        core.plan = Some(plan);
        core.route = Some(route);
        core.progress = None;
        core.origin = None;
        core.last_error = None;
        Ok(())
    }

    /// Drive the motors to the plan's reference position.
    ///
    /// Progress is kept; a later `start()` resumes and realigns the motors
    /// to the next pending point.
    ///
    /// # Errors
    ///
    /// `Busy` while running, `NoPlanConfigured` without a plan.
    #[instrument(skip(self), err)]
    pub async fn move_to_start(&self) -> RigResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let core = self.inner.core.read().await;
            core.state.next(Transition::MoveToStart)?;
            if core.plan.is_none() {
                return Err(RigError::NoPlanConfigured);
            }
        }

        self.inner.drain().await;

        let mut core = self.inner.core.write().await;
        let target = core
            .plan
            .as_ref()
            .map(MeasurementPlan::reference_position)
            .ok_or(RigError::NoPlanConfigured)?;
        let next = core.state.next(Transition::MoveToStart)?;
        core.motors.move_to(target);
        core.state = next;
        info!(position = %target, "Motors at start position");
        Ok(())
    }

    /// Start a scan, or resume the stopped one.
    ///
    /// Resumes at `last_completed_index + 1` when progress for the configured
    /// plan exists and is incomplete. Otherwise allocates fresh progress and
    /// starts at index 0 from the current motor position.
    ///
    /// Returns the run uid of the launched executor.
    ///
    /// # Errors
    ///
    /// `Busy` while running, `NoPlanConfigured` without a plan.
    #[instrument(skip(self), err)]
    pub async fn start(&self) -> RigResult<Uuid> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let core = self.inner.core.read().await;
            core.state.next(Transition::Start)?;
            if core.plan.is_none() {
                return Err(RigError::NoPlanConfigured);
            }
        }

        self.inner.drain().await;

        let mut core = self.inner.core.write().await;
        let next = core.state.next(Transition::Start)?;
        let (plan, route) = match (core.plan.clone(), core.route.clone()) {
            (Some(plan), Some(route)) => (plan, route),
            _ => return Err(RigError::NoPlanConfigured),
        };

        let resumable = core.progress.as_ref().is_some_and(|p| !p.is_complete());
        let origin = match core.origin {
            Some(origin) if resumable => origin,
            _ => {
                let origin = core.motors.position();
                core.progress = Some(MeasurementProgress::new(
                    route.counts(),
                    self.inner.acquisition.channels(),
                ));
                core.origin = Some(origin);
                origin
            }
        };
        let from_index = core
            .progress
            .as_ref()
            .map_or(0, MeasurementProgress::next_index);

        if let Some(step) = route.get(from_index) {
            let expected = grid_position(&plan, origin, step);
            let actual = core.motors.position();
            if !actual.approx_eq(&expected, POSITION_TOLERANCE) {
                warn!(
                    %actual,
                    %expected,
                    index = from_index,
                    "Motors are off the next route point, realigning before resume"
                );
                core.motors.move_to(expected);
            }
        }

        let run_uid = Uuid::new_v4();
        core.state = next;
        core.active_run = Some(run_uid);
        core.last_error = None;
        drop(core);

        if from_index == 0 {
            info!(%run_uid, points = route.len(), "Starting measurement");
        } else {
            info!(%run_uid, from_index, points = route.len(), "Resuming measurement");
        }
        self.inner.emit(ScanEvent::Started {
            run_uid,
            from_index,
            total_points: route.len(),
        });

        let handle = tokio::spawn(execute(self.inner.clone(), run_uid, plan, route));
        *self.inner.executor.lock().await = Some(handle);
        Ok(run_uid)
    }

    /// Request a cooperative stop after the current point.
    ///
    /// Never fails: outside `Running` it only logs a warning.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.request_stop().await;
    }

    /// Wait for the current executor task to end.
    ///
    /// Returns `None` if no executor was launched since the last wait.
    ///
    /// # Errors
    ///
    /// `AcquisitionFailure` if the scan aborted on a failed sample,
    /// `ExecutorPanicked` if the task did not complete.
    pub async fn wait(&self) -> RigResult<Option<ScanOutcome>> {
        match self.inner.join_executor().await {
            Some(joined) => joined
                .map_err(|e| RigError::ExecutorPanicked(e.to_string()))?
                .map(Some),
            None => Ok(None),
        }
    }

    /// Configure `plan`, move to its start position and start scanning.
    pub async fn run_measurement(&self, plan: MeasurementPlan) -> RigResult<Uuid> {
        self.configure(plan).await?;
        self.move_to_start().await?;
        self.start().await
    }

    /// Snapshot the acquired data and write it to `path` as JSON.
    ///
    /// Partial measurements are saved with a warning.
    ///
    /// # Errors
    ///
    /// `NoMeasurement` if no point has been acquired for the configured plan.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub async fn save_measurement<P: AsRef<Path>>(&self, path: P) -> RigResult<MeasurementResult> {
        let result = {
            let core = self.inner.core.read().await;
            match (&core.plan, &core.progress) {
                (Some(plan), Some(progress)) if progress.last_completed_index().is_some() => {
                    MeasurementResult::new(plan.clone(), progress)
                }
                _ => return Err(RigError::NoMeasurement),
            }
        };

        if !result.is_complete() {
            warn!(
                points_recorded = result.points_recorded(),
                total_points = result.plan.grid().num_points(),
                percent_complete = result.percent_complete,
                "Saving a partial measurement"
            );
        }
        result.save(&path)?;
        info!("Measurement saved");
        Ok(result)
    }

    /// Stop any running scan and wait for its executor.
    #[instrument(skip(self), err)]
    pub async fn exit(&self) -> RigResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state().await.is_running() {
            self.stop().await;
        }
        self.wait().await?;
        info!("Rig shut down");
        Ok(())
    }
}

/// Absolute motor position of a route point, relative to `origin`.
fn grid_position(plan: &MeasurementPlan, origin: Position, step: &RouteStep) -> Position {
    let [px, py, pz] = plan.grid_precision();
    Position::new(
        origin.x + step.ix as f64 * px,
        origin.y + step.iy as f64 * py,
        origin.z + step.iz as f64 * pz,
    )
}

/// Executor task: walk `route` from the recorded progress until it ends, a
/// stop is observed or acquisition fails.
#[instrument(skip_all, fields(run_uid = %run_uid, plan = %plan.name()))]
async fn execute(
    inner: Arc<RigInner>,
    run_uid: Uuid,
    plan: MeasurementPlan,
    route: Arc<ScanRoute>,
) -> RigResult<ScanOutcome> {
    loop {
        let (index, at) = {
            let core = inner.core.read().await;
            if !core.state.is_running() || core.active_run != Some(run_uid) {
                let last_completed_index = core.last_completed_index();
                let percent_complete = core.percent_complete();
                info!(?last_completed_index, percent_complete, "Measurement stopped");
                inner.emit(ScanEvent::Stopped {
                    run_uid,
                    last_completed_index,
                    percent_complete,
                });
                return Ok(ScanOutcome::Stopped {
                    last_completed_index,
                });
            }
            let index = core
                .progress
                .as_ref()
                .map_or(0, MeasurementProgress::next_index);
            (index, core.motors.position())
        };

        let Some(step) = route.get(index).copied() else {
            return finish(&inner, run_uid).await;
        };

        let sample = inner.acquisition.sample(at).await;

        let mut core = inner.core.write().await;
        if core.active_run != Some(run_uid) {
            // Superseded while sampling: the newer run owns progress and motors
            warn!(index, "Run superseded, discarding sample");
            return Ok(ScanOutcome::Stopped {
                last_completed_index: index.checked_sub(1),
            });
        }
        let previous_percent = core.percent_complete();
        let recorded = match sample {
            Ok(values) => match core.progress.as_mut() {
                Some(progress) => progress.record(index, &step, &values),
                None => Err(RigError::NoMeasurement),
            },
            Err(e) => Err(RigError::AcquisitionFailure {
                index,
                message: format!("{e:#}"),
            }),
        };
        if let Err(err) = recorded {
            core.state = core.state.next(Transition::Fail)?;
            core.last_error = Some(err.to_string());
            drop(core);
            error!(index, error = %err, "Measurement aborted");
            inner.emit(ScanEvent::Failed {
                run_uid,
                index,
                message: err.to_string(),
            });
            return Err(err);
        }

        let motion = route.departure(index).unwrap_or(Motion::TERMINAL);
        core.motors.apply(motion, plan.precision_along(motion.axis));
        let percent_complete = core.percent_complete();
        drop(core);

        debug!(index, ix = step.ix, iy = step.iy, iz = step.iz, %motion, "Point recorded");
        if percent_complete / 10 > previous_percent / 10 {
            info!(percent_complete, index, "Measurement progress");
        }
        inner.emit(ScanEvent::Progress {
            run_uid,
            index,
            percent_complete,
        });

        if motion.is_terminal() {
            return finish(&inner, run_uid).await;
        }
    }
}

async fn finish(inner: &RigInner, run_uid: Uuid) -> RigResult<ScanOutcome> {
    {
        let mut core = inner.core.write().await;
        core.state = core.state.next(Transition::Finish)?;
    }
    info!("Measurement finished");
    inner.emit(ScanEvent::Finished { run_uid });
    Ok(ScanOutcome::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{Grid, Tank};
    use crate::hardware::{MockProbe, ScriptedProbe};
    use tokio::time::Duration;
    use tracing_test::traced_test;

    fn plan(nx: usize, ny: usize, nz: usize) -> MeasurementPlan {
        MeasurementPlan::new(
            "unit",
            Arc::new(Tank::new("small_aquarium", [0.2, 0.1, 0.2]).unwrap()),
            Position::new(1e-3, 7e-3, 2e-3),
            Grid::with_counts(nx, ny, nz).unwrap(),
            [1e-3, 1e-3, 1e-3],
        )
        .unwrap()
    }

    fn rig() -> XyzSystem {
        XyzSystem::new(
            Arc::new(MockProbe::new(Position::default())),
            Position::new(5e-3, 5e-3, 5e-3),
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let rig = rig();
        assert_eq!(rig.state().await, SystemState::Stopped);
        assert!(rig.plan().await.is_none());
        assert!(rig.progress().await.is_none());
        assert_eq!(rig.motor_positions().await, Position::new(5e-3, 5e-3, 5e-3));
    }

    #[tokio::test]
    async fn test_full_scan_visits_every_point_in_route_order() {
        let probe = Arc::new(MockProbe::new(Position::default()));
        let rig = XyzSystem::new(probe.clone(), Position::default());
        let plan = plan(3, 2, 2);

        rig.run_measurement(plan.clone()).await.unwrap();
        assert_eq!(rig.wait().await.unwrap(), Some(ScanOutcome::Finished));
        assert_eq!(rig.state().await, SystemState::Finished);

        let route = rig.route().await.unwrap();
        let sampled = probe.sampled_positions();
        assert_eq!(sampled.len(), route.len());
        for (at, step) in sampled.iter().zip(route.iter()) {
            let expected = plan.position_of(step.ix, step.iy, step.iz);
            assert!(at.approx_eq(&expected, 1e-9), "{at} != {expected}");
        }

        let progress = rig.progress().await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.percent_complete(), 100);
    }

    #[tokio::test]
    async fn test_restart_after_finish_starts_fresh() {
        let rig = rig();
        rig.run_measurement(plan(2, 1, 1)).await.unwrap();
        rig.wait().await.unwrap();

        let mut events = rig.subscribe();
        rig.start().await.unwrap();
        match events.recv().await.unwrap() {
            ScanEvent::Started { from_index, .. } => assert_eq!(from_index, 0),
            other => panic!("unexpected event {other:?}"),
        }
        rig.wait().await.unwrap();
        assert_eq!(rig.state().await, SystemState::Finished);
    }

    #[tokio::test]
    async fn test_failure_records_last_error() {
        let probe = ScriptedProbe::failing_at(MockProbe::new(Position::default()), 2);
        let rig = XyzSystem::new(Arc::new(probe), Position::default());
        rig.run_measurement(plan(2, 2, 1)).await.unwrap();

        let err = rig.wait().await.unwrap_err();
        assert!(matches!(err, RigError::AcquisitionFailure { index: 2, .. }));
        assert_eq!(rig.state().await, SystemState::Stopped);
        assert!(rig.last_error().await.unwrap().contains("trigger timeout"));
        assert_eq!(rig.progress().await.unwrap().last_completed_index(), Some(1));
    }

    #[tokio::test]
    async fn test_exit_stops_running_scan() {
        let probe = MockProbe::new(Position::default()).with_latency(Duration::from_millis(5));
        let rig = XyzSystem::new(Arc::new(probe), Position::default());
        rig.run_measurement(plan(10, 10, 1)).await.unwrap();

        rig.exit().await.unwrap();
        assert_eq!(rig.state().await, SystemState::Stopped);
        assert!(!rig.progress().await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_status_reports_plan_and_position() {
        let rig = rig();
        rig.configure(plan(2, 2, 1)).await.unwrap();
        rig.move_to_start().await.unwrap();

        let status = rig.status().await;
        assert_eq!(status.state, SystemState::AtStart);
        assert_eq!(status.plan_name.as_deref(), Some("unit"));
        assert_eq!(status.percent_complete, 0);
        assert!(status
            .position
            .approx_eq(&Position::new(1e-3, 7e-3, 2e-3), 1e-12));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_when_idle_only_warns() {
        let rig = rig();
        rig.stop().await;
        rig.stop_handle().stop().await;

        assert_eq!(rig.state().await, SystemState::Stopped);
        assert!(logs_contain("Stop requested but no measurement is running"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_realigns_motors_on_resume() {
        let probe = Arc::new(MockProbe::new(Position::default()).with_latency(Duration::from_millis(2)));
        let rig = XyzSystem::new(probe.clone(), Position::default());
        let plan = plan(4, 4, 1);
        rig.run_measurement(plan.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        rig.stop().await;
        rig.wait().await.unwrap();
        let resume_at = rig.progress().await.unwrap().next_index();

        // Parking the probe must not shift the rest of the scan
        rig.move_to_start().await.unwrap();
        rig.start().await.unwrap();
        rig.wait().await.unwrap();

        if resume_at > 0 {
            assert!(logs_contain("realigning before resume"));
        }
        let route = rig.route().await.unwrap();
        let sampled = probe.sampled_positions();
        assert_eq!(sampled.len(), route.len());
        for (at, step) in sampled.iter().zip(route.iter()) {
            assert!(at.approx_eq(&plan.position_of(step.ix, step.iy, step.iz), 1e-9));
        }
    }

    #[tokio::test]
    async fn test_restart_during_concurrent_wait_resumes_after_the_stopped_run() {
        let probe = Arc::new(MockProbe::new(Position::default()).with_latency(Duration::from_millis(50)));
        let rig = XyzSystem::new(probe.clone(), Position::default());
        let plan = plan(4, 1, 1);
        rig.run_measurement(plan.clone()).await.unwrap();

        // Stop while the first sample is in flight, with another task waiting
        tokio::time::sleep(Duration::from_millis(10)).await;
        rig.stop().await;
        let waiter = tokio::spawn({
            let rig = rig.clone();
            async move { rig.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        rig.start().await.unwrap();
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            Some(ScanOutcome::Stopped {
                last_completed_index: Some(0)
            })
        );
        assert_eq!(rig.wait().await.unwrap(), Some(ScanOutcome::Finished));

        let route = rig.route().await.unwrap();
        let sampled = probe.sampled_positions();
        assert_eq!(sampled.len(), route.len());
        for (at, step) in sampled.iter().zip(route.iter()) {
            assert!(at.approx_eq(&plan.position_of(step.ix, step.iy, step.iz), 1e-9));
        }
        assert!(rig
            .motor_positions()
            .await
            .approx_eq(&plan.position_of(3, 0, 0), 1e-9));
        assert!(rig.progress().await.unwrap().is_complete());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_save_one_point_short_of_a_large_grid_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ScriptedProbe::failing_at(MockProbe::new(Position::default()), 109);
        let rig = XyzSystem::new(Arc::new(probe), Position::default());
        rig.run_measurement(plan(11, 10, 1)).await.unwrap();
        assert!(rig.wait().await.is_err());

        let progress = rig.progress().await.unwrap();
        assert_eq!(progress.last_completed_index(), Some(108));
        assert_eq!(progress.percent_complete(), 100);

        let result = rig.save_measurement(dir.path().join("long.json")).await.unwrap();
        assert!(!result.is_complete());
        assert_eq!(result.points_recorded(), 109);
        assert!(logs_contain("Saving a partial measurement"));
    }
}
