//! Integration tests for the XYZ rig: route execution, stop/resume and the
//! lifecycle guards.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::time::Duration;

use xyz_tank::error::RigError;
use xyz_tank::experiment::{
    Axis, Direction, Grid, MeasurementPlan, MeasurementResult, Motion, Position, ScanEvent,
    ScanOutcome, StopHandle, SystemState, Tank, XyzSystem,
};
use xyz_tank::hardware::{Acquisition, MockProbe, ScriptedProbe};

// =============================================================================
// Helpers
// =============================================================================

fn plan(nx: usize, ny: usize, nz: usize, precision: f64) -> MeasurementPlan {
    MeasurementPlan::new(
        "integration",
        Arc::new(Tank::new("small_aquarium", [0.2, 0.1, 0.2]).unwrap()),
        Position::new(1e-3, 7e-3, 2e-3),
        Grid::with_counts(nx, ny, nz).unwrap(),
        [precision; 3],
    )
    .unwrap()
}

fn probe() -> MockProbe {
    MockProbe::new(Position::new(2e-3, 8e-3, 3e-3))
}

/// Probe that requests a stop while sampling its `stop_at`-th point.
struct StoppingProbe {
    inner: MockProbe,
    stop_at: usize,
    calls: AtomicUsize,
    handle: OnceLock<StopHandle>,
}

impl StoppingProbe {
    fn new(stop_at: usize) -> Self {
        Self {
            inner: probe(),
            stop_at,
            calls: AtomicUsize::new(0),
            handle: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Acquisition for StoppingProbe {
    fn channels(&self) -> usize {
        self.inner.channels()
    }

    async fn sample(&self, at: Position) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.stop_at {
            if let Some(handle) = self.handle.get() {
                handle.stop().await;
            }
        }
        self.inner.sample(at).await
    }
}

/// Rig whose probe stops the scan while sampling route index `k`.
fn stopping_rig(k: usize) -> XyzSystem {
    let probe = Arc::new(StoppingProbe::new(k));
    let rig = XyzSystem::new(probe.clone(), Position::default());
    assert!(probe.handle.set(rig.stop_handle()).is_ok());
    rig
}

async fn uninterrupted_payload(plan: &MeasurementPlan) -> ndarray::Array4<f32> {
    let rig = XyzSystem::new(Arc::new(probe()), Position::default());
    rig.run_measurement(plan.clone()).await.unwrap();
    assert_eq!(rig.wait().await.unwrap(), Some(ScanOutcome::Finished));
    rig.progress().await.unwrap().data().clone()
}

// =============================================================================
// Route execution
// =============================================================================

#[tokio::test]
async fn test_two_by_two_scenario() {
    let rig = XyzSystem::new(Arc::new(probe()), Position::default());
    let mut events = rig.subscribe();
    rig.run_measurement(plan(2, 2, 1, 1.0)).await.unwrap();

    let route = rig.route().await.unwrap();
    let visited: Vec<_> = route.iter().map(|s| (s.index(), s.arrival())).collect();
    assert_eq!(
        visited,
        vec![
            ((0, 0, 0), Motion::NONE),
            ((1, 0, 0), Motion::step(Axis::X, Direction::AwayFromOrigin)),
            ((1, 1, 0), Motion::step(Axis::Y, Direction::AwayFromOrigin)),
            ((0, 1, 0), Motion::step(Axis::X, Direction::TowardOrigin)),
        ]
    );
    assert_eq!(route.departure(3), Some(Motion::TERMINAL));

    let mut percents = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            ScanEvent::Started { from_index, total_points, .. } => {
                assert_eq!((from_index, total_points), (0, 4));
            }
            ScanEvent::Progress { percent_complete, .. } => percents.push(percent_complete),
            ScanEvent::Finished { .. } => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(percents, vec![25, 50, 75, 100]);

    assert_eq!(rig.wait().await.unwrap(), Some(ScanOutcome::Finished));
    assert_eq!(rig.state().await, SystemState::Finished);

    // Motors end on the last point: no move follows the terminal marker
    let end = rig.motor_positions().await;
    assert!(end.approx_eq(&Position::new(1e-3, 1.007, 2e-3), 1e-9), "{end}");
}

#[tokio::test]
async fn test_stop_after_index_one_then_resume() {
    let plan = plan(2, 2, 1, 1e-3);
    let rig = stopping_rig(1);

    rig.run_measurement(plan.clone()).await.unwrap();
    let outcome = rig.wait().await.unwrap();
    assert_eq!(
        outcome,
        Some(ScanOutcome::Stopped {
            last_completed_index: Some(1)
        })
    );
    assert_eq!(rig.state().await, SystemState::Stopped);

    let progress = rig.progress().await.unwrap();
    assert_eq!(progress.percent_complete(), 50);
    assert_eq!(progress.last_completed_index(), Some(1));

    let mut events = rig.subscribe();
    rig.start().await.unwrap();
    let mut recorded = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            ScanEvent::Started { from_index, .. } => assert_eq!(from_index, 2),
            ScanEvent::Progress { index, .. } => recorded.push(index),
            ScanEvent::Finished { .. } => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(recorded, vec![2, 3]);
    rig.wait().await.unwrap();

    let resumed = rig.progress().await.unwrap();
    assert_eq!(resumed.percent_complete(), 100);
    assert_eq!(resumed.data(), &uninterrupted_payload(&plan).await);
}

#[tokio::test]
async fn test_resume_law_for_every_stop_index() {
    let plan = plan(3, 2, 2, 1e-3);
    let expected = uninterrupted_payload(&plan).await;
    let total = plan.grid().num_points();

    for k in 0..total - 1 {
        let rig = stopping_rig(k);
        rig.run_measurement(plan.clone()).await.unwrap();
        rig.wait().await.unwrap();
        assert_eq!(
            rig.progress().await.unwrap().last_completed_index(),
            Some(k),
            "stop at {k}"
        );

        rig.start().await.unwrap();
        assert_eq!(rig.wait().await.unwrap(), Some(ScanOutcome::Finished));
        assert_eq!(rig.progress().await.unwrap().data(), &expected, "stop at {k}");
    }
}

// =============================================================================
// Lifecycle guards
// =============================================================================

#[tokio::test]
async fn test_no_plan_configured() {
    let rig = XyzSystem::new(Arc::new(probe()), Position::default());

    assert!(matches!(rig.start().await, Err(RigError::NoPlanConfigured)));
    assert!(matches!(
        rig.move_to_start().await,
        Err(RigError::NoPlanConfigured)
    ));
    assert_eq!(rig.state().await, SystemState::Stopped);
    assert_eq!(rig.motor_positions().await, Position::default());
}

#[tokio::test]
async fn test_busy_while_running() {
    let slow = probe().with_latency(Duration::from_millis(5));
    let rig = XyzSystem::new(Arc::new(slow), Position::default());
    rig.run_measurement(plan(10, 10, 1, 1e-3)).await.unwrap();

    assert!(matches!(rig.start().await, Err(RigError::Busy)));
    assert!(matches!(rig.move_to_start().await, Err(RigError::Busy)));
    assert!(matches!(
        rig.configure(plan(2, 2, 2, 1e-3)).await,
        Err(RigError::Busy)
    ));

    // The rejected configure left the running plan in place
    assert_eq!(rig.route().await.unwrap().len(), 100);
    assert_eq!(rig.state().await, SystemState::Running);

    rig.stop().await;
    assert!(matches!(
        rig.wait().await.unwrap(),
        Some(ScanOutcome::Stopped { .. })
    ));
    assert_eq!(rig.state().await, SystemState::Stopped);
}

#[tokio::test]
async fn test_invalid_plan_is_rejected_without_changes() {
    let rig = XyzSystem::new(Arc::new(probe()), Position::default());
    rig.configure(plan(2, 2, 1, 1e-3)).await.unwrap();

    // Plans arriving from files bypass the constructor
    let mut json = serde_json::to_value(plan(2, 2, 1, 1e-3)).unwrap();
    json["grid_precision"] = serde_json::json!([1e-3, 0.0, 1e-3]);
    let bad: MeasurementPlan = serde_json::from_value(json).unwrap();

    let err = rig.configure(bad).await.unwrap_err();
    assert!(matches!(err, RigError::InvalidPlan(_)));
    assert!(err.is_rejection());
    assert_eq!(rig.plan().await.unwrap().grid_precision(), [1e-3; 3]);
}

#[tokio::test]
async fn test_move_to_start() {
    let rig = XyzSystem::new(Arc::new(probe()), Position::new(0.05, 0.05, 0.05));
    rig.configure(plan(2, 2, 1, 1e-3)).await.unwrap();
    assert_eq!(rig.state().await, SystemState::Stopped);

    rig.move_to_start().await.unwrap();
    assert_eq!(rig.state().await, SystemState::AtStart);
    assert!(rig
        .motor_positions()
        .await
        .approx_eq(&Position::new(1e-3, 7e-3, 2e-3), 1e-12));
}

#[tokio::test]
async fn test_configure_discards_progress() {
    let rig = stopping_rig(1);
    rig.run_measurement(plan(2, 2, 1, 1e-3)).await.unwrap();
    rig.wait().await.unwrap();
    assert!(rig.progress().await.is_some());

    rig.configure(plan(3, 1, 1, 1e-3)).await.unwrap();
    assert!(rig.progress().await.is_none());
    assert_eq!(rig.state().await, SystemState::Stopped);

    let mut events = rig.subscribe();
    rig.start().await.unwrap();
    match events.recv().await.unwrap() {
        ScanEvent::Started { from_index, total_points, .. } => {
            assert_eq!((from_index, total_points), (0, 3));
        }
        other => panic!("unexpected event {other:?}"),
    }
    rig.wait().await.unwrap();
}

// =============================================================================
// Failures and results
// =============================================================================

#[tokio::test]
async fn test_acquisition_failure_preserves_progress() {
    let plan = plan(3, 2, 1, 1e-3);
    let failing = ScriptedProbe::failing_at(probe(), 3);
    let rig = XyzSystem::new(Arc::new(failing), Position::default());
    let mut events = rig.subscribe();

    rig.run_measurement(plan.clone()).await.unwrap();
    let err = rig.wait().await.unwrap_err();
    assert!(matches!(err, RigError::AcquisitionFailure { index: 3, .. }));
    assert!(!err.is_rejection());

    let mut failed_at = None;
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::Failed { index, .. } = event {
            failed_at = Some(index);
        }
    }
    assert_eq!(failed_at, Some(3));

    assert_eq!(rig.state().await, SystemState::Stopped);
    let progress = rig.progress().await.unwrap();
    assert_eq!(progress.last_completed_index(), Some(2));
    assert_eq!(progress.percent_complete(), 50);

    // The fault cleared: resuming completes the scan with the same data
    rig.start().await.unwrap();
    assert_eq!(rig.wait().await.unwrap(), Some(ScanOutcome::Finished));
    assert!(rig.last_error().await.is_none());
    assert_eq!(
        rig.progress().await.unwrap().data(),
        &uninterrupted_payload(&plan).await
    );
}

#[tokio::test]
async fn test_save_measurement() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.json");
    let rig = stopping_rig(1);

    assert!(matches!(
        rig.save_measurement(&path).await,
        Err(RigError::NoMeasurement)
    ));

    rig.run_measurement(plan(2, 2, 1, 1e-3)).await.unwrap();
    rig.wait().await.unwrap();

    let partial = rig.save_measurement(&path).await.unwrap();
    assert_eq!(partial.percent_complete, 50);
    assert!(!partial.is_complete());

    let loaded = MeasurementResult::load(&path).unwrap();
    assert_eq!(loaded, partial);
    assert_eq!(loaded.data.shape(), &[1, 2, 2, 2]);
    assert_eq!(loaded.plan.name(), "integration");
}

#[tokio::test]
async fn test_exit_is_clean_when_idle() {
    let rig = XyzSystem::new(Arc::new(probe()), Position::default());
    rig.exit().await.unwrap();
    assert_eq!(rig.wait().await.unwrap(), None);
}
