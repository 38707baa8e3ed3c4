//! Mock Hardware Implementations
//!
//! Simulated acquisition devices for running the rig without an oscilloscope.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockProbe` - Hydrophone in a focused ultrasound field, deterministic
//! - `ScriptedProbe` - `MockProbe` that fails once at a chosen sample
//!
//! # Performance Characteristics
//!
//! - MockProbe: no latency by default, configurable per sample

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::experiment::Position;
use crate::hardware::capabilities::Acquisition;

/// Channels produced by the probe: positive and negative pressure peak.
pub const PROBE_CHANNELS: usize = 2;

// =============================================================================
// MockProbe - Simulated Hydrophone
// =============================================================================

/// Mock hydrophone sampling a Gaussian focal spot.
///
/// The returned payload is `[p_plus, p_minus]` in pascal, a pure function of
/// the sample position unless noise is enabled. Noise comes from a seeded RNG,
/// so two probes built with the same seed return the same sequence.
///
/// # Example
///
/// ```rust,ignore
/// let probe = MockProbe::new(Position::new(0.0, 0.0, 0.05));
/// let peaks = probe.sample(Position::new(0.0, 0.0, 0.05)).await?;
/// assert_eq!(peaks[0], 1.0e6);
/// ```
pub struct MockProbe {
    focus: Position,
    peak_pa: f32,
    beam_width: f64,
    latency: Duration,
    noise: Option<(f32, Mutex<StdRng>)>,
    samples: AtomicUsize,
    history: Mutex<Vec<Position>>,
}

impl MockProbe {
    /// Probe with a 1 MPa focus at `focus` and a 10 mm beam width.
    pub fn new(focus: Position) -> Self {
        Self {
            focus,
            peak_pa: 1.0e6,
            beam_width: 10e-3,
            latency: Duration::ZERO,
            noise: None,
            samples: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Simulate `latency` of acquisition per sample.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add uniform noise of `amplitude` pascal, drawn from an RNG seeded
    /// with `seed`.
    pub fn with_noise(mut self, amplitude: f32, seed: u64) -> Self {
        self.noise = Some((amplitude, Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    /// Number of samples taken so far.
    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    /// Positions of every sample taken so far, in order.
    pub fn sampled_positions(&self) -> Vec<Position> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Noise-free field value at `at`.
    pub fn field_at(&self, at: Position) -> [f32; PROBE_CHANNELS] {
        let dx = at.x - self.focus.x;
        let dy = at.y - self.focus.y;
        let dz = at.z - self.focus.z;
        let r2 = dx * dx + dy * dy + dz * dz;
        let gain = (-r2 / (2.0 * self.beam_width * self.beam_width)).exp() as f32;
        let p_plus = self.peak_pa * gain;
        [p_plus, -0.6 * p_plus]
    }

    fn noise(&self) -> f32 {
        match &self.noise {
            Some((amplitude, rng)) => match rng.lock() {
                Ok(mut rng) => rng.gen_range(-1.0f32..=1.0) * amplitude,
                Err(_) => 0.0,
            },
            None => 0.0,
        }
    }
}

#[async_trait]
impl Acquisition for MockProbe {
    fn channels(&self) -> usize {
        PROBE_CHANNELS
    }

    async fn sample(&self, at: Position) -> Result<Vec<f32>> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        self.samples.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut history) = self.history.lock() {
            history.push(at);
        }

        Ok(self
            .field_at(at)
            .iter()
            .map(|p| p + self.noise())
            .collect())
    }
}

// =============================================================================
// ScriptedProbe - Fault Injection
// =============================================================================

/// Mock probe that fails exactly once, on its `fail_at`-th sample (0-based).
///
/// Calls after the failure succeed again, so a resumed scan can complete.
pub struct ScriptedProbe {
    inner: MockProbe,
    fail_at: usize,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    /// Wrap `inner`, failing on call number `fail_at`.
    pub fn failing_at(inner: MockProbe, fail_at: usize) -> Self {
        Self {
            inner,
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    /// The wrapped probe.
    pub fn inner(&self) -> &MockProbe {
        &self.inner
    }
}

#[async_trait]
impl Acquisition for ScriptedProbe {
    fn channels(&self) -> usize {
        self.inner.channels()
    }

    async fn sample(&self, at: Position) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_at {
            return Err(anyhow!("scripted trigger timeout on sample {}", call));
        }
        self.inner.sample(at).await
    }
}
