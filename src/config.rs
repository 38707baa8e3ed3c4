//! Configuration System using Figment
//!
//! Strongly-typed settings for one rig and one measurement plan.
//! Configuration is loaded from:
//! 1. a TOML settings file (base configuration)
//! 2. Environment variables (prefixed with `XYZ_TANK_`, nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use xyz_tank::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load_from("config/xyz_tank.toml")?;
//! let plan = settings.measurement_plan()?;
//! println!("{}: {} points", plan.name(), plan.grid().num_points());
//! # Ok(())
//! # }
//! ```
//!
//! A grid axis is either a half-open range or an explicit list of points:
//!
//! ```toml
//! [plan.grid]
//! x = { start = -1e-3, stop = 6e-3, step = 1e-3 }
//! y = { points = [0.0, 1e-3, 2e-3] }
//! z = { start = -1e-3, stop = 2e-3, step = 1e-3 }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RigError, RigResult};
use crate::experiment::{Grid, GridAxis, MeasurementPlan, Position, Tank};
use crate::logging::{parse_log_level, OutputFormat};

/// Environment variable prefix for overrides, e.g. `XYZ_TANK_RIG__SAMPLE_DELAY_MS=5`
pub const ENV_PREFIX: &str = "XYZ_TANK_";

/// Default settings file location
pub const DEFAULT_SETTINGS_PATH: &str = "config/xyz_tank.toml";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Rig hardware settings
    #[serde(default)]
    pub rig: RigConfig,
    /// The measurement plan
    pub plan: PlanConfig,
    /// Result storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Absolute motor position at power-up [m]
    #[serde(default)]
    pub initial_position: [f64; 3],
    /// Simulated acquisition latency per point in milliseconds
    #[serde(default)]
    pub sample_delay_ms: u64,
}

/// Tank section of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankConfig {
    /// Tank name
    pub name: String,
    /// Inner dimensions along X, Y and Z [m]
    pub dimensions: [f64; 3],
}

/// One grid axis: a half-open range or explicit points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisConfig {
    /// `start..stop` by `step`, stop excluded
    Range {
        /// First point
        start: f64,
        /// Excluded upper (or lower) bound
        stop: f64,
        /// Signed spacing
        step: f64,
    },
    /// Explicit, strictly monotonic points
    Points {
        /// Point coordinates
        points: Vec<f64>,
    },
}

impl AxisConfig {
    fn to_axis(&self) -> RigResult<GridAxis> {
        match self {
            AxisConfig::Range { start, stop, step } => GridAxis::range(*start, *stop, *step),
            AxisConfig::Points { points } => Ok(GridAxis::from_points(points.clone())),
        }
    }
}

/// Grid section of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// X axis
    pub x: AxisConfig,
    /// Y axis
    pub y: AxisConfig,
    /// Z axis
    pub z: AxisConfig,
}

/// Measurement plan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Measurement name
    pub name: String,
    /// Tank the measurement runs in
    pub tank: TankConfig,
    /// Absolute motor position of grid index (0, 0, 0) [m]
    pub reference_position: [f64; 3],
    /// Sample grid
    pub grid: GridConfig,
    /// Motor step along X, Y and Z [m]
    pub grid_precision: [f64; 3],
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for saved measurements
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

// Default value functions
fn default_name() -> String {
    "xyz-tank".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            initial_position: [0.0; 3],
            sample_delay_ms: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Settings {
    /// Load settings from the default location and environment variables
    pub fn load() -> RigResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from a specific file path, then validate them
    ///
    /// Environment variables override the file, e.g.
    /// `XYZ_TANK_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RigError::Configuration(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        let settings: Settings = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> RigResult<()> {
        parse_log_level(&self.application.log_level)?;
        self.application.log_format.parse::<OutputFormat>()?;

        if self.rig.initial_position.iter().any(|p| !p.is_finite()) {
            return Err(RigError::Configuration(format!(
                "rig.initial_position must be finite, got {:?}",
                self.rig.initial_position
            )));
        }

        self.measurement_plan()?;
        Ok(())
    }

    /// Build the measurement plan described by the `[plan]` section.
    ///
    /// # Errors
    ///
    /// `InvalidPlan` if the grid, tank or precision is malformed.
    pub fn measurement_plan(&self) -> RigResult<MeasurementPlan> {
        let plan = &self.plan;
        let grid = Grid::new(
            plan.grid.x.to_axis()?,
            plan.grid.y.to_axis()?,
            plan.grid.z.to_axis()?,
        )?;
        MeasurementPlan::new(
            plan.name.clone(),
            Arc::new(Tank::new(plan.tank.name.clone(), plan.tank.dimensions)?),
            Position::from(plan.reference_position),
            grid,
            plan.grid_precision,
        )
    }

    /// Motor position at power-up.
    pub fn initial_position(&self) -> Position {
        Position::from(self.rig.initial_position)
    }
}
