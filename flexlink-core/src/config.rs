//! # Configuration
//!
//! Container sizing, solver tunables and diagnostic verbosity.
//!
//! `max_particles` is fixed for the lifetime of a container: the slot pool
//! is allocated once at creation and changing the value means tearing the
//! container down and building a new one.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Master configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlexlinkConfig {
    /// Particle container sizing
    pub container: ContainerConfig,

    /// Solver tunables
    pub solver: SolverSettings,

    /// Diagnostics
    pub log: LogConfig,
}

/// Particle container sizing, immutable after the container exists
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Slot pool capacity
    pub max_particles: usize,

    /// Diffuse (spray/foam) particle capacity
    pub max_diffuse_particles: usize,

    /// Neighbour list length per particle
    pub max_neighbours: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_particles: 1_000_000,
            max_diffuse_particles: 0,
            max_neighbours: 96,
        }
    }
}

impl ContainerConfig {
    pub fn with_capacity(max_particles: usize) -> Self {
        Self {
            max_particles,
            ..Self::default()
        }
    }
}

/// Solver tunables, as exposed to the user
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Particle radius
    pub radius: f32,

    /// Constraint iterations per substep
    pub iterations: u32,

    /// Substeps per step
    pub substeps: u32,

    pub max_speed: f32,
    pub max_acceleration: f32,
    pub sleep_threshold: f32,

    /// Enable fluid behaviour for fluid-phase particles
    pub fluid: bool,

    /// Fluid rest distance as a fraction of the radius
    pub fluid_rest_distance_mult: f32,

    /// Number of fixed collision planes in use (0..=5)
    pub planes_count: u32,

    // === FLUID ===
    pub adhesion: f32,
    pub cohesion: f32,
    pub surface_tension: f32,
    pub viscosity: f32,
    pub relaxation_factor: f32,
    pub solid_pressure: f32,
    pub vorticity_confinement: f32,
    pub buoyancy: f32,

    // === FRICTION / CLOTH ===
    pub dynamic_friction: f32,
    pub static_friction: f32,
    pub particle_friction: f32,
    pub free_surface_drag: f32,
    pub drag: f32,
    pub lift: f32,
    pub wind: [f32; 3],

    // === COLLISION ===
    pub shape_collision_margin: f32,
    pub particle_collision_margin: f32,
    pub collision_distance: f32,
    pub shock_propagation: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            radius: 0.2,
            iterations: 3,
            substeps: 6,
            max_speed: f32::MAX,
            max_acceleration: 1000.0,
            sleep_threshold: 0.0,
            fluid: true,
            fluid_rest_distance_mult: 0.55,
            planes_count: 1,

            adhesion: 0.0,
            cohesion: 0.025,
            surface_tension: 0.0,
            viscosity: 0.0,
            relaxation_factor: 1.0,
            solid_pressure: 0.1,
            vorticity_confinement: 0.0,
            buoyancy: 1.0,

            dynamic_friction: 0.1,
            static_friction: 0.0,
            particle_friction: 0.0,
            free_surface_drag: 0.0,
            drag: 0.0,
            lift: 0.0,
            wind: [0.0; 3],

            shape_collision_margin: 0.05,
            particle_collision_margin: 0.0,
            collision_distance: 0.0275,
            shock_propagation: 0.0,
        }
    }
}

impl SolverSettings {
    /// Highest number of fixed collision planes
    pub const MAX_PLANES: u32 = 5;

    /// Clamp counts into range; reject values the solver cannot use
    pub fn validate(&mut self) -> BridgeResult<()> {
        if !(self.radius >= 0.0) {
            return Err(BridgeError::config(format!(
                "radius must be non-negative, got {}",
                self.radius
            )));
        }
        self.iterations = self.iterations.max(1);
        self.substeps = self.substeps.max(1);
        self.planes_count = self.planes_count.min(Self::MAX_PLANES);
        Ok(())
    }
}

/// Diagnostic output volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 0 = errors, 1 = warnings, 2 = info, 3 = debug, 4+ = trace
    pub verbosity: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { verbosity: 1 }
    }
}

impl LogConfig {
    /// Read `FLEXLINK_VERBOSITY`; unset or unparsable keeps the default
    pub fn from_env() -> Self {
        let verbosity = env_parse("FLEXLINK_VERBOSITY").unwrap_or(Self::default().verbosity);
        Self { verbosity }
    }
}

impl FlexlinkConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.solver.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &str) -> BridgeResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create config from environment variables
    ///
    /// Reads:
    /// - FLEXLINK_MAX_PARTICLES: slot pool capacity (default: 1000000)
    /// - FLEXLINK_SUBSTEPS: substeps per step (default: 6)
    /// - FLEXLINK_ITERATIONS: constraint iterations (default: 3)
    /// - FLEXLINK_RADIUS: particle radius (default: 0.2)
    /// - FLEXLINK_VERBOSITY: diagnostic level (default: 1)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("FLEXLINK_MAX_PARTICLES") {
            config.container.max_particles = v;
        }
        if let Some(v) = env_parse("FLEXLINK_SUBSTEPS") {
            config.solver.substeps = v;
        }
        if let Some(v) = env_parse("FLEXLINK_ITERATIONS") {
            config.solver.iterations = v;
        }
        if let Some(v) = env_parse("FLEXLINK_RADIUS") {
            config.solver.radius = v;
        }
        config.log = LogConfig::from_env();

        if config.solver.validate().is_err() {
            // unusable radius from the environment: fall back to the default
            config.solver.radius = SolverSettings::default().radius;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlexlinkConfig::default();
        assert_eq!(config.container.max_particles, 1_000_000);
        assert_eq!(config.container.max_neighbours, 96);
        assert_eq!(config.solver.substeps, 6);
        assert_eq!(config.solver.iterations, 3);
        assert_eq!(config.solver.planes_count, 1);
    }

    #[test]
    fn test_validate_clamps() {
        let mut settings = SolverSettings {
            iterations: 0,
            substeps: 0,
            planes_count: 9,
            ..SolverSettings::default()
        };
        settings.validate().unwrap();
        assert_eq!(settings.iterations, 1);
        assert_eq!(settings.substeps, 1);
        assert_eq!(settings.planes_count, SolverSettings::MAX_PLANES);

        settings.radius = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flexlink.json");
        let path = path.to_str().unwrap();

        let mut config = FlexlinkConfig::default();
        config.container.max_particles = 4096;
        config.solver.wind = [1.0, 0.0, -1.0];
        config.save(path).unwrap();

        let loaded = FlexlinkConfig::load(path).unwrap();
        assert_eq!(loaded.container, config.container);
        assert_eq!(loaded.solver, config.solver);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = FlexlinkConfig::load("/nonexistent/flexlink.json").unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
