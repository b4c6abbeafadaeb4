//! # Solver Parameter Block
//!
//! The flat parameter block handed to the solver before every step, derived
//! from [`SolverSettings`] plus per-object force contributions.

use serde::{Deserialize, Serialize};

use crate::config::SolverSettings;
use crate::soa::Float3;

/// Collision plane as `(nx, ny, nz, d)`, with `n·x + d = 0`
pub type Plane = [f32; 4];

/// Fixed plane set: floor, then four walls
pub const FIXED_PLANES: [Plane; 5] = [
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 4.0],
    [1.0, 0.0, 0.0, 2.0],
    [-1.0, 0.0, 0.0, 2.0],
    [0.0, 0.0, -1.0, 4.0],
];

/// How constraint corrections are relaxed between iterations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelaxationMode {
    Global,
    Local,
}

/// Parameter block consumed by the solver
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverParams {
    pub num_iterations: u32,
    pub gravity: Float3,
    pub radius: f32,
    pub solid_rest_distance: f32,
    pub fluid_rest_distance: f32,

    pub dynamic_friction: f32,
    pub static_friction: f32,
    pub particle_friction: f32,
    pub restitution: f32,
    pub adhesion: f32,
    pub sleep_threshold: f32,
    pub max_speed: f32,
    pub max_acceleration: f32,
    pub shock_propagation: f32,
    pub dissipation: f32,
    pub damping: f32,

    pub wind: Float3,
    pub drag: f32,
    pub lift: f32,

    pub fluid: bool,
    pub cohesion: f32,
    pub surface_tension: f32,
    pub viscosity: f32,
    pub vorticity_confinement: f32,
    pub anisotropy_scale: f32,
    pub anisotropy_min: f32,
    pub anisotropy_max: f32,
    pub smoothing: f32,
    pub solid_pressure: f32,
    pub free_surface_drag: f32,
    pub buoyancy: f32,

    pub collision_distance: f32,
    pub particle_collision_margin: f32,
    pub shape_collision_margin: f32,

    pub planes: [Plane; 8],
    pub num_planes: u32,

    pub relaxation_mode: RelaxationMode,
    pub relaxation_factor: f32,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self::from_settings(&SolverSettings::default())
    }
}

impl SolverParams {
    /// Derive the block from user settings; gravity starts at zero
    pub fn from_settings(settings: &SolverSettings) -> Self {
        let fluid_rest_distance = settings.radius * settings.fluid_rest_distance_mult;

        let mut planes = [[0.0; 4]; 8];
        planes[..FIXED_PLANES.len()].copy_from_slice(&FIXED_PLANES);

        Self {
            num_iterations: settings.iterations.max(1),
            gravity: [0.0; 3],
            radius: settings.radius,
            solid_rest_distance: fluid_rest_distance,
            fluid_rest_distance,

            dynamic_friction: settings.dynamic_friction,
            static_friction: settings.static_friction,
            particle_friction: settings.particle_friction,
            restitution: 0.0,
            adhesion: settings.adhesion,
            sleep_threshold: settings.sleep_threshold,
            max_speed: settings.max_speed,
            max_acceleration: settings.max_acceleration,
            shock_propagation: settings.shock_propagation,
            dissipation: 0.0,
            damping: 0.0,

            wind: settings.wind,
            drag: settings.drag,
            lift: settings.lift,

            fluid: settings.fluid,
            cohesion: settings.cohesion,
            surface_tension: settings.surface_tension,
            viscosity: settings.viscosity,
            vorticity_confinement: settings.vorticity_confinement,
            anisotropy_scale: 0.0,
            anisotropy_min: 0.1,
            anisotropy_max: 2.0,
            smoothing: 0.0,
            solid_pressure: settings.solid_pressure,
            free_surface_drag: settings.free_surface_drag,
            buoyancy: settings.buoyancy,

            collision_distance: settings.collision_distance,
            particle_collision_margin: settings.particle_collision_margin,
            shape_collision_margin: settings.shape_collision_margin,

            planes,
            num_planes: settings.planes_count.min(FIXED_PLANES.len() as u32),

            relaxation_mode: RelaxationMode::Local,
            relaxation_factor: settings.relaxation_factor,
        }
    }

    /// Accumulate an external acceleration into gravity
    pub fn add_gravity(&mut self, g: Float3) {
        for (acc, v) in self.gravity.iter_mut().zip(g) {
            *acc += v;
        }
    }

    /// Planes the solver should collide against
    pub fn active_planes(&self) -> &[Plane] {
        &self.planes[..self.num_planes as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_distances() {
        let settings = SolverSettings {
            radius: 0.4,
            fluid_rest_distance_mult: 0.5,
            ..SolverSettings::default()
        };
        let params = SolverParams::from_settings(&settings);
        assert!((params.fluid_rest_distance - 0.2).abs() < 1e-6);
        assert_eq!(params.solid_rest_distance, params.fluid_rest_distance);
        assert_eq!(params.gravity, [0.0; 3]);
        assert_eq!(params.relaxation_mode, RelaxationMode::Local);
    }

    #[test]
    fn test_gravity_accumulates() {
        let mut params = SolverParams::default();
        params.add_gravity([0.0, -9.8, 0.0]);
        params.add_gravity([1.0, 0.0, 0.0]);
        assert_eq!(params.gravity, [1.0, -9.8, 0.0]);
    }

    #[test]
    fn test_active_planes() {
        let settings = SolverSettings {
            planes_count: 3,
            ..SolverSettings::default()
        };
        let params = SolverParams::from_settings(&settings);
        assert_eq!(params.active_planes().len(), 3);
        assert_eq!(params.active_planes()[0], [0.0, 1.0, 0.0, 0.0]);
    }
}
