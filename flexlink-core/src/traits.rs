//! # Traits - Abstractions over the Compute Device
//!
//! The solver library and its device are consumed only through these
//! traits. Production code puts an adapter over the native library behind
//! them; tests and the demo binary use the in-memory backend.
//!
//! ## Key Traits
//!
//! - `ComputeDevice`: library handle + device context, device memory, mesh assets
//! - `ParticleSolver`: one solver instance; buffers are handed over by id
//! - `ShapeSink`: receiver of the complete collision shape set
//!
//! Every buffer argument is a [`DeviceBufferId`] naming memory created by
//! the same device. The solver reads from (and, for results, writes into)
//! device memory; the host sees the data only through mapping.

use std::sync::Arc;

use crate::config::ContainerConfig;
use crate::error::{BridgeResult, DeviceInitError};
use crate::params::SolverParams;
use crate::soa::{Float3, TriangleMeshId};

/// Handle to one block of device memory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceBufferId(pub u64);

/// Whatever context was current before `make_current`, to be handed back
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ContextToken(pub u64);

/// Severity of a message reported by the solver library
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SolverLogSeverity {
    Error,
    Warning,
    Debug,
    All,
}

/// Callback the solver library reports through
pub type SolverLogCallback = Arc<dyn Fn(SolverLogSeverity, &str) + Send + Sync>;

/// Compute device trait - library handle plus device context
///
/// One instance exists per process while at least one session holds it.
/// Every call that touches device state must happen between
/// `make_current` and `restore_context`.
pub trait ComputeDevice: Send + Sync {
    /// Make this device's context current; returns the previous one
    fn make_current(&self) -> ContextToken;

    /// Restore the context returned by `make_current`
    fn restore_context(&self, previous: ContextToken);

    /// Allocate `bytes` of device memory, zero-filled
    fn create_buffer(&self, label: &str, bytes: usize) -> BridgeResult<DeviceBufferId>;

    /// Replace a buffer's contents (and size) with `data`
    fn write_buffer(&self, id: DeviceBufferId, data: &[u8]) -> BridgeResult<()>;

    /// Copy a buffer's contents into `out`; sizes must match
    fn read_buffer(&self, id: DeviceBufferId, out: &mut [u8]) -> BridgeResult<()>;

    /// Current size of a buffer in bytes
    fn buffer_len(&self, id: DeviceBufferId) -> BridgeResult<usize>;

    /// Release a buffer; unknown ids are ignored
    fn destroy_buffer(&self, id: DeviceBufferId);

    /// Register an empty triangle mesh asset
    fn create_triangle_mesh(&self) -> BridgeResult<TriangleMeshId>;

    /// Point a mesh asset at vertex/index buffers and record its bounds
    fn update_triangle_mesh(&self, mesh: TriangleMeshId, update: &TriangleMeshUpdate) -> BridgeResult<()>;

    /// Release a mesh asset; unknown ids are ignored
    fn destroy_triangle_mesh(&self, mesh: TriangleMeshId);

    /// Create a solver sized for one particle container
    fn create_solver(&self, config: &ContainerConfig) -> Result<Box<dyn ParticleSolver>, DeviceInitError>;

    /// Tear down the library and context; called once when the last session drops
    fn shutdown(&self) {}

    /// Name of this device (for logging)
    fn name(&self) -> &'static str;
}

/// Arguments for [`ComputeDevice::update_triangle_mesh`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleMeshUpdate {
    /// `[f32; 3]` per vertex
    pub vertices: DeviceBufferId,
    /// Three `i32` per triangle
    pub indices: DeviceBufferId,
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub lower: Float3,
    pub upper: Float3,
}

/// Receiver of the full collision shape set
///
/// Each call replaces whatever shapes the receiver had before.
pub trait ShapeSink {
    fn set_shapes(&mut self, shapes: &ShapeBuffers, count: usize) -> BridgeResult<()>;
}

/// The six parallel collision shape arrays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShapeBuffers {
    /// `CollisionGeometry` per shape
    pub geometry: DeviceBufferId,
    /// `[f32; 4]` per shape
    pub positions: DeviceBufferId,
    /// `Quat` per shape
    pub rotations: DeviceBufferId,
    pub prev_positions: DeviceBufferId,
    pub prev_rotations: DeviceBufferId,
    /// `ShapeFlags` per shape
    pub flags: DeviceBufferId,
}

/// Per-slot particle arrays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParticleBuffers {
    /// `[f32; 4]`: xyz + inverse mass
    pub positions: DeviceBufferId,
    /// `[f32; 3]`
    pub velocities: DeviceBufferId,
    /// `i32` phase word
    pub phases: DeviceBufferId,
    /// `[f32; 4]`, w = 1
    pub rest_positions: DeviceBufferId,
}

/// Spring constraint arrays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpringBuffers {
    /// Two `i32` slots per spring
    pub indices: DeviceBufferId,
    /// `f32` rest length per spring
    pub lengths: DeviceBufferId,
    /// `f32` stiffness per spring
    pub coefficients: DeviceBufferId,
}

/// Dynamic (cloth) triangle arrays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleBuffers {
    /// Three `i32` slots per triangle
    pub indices: DeviceBufferId,
    /// `[f32; 3]` per triangle, when normals are supplied
    pub normals: Option<DeviceBufferId>,
}

/// Rigid cluster arrays, CSR layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RigidBuffers {
    /// `i32`, one more entry than there are clusters
    pub offsets: DeviceBufferId,
    /// `i32` particle slot per member
    pub indices: DeviceBufferId,
    /// `[f32; 3]` per member
    pub rest_positions: DeviceBufferId,
    /// `[f32; 4]` per member, signed distance in w
    pub rest_normals: DeviceBufferId,
    /// `f32` per cluster
    pub stiffness: DeviceBufferId,
    /// `Quat` per cluster
    pub rotations: DeviceBufferId,
    /// `[f32; 3]` per cluster
    pub translations: DeviceBufferId,
}

/// Particle solver trait - one solver instance per container
///
/// `set_*` calls read device memory at call time; `update` consumes what
/// was set; `get_*` calls write results back into device memory.
pub trait ParticleSolver: ShapeSink + Send {
    fn set_params(&mut self, params: &SolverParams) -> BridgeResult<()>;

    fn params(&self) -> &SolverParams;

    /// Upload particle data for every slot
    fn set_particles(&mut self, particles: &ParticleBuffers) -> BridgeResult<()>;

    /// Upload the active slot list (`i32` per entry)
    fn set_active(&mut self, active: DeviceBufferId, count: usize) -> BridgeResult<()>;

    fn set_springs(&mut self, springs: &SpringBuffers, count: usize) -> BridgeResult<()>;

    fn set_dynamic_triangles(&mut self, triangles: &TriangleBuffers, count: usize) -> BridgeResult<()>;

    fn set_rigids(&mut self, rigids: &RigidBuffers, count: usize, index_count: usize) -> BridgeResult<()>;

    /// Advance by `dt` split into `substeps`
    fn update(&mut self, dt: f32, substeps: u32) -> BridgeResult<()>;

    /// Write positions, velocities and phases into the given buffers
    fn get_particles(&mut self, particles: &ParticleBuffers) -> BridgeResult<()>;

    /// Write rigid rotations and translations into the given buffers
    fn get_rigid_transforms(&mut self, rotations: DeviceBufferId, translations: DeviceBufferId) -> BridgeResult<()>;

    /// Name of this solver (for logging)
    fn name(&self) -> &'static str;
}
