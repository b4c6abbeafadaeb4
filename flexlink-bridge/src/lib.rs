//! # flexlink Bridge
//!
//! Keeps host geometry and a particle/constraint solver in step.
//!
//! Each simulated object owns a container on the shared compute device.
//! Once per host time step the [`StepOrchestrator`] maps the object's
//! logical points onto solver particle slots, uploads whatever changed
//! (particles, springs, cloth triangles, rigid clusters, collision
//! proxies), runs the solver and writes the results back onto the host
//! geometry.
//!
//! ## Backends
//!
//! The device and solver sit behind the capability traits in
//! `flexlink_core::traits`. This crate ships the in-memory backend, which
//! the process-wide [`DeviceRegistry::global`] uses and the tests drive
//! directly.

pub mod allocator;
pub mod backend;
pub mod buffer;
pub mod catalog;
pub mod container;
pub mod orchestrator;
pub mod particles;
pub mod session;
pub mod topology;
pub mod trimesh;

pub use allocator::{ActiveList, ParticleIndexAllocator, Reconciliation, SlotPool};
pub use backend::{InMemoryDevice, InMemorySolver, MeshRecord, SolverRecord};
pub use buffer::{MappedBuffer, MappedView};
pub use catalog::{CollisionCatalog, MappedCatalog, ProxyShape, ProxyView};
pub use container::{ContainerSession, ObservedStamps, SharedContainer, SimulationData};
pub use orchestrator::{CollisionShape, CollisionSource, ObjectReport, SimObject, StepOrchestrator, StepReport};
pub use particles::{ParticleData, WriteBackStats, DEFAULT_PHASE};
pub use session::{tracing_log_callback, ContextGuard, DeviceFactory, DeviceRegistry, DeviceSession};
pub use topology::{ConstraintBuffers, NormalSource, TopologyStamps, TopologySummary};
pub use trimesh::TriangleMesh;
