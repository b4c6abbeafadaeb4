//! # Compute Backends
//!
//! Implementations of [`ComputeDevice`](flexlink_core::traits::ComputeDevice)
//! and [`ParticleSolver`](flexlink_core::traits::ParticleSolver).

mod memory;

pub use memory::{InMemoryDevice, InMemorySolver, MeshRecord, SolverRecord};
