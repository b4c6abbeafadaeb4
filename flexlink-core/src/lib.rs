//! # flexlink Core
//!
//! Core types and traits for flexlink, the bridge between attribute-based
//! host geometry and a device-resident particle solver.
//!
//! This crate provides the fundamental building blocks:
//! - **Geometry**: the host's points, primitives and stamped attributes
//! - **ChangeStamp**: version tokens used for dirty tracking
//! - **SoA layouts**: the packed element types the solver consumes
//! - **Traits**: the device and solver capability interfaces
//!
//! ## Memory Layout
//!
//! All element types that reach the device use `#[repr(C)]` for predictable
//! memory layout, enabling direct buffer mapping via `bytemuck`.

pub mod config;
pub mod error;
pub mod geometry;
pub mod params;
pub mod soa;
pub mod stamp;
pub mod traits;

// Re-export main types at crate root
pub use config::{ContainerConfig, FlexlinkConfig, LogConfig, SolverSettings};
pub use error::{BridgeError, BridgeResult, DeviceInitError};
pub use geometry::{attr, AttributeClass, AttributeData, AttributeKind, Geometry, SharedGeometry};
pub use params::{SolverParams, FIXED_PLANES};
pub use soa::{CollisionGeometry, Float3, Float4, Phase, Quat, ShapeFlags, ShapeType, TriangleMeshId};
pub use stamp::ChangeStamp;
pub use traits::*;
