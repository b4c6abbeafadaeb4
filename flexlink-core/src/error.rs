//! # Error Types for flexlink
//!
//! Unified error handling across the flexlink crates.
//!
//! Construction-time failures (library, context, solver, container) are
//! carried by [`DeviceInitError`] so callers can tell a missing compute
//! device apart from a solver-library failure. Everything that can go wrong
//! during a step is a [`BridgeError`].

use thiserror::Error;

/// Failure while bringing up the compute device or one of the solver objects
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceInitError {
    /// No usable compute device was found
    #[error("no compute device available: {0}")]
    NoComputeDevice(String),

    /// The solver library refused to initialize
    #[error("solver library failed to initialize: {0}")]
    Library(String),

    /// Solver creation failed (usually insufficient device memory)
    #[error("solver creation failed: {0}")]
    Solver(String),

    /// Particle container creation failed
    #[error("particle container creation failed: {0}")]
    Container(String),
}

impl DeviceInitError {
    /// True when the failure is the absence of a device rather than a library fault
    pub fn is_missing_device(&self) -> bool {
        matches!(self, Self::NoComputeDevice(_))
    }
}

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Device, context, library, solver or container could not be created
    #[error("device initialization error: {0}")]
    DeviceInit(#[from] DeviceInitError),

    /// The particle pool could not grow to the logical point count
    #[error("particle capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: usize, available: usize },

    /// An attribute the sync phase needs is absent on the host geometry
    #[error("object {object}: missing attribute '{attribute}'")]
    MissingCollaboratorData { object: String, attribute: String },

    /// Operation on a collision proxy key that does not exist
    #[error("unknown collision key '{0}'")]
    InvalidKey(String),

    /// Object is not in a state where the operation is allowed
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A device-side call failed after initialization
    #[error("device error: {0}")]
    Device(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Create a device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create an invalid state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing attribute error for an object
    pub fn missing(object: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingCollaboratorData {
            object: object.into(),
            attribute: attribute.into(),
        }
    }

    /// Short category name, used as a structured logging field
    pub fn category(&self) -> &'static str {
        match self {
            Self::DeviceInit(_) => "device_init",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::MissingCollaboratorData { .. } => "missing_collaborator_data",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidState(_) => "invalid_state",
            Self::Device(_) => "device",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_init_messages_are_distinguishable() {
        let missing = DeviceInitError::NoComputeDevice("no adapters".into());
        let library = DeviceInitError::Library("version mismatch".into());

        assert!(missing.is_missing_device());
        assert!(!library.is_missing_device());
        assert!(missing.to_string().contains("no compute device"));
        assert!(library.to_string().contains("solver library"));
    }

    #[test]
    fn test_capacity_message_carries_counts() {
        let err = BridgeError::CapacityExceeded {
            requested: 5,
            available: 3,
        };
        let text = err.to_string();
        assert!(text.contains('5'));
        assert!(text.contains('3'));
        assert_eq!(err.category(), "capacity_exceeded");
    }

    #[test]
    fn test_device_init_converts() {
        let err: BridgeError = DeviceInitError::Solver("out of memory".into()).into();
        assert!(matches!(err, BridgeError::DeviceInit(DeviceInitError::Solver(_))));
    }
}
