//! # Device Session
//!
//! One library handle and one device context exist per process. Every
//! simulation object that needs them holds a [`DeviceSession`]; the
//! registry creates the device when the first session opens and shuts it
//! down when the last one drops.
//!
//! Touching the device requires a [`ContextGuard`] from
//! [`DeviceSession::acquire`]. The guard restores the previous context when
//! it goes out of scope, on every exit path.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use flexlink_core::error::DeviceInitError;
use flexlink_core::traits::{ComputeDevice, ContextToken, SolverLogCallback, SolverLogSeverity};

use crate::backend::InMemoryDevice;

/// Builds the process-wide device on the first session
pub type DeviceFactory = Arc<dyn Fn() -> Result<Arc<dyn ComputeDevice>, DeviceInitError> + Send + Sync>;

struct RegistryState {
    device: Option<Arc<dyn ComputeDevice>>,
    holders: usize,
}

/// Reference-counted owner of the device
pub struct DeviceRegistry {
    factory: DeviceFactory,
    state: Mutex<RegistryState>,
}

static GLOBAL: OnceLock<Arc<DeviceRegistry>> = OnceLock::new();

impl DeviceRegistry {
    pub fn new(factory: DeviceFactory) -> Arc<Self> {
        Arc::new(Self {
            factory,
            state: Mutex::new(RegistryState {
                device: None,
                holders: 0,
            }),
        })
    }

    /// Registry over an already constructed device
    pub fn with_device(device: Arc<dyn ComputeDevice>) -> Arc<Self> {
        Self::new(Arc::new(move || Ok::<_, DeviceInitError>(Arc::clone(&device))))
    }

    /// The process-wide registry, backed by the in-memory device
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| {
            Self::new(Arc::new(|| {
                let device = InMemoryDevice::new().with_log_callback(tracing_log_callback());
                Ok::<_, DeviceInitError>(Arc::new(device) as Arc<dyn ComputeDevice>)
            }))
        }))
    }

    /// Open a session, creating the device if none is live
    pub fn open(self: &Arc<Self>) -> Result<DeviceSession, DeviceInitError> {
        let mut state = self.state.lock();
        let device = match state.device.clone() {
            Some(device) => device,
            None => {
                let device = (self.factory)().map_err(|e| {
                    error!("❌ Device initialization failed: {}", e);
                    e
                })?;
                info!("🖥️ Solver library initialized on {} device", device.name());
                state.device = Some(Arc::clone(&device));
                device
            }
        };
        state.holders += 1;
        debug!(holders = state.holders, "library holder acquired");
        Ok(DeviceSession {
            registry: Arc::clone(self),
            device,
        })
    }

    /// Number of live sessions
    pub fn holders(&self) -> usize {
        self.state.lock().holders
    }

    /// True while a device exists
    pub fn is_live(&self) -> bool {
        self.state.lock().device.is_some()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.holders = state.holders.saturating_sub(1);
        debug!(holders = state.holders, "library holder released");
        if state.holders == 0 {
            if let Some(device) = state.device.take() {
                device.shutdown();
                info!("🖥️ Solver library shut down");
            }
        }
    }
}

/// Shared handle on the process-wide device
pub struct DeviceSession {
    registry: Arc<DeviceRegistry>,
    device: Arc<dyn ComputeDevice>,
}

impl DeviceSession {
    /// Make the device context current until the guard drops
    pub fn acquire(&self) -> ContextGuard<'_> {
        let previous = self.device.make_current();
        ContextGuard {
            device: self.device.as_ref(),
            previous,
        }
    }

    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}

impl Clone for DeviceSession {
    fn clone(&self) -> Self {
        let mut state = self.registry.state.lock();
        state.holders += 1;
        debug!(holders = state.holders, "library holder acquired");
        Self {
            registry: Arc::clone(&self.registry),
            device: Arc::clone(&self.device),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.registry.release();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device.name())
            .finish()
    }
}

/// Scoped device context; restores the previous context on drop
pub struct ContextGuard<'a> {
    device: &'a dyn ComputeDevice,
    previous: ContextToken,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.device.restore_context(self.previous);
    }
}

/// Solver log callback that forwards into `tracing`
pub fn tracing_log_callback() -> SolverLogCallback {
    Arc::new(|severity: SolverLogSeverity, message: &str| match severity {
        SolverLogSeverity::Error => error!(target: "flexlink::solver", "{}", message),
        SolverLogSeverity::Warning => warn!(target: "flexlink::solver", "{}", message),
        SolverLogSeverity::Debug => debug!(target: "flexlink::solver", "{}", message),
        SolverLogSeverity::All => trace!(target: "flexlink::solver", "{}", message),
    })
}
