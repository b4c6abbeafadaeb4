//! # Container Session
//!
//! Everything one simulated object owns on the device: the solver, its
//! particle slot pool, the particle, constraint and collision arrays.
//!
//! [`SimulationData`] is what the host object holds. Creation failures are
//! kept as a persistent invalid state instead of a half-built container, and
//! a container can be co-owned by several host objects until one of them
//! diverges and calls [`SimulationData::detach`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use flexlink_core::config::ContainerConfig;
use flexlink_core::error::{BridgeError, DeviceInitError};
use flexlink_core::stamp::ChangeStamp;
use flexlink_core::traits::ParticleSolver;

use crate::allocator::{ActiveList, ParticleIndexAllocator};
use crate::catalog::CollisionCatalog;
use crate::particles::ParticleData;
use crate::session::{DeviceRegistry, DeviceSession};
use crate::topology::{ConstraintBuffers, TopologyStamps};

/// Device state of one simulated object
///
/// Field order matters: device resources drop before the session that
/// keeps the device alive.
pub struct ContainerSession {
    pub(crate) solver: Box<dyn ParticleSolver>,
    pub(crate) allocator: ParticleIndexAllocator,
    pub(crate) particles: ParticleData,
    pub(crate) constraints: ConstraintBuffers,
    pub(crate) collisions: CollisionCatalog,
    pub(crate) active: ActiveList,
    config: ContainerConfig,
    pub(crate) session: DeviceSession,
}

fn container_error(e: BridgeError) -> DeviceInitError {
    match e {
        BridgeError::DeviceInit(inner) => inner,
        other => DeviceInitError::Container(other.to_string()),
    }
}

impl ContainerSession {
    /// Create the solver and all arrays for `config.max_particles` slots
    pub fn create(session: DeviceSession, config: &ContainerConfig) -> Result<Self, DeviceInitError> {
        let (solver, particles, constraints, collisions) = {
            let _context = session.acquire();
            let device = Arc::clone(session.device());
            let solver = device.create_solver(config)?;
            let particles = ParticleData::new(Arc::clone(&device), config.max_particles).map_err(container_error)?;
            let constraints = ConstraintBuffers::new(Arc::clone(&device)).map_err(container_error)?;
            let collisions = CollisionCatalog::new(device).map_err(container_error)?;
            (solver, particles, constraints, collisions)
        };
        info!(
            capacity = config.max_particles,
            solver = solver.name(),
            "🧪 Particle container created"
        );
        Ok(Self {
            solver,
            allocator: ParticleIndexAllocator::new(config.max_particles),
            particles,
            constraints,
            collisions,
            active: ActiveList::default(),
            config: config.clone(),
            session,
        })
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.max_particles
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn solver(&self) -> &dyn ParticleSolver {
        self.solver.as_ref()
    }

    /// Slot mapping from the last particle sync
    pub fn active(&self) -> &ActiveList {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.allocator.active_count()
    }

    pub fn collisions(&self) -> &CollisionCatalog {
        &self.collisions
    }

    pub fn constraints(&self) -> &ConstraintBuffers {
        &self.constraints
    }
}

impl std::fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("capacity", &self.config.max_particles)
            .field("active", &self.allocator.active_count())
            .field("collisions", &self.collisions.len())
            .finish()
    }
}

/// A container co-owned by every host object sharing it
pub type SharedContainer = Arc<Mutex<ContainerSession>>;

/// Stamps seen at the end of the last successful step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedStamps {
    pub positions: ChangeStamp,
    pub topology: ChangeStamp,
    /// `None` until constraints were walked once
    pub constraints: Option<TopologyStamps>,
}

impl Default for ObservedStamps {
    fn default() -> Self {
        Self {
            positions: ChangeStamp::UNSEEN,
            topology: ChangeStamp::UNSEEN,
            constraints: None,
        }
    }
}

/// Per-object simulation state held by the host
pub struct SimulationData {
    registry: Arc<DeviceRegistry>,
    config: ContainerConfig,
    container: Result<SharedContainer, DeviceInitError>,
    observed: ObservedStamps,
}

impl SimulationData {
    /// Open a device session and create a container; failures are kept, not returned
    pub fn new(registry: Arc<DeviceRegistry>, config: ContainerConfig) -> Self {
        let container = Self::build(&registry, &config);
        Self {
            registry,
            config,
            container,
            observed: ObservedStamps::default(),
        }
    }

    fn build(registry: &Arc<DeviceRegistry>, config: &ContainerConfig) -> Result<SharedContainer, DeviceInitError> {
        let session = registry.open()?;
        match ContainerSession::create(session, config) {
            Ok(container) => Ok(Arc::new(Mutex::new(container))),
            Err(e) => {
                error!(capacity = config.max_particles, "❌ Container creation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the current container and build a new one from the configuration
    pub fn initialize(&mut self) {
        // release first so a single-holder device is recreated, not reused
        self.container = Err(DeviceInitError::Container("reinitializing".to_string()));
        self.container = Self::build(&self.registry, &self.config);
        self.observed = ObservedStamps::default();
    }

    pub fn is_valid(&self) -> bool {
        self.container.is_ok()
    }

    /// Why the container could not be created
    pub fn init_error(&self) -> Option<&DeviceInitError> {
        self.container.as_ref().err()
    }

    pub fn container(&self) -> Result<&SharedContainer, &DeviceInitError> {
        self.container.as_ref()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn observed(&self) -> &ObservedStamps {
        &self.observed
    }

    pub fn observed_mut(&mut self) -> &mut ObservedStamps {
        &mut self.observed
    }

    /// Another owner of the same container
    pub fn share(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            container: self.container.clone(),
            observed: self.observed,
        }
    }

    /// True when another [`SimulationData`] holds the same container
    pub fn is_shared(&self) -> bool {
        self.container
            .as_ref()
            .map_or(false, |container| Arc::strong_count(container) > 1)
    }

    /// Stop sharing: this owner gets a fresh container and re-uploads
    /// everything from host geometry on its next step
    pub fn detach(&mut self) {
        self.container = Self::build(&self.registry, &self.config);
        self.observed = ObservedStamps::default();
    }

    /// Change the slot capacity; the container is torn down and rebuilt when it differs
    pub fn set_max_particles(&mut self, max_particles: usize) {
        if max_particles == self.config.max_particles {
            return;
        }
        info!(
            from = self.config.max_particles,
            to = max_particles,
            "particle capacity changed, rebuilding container"
        );
        self.config.max_particles = max_particles;
        self.initialize();
    }
}

impl std::fmt::Debug for SimulationData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationData")
            .field("config", &self.config)
            .field("valid", &self.is_valid())
            .field("observed", &self.observed)
            .finish()
    }
}
