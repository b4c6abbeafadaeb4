//! # Step Orchestrator
//!
//! Advances every simulated object by one host time step. Each object runs
//! through the same phases, in order:
//!
//! ```text
//! CheckValidity → SyncParticles → SyncTopology → SyncCollisions
//!   → ApplyForcesAndParams → Solve → PullResults → WriteBack
//! ```
//!
//! Uploads are issued as early as possible and pulls as late as possible,
//! so the device works while the host walks topology and builds collision
//! meshes. Sync phases are gated by change stamps; nothing is re-sent when
//! the host data did not change.
//!
//! A failing object is logged and skipped; the others still step. There is
//! no retry: the next step's stamp comparison picks the work up again.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use flexlink_core::config::SolverSettings;
use flexlink_core::error::{BridgeError, BridgeResult};
use flexlink_core::geometry::SharedGeometry;
use flexlink_core::params::SolverParams;
use flexlink_core::soa::{Float3, Quat};
use flexlink_core::stamp::ChangeStamp;

use crate::catalog::{MappedCatalog, ProxyShape};
use crate::container::SimulationData;
use crate::particles::{ParticleData, WriteBackStats};
use crate::topology::{TopologyStamps, TopologySummary};
use crate::trimesh::TriangleMesh;

/// What a collaborating object contributes as a collider
#[derive(Clone)]
pub enum CollisionShape {
    /// Polygon geometry in world space; rebuilt when its positions or topology change
    Mesh(SharedGeometry),
    /// Implicit sphere
    Sphere { radius: f32, stamp: ChangeStamp },
}

/// One active collision relationship
#[derive(Clone)]
pub struct CollisionSource {
    /// Identity of the contributing object
    pub key: String,
    pub shape: CollisionShape,
    pub position: Float3,
    pub rotation: Quat,
}

impl CollisionSource {
    pub fn mesh(key: impl Into<String>, geometry: SharedGeometry) -> Self {
        Self {
            key: key.into(),
            shape: CollisionShape::Mesh(geometry),
            position: [0.0; 3],
            rotation: Quat::IDENTITY,
        }
    }

    pub fn sphere(key: impl Into<String>, radius: f32, center: Float3) -> Self {
        Self {
            key: key.into(),
            shape: CollisionShape::Sphere {
                radius,
                stamp: ChangeStamp::next(),
            },
            position: center,
            rotation: Quat::IDENTITY,
        }
    }

    /// Change a sphere's radius; bumps its stamp
    pub fn set_radius(&mut self, new_radius: f32) {
        if let CollisionShape::Sphere { radius, stamp } = &mut self.shape {
            *radius = new_radius;
            *stamp = ChangeStamp::next();
        }
    }

    /// Current stamp of the collider's shape
    ///
    /// Stamps come from one monotonic counter, so the larger of the
    /// position and topology stamps moves whenever either does.
    pub fn stamp(&self) -> ChangeStamp {
        match &self.shape {
            CollisionShape::Mesh(geometry) => {
                let geo = geometry.read();
                geo.position_stamp().max(geo.topology_stamp())
            }
            CollisionShape::Sphere { stamp, .. } => *stamp,
        }
    }
}

/// A simulated object as the host presents it to the orchestrator
pub struct SimObject {
    /// Identity; also the key other objects use for it as a collider
    pub key: String,
    pub data: SimulationData,
    pub geometry: SharedGeometry,
    pub collisions: Vec<CollisionSource>,
    /// External accelerations merged into gravity
    pub forces: Vec<Float3>,
}

impl SimObject {
    pub fn new(key: impl Into<String>, data: SimulationData, geometry: SharedGeometry) -> Self {
        Self {
            key: key.into(),
            data,
            geometry,
            collisions: Vec::new(),
            forces: Vec::new(),
        }
    }

    /// This object's geometry offered as a collision mesh to others
    pub fn as_collider(&self) -> CollisionSource {
        CollisionSource::mesh(self.key.clone(), Arc::clone(&self.geometry))
    }
}

/// What one object's step did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectReport {
    pub particles_uploaded: bool,
    pub topology_walked: bool,
    pub active: usize,
    pub unrepresented: usize,
    pub constraints: TopologySummary,
    pub collisions: usize,
    pub collisions_rebuilt: usize,
    pub collisions_removed: usize,
    pub rigids_written: usize,
}

/// Outcome of one step over all objects
#[derive(Debug, Default)]
pub struct StepReport {
    pub completed: Vec<(String, ObjectReport)>,
    pub skipped: Vec<(String, BridgeError)>,
}

impl StepReport {
    pub fn report(&self, key: &str) -> Option<&ObjectReport> {
        self.completed.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    pub fn was_skipped(&self, key: &str) -> bool {
        self.skipped.iter().any(|(k, _)| k == key)
    }
}

/// Drives the per-object phase sequence
#[derive(Debug, Clone)]
pub struct StepOrchestrator {
    settings: SolverSettings,
}

impl StepOrchestrator {
    pub fn new(mut settings: SolverSettings) -> BridgeResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Step every object by `dt`; failures are logged per object and never abort the batch
    pub fn step_objects(&self, objects: &mut [SimObject], dt: f32) -> StepReport {
        let mut report = StepReport::default();
        for object in objects.iter_mut() {
            match self.step_object(object, dt) {
                Ok(r) => report.completed.push((object.key.clone(), r)),
                Err(e) => {
                    error!(object = %object.key, category = e.category(), "❌ Object skipped this step: {}", e);
                    report.skipped.push((object.key.clone(), e));
                }
            }
        }
        debug!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            "step finished"
        );
        report
    }

    /// Run all phases for one object
    pub fn step_object(&self, object: &mut SimObject, dt: f32) -> BridgeResult<ObjectReport> {
        // CheckValidity
        let container = match object.data.container() {
            Ok(container) => Arc::clone(container),
            Err(e) => return Err(BridgeError::DeviceInit(e.clone())),
        };
        let mut guard = container.lock();
        let c = &mut *guard;
        let _context = c.session.acquire();

        let key = object.key.as_str();
        let observed = *object.data.observed();
        let mut report = ObjectReport::default();

        let particles_synced = {
            let geo = object.geometry.read();

            // SyncParticles
            let mut particles_synced = true;
            if geo.position_stamp() != observed.positions || geo.topology_stamp() != observed.topology {
                match ParticleData::require_inputs(&geo, key) {
                    Ok(()) => {
                        let reconciliation = c.allocator.reconcile(geo.point_count());
                        if let Err(e) = reconciliation.check() {
                            warn!(object = key, category = e.category(), "⚠️ {}", e);
                        }
                        c.active = reconciliation.active;
                        c.particles.fill_from(&geo, &c.active, key)?;
                        c.particles.push(c.solver.as_mut(), c.active.len())?;
                        report.particles_uploaded = true;
                    }
                    Err(e) => {
                        warn!(object = key, category = e.category(), "⚠️ Particle sync skipped: {}", e);
                        particles_synced = false;
                    }
                }
            }

            // SyncTopology; needs the active list of this step
            let stale = observed.constraints != Some(TopologyStamps::observe(&geo));
            if particles_synced && stale {
                report.constraints = c.constraints.rebuild(&geo, &c.active, key)?.clone();
                c.constraints.push(c.solver.as_mut())?;
                report.topology_walked = true;
            } else {
                report.constraints = c.constraints.summary().clone();
            }
            particles_synced
        };

        // SyncCollisions
        {
            let mut mapped = c.collisions.map_all()?;
            let (rebuilt, removed) = sync_collisions(&mut mapped, key, &object.collisions)?;
            report.collisions = mapped.len();
            report.collisions_rebuilt = rebuilt;
            report.collisions_removed = removed;
            mapped.unmap_all()?;
        }
        c.collisions.push_to_solver(c.solver.as_mut())?;

        // ApplyForcesAndParams
        let mut params = SolverParams::from_settings(&self.settings);
        for force in &object.forces {
            params.add_gravity(*force);
        }
        c.solver.set_params(&params)?;

        // Solve
        c.solver.update(dt, self.settings.substeps)?;

        // PullResults
        c.particles.pull(c.solver.as_mut())?;
        c.constraints.pull_rigids(c.solver.as_mut())?;

        // WriteBack
        let mut geo = object.geometry.write();
        if particles_synced {
            if c.active.len() != geo.point_count() {
                warn!(
                    object = key,
                    active = c.active.len(),
                    points = geo.point_count(),
                    "⚠️ Active particle count differs from point count, writing represented points only"
                );
            }
            let WriteBackStats { written, unrepresented } = c.particles.write_back(&mut geo, &c.active)?;
            report.active = written;
            report.unrepresented = unrepresented;
            report.rigids_written = c.constraints.write_back_rigids(&mut geo)?;
            geo.bump_all_stamps();
        }

        // a skipped sync records nothing, so the next step retries it
        if particles_synced {
            let recorded = object.data.observed_mut();
            recorded.positions = geo.position_stamp();
            recorded.topology = geo.topology_stamp();
            recorded.constraints = Some(TopologyStamps::observe(&geo));
        }

        debug!(
            object = key,
            active = report.active,
            springs = report.constraints.springs,
            triangles = report.constraints.triangles,
            rigids = report.constraints.rigids,
            collisions = report.collisions,
            "object stepped"
        );
        Ok(report)
    }
}

/// Bring the catalog in line with the object's collision relationships.
/// Returns `(rebuilt, removed)`.
fn sync_collisions(
    mapped: &mut MappedCatalog<'_>,
    own_key: &str,
    sources: &[CollisionSource],
) -> BridgeResult<(usize, usize)> {
    let mut live = HashSet::new();
    let mut rebuilt = 0;

    for source in sources {
        let key = source.key.as_str();
        if key == own_key {
            continue;
        }
        live.insert(key);

        // a collider that switched between sphere and mesh starts over
        let mismatched = mapped.get(key).map_or(false, |view| {
            !matches!(
                (&view.shape, &source.shape),
                (ProxyShape::Sphere(_), CollisionShape::Sphere { .. })
                    | (ProxyShape::TriangleMesh { .. }, CollisionShape::Mesh(_))
            )
        });
        if mismatched {
            mapped.remove_item(key);
        }
        match &source.shape {
            CollisionShape::Sphere { .. } => {
                mapped.add_sphere(key);
            }
            CollisionShape::Mesh(_) => {
                mapped.add_triangle_mesh(key)?;
            }
        }

        let stamp = source.stamp();
        let stale = mapped.stored_stamp(key) != stamp;
        if let Some(mut view) = mapped.get(key) {
            if stale {
                match (&mut view.shape, &source.shape) {
                    (ProxyShape::Sphere(geometry), CollisionShape::Sphere { radius, .. }) => {
                        geometry.set_radius(*radius);
                    }
                    (ProxyShape::TriangleMesh { mesh, .. }, CollisionShape::Mesh(geometry)) => {
                        build_collision_mesh(mesh, geometry)?;
                        info!(key, triangles = mesh.triangle_count(), "updating collision mesh");
                    }
                    _ => {}
                }
            }
            view.set_transform(source.position, source.rotation);
        }
        if stale {
            mapped.set_stored_stamp(key, stamp);
            rebuilt += 1;
        }
    }

    let mut removed = 0;
    for key in mapped.keys() {
        if !live.contains(key.as_str()) && mapped.remove_item(&key) {
            removed += 1;
        }
    }
    Ok((rebuilt, removed))
}

/// Copy collider points and fan-triangulate its polygons with reversed
/// winding: `(first, current, previous)`.
fn build_collision_mesh(mesh: &mut TriangleMesh, geometry: &SharedGeometry) -> BridgeResult<()> {
    let geo = geometry.read();
    let triangle_count = (0..geo.primitive_count())
        .map(|prim| geo.primitive_vertex_count(prim).saturating_sub(2))
        .sum();
    mesh.rebuild(geo.point_count(), triangle_count, |vertices, indices| {
        vertices.copy_from_slice(geo.positions());
        let mut i = 0;
        for prim in 0..geo.primitive_count() {
            let points: Vec<usize> = geo.primitive_points(prim).collect();
            for k in 2..points.len() {
                indices[i] = points[0] as i32;
                indices[i + 1] = points[k] as i32;
                indices[i + 2] = points[k - 1] as i32;
                i += 3;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryDevice;
    use crate::catalog::CollisionCatalog;
    use flexlink_core::geometry::{shared, Geometry};

    fn quad() -> SharedGeometry {
        let mut geo = Geometry::new();
        geo.add_points(&[[0.0; 3], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]]);
        geo.add_primitive(&[0, 1, 2, 3]).unwrap();
        shared(geo)
    }

    #[test]
    fn test_fan_triangulation_reverses_winding() {
        let device = Arc::new(InMemoryDevice::new());
        let mut mesh = TriangleMesh::new(device.clone()).unwrap();
        build_collision_mesh(&mut mesh, &quad()).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.bounds(), ([0.0; 3], [1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_collisions_skip_self_and_drop_stale_keys() {
        let device = Arc::new(InMemoryDevice::new());
        let mut catalog = CollisionCatalog::new(device.clone()).unwrap();
        let sources = vec![
            CollisionSource::mesh("ground", quad()),
            CollisionSource::sphere("ball", 0.5, [0.0, 1.0, 0.0]),
            CollisionSource::mesh("me", quad()),
        ];

        let mut mapped = catalog.map_all().unwrap();
        assert_eq!(sync_collisions(&mut mapped, "me", &sources).unwrap(), (2, 0));
        assert_eq!(mapped.len(), 2);
        assert!(!mapped.has_key("me"));

        // unchanged sources are not rebuilt
        assert_eq!(sync_collisions(&mut mapped, "me", &sources).unwrap(), (0, 0));

        assert_eq!(sync_collisions(&mut mapped, "me", &sources[1..]).unwrap(), (0, 1));
        assert!(!mapped.has_key("ground"));
        mapped.unmap_all().unwrap();
        assert_eq!(catalog.mesh_count(), 0);
        assert_eq!(device.live_meshes(), 0);
    }

    #[test]
    fn test_sphere_radius_change_rebuilds() {
        let device = Arc::new(InMemoryDevice::new());
        let mut catalog = CollisionCatalog::new(device).unwrap();
        let mut sources = vec![CollisionSource::sphere("ball", 0.5, [0.0; 3])];

        let mut mapped = catalog.map_all().unwrap();
        sync_collisions(&mut mapped, "me", &sources).unwrap();
        sources[0].set_radius(2.0);
        assert_eq!(sync_collisions(&mut mapped, "me", &sources).unwrap(), (1, 0));
        match mapped.get("ball").unwrap().shape {
            ProxyShape::Sphere(geometry) => assert_eq!(geometry.radius(), 2.0),
            ProxyShape::TriangleMesh { .. } => panic!("expected a sphere"),
        }
    }
}
