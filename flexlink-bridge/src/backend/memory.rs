//! # In-Memory Backend
//!
//! A host-memory stand-in for the solver library and its device.
//!
//! This backend is used for:
//! - Tests (every device call is recorded and inspectable)
//! - The demo binary on machines without a compute device
//!
//! ## Features
//!
//! - Device memory is a map of byte blocks keyed by buffer id
//! - Position-based integration with gravity, springs, rigid clusters,
//!   collision planes and sphere shapes, parallel over slots via Rayon
//! - Failure injection for solver creation
//!
//! It makes no attempt at fluid or cloth accuracy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use rayon::prelude::*;

use flexlink_core::config::ContainerConfig;
use flexlink_core::error::{BridgeError, BridgeResult, DeviceInitError};
use flexlink_core::params::SolverParams;
use flexlink_core::soa::{CollisionGeometry, Float3, Float4, Quat, ShapeFlags, ShapeType, TriangleMeshId};
use flexlink_core::traits::{
    ComputeDevice, ContextToken, DeviceBufferId, ParticleBuffers, ParticleSolver, RigidBuffers,
    ShapeBuffers, ShapeSink, SolverLogCallback, SolverLogSeverity, SpringBuffers, TriangleBuffers,
    TriangleMeshUpdate,
};

/// Context id the in-memory device makes current
const DEVICE_CONTEXT: u64 = 1;

/// Byte blocks standing in for device memory
#[derive(Default)]
struct DeviceMemory {
    buffers: Mutex<HashMap<u64, Vec<u8>>>,
    next_buffer: AtomicU64,
}

impl DeviceMemory {
    fn read<T: Pod>(&self, id: DeviceBufferId) -> BridgeResult<Vec<T>> {
        let buffers = self.buffers.lock();
        let bytes = buffers
            .get(&id.0)
            .ok_or_else(|| BridgeError::device(format!("unknown buffer {}", id.0)))?;
        let size = std::mem::size_of::<T>();
        if bytes.len() % size != 0 {
            return Err(BridgeError::device(format!(
                "buffer {} holds {} bytes, not a multiple of {}",
                id.0,
                bytes.len(),
                size
            )));
        }
        let mut out = vec![T::zeroed(); bytes.len() / size];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
        Ok(out)
    }

    fn write<T: Pod>(&self, id: DeviceBufferId, data: &[T]) -> BridgeResult<()> {
        let mut buffers = self.buffers.lock();
        let bytes = buffers
            .get_mut(&id.0)
            .ok_or_else(|| BridgeError::device(format!("unknown buffer {}", id.0)))?;
        bytes.clear();
        bytes.extend_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }
}

/// A registered triangle mesh, as last updated
#[derive(Clone, Debug, PartialEq)]
pub struct MeshRecord {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub lower: Float3,
    pub upper: Float3,
}

/// Everything a solver instance was told, for inspection
#[derive(Clone, Debug, Default)]
pub struct SolverRecord {
    /// Method names in call order
    pub calls: Vec<&'static str>,
    pub active_count: usize,
    pub spring_count: usize,
    pub triangle_count: usize,
    pub triangles_with_normals: bool,
    pub rigid_count: usize,
    pub rigid_index_count: usize,
    pub rigid_offsets: Vec<i32>,
    pub shape_count: usize,
    pub sphere_count: usize,
    pub updates: u32,
    pub last_dt: f32,
    pub last_substeps: u32,
    pub gravity: Float3,
}

impl SolverRecord {
    /// Position of the first call named `name`
    pub fn first_call(&self, name: &str) -> Option<usize> {
        self.calls.iter().position(|c| *c == name)
    }

    /// Position of the last call named `name`
    pub fn last_call(&self, name: &str) -> Option<usize> {
        self.calls.iter().rposition(|c| *c == name)
    }
}

/// In-memory compute device
pub struct InMemoryDevice {
    memory: Arc<DeviceMemory>,
    meshes: Mutex<HashMap<u32, MeshRecord>>,
    next_mesh: AtomicU32,
    current_context: AtomicU64,
    context_acquisitions: AtomicUsize,
    shutdowns: AtomicUsize,
    solvers: Mutex<Vec<Arc<Mutex<SolverRecord>>>>,
    log: Option<SolverLogCallback>,
    fail_solver: bool,
}

impl Default for InMemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDevice {
    pub fn new() -> Self {
        Self {
            memory: Arc::new(DeviceMemory::default()),
            meshes: Mutex::new(HashMap::new()),
            next_mesh: AtomicU32::new(1),
            current_context: AtomicU64::new(0),
            context_acquisitions: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            solvers: Mutex::new(Vec::new()),
            log: None,
            fail_solver: false,
        }
    }

    /// Report solver messages through `callback`
    pub fn with_log_callback(mut self, callback: SolverLogCallback) -> Self {
        self.log = Some(callback);
        self
    }

    /// Make every `create_solver` call fail
    pub fn with_failing_solver(mut self) -> Self {
        self.fail_solver = true;
        self
    }

    /// Buffers currently allocated
    pub fn live_buffers(&self) -> usize {
        self.memory.buffers.lock().len()
    }

    /// Mesh assets currently registered
    pub fn live_meshes(&self) -> usize {
        self.meshes.lock().len()
    }

    pub fn mesh(&self, id: TriangleMeshId) -> Option<MeshRecord> {
        self.meshes.lock().get(&id.0).cloned()
    }

    /// Raw contents of a buffer as `T`
    pub fn read_typed<T: Pod>(&self, id: DeviceBufferId) -> BridgeResult<Vec<T>> {
        self.memory.read(id)
    }

    /// True while some caller holds the context
    pub fn is_current(&self) -> bool {
        self.current_context.load(Ordering::SeqCst) == DEVICE_CONTEXT
    }

    pub fn context_acquisitions(&self) -> usize {
        self.context_acquisitions.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Snapshots of every solver created so far, in creation order
    pub fn solver_records(&self) -> Vec<SolverRecord> {
        self.solvers.lock().iter().map(|r| r.lock().clone()).collect()
    }

    /// Snapshot of the most recently created solver
    pub fn last_solver(&self) -> Option<SolverRecord> {
        self.solvers.lock().last().map(|r| r.lock().clone())
    }
}

impl ComputeDevice for InMemoryDevice {
    fn make_current(&self) -> ContextToken {
        self.context_acquisitions.fetch_add(1, Ordering::SeqCst);
        ContextToken(self.current_context.swap(DEVICE_CONTEXT, Ordering::SeqCst))
    }

    fn restore_context(&self, previous: ContextToken) {
        self.current_context.store(previous.0, Ordering::SeqCst);
    }

    fn create_buffer(&self, _label: &str, bytes: usize) -> BridgeResult<DeviceBufferId> {
        let id = self.memory.next_buffer.fetch_add(1, Ordering::SeqCst) + 1;
        self.memory.buffers.lock().insert(id, vec![0u8; bytes]);
        Ok(DeviceBufferId(id))
    }

    fn write_buffer(&self, id: DeviceBufferId, data: &[u8]) -> BridgeResult<()> {
        self.memory.write(id, data)
    }

    fn read_buffer(&self, id: DeviceBufferId, out: &mut [u8]) -> BridgeResult<()> {
        let buffers = self.memory.buffers.lock();
        let bytes = buffers
            .get(&id.0)
            .ok_or_else(|| BridgeError::device(format!("unknown buffer {}", id.0)))?;
        if bytes.len() != out.len() {
            return Err(BridgeError::device(format!(
                "read of {} bytes from buffer {} holding {}",
                out.len(),
                id.0,
                bytes.len()
            )));
        }
        out.copy_from_slice(bytes);
        Ok(())
    }

    fn buffer_len(&self, id: DeviceBufferId) -> BridgeResult<usize> {
        self.memory
            .buffers
            .lock()
            .get(&id.0)
            .map(Vec::len)
            .ok_or_else(|| BridgeError::device(format!("unknown buffer {}", id.0)))
    }

    fn destroy_buffer(&self, id: DeviceBufferId) {
        self.memory.buffers.lock().remove(&id.0);
    }

    fn create_triangle_mesh(&self) -> BridgeResult<TriangleMeshId> {
        let id = self.next_mesh.fetch_add(1, Ordering::SeqCst);
        self.meshes.lock().insert(
            id,
            MeshRecord {
                vertex_count: 0,
                triangle_count: 0,
                lower: [0.0; 3],
                upper: [0.0; 3],
            },
        );
        Ok(TriangleMeshId(id))
    }

    fn update_triangle_mesh(&self, mesh: TriangleMeshId, update: &TriangleMeshUpdate) -> BridgeResult<()> {
        let vertices: Vec<Float3> = self.memory.read(update.vertices)?;
        let indices: Vec<i32> = self.memory.read(update.indices)?;
        if vertices.len() < update.vertex_count || indices.len() < update.triangle_count * 3 {
            return Err(BridgeError::device(format!(
                "mesh {} update exceeds its buffers",
                mesh.0
            )));
        }
        let mut meshes = self.meshes.lock();
        let record = meshes
            .get_mut(&mesh.0)
            .ok_or_else(|| BridgeError::device(format!("unknown mesh {}", mesh.0)))?;
        *record = MeshRecord {
            vertex_count: update.vertex_count,
            triangle_count: update.triangle_count,
            lower: update.lower,
            upper: update.upper,
        };
        Ok(())
    }

    fn destroy_triangle_mesh(&self, mesh: TriangleMeshId) {
        self.meshes.lock().remove(&mesh.0);
    }

    fn create_solver(&self, config: &ContainerConfig) -> Result<Box<dyn ParticleSolver>, DeviceInitError> {
        if self.fail_solver {
            return Err(DeviceInitError::Solver(format!(
                "cannot fit {} particles in device memory",
                config.max_particles
            )));
        }
        let record = Arc::new(Mutex::new(SolverRecord::default()));
        self.solvers.lock().push(Arc::clone(&record));
        Ok(Box::new(InMemorySolver::new(
            Arc::clone(&self.memory),
            config.max_particles,
            self.log.clone(),
            record,
        )))
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[derive(Clone, Copy, Debug)]
struct Spring {
    a: usize,
    b: usize,
    length: f32,
    stiffness: f32,
}

#[derive(Clone, Debug, Default)]
struct Rigids {
    offsets: Vec<i32>,
    indices: Vec<i32>,
    stiffness: Vec<f32>,
    rest: Vec<Float3>,
    translations: Vec<Float3>,
    rotations: Vec<Quat>,
}

/// In-memory particle solver
pub struct InMemorySolver {
    memory: Arc<DeviceMemory>,
    capacity: usize,
    params: SolverParams,
    log: Option<SolverLogCallback>,
    record: Arc<Mutex<SolverRecord>>,

    positions: Vec<Float4>,
    velocities: Vec<Float3>,
    phases: Vec<i32>,
    active: Vec<i32>,
    springs: Vec<Spring>,
    rigids: Rigids,
    spheres: Vec<(Float3, f32)>,
}

impl InMemorySolver {
    fn new(
        memory: Arc<DeviceMemory>,
        capacity: usize,
        log: Option<SolverLogCallback>,
        record: Arc<Mutex<SolverRecord>>,
    ) -> Self {
        Self {
            memory,
            capacity,
            params: SolverParams::default(),
            log,
            record,
            positions: vec![[0.0; 4]; capacity],
            velocities: vec![[0.0; 3]; capacity],
            phases: vec![0; capacity],
            active: Vec::new(),
            springs: Vec::new(),
            rigids: Rigids::default(),
            spheres: Vec::new(),
        }
    }

    fn report(&self, severity: SolverLogSeverity, message: &str) {
        if let Some(log) = &self.log {
            log(severity, message);
        }
    }

    fn note(&self, call: &'static str) {
        self.record.lock().calls.push(call);
    }

    fn slot(&self, index: i32, what: &str) -> BridgeResult<usize> {
        if index < 0 || index as usize >= self.capacity {
            let message = format!("{} references slot {} outside capacity {}", what, index, self.capacity);
            self.report(SolverLogSeverity::Error, &message);
            return Err(BridgeError::device(message));
        }
        Ok(index as usize)
    }

    fn fit<T: Clone>(&self, mut data: Vec<T>, fill: T) -> Vec<T> {
        data.resize(self.capacity, fill);
        data
    }

    /// One substep of position-based integration
    fn substep(&mut self, h: f32) {
        let gravity = self.params.gravity;
        let max_speed = self.params.max_speed;
        let iterations = self.params.num_iterations.max(1);

        let mut mask = vec![false; self.capacity];
        for &slot in &self.active {
            mask[slot as usize] = true;
        }

        let previous: Vec<Float4> = self.positions.clone();

        // predict
        self.positions
            .par_iter_mut()
            .zip(self.velocities.par_iter_mut())
            .zip(mask.par_iter())
            .filter(|((p, _), active)| **active && p[3] > 0.0)
            .for_each(|((p, v), _)| {
                for k in 0..3 {
                    v[k] += gravity[k] * h;
                }
                let speed = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
                if speed > max_speed && speed > 0.0 {
                    let s = max_speed / speed;
                    for c in v.iter_mut() {
                        *c *= s;
                    }
                }
                for k in 0..3 {
                    p[k] += v[k] * h;
                }
            });

        for _ in 0..iterations {
            self.project_springs(&mask);
            self.project_rigids();
        }
        self.project_collisions(&mask);

        // velocities from the position change
        let inv_h = if h > 0.0 { 1.0 / h } else { 0.0 };
        self.velocities
            .par_iter_mut()
            .zip(self.positions.par_iter())
            .zip(previous.par_iter())
            .zip(mask.par_iter())
            .filter(|(_, active)| **active)
            .for_each(|(((v, p), old), _)| {
                for k in 0..3 {
                    v[k] = (p[k] - old[k]) * inv_h;
                }
            });
    }

    fn project_springs(&mut self, mask: &[bool]) {
        for spring in &self.springs {
            if !(mask[spring.a] && mask[spring.b]) {
                continue;
            }
            let pa = self.positions[spring.a];
            let pb = self.positions[spring.b];
            let (wa, wb) = (pa[3], pb[3]);
            let w = wa + wb;
            let d = [pb[0] - pa[0], pb[1] - pa[1], pb[2] - pa[2]];
            let dist = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
            if w <= 0.0 || dist < 1e-6 {
                continue;
            }
            let s = spring.stiffness * (dist - spring.length) / (w * dist);
            for k in 0..3 {
                self.positions[spring.a][k] += wa * s * d[k];
                self.positions[spring.b][k] -= wb * s * d[k];
            }
        }
    }

    // Translation-only shape matching: members are pulled toward the rest
    // shape re-centred on the current centroid.
    fn project_rigids(&mut self) {
        let rigids = &mut self.rigids;
        for cluster in 0..rigids.offsets.len().saturating_sub(1) {
            let start = rigids.offsets[cluster] as usize;
            let end = rigids.offsets[cluster + 1] as usize;
            if end <= start {
                continue;
            }
            let n = (end - start) as f32;
            let mut centroid = [0.0f32; 3];
            let mut rest_centroid = [0.0f32; 3];
            for m in start..end {
                let p = self.positions[rigids.indices[m] as usize];
                let r = rigids.rest[m];
                for k in 0..3 {
                    centroid[k] += p[k] / n;
                    rest_centroid[k] += r[k] / n;
                }
            }
            let stiffness = rigids.stiffness.get(cluster).copied().unwrap_or(1.0).clamp(0.0, 1.0);
            for m in start..end {
                let slot = rigids.indices[m] as usize;
                let r = rigids.rest[m];
                for k in 0..3 {
                    let target = centroid[k] + r[k] - rest_centroid[k];
                    let p = &mut self.positions[slot][k];
                    *p += (target - *p) * stiffness;
                }
            }
            rigids.translations[cluster] = centroid;
            rigids.rotations[cluster] = Quat::IDENTITY;
        }
    }

    fn project_collisions(&mut self, mask: &[bool]) {
        let planes = self.params.active_planes().to_vec();
        let spheres = self.spheres.clone();
        let radius = self.params.radius;
        self.positions
            .par_iter_mut()
            .zip(mask.par_iter())
            .filter(|(p, active)| **active && p[3] > 0.0)
            .for_each(|(p, _)| {
                for plane in &planes {
                    let s = plane[0] * p[0] + plane[1] * p[1] + plane[2] * p[2] + plane[3];
                    if s < 0.0 {
                        for k in 0..3 {
                            p[k] -= plane[k] * s;
                        }
                    }
                }
                for (center, sphere_radius) in &spheres {
                    let d = [p[0] - center[0], p[1] - center[1], p[2] - center[2]];
                    let dist = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
                    let min = sphere_radius + radius;
                    if dist < min && dist > 1e-6 {
                        let push = (min - dist) / dist;
                        for k in 0..3 {
                            p[k] += d[k] * push;
                        }
                    }
                }
            });
    }
}

impl ShapeSink for InMemorySolver {
    fn set_shapes(&mut self, shapes: &ShapeBuffers, count: usize) -> BridgeResult<()> {
        self.note("set_shapes");
        let geometry: Vec<CollisionGeometry> = self.memory.read(shapes.geometry)?;
        let positions: Vec<Float4> = self.memory.read(shapes.positions)?;
        let flags: Vec<ShapeFlags> = self.memory.read(shapes.flags)?;
        if geometry.len() < count || positions.len() < count || flags.len() < count {
            return Err(BridgeError::device(format!("shape buffers shorter than {}", count)));
        }
        self.spheres = (0..count)
            .filter(|&i| flags[i].shape_type() == Some(ShapeType::Sphere))
            .map(|i| ([positions[i][0], positions[i][1], positions[i][2]], geometry[i].radius()))
            .collect();

        let mut record = self.record.lock();
        record.shape_count = count;
        record.sphere_count = self.spheres.len();
        Ok(())
    }
}

impl ParticleSolver for InMemorySolver {
    fn set_params(&mut self, params: &SolverParams) -> BridgeResult<()> {
        self.note("set_params");
        self.params = params.clone();
        self.record.lock().gravity = params.gravity;
        Ok(())
    }

    fn params(&self) -> &SolverParams {
        &self.params
    }

    fn set_particles(&mut self, particles: &ParticleBuffers) -> BridgeResult<()> {
        self.note("set_particles");
        let positions: Vec<Float4> = self.memory.read(particles.positions)?;
        let velocities: Vec<Float3> = self.memory.read(particles.velocities)?;
        let phases: Vec<i32> = self.memory.read(particles.phases)?;
        self.positions = self.fit(positions, [0.0; 4]);
        self.velocities = self.fit(velocities, [0.0; 3]);
        self.phases = self.fit(phases, 0);
        Ok(())
    }

    fn set_active(&mut self, active: DeviceBufferId, count: usize) -> BridgeResult<()> {
        self.note("set_active");
        let slots: Vec<i32> = self.memory.read(active)?;
        if slots.len() < count {
            return Err(BridgeError::device(format!(
                "active list holds {} entries, {} requested",
                slots.len(),
                count
            )));
        }
        for &slot in &slots[..count] {
            self.slot(slot, "active list")?;
        }
        self.active = slots[..count].to_vec();
        self.record.lock().active_count = count;
        Ok(())
    }

    fn set_springs(&mut self, springs: &SpringBuffers, count: usize) -> BridgeResult<()> {
        self.note("set_springs");
        let indices: Vec<i32> = self.memory.read(springs.indices)?;
        let lengths: Vec<f32> = self.memory.read(springs.lengths)?;
        let coefficients: Vec<f32> = self.memory.read(springs.coefficients)?;
        if indices.len() < count * 2 || lengths.len() < count || coefficients.len() < count {
            return Err(BridgeError::device(format!("spring buffers shorter than {}", count)));
        }
        let mut parsed = Vec::with_capacity(count);
        for i in 0..count {
            parsed.push(Spring {
                a: self.slot(indices[2 * i], "spring")?,
                b: self.slot(indices[2 * i + 1], "spring")?,
                length: lengths[i],
                stiffness: coefficients[i].clamp(0.0, 1.0),
            });
        }
        self.springs = parsed;
        self.record.lock().spring_count = count;
        Ok(())
    }

    fn set_dynamic_triangles(&mut self, triangles: &TriangleBuffers, count: usize) -> BridgeResult<()> {
        self.note("set_dynamic_triangles");
        let indices: Vec<i32> = self.memory.read(triangles.indices)?;
        if indices.len() < count * 3 {
            return Err(BridgeError::device(format!("triangle buffer shorter than {}", count)));
        }
        for &slot in &indices[..count * 3] {
            self.slot(slot, "triangle")?;
        }
        if let Some(normals) = triangles.normals {
            let normals: Vec<Float3> = self.memory.read(normals)?;
            if normals.len() < count {
                return Err(BridgeError::device(format!("normal buffer shorter than {}", count)));
            }
        }
        let mut record = self.record.lock();
        record.triangle_count = count;
        record.triangles_with_normals = triangles.normals.is_some();
        Ok(())
    }

    fn set_rigids(&mut self, rigids: &RigidBuffers, count: usize, index_count: usize) -> BridgeResult<()> {
        self.note("set_rigids");
        let offsets: Vec<i32> = self.memory.read(rigids.offsets)?;
        let indices: Vec<i32> = self.memory.read(rigids.indices)?;
        let rest: Vec<Float3> = self.memory.read(rigids.rest_positions)?;
        let stiffness: Vec<f32> = self.memory.read(rigids.stiffness)?;
        let rotations: Vec<Quat> = self.memory.read(rigids.rotations)?;
        let translations: Vec<Float3> = self.memory.read(rigids.translations)?;

        if offsets.len() < count + 1 || indices.len() < index_count || rest.len() < index_count {
            return Err(BridgeError::device(format!(
                "rigid buffers shorter than {} clusters / {} indices",
                count, index_count
            )));
        }
        if offsets.windows(2).take(count).any(|w| w[1] < w[0]) || offsets[count] as usize != index_count {
            let message = "rigid offsets are not a valid CSR layout";
            self.report(SolverLogSeverity::Error, message);
            return Err(BridgeError::device(message));
        }
        for &slot in &indices[..index_count] {
            self.slot(slot, "rigid")?;
        }

        self.rigids = Rigids {
            offsets: offsets[..count + 1].to_vec(),
            indices: indices[..index_count].to_vec(),
            stiffness,
            rest: rest[..index_count].to_vec(),
            translations: {
                let mut t = translations;
                t.resize(count, [0.0; 3]);
                t
            },
            rotations: {
                let mut r = rotations;
                r.resize(count, Quat::IDENTITY);
                r
            },
        };

        let mut record = self.record.lock();
        record.rigid_count = count;
        record.rigid_index_count = index_count;
        record.rigid_offsets = self.rigids.offsets.clone();
        Ok(())
    }

    fn update(&mut self, dt: f32, substeps: u32) -> BridgeResult<()> {
        self.note("update");
        let substeps = substeps.max(1);
        if self.active.is_empty() {
            self.report(SolverLogSeverity::Debug, "update with no active particles");
        }
        let h = dt / substeps as f32;
        for _ in 0..substeps {
            self.substep(h);
        }

        let mut record = self.record.lock();
        record.updates += 1;
        record.last_dt = dt;
        record.last_substeps = substeps;
        Ok(())
    }

    fn get_particles(&mut self, particles: &ParticleBuffers) -> BridgeResult<()> {
        self.note("get_particles");
        self.memory.write(particles.positions, &self.positions)?;
        self.memory.write(particles.velocities, &self.velocities)?;
        self.memory.write(particles.phases, &self.phases)?;
        Ok(())
    }

    fn get_rigid_transforms(&mut self, rotations: DeviceBufferId, translations: DeviceBufferId) -> BridgeResult<()> {
        self.note("get_rigid_transforms");
        self.memory.write(rotations, &self.rigids.rotations)?;
        self.memory.write(translations, &self.rigids.translations)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload<T: Pod>(device: &InMemoryDevice, data: &[T]) -> DeviceBufferId {
        let id = device.create_buffer("test", 0).unwrap();
        device.write_buffer(id, bytemuck::cast_slice(data)).unwrap();
        id
    }

    #[test]
    fn test_buffer_lifecycle() {
        let device = InMemoryDevice::new();
        let id = device.create_buffer("scratch", 8).unwrap();
        assert_eq!(device.buffer_len(id).unwrap(), 8);

        device.write_buffer(id, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        device.read_buffer(id, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        device.destroy_buffer(id);
        device.destroy_buffer(id);
        assert_eq!(device.live_buffers(), 0);
        assert!(device.read_buffer(id, &mut out).is_err());
    }

    #[test]
    fn test_context_round_trip() {
        let device = InMemoryDevice::new();
        assert!(!device.is_current());
        let previous = device.make_current();
        assert!(device.is_current());
        device.restore_context(previous);
        assert!(!device.is_current());
        assert_eq!(device.context_acquisitions(), 1);
    }

    #[test]
    fn test_failing_solver() {
        let device = InMemoryDevice::new().with_failing_solver();
        let err = device.create_solver(&ContainerConfig::with_capacity(8)).err().unwrap();
        assert!(matches!(err, DeviceInitError::Solver(_)));
    }

    #[test]
    fn test_particle_falls_and_rests_on_floor() {
        let device = InMemoryDevice::new();
        let mut solver = device.create_solver(&ContainerConfig::with_capacity(2)).unwrap();

        let particles = ParticleBuffers {
            positions: upload(&device, &[[0.0f32, 1.0, 0.0, 1.0], [0.0; 4]]),
            velocities: upload(&device, &[[0.0f32; 3]; 2]),
            phases: upload(&device, &[0i32; 2]),
            rest_positions: upload(&device, &[[0.0f32; 4]; 2]),
        };
        let active = upload(&device, &[0i32]);

        let mut params = SolverParams::default();
        params.add_gravity([0.0, -9.8, 0.0]);
        solver.set_params(&params).unwrap();
        solver.set_particles(&particles).unwrap();
        solver.set_active(active, 1).unwrap();
        for _ in 0..120 {
            solver.update(1.0 / 24.0, 2).unwrap();
        }
        solver.get_particles(&particles).unwrap();

        let positions: Vec<Float4> = device.read_typed(particles.positions).unwrap();
        assert!(positions[0][1] >= -1e-4);
        assert!(positions[0][1] < 1.0);
        // inactive slot untouched
        assert_eq!(positions[1], [0.0; 4]);
        assert_eq!(device.last_solver().unwrap().updates, 120);
    }

    #[test]
    fn test_active_slot_out_of_range_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let device = InMemoryDevice::new().with_log_callback(Arc::new(move |severity: SolverLogSeverity, message: &str| {
            sink.lock().push((severity, message.to_string()));
        }));
        let mut solver = device.create_solver(&ContainerConfig::with_capacity(2)).unwrap();
        let active = upload(&device, &[5i32]);
        assert!(solver.set_active(active, 1).is_err());
        assert_eq!(seen.lock()[0].0, SolverLogSeverity::Error);
    }

    #[test]
    fn test_mesh_update_records_bounds() {
        let device = InMemoryDevice::new();
        let mesh = device.create_triangle_mesh().unwrap();
        let vertices = upload(&device, &[[0.0f32; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let indices = upload(&device, &[0i32, 1, 2]);
        device
            .update_triangle_mesh(
                mesh,
                &TriangleMeshUpdate {
                    vertices,
                    indices,
                    vertex_count: 3,
                    triangle_count: 1,
                    lower: [0.0; 3],
                    upper: [1.0, 1.0, 0.0],
                },
            )
            .unwrap();
        let record = device.mesh(mesh).unwrap();
        assert_eq!(record.triangle_count, 1);
        assert_eq!(record.upper, [1.0, 1.0, 0.0]);

        device.destroy_triangle_mesh(mesh);
        assert_eq!(device.live_meshes(), 0);
    }
}
