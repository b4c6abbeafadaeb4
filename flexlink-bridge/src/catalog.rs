//! # Collision Catalog
//!
//! Keyed store of collision proxies (implicit spheres and triangle meshes)
//! flattened into the six parallel shape arrays the solver consumes.
//!
//! Every key maps to an offset into those arrays. Offsets are not stable:
//! removing an entry shifts every later entry down by one. Each key also
//! carries a stored change stamp so unchanged sources are not rebuilt.
//!
//! Adding, reading and removing entries needs the arrays mapped, which is
//! what [`CollisionCatalog::map_all`] hands out:
//!
//! ```text
//! let mut mapped = catalog.map_all()?;
//! mapped.add_sphere("collider");
//! mapped.get("collider").unwrap().set_transform([0.0, 1.0, 0.0], Quat::IDENTITY);
//! mapped.unmap_all()?;
//! catalog.push_to_solver(&mut solver)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use flexlink_core::error::BridgeResult;
use flexlink_core::soa::{CollisionGeometry, Float3, Float4, Quat, ShapeFlags, ShapeType, TriangleMeshId};
use flexlink_core::stamp::ChangeStamp;
use flexlink_core::traits::{ComputeDevice, ShapeBuffers, ShapeSink};

use crate::buffer::{MappedBuffer, MappedView};
use crate::trimesh::TriangleMesh;

/// Collision proxies of one container
pub struct CollisionCatalog {
    device: Arc<dyn ComputeDevice>,
    offsets: HashMap<String, usize>,
    stamps: HashMap<String, ChangeStamp>,
    meshes: HashMap<TriangleMeshId, TriangleMesh>,

    geometry: MappedBuffer<CollisionGeometry>,
    positions: MappedBuffer<Float4>,
    rotations: MappedBuffer<Quat>,
    prev_positions: MappedBuffer<Float4>,
    prev_rotations: MappedBuffer<Quat>,
    flags: MappedBuffer<ShapeFlags>,
}

impl CollisionCatalog {
    pub fn new(device: Arc<dyn ComputeDevice>) -> BridgeResult<Self> {
        Ok(Self {
            geometry: MappedBuffer::new(Arc::clone(&device), "shape_geometry", 0)?,
            positions: MappedBuffer::new(Arc::clone(&device), "shape_positions", 0)?,
            rotations: MappedBuffer::new(Arc::clone(&device), "shape_rotations", 0)?,
            prev_positions: MappedBuffer::new(Arc::clone(&device), "shape_prev_positions", 0)?,
            prev_rotations: MappedBuffer::new(Arc::clone(&device), "shape_prev_rotations", 0)?,
            flags: MappedBuffer::new(Arc::clone(&device), "shape_flags", 0)?,
            device,
            offsets: HashMap::new(),
            stamps: HashMap::new(),
            meshes: HashMap::new(),
        })
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.offsets.contains_key(key)
    }

    /// Number of proxies
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Current position of `key` in the shape arrays
    pub fn offset_of(&self, key: &str) -> Option<usize> {
        self.offsets.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.offsets.keys().map(String::as_str)
    }

    /// Stamp recorded for `key`; [`ChangeStamp::ABSENT`] when the key does not exist
    pub fn stored_stamp(&self, key: &str) -> ChangeStamp {
        stored_stamp(&self.stamps, key)
    }

    /// Record the stamp a proxy was built from; false when the key does not exist
    pub fn set_stored_stamp(&mut self, key: &str, stamp: ChangeStamp) -> bool {
        set_stored_stamp(&mut self.stamps, key, stamp)
    }

    /// Number of mesh assets owned by the catalog
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Backing array length, equal to `len()` whenever the catalog is consistent
    pub fn array_len(&self) -> usize {
        self.flags.len()
    }

    /// Map all six shape arrays together
    pub fn map_all(&mut self) -> BridgeResult<MappedCatalog<'_>> {
        let Self {
            device,
            offsets,
            stamps,
            meshes,
            geometry,
            positions,
            rotations,
            prev_positions,
            prev_rotations,
            flags,
        } = self;
        Ok(MappedCatalog {
            device,
            offsets,
            stamps,
            meshes,
            geometry: geometry.map()?,
            positions: positions.map()?,
            rotations: rotations.map()?,
            prev_positions: prev_positions.map()?,
            prev_rotations: prev_rotations.map()?,
            flags: flags.map()?,
        })
    }

    /// Hand the complete shape set to the solver, replacing what it had
    pub fn push_to_solver<S: ShapeSink + ?Sized>(&self, sink: &mut S) -> BridgeResult<()> {
        let shapes = ShapeBuffers {
            geometry: self.geometry.id()?,
            positions: self.positions.id()?,
            rotations: self.rotations.id()?,
            prev_positions: self.prev_positions.id()?,
            prev_rotations: self.prev_rotations.id()?,
            flags: self.flags.id()?,
        };
        sink.set_shapes(&shapes, self.len())
    }
}

fn stored_stamp(stamps: &HashMap<String, ChangeStamp>, key: &str) -> ChangeStamp {
    stamps.get(key).copied().unwrap_or(ChangeStamp::ABSENT)
}

fn set_stored_stamp(stamps: &mut HashMap<String, ChangeStamp>, key: &str, stamp: ChangeStamp) -> bool {
    match stamps.get_mut(key) {
        Some(stored) => {
            *stored = stamp;
            true
        }
        None => false,
    }
}

/// The catalog with its shape arrays mapped
pub struct MappedCatalog<'a> {
    device: &'a Arc<dyn ComputeDevice>,
    offsets: &'a mut HashMap<String, usize>,
    stamps: &'a mut HashMap<String, ChangeStamp>,
    meshes: &'a mut HashMap<TriangleMeshId, TriangleMesh>,

    geometry: MappedView<'a, CollisionGeometry>,
    positions: MappedView<'a, Float4>,
    rotations: MappedView<'a, Quat>,
    prev_positions: MappedView<'a, Float4>,
    prev_rotations: MappedView<'a, Quat>,
    flags: MappedView<'a, ShapeFlags>,
}

/// Shape-specific part of a proxy view
pub enum ProxyShape<'v> {
    Sphere(&'v mut CollisionGeometry),
    TriangleMesh {
        geometry: &'v mut CollisionGeometry,
        mesh: &'v mut TriangleMesh,
    },
}

/// Mutable view of one proxy inside the mapped arrays
pub struct ProxyView<'v> {
    pub shape: ProxyShape<'v>,
    pub position: &'v mut Float4,
    pub rotation: &'v mut Quat,
    pub prev_position: &'v mut Float4,
    pub prev_rotation: &'v mut Quat,
    pub flags: &'v mut ShapeFlags,
}

impl ProxyView<'_> {
    /// Move the proxy; the old transform becomes the previous one
    pub fn set_transform(&mut self, position: Float3, rotation: Quat) {
        *self.prev_position = *self.position;
        *self.prev_rotation = *self.rotation;
        self.position[0] = position[0];
        self.position[1] = position[1];
        self.position[2] = position[2];
        *self.rotation = rotation;
    }
}

impl<'a> MappedCatalog<'a> {
    pub fn has_key(&self, key: &str) -> bool {
        self.offsets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.offsets.keys().cloned().collect()
    }

    pub fn stored_stamp(&self, key: &str) -> ChangeStamp {
        stored_stamp(self.stamps, key)
    }

    pub fn set_stored_stamp(&mut self, key: &str, stamp: ChangeStamp) -> bool {
        set_stored_stamp(self.stamps, key, stamp)
    }

    // New slot at the end of every array; the stored stamp starts absent so
    // the first comparison always triggers a build.
    fn append(&mut self, key: &str, geometry: CollisionGeometry, flags: ShapeFlags, w: f32) {
        let offset = self.geometry.len();
        self.offsets.insert(key.to_string(), offset);
        self.stamps.insert(key.to_string(), ChangeStamp::ABSENT);
        self.geometry.push(geometry);
        self.positions.push([0.0, 0.0, 0.0, w]);
        self.rotations.push(Quat::IDENTITY);
        self.prev_positions.push([0.0, 0.0, 0.0, w]);
        self.prev_rotations.push(Quat::IDENTITY);
        self.flags.push(flags);
    }

    /// Append a unit sphere at the origin; false if `key` exists
    pub fn add_sphere(&mut self, key: &str) -> bool {
        if self.has_key(key) {
            return false;
        }
        self.append(
            key,
            CollisionGeometry::sphere(1.0),
            ShapeFlags::new(ShapeType::Sphere, true),
            0.0,
        );
        debug!(key, "added sphere proxy");
        true
    }

    /// Append an empty triangle mesh proxy; false if `key` exists
    pub fn add_triangle_mesh(&mut self, key: &str) -> BridgeResult<bool> {
        if self.has_key(key) {
            return Ok(false);
        }
        let mesh = TriangleMesh::new(Arc::clone(self.device))?;
        let id = mesh.id();
        self.meshes.insert(id, mesh);
        self.append(
            key,
            CollisionGeometry::triangle_mesh(id, [1.0; 3]),
            ShapeFlags::new(ShapeType::TriangleMesh, true),
            1.0,
        );
        debug!(key, mesh = id.0, "added triangle mesh proxy");
        Ok(true)
    }

    /// View of the proxy stored under `key`
    pub fn get(&mut self, key: &str) -> Option<ProxyView<'_>> {
        let offset = *self.offsets.get(key)?;
        let geometry = &mut self.geometry[offset];
        let flags = &mut self.flags[offset];
        let shape = match flags.shape_type() {
            Some(ShapeType::TriangleMesh) => {
                let mesh = self.meshes.get_mut(&geometry.mesh_id())?;
                ProxyShape::TriangleMesh { geometry, mesh }
            }
            _ => ProxyShape::Sphere(geometry),
        };
        Some(ProxyView {
            shape,
            position: &mut self.positions[offset],
            rotation: &mut self.rotations[offset],
            prev_position: &mut self.prev_positions[offset],
            prev_rotation: &mut self.prev_rotations[offset],
            flags,
        })
    }

    /// Remove `key`, compacting every array; false if `key` does not exist
    pub fn remove_item(&mut self, key: &str) -> bool {
        let Some(offset) = self.offsets.remove(key) else {
            return false;
        };
        self.stamps.remove(key);
        for other in self.offsets.values_mut() {
            if *other > offset {
                *other -= 1;
            }
        }

        if self.flags[offset].shape_type() == Some(ShapeType::TriangleMesh) {
            if let Some(mut mesh) = self.meshes.remove(&self.geometry[offset].mesh_id()) {
                mesh.destroy();
            }
        }

        self.geometry.remove(offset);
        self.positions.remove(offset);
        self.rotations.remove(offset);
        self.prev_positions.remove(offset);
        self.prev_rotations.remove(offset);
        self.flags.remove(offset);
        debug!(key, offset, "removed collision proxy");
        true
    }

    /// Commit all six arrays
    pub fn unmap_all(self) -> BridgeResult<()> {
        self.geometry.unmap()?;
        self.positions.unmap()?;
        self.rotations.unmap()?;
        self.prev_positions.unmap()?;
        self.prev_rotations.unmap()?;
        self.flags.unmap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryDevice;

    fn catalog() -> (Arc<InMemoryDevice>, CollisionCatalog) {
        let memory = Arc::new(InMemoryDevice::new());
        let catalog = CollisionCatalog::new(memory.clone()).unwrap();
        (memory, catalog)
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let (_, mut catalog) = catalog();
        let mut mapped = catalog.map_all().unwrap();
        assert!(mapped.add_sphere("a"));
        assert!(!mapped.add_sphere("a"));
        assert!(!mapped.add_triangle_mesh("a").unwrap());
        mapped.unmap_all().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.array_len(), 1);
        assert_eq!(catalog.mesh_count(), 0);
    }

    #[test]
    fn test_new_entries_start_absent() {
        let (_, mut catalog) = catalog();
        let mut mapped = catalog.map_all().unwrap();
        mapped.add_triangle_mesh("m").unwrap();
        assert_eq!(mapped.stored_stamp("m"), ChangeStamp::ABSENT);
        let view = mapped.get("m").unwrap();
        assert_eq!(*view.rotation, Quat::IDENTITY);
        assert_eq!(*view.position, [0.0, 0.0, 0.0, 1.0]);
        match view.shape {
            ProxyShape::TriangleMesh { geometry, .. } => assert_eq!(geometry.scale(), [1.0; 3]),
            ProxyShape::Sphere(_) => panic!("expected a mesh proxy"),
        }
        mapped.unmap_all().unwrap();
    }

    #[test]
    fn test_stamp_roundtrip_and_absent_key() {
        let (_, mut catalog) = catalog();
        let mut mapped = catalog.map_all().unwrap();
        mapped.add_sphere("s");
        mapped.unmap_all().unwrap();

        let stamp = ChangeStamp::next();
        assert!(catalog.set_stored_stamp("s", stamp));
        assert_eq!(catalog.stored_stamp("s"), stamp);
        assert!(!catalog.set_stored_stamp("missing", stamp));
        assert_eq!(catalog.stored_stamp("missing"), ChangeStamp::ABSENT);
    }

    #[test]
    fn test_set_transform_keeps_previous() {
        let (_, mut catalog) = catalog();
        let mut mapped = catalog.map_all().unwrap();
        mapped.add_sphere("s");
        let mut view = mapped.get("s").unwrap();
        view.set_transform([1.0, 2.0, 3.0], Quat::IDENTITY);
        view.set_transform([4.0, 5.0, 6.0], Quat::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(*view.prev_position, [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(*view.position, [4.0, 5.0, 6.0, 0.0]);
        assert_eq!(*view.prev_rotation, Quat::IDENTITY);
        mapped.unmap_all().unwrap();
    }

    #[test]
    fn test_remove_missing_key_changes_nothing() {
        let (_, mut catalog) = catalog();
        let mut mapped = catalog.map_all().unwrap();
        mapped.add_sphere("s");
        assert!(!mapped.remove_item("nope"));
        assert!(mapped.get("nope").is_none());
        mapped.unmap_all().unwrap();
        assert_eq!(catalog.offset_of("s"), Some(0));
        assert_eq!(catalog.array_len(), 1);
    }

    #[test]
    fn test_push_to_solver_hands_over_count() {
        let (memory, mut catalog) = catalog();
        let mut solver = memory
            .create_solver(&flexlink_core::config::ContainerConfig::with_capacity(4))
            .unwrap();
        let mut mapped = catalog.map_all().unwrap();
        mapped.add_sphere("a");
        mapped.add_sphere("b");
        mapped.unmap_all().unwrap();
        catalog.push_to_solver(solver.as_mut()).unwrap();

        let record = memory.last_solver().unwrap();
        assert_eq!(record.shape_count, 2);
        assert_eq!(record.sphere_count, 2);
    }
}
