//! # Triangle-Mesh Resource
//!
//! A device mesh asset used as a collision proxy: vertex and index buffers
//! plus the axis-aligned bounds derived from the vertices. Distinct from the
//! dynamic cloth triangles, which are particle constraints.

use std::sync::Arc;

use flexlink_core::error::BridgeResult;
use flexlink_core::soa::{Float3, TriangleMeshId};
use flexlink_core::traits::{ComputeDevice, TriangleMeshUpdate};

use crate::buffer::MappedBuffer;

/// Device-side triangle mesh, exclusively owned by one catalog entry
pub struct TriangleMesh {
    device: Arc<dyn ComputeDevice>,
    id: TriangleMeshId,
    vertices: MappedBuffer<Float3>,
    indices: MappedBuffer<i32>,
    lower: Float3,
    upper: Float3,
    destroyed: bool,
}

impl TriangleMesh {
    /// Register an empty mesh with the device
    pub fn new(device: Arc<dyn ComputeDevice>) -> BridgeResult<Self> {
        let id = device.create_triangle_mesh()?;
        let vertices = MappedBuffer::new(Arc::clone(&device), "trimesh_vertices", 0)?;
        let indices = MappedBuffer::new(Arc::clone(&device), "trimesh_indices", 0)?;
        Ok(Self {
            device,
            id,
            vertices,
            indices,
            lower: [0.0; 3],
            upper: [0.0; 3],
            destroyed: false,
        })
    }

    pub fn id(&self) -> TriangleMeshId {
        self.id
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Lower and upper corners of the bounding box
    pub fn bounds(&self) -> (Float3, Float3) {
        (self.lower, self.upper)
    }

    /// Resize, let `fill` write vertices and triangle indices, then derive
    /// the bounds and push the mesh to the device
    pub fn rebuild<F>(&mut self, vertex_count: usize, triangle_count: usize, fill: F) -> BridgeResult<()>
    where
        F: FnOnce(&mut [Float3], &mut [i32]),
    {
        self.vertices.resize(vertex_count)?;
        self.indices.resize(triangle_count * 3)?;

        let mut vertices = self.vertices.map()?;
        let mut indices = self.indices.map()?;
        fill(&mut vertices, &mut indices);

        let (lower, upper) = if vertices.is_empty() {
            ([0.0; 3], [0.0; 3])
        } else {
            vertices.iter().fold(
                ([f32::MAX; 3], [f32::MIN; 3]),
                |(mut lo, mut hi), v| {
                    for k in 0..3 {
                        lo[k] = lo[k].min(v[k]);
                        hi[k] = hi[k].max(v[k]);
                    }
                    (lo, hi)
                },
            )
        };
        vertices.unmap()?;
        indices.unmap()?;

        self.lower = lower;
        self.upper = upper;
        self.device.update_triangle_mesh(
            self.id,
            &TriangleMeshUpdate {
                vertices: self.vertices.id()?,
                indices: self.indices.id()?,
                vertex_count,
                triangle_count,
                lower,
                upper,
            },
        )
    }

    /// Release the mesh asset and its buffers; later calls do nothing
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.device.destroy_triangle_mesh(self.id);
            self.vertices.destroy();
            self.indices.destroy();
        }
    }
}

impl Drop for TriangleMesh {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for TriangleMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriangleMesh")
            .field("id", &self.id)
            .field("vertices", &self.vertices.len())
            .field("triangles", &self.triangle_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryDevice;

    #[test]
    fn test_rebuild_derives_bounds() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut mesh = TriangleMesh::new(memory.clone()).unwrap();
        mesh.rebuild(3, 1, |vertices, indices| {
            vertices.copy_from_slice(&[[-1.0, 0.0, 2.0], [3.0, 1.0, 0.0], [0.0, -2.0, 1.0]]);
            indices.copy_from_slice(&[0, 2, 1]);
        })
        .unwrap();

        assert_eq!(mesh.bounds(), ([-1.0, -2.0, 0.0], [3.0, 1.0, 2.0]));
        assert_eq!(mesh.triangle_count(), 1);
        let record = memory.mesh(mesh.id()).unwrap();
        assert_eq!(record.vertex_count, 3);
        assert_eq!(record.lower, [-1.0, -2.0, 0.0]);
    }

    #[test]
    fn test_destroy_releases_everything_once() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut mesh = TriangleMesh::new(memory.clone()).unwrap();
        assert_eq!(memory.live_meshes(), 1);
        assert_eq!(memory.live_buffers(), 2);

        mesh.destroy();
        mesh.destroy();
        assert_eq!(memory.live_meshes(), 0);
        assert_eq!(memory.live_buffers(), 0);
    }

    #[test]
    fn test_empty_mesh_has_zero_bounds() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut mesh = TriangleMesh::new(memory).unwrap();
        mesh.rebuild(0, 0, |_, _| {}).unwrap();
        assert_eq!(mesh.bounds(), ([0.0; 3], [0.0; 3]));
    }
}
