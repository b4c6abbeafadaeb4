//! # Constraint/Topology Uploader
//!
//! Turns host primitives into the solver's constraint arrays:
//!
//! - 2-vertex primitives → springs (`restlength`, `strength`)
//! - 3-vertex primitives → dynamic cloth triangles, optionally with normals
//! - primitives flagged `rgd_isrigid` → rigid clusters in CSR layout
//!
//! The walk runs in two passes. The first classifies and counts so every
//! array can be sized up front; the second maps the arrays and writes point
//! references translated to particle slots. Every category is pushed on
//! every walk, including empty ones, so a vanished category clears what the
//! solver had.

use std::sync::Arc;

use tracing::{debug, warn};

use flexlink_core::error::{BridgeError, BridgeResult};
use flexlink_core::geometry::{attr, AttributeClass, Geometry};
use flexlink_core::soa::{Float3, Float4, Quat};
use flexlink_core::stamp::ChangeStamp;
use flexlink_core::traits::{ComputeDevice, ParticleSolver, RigidBuffers, SpringBuffers, TriangleBuffers};

use crate::allocator::ActiveList;
use crate::buffer::MappedBuffer;

/// Where triangle normals come from, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalSource {
    Primitive,
    Vertex,
    Point,
    None,
}

impl NormalSource {
    pub fn detect(geo: &Geometry) -> Self {
        if geo.vec3(AttributeClass::Primitive, attr::NORMAL).is_some() {
            Self::Primitive
        } else if geo.vec3(AttributeClass::Vertex, attr::NORMAL).is_some() {
            Self::Vertex
        } else if geo.vec3(AttributeClass::Point, attr::NORMAL).is_some() {
            Self::Point
        } else {
            Self::None
        }
    }

    fn class(self) -> Option<AttributeClass> {
        match self {
            Self::Primitive => Some(AttributeClass::Primitive),
            Self::Vertex => Some(AttributeClass::Vertex),
            Self::Point => Some(AttributeClass::Point),
            Self::None => None,
        }
    }
}

/// Stamps that decide whether the constraint arrays must be rebuilt
///
/// Missing attributes read as [`ChangeStamp::ABSENT`], so an attribute
/// appearing or disappearing also counts as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyStamps {
    pub topology: ChangeStamp,
    pub rest_length: ChangeStamp,
    pub strength: ChangeStamp,
    pub rigid_flag: ChangeStamp,
    pub rigid_stiffness: ChangeStamp,
    pub normal: ChangeStamp,
}

impl TopologyStamps {
    pub fn observe(geo: &Geometry) -> Self {
        let prim = |name| {
            geo.attribute_stamp(AttributeClass::Primitive, name)
                .unwrap_or(ChangeStamp::ABSENT)
        };
        let normal = NormalSource::detect(geo)
            .class()
            .and_then(|class| geo.attribute_stamp(class, attr::NORMAL))
            .unwrap_or(ChangeStamp::ABSENT);
        Self {
            topology: geo.topology_stamp(),
            rest_length: prim(attr::REST_LENGTH),
            strength: prim(attr::STRENGTH),
            rigid_flag: prim(attr::RIGID_FLAG),
            rigid_stiffness: prim(attr::RIGID_STIFFNESS),
            normal,
        }
    }
}

/// Counts produced by one walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySummary {
    pub springs: usize,
    pub triangles: usize,
    pub rigids: usize,
    pub rigid_indices: usize,
    pub with_normals: bool,
    /// Primitives dropped because a point had no particle slot
    pub dropped: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PrimKind {
    Spring,
    Triangle,
    Rigid,
    Ignored,
}

struct RigidAttributes<'g> {
    translation: &'g [Float3],
    rotation: &'g [Float4],
    rest_position: &'g [Float3],
    rest_normal: &'g [Float3],
    sdf: &'g [f32],
    stiffness: &'g [f32],
}

impl<'g> RigidAttributes<'g> {
    // Ok(None): no rigid flag at all. Err: flag present, something else missing.
    fn find(geo: &'g Geometry, object: &str) -> BridgeResult<Option<Self>> {
        if !geo.has_attribute(AttributeClass::Primitive, attr::RIGID_FLAG) {
            return Ok(None);
        }
        let missing = |name: &str| BridgeError::missing(object, name);
        Ok(Some(Self {
            translation: geo
                .vec3(AttributeClass::Primitive, attr::RIGID_TRANSLATION)
                .ok_or_else(|| missing(attr::RIGID_TRANSLATION))?,
            rotation: geo
                .vec4(AttributeClass::Primitive, attr::RIGID_ROTATION)
                .ok_or_else(|| missing(attr::RIGID_ROTATION))?,
            rest_position: geo
                .vec3(AttributeClass::Vertex, attr::RIGID_REST_POSITION)
                .ok_or_else(|| missing(attr::RIGID_REST_POSITION))?,
            rest_normal: geo
                .vec3(AttributeClass::Vertex, attr::RIGID_REST_NORMAL)
                .ok_or_else(|| missing(attr::RIGID_REST_NORMAL))?,
            sdf: geo
                .float(AttributeClass::Vertex, attr::RIGID_SDF)
                .ok_or_else(|| missing(attr::RIGID_SDF))?,
            stiffness: geo
                .float(AttributeClass::Primitive, attr::RIGID_STIFFNESS)
                .ok_or_else(|| missing(attr::RIGID_STIFFNESS))?,
        }))
    }
}

fn normalized(v: Float3) -> Float3 {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 0.0 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        v
    }
}

fn add3(a: Float3, b: Float3) -> Float3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Spring, triangle and rigid arrays of one container
pub struct ConstraintBuffers {
    spring_indices: MappedBuffer<i32>,
    spring_lengths: MappedBuffer<f32>,
    spring_coefficients: MappedBuffer<f32>,

    triangle_indices: MappedBuffer<i32>,
    triangle_normals: MappedBuffer<Float3>,

    rigid_offsets: MappedBuffer<i32>,
    rigid_indices: MappedBuffer<i32>,
    rigid_rest_positions: MappedBuffer<Float3>,
    rigid_rest_normals: MappedBuffer<Float4>,
    rigid_stiffness: MappedBuffer<f32>,
    rigid_rotations: MappedBuffer<Quat>,
    rigid_translations: MappedBuffer<Float3>,

    summary: TopologySummary,
    /// Primitive index of every rigid cluster, in cluster order
    rigid_prims: Vec<usize>,
}

impl ConstraintBuffers {
    pub fn new(device: Arc<dyn ComputeDevice>) -> BridgeResult<Self> {
        let d = || Arc::clone(&device);
        Ok(Self {
            spring_indices: MappedBuffer::new(d(), "spring_indices", 0)?,
            spring_lengths: MappedBuffer::new(d(), "spring_lengths", 0)?,
            spring_coefficients: MappedBuffer::new(d(), "spring_coefficients", 0)?,
            triangle_indices: MappedBuffer::new(d(), "triangle_indices", 0)?,
            triangle_normals: MappedBuffer::new(d(), "triangle_normals", 0)?,
            rigid_offsets: MappedBuffer::new(d(), "rigid_offsets", 1)?,
            rigid_indices: MappedBuffer::new(d(), "rigid_indices", 0)?,
            rigid_rest_positions: MappedBuffer::new(d(), "rigid_rest_positions", 0)?,
            rigid_rest_normals: MappedBuffer::new(d(), "rigid_rest_normals", 0)?,
            rigid_stiffness: MappedBuffer::new(d(), "rigid_stiffness", 0)?,
            rigid_rotations: MappedBuffer::new(d(), "rigid_rotations", 0)?,
            rigid_translations: MappedBuffer::new(d(), "rigid_translations", 0)?,
            summary: TopologySummary::default(),
            rigid_prims: Vec::new(),
        })
    }

    /// Counts from the last walk
    pub fn summary(&self) -> &TopologySummary {
        &self.summary
    }

    pub fn rigid_count(&self) -> usize {
        self.summary.rigids
    }

    /// Rigid offsets as last written (`rigid_count + 1` entries)
    pub fn rigid_offsets(&mut self) -> BridgeResult<Vec<i32>> {
        Ok(self.rigid_offsets.map()?.to_vec())
    }

    /// Classify every primitive and rebuild all three arrays
    pub fn rebuild(&mut self, geo: &Geometry, active: &ActiveList, object: &str) -> BridgeResult<&TopologySummary> {
        let rest_length = geo.float(AttributeClass::Primitive, attr::REST_LENGTH);
        let strength = geo.float(AttributeClass::Primitive, attr::STRENGTH);
        let spring_attrs = rest_length.zip(strength);

        let rigid = match RigidAttributes::find(geo, object) {
            Ok(rigid) => rigid,
            Err(e) => {
                warn!(object, category = e.category(), "⚠️ Rigid primitives ignored: {}", e);
                None
            }
        };
        let rigid_flags = geo.int(AttributeClass::Primitive, attr::RIGID_FLAG);
        let rigid_flagged = |prim: usize| rigid_flags.map_or(false, |flag| flag[prim] != 0);

        let normal_source = NormalSource::detect(geo);
        let represented = |prim: usize| geo.primitive_points(prim).all(|p| p < active.len());

        // Pass 1: classify and count
        let mut kinds = Vec::with_capacity(geo.primitive_count());
        let mut dropped = 0;
        let (mut springs, mut triangles, mut rigid_indices) = (0usize, 0usize, 0usize);
        let mut rigid_prims = Vec::new();
        for prim in 0..geo.primitive_count() {
            let vertex_count = geo.primitive_vertex_count(prim);
            let kind = if rigid_flagged(prim) {
                if rigid.is_some() {
                    PrimKind::Rigid
                } else {
                    PrimKind::Ignored
                }
            } else if vertex_count == 2 && spring_attrs.is_some() {
                PrimKind::Spring
            } else if vertex_count == 3 {
                PrimKind::Triangle
            } else {
                PrimKind::Ignored
            };

            let kind = if kind != PrimKind::Ignored && !represented(prim) {
                dropped += 1;
                PrimKind::Ignored
            } else {
                kind
            };
            match kind {
                PrimKind::Spring => springs += 1,
                PrimKind::Triangle => triangles += 1,
                PrimKind::Rigid => {
                    rigid_prims.push(prim);
                    rigid_indices += vertex_count;
                }
                PrimKind::Ignored => {}
            }
            kinds.push(kind);
        }
        let rigids = rigid_prims.len();
        let with_normals = normal_source != NormalSource::None;

        // Resize to the counts found
        self.spring_indices.resize(springs * 2)?;
        self.spring_lengths.resize(springs)?;
        self.spring_coefficients.resize(springs)?;
        self.triangle_indices.resize(triangles * 3)?;
        self.triangle_normals.resize(if with_normals { triangles } else { 0 })?;
        self.rigid_offsets.resize(rigids + 1)?;
        self.rigid_indices.resize(rigid_indices)?;
        self.rigid_rest_positions.resize(rigid_indices)?;
        self.rigid_rest_normals.resize(rigid_indices)?;
        self.rigid_stiffness.resize(rigids)?;
        self.rigid_rotations.resize(rigids)?;
        self.rigid_translations.resize(rigids)?;

        // Pass 2: fill
        let slot = |point: usize| active.slots()[point] as i32;
        {
            let mut spring_indices = self.spring_indices.map()?;
            let mut spring_lengths = self.spring_lengths.map()?;
            let mut spring_coefficients = self.spring_coefficients.map()?;
            let mut triangle_indices = self.triangle_indices.map()?;
            let mut triangle_normals = self.triangle_normals.map()?;
            let mut offsets = self.rigid_offsets.map()?;
            let mut members = self.rigid_indices.map()?;
            let mut rest_positions = self.rigid_rest_positions.map()?;
            let mut rest_normals = self.rigid_rest_normals.map()?;
            let mut stiffness = self.rigid_stiffness.map()?;
            let mut rotations = self.rigid_rotations.map()?;
            let mut translations = self.rigid_translations.map()?;

            let (mut s, mut t, mut r, mut m) = (0usize, 0usize, 0usize, 0usize);
            for (prim, kind) in kinds.iter().enumerate() {
                match kind {
                    PrimKind::Spring => {
                        if let Some((lengths, strengths)) = spring_attrs {
                            let mut points = geo.primitive_points(prim);
                            let (a, b) = (points.next().unwrap_or(0), points.next().unwrap_or(0));
                            spring_indices[2 * s] = slot(a);
                            spring_indices[2 * s + 1] = slot(b);
                            spring_lengths[s] = lengths[prim];
                            spring_coefficients[s] = strengths[prim];
                            s += 1;
                        }
                    }
                    PrimKind::Triangle => {
                        let vertices = geo.primitive_vertices(prim);
                        for (k, vertex) in vertices.clone().enumerate() {
                            triangle_indices[3 * t + k] = slot(geo.vertex_point(vertex));
                        }
                        if with_normals {
                            triangle_normals[t] = triangle_normal(geo, normal_source, prim, vertices);
                        }
                        t += 1;
                    }
                    PrimKind::Rigid => {
                        if let Some(rigid) = &rigid {
                            offsets[r] = m as i32;
                            for vertex in geo.primitive_vertices(prim) {
                                members[m] = slot(geo.vertex_point(vertex));
                                rest_positions[m] = rigid.rest_position[vertex];
                                let n = rigid.rest_normal[vertex];
                                rest_normals[m] = [n[0], n[1], n[2], rigid.sdf[vertex]];
                                m += 1;
                            }
                            stiffness[r] = rigid.stiffness[prim];
                            translations[r] = rigid.translation[prim];
                            rotations[r] = Quat::from_array(rigid.rotation[prim]);
                            r += 1;
                        }
                    }
                    PrimKind::Ignored => {}
                }
            }
            offsets[r] = m as i32;

            spring_indices.unmap()?;
            spring_lengths.unmap()?;
            spring_coefficients.unmap()?;
            triangle_indices.unmap()?;
            triangle_normals.unmap()?;
            offsets.unmap()?;
            members.unmap()?;
            rest_positions.unmap()?;
            rest_normals.unmap()?;
            stiffness.unmap()?;
            rotations.unmap()?;
            translations.unmap()?;
        }

        if dropped > 0 {
            warn!(object, dropped, "⚠️ Constraints referencing unrepresented points dropped");
        }
        debug!(object, springs, triangles, rigids, rigid_indices, "topology rebuilt");

        self.rigid_prims = rigid_prims;
        self.summary = TopologySummary {
            springs,
            triangles,
            rigids,
            rigid_indices,
            with_normals,
            dropped,
        };
        Ok(&self.summary)
    }

    /// Push springs, triangles and rigids, each as its own group
    pub fn push(&self, solver: &mut dyn ParticleSolver) -> BridgeResult<()> {
        let summary = &self.summary;
        solver.set_springs(
            &SpringBuffers {
                indices: self.spring_indices.id()?,
                lengths: self.spring_lengths.id()?,
                coefficients: self.spring_coefficients.id()?,
            },
            summary.springs,
        )?;
        solver.set_dynamic_triangles(
            &TriangleBuffers {
                indices: self.triangle_indices.id()?,
                normals: if summary.with_normals {
                    Some(self.triangle_normals.id()?)
                } else {
                    None
                },
            },
            summary.triangles,
        )?;
        solver.set_rigids(&self.rigid_buffers()?, summary.rigids, summary.rigid_indices)
    }

    fn rigid_buffers(&self) -> BridgeResult<RigidBuffers> {
        Ok(RigidBuffers {
            offsets: self.rigid_offsets.id()?,
            indices: self.rigid_indices.id()?,
            rest_positions: self.rigid_rest_positions.id()?,
            rest_normals: self.rigid_rest_normals.id()?,
            stiffness: self.rigid_stiffness.id()?,
            rotations: self.rigid_rotations.id()?,
            translations: self.rigid_translations.id()?,
        })
    }

    /// Fetch rigid transforms from the solver; nothing to do without rigids
    pub fn pull_rigids(&self, solver: &mut dyn ParticleSolver) -> BridgeResult<()> {
        if self.summary.rigids == 0 {
            return Ok(());
        }
        solver.get_rigid_transforms(self.rigid_rotations.id()?, self.rigid_translations.id()?)
    }

    /// Write rigid transforms onto their primitives; returns clusters written
    pub fn write_back_rigids(&mut self, geo: &mut Geometry) -> BridgeResult<usize> {
        if self.rigid_prims.is_empty() {
            return Ok(0);
        }
        let translations = self.rigid_translations.map()?;
        let rotations = self.rigid_rotations.map()?;
        let prim_count = geo.primitive_count();
        let mut written = 0;
        {
            let out = geo.vec3_mut_or_add(AttributeClass::Primitive, attr::RIGID_TRANSLATION, 0.0);
            for (cluster, &prim) in self.rigid_prims.iter().enumerate() {
                if prim < prim_count && cluster < translations.len() {
                    out[prim] = translations[cluster];
                    written += 1;
                }
            }
        }
        {
            let out = geo.vec4_mut_or_add(AttributeClass::Primitive, attr::RIGID_ROTATION, 0.0);
            for (cluster, &prim) in self.rigid_prims.iter().enumerate() {
                if prim < prim_count && cluster < rotations.len() {
                    out[prim] = rotations[cluster].to_array();
                }
            }
        }
        translations.unmap()?;
        rotations.unmap()?;
        Ok(written)
    }
}

fn triangle_normal(
    geo: &Geometry,
    source: NormalSource,
    prim: usize,
    vertices: std::ops::Range<usize>,
) -> Float3 {
    match source {
        NormalSource::Primitive => geo
            .vec3(AttributeClass::Primitive, attr::NORMAL)
            .map_or([0.0; 3], |n| n[prim]),
        NormalSource::Vertex => geo
            .vec3(AttributeClass::Vertex, attr::NORMAL)
            .map_or([0.0; 3], |n| normalized(vertices.fold([0.0; 3], |acc, v| add3(acc, n[v])))),
        NormalSource::Point => geo
            .vec3(AttributeClass::Point, attr::NORMAL)
            .map_or([0.0; 3], |n| {
                normalized(vertices.fold([0.0; 3], |acc, v| add3(acc, n[geo.vertex_point(v)])))
            }),
        NormalSource::None => [0.0; 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ParticleIndexAllocator;
    use crate::backend::InMemoryDevice;
    use flexlink_core::geometry::{AttributeData, AttributeKind};

    fn cloth_strip() -> Geometry {
        let mut geo = Geometry::new();
        geo.add_points(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0]]);
        geo.add_primitive(&[0, 1]).unwrap();
        geo.add_primitive(&[0, 1, 2]).unwrap();
        geo.add_primitive(&[1, 3, 2]).unwrap();
        geo.set_attribute(AttributeClass::Primitive, attr::REST_LENGTH, AttributeData::Float(vec![1.0; 3]))
            .unwrap();
        geo.set_attribute(AttributeClass::Primitive, attr::STRENGTH, AttributeData::Float(vec![0.5; 3]))
            .unwrap();
        geo
    }

    #[test]
    fn test_classifies_springs_and_triangles() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device).unwrap();
        let geo = cloth_strip();
        let active = ParticleIndexAllocator::new(8).reconcile(4).active;
        let summary = buffers.rebuild(&geo, &active, "cloth").unwrap().clone();
        assert_eq!(summary.springs, 1);
        assert_eq!(summary.triangles, 2);
        assert_eq!(summary.rigids, 0);
        assert!(!summary.with_normals);
        assert_eq!(buffers.rigid_offsets().unwrap(), vec![0]);
    }

    #[test]
    fn test_springs_need_both_attributes() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device).unwrap();
        let mut geo = cloth_strip();
        geo.remove_attribute(AttributeClass::Primitive, attr::STRENGTH);
        let active = ParticleIndexAllocator::new(8).reconcile(4).active;
        let summary = buffers.rebuild(&geo, &active, "cloth").unwrap();
        assert_eq!(summary.springs, 0);
        assert_eq!(summary.triangles, 2);
    }

    #[test]
    fn test_point_normals_are_summed_and_normalized() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device.clone()).unwrap();
        let mut geo = cloth_strip();
        geo.set_attribute(
            AttributeClass::Point,
            attr::NORMAL,
            AttributeData::Vec3(vec![[0.0, 2.0, 0.0], [0.0, 1.0, 0.0], [0.0, 3.0, 0.0], [1.0, 0.0, 0.0]]),
        )
        .unwrap();
        let active = ParticleIndexAllocator::new(8).reconcile(4).active;
        assert!(buffers.rebuild(&geo, &active, "cloth").unwrap().with_normals);
        let normals: Vec<Float3> = device.read_typed(buffers.triangle_normals.id().unwrap()).unwrap();
        assert_eq!(normals[0], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_primitive_normals_take_precedence() {
        let mut geo = cloth_strip();
        geo.add_attribute(AttributeClass::Point, attr::NORMAL, AttributeKind::Vec3, 1.0);
        assert_eq!(NormalSource::detect(&geo), NormalSource::Point);
        geo.add_attribute(AttributeClass::Vertex, attr::NORMAL, AttributeKind::Vec3, 1.0);
        assert_eq!(NormalSource::detect(&geo), NormalSource::Vertex);
        geo.add_attribute(AttributeClass::Primitive, attr::NORMAL, AttributeKind::Vec3, 1.0);
        assert_eq!(NormalSource::detect(&geo), NormalSource::Primitive);
    }

    #[test]
    fn test_primitive_normals_written_as_is() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device.clone()).unwrap();
        let mut geo = cloth_strip();
        geo.set_attribute(
            AttributeClass::Primitive,
            attr::NORMAL,
            AttributeData::Vec3(vec![[9.0; 3], [0.0, 0.0, 2.0], [0.5, 0.5, 0.0]]),
        )
        .unwrap();
        let active = ParticleIndexAllocator::new(8).reconcile(4).active;
        assert!(buffers.rebuild(&geo, &active, "cloth").unwrap().with_normals);
        let normals: Vec<Float3> = device.read_typed(buffers.triangle_normals.id().unwrap()).unwrap();
        assert_eq!(normals, vec![[0.0, 0.0, 2.0], [0.5, 0.5, 0.0]]);
    }

    #[test]
    fn test_vertex_normals_are_summed_and_normalized() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device.clone()).unwrap();
        let mut geo = cloth_strip();
        let mut corner_normals = vec![[0.0f32; 3]; geo.vertex_count()];
        let first = geo.primitive_vertices(1);
        corner_normals[first.start] = [3.0, 0.0, 0.0];
        corner_normals[first.start + 2] = [1.0, 0.0, 0.0];
        geo.set_attribute(AttributeClass::Vertex, attr::NORMAL, AttributeData::Vec3(corner_normals))
            .unwrap();
        let active = ParticleIndexAllocator::new(8).reconcile(4).active;
        buffers.rebuild(&geo, &active, "cloth").unwrap();
        let normals: Vec<Float3> = device.read_typed(buffers.triangle_normals.id().unwrap()).unwrap();
        assert_eq!(normals[0], [1.0, 0.0, 0.0]);
        // all-zero corners stay zero
        assert_eq!(normals[1], [0.0; 3]);
    }

    #[test]
    fn test_flagged_prims_ignored_without_rigid_attributes() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device).unwrap();
        let mut geo = cloth_strip();
        geo.set_attribute(AttributeClass::Primitive, attr::RIGID_FLAG, AttributeData::Int(vec![0, 0, 1]))
            .unwrap();
        let active = ParticleIndexAllocator::new(8).reconcile(4).active;
        let summary = buffers.rebuild(&geo, &active, "cloth").unwrap();
        assert_eq!(summary.springs, 1);
        assert_eq!(summary.triangles, 1);
        assert_eq!(summary.rigids, 0);
        assert_eq!(buffers.rigid_offsets().unwrap(), vec![0]);
    }

    #[test]
    fn test_unrepresented_points_drop_constraints() {
        let device = Arc::new(InMemoryDevice::new());
        let mut buffers = ConstraintBuffers::new(device).unwrap();
        let geo = cloth_strip();
        // only points 0..3 have slots; the second triangle uses point 3
        let active = ParticleIndexAllocator::new(3).reconcile(4).active;
        let summary = buffers.rebuild(&geo, &active, "cloth").unwrap();
        assert_eq!(summary.triangles, 1);
        assert_eq!(summary.dropped, 1);
    }

    #[test]
    fn test_stamps_follow_attribute_changes() {
        let mut geo = cloth_strip();
        let before = TopologyStamps::observe(&geo);
        assert_eq!(before, TopologyStamps::observe(&geo));

        geo.positions_mut()[0] = [5.0; 3];
        assert_eq!(before, TopologyStamps::observe(&geo));

        geo.float_mut_or_add(AttributeClass::Primitive, attr::STRENGTH, 0.0)[0] = 1.0;
        assert_ne!(before, TopologyStamps::observe(&geo));
    }
}
