//! # Host Geometry Surface
//!
//! The host application's attribute-based geometry, reduced to the fixed
//! read/write surface the bridge consumes:
//!
//! - points with positions
//! - vertices, each referencing one point
//! - primitives, each an ordered run of vertices
//! - named attributes on points, vertices and primitives
//!
//! Every attribute carries its own [`ChangeStamp`]. Positions have a
//! dedicated stamp, and a separate topology stamp is bumped whenever point
//! or primitive counts or connectivity change. Mutable typed accessors bump
//! the stamp of what they hand out, so a writer never forgets to.
//!
//! Reading goes through a scoped read guard on [`SharedGeometry`], writing
//! through a scoped write guard, matching the host's locking discipline.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BridgeError, BridgeResult};
use crate::soa::{Float3, Float4};
use crate::stamp::ChangeStamp;

/// Geometry shared between the host and the bridge
pub type SharedGeometry = Arc<RwLock<Geometry>>;

/// Wrap a geometry for shared, lock-guarded access
pub fn shared(geometry: Geometry) -> SharedGeometry {
    Arc::new(RwLock::new(geometry))
}

/// Attribute names exchanged with the host
pub mod attr {
    pub const VELOCITY: &str = "v";
    pub const INVERSE_MASS: &str = "imass";
    pub const PHASE: &str = "phs";
    pub const SLOT_ID: &str = "iid";
    pub const REST_POSITION: &str = "restP";
    pub const REST_LENGTH: &str = "restlength";
    pub const STRENGTH: &str = "strength";
    pub const NORMAL: &str = "N";
    pub const RIGID_FLAG: &str = "rgd_isrigid";
    pub const RIGID_TRANSLATION: &str = "rgd_translation";
    pub const RIGID_ROTATION: &str = "rgd_rotation";
    pub const RIGID_REST_POSITION: &str = "rgd_restP";
    pub const RIGID_REST_NORMAL: &str = "rgd_restN";
    pub const RIGID_SDF: &str = "rgd_sdf";
    pub const RIGID_STIFFNESS: &str = "rgd_stiffness";
}

/// Which element class an attribute is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeClass {
    Point,
    Vertex,
    Primitive,
}

/// Storage kind of an attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Float,
    Int,
    Vec3,
    Vec4,
}

/// Typed attribute values, one entry per element
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeData {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Vec3(Vec<Float3>),
    Vec4(Vec<Float4>),
}

impl AttributeData {
    fn filled(kind: AttributeKind, len: usize, default: f32) -> Self {
        match kind {
            AttributeKind::Float => Self::Float(vec![default; len]),
            AttributeKind::Int => Self::Int(vec![default as i32; len]),
            AttributeKind::Vec3 => Self::Vec3(vec![[default; 3]; len]),
            AttributeKind::Vec4 => Self::Vec4(vec![[default; 4]; len]),
        }
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Float(_) => AttributeKind::Float,
            Self::Int(_) => AttributeKind::Int,
            Self::Vec3(_) => AttributeKind::Vec3,
            Self::Vec4(_) => AttributeKind::Vec4,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Vec3(v) => v.len(),
            Self::Vec4(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resize(&mut self, len: usize, default: f32) {
        match self {
            Self::Float(v) => v.resize(len, default),
            Self::Int(v) => v.resize(len, default as i32),
            Self::Vec3(v) => v.resize(len, [default; 3]),
            Self::Vec4(v) => v.resize(len, [default; 4]),
        }
    }
}

/// One named attribute: values, fill value for new elements, and change stamp
#[derive(Clone, Debug)]
pub struct Attribute {
    data: AttributeData,
    default: f32,
    stamp: ChangeStamp,
}

impl Attribute {
    pub fn data(&self) -> &AttributeData {
        &self.data
    }

    pub fn stamp(&self) -> ChangeStamp {
        self.stamp
    }

    pub fn kind(&self) -> AttributeKind {
        self.data.kind()
    }

    fn touch(&mut self) {
        self.stamp = ChangeStamp::next();
    }
}

#[derive(Clone, Copy, Debug)]
struct Primitive {
    first_vertex: usize,
    vertex_count: usize,
}

/// Attribute-based geometry: points, vertices, primitives, named attributes
#[derive(Clone, Debug)]
pub struct Geometry {
    positions: Vec<Float3>,
    position_stamp: ChangeStamp,
    vertex_points: Vec<usize>,
    primitives: Vec<Primitive>,
    topology_stamp: ChangeStamp,
    attributes: BTreeMap<(AttributeClass, String), Attribute>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            position_stamp: ChangeStamp::next(),
            vertex_points: Vec::new(),
            primitives: Vec::new(),
            topology_stamp: ChangeStamp::next(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.positions.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_points.len()
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    fn class_len(&self, class: AttributeClass) -> usize {
        match class {
            AttributeClass::Point => self.point_count(),
            AttributeClass::Vertex => self.vertex_count(),
            AttributeClass::Primitive => self.primitive_count(),
        }
    }

    fn grow_class(&mut self, class: AttributeClass) {
        let len = self.class_len(class);
        for ((c, _), attribute) in self.attributes.iter_mut() {
            if *c == class {
                attribute.data.resize(len, attribute.default);
                attribute.touch();
            }
        }
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Append one point; returns its index
    pub fn add_point(&mut self, position: Float3) -> usize {
        self.positions.push(position);
        self.grow_class(AttributeClass::Point);
        self.position_stamp = ChangeStamp::next();
        self.topology_stamp = ChangeStamp::next();
        self.positions.len() - 1
    }

    /// Append a block of points; returns their index range
    pub fn add_points(&mut self, positions: &[Float3]) -> Range<usize> {
        let start = self.positions.len();
        self.positions.extend_from_slice(positions);
        self.grow_class(AttributeClass::Point);
        self.position_stamp = ChangeStamp::next();
        self.topology_stamp = ChangeStamp::next();
        start..self.positions.len()
    }

    /// Append a primitive wiring the given points in order; returns its index
    pub fn add_primitive(&mut self, points: &[usize]) -> BridgeResult<usize> {
        if let Some(&bad) = points.iter().find(|&&p| p >= self.positions.len()) {
            return Err(BridgeError::state(format!(
                "primitive references point {} but geometry has {} points",
                bad,
                self.positions.len()
            )));
        }
        let first_vertex = self.vertex_points.len();
        self.vertex_points.extend_from_slice(points);
        self.primitives.push(Primitive {
            first_vertex,
            vertex_count: points.len(),
        });
        self.grow_class(AttributeClass::Vertex);
        self.grow_class(AttributeClass::Primitive);
        self.topology_stamp = ChangeStamp::next();
        Ok(self.primitives.len() - 1)
    }

    /// Drop every point, vertex and primitive; attributes are kept but emptied
    pub fn clear(&mut self) {
        self.positions.clear();
        self.vertex_points.clear();
        self.primitives.clear();
        for attribute in self.attributes.values_mut() {
            attribute.data.resize(0, attribute.default);
            attribute.touch();
        }
        self.position_stamp = ChangeStamp::next();
        self.topology_stamp = ChangeStamp::next();
    }

    /// Vertex index range of a primitive
    pub fn primitive_vertices(&self, primitive: usize) -> Range<usize> {
        let p = self.primitives[primitive];
        p.first_vertex..p.first_vertex + p.vertex_count
    }

    pub fn primitive_vertex_count(&self, primitive: usize) -> usize {
        self.primitives[primitive].vertex_count
    }

    /// Point a vertex refers to
    pub fn vertex_point(&self, vertex: usize) -> usize {
        self.vertex_points[vertex]
    }

    /// Points of a primitive, in vertex order
    pub fn primitive_points(&self, primitive: usize) -> impl Iterator<Item = usize> + '_ {
        self.primitive_vertices(primitive)
            .map(move |v| self.vertex_points[v])
    }

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    pub fn positions(&self) -> &[Float3] {
        &self.positions
    }

    /// Mutable positions; bumps the position stamp
    pub fn positions_mut(&mut self) -> &mut [Float3] {
        self.position_stamp = ChangeStamp::next();
        &mut self.positions
    }

    pub fn position_stamp(&self) -> ChangeStamp {
        self.position_stamp
    }

    pub fn topology_stamp(&self) -> ChangeStamp {
        self.topology_stamp
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Create (or replace) an attribute filled with `default`
    pub fn add_attribute(
        &mut self,
        class: AttributeClass,
        name: &str,
        kind: AttributeKind,
        default: f32,
    ) {
        let len = self.class_len(class);
        self.attributes.insert(
            (class, name.to_string()),
            Attribute {
                data: AttributeData::filled(kind, len, default),
                default,
                stamp: ChangeStamp::next(),
            },
        );
    }

    /// Replace an attribute with explicit values; length must match the class count
    pub fn set_attribute(
        &mut self,
        class: AttributeClass,
        name: &str,
        data: AttributeData,
    ) -> BridgeResult<()> {
        let expected = self.class_len(class);
        if data.len() != expected {
            return Err(BridgeError::state(format!(
                "attribute '{}' has {} values, {:?} count is {}",
                name,
                data.len(),
                class,
                expected
            )));
        }
        self.attributes.insert(
            (class, name.to_string()),
            Attribute {
                data,
                default: 0.0,
                stamp: ChangeStamp::next(),
            },
        );
        Ok(())
    }

    pub fn remove_attribute(&mut self, class: AttributeClass, name: &str) -> bool {
        self.attributes.remove(&(class, name.to_string())).is_some()
    }

    pub fn attribute(&self, class: AttributeClass, name: &str) -> Option<&Attribute> {
        self.attributes.get(&(class, name.to_string()))
    }

    pub fn has_attribute(&self, class: AttributeClass, name: &str) -> bool {
        self.attribute(class, name).is_some()
    }

    pub fn attribute_stamp(&self, class: AttributeClass, name: &str) -> Option<ChangeStamp> {
        self.attribute(class, name).map(Attribute::stamp)
    }

    fn attribute_mut(&mut self, class: AttributeClass, name: &str) -> Option<&mut Attribute> {
        let attribute = self.attributes.get_mut(&(class, name.to_string()))?;
        attribute.touch();
        Some(attribute)
    }

    pub fn float(&self, class: AttributeClass, name: &str) -> Option<&[f32]> {
        match self.attribute(class, name)?.data() {
            AttributeData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn int(&self, class: AttributeClass, name: &str) -> Option<&[i32]> {
        match self.attribute(class, name)?.data() {
            AttributeData::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn vec3(&self, class: AttributeClass, name: &str) -> Option<&[Float3]> {
        match self.attribute(class, name)?.data() {
            AttributeData::Vec3(v) => Some(v),
            _ => None,
        }
    }

    pub fn vec4(&self, class: AttributeClass, name: &str) -> Option<&[Float4]> {
        match self.attribute(class, name)?.data() {
            AttributeData::Vec4(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable float values, created with `default` if missing; bumps the stamp
    pub fn float_mut_or_add(&mut self, class: AttributeClass, name: &str, default: f32) -> &mut [f32] {
        self.ensure_kind(class, name, AttributeKind::Float, default);
        match self.attribute_mut(class, name).map(|a| &mut a.data) {
            Some(AttributeData::Float(v)) => v.as_mut_slice(),
            _ => &mut [],
        }
    }

    /// Mutable int values, created with `default` if missing; bumps the stamp
    pub fn int_mut_or_add(&mut self, class: AttributeClass, name: &str, default: i32) -> &mut [i32] {
        self.ensure_kind(class, name, AttributeKind::Int, default as f32);
        match self.attribute_mut(class, name).map(|a| &mut a.data) {
            Some(AttributeData::Int(v)) => v.as_mut_slice(),
            _ => &mut [],
        }
    }

    /// Mutable vec3 values, created with `default` if missing; bumps the stamp
    pub fn vec3_mut_or_add(&mut self, class: AttributeClass, name: &str, default: f32) -> &mut [Float3] {
        self.ensure_kind(class, name, AttributeKind::Vec3, default);
        match self.attribute_mut(class, name).map(|a| &mut a.data) {
            Some(AttributeData::Vec3(v)) => v.as_mut_slice(),
            _ => &mut [],
        }
    }

    /// Mutable vec4 values, created with `default` if missing; bumps the stamp
    pub fn vec4_mut_or_add(&mut self, class: AttributeClass, name: &str, default: f32) -> &mut [Float4] {
        self.ensure_kind(class, name, AttributeKind::Vec4, default);
        match self.attribute_mut(class, name).map(|a| &mut a.data) {
            Some(AttributeData::Vec4(v)) => v.as_mut_slice(),
            _ => &mut [],
        }
    }

    // A same-named attribute of another kind is replaced, as the host does
    // when a tuple size no longer matches.
    fn ensure_kind(&mut self, class: AttributeClass, name: &str, kind: AttributeKind, default: f32) {
        let matches = self
            .attribute(class, name)
            .map(|a| a.kind() == kind)
            .unwrap_or(false);
        if !matches {
            self.add_attribute(class, name, kind, default);
        }
    }

    /// Bump every stamp: positions, topology, and all attributes
    pub fn bump_all_stamps(&mut self) {
        self.position_stamp = ChangeStamp::next();
        self.topology_stamp = ChangeStamp::next();
        for attribute in self.attributes.values_mut() {
            attribute.touch();
        }
    }
}
