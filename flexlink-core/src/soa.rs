//! # Solver Element Layouts
//!
//! The solver consumes flat, tightly packed arrays. Every element type that
//! crosses into device memory lives here and is `#[repr(C)]` + `Pod` so a
//! mapped buffer can be reinterpreted as bytes without copies.
//!
//! Particle data is kept as a structure of arrays:
//! - positions: `[f32; 4]` per slot, xyz + inverse mass in w
//! - velocities: `[f32; 3]` per slot
//! - phases: `i32` per slot (group + behaviour flags)
//! - rest positions: `[f32; 4]` per slot, w = 1
//!
//! Collision shapes are six parallel arrays indexed by shape slot: geometry,
//! position, rotation, previous position, previous rotation, flags.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Particle position plus inverse mass in `w`
pub type Float4 = [f32; 4];

/// Plain 3-vector
pub type Float3 = [f32; 3];

/// Rotation quaternion, xyzw order
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn from_array(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Identifier the device assigns to a registered triangle mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct TriangleMeshId(pub u32);

/// Collision shape kind, stored in the low byte of [`ShapeFlags`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ShapeType {
    Sphere = 0,
    Capsule = 1,
    Box = 2,
    ConvexMesh = 3,
    TriangleMesh = 4,
    Sdf = 5,
}

impl ShapeType {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Sphere),
            1 => Some(Self::Capsule),
            2 => Some(Self::Box),
            3 => Some(Self::ConvexMesh),
            4 => Some(Self::TriangleMesh),
            5 => Some(Self::Sdf),
            _ => None,
        }
    }
}

/// Per-shape flag word
///
/// Bit layout:
/// - bits 0-7: shape type
/// - bit 8: dynamic (shape moves between steps, sweep from previous transform)
/// - bits 9-31: reserved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct ShapeFlags(pub u32);

impl ShapeFlags {
    pub const TYPE_MASK: u32 = 0xff;
    pub const DYNAMIC: u32 = 1 << 8;

    pub fn new(shape: ShapeType, dynamic: bool) -> Self {
        let mut bits = shape as u32;
        if dynamic {
            bits |= Self::DYNAMIC;
        }
        Self(bits)
    }

    #[inline]
    pub fn shape_type(self) -> Option<ShapeType> {
        ShapeType::from_bits(self.0 & Self::TYPE_MASK)
    }

    #[inline]
    pub fn is_dynamic(self) -> bool {
        self.0 & Self::DYNAMIC != 0
    }
}

/// Shape descriptor slot
///
/// One layout covers every shape kind; the meaning of `params` depends on
/// the type recorded in the matching [`ShapeFlags`]:
/// - sphere: `params[0]` = radius
/// - triangle mesh: `params[0..3]` = scale, `mesh` = registered mesh id
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CollisionGeometry {
    pub params: [f32; 4],
    pub mesh: u32,
    pub _pad: [u32; 3],
}

impl CollisionGeometry {
    pub fn sphere(radius: f32) -> Self {
        Self {
            params: [radius, 0.0, 0.0, 0.0],
            mesh: 0,
            _pad: [0; 3],
        }
    }

    pub fn triangle_mesh(mesh: TriangleMeshId, scale: Float3) -> Self {
        Self {
            params: [scale[0], scale[1], scale[2], 0.0],
            mesh: mesh.0,
            _pad: [0; 3],
        }
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.params[0]
    }

    #[inline]
    pub fn set_radius(&mut self, radius: f32) {
        self.params[0] = radius;
    }

    #[inline]
    pub fn mesh_id(&self) -> TriangleMeshId {
        TriangleMeshId(self.mesh)
    }

    #[inline]
    pub fn scale(&self) -> Float3 {
        [self.params[0], self.params[1], self.params[2]]
    }
}

/// Particle phase word: collision group in the low 20 bits, behaviour flags above
pub struct Phase;

impl Phase {
    pub const GROUP_MASK: i32 = 0x000f_ffff;
    pub const SELF_COLLIDE: i32 = 1 << 20;
    pub const SELF_COLLIDE_FILTER: i32 = 1 << 21;
    pub const FLUID: i32 = 1 << 22;

    pub fn make(group: i32, flags: i32) -> i32 {
        (group & Self::GROUP_MASK) | flags
    }

    pub fn group(phase: i32) -> i32 {
        phase & Self::GROUP_MASK
    }

    pub fn is_fluid(phase: i32) -> bool {
        phase & Self::FLUID != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quat_size() {
        assert_eq!(std::mem::size_of::<Quat>(), 16);
    }

    #[test]
    fn test_collision_geometry_size() {
        // 4 params + mesh id + 3 pad = 32 bytes
        assert_eq!(std::mem::size_of::<CollisionGeometry>(), 32);
    }

    #[test]
    fn test_shape_flags() {
        let flags = ShapeFlags::new(ShapeType::TriangleMesh, true);
        assert_eq!(flags.shape_type(), Some(ShapeType::TriangleMesh));
        assert!(flags.is_dynamic());

        let sphere = ShapeFlags::new(ShapeType::Sphere, false);
        assert_eq!(sphere.shape_type(), Some(ShapeType::Sphere));
        assert!(!sphere.is_dynamic());
    }

    #[test]
    fn test_geometry_accessors() {
        let mut s = CollisionGeometry::sphere(0.5);
        assert_eq!(s.radius(), 0.5);
        s.set_radius(2.0);
        assert_eq!(s.radius(), 2.0);

        let m = CollisionGeometry::triangle_mesh(TriangleMeshId(7), [1.0, 2.0, 3.0]);
        assert_eq!(m.mesh_id(), TriangleMeshId(7));
        assert_eq!(m.scale(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_phase_bits() {
        let p = Phase::make(3, Phase::SELF_COLLIDE | Phase::FLUID);
        assert_eq!(Phase::group(p), 3);
        assert!(Phase::is_fluid(p));
        assert!(!Phase::is_fluid(Phase::make(3, Phase::SELF_COLLIDE)));
    }
}
