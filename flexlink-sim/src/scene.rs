//! Demo scene: a fluid block, a cloth patch and a rigid crate falling onto a
//! ramp and a ball.

use std::sync::Arc;

use rand::Rng;

use flexlink_bridge::{CollisionSource, DeviceRegistry, SimObject, SimulationData};
use flexlink_core::config::FlexlinkConfig;
use flexlink_core::error::BridgeResult;
use flexlink_core::geometry::{attr, shared, AttributeClass, AttributeData, Geometry, SharedGeometry};
use flexlink_core::soa::{Float3, Phase};

const GRAVITY: Float3 = [0.0, -9.8, 0.0];

/// Points with zero velocity, unit inverse mass and the given phase
fn point_cloud(points: &[Float3], phase: i32) -> BridgeResult<Geometry> {
    let mut geo = Geometry::new();
    geo.add_points(points);
    let n = points.len();
    geo.set_attribute(AttributeClass::Point, attr::VELOCITY, AttributeData::Vec3(vec![[0.0; 3]; n]))?;
    geo.set_attribute(AttributeClass::Point, attr::INVERSE_MASS, AttributeData::Float(vec![1.0; n]))?;
    geo.set_attribute(AttributeClass::Point, attr::PHASE, AttributeData::Int(vec![phase; n]))?;
    Ok(geo)
}

/// Box of fluid particles spaced `spacing` apart, each nudged by up to `jitter`
pub fn fluid_grid<R: Rng>(
    origin: Float3,
    dims: [usize; 3],
    spacing: f32,
    jitter: f32,
    rng: &mut R,
) -> BridgeResult<Geometry> {
    let mut points = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
    for x in 0..dims[0] {
        for y in 0..dims[1] {
            for z in 0..dims[2] {
                let mut j = || if jitter > 0.0 { rng.gen_range(-jitter..jitter) } else { 0.0 };
                points.push([
                    origin[0] + x as f32 * spacing + j(),
                    origin[1] + y as f32 * spacing + j(),
                    origin[2] + z as f32 * spacing + j(),
                ]);
            }
        }
    }
    point_cloud(&points, Phase::make(0, Phase::SELF_COLLIDE | Phase::FLUID))
}

/// Square cloth of `n × n` points: edge springs plus two triangles per cell
pub fn cloth_patch(origin: Float3, n: usize, spacing: f32) -> BridgeResult<Geometry> {
    let points: Vec<Float3> = (0..n * n)
        .map(|i| {
            let (row, col) = (i / n, i % n);
            [origin[0] + col as f32 * spacing, origin[1], origin[2] + row as f32 * spacing]
        })
        .collect();
    let mut geo = point_cloud(&points, Phase::make(1, Phase::SELF_COLLIDE))?;
    geo.set_attribute(AttributeClass::Point, attr::NORMAL, AttributeData::Vec3(vec![[0.0, 1.0, 0.0]; n * n]))?;

    let at = |row: usize, col: usize| row * n + col;
    for row in 0..n {
        for col in 0..n {
            if col + 1 < n {
                geo.add_primitive(&[at(row, col), at(row, col + 1)])?;
            }
            if row + 1 < n {
                geo.add_primitive(&[at(row, col), at(row + 1, col)])?;
            }
        }
    }
    for row in 0..n.saturating_sub(1) {
        for col in 0..n - 1 {
            geo.add_primitive(&[at(row, col), at(row + 1, col), at(row, col + 1)])?;
            geo.add_primitive(&[at(row, col + 1), at(row + 1, col), at(row + 1, col + 1)])?;
        }
    }
    let prims = geo.primitive_count();
    geo.set_attribute(AttributeClass::Primitive, attr::REST_LENGTH, AttributeData::Float(vec![spacing; prims]))?;
    geo.set_attribute(AttributeClass::Primitive, attr::STRENGTH, AttributeData::Float(vec![0.8; prims]))?;
    Ok(geo)
}

/// Cube of side `size` made of its eight corners, held together as one rigid cluster
pub fn rigid_crate(center: Float3, size: f32) -> BridgeResult<Geometry> {
    let h = size / 2.0;
    let offsets: Vec<Float3> = (0..8)
        .map(|i| {
            let sign = |bit: usize| if i & bit != 0 { h } else { -h };
            [sign(1), sign(2), sign(4)]
        })
        .collect();
    let points: Vec<Float3> = offsets
        .iter()
        .map(|o| [center[0] + o[0], center[1] + o[1], center[2] + o[2]])
        .collect();
    let mut geo = point_cloud(&points, Phase::make(2, 0))?;
    geo.add_primitive(&(0..8).collect::<Vec<_>>())?;

    let prim = AttributeClass::Primitive;
    let vertex = AttributeClass::Vertex;
    geo.set_attribute(prim, attr::RIGID_FLAG, AttributeData::Int(vec![1]))?;
    geo.set_attribute(prim, attr::RIGID_STIFFNESS, AttributeData::Float(vec![1.0]))?;
    geo.set_attribute(prim, attr::RIGID_TRANSLATION, AttributeData::Vec3(vec![center]))?;
    geo.set_attribute(prim, attr::RIGID_ROTATION, AttributeData::Vec4(vec![[0.0, 0.0, 0.0, 1.0]]))?;

    let len = (3.0f32).sqrt() * h;
    let normals = offsets.iter().map(|o| [o[0] / len, o[1] / len, o[2] / len]).collect();
    geo.set_attribute(vertex, attr::RIGID_REST_POSITION, AttributeData::Vec3(offsets))?;
    geo.set_attribute(vertex, attr::RIGID_REST_NORMAL, AttributeData::Vec3(normals))?;
    geo.set_attribute(vertex, attr::RIGID_SDF, AttributeData::Float(vec![-h; 8]))?;
    Ok(geo)
}

/// Tilted quad the falling objects land on
pub fn ramp() -> BridgeResult<SharedGeometry> {
    let mut geo = Geometry::new();
    geo.add_points(&[[-1.5, 0.2, -1.5], [1.5, 0.8, -1.5], [1.5, 0.8, 1.5], [-1.5, 0.2, 1.5]]);
    geo.add_primitive(&[0, 1, 2, 3])?;
    Ok(shared(geo))
}

/// The three simulated objects, each colliding with the ramp and a ball
pub fn build<R: Rng>(registry: &Arc<DeviceRegistry>, config: &FlexlinkConfig, rng: &mut R) -> BridgeResult<Vec<SimObject>> {
    let spacing = config.solver.radius * config.solver.fluid_rest_distance_mult;
    let colliders = vec![
        CollisionSource::mesh("ramp", ramp()?),
        CollisionSource::sphere("ball", 0.4, [0.5, 1.2, 0.0]),
    ];

    let geometries = vec![
        ("fluid", fluid_grid([-1.0, 1.5, -0.5], [10, 10, 10], spacing, spacing * 0.05, rng)?),
        ("cloth", cloth_patch([-0.8, 2.5, -0.8], 16, 0.1)?),
        ("crate", rigid_crate([0.8, 3.0, 0.5], 0.4)?),
    ];

    Ok(geometries
        .into_iter()
        .map(|(key, geo)| {
            let data = SimulationData::new(Arc::clone(registry), config.container.clone());
            let mut object = SimObject::new(key, data, shared(geo));
            object.collisions = colliders.clone();
            object.forces.push(GRAVITY);
            object
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fluid_grid_count_and_jitter() {
        let mut rng = StdRng::seed_from_u64(1);
        let geo = fluid_grid([0.0; 3], [2, 3, 4], 0.1, 0.01, &mut rng).unwrap();
        assert_eq!(geo.point_count(), 24);
        for p in geo.positions() {
            assert!(p.iter().all(|&c| c > -0.011 && c < 0.311));
        }
        let phase = geo.int(AttributeClass::Point, attr::PHASE).unwrap()[0];
        assert!(Phase::is_fluid(phase));
    }

    #[test]
    fn test_cloth_patch_topology() {
        let geo = cloth_patch([0.0; 3], 3, 0.5).unwrap();
        // 12 edge springs + 8 triangles
        assert_eq!(geo.primitive_count(), 20);
        let twos = (0..20).filter(|&p| geo.primitive_vertex_count(p) == 2).count();
        assert_eq!(twos, 12);
    }

    #[test]
    fn test_rigid_crate_rest_shape_is_centered() {
        let geo = rigid_crate([1.0, 2.0, 3.0], 1.0).unwrap();
        let rest = geo.vec3(AttributeClass::Vertex, attr::RIGID_REST_POSITION).unwrap();
        let sum = rest.iter().fold([0.0f32; 3], |acc, r| [acc[0] + r[0], acc[1] + r[1], acc[2] + r[2]]);
        assert_eq!(sum, [0.0; 3]);
        assert_eq!(geo.int(AttributeClass::Primitive, attr::RIGID_FLAG).unwrap(), &[1]);
    }
}
