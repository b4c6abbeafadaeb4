//! # Particle Buffers
//!
//! The per-slot particle arrays of one container, and the copies between
//! them and host geometry in logical point order.
//!
//! Every array is sized to the container capacity once and never resized.
//! Only slots named by the active list are written; the rest keep whatever
//! the device last held.

use std::sync::Arc;

use flexlink_core::error::{BridgeError, BridgeResult};
use flexlink_core::geometry::{attr, AttributeClass, Geometry};
use flexlink_core::soa::{Float3, Float4, Phase};
use flexlink_core::traits::{ComputeDevice, ParticleBuffers, ParticleSolver};

use crate::allocator::ActiveList;
use crate::buffer::MappedBuffer;

/// Phase given to points without a `phs` attribute
pub const DEFAULT_PHASE: i32 = Phase::SELF_COLLIDE | Phase::FLUID;

/// What a write-back produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteBackStats {
    /// Points written
    pub written: usize,
    /// Host points left untouched because they had no slot
    pub unrepresented: usize,
}

/// Particle arrays of one container
pub struct ParticleData {
    positions: MappedBuffer<Float4>,
    velocities: MappedBuffer<Float3>,
    phases: MappedBuffer<i32>,
    rest_positions: MappedBuffer<Float4>,
    active: MappedBuffer<i32>,
    capacity: usize,
}

impl ParticleData {
    pub fn new(device: Arc<dyn ComputeDevice>, capacity: usize) -> BridgeResult<Self> {
        Ok(Self {
            positions: MappedBuffer::new(Arc::clone(&device), "particle_positions", capacity)?,
            velocities: MappedBuffer::new(Arc::clone(&device), "particle_velocities", capacity)?,
            phases: MappedBuffer::new(Arc::clone(&device), "particle_phases", capacity)?,
            rest_positions: MappedBuffer::new(Arc::clone(&device), "particle_rest_positions", capacity)?,
            active: MappedBuffer::new(device, "particle_active", capacity)?,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Device handles of the particle arrays
    pub fn buffers(&self) -> BridgeResult<ParticleBuffers> {
        Ok(ParticleBuffers {
            positions: self.positions.id()?,
            velocities: self.velocities.id()?,
            phases: self.phases.id()?,
            rest_positions: self.rest_positions.id()?,
        })
    }

    /// Fail with `MissingCollaboratorData` unless `v` and `imass` exist
    pub fn require_inputs(geo: &Geometry, object: &str) -> BridgeResult<()> {
        if geo.vec3(AttributeClass::Point, attr::VELOCITY).is_none() {
            return Err(BridgeError::missing(object, attr::VELOCITY));
        }
        if geo.float(AttributeClass::Point, attr::INVERSE_MASS).is_none() {
            return Err(BridgeError::missing(object, attr::INVERSE_MASS));
        }
        Ok(())
    }

    /// Copy host points into their slots
    ///
    /// Needs `v` and `imass`; `phs` and `restP` are optional. Points past
    /// the end of `active` are skipped.
    pub fn fill_from(&mut self, geo: &Geometry, active: &ActiveList, object: &str) -> BridgeResult<()> {
        let velocity = geo
            .vec3(AttributeClass::Point, attr::VELOCITY)
            .ok_or_else(|| BridgeError::missing(object, attr::VELOCITY))?;
        let inverse_mass = geo
            .float(AttributeClass::Point, attr::INVERSE_MASS)
            .ok_or_else(|| BridgeError::missing(object, attr::INVERSE_MASS))?;
        let phase = geo.int(AttributeClass::Point, attr::PHASE);
        let rest = geo.vec3(AttributeClass::Point, attr::REST_POSITION);

        let count = active.len().min(geo.point_count());
        let points = geo.positions();

        let mut positions = self.positions.map()?;
        let mut velocities = self.velocities.map()?;
        let mut phases = self.phases.map()?;
        for logical in 0..count {
            let slot = active.slots()[logical] as usize;
            let p = points[logical];
            positions[slot] = [p[0], p[1], p[2], inverse_mass[logical]];
            velocities[slot] = velocity[logical];
            phases[slot] = phase.map_or(DEFAULT_PHASE, |ph| ph[logical]);
        }
        positions.unmap()?;
        velocities.unmap()?;
        phases.unmap()?;

        if let Some(rest) = rest {
            let mut rest_positions = self.rest_positions.map()?;
            for logical in 0..count {
                let slot = active.slots()[logical] as usize;
                let r = rest[logical];
                rest_positions[slot] = [r[0], r[1], r[2], 1.0];
            }
            rest_positions.unmap()?;
        }

        self.write_active(active)
    }

    /// Write the active list into its device buffer
    pub fn write_active(&mut self, active: &ActiveList) -> BridgeResult<()> {
        let mut slots = self.active.map()?;
        for (entry, &slot) in slots.iter_mut().zip(active.slots()) {
            *entry = slot as i32;
        }
        slots.unmap()
    }

    /// Hand particle data and the first `active_count` active entries to the solver
    pub fn push(&self, solver: &mut dyn ParticleSolver, active_count: usize) -> BridgeResult<()> {
        solver.set_particles(&self.buffers()?)?;
        solver.set_active(self.active.id()?, active_count)
    }

    /// Have the solver write its results into the particle arrays
    pub fn pull(&self, solver: &mut dyn ParticleSolver) -> BridgeResult<()> {
        solver.get_particles(&self.buffers()?)
    }

    /// Copy slot results back onto host points in logical order
    ///
    /// Writes positions, `v`, `iid` and `phs`, creating the attributes when
    /// missing. Host points beyond the active list keep their values.
    pub fn write_back(&mut self, geo: &mut Geometry, active: &ActiveList) -> BridgeResult<WriteBackStats> {
        let count = active.len().min(geo.point_count());
        let unrepresented = geo.point_count() - count;

        let positions = self.positions.map()?;
        {
            let out = geo.positions_mut();
            for logical in 0..count {
                let p = positions[active.slots()[logical] as usize];
                out[logical] = [p[0], p[1], p[2]];
            }
        }
        positions.unmap()?;

        let velocities = self.velocities.map()?;
        {
            let out = geo.vec3_mut_or_add(AttributeClass::Point, attr::VELOCITY, 0.0);
            for logical in 0..count {
                out[logical] = velocities[active.slots()[logical] as usize];
            }
        }
        velocities.unmap()?;

        {
            let out = geo.int_mut_or_add(AttributeClass::Point, attr::SLOT_ID, -1);
            for logical in 0..count {
                out[logical] = active.slots()[logical] as i32;
            }
        }

        let phases = self.phases.map()?;
        {
            let out = geo.int_mut_or_add(AttributeClass::Point, attr::PHASE, 0);
            for logical in 0..count {
                out[logical] = phases[active.slots()[logical] as usize];
            }
        }
        phases.unmap()?;

        Ok(WriteBackStats {
            written: count,
            unrepresented,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ParticleIndexAllocator;
    use crate::backend::InMemoryDevice;
    use flexlink_core::geometry::AttributeData;

    fn geometry(points: &[Float3]) -> Geometry {
        let mut geo = Geometry::new();
        geo.add_points(points);
        geo.set_attribute(
            AttributeClass::Point,
            attr::VELOCITY,
            AttributeData::Vec3(vec![[0.0, 1.0, 0.0]; points.len()]),
        )
        .unwrap();
        geo.set_attribute(
            AttributeClass::Point,
            attr::INVERSE_MASS,
            AttributeData::Float(vec![2.0; points.len()]),
        )
        .unwrap();
        geo
    }

    #[test]
    fn test_fill_places_points_in_slots() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut data = ParticleData::new(memory.clone(), 8).unwrap();
        let mut alloc = ParticleIndexAllocator::new(8);
        alloc.reconcile(5);
        alloc.reconcile(2);
        let active = alloc.reconcile(3).active;

        let geo = geometry(&[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0]]);
        data.fill_from(&geo, &active, "obj").unwrap();

        let stored: Vec<Float4> = memory.read_typed(data.buffers().unwrap().positions).unwrap();
        for logical in 0..3 {
            let slot = active.slot_of(logical).unwrap() as usize;
            assert_eq!(stored[slot], [(logical + 1) as f32, 0.0, 0.0, 2.0]);
        }
        let phases: Vec<i32> = memory.read_typed(data.buffers().unwrap().phases).unwrap();
        assert_eq!(phases[active.slot_of(0).unwrap() as usize], DEFAULT_PHASE);
    }

    #[test]
    fn test_fill_requires_velocity() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut data = ParticleData::new(memory, 4).unwrap();
        let mut geo = geometry(&[[0.0; 3]]);
        geo.remove_attribute(AttributeClass::Point, attr::VELOCITY);
        let active = ParticleIndexAllocator::new(4).reconcile(1).active;
        match data.fill_from(&geo, &active, "obj") {
            Err(BridgeError::MissingCollaboratorData { attribute, .. }) => assert_eq!(attribute, "v"),
            other => panic!("expected missing data, got {:?}", other),
        }
    }

    #[test]
    fn test_write_back_creates_outputs() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut data = ParticleData::new(memory, 4).unwrap();
        let mut geo = geometry(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let active = ParticleIndexAllocator::new(4).reconcile(2).active;
        data.fill_from(&geo, &active, "obj").unwrap();

        geo.remove_attribute(AttributeClass::Point, attr::VELOCITY);
        let stats = data.write_back(&mut geo, &active).unwrap();
        assert_eq!(stats, WriteBackStats { written: 2, unrepresented: 0 });
        assert_eq!(geo.positions()[1], [4.0, 5.0, 6.0]);
        assert_eq!(geo.vec3(AttributeClass::Point, attr::VELOCITY).unwrap()[0], [0.0, 1.0, 0.0]);
        assert_eq!(geo.int(AttributeClass::Point, attr::SLOT_ID).unwrap(), &[0, 1]);
    }

    #[test]
    fn test_write_back_skips_unrepresented() {
        let memory = Arc::new(InMemoryDevice::new());
        let mut data = ParticleData::new(memory, 2).unwrap();
        let mut geo = geometry(&[[1.0; 3], [2.0; 3], [3.0; 3]]);
        let active = ParticleIndexAllocator::new(2).reconcile(3).active;
        data.fill_from(&geo, &active, "obj").unwrap();

        let stats = data.write_back(&mut geo, &active).unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.unrepresented, 1);
        assert_eq!(geo.positions()[2], [3.0; 3]);
        assert_eq!(geo.int(AttributeClass::Point, attr::SLOT_ID).unwrap()[2], -1);
    }
}
