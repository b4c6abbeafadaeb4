//! Collision catalog key handling and compaction, mapped buffer teardown.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use flexlink_bridge::{CollisionCatalog, InMemoryDevice, MappedBuffer};
use flexlink_core::error::BridgeResult;
use flexlink_core::soa::CollisionGeometry;
use flexlink_core::stamp::ChangeStamp;
use flexlink_core::traits::{ShapeBuffers, ShapeSink};

#[derive(Default)]
struct RecordingSink {
    shapes: Option<(ShapeBuffers, usize)>,
}

impl ShapeSink for RecordingSink {
    fn set_shapes(&mut self, shapes: &ShapeBuffers, count: usize) -> BridgeResult<()> {
        self.shapes = Some((*shapes, count));
        Ok(())
    }
}

#[test]
fn test_duplicate_add_and_missing_remove_change_nothing() {
    let device = Arc::new(InMemoryDevice::new());
    let mut catalog = CollisionCatalog::new(device.clone()).unwrap();
    {
        let mut mapped = catalog.map_all().unwrap();
        assert!(mapped.add_sphere("a"));
        assert!(mapped.add_triangle_mesh("b").unwrap());
        mapped.set_stored_stamp("a", ChangeStamp::from_raw(77));

        assert!(!mapped.add_sphere("a"));
        assert!(!mapped.add_triangle_mesh("a").unwrap());
        assert!(!mapped.add_sphere("b"));
        assert!(!mapped.remove_item("missing"));
        mapped.unmap_all().unwrap();
    }
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.array_len(), 2);
    assert_eq!(catalog.mesh_count(), 1);
    assert_eq!(device.live_meshes(), 1);
    assert_eq!(catalog.offset_of("a"), Some(0));
    assert_eq!(catalog.offset_of("b"), Some(1));
    assert_eq!(catalog.stored_stamp("a"), ChangeStamp::from_raw(77));
    assert_eq!(catalog.stored_stamp("missing"), ChangeStamp::ABSENT);
}

#[test]
fn test_offsets_track_positions_through_random_edits() {
    let device = Arc::new(InMemoryDevice::new());
    let mut catalog = CollisionCatalog::new(device.clone()).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let mut next = 0u32;

    for _ in 0..40 {
        {
            let mut mapped = catalog.map_all().unwrap();
            if rng.gen_bool(0.6) || mapped.is_empty() {
                let key = format!("k{}", next);
                assert!(mapped.add_sphere(&key));
                // radius encodes the key so positions can be checked on the device
                if let Some(view) = mapped.get(&key) {
                    if let flexlink_bridge::ProxyShape::Sphere(geometry) = view.shape {
                        geometry.set_radius(next as f32);
                    }
                }
                next += 1;
            } else {
                let keys = mapped.keys();
                let victim = &keys[rng.gen_range(0..keys.len())];
                assert!(mapped.remove_item(victim));
            }
            mapped.unmap_all().unwrap();
        }

        let mut sink = RecordingSink::default();
        catalog.push_to_solver(&mut sink).unwrap();
        let (shapes, count) = sink.shapes.unwrap();
        assert_eq!(count, catalog.len());
        assert_eq!(catalog.array_len(), catalog.len());

        let stored: Vec<CollisionGeometry> = device.read_typed(shapes.geometry).unwrap();
        assert_eq!(stored.len(), catalog.len());
        for key in catalog.keys() {
            let offset = catalog.offset_of(key).unwrap();
            let id: f32 = key[1..].parse().unwrap();
            assert_eq!(stored[offset].radius(), id, "key {} at offset {}", key, offset);
        }
    }
}

#[test]
fn test_removing_mesh_shifts_later_entries_and_destroys_it() {
    let device = Arc::new(InMemoryDevice::new());
    let mut catalog = CollisionCatalog::new(device.clone()).unwrap();
    {
        let mut mapped = catalog.map_all().unwrap();
        assert!(mapped.add_triangle_mesh("A").unwrap());
        assert!(mapped.add_sphere("B"));
        mapped.unmap_all().unwrap();
    }
    assert_eq!(device.live_meshes(), 1);
    assert_eq!(catalog.offset_of("B"), Some(1));

    {
        let mut mapped = catalog.map_all().unwrap();
        assert!(mapped.remove_item("A"));
        mapped.unmap_all().unwrap();
    }
    assert_eq!(catalog.offset_of("B"), Some(0));
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.mesh_count(), 0);
    assert_eq!(device.live_meshes(), 0);
}

#[test]
fn test_destroy_twice_equals_once() {
    let device = Arc::new(InMemoryDevice::new());
    let mut once: MappedBuffer<f32> = MappedBuffer::new(device.clone(), "once", 16).unwrap();
    let mut twice: MappedBuffer<f32> = MappedBuffer::new(device.clone(), "twice", 16).unwrap();
    assert_eq!(device.live_buffers(), 2);

    once.destroy();
    twice.destroy();
    twice.destroy();

    assert_eq!(device.live_buffers(), 0);
    assert_eq!(once.is_destroyed(), twice.is_destroyed());
    assert!(once.id().is_err());
    assert!(twice.id().is_err());
    drop(once);
    drop(twice);
    assert_eq!(device.live_buffers(), 0);
}
