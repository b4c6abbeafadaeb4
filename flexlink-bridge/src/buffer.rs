//! # Mapped Buffer
//!
//! A typed array that lives on the device, with a host copy that is only
//! reachable while the buffer is mapped.
//!
//! ```text
//!   MappedBuffer (unmapped)  --map()-->  MappedView (host writable)
//!          ^                                   |
//!          +------- unmap() / drop ------------+
//! ```
//!
//! `resize` exists only on [`MappedBuffer`], and [`MappedView`] mutably
//! borrows the buffer, so resizing while mapped or holding a host slice
//! across a resize does not compile.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::error;

use flexlink_core::error::{BridgeError, BridgeResult};
use flexlink_core::traits::{ComputeDevice, DeviceBufferId};

/// Device-resident array of `T`
pub struct MappedBuffer<T: Pod> {
    device: Arc<dyn ComputeDevice>,
    label: &'static str,
    id: Option<DeviceBufferId>,
    host: Vec<T>,
}

impl<T: Pod> MappedBuffer<T> {
    /// Allocate `len` zeroed elements on the device
    pub fn new(device: Arc<dyn ComputeDevice>, label: &'static str, len: usize) -> BridgeResult<Self> {
        let id = device.create_buffer(label, len * std::mem::size_of::<T>())?;
        Ok(Self {
            device,
            label,
            id: Some(id),
            host: vec![T::zeroed(); len],
        })
    }

    /// Element count
    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_destroyed(&self) -> bool {
        self.id.is_none()
    }

    /// Device handle, for passing to the solver
    pub fn id(&self) -> BridgeResult<DeviceBufferId> {
        self.id
            .ok_or_else(|| BridgeError::state(format!("buffer '{}' used after destroy", self.label)))
    }

    /// Change the element count; existing elements are kept, new ones zeroed
    pub fn resize(&mut self, len: usize) -> BridgeResult<()> {
        if len == self.host.len() {
            return Ok(());
        }
        let id = self.id()?;
        self.download(id)?;
        self.host.resize(len, T::zeroed());
        self.device.write_buffer(id, bytemuck::cast_slice(&self.host))
    }

    /// Make the contents host-visible; device writes become visible here
    pub fn map(&mut self) -> BridgeResult<MappedView<'_, T>> {
        let id = self.id()?;
        self.download(id)?;
        Ok(MappedView {
            buffer: self,
            committed: false,
        })
    }

    /// Release device memory; later calls do nothing
    pub fn destroy(&mut self) {
        if let Some(id) = self.id.take() {
            self.device.destroy_buffer(id);
            self.host = Vec::new();
        }
    }

    fn download(&mut self, id: DeviceBufferId) -> BridgeResult<()> {
        let bytes = self.device.buffer_len(id)?;
        let size = std::mem::size_of::<T>();
        if bytes % size != 0 {
            return Err(BridgeError::device(format!(
                "buffer '{}' holds {} bytes, not a multiple of {}",
                self.label, bytes, size
            )));
        }
        self.host.resize(bytes / size, T::zeroed());
        self.device
            .read_buffer(id, bytemuck::cast_slice_mut(&mut self.host))
    }

    fn upload(&mut self) -> BridgeResult<()> {
        let id = self.id()?;
        self.device.write_buffer(id, bytemuck::cast_slice(&self.host))
    }
}

impl<T: Pod> Drop for MappedBuffer<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: Pod> std::fmt::Debug for MappedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("label", &self.label)
            .field("id", &self.id)
            .field("len", &self.host.len())
            .finish()
    }
}

/// Host access to a mapped buffer; committed back to the device on unmap or drop
pub struct MappedView<'a, T: Pod> {
    buffer: &'a mut MappedBuffer<T>,
    committed: bool,
}

impl<'a, T: Pod> MappedView<'a, T> {
    /// Append one element
    pub fn push(&mut self, value: T) {
        self.buffer.host.push(value);
    }

    /// Remove the element at `index`, shifting later ones down
    pub fn remove(&mut self, index: usize) -> T {
        self.buffer.host.remove(index)
    }

    /// Commit host writes to the device
    pub fn unmap(mut self) -> BridgeResult<()> {
        self.committed = true;
        self.buffer.upload()
    }
}

impl<T: Pod> Deref for MappedView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.buffer.host
    }
}

impl<T: Pod> DerefMut for MappedView<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buffer.host
    }
}

impl<T: Pod> Drop for MappedView<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.buffer.upload() {
                error!("❌ Unmap of '{}' failed: {}", self.buffer.label, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryDevice;

    fn device() -> (Arc<InMemoryDevice>, Arc<dyn ComputeDevice>) {
        let device = Arc::new(InMemoryDevice::new());
        let shared: Arc<dyn ComputeDevice> = device.clone();
        (device, shared)
    }

    #[test]
    fn test_map_unmap_commits() {
        let (memory, device) = device();
        let mut buffer: MappedBuffer<i32> = MappedBuffer::new(device, "ints", 3).unwrap();
        {
            let mut view = buffer.map().unwrap();
            view[1] = 7;
            view.push(9);
            view.unmap().unwrap();
        }
        let stored: Vec<i32> = memory.read_typed(buffer.id().unwrap()).unwrap();
        assert_eq!(stored, vec![0, 7, 0, 9]);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_drop_unmaps() {
        let (memory, device) = device();
        let mut buffer: MappedBuffer<f32> = MappedBuffer::new(device, "floats", 2).unwrap();
        buffer.map().unwrap()[0] = 1.5;
        let stored: Vec<f32> = memory.read_typed(buffer.id().unwrap()).unwrap();
        assert_eq!(stored, vec![1.5, 0.0]);
    }

    #[test]
    fn test_resize_keeps_prefix() {
        let (_, device) = device();
        let mut buffer: MappedBuffer<[f32; 3]> = MappedBuffer::new(device, "vec3", 2).unwrap();
        buffer.map().unwrap()[1] = [1.0, 2.0, 3.0];
        buffer.resize(4).unwrap();
        let view = buffer.map().unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view[1], [1.0, 2.0, 3.0]);
        assert_eq!(view[3], [0.0; 3]);
    }

    #[test]
    fn test_map_sees_device_writes() {
        let (_, device) = device();
        let mut buffer: MappedBuffer<i32> = MappedBuffer::new(device.clone(), "ints", 2).unwrap();
        device
            .write_buffer(buffer.id().unwrap(), bytemuck::cast_slice(&[4i32, 5]))
            .unwrap();
        assert_eq!(&*buffer.map().unwrap(), &[4, 5]);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (memory, device) = device();
        let mut buffer: MappedBuffer<i32> = MappedBuffer::new(device, "ints", 2).unwrap();
        assert_eq!(memory.live_buffers(), 1);
        buffer.destroy();
        assert_eq!(memory.live_buffers(), 0);
        buffer.destroy();
        assert_eq!(memory.live_buffers(), 0);
        assert!(buffer.is_destroyed());
        assert!(buffer.map().is_err());
        drop(buffer);
        assert_eq!(memory.live_buffers(), 0);
    }
}
