//! Untyped buffer plus its private memory.

use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use bytemuck::Pod;

use crate::device::{Device, DeviceBackend, WHOLE_SIZE};
use crate::error::{ArrayError, BackendError, ResourceKind, Result};
use crate::memory::allocator::{MemoryAllocator, MemoryBlock};
use crate::memory::flags::{BufferUsage, MemoryProperty};
use crate::util::size::format_bytes;

/// A device buffer bound at offset 0 to an allocation it owns alone.
///
/// Dropping the array unmaps, frees the memory and destroys the buffer,
/// exactly once. The borrow of the [`Device`] keeps the array from
/// outliving it.
pub struct BasicArray<'d, B: DeviceBackend> {
    device: &'d Device<B>,
    buffer: B::Buffer,
    block: MemoryBlock<B::Memory>,
    size_bytes: usize,
    mapped: Option<NonNull<u8>>,
    unmap_after_access: bool,
}

impl<'d, B: DeviceBackend> BasicArray<'d, B> {
    /// Create a buffer of `size_bytes` with storage usage plus the
    /// allocator's usage, and bind memory from `alloc` to it.
    ///
    /// Nothing is left behind on failure.
    pub fn new<A: MemoryAllocator>(device: &'d Device<B>, size_bytes: usize, alloc: &A) -> Result<Self> {
        if size_bytes == 0 {
            return Err(ArrayError::InvalidSize);
        }
        let backend = device.backend();
        let usage = BufferUsage::STORAGE_BUFFER | alloc.buffer_usage();

        let buffer = backend
            .create_buffer(size_bytes as u64, usage)
            .map_err(|e| ArrayError::creation(ResourceKind::Buffer, e))?;

        let requirements = backend.buffer_memory_requirements(buffer);
        let block = match alloc.allocate(device, &requirements) {
            Ok(block) => block,
            Err(e) => {
                backend.destroy_buffer(buffer);
                return Err(e);
            }
        };

        if let Err(e) = backend.bind_buffer_memory(buffer, block.memory, 0) {
            backend.free_memory(block.memory);
            backend.destroy_buffer(buffer);
            return Err(ArrayError::creation(ResourceKind::MemoryBinding, e));
        }

        log::trace!(
            "created {:?} ({}) in memory type {} {:?}",
            buffer,
            format_bytes(size_bytes),
            block.type_index,
            block.flags
        );

        Ok(Self {
            device,
            buffer,
            block,
            size_bytes,
            mapped: None,
            unmap_after_access: alloc.unmap_after_access(),
        })
    }

    pub fn device(&self) -> &'d Device<B> {
        self.device
    }

    /// Buffer handle, for descriptor binding and copies.
    pub fn buffer(&self) -> B::Buffer {
        self.buffer
    }

    /// Offset of the data in the buffer; always 0.
    pub fn offset_bytes(&self) -> u64 {
        0
    }

    /// Requested size, not the possibly larger allocation size.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn memory(&self) -> &MemoryBlock<B::Memory> {
        &self.block
    }

    /// Flags of the memory type actually granted.
    pub fn memory_flags(&self) -> MemoryProperty {
        self.block.flags
    }

    pub fn is_host_visible(&self) -> bool {
        self.block.flags.contains(MemoryProperty::HOST_VISIBLE)
    }

    pub fn is_host_coherent(&self) -> bool {
        self.block.flags.contains(MemoryProperty::HOST_COHERENT)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub(crate) fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Make host writes visible to the device. No-op on coherent memory.
    pub fn flush_writes(&self) -> Result<()> {
        if self.is_host_coherent() {
            return Ok(());
        }
        self.check_mapped()?;
        self.device
            .backend()
            .flush_memory(self.block.memory, 0, WHOLE_SIZE)
            .map_err(ArrayError::Transfer)
    }

    /// Make device writes visible to the host. No-op on coherent memory.
    pub fn invalidate_for_read(&self) -> Result<()> {
        if self.is_host_coherent() {
            return Ok(());
        }
        self.check_mapped()?;
        self.device
            .backend()
            .invalidate_memory(self.block.memory, 0, WHOLE_SIZE)
            .map_err(ArrayError::Transfer)
    }

    fn check_mapped(&self) -> Result<()> {
        if !self.is_host_visible() {
            return Err(ArrayError::NotHostVisible);
        }
        if self.mapped.is_none() {
            return Err(ArrayError::NotMapped);
        }
        Ok(())
    }

    /// Typed scoped mapping of the whole buffer.
    ///
    /// Reuses a live mapping if there is one; otherwise maps now and
    /// unmaps when the guard drops. The guard neither flushes nor
    /// invalidates: use [`Mapping::flush`] and [`Mapping::invalidate`] on
    /// non-coherent memory.
    pub fn map<T: Pod>(&mut self) -> Result<Mapping<'_, 'd, B, T>> {
        let owned = self.mapped.is_none();
        let ptr = self.host_ptr()?;
        let len = self.size_bytes / mem::size_of::<T>().max(1);
        if ptr.as_ptr() as usize % mem::align_of::<T>() != 0 {
            if owned {
                self.unmap();
            }
            return Err(ArrayError::Transfer(BackendError::InvalidUsage(format!(
                "mapping is not aligned for {}",
                std::any::type_name::<T>()
            ))));
        }
        Ok(Mapping {
            ptr: ptr.cast::<T>(),
            len,
            owned,
            array: self,
            _marker: PhantomData,
        })
    }

    /// Pointer to the mapped data, mapping now if needed.
    ///
    /// A fresh mapping is invalidated so it starts with device contents.
    pub(crate) fn host_ptr(&mut self) -> Result<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        if !self.is_host_visible() {
            return Err(ArrayError::NotHostVisible);
        }
        let ptr = self
            .device
            .backend()
            .map_memory(self.block.memory, 0, WHOLE_SIZE)
            .map_err(|e| match e {
                BackendError::DeviceLost => ArrayError::DeviceLost,
                other => ArrayError::Transfer(other),
            })?;
        self.mapped = Some(ptr);
        self.invalidate_for_read()?;
        Ok(ptr)
    }

    /// End of one host access; unmaps if the allocator asked for it.
    pub(crate) fn finish_access(&mut self) {
        if self.unmap_after_access {
            self.unmap();
        }
    }

    /// Drop the live mapping, if any.
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            self.device.backend().unmap_memory(self.block.memory);
        }
    }
}

impl<'d, B: DeviceBackend> Drop for BasicArray<'d, B> {
    fn drop(&mut self) {
        self.unmap();
        let backend = self.device.backend();
        backend.free_memory(self.block.memory);
        backend.destroy_buffer(self.buffer);
        log::trace!("released {:?}", self.buffer);
    }
}

/// Scoped typed view of mapped memory.
pub struct Mapping<'a, 'd, B: DeviceBackend, T: Pod> {
    array: &'a mut BasicArray<'d, B>,
    ptr: NonNull<T>,
    len: usize,
    owned: bool,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, 'd, B: DeviceBackend, T: Pod> Mapping<'a, 'd, B, T> {
    /// Make writes through this mapping visible to the device.
    pub fn flush(&self) -> Result<()> {
        self.array.flush_writes()
    }

    /// Make device writes visible through this mapping.
    pub fn invalidate(&self) -> Result<()> {
        self.array.invalidate_for_read()
    }
}

impl<'a, 'd, B: DeviceBackend, T: Pod> Deref for Mapping<'a, 'd, B, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: ptr maps at least len * size_of::<T>() bytes, is aligned,
        // and the &mut borrow of the array keeps the mapping alive and unique.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<'a, 'd, B: DeviceBackend, T: Pod> DerefMut for Mapping<'a, 'd, B, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as in deref
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<'a, 'd, B: DeviceBackend, T: Pod> Drop for Mapping<'a, 'd, B, T> {
    fn drop(&mut self) {
        if self.owned {
            self.array.unmap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy::{DummyBackend, DummyOp};
    use crate::memory::allocator::{MemoryKind, PropertyAllocator};

    #[test]
    fn test_zero_size_is_rejected() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let err = BasicArray::new(&device, 0, &MemoryKind::Host).err().unwrap();
        assert_eq!(err, ArrayError::InvalidSize);
        assert_eq!(device.backend().stats().buffers_created, 0);
    }

    #[test]
    fn test_storage_usage_and_private_memory() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let a = BasicArray::new(&device, 100, &MemoryKind::Device).unwrap();
        let b = BasicArray::new(&device, 100, &MemoryKind::Device).unwrap();

        assert_ne!(a.buffer(), b.buffer());
        assert_ne!(a.memory().memory, b.memory().memory);
        assert_eq!(a.offset_bytes(), 0);
        assert_eq!(a.size_bytes(), 100);
        assert!(a.memory().size >= 100);
        assert!(a.memory_flags().contains(MemoryProperty::DEVICE_LOCAL));
        assert!(!a.is_host_visible());
    }

    #[test]
    fn test_drop_releases_once() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let array = BasicArray::new(&device, 64, &MemoryKind::Host).unwrap();
        let moved = array;
        drop(moved);

        let stats = device.backend().stats();
        assert_eq!(stats.buffers_destroyed, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.stale_handles, 0);
    }

    #[test]
    fn test_bind_failure_leaves_nothing() {
        let device = Device::new(DummyBackend::new()).unwrap();
        device.backend().fail_next(DummyOp::BindMemory, BackendError::OutOfDeviceMemory);

        let err = BasicArray::new(&device, 64, &MemoryKind::Device).err().unwrap();
        assert_eq!(
            err,
            ArrayError::ResourceCreation {
                resource: ResourceKind::MemoryBinding,
                source: BackendError::OutOfDeviceMemory,
            }
        );
        let stats = device.backend().stats();
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.live_allocations(), 0);
    }

    #[test]
    fn test_allocation_failure_destroys_buffer() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let alloc = PropertyAllocator::new(MemoryKind::Device).with_fallback(false);
        device.backend().fail_next(DummyOp::AllocateMemory, BackendError::OutOfDeviceMemory);

        assert!(BasicArray::new(&device, 64, &alloc).is_err());
        assert_eq!(device.backend().stats().live_buffers(), 0);
    }

    #[test]
    fn test_scoped_mapping_unmaps() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let mut array = BasicArray::new(&device, 16, &MemoryKind::Host).unwrap();
        {
            let mut mapping = array.map::<u32>().unwrap();
            assert_eq!(mapping.len(), 4);
            mapping.copy_from_slice(&[1, 2, 3, 4]);
        }
        assert!(!array.is_mapped());

        let bytes = device.backend().device_bytes(array.buffer()).unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_map_reuses_live_mapping() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let mut array = BasicArray::new(&device, 16, &MemoryKind::Host).unwrap();
        array.host_ptr().unwrap();
        drop(array.map::<u8>().unwrap());

        assert!(array.is_mapped());
        assert_eq!(device.backend().stats().maps, 1);
    }

    #[test]
    fn test_map_device_local_fails() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let mut array = BasicArray::new(&device, 16, &MemoryKind::Device).unwrap();
        assert_eq!(array.map::<u8>().err(), Some(ArrayError::NotHostVisible));
        assert_eq!(array.flush_writes(), Err(ArrayError::NotHostVisible));
    }

    #[test]
    fn test_non_coherent_flush_requires_mapping() {
        let device = Device::new(DummyBackend::non_coherent()).unwrap();
        let mut array = BasicArray::new(&device, 16, &MemoryKind::Host).unwrap();
        assert!(!array.is_host_coherent());
        assert_eq!(array.flush_writes(), Err(ArrayError::NotMapped));

        let mut mapping = array.map::<u8>().unwrap();
        mapping[0] = 7;
        mapping.flush().unwrap();
        drop(mapping);
        assert_eq!(device.backend().device_bytes(array.buffer()).unwrap()[0], 7);
    }
}
