//! Device backend interface.
//!
//! This is the narrow surface the arrays need from a device: buffers,
//! memory, mapping, command pools and a blocking copy submission. Instance
//! bootstrap, logical device creation and pipelines live outside it.

use std::fmt::Debug;
use std::hash::Hash;
use std::ptr::NonNull;
use std::time::Duration;

use crate::error::BackendError;
use crate::memory::flags::{BufferUsage, MemoryProperty, QueueFlags};

/// Byte range covering the remainder of an allocation.
pub const WHOLE_SIZE: u64 = u64::MAX;

/// Memory requirements of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Allocation size in bytes (may exceed the buffer size)
    pub size: u64,
    /// Required alignment
    pub alignment: u64,
    /// Bit `i` set if memory type `i` may back the buffer
    pub memory_type_bits: u32,
}

/// Properties of one queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub flags: QueueFlags,
    pub queue_count: u32,
}

/// One buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl CopyRegion {
    /// Copy `size` bytes from offset 0 to offset 0.
    pub fn whole(size: u64) -> Self {
        Self { src_offset: 0, dst_offset: 0, size }
    }
}

/// Primitive device operations.
///
/// Handles are plain copyable values owned by whoever created them; the
/// backend never frees anything on its own. Implementations need no
/// internal synchronization beyond what their `&self` methods require.
pub trait DeviceBackend {
    type Buffer: Copy + Eq + Hash + Debug;
    type Memory: Copy + Eq + Hash + Debug;
    type CommandPool: Copy + Eq + Hash + Debug;
    type CommandBuffer: Copy + Eq + Hash + Debug;

    /// Queue families of the physical device, by index.
    fn queue_families(&self) -> Vec<QueueFamily>;

    /// Memory-type table of the physical device, by index.
    fn memory_types(&self) -> Vec<MemoryProperty>;

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> Result<Self::Buffer, BackendError>;

    fn destroy_buffer(&self, buffer: Self::Buffer);

    fn buffer_memory_requirements(&self, buffer: Self::Buffer) -> MemoryRequirements;

    fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<Self::Memory, BackendError>;

    fn free_memory(&self, memory: Self::Memory);

    fn bind_buffer_memory(
        &self,
        buffer: Self::Buffer,
        memory: Self::Memory,
        offset: u64,
    ) -> Result<(), BackendError>;

    /// Map `size` bytes (or [`WHOLE_SIZE`]) at `offset` into host address space.
    fn map_memory(
        &self,
        memory: Self::Memory,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, BackendError>;

    fn unmap_memory(&self, memory: Self::Memory);

    /// Make host writes in the range visible to the device.
    fn flush_memory(&self, memory: Self::Memory, offset: u64, size: u64) -> Result<(), BackendError>;

    /// Make device writes in the range visible to the host.
    fn invalidate_memory(
        &self,
        memory: Self::Memory,
        offset: u64,
        size: u64,
    ) -> Result<(), BackendError>;

    /// Create a pool whose buffers can be reset individually.
    fn create_command_pool(&self, queue_family: u32) -> Result<Self::CommandPool, BackendError>;

    fn destroy_command_pool(&self, pool: Self::CommandPool);

    /// Allocate one primary command buffer.
    fn allocate_command_buffer(
        &self,
        pool: Self::CommandPool,
    ) -> Result<Self::CommandBuffer, BackendError>;

    fn free_command_buffer(&self, pool: Self::CommandPool, buffer: Self::CommandBuffer);

    /// Reset the buffer and record an empty one-time batch into it.
    fn reset_command_buffer(&self, buffer: Self::CommandBuffer) -> Result<(), BackendError>;

    /// Reset `cmd` and record a single buffer copy into it.
    fn record_copy(
        &self,
        cmd: Self::CommandBuffer,
        src: Self::Buffer,
        dst: Self::Buffer,
        region: CopyRegion,
    ) -> Result<(), BackendError>;

    /// Submit `cmd` to queue 0 of `queue_family` and block until it completes.
    ///
    /// `None` waits indefinitely; an expired wait is [`BackendError::Timeout`].
    fn submit_and_wait(
        &self,
        queue_family: u32,
        cmd: Self::CommandBuffer,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError>;
}
