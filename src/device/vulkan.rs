//! Vulkan backend over `ash`.
//!
//! Wraps a logical device the caller created. Instance and device setup,
//! queue creation and teardown of the `ash::Device` stay with the caller;
//! the backend only creates and destroys the objects arrays ask for.

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use super::traits::{CopyRegion, DeviceBackend, MemoryRequirements, QueueFamily};
use crate::error::BackendError;
use crate::memory::flags::{BufferUsage, MemoryProperty, QueueFlags};

/// [`DeviceBackend`] for a Vulkan logical device.
pub struct VulkanBackend {
    device: Arc<ash::Device>,
    memory_types: Vec<MemoryProperty>,
    queue_families: Vec<QueueFamily>,
}

impl VulkanBackend {
    /// Query memory types and queue families of `physical_device` and wrap `device`.
    ///
    /// `device` must have been created from `physical_device` with at least
    /// one queue in every family that will be used.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: Arc<ash::Device>,
    ) -> Self {
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let memory_types = memory_properties.memory_types[..memory_properties.memory_type_count as usize]
            .iter()
            .map(|ty| MemoryProperty::from_bits(ty.property_flags.as_raw()))
            .collect();

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) }
            .iter()
            .map(|family| QueueFamily {
                flags: QueueFlags::from_bits(family.queue_flags.as_raw()),
                queue_count: family.queue_count,
            })
            .collect();

        Self {
            device,
            memory_types,
            queue_families,
        }
    }

    /// The wrapped logical device.
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }
}

fn map_result(result: vk::Result) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => BackendError::OutOfHostMemory,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => BackendError::OutOfDeviceMemory,
        vk::Result::ERROR_MEMORY_MAP_FAILED => BackendError::MemoryMapFailed,
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::TIMEOUT => BackendError::Timeout,
        other => BackendError::Other(format!("{:?}", other)),
    }
}

fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

impl DeviceBackend for VulkanBackend {
    type Buffer = vk::Buffer;
    type Memory = vk::DeviceMemory;
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;

    fn queue_families(&self) -> Vec<QueueFamily> {
        self.queue_families.clone()
    }

    fn memory_types(&self) -> Vec<MemoryProperty> {
        self.memory_types.clone()
    }

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> Result<vk::Buffer, BackendError> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::from_raw(usage.bits))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(map_result)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> MemoryRequirements {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        }
    }

    fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<vk::DeviceMemory, BackendError> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);

        unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(map_result)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> Result<(), BackendError> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }.map_err(map_result)
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<NonNull<u8>, BackendError> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(map_result)?
        };
        NonNull::new(ptr.cast::<u8>()).ok_or(BackendError::MemoryMapFailed)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) };
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<(), BackendError> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(offset)
            .size(size)
            .build();

        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }.map_err(map_result)
    }

    fn invalidate_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<(), BackendError> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(offset)
            .size(size)
            .build();

        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }.map_err(map_result)
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool, BackendError> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        unsafe { self.device.create_command_pool(&pool_info, None) }.map_err(map_result)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer, BackendError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(map_result)?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Other("no command buffer returned".to_string()))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[buffer]) };
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> Result<(), BackendError> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
                .map_err(map_result)?;
            self.device.begin_command_buffer(buffer, &begin_info).map_err(map_result)?;
            self.device.end_command_buffer(buffer).map_err(map_result)
        }
    }

    fn record_copy(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: CopyRegion,
    ) -> Result<(), BackendError> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let copy = vk::BufferCopy {
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        };

        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(map_result)?;
            self.device.begin_command_buffer(cmd, &begin_info).map_err(map_result)?;
            self.device.cmd_copy_buffer(cmd, src, dst, &[copy]);
            self.device.end_command_buffer(cmd).map_err(map_result)
        }
    }

    fn submit_and_wait(
        &self,
        queue_family: u32,
        cmd: vk::CommandBuffer,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe {
            let queue = self.device.get_device_queue(queue_family, 0);
            let fence = self
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(map_result)?;

            let result = self
                .device
                .queue_submit(queue, &[submit_info], fence)
                .and_then(|()| self.device.wait_for_fences(&[fence], true, timeout_ns(timeout)));

            // A timed-out fence is still referenced by the queue.
            if result != Err(vk::Result::TIMEOUT) {
                self.device.destroy_fence(fence, None);
            }
            result.map_err(map_result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_result() {
        assert_eq!(map_result(vk::Result::ERROR_DEVICE_LOST), BackendError::DeviceLost);
        assert_eq!(map_result(vk::Result::TIMEOUT), BackendError::Timeout);
        assert!(map_result(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_out_of_memory());
        assert!(matches!(map_result(vk::Result::ERROR_UNKNOWN), BackendError::Other(_)));
    }

    #[test]
    fn test_timeout_ns() {
        assert_eq!(timeout_ns(None), u64::MAX);
        assert_eq!(timeout_ns(Some(Duration::from_millis(2))), 2_000_000);
    }

    #[test]
    fn test_flag_bits_match_vulkan() {
        assert_eq!(MemoryProperty::HOST_CACHED.bits, vk::MemoryPropertyFlags::HOST_CACHED.as_raw());
        assert_eq!(BufferUsage::STORAGE_BUFFER.bits, vk::BufferUsageFlags::STORAGE_BUFFER.as_raw());
        assert_eq!(QueueFlags::TRANSFER.bits, vk::QueueFlags::TRANSFER.as_raw());
    }
}
