//! Logical device wrapper.
//!
//! [`Device`] owns a [`DeviceBackend`] together with what the arrays need on
//! top of it: the memory-type table, the compute and transfer queue families
//! and one command pool and buffer per family. Arrays borrow the device, so
//! none of them can outlive it.

pub mod traits;
pub mod queue;
mod commands;
pub mod dummy;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use traits::{CopyRegion, DeviceBackend, MemoryRequirements, QueueFamily, WHOLE_SIZE};
pub use queue::select_queue_family;

use commands::CommandResources;

use crate::config::DeviceConfig;
use crate::error::{ArrayError, Result};
use crate::memory::flags::{MemoryProperty, QueueFlags};
use crate::memory::selector::select_memory_type;
use crate::sa_emit;
use crate::sync::mutex::Mutex;

/// A device plus the command resources used for array transfers.
pub struct Device<B: DeviceBackend> {
    backend: B,
    config: DeviceConfig,
    memory_types: Vec<MemoryProperty>,
    compute_family: u32,
    transfer_family: u32,
    commands: Mutex<CommandResources<B>>,
}

impl<B: DeviceBackend> Device<B> {
    /// Wrap `backend` with the default configuration.
    pub fn new(backend: B) -> Result<Self> {
        Self::with_config(backend, DeviceConfig::default())
    }

    /// Wrap `backend`, resolving queue families and creating command resources.
    pub fn with_config(backend: B, config: DeviceConfig) -> Result<Self> {
        let families = backend.queue_families();
        let known = |family: u32, flags: QueueFlags| {
            if (family as usize) < families.len() {
                Ok(family)
            } else {
                Err(ArrayError::QueueFamilyNotFound(flags))
            }
        };

        let compute_family = match config.compute_family {
            Some(family) => known(family, QueueFlags::COMPUTE)?,
            None => select_queue_family(&families, QueueFlags::COMPUTE)
                .ok_or(ArrayError::QueueFamilyNotFound(QueueFlags::COMPUTE))?,
        };
        let transfer_family = match config.transfer_family {
            Some(family) => known(family, QueueFlags::TRANSFER)?,
            None => match select_queue_family(&families, QueueFlags::TRANSFER) {
                Some(family) => family,
                None => {
                    sa_emit!(SA201, "compute family {}", compute_family);
                    compute_family
                }
            },
        };

        let commands = CommandResources::create(&backend, compute_family, transfer_family)?;
        let memory_types = backend.memory_types();

        log::debug!(
            "device ready: {} memory types, compute family {}, transfer family {}",
            memory_types.len(),
            compute_family,
            transfer_family
        );

        Ok(Self {
            backend,
            config,
            memory_types,
            compute_family,
            transfer_family,
            commands: Mutex::new(commands),
        })
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Memory-type table, by index.
    pub fn memory_types(&self) -> &[MemoryProperty] {
        &self.memory_types
    }

    /// Flags of memory type `index`; empty for an unknown index.
    pub fn memory_properties(&self, index: u32) -> MemoryProperty {
        self.memory_types
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Lowest eligible memory type with all of `desired`.
    pub fn select_memory(&self, type_bits: u32, desired: MemoryProperty) -> Option<u32> {
        select_memory_type(&self.memory_types, type_bits, desired)
    }

    pub fn compute_queue_family(&self) -> u32 {
        self.compute_family
    }

    pub fn transfer_queue_family(&self) -> u32 {
        self.transfer_family
    }

    /// True iff transfers go through a different family than compute work.
    pub fn has_separate_queues(&self) -> bool {
        self.compute_family != self.transfer_family
    }

    pub fn compute_cmd_pool(&self) -> B::CommandPool {
        self.commands.lock().compute().pool
    }

    pub fn compute_cmd_buffer(&self) -> B::CommandBuffer {
        self.commands.lock().compute().buffer
    }

    /// Transfer pool; the compute pool when families are shared.
    pub fn transfer_cmd_pool(&self) -> B::CommandPool {
        self.commands.lock().transfer().pool
    }

    /// Transfer command buffer; the compute buffer when families are shared.
    pub fn transfer_cmd_buffer(&self) -> B::CommandBuffer {
        self.commands.lock().transfer().buffer
    }

    /// Hand the current compute command buffer to the caller.
    ///
    /// A fresh buffer replaces it first; the caller owns the returned one
    /// and frees it with [`free_cmd_buffer`](Self::free_cmd_buffer). On
    /// failure the device keeps its current buffer.
    pub fn release_compute_cmd_buffer(&self) -> Result<B::CommandBuffer> {
        let released = self.commands.lock().release_compute(&self.backend)?;
        log::trace!("released compute command buffer {:?}", released);
        Ok(released)
    }

    /// Reset the compute command buffer to an empty recorded batch.
    pub fn reset_compute_cmd_buffer(&self) -> Result<()> {
        let cmd = self.compute_cmd_buffer();
        self.backend
            .reset_command_buffer(cmd)
            .map_err(|e| ArrayError::transfer(e, None))
    }

    /// Free a buffer obtained from [`release_compute_cmd_buffer`](Self::release_compute_cmd_buffer).
    pub fn free_cmd_buffer(&self, buffer: B::CommandBuffer) {
        self.backend.free_command_buffer(self.compute_cmd_pool(), buffer);
    }

    /// Copy `region` from `src` to `dst` on the transfer queue and wait.
    pub fn copy_buffer(&self, src: B::Buffer, dst: B::Buffer, region: CopyRegion) -> Result<()> {
        let timeout = self.config.transfer_timeout;
        let commands = self.commands.lock();
        let cmd = commands.transfer().buffer;

        log::trace!(
            "copy {} bytes {:?}+{} -> {:?}+{}",
            region.size,
            src,
            region.src_offset,
            dst,
            region.dst_offset
        );
        self.backend
            .record_copy(cmd, src, dst, region)
            .map_err(|e| ArrayError::transfer(e, timeout))?;
        self.backend
            .submit_and_wait(self.transfer_family, cmd, timeout)
            .map_err(|e| {
                log::error!("transfer on queue family {} failed: {}", self.transfer_family, e);
                ArrayError::transfer(e, timeout)
            })
    }
}

impl<B: DeviceBackend> Drop for Device<B> {
    fn drop(&mut self) {
        self.commands.lock().destroy(&self.backend);
        log::debug!("device released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy::{DummyBackend, DummyOp};
    use crate::diagnostics::{set_thread_sink, CollectingSink};
    use crate::error::{BackendError, ResourceKind};
    use std::sync::Arc;

    #[test]
    fn test_discrete_has_separate_queues() {
        let device = Device::new(DummyBackend::new()).unwrap();
        assert_eq!(device.compute_queue_family(), 0);
        assert_eq!(device.transfer_queue_family(), 1);
        assert!(device.has_separate_queues());
        assert_ne!(device.compute_cmd_pool(), device.transfer_cmd_pool());
        assert_ne!(device.compute_cmd_buffer(), device.transfer_cmd_buffer());
    }

    #[test]
    fn test_shared_family_aliases_transfer() {
        let device = Device::new(DummyBackend::unified()).unwrap();
        assert!(!device.has_separate_queues());
        assert_eq!(device.compute_cmd_pool(), device.transfer_cmd_pool());
        assert_eq!(device.compute_cmd_buffer(), device.transfer_cmd_buffer());

        let stats = device.backend().stats();
        assert_eq!(stats.command_pools_created, 1);
        assert_eq!(stats.command_buffers_allocated, 1);
    }

    #[test]
    fn test_missing_transfer_family_falls_back_to_compute() {
        let sink = Arc::new(CollectingSink::new());
        let previous = set_thread_sink(Some(sink.clone()));

        let backend = DummyBackend::builder()
            .memory_type(MemoryProperty::HOST_VISIBLE_COHERENT)
            .queue_family(QueueFlags::COMPUTE, 1)
            .build();
        let device = Device::new(backend).unwrap();
        assert_eq!(device.transfer_queue_family(), device.compute_queue_family());
        assert_eq!(sink.codes(), vec!["SA201"]);

        set_thread_sink(previous);
    }

    #[test]
    fn test_no_compute_family() {
        let backend = DummyBackend::builder()
            .memory_type(MemoryProperty::HOST_VISIBLE_COHERENT)
            .queue_family(QueueFlags::GRAPHICS, 1)
            .build();
        let err = Device::new(backend).err().unwrap();
        assert_eq!(err, ArrayError::QueueFamilyNotFound(QueueFlags::COMPUTE));
    }

    #[test]
    fn test_configured_family_out_of_range() {
        let err = Device::with_config(DummyBackend::new(), DeviceConfig::single_queue(7))
            .err()
            .unwrap();
        assert_eq!(err, ArrayError::QueueFamilyNotFound(QueueFlags::COMPUTE));
    }

    #[test]
    fn test_single_queue_config_shares_resources() {
        let device = Device::with_config(DummyBackend::new(), DeviceConfig::single_queue(0)).unwrap();
        assert!(!device.has_separate_queues());
        assert_eq!(device.transfer_cmd_buffer(), device.compute_cmd_buffer());
    }

    #[test]
    fn test_release_compute_cmd_buffer() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let before = device.compute_cmd_buffer();
        let transfer = device.transfer_cmd_buffer();

        let released = device.release_compute_cmd_buffer().unwrap();
        assert_eq!(released, before);
        assert_ne!(device.compute_cmd_buffer(), before);
        assert_eq!(device.transfer_cmd_buffer(), transfer);

        device.free_cmd_buffer(released);
        assert_eq!(device.backend().stats().stale_handles, 0);
    }

    #[test]
    fn test_release_keeps_shared_alias_current() {
        let device = Device::new(DummyBackend::unified()).unwrap();
        let released = device.release_compute_cmd_buffer().unwrap();
        assert_ne!(device.compute_cmd_buffer(), released);
        assert_eq!(device.transfer_cmd_buffer(), device.compute_cmd_buffer());
        device.free_cmd_buffer(released);
        assert_eq!(device.backend().stats().stale_handles, 0);
    }

    #[test]
    fn test_release_failure_keeps_current_buffer() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let current = device.compute_cmd_buffer();
        device
            .backend()
            .fail_next(DummyOp::AllocateCommandBuffer, BackendError::OutOfHostMemory);

        let err = device.release_compute_cmd_buffer().unwrap_err();
        assert_eq!(
            err,
            ArrayError::ResourceCreation {
                resource: ResourceKind::CommandBuffer,
                source: BackendError::OutOfHostMemory,
            }
        );
        assert_eq!(device.compute_cmd_buffer(), current);
    }

    #[test]
    fn test_transfer_pool_failure_releases_compute_resources() {
        let backend = DummyBackend::new();
        let probe = backend.clone();
        backend.fail_nth(DummyOp::CreateCommandPool, 1, BackendError::OutOfHostMemory);

        let err = Device::new(backend).err().unwrap();
        assert!(matches!(
            err,
            ArrayError::ResourceCreation { resource: ResourceKind::CommandPool, .. }
        ));
        let stats = probe.stats();
        assert_eq!(stats.command_pools_created, 1);
        assert_eq!(stats.live_command_pools(), 0);
        assert_eq!(stats.live_command_buffers(), 0);
    }

    #[test]
    fn test_drop_releases_command_resources() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let backend = device.backend().clone();
        drop(device);

        let stats = backend.stats();
        assert_eq!(stats.command_pools_created, 2);
        assert_eq!(stats.command_pools_destroyed, 2);
        assert_eq!(stats.command_buffers_freed, 2);
        assert_eq!(stats.stale_handles, 0);
    }

    #[test]
    fn test_memory_properties_unknown_index() {
        let device = Device::new(DummyBackend::new()).unwrap();
        assert!(device.memory_properties(99).is_empty());
        assert_eq!(device.memory_properties(0), MemoryProperty::DEVICE_LOCAL);
    }
}
