//! Command pools and buffers owned by a device.

use super::traits::DeviceBackend;
use crate::error::{ArrayError, ResourceKind, Result};

/// Pool plus its one live command buffer.
pub(crate) struct CommandSlot<B: DeviceBackend> {
    pub pool: B::CommandPool,
    pub buffer: B::CommandBuffer,
}

// Manual implementations to avoid B: Copy/Clone bounds
impl<B: DeviceBackend> Copy for CommandSlot<B> {}

impl<B: DeviceBackend> Clone for CommandSlot<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: DeviceBackend> CommandSlot<B> {
    fn create(backend: &B, family: u32) -> Result<Self> {
        let pool = backend
            .create_command_pool(family)
            .map_err(|e| ArrayError::creation(ResourceKind::CommandPool, e))?;
        match backend.allocate_command_buffer(pool) {
            Ok(buffer) => Ok(Self { pool, buffer }),
            Err(e) => {
                backend.destroy_command_pool(pool);
                Err(ArrayError::creation(ResourceKind::CommandBuffer, e))
            }
        }
    }

    fn destroy(self, backend: &B) {
        backend.free_command_buffer(self.pool, self.buffer);
        backend.destroy_command_pool(self.pool);
    }
}

/// Compute slot plus an optional separate transfer slot.
///
/// With a shared family `transfer` is `None` and every transfer accessor
/// aliases the compute slot, so the alias can never go stale.
pub(crate) struct CommandResources<B: DeviceBackend> {
    compute: CommandSlot<B>,
    transfer: Option<CommandSlot<B>>,
}

impl<B: DeviceBackend> CommandResources<B> {
    pub fn create(backend: &B, compute_family: u32, transfer_family: u32) -> Result<Self> {
        let compute = CommandSlot::create(backend, compute_family)?;
        if compute_family == transfer_family {
            return Ok(Self { compute, transfer: None });
        }
        match CommandSlot::create(backend, transfer_family) {
            Ok(transfer) => Ok(Self { compute, transfer: Some(transfer) }),
            Err(e) => {
                compute.destroy(backend);
                Err(e)
            }
        }
    }

    pub fn compute(&self) -> CommandSlot<B> {
        self.compute
    }

    pub fn transfer(&self) -> CommandSlot<B> {
        self.transfer.unwrap_or(self.compute)
    }

    /// Swap in a fresh compute buffer and hand the old one to the caller.
    pub fn release_compute(&mut self, backend: &B) -> Result<B::CommandBuffer> {
        let fresh = backend
            .allocate_command_buffer(self.compute.pool)
            .map_err(|e| ArrayError::creation(ResourceKind::CommandBuffer, e))?;
        Ok(std::mem::replace(&mut self.compute.buffer, fresh))
    }

    pub fn destroy(&self, backend: &B) {
        if let Some(transfer) = self.transfer {
            transfer.destroy(backend);
        }
        self.compute.destroy(backend);
    }
}
