//! Allocation strategies.
//!
//! An array never picks its own memory: it hands the buffer's requirements
//! to a [`MemoryAllocator`] chosen at construction. [`PropertyAllocator`]
//! is the stock strategy, a [`MemoryKind`] preset plus caller extras.

use crate::device::{Device, DeviceBackend, MemoryRequirements};
use crate::error::{ArrayError, ResourceKind, Result};
use crate::memory::flags::{BufferUsage, MemoryProperty};
use crate::sa_emit;

/// One private device allocation, bound at offset 0 to exactly one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock<M> {
    /// Backend memory handle
    pub memory: M,
    /// Allocated size in bytes
    pub size: u64,
    /// Index into the device memory-type table
    pub type_index: u32,
    /// Flags of the granted memory type
    pub flags: MemoryProperty,
}

/// Strategy that provides buffer usage and memory for an array.
pub trait MemoryAllocator {
    /// Usage flags added to the buffer on top of storage usage.
    fn buffer_usage(&self) -> BufferUsage;

    /// Flags asked for on the first allocation attempt.
    fn memory_flags(&self) -> MemoryProperty;

    /// Allocate memory satisfying `requirements`.
    fn allocate<B: DeviceBackend>(
        &self,
        device: &Device<B>,
        requirements: &MemoryRequirements,
    ) -> Result<MemoryBlock<B::Memory>>;

    /// Unmap after every host access instead of keeping a mapping alive.
    fn unmap_after_access(&self) -> bool {
        false
    }
}

/// Memory presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Device-local, usable as a transfer source and target
    Device,
    /// Device-local, shader access only
    DeviceOnly,
    /// Any host-visible memory
    Host,
    /// Host-visible and coherent; upload staging
    HostCoherent,
    /// Host-visible and cached; readback staging
    HostCached,
    /// Device-local and host-visible (integrated GPUs, resizable BAR)
    Unified,
}

impl MemoryKind {
    /// Memory flags this kind asks for.
    pub const fn memory_flags(self) -> MemoryProperty {
        match self {
            MemoryKind::Device | MemoryKind::DeviceOnly => MemoryProperty::DEVICE_LOCAL,
            MemoryKind::Host => MemoryProperty::HOST_VISIBLE,
            MemoryKind::HostCoherent => MemoryProperty::HOST_VISIBLE_COHERENT,
            MemoryKind::HostCached => MemoryProperty::from_bits(
                MemoryProperty::HOST_VISIBLE.bits | MemoryProperty::HOST_CACHED.bits,
            ),
            MemoryKind::Unified => MemoryProperty::from_bits(
                MemoryProperty::DEVICE_LOCAL.bits | MemoryProperty::HOST_VISIBLE.bits,
            ),
        }
    }

    /// Buffer usage this kind adds.
    pub const fn buffer_usage(self) -> BufferUsage {
        match self {
            MemoryKind::DeviceOnly => BufferUsage::empty(),
            MemoryKind::HostCoherent => BufferUsage::TRANSFER_SRC,
            MemoryKind::HostCached => BufferUsage::TRANSFER_DST,
            MemoryKind::Device | MemoryKind::Host | MemoryKind::Unified => BufferUsage::from_bits(
                BufferUsage::TRANSFER_SRC.bits | BufferUsage::TRANSFER_DST.bits,
            ),
        }
    }

    /// Kind to retry with when this one cannot be satisfied.
    pub const fn fallback(self) -> Option<MemoryKind> {
        match self {
            MemoryKind::Device | MemoryKind::DeviceOnly => Some(MemoryKind::Host),
            MemoryKind::Unified => Some(MemoryKind::Device),
            MemoryKind::HostCoherent | MemoryKind::HostCached => Some(MemoryKind::Host),
            MemoryKind::Host => None,
        }
    }
}

/// Preset-based allocator with caller extras and mapping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAllocator {
    kind: MemoryKind,
    extra_memory: MemoryProperty,
    extra_usage: BufferUsage,
    fallback: bool,
    unmap_after_access: bool,
}

impl PropertyAllocator {
    /// Allocator for `kind` with fallback enabled and persistent mappings.
    pub const fn new(kind: MemoryKind) -> Self {
        Self {
            kind,
            extra_memory: MemoryProperty::empty(),
            extra_usage: BufferUsage::empty(),
            fallback: true,
            unmap_after_access: false,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Builder pattern: memory flags required on top of the preset.
    ///
    /// These are kept on every fallback attempt.
    pub fn with_memory_flags(mut self, flags: MemoryProperty) -> Self {
        self.extra_memory |= flags;
        self
    }

    /// Builder pattern: buffer usage on top of the preset.
    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.extra_usage |= usage;
        self
    }

    /// Builder pattern: enable or disable the fallback chain.
    pub fn with_fallback(mut self, enable: bool) -> Self {
        self.fallback = enable;
        self
    }

    /// Builder pattern: unmap after every host access.
    pub fn unmap_after_access(mut self, enable: bool) -> Self {
        self.unmap_after_access = enable;
        self
    }
}

impl From<MemoryKind> for PropertyAllocator {
    fn from(kind: MemoryKind) -> Self {
        Self::new(kind)
    }
}

impl MemoryAllocator for PropertyAllocator {
    fn buffer_usage(&self) -> BufferUsage {
        self.kind.buffer_usage() | self.extra_usage
    }

    fn memory_flags(&self) -> MemoryProperty {
        self.kind.memory_flags() | self.extra_memory
    }

    fn allocate<B: DeviceBackend>(
        &self,
        device: &Device<B>,
        requirements: &MemoryRequirements,
    ) -> Result<MemoryBlock<B::Memory>> {
        let mut kind = self.kind;
        loop {
            let desired = kind.memory_flags() | self.extra_memory;
            let err = match device.select_memory(requirements.memory_type_bits, desired) {
                Some(type_index) => {
                    match device.backend().allocate_memory(requirements.size, type_index) {
                        Ok(memory) => {
                            let flags = device.memory_properties(type_index);
                            log::trace!(
                                "allocated {} bytes from memory type {} ({:?}) for {:?}",
                                requirements.size,
                                type_index,
                                flags,
                                kind
                            );
                            return Ok(MemoryBlock {
                                memory,
                                size: requirements.size,
                                type_index,
                                flags,
                            });
                        }
                        Err(source) => ArrayError::creation(ResourceKind::Memory, source),
                    }
                }
                None => ArrayError::NoSuitableMemoryType {
                    type_bits: requirements.memory_type_bits,
                    requested: desired,
                },
            };

            let recoverable = match &err {
                ArrayError::NoSuitableMemoryType { .. } => true,
                ArrayError::ResourceCreation { source, .. } => source.is_out_of_memory(),
                _ => false,
            };
            match kind.fallback() {
                Some(next) if self.fallback && recoverable => {
                    sa_emit!(SA001, "{:?} -> {:?}: {}", kind, next, err);
                    kind = next;
                }
                _ => return Err(err),
            }
        }
    }

    fn unmap_after_access(&self) -> bool {
        self.unmap_after_access
    }
}

impl MemoryAllocator for MemoryKind {
    fn buffer_usage(&self) -> BufferUsage {
        MemoryKind::buffer_usage(*self)
    }

    fn memory_flags(&self) -> MemoryProperty {
        MemoryKind::memory_flags(*self)
    }

    fn allocate<B: DeviceBackend>(
        &self,
        device: &Device<B>,
        requirements: &MemoryRequirements,
    ) -> Result<MemoryBlock<B::Memory>> {
        PropertyAllocator::new(*self).allocate(device, requirements)
    }
}
