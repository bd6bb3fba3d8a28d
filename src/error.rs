//! Error types.

use std::fmt;
use std::time::Duration;

use crate::memory::flags::{MemoryProperty, QueueFlags};

/// Errors reported by a [`DeviceBackend`](crate::device::DeviceBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Host memory exhausted
    OutOfHostMemory,
    /// Device memory exhausted
    OutOfDeviceMemory,
    /// Mapping the allocation into host address space failed
    MemoryMapFailed,
    /// The device was lost
    DeviceLost,
    /// A bounded wait expired
    Timeout,
    /// A handle was stale or unknown to the backend
    InvalidHandle,
    /// The call violates the backend's usage rules
    InvalidUsage(String),
    /// Backend-specific error (opaque)
    Other(String),
}

impl BackendError {
    /// Memory exhaustion, host or device side.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, BackendError::OutOfHostMemory | BackendError::OutOfDeviceMemory)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::OutOfHostMemory => write!(f, "out of host memory"),
            BackendError::OutOfDeviceMemory => write!(f, "out of device memory"),
            BackendError::MemoryMapFailed => write!(f, "memory map failed"),
            BackendError::DeviceLost => write!(f, "device lost"),
            BackendError::Timeout => write!(f, "wait timed out"),
            BackendError::InvalidHandle => write!(f, "invalid or stale handle"),
            BackendError::InvalidUsage(msg) => write!(f, "invalid usage: {}", msg),
            BackendError::Other(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Device object whose creation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Memory,
    MemoryBinding,
    CommandPool,
    CommandBuffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Buffer => "buffer",
            ResourceKind::Memory => "device memory",
            ResourceKind::MemoryBinding => "memory binding",
            ResourceKind::CommandPool => "command pool",
            ResourceKind::CommandBuffer => "command buffer",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by devices and arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayError {
    /// The device rejected creation of a buffer, allocation or command object.
    ResourceCreation {
        resource: ResourceKind,
        source: BackendError,
    },
    /// No memory type is eligible for the buffer with the requested flags.
    NoSuitableMemoryType {
        type_bits: u32,
        requested: MemoryProperty,
    },
    /// Queue submission or wait failed.
    Transfer(BackendError),
    /// A transfer did not complete within the configured wait.
    TransferTimeout { timeout: Duration },
    /// The device was lost.
    DeviceLost,
    /// No queue family supports the required operations.
    QueueFamilyNotFound(QueueFlags),
    /// Host access requested on memory that is not host-visible.
    NotHostVisible,
    /// The operation needs a live host mapping.
    NotMapped,
    /// Zero-sized arrays cannot be created.
    InvalidSize,
    /// Host range length does not match what the operation needs.
    LengthMismatch { expected: usize, actual: usize },
    /// Element range outside the array.
    OutOfRange { begin: usize, end: usize, len: usize },
}

impl ArrayError {
    /// Errors after which the device must be rebuilt.
    ///
    /// Memory exhaustion and misuse are recoverable; a broken queue or lost
    /// device is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            ArrayError::Transfer(_)
            | ArrayError::TransferTimeout { .. }
            | ArrayError::DeviceLost
            | ArrayError::QueueFamilyNotFound(_) => true,
            ArrayError::ResourceCreation { source, .. } => *source == BackendError::DeviceLost,
            _ => false,
        }
    }

    pub(crate) fn creation(resource: ResourceKind, source: BackendError) -> Self {
        if source == BackendError::DeviceLost {
            return ArrayError::DeviceLost;
        }
        ArrayError::ResourceCreation { resource, source }
    }

    pub(crate) fn transfer(source: BackendError, timeout: Option<Duration>) -> Self {
        match source {
            BackendError::DeviceLost => ArrayError::DeviceLost,
            BackendError::Timeout => ArrayError::TransferTimeout {
                timeout: timeout.unwrap_or_default(),
            },
            other => ArrayError::Transfer(other),
        }
    }
}

impl fmt::Display for ArrayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayError::ResourceCreation { resource, source } => {
                write!(f, "failed to create {}: {}", resource, source)
            }
            ArrayError::NoSuitableMemoryType { type_bits, requested } => write!(
                f,
                "no memory type in mask {:#b} provides {:?}",
                type_bits, requested
            ),
            ArrayError::Transfer(err) => write!(f, "transfer failed: {}", err),
            ArrayError::TransferTimeout { timeout } => {
                write!(f, "transfer did not complete within {:?}", timeout)
            }
            ArrayError::DeviceLost => write!(f, "device lost"),
            ArrayError::QueueFamilyNotFound(flags) => {
                write!(f, "no queue family supports {:?}", flags)
            }
            ArrayError::NotHostVisible => write!(f, "memory is not host-visible"),
            ArrayError::NotMapped => write!(f, "memory is not mapped"),
            ArrayError::InvalidSize => write!(f, "array size must be non-zero"),
            ArrayError::LengthMismatch { expected, actual } => {
                write!(f, "expected {} elements, got {}", expected, actual)
            }
            ArrayError::OutOfRange { begin, end, len } => {
                write!(f, "range {}..{} out of bounds for length {}", begin, end, len)
            }
        }
    }
}

impl std::error::Error for ArrayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArrayError::ResourceCreation { source, .. } => Some(source),
            ArrayError::Transfer(source) => Some(source),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArrayError>;
