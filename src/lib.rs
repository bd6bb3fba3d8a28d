//! # stagearray
//!
//! Typed arrays over GPU buffers, for compute workloads.
//!
//! ## Features
//!
//! - Memory-type selection from property flags, with fallback presets
//! - Host-visible arrays kept mapped for their whole life
//! - Device-local arrays with direct or staged host exchange
//! - One buffer and one private allocation per array, released on drop
//! - Compute and transfer command resources per device
//! - Coded runtime diagnostics with optional strict mode
//! - RAM-backed dummy backend for tests; Vulkan backend behind `vulkan`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stagearray::{Device, DeviceArray, DummyBackend, HostArray};
//!
//! # fn main() -> stagearray::Result<()> {
//! let device = Device::new(DummyBackend::new())?;
//!
//! // Upload, let shaders work on `input.buffer()`, read back
//! let mut input = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0])?;
//! let result = input.to_vec()?;
//!
//! // Host-visible memory, no staging
//! let mut params = HostArray::from_value(&device, 4, 0u32)?;
//! params.view()?[0] = 7;
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory kinds
//!
//! | Kind           | Memory flags                  | Falls back to |
//! |----------------|-------------------------------|---------------|
//! | `Device`       | device-local                  | `Host`        |
//! | `DeviceOnly`   | device-local                  | `Host`        |
//! | `Host`         | host-visible                  | -             |
//! | `HostCoherent` | host-visible, coherent        | `Host`        |
//! | `HostCached`   | host-visible, cached          | `Host`        |
//! | `Unified`      | device-local, host-visible    | `Device`      |

pub mod array;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod memory;

mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use array::{ArrayIter, BasicArray, DeviceArray, DeviceOnlyArray, DeviceRange, HostArray, HostView, Mapping};
pub use config::DeviceConfig;
pub use device::dummy::{DummyBackend, DummyBackendBuilder, DummyOp, DummyStats};
pub use device::{select_queue_family, CopyRegion, Device, DeviceBackend, MemoryRequirements, QueueFamily, WHOLE_SIZE};
pub use error::{ArrayError, BackendError, ResourceKind, Result};
pub use memory::{
    select_memory_type, BufferUsage, MemoryAllocator, MemoryBlock, MemoryKind, MemoryProperty, PropertyAllocator,
    QueueFlags,
};

#[cfg(feature = "vulkan")]
pub use device::vulkan::VulkanBackend;

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{StrictMode, set_strict_mode, StrictModeGuard};
pub use diagnostics::{SA001, SA101, SA102, SA201, SA401, SA901};
