//! Typed arrays over device buffers.
//!
//! - [`BasicArray`]: untyped buffer plus the private memory bound to it
//! - [`HostArray`]: host-visible array, mapped for its whole life
//! - [`DeviceArray`]: device-local array with direct or staged host exchange
//! - [`DeviceOnlyArray`]: device-local array never touched by the host
//! - [`ArrayIter`]: element position for handing sub-ranges to dispatches

pub mod basic;
pub mod host;
pub mod device_array;
pub mod iter;

pub use basic::{BasicArray, Mapping};
pub use host::{HostArray, HostView};
pub use device_array::{DeviceArray, DeviceOnlyArray};
pub use iter::{ArrayIter, DeviceRange};
