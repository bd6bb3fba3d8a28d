//! Memory types, flags and allocation strategies.

pub mod flags;
pub mod selector;
pub mod allocator;

pub use flags::{BufferUsage, MemoryProperty, QueueFlags};
pub use selector::select_memory_type;
pub use allocator::{MemoryAllocator, MemoryBlock, MemoryKind, PropertyAllocator};
