//! Memory property, buffer usage and queue capability flags.
//!
//! Bit values match their Vulkan counterparts so a backend can pass them
//! straight through (`from_raw`).

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $flag:ident = $bits:expr,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name {
            pub bits: u32,
        }

        impl $name {
            $($(#[$cmeta])* pub const $flag: Self = Self { bits: $bits };)*

            /// The empty set.
            pub const fn empty() -> Self {
                Self { bits: 0 }
            }

            /// Build from raw bits.
            pub const fn from_bits(bits: u32) -> Self {
                Self { bits }
            }

            /// `true` if no flag is set.
            pub const fn is_empty(self) -> bool {
                self.bits == 0
            }

            /// `true` if every flag of `other` is also set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.bits & other.bits == other.bits
            }

            /// `true` if `self` and `other` share at least one flag.
            pub const fn intersects(self, other: Self) -> bool {
                self.bits & other.bits != 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self { bits: self.bits | rhs.bits }
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.bits |= rhs.bits;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self { bits: self.bits & rhs.bits }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                $(
                    if self.contains(Self::$flag) && Self::$flag.bits != 0 {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, "{}", stringify!($flag))?;
                        first = false;
                    }
                )*
                if first {
                    write!(f, "empty")?;
                }
                write!(f, ")")
            }
        }
    };
}

flag_set! {
    /// Properties of a device memory type.
    MemoryProperty {
        /// Fastest for device access.
        DEVICE_LOCAL = 0x0001,
        /// Can be mapped into host address space.
        HOST_VISIBLE = 0x0002,
        /// No explicit flush/invalidate needed.
        HOST_COHERENT = 0x0004,
        /// Cached on the host; fast host reads.
        HOST_CACHED = 0x0008,
        /// Backed lazily by the implementation.
        LAZILY_ALLOCATED = 0x0010,
    }
}

flag_set! {
    /// Buffer usage flags.
    BufferUsage {
        TRANSFER_SRC = 0x0001,
        TRANSFER_DST = 0x0002,
        UNIFORM_TEXEL_BUFFER = 0x0004,
        STORAGE_TEXEL_BUFFER = 0x0008,
        UNIFORM_BUFFER = 0x0010,
        STORAGE_BUFFER = 0x0020,
        INDEX_BUFFER = 0x0040,
        VERTEX_BUFFER = 0x0080,
        INDIRECT_BUFFER = 0x0100,
    }
}

flag_set! {
    /// Operations supported by a queue family.
    QueueFlags {
        GRAPHICS = 0x0001,
        COMPUTE = 0x0002,
        TRANSFER = 0x0004,
        SPARSE_BINDING = 0x0008,
    }
}

impl MemoryProperty {
    /// Host-visible memory that needs no flush/invalidate.
    pub const HOST_VISIBLE_COHERENT: Self =
        Self { bits: Self::HOST_VISIBLE.bits | Self::HOST_COHERENT.bits };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_superset() {
        let granted = MemoryProperty::DEVICE_LOCAL | MemoryProperty::HOST_VISIBLE;
        assert!(granted.contains(MemoryProperty::HOST_VISIBLE));
        assert!(granted.contains(MemoryProperty::empty()));
        assert!(!granted.contains(MemoryProperty::HOST_VISIBLE_COHERENT));
    }

    #[test]
    fn test_debug_lists_flags() {
        let usage = BufferUsage::STORAGE_BUFFER | BufferUsage::TRANSFER_DST;
        assert_eq!(format!("{:?}", usage), "BufferUsage(TRANSFER_DST | STORAGE_BUFFER)");
        assert_eq!(format!("{:?}", QueueFlags::empty()), "QueueFlags(empty)");
    }
}
