//! Positions inside device arrays.
//!
//! An [`ArrayIter`] is an array reference plus an element index. It never
//! touches memory; it exists so a sub-range of an array can be handed to a
//! dispatch as buffer, byte offset and byte size.

use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::ops::{Add, Sub};

use bytemuck::Pod;

use super::host::HostArray;
use crate::device::DeviceBackend;

/// A typed array living in one device buffer.
pub trait DeviceRange {
    type Backend: DeviceBackend;
    type Elem: Pod;

    fn buffer(&self) -> <Self::Backend as DeviceBackend>::Buffer;

    /// Offset of element 0 in the buffer.
    fn offset_bytes(&self) -> u64 {
        0
    }

    fn size_bytes(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position `index` in `array`.
pub struct ArrayIter<'a, A> {
    array: &'a A,
    index: usize,
}

// Manual implementations to avoid A: Copy/Clone bounds
impl<'a, A> Copy for ArrayIter<'a, A> {}

impl<'a, A> Clone for ArrayIter<'a, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, A: DeviceRange> ArrayIter<'a, A> {
    /// Iterator at `index`; `array.len()` is the end position.
    pub fn new(array: &'a A, index: usize) -> Self {
        Self { array, index }
    }

    pub fn array(&self) -> &'a A {
        self.array
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn buffer(&self) -> <A::Backend as DeviceBackend>::Buffer {
        self.array.buffer()
    }

    /// Byte offset of this position in the buffer.
    pub fn byte_offset(&self) -> u64 {
        self.array.offset_bytes() + (self.index * mem::size_of::<A::Elem>()) as u64
    }

    /// Signed number of elements from `self` to `other`.
    pub fn distance(&self, other: &Self) -> isize {
        other.index as isize - self.index as isize
    }

    /// Move by `n` elements.
    ///
    /// # Panics
    /// If the position would go below 0.
    pub fn advance(&mut self, n: isize) {
        self.index = self
            .index
            .checked_add_signed(n)
            .unwrap_or_else(|| panic!("iterator moved before the start of the array"));
    }

    pub fn is_end(&self) -> bool {
        self.index >= self.array.len()
    }

    /// Bytes from this position up to `end`, for descriptor ranges.
    pub fn bytes_until(&self, end: &Self) -> u64 {
        end.byte_offset().saturating_sub(self.byte_offset())
    }
}

impl<'a, 'd, T: Pod, B: DeviceBackend> ArrayIter<'a, HostArray<'d, T, B>> {
    /// Element at this position, read through the live mapping.
    pub fn get(&self) -> Option<T> {
        self.array.as_slice()?.get(self.index).copied()
    }
}

impl<'a, A: DeviceRange> Add<isize> for ArrayIter<'a, A> {
    type Output = Self;

    fn add(mut self, n: isize) -> Self {
        self.advance(n);
        self
    }
}

impl<'a, A: DeviceRange> Sub<isize> for ArrayIter<'a, A> {
    type Output = Self;

    fn sub(mut self, n: isize) -> Self {
        self.advance(-n);
        self
    }
}

impl<'a, A: DeviceRange> Sub for ArrayIter<'a, A> {
    type Output = isize;

    /// `end - begin` is the number of elements between them.
    fn sub(self, rhs: Self) -> isize {
        rhs.distance(&self)
    }
}

impl<'a, A> PartialEq for ArrayIter<'a, A> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.array, other.array) && self.index == other.index
    }
}

impl<'a, A> Eq for ArrayIter<'a, A> {}

impl<'a, A> PartialOrd for ArrayIter<'a, A> {
    /// Positions in different arrays are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if std::ptr::eq(self.array, other.array) {
            Some(self.index.cmp(&other.index))
        } else {
            None
        }
    }
}

impl<'a, A> fmt::Debug for ArrayIter<'a, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayIter")
            .field("array", &(self.array as *const A))
            .field("index", &self.index)
            .finish()
    }
}
