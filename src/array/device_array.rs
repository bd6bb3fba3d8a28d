//! Device-local typed arrays.
//!
//! A [`DeviceArray`] prefers device-local memory. When that memory happens
//! to be host-visible (integrated GPUs, resizable BAR, or after falling back
//! to host memory) host exchange goes straight through a mapping. Otherwise
//! every exchange stages through a temporary [`HostArray`] and one
//! synchronous copy on the transfer queue.

use std::cmp;
use std::marker::PhantomData;
use std::mem;
use std::slice;

use bytemuck::Pod;

use super::basic::BasicArray;
use super::host::{byte_len, HostArray};
use super::iter::{ArrayIter, DeviceRange};
use crate::device::{CopyRegion, Device, DeviceBackend};
use crate::error::{ArrayError, Result};
use crate::memory::allocator::{MemoryAllocator, MemoryKind, PropertyAllocator};
use crate::memory::flags::BufferUsage;
use crate::sa_emit;

/// Staging for uploads; also a copy target for read-modify-write.
const UPLOAD_STAGING: PropertyAllocator = PropertyAllocator::new(MemoryKind::HostCoherent);

/// Array of `T` in device-local memory.
pub struct DeviceArray<'d, T: Pod, B: DeviceBackend> {
    inner: BasicArray<'d, B>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'d, T: Pod, B: DeviceBackend> DeviceArray<'d, T, B> {
    /// Uninitialized array of `len` elements in [`MemoryKind::Device`] memory.
    pub fn new(device: &'d Device<B>, len: usize) -> Result<Self> {
        Self::new_in(device, len, &MemoryKind::Device)
    }

    pub fn new_in<A: MemoryAllocator>(device: &'d Device<B>, len: usize, alloc: &A) -> Result<Self> {
        let inner = BasicArray::new(device, byte_len::<T>(len)?, alloc)?;
        Ok(Self {
            inner,
            len,
            _marker: PhantomData,
        })
    }

    /// Array holding a copy of `data`.
    pub fn from_slice(device: &'d Device<B>, data: &[T]) -> Result<Self> {
        Self::from_slice_in(device, data, &MemoryKind::Device)
    }

    pub fn from_slice_in<A: MemoryAllocator>(device: &'d Device<B>, data: &[T], alloc: &A) -> Result<Self> {
        let mut array = Self::new_in(device, data.len(), alloc)?;
        array.from_host(data)?;
        Ok(array)
    }

    /// Array whose element `i` is `f(i)`.
    pub fn from_fn<F>(device: &'d Device<B>, len: usize, f: F) -> Result<Self>
    where
        F: FnMut(usize) -> T,
    {
        Self::from_fn_in(device, len, f, &MemoryKind::Device)
    }

    pub fn from_fn_in<F, A>(device: &'d Device<B>, len: usize, mut f: F, alloc: &A) -> Result<Self>
    where
        F: FnMut(usize) -> T,
        A: MemoryAllocator,
    {
        let mut array = Self::new_in(device, len, alloc)?;
        array.write_region(0, len, false, |dst| {
            for (i, x) in dst.iter_mut().enumerate() {
                *x = f(i);
            }
        })?;
        Ok(array)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    pub fn buffer(&self) -> B::Buffer {
        self.inner.buffer()
    }

    /// The underlying untyped array.
    pub fn basic(&self) -> &BasicArray<'d, B> {
        &self.inner
    }

    /// Whether host exchange skips staging.
    pub fn is_host_visible(&self) -> bool {
        self.inner.is_host_visible()
    }

    /// Overwrite the whole array with `data`.
    pub fn from_host(&mut self, data: &[T]) -> Result<()> {
        self.check_len(data.len())?;
        self.write_region(0, self.len, false, |dst| dst.copy_from_slice(data))
    }

    /// Overwrite the whole array with `f` applied to each element of `data`.
    pub fn from_host_map<U, F>(&mut self, data: &[U], mut f: F) -> Result<()>
    where
        F: FnMut(&U) -> T,
    {
        self.check_len(data.len())?;
        self.write_region(0, self.len, false, |dst| {
            for (d, s) in dst.iter_mut().zip(data) {
                *d = f(s);
            }
        })
    }

    /// Let `f` edit elements `[offset, offset + count)` in place.
    ///
    /// `count == 0` means up to the end; the region is clamped to the
    /// array. `f` runs once and sees the current contents, staged or not.
    pub fn from_host_with<F>(&mut self, offset: usize, count: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut [T]),
    {
        if !self.offset_in_range(offset) {
            return Ok(());
        }
        let remaining = self.len - offset;
        let count = if count == 0 { remaining } else { cmp::min(count, remaining) };
        self.write_region(offset, count, true, f)
    }

    /// Copy `data` into the array starting at element `offset`.
    ///
    /// Copies `min(data.len(), len - offset)` elements.
    pub fn from_host_at(&mut self, data: &[T], offset: usize) -> Result<()> {
        if !self.offset_in_range(offset) {
            return Ok(());
        }
        let count = cmp::min(data.len(), self.len - offset);
        if count == 0 {
            return Ok(());
        }
        self.write_region(offset, count, false, |dst| dst.copy_from_slice(&data[..count]))
    }

    /// Copy the whole array into the front of `dst`.
    pub fn to_host(&mut self, dst: &mut [T]) -> Result<()> {
        if dst.len() < self.len {
            return Err(ArrayError::LengthMismatch {
                expected: self.len,
                actual: dst.len(),
            });
        }
        let len = self.len;
        self.read_region(0, len, |src| dst[..len].copy_from_slice(src))
    }

    /// Map every element through `f` into the front of `dst`.
    pub fn to_host_map<U, F>(&mut self, dst: &mut [U], f: F) -> Result<()>
    where
        F: FnMut(&T) -> U,
    {
        self.to_host_map_n(dst, self.len, f)
    }

    /// Map the first `count` elements through `f` into `dst`.
    pub fn to_host_map_n<U, F>(&mut self, dst: &mut [U], count: usize, mut f: F) -> Result<()>
    where
        F: FnMut(&T) -> U,
    {
        if count > self.len {
            return Err(ArrayError::OutOfRange {
                begin: 0,
                end: count,
                len: self.len,
            });
        }
        if dst.len() < count {
            return Err(ArrayError::LengthMismatch {
                expected: count,
                actual: dst.len(),
            });
        }
        if count == 0 {
            return Ok(());
        }
        self.read_region(0, count, |src| {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = f(s);
            }
        })
    }

    /// Hand elements `[offset, len)` to `f`.
    ///
    /// `None` if `offset` is past the end and `f` never ran.
    pub fn to_host_with<R, F>(&mut self, offset: usize, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&[T]) -> R,
    {
        if !self.offset_in_range(offset) {
            return Ok(None);
        }
        let count = self.len - offset;
        self.read_region(offset, count, f).map(Some)
    }

    /// Copy elements `[begin, end)` into the front of `dst`.
    pub fn range_to_host(&mut self, begin: usize, end: usize, dst: &mut [T]) -> Result<()> {
        if begin > end || end > self.len {
            return Err(ArrayError::OutOfRange {
                begin,
                end,
                len: self.len,
            });
        }
        let count = end - begin;
        if dst.len() < count {
            return Err(ArrayError::LengthMismatch {
                expected: count,
                actual: dst.len(),
            });
        }
        if count == 0 {
            return Ok(());
        }
        self.read_region(begin, count, |src| dst[..count].copy_from_slice(src))
    }

    /// Copy of the whole array.
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        let len = self.len;
        self.read_region(0, len, <[T]>::to_vec)
    }

    /// Iterator positioned at the first element.
    pub fn device_begin(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self, 0)
    }

    /// Iterator positioned one past the last element.
    pub fn device_end(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self, self.len)
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.len {
            return Err(ArrayError::LengthMismatch {
                expected: self.len,
                actual,
            });
        }
        Ok(())
    }

    fn offset_in_range(&self, offset: usize) -> bool {
        if offset < self.len {
            return true;
        }
        sa_emit!(SA101, "offset {} >= len {}", offset, self.len);
        false
    }

    fn region(offset: usize, count: usize) -> (u64, u64) {
        let size = mem::size_of::<T>();
        ((offset * size) as u64, (count * size) as u64)
    }

    /// Run `f` over elements `[offset, offset + count)` as writable host memory.
    ///
    /// With `preserve`, `f` sees the current contents; otherwise the region
    /// is fully overwritten and old contents are not fetched.
    fn write_region<F>(&mut self, offset: usize, count: usize, preserve: bool, f: F) -> Result<()>
    where
        F: FnOnce(&mut [T]),
    {
        debug_assert!(count > 0 && offset + count <= self.len);

        if self.inner.is_host_visible() {
            let ptr = self.inner.host_ptr()?;
            // A partial write still flushes the whole range, so the rest of
            // the host copy must be current first.
            if preserve || count != self.len {
                self.inner.invalidate_for_read()?;
            }
            // SAFETY: the mapping covers len elements and the region is
            // inside it; &mut self rules out any other view.
            let data = unsafe { slice::from_raw_parts_mut(ptr.cast::<T>().as_ptr().add(offset), count) };
            f(data);
            let flushed = self.inner.flush_writes();
            self.inner.finish_access();
            return flushed;
        }

        let device = self.inner.device();
        let (byte_offset, byte_size) = Self::region(offset, count);
        let staging = UPLOAD_STAGING.with_usage(BufferUsage::TRANSFER_DST);
        let mut stage = HostArray::<T, B>::new_in(device, count, &staging)?;

        if preserve {
            device.copy_buffer(
                self.inner.buffer(),
                stage.buffer(),
                CopyRegion {
                    src_offset: byte_offset,
                    dst_offset: 0,
                    size: byte_size,
                },
            )?;
        }
        let mut view = stage.view()?;
        f(&mut view);
        view.commit()?;

        device.copy_buffer(
            stage.buffer(),
            self.inner.buffer(),
            CopyRegion {
                src_offset: 0,
                dst_offset: byte_offset,
                size: byte_size,
            },
        )
    }

    /// Run `f` over elements `[offset, offset + count)` as readable host memory.
    fn read_region<R, F>(&mut self, offset: usize, count: usize, f: F) -> Result<R>
    where
        F: FnOnce(&[T]) -> R,
    {
        debug_assert!(count > 0 && offset + count <= self.len);

        if self.inner.is_host_visible() {
            let ptr = self.inner.host_ptr()?;
            self.inner.invalidate_for_read()?;
            // SAFETY: as in write_region
            let data = unsafe { slice::from_raw_parts(ptr.cast::<T>().as_ptr().add(offset), count) };
            let result = f(data);
            self.inner.finish_access();
            return Ok(result);
        }

        let device = self.inner.device();
        let (byte_offset, byte_size) = Self::region(offset, count);
        let mut stage = HostArray::<T, B>::new_in(device, count, &MemoryKind::HostCached)?;
        device.copy_buffer(
            self.inner.buffer(),
            stage.buffer(),
            CopyRegion {
                src_offset: byte_offset,
                dst_offset: 0,
                size: byte_size,
            },
        )?;
        let view = stage.view()?;
        Ok(f(&view))
    }
}

impl<'d, T: Pod, B: DeviceBackend> DeviceRange for DeviceArray<'d, T, B> {
    type Backend = B;
    type Elem = T;

    fn buffer(&self) -> B::Buffer {
        self.inner.buffer()
    }

    fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Array of `T` for shader-only use; never exchanged with the host.
pub struct DeviceOnlyArray<'d, T: Pod, B: DeviceBackend> {
    inner: BasicArray<'d, B>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'d, T: Pod, B: DeviceBackend> DeviceOnlyArray<'d, T, B> {
    /// Array of `len` elements in [`MemoryKind::DeviceOnly`] memory.
    pub fn new(device: &'d Device<B>, len: usize) -> Result<Self> {
        Self::new_in(device, len, &MemoryKind::DeviceOnly)
    }

    pub fn new_in<A: MemoryAllocator>(device: &'d Device<B>, len: usize, alloc: &A) -> Result<Self> {
        let inner = BasicArray::new(device, byte_len::<T>(len)?, alloc)?;
        Ok(Self {
            inner,
            len,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    pub fn buffer(&self) -> B::Buffer {
        self.inner.buffer()
    }

    pub fn basic(&self) -> &BasicArray<'d, B> {
        &self.inner
    }

    pub fn device_begin(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self, 0)
    }

    pub fn device_end(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self, self.len)
    }
}

impl<'d, T: Pod, B: DeviceBackend> DeviceRange for DeviceOnlyArray<'d, T, B> {
    type Backend = B;
    type Elem = T;

    fn buffer(&self) -> B::Buffer {
        self.inner.buffer()
    }

    fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    fn len(&self) -> usize {
        self.len
    }
}
