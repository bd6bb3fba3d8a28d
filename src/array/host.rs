//! Host-visible typed arrays.

use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use bytemuck::Pod;

use super::basic::BasicArray;
use super::iter::{ArrayIter, DeviceRange};
use crate::device::{Device, DeviceBackend};
use crate::error::{ArrayError, Result};
use crate::memory::allocator::{MemoryAllocator, MemoryKind};
use crate::sa_emit;

/// Byte size of `len` elements of `T`, rejecting zero and overflow.
pub(crate) fn byte_len<T>(len: usize) -> Result<usize> {
    match len.checked_mul(mem::size_of::<T>()) {
        Some(0) | None => Err(ArrayError::InvalidSize),
        Some(bytes) => Ok(bytes),
    }
}

/// Array of `T` in host-visible memory, kept mapped while it lives.
///
/// Host and device see the same bytes. Reads and writes go through
/// [`view`](Self::view), which invalidates on the way in and flushes on
/// the way out, so non-coherent memory behaves like coherent memory.
pub struct HostArray<'d, T: Pod, B: DeviceBackend> {
    inner: BasicArray<'d, B>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'d, T: Pod, B: DeviceBackend> HostArray<'d, T, B> {
    /// Array of `len` elements in [`MemoryKind::Host`] memory.
    ///
    /// Contents are whatever the device hands out; real devices do not
    /// clear new allocations.
    pub fn new(device: &'d Device<B>, len: usize) -> Result<Self> {
        Self::new_in(device, len, &MemoryKind::Host)
    }

    /// Array of `len` elements with memory from `alloc`.
    ///
    /// Fails with [`ArrayError::NotHostVisible`] if `alloc` grants memory
    /// the host cannot map.
    pub fn new_in<A: MemoryAllocator>(device: &'d Device<B>, len: usize, alloc: &A) -> Result<Self> {
        let mut inner = BasicArray::new(device, byte_len::<T>(len)?, alloc)?;
        if !inner.is_host_visible() {
            return Err(ArrayError::NotHostVisible);
        }
        inner.host_ptr()?;
        Ok(Self {
            inner,
            len,
            _marker: PhantomData,
        })
    }

    /// `len` copies of `value`.
    pub fn from_value(device: &'d Device<B>, len: usize, value: T) -> Result<Self> {
        Self::from_value_in(device, len, value, &MemoryKind::Host)
    }

    pub fn from_value_in<A: MemoryAllocator>(
        device: &'d Device<B>,
        len: usize,
        value: T,
        alloc: &A,
    ) -> Result<Self> {
        Self::from_fn_in(device, len, |data| data.fill(value), alloc)
    }

    /// Copy of `data`.
    pub fn from_slice(device: &'d Device<B>, data: &[T]) -> Result<Self> {
        Self::from_slice_in(device, data, &MemoryKind::Host)
    }

    pub fn from_slice_in<A: MemoryAllocator>(device: &'d Device<B>, data: &[T], alloc: &A) -> Result<Self> {
        Self::from_fn_in(device, data.len(), |dst| dst.copy_from_slice(data), alloc)
    }

    /// `f` applied to every element of `data`.
    pub fn from_slice_map<U, F>(device: &'d Device<B>, data: &[U], f: F) -> Result<Self>
    where
        F: FnMut(&U) -> T,
    {
        Self::from_slice_map_in(device, data, f, &MemoryKind::Host)
    }

    pub fn from_slice_map_in<U, F, A>(device: &'d Device<B>, data: &[U], mut f: F, alloc: &A) -> Result<Self>
    where
        F: FnMut(&U) -> T,
        A: MemoryAllocator,
    {
        Self::from_fn_in(
            device,
            data.len(),
            |dst| {
                for (d, s) in dst.iter_mut().zip(data) {
                    *d = f(s);
                }
            },
            alloc,
        )
    }

    /// Array of `len` elements handed to `init` once to fill.
    ///
    /// `init` sees uninitialized device contents and should write every element.
    pub fn from_fn<F>(device: &'d Device<B>, len: usize, init: F) -> Result<Self>
    where
        F: FnOnce(&mut [T]),
    {
        Self::from_fn_in(device, len, init, &MemoryKind::Host)
    }

    pub fn from_fn_in<F, A>(device: &'d Device<B>, len: usize, init: F, alloc: &A) -> Result<Self>
    where
        F: FnOnce(&mut [T]),
        A: MemoryAllocator,
    {
        let mut array = Self::new_in(device, len, alloc)?;
        let mut view = array.view()?;
        init(&mut view);
        view.commit()?;
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

    /// Read-write access to the elements.
    ///
    /// Device writes are made visible first; host writes are flushed when
    /// the view is committed or dropped.
    pub fn view(&mut self) -> Result<HostView<'_, 'd, T, B>> {
        let ptr = self.inner.host_ptr()?;
        self.inner.invalidate_for_read()?;
        Ok(HostView {
            ptr: ptr.cast::<T>(),
            len: self.len,
            written: false,
            done: false,
            array: self,
        })
    }

    /// Elements as currently mapped, without invalidating.
    ///
    /// `None` while unmapped. On non-coherent memory device writes may not
    /// show up here; use [`view`](Self::view) to read them.
    pub fn as_slice(&self) -> Option<&[T]> {
        let ptr = self.inner.mapped_ptr()?.cast::<T>();
        // SAFETY: the live mapping covers len elements and &self keeps
        // every mutable view out.
        Some(unsafe { slice::from_raw_parts(ptr.as_ptr(), self.len) })
    }

    /// Copy of the elements, after making device writes visible.
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        Ok(self.view()?.to_vec())
    }

    /// Iterator positioned at the first element.
    pub fn device_begin(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self, 0)
    }

    /// Iterator positioned one past the last element.
    pub fn device_end(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self, self.len)
    }
}

impl<'d, T: Pod, B: DeviceBackend> DeviceRange for HostArray<'d, T, B> {
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

/// Mutable view of a [`HostArray`].
pub struct HostView<'a, 'd, T: Pod, B: DeviceBackend> {
    array: &'a mut HostArray<'d, T, B>,
    ptr: NonNull<T>,
    len: usize,
    written: bool,
    done: bool,
}

impl<'a, 'd, T: Pod, B: DeviceBackend> HostView<'a, 'd, T, B> {
    /// Flush pending writes and end the access, reporting flush errors.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        let result = if self.written {
            self.array.inner.flush_writes()
        } else {
            Ok(())
        };
        self.array.inner.finish_access();
        result
    }
}

impl<'a, 'd, T: Pod, B: DeviceBackend> Deref for HostView<'a, 'd, T, B> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the mapping covers len elements and stays alive while the
        // view holds the array mutably.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<'a, 'd, T: Pod, B: DeviceBackend> DerefMut for HostView<'a, 'd, T, B> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.written = true;
        // SAFETY: as in deref
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<'a, 'd, T: Pod, B: DeviceBackend> Drop for HostView<'a, 'd, T, B> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.finish() {
            sa_emit!(SA102, "{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy::DummyBackend;
    use crate::memory::allocator::PropertyAllocator;
    use crate::memory::flags::MemoryProperty;

    #[test]
    fn test_from_value() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let mut array = HostArray::from_value(&device, 5, 3.5f32).unwrap();
        assert_eq!(array.len(), 5);
        assert_eq!(array.size_bytes(), 20);
        assert_eq!(array.to_vec().unwrap(), vec![3.5; 5]);
    }

    #[test]
    fn test_from_slice_map_and_fn() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let mut doubled = HostArray::from_slice_map(&device, &[1u16, 2, 3], |x| u32::from(*x) * 2).unwrap();
        assert_eq!(doubled.to_vec().unwrap(), vec![2, 4, 6]);

        let mut calls = 0;
        let mut filled = HostArray::<u32, _>::from_fn(&device, 4, |data| {
            calls += 1;
            for (i, x) in data.iter_mut().enumerate() {
                *x = i as u32 * 10;
            }
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(filled.to_vec().unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_zero_length_rejected() {
        let device = Device::new(DummyBackend::new()).unwrap();
        assert_eq!(HostArray::<u32, _>::new(&device, 0).err(), Some(ArrayError::InvalidSize));
    }

    #[test]
    fn test_device_local_memory_rejected() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let err = HostArray::<u32, _>::new_in(&device, 4, &MemoryKind::Device).err();
        assert_eq!(err, Some(ArrayError::NotHostVisible));
        assert_eq!(device.backend().stats().live_buffers(), 0);
    }

    #[test]
    fn test_writes_reach_device_on_non_coherent_memory() {
        let device = Device::new(DummyBackend::non_coherent()).unwrap();
        let mut array = HostArray::<u32, _>::new(&device, 4).unwrap();
        assert!(!array.basic().is_host_coherent());
        {
            let mut view = array.view().unwrap();
            view[2] = 42;
        }
        let bytes = device.backend().device_bytes(array.buffer()).unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&[0, 0, 42, 0]));
    }

    #[test]
    fn test_unmap_after_access_policy() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let alloc = PropertyAllocator::new(MemoryKind::Host).unmap_after_access(true);
        let mut array = HostArray::from_slice_in(&device, &[1u8, 2, 3], &alloc).unwrap();
        assert!(!array.basic().is_mapped());
        assert!(array.as_slice().is_none());

        assert_eq!(array.to_vec().unwrap(), vec![1, 2, 3]);
        assert!(!array.basic().is_mapped());
        let stats = device.backend().stats();
        assert_eq!(stats.maps, stats.unmaps);
    }

    #[test]
    fn test_as_slice_on_persistent_mapping() {
        let device = Device::new(DummyBackend::new()).unwrap();
        let array = HostArray::from_slice(&device, &[7i32, 8]).unwrap();
        assert_eq!(array.as_slice(), Some(&[7, 8][..]));
        assert!(array.basic().memory_flags().contains(MemoryProperty::HOST_VISIBLE));
    }
}
