//! Dummy device backend for testing.
//!
//! Emulates a GPU in host RAM, so it needs no hardware. Every allocation has
//! device-side storage. Non-coherent memory types also get a separate host
//! shadow that only meets the device copy on flush and invalidate, so a
//! missing flush or invalidate shows up as stale data. Recorded copies run
//! against device storage at submit time.
//!
//! Handles carry a generation: a destroyed handle never aliases a new
//! object, and using one is reported as `SA401`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{CopyRegion, DeviceBackend, MemoryRequirements, QueueFamily, WHOLE_SIZE};
use crate::error::BackendError;
use crate::memory::flags::{BufferUsage, MemoryProperty, QueueFlags};
use crate::sa_emit;
use crate::sync::mutex::Mutex;

/// Alignment of every dummy allocation and mapping.
pub const MAP_ALIGNMENT: usize = 64;

/// Generation counter for handle validation.
type Generation = u32;

/// A generation-checked handle into one of the dummy's object tables.
pub struct Handle<T> {
    index: u32,
    generation: Generation,
    _marker: PhantomData<fn() -> T>,
}

// Manual implementations to avoid T: Copy/Clone bounds
impl<T> Copy for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}v{})", kind_name::<T>(), self.index, self.generation)
    }
}

impl<T> Handle<T> {
    /// Get the raw index (for debugging).
    pub fn raw_index(&self) -> u32 {
        self.index
    }

    /// Get the generation (for debugging).
    pub fn raw_generation(&self) -> u32 {
        self.generation
    }
}

fn kind_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Marker for buffer handles.
pub enum Buffer {}
/// Marker for memory handles.
pub enum Memory {}
/// Marker for command pool handles.
pub enum CommandPool {}
/// Marker for command buffer handles.
pub enum CommandBuffer {}

struct Slot<V> {
    generation: Generation,
    value: Option<V>,
}

/// Slot table with generation-checked lookups.
struct Slots<T, V> {
    slots: Vec<Slot<V>>,
    free_list: Vec<u32>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, V> Slots<T, V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn insert(&mut self, value: V) -> Handle<T> {
        let index = match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot { generation: 0, value: Some(value) });
                (self.slots.len() - 1) as u32
            }
        };
        Handle {
            index,
            generation: self.slots[index as usize].generation,
            _marker: PhantomData,
        }
    }

    fn get(&self, handle: Handle<T>) -> Option<&V> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut V> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    fn remove(&mut self, handle: Handle<T>) -> Option<V> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free_list.push(handle.index);
        Some(value)
    }

    fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) -> usize {
        let mut removed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.as_ref().map_or(false, |value| !keep(value)) {
                slot.value = None;
                self.free_list.push(index as u32);
                removed += 1;
            }
        }
        removed
    }
}

/// Zeroed, 64-byte aligned heap block.
struct AlignedBytes {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The block is plain bytes owned by this struct.
unsafe impl Send for AlignedBytes {}

impl AlignedBytes {
    fn zeroed(len: usize) -> Option<Self> {
        let layout = Layout::from_size_align(len.max(1), MAP_ALIGNMENT).ok()?;
        // SAFETY: layout has non-zero size
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout })
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn to_vec(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        // SAFETY: callers keep offset + len within the block
        unsafe { std::ptr::copy(self.as_ptr().add(offset), out.as_mut_ptr(), len) };
        out
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Copy `len` bytes between blocks; ranges may overlap.
///
/// # Safety
/// Both ranges must lie inside their blocks.
unsafe fn copy_bytes(src: &AlignedBytes, src_offset: usize, dst: &AlignedBytes, dst_offset: usize, len: usize) {
    std::ptr::copy(src.as_ptr().add(src_offset), dst.as_ptr().add(dst_offset), len);
}

struct BufferState {
    size: u64,
    usage: BufferUsage,
    memory: Option<(Handle<Memory>, u64)>,
}

struct MemoryState {
    device: AlignedBytes,
    /// Host shadow for non-coherent types.
    host: Option<AlignedBytes>,
    type_index: u32,
    device_local: bool,
    mapped: bool,
}

struct PoolState {
    family: u32,
}

struct CommandState {
    pool: Handle<CommandPool>,
    copies: Vec<(Handle<Buffer>, Handle<Buffer>, CopyRegion)>,
}

/// Backend call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyOp {
    CreateBuffer,
    AllocateMemory,
    BindMemory,
    MapMemory,
    CreateCommandPool,
    AllocateCommandBuffer,
    RecordCopy,
    Submit,
}

/// Counters of backend calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub allocations: u64,
    pub frees: u64,
    pub binds: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub flushes: u64,
    pub invalidates: u64,
    pub command_pools_created: u64,
    pub command_pools_destroyed: u64,
    pub command_buffers_allocated: u64,
    pub command_buffers_freed: u64,
    pub copies_recorded: u64,
    pub submits: u64,
    /// Calls made with a stale or unknown handle.
    pub stale_handles: u64,
}

impl DummyStats {
    pub fn live_buffers(&self) -> u64 {
        self.buffers_created - self.buffers_destroyed
    }

    pub fn live_allocations(&self) -> u64 {
        self.allocations - self.frees
    }

    pub fn live_command_pools(&self) -> u64 {
        self.command_pools_created - self.command_pools_destroyed
    }

    pub fn live_command_buffers(&self) -> u64 {
        self.command_buffers_allocated - self.command_buffers_freed
    }
}

struct Failure {
    op: DummyOp,
    skip: u32,
    error: BackendError,
}

struct DummyState {
    buffers: Slots<Buffer, BufferState>,
    memory: Slots<Memory, MemoryState>,
    pools: Slots<CommandPool, PoolState>,
    commands: Slots<CommandBuffer, CommandState>,
    stats: DummyStats,
    device_local_used: u64,
    failures: Vec<Failure>,
}

impl DummyState {
    fn take_failure(&mut self, op: DummyOp) -> Result<(), BackendError> {
        let Some(pos) = self.failures.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        let failure = &mut self.failures[pos];
        if failure.skip > 0 {
            failure.skip -= 1;
            return Ok(());
        }
        Err(self.failures.remove(pos).error)
    }

    fn stale<T>(&mut self, call: &str, handle: Handle<T>) -> BackendError {
        self.stats.stale_handles += 1;
        sa_emit!(SA401, "{} with {:?}", call, handle);
        BackendError::InvalidHandle
    }
}

struct Shared {
    memory_types: Vec<MemoryProperty>,
    queue_families: Vec<QueueFamily>,
    memory_type_bits: u32,
    device_local_budget: Option<u64>,
    state: Mutex<DummyState>,
}

/// RAM-backed [`DeviceBackend`].
///
/// Clones share one device, so a test can keep a clone to inspect
/// [`stats`](Self::stats) after handing the backend to a [`Device`](super::Device).
#[derive(Clone)]
pub struct DummyBackend {
    shared: Arc<Shared>,
}

impl fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DummyBackend")
            .field("memory_types", &self.shared.memory_types)
            .field("queue_families", &self.shared.queue_families)
            .finish()
    }
}

/// Builder for [`DummyBackend`].
#[derive(Debug, Clone, Default)]
pub struct DummyBackendBuilder {
    memory_types: Vec<MemoryProperty>,
    queue_families: Vec<QueueFamily>,
    memory_type_bits: Option<u32>,
    device_local_budget: Option<u64>,
}

impl DummyBackendBuilder {
    /// Append a memory type.
    pub fn memory_type(mut self, flags: MemoryProperty) -> Self {
        self.memory_types.push(flags);
        self
    }

    /// Append a queue family.
    pub fn queue_family(mut self, flags: QueueFlags, queue_count: u32) -> Self {
        self.queue_families.push(QueueFamily { flags, queue_count });
        self
    }

    /// Memory types a buffer may use (default: all).
    pub fn buffer_memory_type_bits(mut self, bits: u32) -> Self {
        self.memory_type_bits = Some(bits);
        self
    }

    /// Bytes available across device-local types (default: unlimited).
    pub fn device_local_budget(mut self, bytes: u64) -> Self {
        self.device_local_budget = Some(bytes);
        self
    }

    pub fn build(self) -> DummyBackend {
        let all_types = match self.memory_types.len() {
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        };
        DummyBackend {
            shared: Arc::new(Shared {
                memory_type_bits: self.memory_type_bits.unwrap_or(all_types),
                memory_types: self.memory_types,
                queue_families: self.queue_families,
                device_local_budget: self.device_local_budget,
                state: Mutex::new(DummyState {
                    buffers: Slots::new(),
                    memory: Slots::new(),
                    pools: Slots::new(),
                    commands: Slots::new(),
                    stats: DummyStats::default(),
                    device_local_used: 0,
                    failures: Vec::new(),
                }),
            }),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Discrete GPU: device-local, host-coherent and host-cached types,
    /// a general queue family and a dedicated transfer family.
    pub fn new() -> Self {
        Self::builder()
            .memory_type(MemoryProperty::DEVICE_LOCAL)
            .memory_type(MemoryProperty::HOST_VISIBLE_COHERENT)
            .memory_type(MemoryProperty::HOST_VISIBLE_COHERENT | MemoryProperty::HOST_CACHED)
            .queue_family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1)
            .queue_family(QueueFlags::TRANSFER, 1)
            .build()
    }

    /// Integrated GPU: one device-local, host-coherent type and one family.
    pub fn unified() -> Self {
        Self::builder()
            .memory_type(MemoryProperty::DEVICE_LOCAL | MemoryProperty::HOST_VISIBLE_COHERENT)
            .queue_family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1)
            .build()
    }

    /// Device-local memory that is host-visible but not coherent.
    pub fn non_coherent() -> Self {
        Self::builder()
            .memory_type(MemoryProperty::DEVICE_LOCAL | MemoryProperty::HOST_VISIBLE)
            .memory_type(MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_CACHED)
            .queue_family(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1)
            .build()
    }

    pub fn builder() -> DummyBackendBuilder {
        DummyBackendBuilder::default()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DummyStats {
        self.shared.state.lock().stats
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: DummyOp, error: BackendError) {
        self.fail_nth(op, 0, error);
    }

    /// Let `skip` calls of `op` succeed, then fail the next one with `error`.
    pub fn fail_nth(&self, op: DummyOp, skip: u32, error: BackendError) {
        self.shared.state.lock().failures.push(Failure { op, skip, error });
    }

    /// Device-side contents of `buffer`, as a shader would see them.
    pub fn device_bytes(&self, buffer: Handle<Buffer>) -> Option<Vec<u8>> {
        let state = self.shared.state.lock();
        let buf = state.buffers.get(buffer)?;
        let (memory, offset) = buf.memory?;
        let mem = state.memory.get(memory)?;
        Some(mem.device.to_vec(offset as usize, buf.size as usize))
    }

    /// Whether `memory` is currently mapped.
    pub fn is_mapped(&self, memory: Handle<Memory>) -> bool {
        let state = self.shared.state.lock();
        state.memory.get(memory).map_or(false, |mem| mem.mapped)
    }

    /// Memory type `memory` was allocated from.
    pub fn memory_type_of(&self, memory: Handle<Memory>) -> Option<u32> {
        let state = self.shared.state.lock();
        state.memory.get(memory).map(|mem| mem.type_index)
    }
}

/// Resolve a `(offset, size)` pair against `len`, honoring [`WHOLE_SIZE`].
fn resolve_range(offset: u64, size: u64, len: u64) -> Result<(usize, usize), BackendError> {
    let size = if size == WHOLE_SIZE { len.saturating_sub(offset) } else { size };
    match offset.checked_add(size) {
        Some(end) if end <= len => Ok((offset as usize, size as usize)),
        _ => Err(BackendError::InvalidUsage(format!(
            "range {}+{} exceeds allocation of {} bytes",
            offset, size, len
        ))),
    }
}

impl DeviceBackend for DummyBackend {
    type Buffer = Handle<Buffer>;
    type Memory = Handle<Memory>;
    type CommandPool = Handle<CommandPool>;
    type CommandBuffer = Handle<CommandBuffer>;

    fn queue_families(&self) -> Vec<QueueFamily> {
        self.shared.queue_families.clone()
    }

    fn memory_types(&self) -> Vec<MemoryProperty> {
        self.shared.memory_types.clone()
    }

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> Result<Self::Buffer, BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::CreateBuffer)?;
        if size == 0 {
            return Err(BackendError::InvalidUsage("zero-sized buffer".to_string()));
        }
        state.stats.buffers_created += 1;
        Ok(state.buffers.insert(BufferState { size, usage, memory: None }))
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        let mut state = self.shared.state.lock();
        match state.buffers.remove(buffer) {
            Some(_) => state.stats.buffers_destroyed += 1,
            None => {
                state.stale("destroy_buffer", buffer);
            }
        }
    }

    fn buffer_memory_requirements(&self, buffer: Self::Buffer) -> MemoryRequirements {
        let mut state = self.shared.state.lock();
        let size = match state.buffers.get(buffer) {
            Some(buf) => buf.size,
            None => {
                state.stale("buffer_memory_requirements", buffer);
                0
            }
        };
        let align = MAP_ALIGNMENT as u64;
        MemoryRequirements {
            size: (size + align - 1) / align * align,
            alignment: align,
            memory_type_bits: self.shared.memory_type_bits,
        }
    }

    fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<Self::Memory, BackendError> {
        let flags = self
            .shared
            .memory_types
            .get(memory_type as usize)
            .copied()
            .ok_or_else(|| BackendError::InvalidUsage(format!("unknown memory type {}", memory_type)))?;

        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::AllocateMemory)?;

        let device_local = flags.contains(MemoryProperty::DEVICE_LOCAL);
        if device_local {
            if let Some(budget) = self.shared.device_local_budget {
                if state.device_local_used + size > budget {
                    return Err(BackendError::OutOfDeviceMemory);
                }
            }
        }

        let len = usize::try_from(size).map_err(|_| BackendError::OutOfHostMemory)?;
        let device = AlignedBytes::zeroed(len).ok_or(BackendError::OutOfHostMemory)?;
        let host = if flags.contains(MemoryProperty::HOST_VISIBLE)
            && !flags.contains(MemoryProperty::HOST_COHERENT)
        {
            Some(AlignedBytes::zeroed(len).ok_or(BackendError::OutOfHostMemory)?)
        } else {
            None
        };

        if device_local {
            state.device_local_used += size;
        }
        state.stats.allocations += 1;
        Ok(state.memory.insert(MemoryState {
            device,
            host,
            type_index: memory_type,
            device_local,
            mapped: false,
        }))
    }

    fn free_memory(&self, memory: Self::Memory) {
        let mut state = self.shared.state.lock();
        match state.memory.remove(memory) {
            Some(mem) => {
                if mem.device_local {
                    state.device_local_used -= mem.device.len() as u64;
                }
                state.stats.frees += 1;
            }
            None => {
                state.stale("free_memory", memory);
            }
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: Self::Buffer,
        memory: Self::Memory,
        offset: u64,
    ) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::BindMemory)?;
        let Some(mem_len) = state.memory.get(memory).map(|mem| mem.device.len() as u64) else {
            return Err(state.stale("bind_buffer_memory", memory));
        };
        let Some(buf) = state.buffers.get_mut(buffer) else {
            return Err(state.stale("bind_buffer_memory", buffer));
        };
        if buf.memory.is_some() {
            return Err(BackendError::InvalidUsage(format!("{:?} is already bound", buffer)));
        }
        resolve_range(offset, buf.size, mem_len)?;
        buf.memory = Some((memory, offset));
        state.stats.binds += 1;
        Ok(())
    }

    fn map_memory(&self, memory: Self::Memory, offset: u64, size: u64) -> Result<NonNull<u8>, BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::MapMemory)?;
        let Some(mem) = state.memory.get_mut(memory) else {
            return Err(state.stale("map_memory", memory));
        };
        let flags = self.shared.memory_types[mem.type_index as usize];
        if !flags.contains(MemoryProperty::HOST_VISIBLE) {
            return Err(BackendError::MemoryMapFailed);
        }
        if mem.mapped {
            return Err(BackendError::InvalidUsage(format!("{:?} is already mapped", memory)));
        }
        let (offset, _) = resolve_range(offset, size, mem.device.len() as u64)?;
        let block = mem.host.as_ref().unwrap_or(&mem.device);
        // SAFETY: offset is within the block
        let ptr = unsafe { NonNull::new_unchecked(block.as_ptr().add(offset)) };
        mem.mapped = true;
        state.stats.maps += 1;
        Ok(ptr)
    }

    fn unmap_memory(&self, memory: Self::Memory) {
        let mut state = self.shared.state.lock();
        match state.memory.get_mut(memory) {
            Some(mem) if mem.mapped => {
                mem.mapped = false;
                state.stats.unmaps += 1;
            }
            Some(_) => {
                sa_emit!(SA901, "unmap_memory on unmapped {:?}", memory);
            }
            None => {
                state.stale("unmap_memory", memory);
            }
        }
    }

    fn flush_memory(&self, memory: Self::Memory, offset: u64, size: u64) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        let Some(mem) = state.memory.get(memory) else {
            return Err(state.stale("flush_memory", memory));
        };
        if !mem.mapped {
            return Err(BackendError::InvalidUsage(format!("flush of unmapped {:?}", memory)));
        }
        let (offset, len) = resolve_range(offset, size, mem.device.len() as u64)?;
        if let Some(host) = &mem.host {
            // SAFETY: range checked against the allocation
            unsafe { copy_bytes(host, offset, &mem.device, offset, len) };
        }
        state.stats.flushes += 1;
        Ok(())
    }

    fn invalidate_memory(&self, memory: Self::Memory, offset: u64, size: u64) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        let Some(mem) = state.memory.get(memory) else {
            return Err(state.stale("invalidate_memory", memory));
        };
        if !mem.mapped {
            return Err(BackendError::InvalidUsage(format!("invalidate of unmapped {:?}", memory)));
        }
        let (offset, len) = resolve_range(offset, size, mem.device.len() as u64)?;
        if let Some(host) = &mem.host {
            // SAFETY: range checked against the allocation
            unsafe { copy_bytes(&mem.device, offset, host, offset, len) };
        }
        state.stats.invalidates += 1;
        Ok(())
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<Self::CommandPool, BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::CreateCommandPool)?;
        if queue_family as usize >= self.shared.queue_families.len() {
            return Err(BackendError::InvalidUsage(format!("unknown queue family {}", queue_family)));
        }
        state.stats.command_pools_created += 1;
        Ok(state.pools.insert(PoolState { family: queue_family }))
    }

    fn destroy_command_pool(&self, pool: Self::CommandPool) {
        let mut state = self.shared.state.lock();
        if state.pools.remove(pool).is_none() {
            state.stale("destroy_command_pool", pool);
            return;
        }
        // Buffers still allocated from the pool go with it.
        let freed = state.commands.retain(|cmd| cmd.pool != pool);
        state.stats.command_buffers_freed += freed as u64;
        state.stats.command_pools_destroyed += 1;
    }

    fn allocate_command_buffer(&self, pool: Self::CommandPool) -> Result<Self::CommandBuffer, BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::AllocateCommandBuffer)?;
        if state.pools.get(pool).is_none() {
            return Err(state.stale("allocate_command_buffer", pool));
        }
        state.stats.command_buffers_allocated += 1;
        Ok(state.commands.insert(CommandState { pool, copies: Vec::new() }))
    }

    fn free_command_buffer(&self, pool: Self::CommandPool, buffer: Self::CommandBuffer) {
        let mut state = self.shared.state.lock();
        match state.commands.get(buffer).map(|cmd| cmd.pool) {
            Some(owner) if owner == pool => {
                state.commands.remove(buffer);
                state.stats.command_buffers_freed += 1;
            }
            Some(owner) => {
                sa_emit!(SA901, "{:?} belongs to {:?}, not {:?}", buffer, owner, pool);
            }
            None => {
                state.stale("free_command_buffer", buffer);
            }
        }
    }

    fn reset_command_buffer(&self, buffer: Self::CommandBuffer) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        let Some(cmd) = state.commands.get_mut(buffer) else {
            return Err(state.stale("reset_command_buffer", buffer));
        };
        cmd.copies.clear();
        Ok(())
    }

    fn record_copy(
        &self,
        cmd: Self::CommandBuffer,
        src: Self::Buffer,
        dst: Self::Buffer,
        region: CopyRegion,
    ) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::RecordCopy)?;
        for buffer in [src, dst] {
            if state.buffers.get(buffer).is_none() {
                return Err(state.stale("record_copy", buffer));
            }
        }
        let Some(state_cmd) = state.commands.get_mut(cmd) else {
            return Err(state.stale("record_copy", cmd));
        };
        state_cmd.copies.clear();
        state_cmd.copies.push((src, dst, region));
        state.stats.copies_recorded += 1;
        Ok(())
    }

    fn submit_and_wait(
        &self,
        queue_family: u32,
        cmd: Self::CommandBuffer,
        _timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DummyOp::Submit)?;

        let Some(pool) = state.commands.get(cmd).map(|c| c.pool) else {
            return Err(state.stale("submit_and_wait", cmd));
        };
        let family = match state.pools.get(pool) {
            Some(p) => p.family,
            None => return Err(state.stale("submit_and_wait", pool)),
        };
        if family != queue_family {
            return Err(BackendError::InvalidUsage(format!(
                "{:?} was allocated for family {}, submitted to {}",
                cmd, family, queue_family
            )));
        }

        let copies = state.commands.get(cmd).map(|c| c.copies.clone()).unwrap_or_default();
        for (src, dst, region) in copies {
            let (src_mem, src_base) = bound_range(&state, src, BufferUsage::TRANSFER_SRC, region.src_offset, region.size)?;
            let (dst_mem, dst_base) = bound_range(&state, dst, BufferUsage::TRANSFER_DST, region.dst_offset, region.size)?;
            let (Some(from), Some(to)) = (state.memory.get(src_mem), state.memory.get(dst_mem)) else {
                return Err(BackendError::InvalidHandle);
            };
            // SAFETY: both ranges checked by bound_range
            unsafe { copy_bytes(&from.device, src_base, &to.device, dst_base, region.size as usize) };
        }
        state.stats.submits += 1;
        Ok(())
    }
}

/// Memory and absolute byte offset for a copy touching `buffer`.
fn bound_range(
    state: &DummyState,
    buffer: Handle<Buffer>,
    usage: BufferUsage,
    offset: u64,
    size: u64,
) -> Result<(Handle<Memory>, usize), BackendError> {
    let buf = state.buffers.get(buffer).ok_or(BackendError::InvalidHandle)?;
    if !buf.usage.contains(usage) {
        return Err(BackendError::InvalidUsage(format!("{:?} lacks {:?}", buffer, usage)));
    }
    let (memory, base) = buf
        .memory
        .ok_or_else(|| BackendError::InvalidUsage(format!("{:?} has no memory bound", buffer)))?;
    resolve_range(offset, size, buf.size)?;
    Ok((memory, (base + offset) as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_is_reported() {
        let backend = DummyBackend::new();
        let buffer = backend.create_buffer(16, BufferUsage::STORAGE_BUFFER).unwrap();
        backend.destroy_buffer(buffer);

        let reused = backend.create_buffer(16, BufferUsage::STORAGE_BUFFER).unwrap();
        assert_eq!(reused.raw_index(), buffer.raw_index());
        assert_ne!(reused, buffer);

        backend.destroy_buffer(buffer);
        assert_eq!(backend.stats().stale_handles, 1);
        assert_eq!(backend.stats().live_buffers(), 1);
    }

    #[test]
    fn test_non_coherent_needs_flush() {
        let backend = DummyBackend::non_coherent();
        let buffer = backend.create_buffer(4, BufferUsage::STORAGE_BUFFER).unwrap();
        let req = backend.buffer_memory_requirements(buffer);
        assert_eq!(req.size, 64);
        let memory = backend.allocate_memory(req.size, 0).unwrap();
        backend.bind_buffer_memory(buffer, memory, 0).unwrap();

        let ptr = backend.map_memory(memory, 0, WHOLE_SIZE).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.as_ptr(), 4) };
        assert_eq!(backend.device_bytes(buffer).unwrap(), vec![0, 0, 0, 0]);

        backend.flush_memory(memory, 0, WHOLE_SIZE).unwrap();
        assert_eq!(backend.device_bytes(buffer).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_map_rejects_device_only_memory() {
        let backend = DummyBackend::new();
        let memory = backend.allocate_memory(64, 0).unwrap();
        assert_eq!(backend.map_memory(memory, 0, WHOLE_SIZE), Err(BackendError::MemoryMapFailed));
        backend.free_memory(memory);
        assert_eq!(backend.stats().live_allocations(), 0);
    }

    #[test]
    fn test_double_map_is_rejected() {
        let backend = DummyBackend::new();
        let memory = backend.allocate_memory(64, 1).unwrap();
        let ptr = backend.map_memory(memory, 0, WHOLE_SIZE).unwrap();
        assert_eq!(ptr.as_ptr() as usize % MAP_ALIGNMENT, 0);
        assert!(matches!(
            backend.map_memory(memory, 0, WHOLE_SIZE),
            Err(BackendError::InvalidUsage(_))
        ));
        backend.unmap_memory(memory);
        assert!(!backend.is_mapped(memory));
    }

    #[test]
    fn test_device_local_budget() {
        let backend = DummyBackend::builder()
            .memory_type(MemoryProperty::DEVICE_LOCAL)
            .queue_family(QueueFlags::COMPUTE, 1)
            .device_local_budget(128)
            .build();
        let first = backend.allocate_memory(128, 0).unwrap();
        assert_eq!(backend.allocate_memory(64, 0), Err(BackendError::OutOfDeviceMemory));
        backend.free_memory(first);
        assert!(backend.allocate_memory(64, 0).is_ok());
    }

    #[test]
    fn test_injected_failures_are_consumed_in_order() {
        let backend = DummyBackend::new();
        backend.fail_nth(DummyOp::CreateBuffer, 1, BackendError::OutOfHostMemory);
        assert!(backend.create_buffer(8, BufferUsage::STORAGE_BUFFER).is_ok());
        assert_eq!(
            backend.create_buffer(8, BufferUsage::STORAGE_BUFFER),
            Err(BackendError::OutOfHostMemory)
        );
        assert!(backend.create_buffer(8, BufferUsage::STORAGE_BUFFER).is_ok());
    }

    #[test]
    fn test_copy_requires_transfer_usage() {
        let backend = DummyBackend::unified();
        let make = |usage| {
            let buffer = backend.create_buffer(64, usage).unwrap();
            let memory = backend.allocate_memory(64, 0).unwrap();
            backend.bind_buffer_memory(buffer, memory, 0).unwrap();
            buffer
        };
        let src = make(BufferUsage::TRANSFER_SRC);
        let dst = make(BufferUsage::STORAGE_BUFFER);

        let pool = backend.create_command_pool(0).unwrap();
        let cmd = backend.allocate_command_buffer(pool).unwrap();
        backend.record_copy(cmd, src, dst, CopyRegion::whole(64)).unwrap();
        assert!(matches!(
            backend.submit_and_wait(0, cmd, None),
            Err(BackendError::InvalidUsage(_))
        ));

        backend.destroy_command_pool(pool);
        assert_eq!(backend.stats().live_command_buffers(), 0);
    }
}
