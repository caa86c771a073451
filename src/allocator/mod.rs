//! Device memory allocation.
//!
//! The allocation strategy is hidden behind the [`DeviceAllocator`] trait. [`Allocation`] binds
//! exactly one buffer or image to a block of memory and releases both when dropped.

mod dedicated;
mod gpu;

use std::fmt::{Debug, Formatter};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;

use crate::device::{DeviceContext, DeviceFunctions};
use crate::error::{post_error, Error};
use crate::objects::handle::{Destroy, DeviceHandle, Handle};
use crate::vk_check;

pub use dedicated::DedicatedAllocator;
pub use gpu::GpuAllocator;

/// How the memory will be accessed. Used to pick a memory type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemoryUsage {
    /// Only accessed by the device.
    GpuOnly,
    /// Written by the host and read by the device.
    CpuToGpu,
    /// Written by the device and read back by the host.
    GpuToCpu,
}

impl MemoryUsage {
    pub fn required_flags(&self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUsage::GpuOnly => vk::MemoryPropertyFlags::empty(),
            MemoryUsage::CpuToGpu | MemoryUsage::GpuToCpu => vk::MemoryPropertyFlags::HOST_VISIBLE,
        }
    }

    pub fn preferred_flags(&self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUsage::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu => vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::GpuToCpu => vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        }
    }
}

/// A block of device memory handed out by a [`DeviceAllocator`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MemoryBlock {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub memory_type: u32,
    pub properties: vk::MemoryPropertyFlags,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct AllocatorStatistics {
    pub allocation_count: u64,
    pub allocated_bytes: u64,
    pub frame_index: u64,
}

pub trait DeviceAllocator: Send + Sync {
    fn functions(&self) -> &Arc<DeviceFunctions>;

    /// Allocates memory satisfying the requirements.
    fn allocate(&self, requirements: &vk::MemoryRequirements, usage: MemoryUsage) -> Result<MemoryBlock, Error>;

    /// Allocates memory for a resource whose tiling is known. Allocators placing several
    /// resources in one memory object need it to respect `bufferImageGranularity`.
    fn allocate_resource(&self, requirements: &vk::MemoryRequirements, usage: MemoryUsage, linear: bool) -> Result<MemoryBlock, Error> {
        let _ = linear;
        self.allocate(requirements, usage)
    }

    /// # Safety
    /// The block must have been allocated by this allocator, must not be mapped and must not be
    /// in use by the device.
    unsafe fn free(&self, block: MemoryBlock) -> Result<(), Error>;

    /// Maps the whole block.
    ///
    /// # Safety
    /// The block must have been allocated by this allocator and must not be mapped already.
    unsafe fn map(&self, block: &MemoryBlock) -> Result<NonNull<u8>, Error>;

    /// # Safety
    /// The block must be mapped and no pointers to the mapping may be used afterwards.
    unsafe fn unmap(&self, block: &MemoryBlock);

    /// # Safety
    /// The block must be mapped and the range must be inside the block.
    unsafe fn flush(&self, block: &MemoryBlock, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error>;

    /// # Safety
    /// The block must be mapped and the range must be inside the block.
    unsafe fn invalidate(&self, block: &MemoryBlock, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error>;

    fn memory_properties(&self, block: &MemoryBlock) -> vk::MemoryPropertyFlags {
        block.properties
    }

    fn statistics(&self) -> AllocatorStatistics;

    /// Called once per frame to let the allocator update budgets or release deferred memory.
    fn on_frame(&self, frame_index: u64);
}

/// A native resource that needs memory bound to it.
pub trait MemoryResource: vk::Handle + Copy {
    fn memory_requirements(functions: &DeviceFunctions, handle: Self) -> vk::MemoryRequirements;

    /// # Safety
    /// The memory must satisfy the requirements of the resource.
    unsafe fn bind_memory(functions: &DeviceFunctions, handle: Self, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<(), Error>;
}

impl MemoryResource for vk::Buffer {
    fn memory_requirements(functions: &DeviceFunctions, handle: Self) -> vk::MemoryRequirements {
        let mut requirements = vk::MemoryRequirements::default();
        unsafe {
            (functions.vk().get_buffer_memory_requirements)(functions.handle(), handle, &mut requirements);
        }
        requirements
    }

    unsafe fn bind_memory(functions: &DeviceFunctions, handle: Self, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<(), Error> {
        vk_check!((functions.vk().bind_buffer_memory)(functions.handle(), handle, memory, offset))
    }
}

impl MemoryResource for vk::Image {
    fn memory_requirements(functions: &DeviceFunctions, handle: Self) -> vk::MemoryRequirements {
        let mut requirements = vk::MemoryRequirements::default();
        unsafe {
            (functions.vk().get_image_memory_requirements)(functions.handle(), handle, &mut requirements);
        }
        requirements
    }

    unsafe fn bind_memory(functions: &DeviceFunctions, handle: Self, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<(), Error> {
        vk_check!((functions.vk().bind_image_memory)(functions.handle(), handle, memory, offset))
    }
}

/// A buffer or image bound to its own memory block.
///
/// When dropped the memory is unmapped (only if this allocation mapped it), the resource is
/// destroyed and finally the memory is returned to the allocator.
pub struct Allocation<H: MemoryResource> where DeviceFunctions: Destroy<H> {
    allocator: Arc<dyn DeviceAllocator>,
    handle: ManuallyDrop<DeviceHandle<H>>,
    block: MemoryBlock,
    mapped: Option<NonNull<u8>>,
}

impl<H: MemoryResource> Allocation<H> where DeviceFunctions: Destroy<H> {
    /// Creates the resource, allocates memory for it and binds the two. `linear` is false only
    /// for optimally tiled images.
    ///
    /// If any step fails everything created so far is released again.
    pub fn new<F>(device: &DeviceContext, usage: MemoryUsage, linear: bool, create: F) -> Result<Self, Error> where F: FnOnce(&DeviceFunctions) -> Result<H, Error> {
        let allocator = device.allocator().clone();
        let handle = Handle::create(device.get_functions().clone(), |functions| create(functions))?;

        let functions = handle.owner();
        let requirements = H::memory_requirements(functions, handle.raw());
        let block = allocator.allocate_resource(&requirements, usage, linear)?;

        if let Err(err) = unsafe { H::bind_memory(functions, handle.raw(), block.memory, block.offset) } {
            log::warn!("Failed to bind memory to {:?}", handle.raw().as_raw());
            if let Err(free_err) = unsafe { allocator.free(block) } {
                log::error!("Failed to free memory after failed bind {}", free_err);
            }
            return Err(err);
        }

        Ok(Self {
            allocator,
            handle: ManuallyDrop::new(handle),
            block,
            mapped: None,
        })
    }

    pub fn handle(&self) -> H {
        self.handle.raw()
    }

    pub fn functions(&self) -> &Arc<DeviceFunctions> {
        self.handle.owner()
    }

    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.block.size
    }

    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.allocator.memory_properties(&self.block)
    }

    pub fn mappable(&self) -> bool {
        self.memory_properties().contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn coherent(&self) -> bool {
        self.memory_properties().contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Maps the memory. Calling this on an already mapped allocation returns the existing
    /// mapping.
    pub fn map(&mut self) -> Result<NonNull<u8>, Error> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        if !self.mappable() {
            return post_error(Error::Logic(String::from("allocation is not host visible")));
        }

        let ptr = unsafe { self.allocator.map(&self.block) }?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    pub fn mapped(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.allocator.unmap(&self.block) };
        }
    }

    /// Flushes host writes. Not needed for coherent memory.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error> {
        self.check_mapped_range(offset, size)?;
        unsafe { self.allocator.flush(&self.block, offset, size) }
    }

    /// Makes device writes visible to the host. Not needed for coherent memory.
    pub fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error> {
        self.check_mapped_range(offset, size)?;
        unsafe { self.allocator.invalidate(&self.block, offset, size) }
    }

    fn check_mapped_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error> {
        if self.mapped.is_none() {
            return post_error(Error::Logic(String::from("allocation is not mapped")));
        }
        if offset.checked_add(size).map_or(true, |end| end > self.block.size) {
            return post_error(Error::Logic(format!("range {}+{} exceeds allocation size {}", offset, size, self.block.size)));
        }
        Ok(())
    }
}

impl<H: MemoryResource> Drop for Allocation<H> where DeviceFunctions: Destroy<H> {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            ManuallyDrop::drop(&mut self.handle);
            if let Err(err) = self.allocator.free(self.block) {
                crate::error::channel::destroy_failed("allocation", err);
            }
        }
    }
}

impl<H: MemoryResource + Debug> Debug for Allocation<H> where DeviceFunctions: Destroy<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("handle", &self.handle.raw())
            .field("block", &self.block)
            .field("mapped", &self.mapped.is_some())
            .finish()
    }
}

// The mapped pointer is only handed out through &mut self
unsafe impl<H: MemoryResource + Send> Send for Allocation<H> where DeviceFunctions: Destroy<H> {
}

unsafe impl<H: MemoryResource + Sync> Sync for Allocation<H> where DeviceFunctions: Destroy<H> {
}
