use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use ash::vk::Handle as _;
use gpu_allocator::vulkan::{Allocation as GpuAllocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;

use crate::allocator::{AllocatorStatistics, DeviceAllocator, MemoryBlock, MemoryUsage};
use crate::device::DeviceFunctions;
use crate::error::{post_error, Error, VulkanError};

/// Sub-allocating allocator backed by [`gpu_allocator`].
///
/// Host visible memory handed out by gpu-allocator is always host coherent and persistently
/// mapped. Mapping returns the existing pointer and flushes are no-ops.
///
/// Install it with `config.set_allocator(GpuAllocator::factory)`.
pub struct GpuAllocator {
    functions: Arc<DeviceFunctions>,
    state: Mutex<State>,
}

struct State {
    allocator: Allocator,
    /// Keyed by (memory, offset) which is unique for live sub-allocations.
    live: HashMap<(u64, vk::DeviceSize), GpuAllocation>,
    statistics: AllocatorStatistics,
}

impl GpuAllocator {
    pub fn new(functions: Arc<DeviceFunctions>) -> Result<Self, Error> {
        let instance_context = functions.get_instance();
        let static_fn = vk::StaticFn {
            get_instance_proc_addr: instance_context.get_library().get_instance_proc_addr(),
        };
        let instance = unsafe { ash::Instance::load(&static_fn, instance_context.handle()) };
        let device = unsafe { ash::Device::load(instance.fp_v1_0(), functions.handle()) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance,
            device,
            physical_device: functions.physical_device().handle(),
            debug_settings: Default::default(),
            buffer_device_address: false,
        }).or_else(|err| post_error(err.into()))?;
        log::debug!("Created gpu-allocator for device {:?}", functions.get_id());

        Ok(Self {
            functions,
            state: Mutex::new(State {
                allocator,
                live: HashMap::new(),
                statistics: AllocatorStatistics::default(),
            }),
        })
    }

    pub fn factory(functions: Arc<DeviceFunctions>) -> Result<Arc<dyn DeviceAllocator>, Error> {
        Ok(Arc::new(Self::new(functions)?))
    }

    fn location(usage: MemoryUsage) -> MemoryLocation {
        match usage {
            MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
            MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }

    /// Replays the memory type selection of gpu-allocator: the first allowed type with all
    /// preferred flags, otherwise the first one with all required flags.
    pub fn find_memory_type(properties: &vk::PhysicalDeviceMemoryProperties, type_bits: u32, usage: MemoryUsage) -> Option<(u32, vk::MemoryPropertyFlags)> {
        let (preferred, required) = match usage {
            MemoryUsage::GpuOnly => (vk::MemoryPropertyFlags::DEVICE_LOCAL, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryUsage::CpuToGpu => (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
            MemoryUsage::GpuToCpu => (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
        };

        let candidates = || {
            (0..properties.memory_type_count).filter(move |index| (type_bits & (1u32 << index)) != 0)
                .map(|index| (index, properties.memory_types[index as usize].property_flags))
        };

        candidates().find(|(_, flags)| flags.contains(preferred))
            .or_else(|| candidates().find(|(_, flags)| flags.contains(required)))
    }

    fn lock_state(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl DeviceAllocator for GpuAllocator {
    fn functions(&self) -> &Arc<DeviceFunctions> {
        &self.functions
    }

    /// Without tiling information host visible memory is assumed to back linear resources.
    fn allocate(&self, requirements: &vk::MemoryRequirements, usage: MemoryUsage) -> Result<MemoryBlock, Error> {
        self.allocate_resource(requirements, usage, usage != MemoryUsage::GpuOnly)
    }

    fn allocate_resource(&self, requirements: &vk::MemoryRequirements, usage: MemoryUsage, linear: bool) -> Result<MemoryBlock, Error> {
        let (memory_type, properties) = match Self::find_memory_type(self.functions.memory_properties(), requirements.memory_type_bits, usage) {
            Some(found) => found,
            None => {
                log::warn!("No memory type for {:?} with usage {:?}", requirements, usage);
                return post_error(Error::Vulkan(VulkanError::new(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, file!(), line!())));
            }
        };

        let mut state = self.lock_state();
        let allocation = state.allocator.allocate(&AllocationCreateDesc {
            name: "b4d-vk",
            requirements: *requirements,
            location: Self::location(usage),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }).or_else(|err| {
            log::warn!("gpu-allocator failed to allocate {} bytes for {:?}. {}", requirements.size, usage, err);
            post_error(err.into())
        })?;

        let block = MemoryBlock {
            memory: unsafe { allocation.memory() },
            offset: allocation.offset(),
            size: allocation.size(),
            memory_type,
            properties,
        };
        state.statistics.allocation_count += 1;
        state.statistics.allocated_bytes += block.size;
        state.live.insert((block.memory.as_raw(), block.offset), allocation);

        Ok(block)
    }

    unsafe fn free(&self, block: MemoryBlock) -> Result<(), Error> {
        let mut state = self.lock_state();
        let allocation = match state.live.remove(&(block.memory.as_raw(), block.offset)) {
            Some(allocation) => allocation,
            None => return post_error(Error::Logic(format!("memory block {:?} was not allocated by this allocator", block))),
        };
        state.allocator.free(allocation).or_else(|err| post_error(err.into()))?;

        state.statistics.allocation_count = state.statistics.allocation_count.saturating_sub(1);
        state.statistics.allocated_bytes = state.statistics.allocated_bytes.saturating_sub(block.size);
        Ok(())
    }

    unsafe fn map(&self, block: &MemoryBlock) -> Result<NonNull<u8>, Error> {
        let state = self.lock_state();
        match state.live.get(&(block.memory.as_raw(), block.offset)).and_then(GpuAllocation::mapped_ptr) {
            Some(ptr) => Ok(ptr.cast()),
            None => post_error(Error::Vulkan(VulkanError::new(vk::Result::ERROR_MEMORY_MAP_FAILED, file!(), line!()))),
        }
    }

    unsafe fn unmap(&self, _: &MemoryBlock) {
    }

    unsafe fn flush(&self, _: &MemoryBlock, _: vk::DeviceSize, _: vk::DeviceSize) -> Result<(), Error> {
        Ok(())
    }

    unsafe fn invalidate(&self, _: &MemoryBlock, _: vk::DeviceSize, _: vk::DeviceSize) -> Result<(), Error> {
        Ok(())
    }

    fn statistics(&self) -> AllocatorStatistics {
        self.lock_state().statistics
    }

    fn on_frame(&self, frame_index: u64) {
        self.lock_state().statistics.frame_index = frame_index;
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        let state = self.lock_state();
        if !state.live.is_empty() {
            log::error!("Dropping gpu-allocator with {} live allocations", state.live.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::objects::buffer::Buffer;
    use crate::util::test::{make_test_device_with, MockDriver};
    use crate::instance::VulkanVersion;

    fn allocations(trace: &[String]) -> usize {
        trace.iter().filter(|call| call.starts_with("vkAllocateMemory")).count()
    }

    #[test]
    fn buffers_share_one_memory_object() {
        let device = make_test_device_with(VulkanVersion::VK_1_0, |config| config.set_allocator(GpuAllocator::factory));
        MockDriver::clear_trace();

        let mut first = Buffer::new(&device, 256, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryUsage::CpuToGpu).unwrap();
        let second = Buffer::new(&device, 256, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryUsage::CpuToGpu).unwrap();
        assert_eq!(allocations(&MockDriver::trace()), 1);
        assert_eq!(first.allocation().block().memory, second.allocation().block().memory);
        assert_ne!(first.allocation().block().offset, second.allocation().block().offset);
        assert!(first.allocation().coherent());

        first.write(4, &[7u32, 9u32]).unwrap();
        let mapped = first.allocation().mapped().unwrap();
        let written = unsafe { std::slice::from_raw_parts(mapped.as_ptr().add(4), 8) };
        assert_eq!(written, bytemuck::cast_slice::<u32, u8>(&[7, 9]));
        assert!(!MockDriver::trace().iter().any(|call| call.starts_with("vkFlushMappedMemoryRanges")));

        assert_eq!(device.allocator().statistics().allocation_count, 2);
        drop(first);
        drop(second);
        assert_eq!(device.allocator().statistics().allocation_count, 0);
    }

    #[test]
    fn freeing_unknown_blocks_fails() {
        let device = make_test_device_with(VulkanVersion::VK_1_0, |config| config.set_allocator(GpuAllocator::factory));
        let block = MemoryBlock {
            memory: vk::DeviceMemory::from_raw(0xdead0),
            offset: 0,
            size: 16,
            memory_type: 1,
            properties: vk::MemoryPropertyFlags::HOST_VISIBLE,
        };
        assert!(matches!(unsafe { device.allocator().free(block) }, Err(Error::Logic(_))));
    }

    #[test]
    fn selection_matches_gpu_allocator() {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        let types = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ];
        properties.memory_type_count = types.len() as u32;
        for (index, flags) in types.iter().enumerate() {
            properties.memory_types[index].property_flags = *flags;
        }

        assert_eq!(GpuAllocator::find_memory_type(&properties, 0b111, MemoryUsage::GpuOnly).map(|t| t.0), Some(0));
        assert_eq!(GpuAllocator::find_memory_type(&properties, 0b111, MemoryUsage::CpuToGpu).map(|t| t.0), Some(2));
        assert_eq!(GpuAllocator::find_memory_type(&properties, 0b011, MemoryUsage::GpuToCpu), None);
    }
}
