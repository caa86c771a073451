use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::allocator::{AllocatorStatistics, DeviceAllocator, MemoryBlock, MemoryUsage};
use crate::device::DeviceFunctions;
use crate::error::{post_error, Error, VulkanError};
use crate::vk_check;

/// Allocator making one `vkAllocateMemory` call per resource.
///
/// Simple and predictable but limited by `maxMemoryAllocationCount`. Suitable for tests and for
/// applications with few long lived resources.
pub struct DedicatedAllocator {
    functions: Arc<DeviceFunctions>,
    statistics: Mutex<AllocatorStatistics>,
}

impl DedicatedAllocator {
    pub fn new(functions: Arc<DeviceFunctions>) -> Self {
        Self {
            functions,
            statistics: Mutex::new(AllocatorStatistics::default()),
        }
    }

    /// Selects a memory type allowed by `type_bits`. Types having all preferred flags win over
    /// types only having the required ones.
    pub fn find_memory_type(properties: &vk::PhysicalDeviceMemoryProperties, type_bits: u32, usage: MemoryUsage) -> Option<(u32, vk::MemoryPropertyFlags)> {
        let required = usage.required_flags();
        let preferred = required | usage.preferred_flags();

        let candidates = || {
            (0..properties.memory_type_count).filter(move |index| (type_bits & (1u32 << index)) != 0)
                .map(|index| (index, properties.memory_types[index as usize].property_flags))
        };

        candidates().find(|(_, flags)| flags.contains(preferred))
            .or_else(|| candidates().find(|(_, flags)| flags.contains(required)))
    }

    fn lock_statistics(&self) -> std::sync::MutexGuard<AllocatorStatistics> {
        self.statistics.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Widens `offset..offset + size` to multiples of `atom_size`. The end is clamped to the
    /// block, which for dedicated blocks is also the end of the memory object.
    fn memory_range(block: &MemoryBlock, atom_size: vk::DeviceSize, offset: vk::DeviceSize, size: vk::DeviceSize) -> vk::MappedMemoryRange {
        let atom_size = atom_size.max(1);
        let start = (offset / atom_size) * atom_size;
        let end = offset.saturating_add(size);
        let end = match end % atom_size {
            0 => end,
            rem => end.saturating_add(atom_size - rem),
        }.min(block.size);

        vk::MappedMemoryRange::builder()
            .memory(block.memory)
            .offset(block.offset + start)
            .size(end.saturating_sub(start))
            .build()
    }

    fn atom_size(&self) -> vk::DeviceSize {
        self.functions.physical_device().properties().limits.non_coherent_atom_size
    }
}

impl DeviceAllocator for DedicatedAllocator {
    fn functions(&self) -> &Arc<DeviceFunctions> {
        &self.functions
    }

    fn allocate(&self, requirements: &vk::MemoryRequirements, usage: MemoryUsage) -> Result<MemoryBlock, Error> {
        let (memory_type, properties) = match Self::find_memory_type(self.functions.memory_properties(), requirements.memory_type_bits, usage) {
            Some(found) => found,
            None => {
                log::warn!("No memory type for {:?} with usage {:?}", requirements, usage);
                return post_error(Error::Vulkan(VulkanError::new(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, file!(), line!())));
            }
        };

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let mut memory = vk::DeviceMemory::null();
        unsafe {
            vk_check!((self.functions.vk().allocate_memory)(self.functions.handle(), &*allocate_info, std::ptr::null(), &mut memory))
        }.map_err(|err| {
            log::warn!("Failed to allocate {} bytes of memory type {}. {}", requirements.size, memory_type, err);
            err
        })?;

        let mut statistics = self.lock_statistics();
        statistics.allocation_count += 1;
        statistics.allocated_bytes += requirements.size;

        Ok(MemoryBlock {
            memory,
            offset: 0,
            size: requirements.size,
            memory_type,
            properties,
        })
    }

    unsafe fn free(&self, block: MemoryBlock) -> Result<(), Error> {
        (self.functions.vk().free_memory)(self.functions.handle(), block.memory, std::ptr::null());

        let mut statistics = self.lock_statistics();
        statistics.allocation_count = statistics.allocation_count.saturating_sub(1);
        statistics.allocated_bytes = statistics.allocated_bytes.saturating_sub(block.size);
        Ok(())
    }

    unsafe fn map(&self, block: &MemoryBlock) -> Result<NonNull<u8>, Error> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        vk_check!((self.functions.vk().map_memory)(self.functions.handle(), block.memory, block.offset, block.size, vk::MemoryMapFlags::empty(), &mut ptr))?;

        match NonNull::new(ptr as *mut u8) {
            Some(ptr) => Ok(ptr),
            None => post_error(Error::Vulkan(VulkanError::new(vk::Result::ERROR_MEMORY_MAP_FAILED, file!(), line!()))),
        }
    }

    unsafe fn unmap(&self, block: &MemoryBlock) {
        (self.functions.vk().unmap_memory)(self.functions.handle(), block.memory);
    }

    unsafe fn flush(&self, block: &MemoryBlock, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error> {
        let range = Self::memory_range(block, self.atom_size(), offset, size);
        vk_check!((self.functions.vk().flush_mapped_memory_ranges)(self.functions.handle(), 1, &range))
    }

    unsafe fn invalidate(&self, block: &MemoryBlock, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<(), Error> {
        let range = Self::memory_range(block, self.atom_size(), offset, size);
        vk_check!((self.functions.vk().invalidate_mapped_memory_ranges)(self.functions.handle(), 1, &range))
    }

    fn statistics(&self) -> AllocatorStatistics {
        *self.lock_statistics()
    }

    fn on_frame(&self, frame_index: u64) {
        self.lock_statistics().frame_index = frame_index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (index, flags) in types.iter().enumerate() {
            properties.memory_types[index].property_flags = *flags;
        }
        properties
    }

    #[test]
    fn preferred_type_wins() {
        let properties = make_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(DedicatedAllocator::find_memory_type(&properties, 0b111, MemoryUsage::GpuOnly).map(|t| t.0), Some(1));
        assert_eq!(DedicatedAllocator::find_memory_type(&properties, 0b111, MemoryUsage::CpuToGpu).map(|t| t.0), Some(2));
        assert_eq!(DedicatedAllocator::find_memory_type(&properties, 0b011, MemoryUsage::CpuToGpu).map(|t| t.0), Some(0));
    }

    fn make_block(size: vk::DeviceSize) -> MemoryBlock {
        MemoryBlock {
            memory: vk::DeviceMemory::null(),
            offset: 0,
            size,
            memory_type: 0,
            properties: vk::MemoryPropertyFlags::HOST_VISIBLE,
        }
    }

    #[test]
    fn ranges_are_widened_to_atoms() {
        let range = DedicatedAllocator::memory_range(&make_block(256), 64, 4, 8);
        assert_eq!((range.offset, range.size), (0, 64));

        let range = DedicatedAllocator::memory_range(&make_block(256), 64, 70, 64);
        assert_eq!((range.offset, range.size), (64, 128));

        let range = DedicatedAllocator::memory_range(&make_block(256), 64, 128, 128);
        assert_eq!((range.offset, range.size), (128, 128));
    }

    #[test]
    fn ranges_are_clamped_to_the_block() {
        let range = DedicatedAllocator::memory_range(&make_block(100), 64, 70, 10);
        assert_eq!((range.offset, range.size), (64, 36));

        let range = DedicatedAllocator::memory_range(&make_block(48), 0, 4, 8);
        assert_eq!((range.offset, range.size), (4, 8));
    }

    #[test]
    fn required_flags_are_never_dropped() {
        let properties = make_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        assert_eq!(DedicatedAllocator::find_memory_type(&properties, 0b1, MemoryUsage::GpuToCpu), None);
        assert_eq!(DedicatedAllocator::find_memory_type(&properties, 0b0, MemoryUsage::GpuOnly), None);
    }
}
