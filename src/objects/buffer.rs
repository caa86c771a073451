use std::fmt::{Debug, Formatter};

use ash::vk;
use bytemuck::Pod;

use crate::allocator::{Allocation, MemoryUsage};
use crate::device::DeviceContext;
use crate::error::{post_error, Error};
use crate::objects::handle::Unowned;
use crate::vk_check;

pub struct Buffer {
    allocation: Allocation<vk::Buffer>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    pub fn new(device: &DeviceContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory_usage: MemoryUsage) -> Result<Self, Error> {
        if size == 0 {
            return post_error(Error::Logic(String::from("buffers must not be empty")));
        }

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let allocation = Allocation::new(device, memory_usage, true, |functions| {
            let mut buffer = vk::Buffer::null();
            unsafe {
                vk_check!((functions.vk().create_buffer)(functions.handle(), &*create_info, std::ptr::null(), &mut buffer))?;
            }
            Ok(buffer)
        })?;
        log::debug!("Created buffer {:?} of size {} with usage {:?}", allocation.handle(), size, usage);

        Ok(Self {
            allocation,
            size,
            usage,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.allocation.handle()
    }

    pub fn weak(&self) -> Unowned<vk::Buffer> {
        unsafe { Unowned::new(self.handle()) }
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn allocation(&self) -> &Allocation<vk::Buffer> {
        &self.allocation
    }

    pub fn allocation_mut(&mut self) -> &mut Allocation<vk::Buffer> {
        &mut self.allocation
    }

    /// Copies `data` into the buffer starting at `offset` bytes.
    ///
    /// The buffer is mapped if needed and non coherent memory is flushed afterwards.
    pub fn write<T: Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> Result<(), Error> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as vk::DeviceSize;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return post_error(Error::Logic(format!("write of {} bytes at offset {} exceeds buffer size {}", len, offset, self.size)));
        }

        let ptr = self.allocation.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(offset as usize), bytes.len());
        }

        if !self.allocation.coherent() {
            self.allocation.flush(offset, len)?;
        }
        Ok(())
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle())
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}
