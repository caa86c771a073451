use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::device::{DeviceContext, DeviceFunctions};
use crate::error::Error;
use crate::recorder::{CommandBuffer, Level, Primary, PrimaryCommandBuffer, Secondary, SecondaryCommandBuffer};
use crate::vk_check;

/// The part of a command pool its command buffers keep alive. Never destroys the native pool.
pub struct CommandPoolShared {
    functions: Arc<DeviceFunctions>,
    handle: vk::CommandPool,
    flags: vk::CommandPoolCreateFlags,
    family: u32,
    reset_epoch: AtomicU64,
    destroyed: AtomicBool,
}

impl CommandPoolShared {
    pub fn functions(&self) -> &Arc<DeviceFunctions> {
        &self.functions
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    pub fn flags(&self) -> vk::CommandPoolCreateFlags {
        self.flags
    }

    pub fn queue_family(&self) -> u32 {
        self.family
    }

    pub fn allows_individual_reset(&self) -> bool {
        self.flags.contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Incremented every time the pool is reset.
    pub fn reset_epoch(&self) -> u64 {
        self.reset_epoch.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Allocates command buffers for one queue family.
///
/// Command buffers may outlive their pool as rust objects. Once the pool is destroyed they are
/// not freed again and must not be used anymore.
pub struct CommandPool {
    shared: Arc<CommandPoolShared>,
}

impl CommandPool {
    pub fn new(device: &DeviceContext, queue_family: u32, flags: vk::CommandPoolCreateFlags) -> Result<Self, Error> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family);

        let functions = device.get_functions().clone();
        let mut handle = vk::CommandPool::null();
        unsafe {
            vk_check!((functions.vk().create_command_pool)(functions.handle(), &*create_info, std::ptr::null(), &mut handle))?;
        }

        Ok(Self {
            shared: Arc::new(CommandPoolShared {
                functions,
                handle,
                flags,
                family: queue_family,
                reset_epoch: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
            })
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.shared.handle
    }

    pub fn flags(&self) -> vk::CommandPoolCreateFlags {
        self.shared.flags
    }

    pub fn allocate_primary(&mut self) -> Result<PrimaryCommandBuffer, Error> {
        self.allocate::<Primary>()
    }

    pub fn allocate_secondary(&mut self) -> Result<SecondaryCommandBuffer, Error> {
        self.allocate::<Secondary>()
    }

    fn allocate<L: Level>(&mut self) -> Result<CommandBuffer<L>, Error> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.shared.handle)
            .level(L::NATIVE)
            .command_buffer_count(1);

        let functions = &self.shared.functions;
        let mut handle = vk::CommandBuffer::null();
        unsafe {
            vk_check!((functions.vk().allocate_command_buffers)(functions.handle(), &*allocate_info, &mut handle))?;
        }

        Ok(CommandBuffer::new(self.shared.clone(), handle))
    }

    /// Resets every command buffer allocated from this pool back to the initial state.
    pub fn reset(&mut self, release_resources: bool) -> Result<(), Error> {
        let flags = if release_resources {
            vk::CommandPoolResetFlags::RELEASE_RESOURCES
        } else {
            vk::CommandPoolResetFlags::empty()
        };

        let functions = &self.shared.functions;
        unsafe {
            vk_check!((functions.vk().reset_command_pool)(functions.handle(), self.shared.handle, flags))?;
        }
        self.shared.reset_epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Returns unused memory to the system. Needs a device of version 1.1 or higher.
    pub fn trim(&mut self) -> Result<(), Error> {
        let functions = &self.shared.functions;
        let v1_1 = functions.core().v1_1()?;
        unsafe {
            (v1_1.trim_command_pool)(functions.handle(), self.shared.handle, vk::CommandPoolTrimFlags::empty());
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.shared.destroyed.store(true, Ordering::Release);
        let functions = &self.shared.functions;
        unsafe {
            (functions.vk().destroy_command_pool)(functions.handle(), self.shared.handle, std::ptr::null());
        }
    }
}

impl Debug for CommandPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("handle", &self.shared.handle)
            .field("family", &self.shared.family)
            .field("flags", &self.shared.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::BufferState;
    use crate::util::test::{make_test_device, MockDriver};

    #[test]
    fn buffers_are_not_freed_after_pool_destruction() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let first = pool.allocate_primary().unwrap();
        let second = pool.allocate_secondary().unwrap();

        drop(first);
        drop(pool);
        drop(second);

        let frees = MockDriver::trace().iter().filter(|call| call.starts_with("vkFreeCommandBuffers")).count();
        assert_eq!(frees, 1);
    }

    #[test]
    fn pool_reset_returns_buffers_to_initial() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();

        buffer.record(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap().end().unwrap();
        assert_eq!(buffer.state(), BufferState::Ended);
        assert!(buffer.record(vk::CommandBufferUsageFlags::empty()).is_err());

        pool.reset(false).unwrap();
        assert_eq!(buffer.state(), BufferState::Initial);
        assert!(buffer.record(vk::CommandBufferUsageFlags::empty()).is_ok());
    }

    #[test]
    fn trim_needs_1_1() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::TRANSIENT).unwrap();
        assert!(matches!(pool.trim(), Err(Error::SymbolsMissing { .. })));
    }
}
