use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle as _;

use crate::device::{DeviceContext, DeviceFunctions};
use crate::error::{post_error, Error, VulkanError};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::vk_check;

/// Blocks until the fences are signaled, without a deadline.
pub const INFINITE_TIMEOUT: u64 = u64::MAX;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// A binary host observable synchronization primitive.
pub struct Fence {
    handle: DeviceHandle<vk::Fence>,
}

impl Fence {
    pub fn new(device: &DeviceContext, signaled: bool) -> Result<Self, Error> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut fence = vk::Fence::null();
            unsafe {
                vk_check!((functions.vk().create_fence)(functions.handle(), &*create_info, std::ptr::null(), &mut fence))?;
            }
            Ok(fence)
        })?;

        Ok(Self { handle })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::Fence> {
        self.handle.weak()
    }

    fn functions(&self) -> &Arc<DeviceFunctions> {
        self.handle.owner()
    }

    /// Returns the fence to the unsignaled state.
    pub fn reset(&mut self) -> Result<(), Error> {
        let functions = self.functions();
        let fence = self.handle();
        unsafe {
            vk_check!((functions.vk().reset_fences)(functions.handle(), 1, &fence))
        }
    }

    /// Polls the fence without blocking.
    pub fn signaled(&self) -> Result<bool, Error> {
        let functions = self.functions();
        match unsafe { (functions.vk().get_fence_status)(functions.handle(), self.handle()) } {
            vk::Result::SUCCESS => Ok(true),
            vk::Result::NOT_READY => Ok(false),
            result => post_error(Error::Vulkan(VulkanError::new(result, file!(), line!()))),
        }
    }

    /// Waits up to `timeout` nanoseconds for the fence. A timeout of zero polls.
    pub fn wait(&self, timeout: u64) -> Result<WaitResult, Error> {
        Self::wait_native(self.functions(), &[self.handle()], true, timeout)
    }

    /// Waits until any of the fences is signaled. All fences must belong to the same device.
    pub fn wait_any(fences: &[&Fence], timeout: u64) -> Result<WaitResult, Error> {
        Self::wait_many(fences, false, timeout)
    }

    /// Waits until all of the fences are signaled. All fences must belong to the same device.
    pub fn wait_all(fences: &[&Fence], timeout: u64) -> Result<WaitResult, Error> {
        Self::wait_many(fences, true, timeout)
    }

    fn wait_many(fences: &[&Fence], wait_all: bool, timeout: u64) -> Result<WaitResult, Error> {
        let first = match fences.first() {
            Some(fence) => fence.functions(),
            None => return Ok(WaitResult::Signaled),
        };
        if fences.iter().any(|fence| !Arc::ptr_eq(fence.functions(), first)) {
            return post_error(Error::Logic(String::from("fences passed to a single wait must belong to the same device")));
        }

        let handles: Vec<_> = fences.iter().map(|fence| fence.handle()).collect();
        Self::wait_native(first, &handles, wait_all, timeout)
    }

    fn wait_native(functions: &DeviceFunctions, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> Result<WaitResult, Error> {
        let wait_all = if wait_all { vk::TRUE } else { vk::FALSE };
        let result = unsafe {
            (functions.vk().wait_for_fences)(functions.handle(), fences.len() as u32, fences.as_ptr(), wait_all, timeout)
        };
        match result {
            vk::Result::SUCCESS => Ok(WaitResult::Signaled),
            vk::Result::TIMEOUT => Ok(WaitResult::TimedOut),
            result => post_error(Error::Vulkan(VulkanError::new(result, file!(), line!()))),
        }
    }
}

impl Debug for Fence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkFence({:#016X})", self.handle().as_raw()))
    }
}

/// A binary semaphore only observable by the device.
pub struct Semaphore {
    handle: DeviceHandle<vk::Semaphore>,
}

impl Semaphore {
    pub fn new(device: &DeviceContext) -> Result<Self, Error> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut semaphore = vk::Semaphore::null();
            unsafe {
                vk_check!((functions.vk().create_semaphore)(functions.handle(), &*create_info, std::ptr::null(), &mut semaphore))?;
            }
            Ok(semaphore)
        })?;

        Ok(Self { handle })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::Semaphore> {
        self.handle.weak()
    }
}

impl Debug for Semaphore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkSemaphore({:#016X})", self.handle().as_raw()))
    }
}

/// A semaphore carrying a monotonically increasing 64 bit counter which the host can signal,
/// read and wait on.
///
/// Needs a device of at least version 1.2 created with timeline semaphores enabled.
pub struct TimelineSemaphore {
    handle: DeviceHandle<vk::Semaphore>,
}

impl TimelineSemaphore {
    pub fn new(device: &DeviceContext, initial_value: u64) -> Result<Self, Error> {
        let functions = device.get_functions();
        functions.core().v1_2()?;
        if !functions.timeline_semaphores_enabled() {
            return post_error(Error::Logic(String::from("timeline semaphores were not enabled on the device")));
        }

        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::builder()
            .push_next(&mut type_info);

        let handle = Handle::create(functions.clone(), |functions| {
            let mut semaphore = vk::Semaphore::null();
            unsafe {
                vk_check!((functions.vk().create_semaphore)(functions.handle(), &*create_info, std::ptr::null(), &mut semaphore))?;
            }
            Ok(semaphore)
        })?;

        Ok(Self { handle })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::Semaphore> {
        self.handle.weak()
    }

    fn functions(&self) -> &Arc<DeviceFunctions> {
        self.handle.owner()
    }

    /// Reads the current counter value.
    pub fn value(&self) -> Result<u64, Error> {
        let functions = self.functions();
        let v1_2 = functions.core().v1_2()?;
        let mut value = 0;
        unsafe {
            vk_check!((v1_2.get_semaphore_counter_value)(functions.handle(), self.handle(), &mut value))?;
        }
        Ok(value)
    }

    /// Signals the semaphore from the host. The value must be greater than the current value.
    pub fn signal(&self, value: u64) -> Result<(), Error> {
        let current = self.value()?;
        if value <= current {
            return post_error(Error::Logic(format!("timeline semaphore signaled with {} but its value is already {}", value, current)));
        }

        let functions = self.functions();
        let v1_2 = functions.core().v1_2()?;
        let signal_info = vk::SemaphoreSignalInfo::builder()
            .semaphore(self.handle())
            .value(value);
        unsafe {
            vk_check!((v1_2.signal_semaphore)(functions.handle(), &*signal_info))
        }
    }

    /// Waits up to `timeout` nanoseconds until the counter reaches `value`.
    pub fn wait(&self, value: u64, timeout: u64) -> Result<WaitResult, Error> {
        Self::wait_native(self.functions(), &[self.handle()], &[value], vk::SemaphoreWaitFlags::empty(), timeout)
    }

    /// Waits until every semaphore reaches its value. All semaphores must belong to the same
    /// device.
    pub fn wait_all(waits: &[(&TimelineSemaphore, u64)], timeout: u64) -> Result<WaitResult, Error> {
        Self::wait_many(waits, vk::SemaphoreWaitFlags::empty(), timeout)
    }

    /// Waits until any semaphore reaches its value.
    pub fn wait_any(waits: &[(&TimelineSemaphore, u64)], timeout: u64) -> Result<WaitResult, Error> {
        Self::wait_many(waits, vk::SemaphoreWaitFlags::ANY, timeout)
    }

    fn wait_many(waits: &[(&TimelineSemaphore, u64)], flags: vk::SemaphoreWaitFlags, timeout: u64) -> Result<WaitResult, Error> {
        let first = match waits.first() {
            Some((semaphore, _)) => semaphore.functions(),
            None => return Ok(WaitResult::Signaled),
        };
        if waits.iter().any(|(semaphore, _)| !Arc::ptr_eq(semaphore.functions(), first)) {
            return post_error(Error::Logic(String::from("semaphores passed to a single wait must belong to the same device")));
        }

        let handles: Vec<_> = waits.iter().map(|(semaphore, _)| semaphore.handle()).collect();
        let values: Vec<_> = waits.iter().map(|(_, value)| *value).collect();
        Self::wait_native(first, &handles, &values, flags, timeout)
    }

    fn wait_native(functions: &DeviceFunctions, semaphores: &[vk::Semaphore], values: &[u64], flags: vk::SemaphoreWaitFlags, timeout: u64) -> Result<WaitResult, Error> {
        let v1_2 = functions.core().v1_2()?;
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .flags(flags)
            .semaphores(semaphores)
            .values(values);
        match unsafe { (v1_2.wait_semaphores)(functions.handle(), &*wait_info, timeout) } {
            vk::Result::SUCCESS => Ok(WaitResult::Signaled),
            vk::Result::TIMEOUT => Ok(WaitResult::TimedOut),
            result => post_error(Error::Vulkan(VulkanError::new(result, file!(), line!()))),
        }
    }
}

impl Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkSemaphore({:#016X}, timeline)", self.handle().as_raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::VulkanVersion;
    use crate::util::test::{make_test_device, make_test_device_with, make_test_device_with_version, MockDriver};

    fn make_timeline_device() -> Arc<DeviceContext> {
        make_test_device_with(VulkanVersion::VK_1_2, |config| config.enable_timeline_semaphores().unwrap())
    }

    #[test]
    fn unsignaled_fence_times_out_immediately() {
        let device = make_test_device();
        let fence = Fence::new(&device, false).unwrap();

        assert_eq!(fence.wait(0).unwrap(), WaitResult::TimedOut);
        assert!(!fence.signaled().unwrap());
    }

    #[test]
    fn signaled_fence_does_not_block() {
        let device = make_test_device();
        let mut fence = Fence::new(&device, true).unwrap();

        assert_eq!(fence.wait(INFINITE_TIMEOUT).unwrap(), WaitResult::Signaled);
        assert!(fence.signaled().unwrap());

        fence.reset().unwrap();
        assert_eq!(fence.wait(0).unwrap(), WaitResult::TimedOut);
    }

    #[test]
    fn wait_all_needs_every_fence() {
        let device = make_test_device();
        let a = Fence::new(&device, true).unwrap();
        let b = Fence::new(&device, false).unwrap();

        assert_eq!(Fence::wait_all(&[&a, &b], 0).unwrap(), WaitResult::TimedOut);
        assert_eq!(Fence::wait_any(&[&a, &b], 0).unwrap(), WaitResult::Signaled);

        MockDriver::signal_fence(b.handle());
        assert_eq!(Fence::wait_all(&[&a, &b], 0).unwrap(), WaitResult::Signaled);
        assert_eq!(Fence::wait_all(&[], 0).unwrap(), WaitResult::Signaled);
    }

    #[test]
    fn fences_of_different_devices_are_rejected() {
        let first = make_test_device();
        let second = make_test_device();
        let a = Fence::new(&first, true).unwrap();
        let b = Fence::new(&second, true).unwrap();

        match Fence::wait_all(&[&a, &b], 0) {
            Err(Error::Logic(_)) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn fence_destroyed_on_drop() {
        let device = make_test_device();
        let fence = Fence::new(&device, false).unwrap();
        let handle = fence.handle();
        drop(fence);

        assert!(MockDriver::trace().contains(&format!("vkDestroyFence({:#x})", vk::Handle::as_raw(handle))));
    }

    #[test]
    fn timeline_semaphores_need_a_1_2_device() {
        let device = make_test_device_with_version(VulkanVersion::VK_1_1);
        match TimelineSemaphore::new(&device, 0) {
            Err(Error::SymbolsMissing { requested, .. }) => assert_eq!(requested, VulkanVersion::VK_1_2),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn timeline_semaphores_need_the_feature() {
        let device = make_test_device_with_version(VulkanVersion::VK_1_2);
        assert!(matches!(TimelineSemaphore::new(&device, 0), Err(Error::Logic(_))));
    }

    #[test]
    fn host_signals_advance_the_counter() {
        let device = make_timeline_device();
        let semaphore = TimelineSemaphore::new(&device, 3).unwrap();
        assert_eq!(semaphore.value().unwrap(), 3);
        assert_eq!(semaphore.wait(3, 0).unwrap(), WaitResult::Signaled);
        assert_eq!(semaphore.wait(5, 0).unwrap(), WaitResult::TimedOut);

        semaphore.signal(5).unwrap();
        assert_eq!(semaphore.value().unwrap(), 5);
        assert_eq!(semaphore.wait(5, INFINITE_TIMEOUT).unwrap(), WaitResult::Signaled);
    }

    #[test]
    fn counter_never_moves_backwards() {
        let device = make_timeline_device();
        let semaphore = TimelineSemaphore::new(&device, 4).unwrap();
        MockDriver::clear_trace();

        assert!(matches!(semaphore.signal(4), Err(Error::Logic(_))));
        assert!(matches!(semaphore.signal(2), Err(Error::Logic(_))));
        assert!(MockDriver::trace().is_empty());
        assert_eq!(semaphore.value().unwrap(), 4);
    }

    #[test]
    fn timeline_wait_any_and_all() {
        let device = make_timeline_device();
        let a = TimelineSemaphore::new(&device, 1).unwrap();
        let b = TimelineSemaphore::new(&device, 0).unwrap();

        assert_eq!(TimelineSemaphore::wait_all(&[(&a, 1), (&b, 1)], 0).unwrap(), WaitResult::TimedOut);
        assert_eq!(TimelineSemaphore::wait_any(&[(&a, 1), (&b, 1)], 0).unwrap(), WaitResult::Signaled);

        b.signal(1).unwrap();
        assert_eq!(TimelineSemaphore::wait_all(&[(&a, 1), (&b, 1)], 0).unwrap(), WaitResult::Signaled);
        assert_eq!(TimelineSemaphore::wait_all(&[], 0).unwrap(), WaitResult::Signaled);
    }

    #[test]
    fn timeline_semaphore_destroyed_on_drop() {
        let device = make_timeline_device();
        let semaphore = TimelineSemaphore::new(&device, 0).unwrap();
        let handle = semaphore.handle();
        drop(semaphore);

        assert!(MockDriver::trace().contains(&format!("vkDestroySemaphore({:#x})", vk::Handle::as_raw(handle))));
    }
}
