use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;

use crate::device::{DeviceContext, DeviceFunctions};
use crate::error::{Error, VulkanError};
use crate::objects::handle::{Destroy, DeviceHandle, Handle, Unowned};
use crate::objects::sync::{Fence, Semaphore};
use crate::util::vk::enumerate;
use crate::vk_check;

impl Destroy<vk::SwapchainKHR> for DeviceFunctions {
    unsafe fn destroy(&self, handle: vk::SwapchainKHR) -> Result<(), Error> {
        let swapchain_khr = self.swapchain_khr()?;
        (swapchain_khr.destroy_swapchain)(self.handle(), handle, std::ptr::null());
        Ok(())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AcquireStatus {
    Successful(u32),
    /// The image can be used but the swapchain should be recreated.
    Suboptimal(u32),
    /// No image was available and the timeout was 0.
    NotReady,
    Timeout,
    OutOfDate,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PresentStatus {
    Successful,
    Suboptimal,
    OutOfDate,
}

/// A swapchain and the images it owns. Needs `VK_KHR_swapchain` to be enabled on the device.
pub struct Swapchain {
    handle: DeviceHandle<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(device: &DeviceContext, create_info: &vk::SwapchainCreateInfoKHR) -> Result<Self, Error> {
        let functions = device.get_functions();
        let swapchain_khr = *functions.swapchain_khr()?;

        let handle = Handle::create(functions.clone(), |functions| {
            let mut swapchain = vk::SwapchainKHR::null();
            unsafe {
                vk_check!((swapchain_khr.create_swapchain)(functions.handle(), create_info, std::ptr::null(), &mut swapchain))?;
            }
            Ok(swapchain)
        })?;

        let images = enumerate(|count, data| unsafe {
            (swapchain_khr.get_swapchain_images)(functions.handle(), handle.raw(), count, data)
        })?;
        log::debug!("Created swapchain {:?} with {} images of {:?}", handle.raw(), images.len(), create_info.image_extent);

        Ok(Self {
            handle,
            images,
            format: create_info.image_format,
            extent: create_info.image_extent,
        })
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::SwapchainKHR> {
        self.handle.weak()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn functions(&self) -> &Arc<DeviceFunctions> {
        self.handle.owner()
    }

    /// Acquires the next presentable image. Out of date and suboptimal swapchains are reported
    /// through the returned status, any other failure as an error.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: Option<&Semaphore>, fence: Option<&Fence>) -> Result<AcquireStatus, Error> {
        let functions = self.functions();
        let swapchain_khr = functions.swapchain_khr()?;

        let semaphore = semaphore.map(Semaphore::handle).unwrap_or(vk::Semaphore::null());
        let fence = fence.map(Fence::handle).unwrap_or(vk::Fence::null());
        let mut index = 0u32;
        let result = unsafe {
            (swapchain_khr.acquire_next_image)(functions.handle(), self.handle(), timeout, semaphore, fence, &mut index)
        };
        match result {
            vk::Result::SUCCESS => Ok(AcquireStatus::Successful(index)),
            vk::Result::SUBOPTIMAL_KHR => Ok(AcquireStatus::Suboptimal(index)),
            vk::Result::NOT_READY => Ok(AcquireStatus::NotReady),
            vk::Result::TIMEOUT => Ok(AcquireStatus::Timeout),
            vk::Result::ERROR_OUT_OF_DATE_KHR => Ok(AcquireStatus::OutOfDate),
            result => {
                log::error!("vkAcquireNextImageKHR failed with {:?}", result);
                crate::error::post_error(Error::Vulkan(VulkanError::new(result, file!(), line!())))
            }
        }
    }
}

impl Debug for Swapchain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle())
            .field("images", &self.images.len())
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish()
    }
}
