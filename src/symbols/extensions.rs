//! Entry point tables of the extensions wrapped by this crate.
//!
//! Each table is paired with the name of the extension providing it so that a missing
//! extension can be reported as [`crate::error::Error::ExtensionNotEnabled`].

use std::ffi::CStr;

use ash::vk;

use super::fn_table;

fn_table! {
    pub struct DebugUtilsFn {
        create_debug_utils_messenger => vkCreateDebugUtilsMessengerEXT,
        destroy_debug_utils_messenger => vkDestroyDebugUtilsMessengerEXT,
    }
}

impl DebugUtilsFn {
    pub fn extension_name() -> &'static CStr {
        vk::ExtDebugUtilsFn::name()
    }
}

fn_table! {
    pub struct SwapchainKhrFn {
        create_swapchain => vkCreateSwapchainKHR,
        destroy_swapchain => vkDestroySwapchainKHR,
        get_swapchain_images => vkGetSwapchainImagesKHR,
        acquire_next_image => vkAcquireNextImageKHR,
        queue_present => vkQueuePresentKHR,
    }
}

impl SwapchainKhrFn {
    pub fn extension_name() -> &'static CStr {
        vk::KhrSwapchainFn::name()
    }
}
