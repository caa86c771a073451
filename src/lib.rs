//! Safe wrappers around the vulkan api.
//!
//! The crate loads the vulkan entry points itself, negotiates api versions and capabilities with
//! the driver and wraps every native object in an owning type which destroys it exactly once.
//! Command recording is checked against the command buffer protocol and SPIR-V modules can be
//! reflected and linked before they are handed to the device.

pub mod error;
pub mod util;
pub mod symbols;
pub mod instance;
pub mod device;
pub mod allocator;
pub mod objects;
pub mod recorder;
pub mod shader;

pub use error::{Error, ErrorCategory, VulkanError};
pub use util::id::{NameId, ObjectId};

#[cfg(any(test, feature = "test_utils"))]
pub use util::test as test_utils;

pub mod prelude {
    pub use crate::error::Error;
    pub use crate::instance::{create_instance, InstanceContext, InstanceCreateConfig, Library, PhysicalDevice, VulkanVersion};
    pub use crate::device::{create_device, DeviceContext, DeviceCreateConfig, Queue};
    pub use crate::allocator::MemoryUsage;
    pub use crate::recorder::{CommandBuffer, PrimaryCommandBuffer, Recorder, SecondaryCommandBuffer};
}
