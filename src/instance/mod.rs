//! Loader, instance and physical device level objects.

pub mod capabilities;
pub mod debug_messenger;
pub mod features;
pub mod init;
pub mod instance;
pub mod library;
pub mod physical_device;
pub mod version;

pub use capabilities::{AvailableCapabilities, CapabilityRequest, CapabilitySet, ImplicitCapability};
pub use debug_messenger::{DebugMessenger, DebugMessengerCallback, DebugMessengerConfig, RustLogDebugMessenger};
pub use features::DeviceFeature;
pub use init::{create_instance, InstanceCreateConfig};
pub use instance::InstanceContext;
pub use library::Library;
pub use physical_device::{PhysicalDevice, QueueFamily};
pub use version::VulkanVersion;
