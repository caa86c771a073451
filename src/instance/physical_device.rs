use std::ffi::CStr;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;

use crate::error::Error;
use crate::instance::capabilities::{name_from_array, AvailableCapabilities};
use crate::instance::{DeviceFeature, InstanceContext, VulkanVersion};
use crate::util::vk::{enumerate, enumerate_infallible};

/// Properties of one queue family of a physical device.
#[derive(Copy, Clone, Debug)]
pub struct QueueFamily {
    index: u32,
    properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    const KIND_MASK: vk::QueueFlags = vk::QueueFlags::from_raw(vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::COMPUTE.as_raw() | vk::QueueFlags::TRANSFER.as_raw());

    pub fn new(index: u32, properties: vk::QueueFamilyProperties) -> Self {
        Self {
            index,
            properties,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn queue_count(&self) -> u32 {
        self.properties.queue_count
    }

    pub fn properties(&self) -> &vk::QueueFamilyProperties {
        &self.properties
    }

    pub fn graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    /// Graphics and compute queues always support transfer operations even if they do not
    /// report it.
    pub fn transfer(&self) -> bool {
        self.properties.queue_flags.intersects(vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    }

    /// Returns true if the family supports exactly the given graphics, compute and transfer
    /// kinds and no other of those three.
    pub fn strictly(&self, kinds: vk::QueueFlags) -> bool {
        (self.properties.queue_flags & Self::KIND_MASK) == (kinds & Self::KIND_MASK)
    }
}

/// A physical device with its properties captured at enumeration time.
#[derive(Clone)]
pub struct PhysicalDevice {
    instance: Arc<InstanceContext>,
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: Vec<QueueFamily>,
    capabilities: AvailableCapabilities,
    timeline_semaphore: bool,
}

impl PhysicalDevice {
    pub fn enumerate(instance: &Arc<InstanceContext>) -> Result<Vec<PhysicalDevice>, Error> {
        let vk = instance.vk();
        let handles = enumerate(|count, data| unsafe {
            (vk.enumerate_physical_devices)(instance.handle(), count, data)
        })?;

        let mut devices = Vec::with_capacity(handles.len());
        for handle in handles {
            devices.push(Self::new(instance.clone(), handle)?);
        }
        Ok(devices)
    }

    fn new(instance: Arc<InstanceContext>, handle: vk::PhysicalDevice) -> Result<Self, Error> {
        let vk = instance.vk();

        let mut properties = vk::PhysicalDeviceProperties::default();
        let mut features = vk::PhysicalDeviceFeatures::default();
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties::default();
        unsafe {
            (vk.get_physical_device_properties)(handle, &mut properties);
            (vk.get_physical_device_features)(handle, &mut features);
            (vk.get_physical_device_memory_properties)(handle, &mut memory_properties);
        }

        let queue_families = enumerate_infallible(|count, data| unsafe {
            (vk.get_physical_device_queue_family_properties)(handle, count, data)
        }).into_iter().enumerate().map(|(index, properties)| QueueFamily::new(index as u32, properties)).collect();

        let extensions = enumerate(|count, data| unsafe {
            (vk.enumerate_device_extension_properties)(handle, std::ptr::null(), count, data)
        })?;
        let api_version = VulkanVersion::from_raw(properties.api_version);
        let capabilities = AvailableCapabilities::from_properties(api_version, &extensions, &[]);
        let timeline_semaphore = Self::query_timeline_semaphore(&instance, handle, api_version)?;

        let device = Self {
            instance,
            handle,
            properties,
            features,
            memory_properties,
            queue_families,
            capabilities,
            timeline_semaphore,
        };
        log::debug!("Found physical device {:?}", device);

        Ok(device)
    }

    /// The 1.2 feature structure can only be queried through `vkGetPhysicalDeviceFeatures2`.
    fn query_timeline_semaphore(instance: &InstanceContext, handle: vk::PhysicalDevice, api_version: VulkanVersion) -> Result<bool, Error> {
        if !api_version.is_at_least(VulkanVersion::VK_1_2) || !instance.get_version().is_at_least(VulkanVersion::VK_1_1) {
            return Ok(false);
        }

        let vk_1_1 = instance.vk_1_1()?;
        let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut vulkan_12);
        unsafe {
            (vk_1_1.get_physical_device_features2)(handle, &mut *features);
        }
        Ok(vulkan_12.timeline_semaphore == vk::TRUE)
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn name(&self) -> String {
        name_from_array(&self.properties.device_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn api_version(&self) -> VulkanVersion {
        VulkanVersion::from_raw(self.properties.api_version)
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn is_feature_supported(&self, feature: DeviceFeature) -> bool {
        feature.get(&self.features)
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Always false for devices below 1.2 or if the instance is a 1.0 instance.
    pub fn supports_timeline_semaphores(&self) -> bool {
        self.timeline_semaphore
    }

    pub fn queue_families(&self) -> &[QueueFamily] {
        &self.queue_families
    }

    pub fn queue_family(&self, index: u32) -> Option<&QueueFamily> {
        self.queue_families.get(index as usize)
    }

    pub fn capabilities(&self) -> &AvailableCapabilities {
        &self.capabilities
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.capabilities.supports_extension(name)
    }

    /// Queries the format properties of a format. Not cached.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let mut properties = vk::FormatProperties::default();
        unsafe {
            (self.instance.vk().get_physical_device_format_properties)(self.handle, format, &mut properties);
        }
        properties
    }
}

impl Debug for PhysicalDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("name", &self.name())
            .field("handle", &self.handle)
            .field("api_version", &self.api_version())
            .field("queue_families", &self.queue_families.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> QueueFamily {
        QueueFamily::new(0, vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        })
    }

    #[test]
    fn queue_kinds() {
        let graphics = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::SPARSE_BINDING);
        assert!(graphics.graphics());
        assert!(graphics.transfer());
        assert!(graphics.strictly(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE));
        assert!(!graphics.strictly(vk::QueueFlags::GRAPHICS));

        let transfer = family(vk::QueueFlags::TRANSFER);
        assert!(transfer.strictly(vk::QueueFlags::TRANSFER));
        assert!(!transfer.compute());
    }
}
