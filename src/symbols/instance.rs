use crate::error::{post_error, Error};
use crate::instance::VulkanVersion;

use super::{check_table, fn_table, walk_tiers, SymbolLoader, TierLoader};

fn_table! {
    pub struct InstanceFnV1_0 {
        destroy_instance => vkDestroyInstance,
        enumerate_physical_devices => vkEnumeratePhysicalDevices,
        get_physical_device_properties => vkGetPhysicalDeviceProperties,
        get_physical_device_features => vkGetPhysicalDeviceFeatures,
        get_physical_device_queue_family_properties => vkGetPhysicalDeviceQueueFamilyProperties,
        get_physical_device_memory_properties => vkGetPhysicalDeviceMemoryProperties,
        get_physical_device_format_properties => vkGetPhysicalDeviceFormatProperties,
        enumerate_device_extension_properties => vkEnumerateDeviceExtensionProperties,
        create_device => vkCreateDevice,
        get_device_proc_addr => vkGetDeviceProcAddr,
    }
}

fn_table! {
    pub struct InstanceFnV1_1 {
        get_physical_device_properties2 => vkGetPhysicalDeviceProperties2,
        get_physical_device_features2 => vkGetPhysicalDeviceFeatures2,
    }
}

/// The core instance tables up to the negotiated version.
#[derive(Copy, Clone)]
pub struct InstanceCore {
    version: VulkanVersion,
    v1_0: InstanceFnV1_0,
    v1_1: Option<InstanceFnV1_1>,
}

impl InstanceCore {
    /// Versions above the last entry are rejected by the walk.
    const TIERS: [(VulkanVersion, TierLoader<InstanceCore>); 4] = [
        (VulkanVersion::VK_1_0, Self::load_1_0 as TierLoader<InstanceCore>),
        (VulkanVersion::VK_1_1, Self::load_1_1 as TierLoader<InstanceCore>),
        (VulkanVersion::VK_1_2, Self::load_1_1 as TierLoader<InstanceCore>),
        (VulkanVersion::VK_1_3, Self::load_1_1 as TierLoader<InstanceCore>),
    ];

    /// # Safety
    /// The loader must return function pointers matching the signature of the requested symbol.
    pub unsafe fn resolve(negotiated: VulkanVersion, loader: &mut SymbolLoader) -> Result<Self, Error> {
        walk_tiers(&Self::TIERS, negotiated, loader)
    }

    unsafe fn load_1_0(loader: &mut SymbolLoader, version: VulkanVersion) -> Result<Self, Error> {
        Ok(Self {
            version,
            v1_0: check_table(InstanceFnV1_0::NAME, InstanceFnV1_0::load(loader))?,
            v1_1: None,
        })
    }

    unsafe fn load_1_1(loader: &mut SymbolLoader, version: VulkanVersion) -> Result<Self, Error> {
        let mut core = Self::load_1_0(loader, version)?;
        core.v1_1 = Some(check_table(InstanceFnV1_1::NAME, InstanceFnV1_1::load(loader))?);
        Ok(core)
    }

    pub fn version(&self) -> VulkanVersion {
        self.version
    }

    pub fn v1_0(&self) -> &InstanceFnV1_0 {
        &self.v1_0
    }

    pub fn v1_1(&self) -> Result<&InstanceFnV1_1, Error> {
        match &self.v1_1 {
            Some(table) => Ok(table),
            None => post_error(Error::SymbolsMissing { loaded: self.version, requested: VulkanVersion::VK_1_1 }),
        }
    }
}
