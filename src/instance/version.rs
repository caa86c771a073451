use std::fmt::{Debug, Display, Formatter};

use ash::vk;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VulkanVersion(u32);

impl VulkanVersion {
    pub const VK_1_0: VulkanVersion = VulkanVersion(vk::API_VERSION_1_0);
    pub const VK_1_1: VulkanVersion = VulkanVersion(vk::API_VERSION_1_1);
    pub const VK_1_2: VulkanVersion = VulkanVersion(vk::API_VERSION_1_2);
    pub const VK_1_3: VulkanVersion = VulkanVersion(vk::API_VERSION_1_3);

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub const fn get_major(&self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub const fn get_minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub const fn get_patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    pub const fn get_raw(&self) -> u32 {
        self.0
    }

    /// Strips the variant and patch so that versions can be compared by tier.
    pub const fn tier(&self) -> (u32, u32) {
        (self.get_major(), self.get_minor())
    }

    /// Returns true if the major.minor of this version is at least the one of `other`.
    /// Patch levels are ignored.
    pub const fn is_at_least(&self, other: VulkanVersion) -> bool {
        self.get_major() > other.get_major() || (self.get_major() == other.get_major() && self.get_minor() >= other.get_minor())
    }
}

impl From<VulkanVersion> for u32 {
    fn from(version: VulkanVersion) -> Self {
        version.0
    }
}

impl Debug for VulkanVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("VulkanVersion([{}] {}.{}.{})", vk::api_version_variant(self.0), self.get_major(), self.get_minor(), self.get_patch()))
    }
}

impl Display for VulkanVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}.{}", self.get_major(), self.get_minor()))
    }
}
