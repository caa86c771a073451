//! Tracking of api versions, extensions and layers.
//!
//! A lower layer (the library or a physical device) reports what it supports as
//! [`AvailableCapabilities`]. Users collect their requirements in a [`CapabilityRequest`] which
//! is resolved against the available capabilities into an immutable [`CapabilitySet`].

use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use ash::vk;

use crate::error::{post_error, Error};
use crate::instance::VulkanVersion;
use crate::util::id::NameId;

pub const KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_KHR_get_physical_device_properties2\0") };
pub const EXT_MEMORY_BUDGET: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_EXT_memory_budget\0") };
pub const EXT_DEBUG_UTILS: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_EXT_debug_utils\0") };
pub const KHR_SWAPCHAIN: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_KHR_swapchain\0") };
pub const LAYER_KHRONOS_VALIDATION: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Converts a fixed size name array as found in native property structs.
///
/// Returns `None` if the array is not nul terminated.
pub(crate) fn name_from_array(name: &[c_char]) -> Option<CString> {
    let bytes: Vec<u8> = name.iter().take_while(|c| **c != 0).map(|c| *c as u8).collect();
    if bytes.len() == name.len() {
        return None;
    }
    CString::new(bytes).ok()
}

/// Capabilities reported by a lower layer.
#[derive(Clone, Debug)]
pub struct AvailableCapabilities {
    version: VulkanVersion,
    extensions: HashMap<NameId, CString>,
    layers: HashMap<NameId, CString>,
}

impl AvailableCapabilities {
    pub fn new<E, L>(version: VulkanVersion, extensions: E, layers: L) -> Self
        where E: IntoIterator<Item=CString>, L: IntoIterator<Item=CString> {

        Self {
            version,
            extensions: extensions.into_iter().map(|name| (NameId::from_cstr(&name), name)).collect(),
            layers: layers.into_iter().map(|name| (NameId::from_cstr(&name), name)).collect(),
        }
    }

    /// Builds the capabilities from native property arrays. Names which are not nul terminated
    /// are skipped with a warning.
    pub fn from_properties(version: VulkanVersion, extensions: &[vk::ExtensionProperties], layers: &[vk::LayerProperties]) -> Self {
        let extensions = extensions.iter().filter_map(|ext| {
            let name = name_from_array(&ext.extension_name);
            if name.is_none() {
                log::warn!("Skipping extension with unterminated name");
            }
            name
        });
        let layers = layers.iter().filter_map(|layer| {
            let name = name_from_array(&layer.layer_name);
            if name.is_none() {
                log::warn!("Skipping layer with unterminated name");
            }
            name
        });

        Self::new(version, extensions, layers)
    }

    pub fn version(&self) -> VulkanVersion {
        self.version
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.contains_key(&NameId::from_cstr(name))
    }

    pub fn supports_layer(&self, name: &CStr) -> bool {
        self.layers.contains_key(&NameId::from_cstr(name))
    }

    pub fn extensions(&self) -> impl Iterator<Item=&CStr> {
        self.extensions.values().map(CString::as_c_str)
    }

    pub fn layers(&self) -> impl Iterator<Item=&CStr> {
        self.layers.values().map(CString::as_c_str)
    }
}

/// An extension which is enabled automatically if it is supported.
#[derive(Copy, Clone, Debug)]
pub struct ImplicitCapability {
    pub extension: &'static CStr,
    pub when: bool,
}

impl ImplicitCapability {
    pub const fn new(extension: &'static CStr) -> Self {
        Self {
            extension,
            when: true,
        }
    }

    /// Only applies the rule if the condition holds.
    pub const fn when(mut self, condition: bool) -> Self {
        self.when = condition;
        self
    }
}

/// Names in request order with a hash set to keep requests idempotent.
#[derive(Clone, Debug, Default)]
struct NameList {
    names: Vec<CString>,
    ids: HashSet<NameId>,
}

impl NameList {
    fn insert(&mut self, name: &CStr) -> bool {
        if self.ids.insert(NameId::from_cstr(name)) {
            self.names.push(CString::from(name));
            true
        } else {
            false
        }
    }

    fn contains(&self, name: &CStr) -> bool {
        self.ids.contains(&NameId::from_cstr(name))
    }
}

/// Collects a requested version together with requested extensions and layers.
#[derive(Clone, Debug)]
pub struct CapabilityRequest {
    version: VulkanVersion,
    extensions: NameList,
    layers: NameList,
}

impl CapabilityRequest {
    pub fn new(version: VulkanVersion) -> Self {
        Self {
            version,
            extensions: NameList::default(),
            layers: NameList::default(),
        }
    }

    pub fn set_version(&mut self, version: VulkanVersion) {
        self.version = version;
    }

    pub fn version(&self) -> VulkanVersion {
        self.version
    }

    /// Requests an extension. Returns false if it was already requested.
    pub fn add_extension(&mut self, name: &CStr) -> bool {
        self.extensions.insert(name)
    }

    /// Requests a layer. Returns false if it was already requested.
    pub fn add_layer(&mut self, name: &CStr) -> bool {
        self.layers.insert(name)
    }

    pub fn is_extension_requested(&self, name: &CStr) -> bool {
        self.extensions.contains(name)
    }

    pub fn is_layer_requested(&self, name: &CStr) -> bool {
        self.layers.contains(name)
    }

    /// Verifies every request against the available capabilities.
    ///
    /// The version is checked first, then layers and then extensions, each in request order.
    /// The first unsupported item is reported. Afterwards the implicit rules are applied in
    /// order. They only ever add extensions.
    pub fn resolve(&self, available: &AvailableCapabilities, implicit: &[ImplicitCapability]) -> Result<CapabilitySet, Error> {
        if !available.version().is_at_least(self.version) {
            return post_error(Error::ApiVersionUnsupported {
                supported: available.version(),
                requested: self.version,
            });
        }

        for layer in &self.layers.names {
            if !available.supports_layer(layer) {
                return post_error(Error::LayerUnsupported(layer.clone()));
            }
        }

        for extension in &self.extensions.names {
            if !available.supports_extension(extension) {
                return post_error(Error::ExtensionUnsupported(extension.clone()));
            }
        }

        let mut extensions = self.extensions.clone();
        for rule in implicit {
            if rule.when && available.supports_extension(rule.extension) && extensions.insert(rule.extension) {
                log::debug!("Implicitly enabling extension {:?}", rule.extension);
            }
        }

        Ok(CapabilitySet {
            version: self.version,
            extensions,
            layers: self.layers.clone(),
        })
    }
}

/// The immutable result of a resolved [`CapabilityRequest`].
#[derive(Clone, Debug)]
pub struct CapabilitySet {
    version: VulkanVersion,
    extensions: NameList,
    layers: NameList,
}

impl CapabilitySet {
    pub fn version(&self) -> VulkanVersion {
        self.version
    }

    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        self.extensions.contains(name)
    }

    pub fn is_layer_enabled(&self, name: &CStr) -> bool {
        self.layers.contains(name)
    }

    pub fn extensions(&self) -> impl Iterator<Item=&CStr> {
        self.extensions.names.iter().map(CString::as_c_str)
    }

    pub fn layers(&self) -> impl Iterator<Item=&CStr> {
        self.layers.names.iter().map(CString::as_c_str)
    }

    /// Name pointers for use in create infos. Valid as long as this set is alive.
    pub fn extension_name_ptrs(&self) -> Vec<*const c_char> {
        self.extensions.names.iter().map(|name| name.as_ptr()).collect()
    }

    /// Name pointers for use in create infos. Valid as long as this set is alive.
    pub fn layer_name_ptrs(&self) -> Vec<*const c_char> {
        self.layers.names.iter().map(|name| name.as_ptr()).collect()
    }

    /// Checks that an extension is enabled, failing with [`Error::ExtensionNotEnabled`].
    pub fn require_extension(&self, name: &'static CStr) -> Result<(), Error> {
        if self.is_extension_enabled(name) {
            Ok(())
        } else {
            post_error(Error::ExtensionNotEnabled(name))
        }
    }
}
