use core::panic::{UnwindSafe, RefUnwindSafe};

use std::cmp::Ordering;
use std::ffi::CStr;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;
use static_assertions::assert_impl_all;

use crate::error::{post_error, Error};
use crate::instance::capabilities::CapabilitySet;
use crate::instance::debug_messenger::DebugUtilsMessengerWrapper;
use crate::instance::library::Library;
use crate::instance::VulkanVersion;
use crate::symbols::{DebugUtilsFn, InstanceCore, InstanceFnV1_0, InstanceFnV1_1};
use crate::util::id::ObjectId;

/// A created vulkan instance together with its resolved entry points.
///
/// Debug messengers passed at creation time are owned by the instance and destroyed before it.
pub struct InstanceContext {
    id: ObjectId,
    library: Arc<Library>,
    handle: vk::Instance,
    core: InstanceCore,
    capabilities: CapabilitySet,
    debug_utils: Option<DebugUtilsFn>,
    debug_messengers: Vec<(vk::DebugUtilsMessengerEXT, Box<DebugUtilsMessengerWrapper>)>,
}

impl InstanceContext {
    pub(crate) fn new(
        library: Arc<Library>,
        handle: vk::Instance,
        core: InstanceCore,
        capabilities: CapabilitySet,
        debug_utils: Option<DebugUtilsFn>,
    ) -> Self {
        Self {
            id: ObjectId::new("Instance"),
            library,
            handle,
            core,
            capabilities,
            debug_utils,
            debug_messengers: Vec::new(),
        }
    }

    pub(crate) fn push_debug_messenger(&mut self, messenger: vk::DebugUtilsMessengerEXT, wrapper: Box<DebugUtilsMessengerWrapper>) {
        self.debug_messengers.push((messenger, wrapper));
    }

    pub fn get_id(&self) -> &ObjectId {
        &self.id
    }

    pub fn get_library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn handle(&self) -> vk::Instance {
        self.handle
    }

    pub fn get_version(&self) -> VulkanVersion {
        self.core.version()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        self.capabilities.is_extension_enabled(name)
    }

    pub fn vk(&self) -> &InstanceFnV1_0 {
        self.core.v1_0()
    }

    pub fn core(&self) -> &InstanceCore {
        &self.core
    }

    pub fn vk_1_1(&self) -> Result<&InstanceFnV1_1, Error> {
        self.core.v1_1()
    }

    pub fn debug_utils(&self) -> Result<&DebugUtilsFn, Error> {
        match &self.debug_utils {
            Some(table) => Ok(table),
            None => post_error(Error::ExtensionNotEnabled(DebugUtilsFn::extension_name())),
        }
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        if let Some(debug_utils) = &self.debug_utils {
            for (messenger, _) in self.debug_messengers.drain(..) {
                unsafe {
                    (debug_utils.destroy_debug_utils_messenger)(self.handle, messenger, std::ptr::null());
                }
            }
        }

        unsafe {
            (self.core.v1_0().destroy_instance)(self.handle, std::ptr::null());
        }
        log::debug!("Destroyed instance {:?}", self.id);
    }
}

impl Debug for InstanceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceContext")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("version", &self.core.version())
            .finish()
    }
}

impl PartialEq for InstanceContext {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for InstanceContext {
}

impl PartialOrd for InstanceContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceContext {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

assert_impl_all!(InstanceContext: Send, Sync, UnwindSafe, RefUnwindSafe);
