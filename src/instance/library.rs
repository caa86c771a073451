use std::ffi::CStr;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;

use crate::error::{post_error, Error};
use crate::instance::capabilities::AvailableCapabilities;
use crate::instance::VulkanVersion;
use crate::symbols::{check_table, GlobalFn};
use crate::util::vk::enumerate;
use crate::vk_check;

const ENUMERATE_INSTANCE_VERSION: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"vkEnumerateInstanceVersion\0") };

/// The root of the object graph. Holds the loader entry point and the capabilities it reports.
pub struct Library {
    // Keeps the dynamic library loaded if we opened it ourselves
    _entry: Option<ash::Entry>,
    get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    global: GlobalFn,
    capabilities: AvailableCapabilities,
}

impl Library {
    /// Opens the system vulkan loader.
    pub fn new() -> Result<Arc<Self>, Error> {
        let entry = match unsafe { ash::Entry::load() } {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("Failed to load vulkan library {}", err);
                return post_error(Error::Loading(err.to_string()));
            }
        };
        let get_instance_proc_addr = entry.static_fn().get_instance_proc_addr;

        unsafe { Self::build(Some(entry), get_instance_proc_addr) }
    }

    /// Uses a caller supplied `vkGetInstanceProcAddr` instead of the system loader.
    ///
    /// # Safety
    /// The function must behave like `vkGetInstanceProcAddr` and stay valid for the lifetime
    /// of the returned library and all objects created from it.
    pub unsafe fn from_loader(get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr) -> Result<Arc<Self>, Error> {
        Self::build(None, get_instance_proc_addr)
    }

    unsafe fn build(entry: Option<ash::Entry>, get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr) -> Result<Arc<Self>, Error> {
        let mut loader = |name: &CStr| get_instance_proc_addr(vk::Instance::null(), name.as_ptr());
        let global = check_table(GlobalFn::NAME, GlobalFn::load(&mut loader))?;

        let version = match loader(ENUMERATE_INSTANCE_VERSION) {
            Some(ptr) => {
                let enumerate_instance_version = std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkEnumerateInstanceVersion>(ptr);
                let mut version = 0u32;
                vk_check!(enumerate_instance_version(&mut version))?;
                VulkanVersion::from_raw(version)
            }
            None => VulkanVersion::VK_1_0,
        };

        let extensions = enumerate(|count, data| {
            (global.enumerate_instance_extension_properties)(std::ptr::null(), count, data)
        })?;
        let layers = enumerate(|count, data| {
            (global.enumerate_instance_layer_properties)(count, data)
        })?;

        let capabilities = AvailableCapabilities::from_properties(version, &extensions, &layers);
        log::info!("Loaded vulkan library with instance version {:?}, {} extensions and {} layers", version, extensions.len(), layers.len());

        Ok(Arc::new(Self {
            _entry: entry,
            get_instance_proc_addr,
            global,
            capabilities,
        }))
    }

    pub fn instance_api_version(&self) -> VulkanVersion {
        self.capabilities.version()
    }

    pub fn capabilities(&self) -> &AvailableCapabilities {
        &self.capabilities
    }

    pub fn has_layer(&self, name: &CStr) -> bool {
        self.capabilities.supports_layer(name)
    }

    pub fn has_instance_extension(&self, name: &CStr) -> bool {
        self.capabilities.supports_extension(name)
    }

    pub fn global(&self) -> &GlobalFn {
        &self.global
    }

    pub fn get_instance_proc_addr(&self) -> vk::PFN_vkGetInstanceProcAddr {
        self.get_instance_proc_addr
    }

    /// Returns a symbol loader resolving entry points for the given instance.
    pub(crate) fn instance_loader(&self, instance: vk::Instance) -> impl FnMut(&CStr) -> vk::PFN_vkVoidFunction {
        let get_instance_proc_addr = self.get_instance_proc_addr;
        move |name: &CStr| unsafe { get_instance_proc_addr(instance, name.as_ptr()) }
    }
}

impl Debug for Library {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("version", &self.capabilities.version())
            .field("system_loader", &self._entry.is_some())
            .finish()
    }
}
