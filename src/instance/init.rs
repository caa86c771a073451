use std::ffi::{CStr, CString};
use std::fmt::Debug;
use std::sync::Arc;

use ash::vk;

use crate::error::Error;
use crate::instance::capabilities::{CapabilityRequest, ImplicitCapability, EXT_DEBUG_UTILS, KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2, LAYER_KHRONOS_VALIDATION};
use crate::instance::debug_messenger::{create_native_messenger, DebugMessengerCallback, DebugMessengerConfig};
use crate::instance::instance::InstanceContext;
use crate::instance::library::Library;
use crate::instance::VulkanVersion;
use crate::symbols::{check_table, DebugUtilsFn, InstanceCore};
use crate::vk_check;

const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"b4d-vk\0") };
const DESTROY_INSTANCE: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"vkDestroyInstance\0") };

#[derive(Debug)]
pub struct InstanceCreateConfig {
    application_name: CString,
    application_version: u32,
    engine_name: CString,
    engine_version: u32,
    api_version: VulkanVersion,
    debug_messengers: Vec<DebugMessengerConfig>,
    enable_validation: bool,
    required_extensions: Vec<CString>,
    required_layers: Vec<CString>,
}

impl InstanceCreateConfig {
    pub fn new(application_name: CString, application_version: u32) -> Self {
        Self {
            application_name,
            application_version,
            engine_name: CString::from(ENGINE_NAME),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            api_version: VulkanVersion::VK_1_0,
            debug_messengers: Vec::new(),
            enable_validation: false,
            required_extensions: Vec::new(),
            required_layers: Vec::new(),
        }
    }

    pub fn set_engine(&mut self, name: CString, version: u32) {
        self.engine_name = name;
        self.engine_version = version;
    }

    pub fn set_api_version(&mut self, version: VulkanVersion) {
        self.api_version = version;
    }

    /// Adds a messenger created together with the instance. Implies `VK_EXT_debug_utils`.
    pub fn add_debug_messenger(&mut self, messenger: Box<dyn DebugMessengerCallback>) {
        self.debug_messengers.push(DebugMessengerConfig::new(messenger));
    }

    pub fn add_debug_messenger_config(&mut self, config: DebugMessengerConfig) {
        self.debug_messengers.push(config);
    }

    /// Enables `VK_LAYER_KHRONOS_validation`.
    pub fn enable_validation(&mut self) {
        self.enable_validation = true;
    }

    pub fn add_required_extension(&mut self, extension: &CStr) {
        self.required_extensions.push(CString::from(extension));
    }

    pub fn add_required_layer(&mut self, layer: &CStr) {
        self.required_layers.push(CString::from(layer));
    }
}

pub fn create_instance(library: &Arc<Library>, config: InstanceCreateConfig) -> Result<Arc<InstanceContext>, Error> {
    log::info!("Creating vulkan instance with config: {:?}", config);

    let mut request = CapabilityRequest::new(config.api_version);
    for layer in &config.required_layers {
        request.add_layer(layer);
    }
    if config.enable_validation {
        log::info!("Validation layers enabled");
        request.add_layer(LAYER_KHRONOS_VALIDATION);
    } else {
        log::info!("Validation layers disabled");
    }
    for extension in &config.required_extensions {
        request.add_extension(extension);
    }
    if !config.debug_messengers.is_empty() {
        request.add_extension(EXT_DEBUG_UTILS);
    }

    let implicit = [ImplicitCapability::new(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2)];
    let capabilities = request.resolve(library.capabilities(), &implicit)?;

    let layers = capabilities.layer_name_ptrs();
    let extensions = capabilities.extension_name_ptrs();

    let application_info = vk::ApplicationInfo::builder()
        .application_name(config.application_name.as_c_str())
        .application_version(config.application_version)
        .engine_name(config.engine_name.as_c_str())
        .engine_version(config.engine_version)
        .api_version(config.api_version.into());

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(layers.as_slice())
        .enabled_extension_names(extensions.as_slice());

    let mut handle = vk::Instance::null();
    unsafe {
        vk_check!((library.global().create_instance)(&*create_info, std::ptr::null(), &mut handle))?;
    }

    let mut loader = library.instance_loader(handle);
    let core = match unsafe { InstanceCore::resolve(config.api_version, &mut loader) } {
        Ok(core) => core,
        Err(err) => {
            destroy_unresolved(library, handle);
            return Err(err);
        }
    };

    let debug_utils = if capabilities.is_extension_enabled(EXT_DEBUG_UTILS) {
        match check_table(DebugUtilsFn::NAME, unsafe { DebugUtilsFn::load(&mut loader) }) {
            Ok(table) => Some(table),
            Err(err) => {
                destroy_unresolved(library, handle);
                return Err(err);
            }
        }
    } else {
        None
    };

    let enabled: Vec<_> = capabilities.extensions().map(CStr::to_string_lossy).collect();
    log::info!("Created vulkan instance {:?} with version {} and extensions {:?}", handle, config.api_version, enabled);

    // From here on dropping the context destroys the instance
    let mut instance = InstanceContext::new(library.clone(), handle, core, capabilities, debug_utils);
    for messenger in config.debug_messengers {
        let (native, wrapper) = unsafe { create_native_messenger(&instance, messenger) }?;
        instance.push_debug_messenger(native, wrapper);
    }

    Ok(Arc::new(instance))
}

/// Destroys an instance whose tables could not be resolved.
fn destroy_unresolved(library: &Library, handle: vk::Instance) {
    let mut loader = library.instance_loader(handle);
    match loader(DESTROY_INSTANCE) {
        Some(ptr) => unsafe {
            let destroy = std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkDestroyInstance>(ptr);
            destroy(handle, std::ptr::null());
        },
        None => {
            log::error!("Unable to destroy instance {:?}. vkDestroyInstance is not available", handle);
        }
    }
}

