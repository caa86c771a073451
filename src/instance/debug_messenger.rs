use std::ffi::{c_void, CStr};
use std::fmt::{Debug, Formatter};
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::Arc;

use ash::vk;

use crate::error::{channel, Error};
use crate::instance::InstanceContext;
use crate::vk_check;

pub trait DebugMessengerCallback: Send + Sync + UnwindSafe + RefUnwindSafe + Debug {
    fn on_message(
        &self,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        message_types: vk::DebugUtilsMessageTypeFlagsEXT,
        message: &CStr,
        data: &vk::DebugUtilsMessengerCallbackDataEXT,
    );
}

/// Forwards all messages into the `log` crate.
#[derive(Debug)]
pub struct RustLogDebugMessenger {
}

impl RustLogDebugMessenger {
    pub fn new() -> Self {
        Self {
        }
    }
}

impl Default for RustLogDebugMessenger {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugMessengerCallback for RustLogDebugMessenger {
    fn on_message(&self, message_severity: vk::DebugUtilsMessageSeverityFlagsEXT, message_types: vk::DebugUtilsMessageTypeFlagsEXT, message: &CStr, _: &vk::DebugUtilsMessengerCallbackDataEXT) {
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            log::error!("[{:?}] {:?}", message_types, message);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            log::warn!("[{:?}] {:?}", message_types, message);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            log::info!("[{:?}] {:?}", message_types, message);
        } else {
            log::debug!("[{:?}] {:?}", message_types, message);
        }
    }
}

/// A callback together with the messages it wants to receive.
pub struct DebugMessengerConfig {
    pub(crate) callback: Box<dyn DebugMessengerCallback>,
    pub(crate) severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub(crate) types: vk::DebugUtilsMessageTypeFlagsEXT,
}

impl DebugMessengerConfig {
    /// Receives info, warning and error messages of every type.
    pub fn new(callback: Box<dyn DebugMessengerCallback>) -> Self {
        Self {
            callback,
            severity: vk::DebugUtilsMessageSeverityFlagsEXT::INFO | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            types: vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE | vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
        }
    }

    pub fn with_severity(mut self, severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_types(mut self, types: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        self.types = types;
        self
    }
}

impl Debug for DebugMessengerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugMessengerConfig")
            .field("callback", &self.callback)
            .field("severity", &self.severity)
            .field("types", &self.types)
            .finish()
    }
}

/// Heap pinned state passed as user data to the native messenger.
pub(crate) struct DebugUtilsMessengerWrapper {
    callback: Box<dyn DebugMessengerCallback>,
}

/// Creates a native messenger. The returned wrapper must outlive the native handle.
///
/// # Safety
/// The instance must have `VK_EXT_debug_utils` enabled and its table must be loaded.
pub(crate) unsafe fn create_native_messenger(instance: &InstanceContext, config: DebugMessengerConfig) -> Result<(vk::DebugUtilsMessengerEXT, Box<DebugUtilsMessengerWrapper>), Error> {
    let debug_utils = instance.debug_utils()?;

    let wrapper = Box::new(DebugUtilsMessengerWrapper { callback: config.callback });
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(config.severity)
        .message_type(config.types)
        .pfn_user_callback(Some(debug_utils_messenger_callback_wrapper))
        // The callback only reads through this pointer
        .user_data(wrapper.as_ref() as *const DebugUtilsMessengerWrapper as *mut c_void);

    let mut messenger = vk::DebugUtilsMessengerEXT::null();
    vk_check!((debug_utils.create_debug_utils_messenger)(instance.handle(), &*create_info, std::ptr::null(), &mut messenger))?;

    Ok((messenger, wrapper))
}

/// A debug messenger created after instance creation. Destroyed when dropped.
pub struct DebugMessenger {
    instance: Arc<InstanceContext>,
    handle: vk::DebugUtilsMessengerEXT,
    _wrapper: Box<DebugUtilsMessengerWrapper>,
}

impl DebugMessenger {
    /// Fails with [`Error::ExtensionNotEnabled`] if the instance was created without
    /// `VK_EXT_debug_utils`.
    pub fn new(instance: Arc<InstanceContext>, config: DebugMessengerConfig) -> Result<Self, Error> {
        let (handle, wrapper) = unsafe { create_native_messenger(&instance, config) }?;
        log::debug!("Created debug messenger {:?}", handle);

        Ok(Self {
            instance,
            handle,
            _wrapper: wrapper,
        })
    }

    pub fn handle(&self) -> vk::DebugUtilsMessengerEXT {
        self.handle
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        match self.instance.debug_utils() {
            Ok(debug_utils) => unsafe {
                (debug_utils.destroy_debug_utils_messenger)(self.instance.handle(), self.handle, std::ptr::null());
            },
            Err(err) => channel::destroy_failed("debug messenger", err),
        }
    }
}

pub(crate) extern "system" fn debug_utils_messenger_callback_wrapper(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void
) -> vk::Bool32 {
    // This is called by c code so we must catch any panics
    std::panic::catch_unwind(|| {
        if let Some(wrapper) = unsafe { (p_user_data as *const DebugUtilsMessengerWrapper).as_ref() } {
            let data = unsafe {
                p_callback_data.as_ref().unwrap_or_else(|| std::process::abort())
            };
            if data.p_message.is_null() {
                return;
            }
            let message = unsafe { CStr::from_ptr(data.p_message) };

            wrapper.callback.on_message(message_severity, message_types, message, data);
        } else {
            log::warn!("Wrapped debug utils messenger was called with null user data!");
        }
    }).unwrap_or_else(|_| {
        log::error!("Debug utils messenger panicked! Aborting...");
        std::process::abort();
    });

    vk::FALSE
}
