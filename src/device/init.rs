use std::ffi::CStr;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;

use crate::allocator::{DedicatedAllocator, DeviceAllocator};
use crate::device::device::{DeviceContext, DeviceFunctions, Queue};
use crate::error::{post_error, Error};
use crate::instance::capabilities::{CapabilityRequest, ImplicitCapability, EXT_MEMORY_BUDGET, KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2, KHR_SWAPCHAIN};
use crate::instance::{DeviceFeature, PhysicalDevice, VulkanVersion};
use crate::symbols::{check_table, DeviceCore, SwapchainKhrFn};
use crate::vk_check;

pub type AllocatorFactory = dyn FnOnce(Arc<DeviceFunctions>) -> Result<Arc<dyn DeviceAllocator>, Error>;

/// Collects the requirements of a device. Every request is checked against the physical device
/// immediately so that failures point at the offending call.
pub struct DeviceCreateConfig {
    physical_device: PhysicalDevice,
    request: CapabilityRequest,
    features: vk::PhysicalDeviceFeatures,
    timeline_semaphores: bool,
    /// (family, priorities) in request order
    queues: Vec<(u32, Vec<f32>)>,
    allocator: Option<Box<AllocatorFactory>>,
}

impl DeviceCreateConfig {
    pub fn new(physical_device: PhysicalDevice) -> Self {
        Self {
            physical_device,
            request: CapabilityRequest::new(VulkanVersion::VK_1_0),
            features: vk::PhysicalDeviceFeatures::default(),
            timeline_semaphores: false,
            queues: Vec::new(),
            allocator: None,
        }
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    /// Requests a device api version. Defaults to 1.0.
    pub fn request_api_version(&mut self, version: VulkanVersion) -> Result<(), Error> {
        let supported = self.physical_device.api_version();
        if !supported.is_at_least(version) {
            return post_error(Error::ApiVersionUnsupported { supported, requested: version });
        }
        let instance = self.physical_device.instance().get_version();
        if !instance.is_at_least(version) {
            return post_error(Error::ApiVersionUnsupported { supported: instance, requested: version });
        }

        self.request.set_version(version);
        Ok(())
    }

    /// Enables a device extension. Enabling the same extension twice has no effect.
    pub fn enable_extension(&mut self, name: &CStr) -> Result<(), Error> {
        if !self.physical_device.supports_extension(name) {
            return post_error(Error::ExtensionUnsupported(name.into()));
        }
        self.request.add_extension(name);
        Ok(())
    }

    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        self.request.is_extension_requested(name)
    }

    pub fn enable_feature(&mut self, feature: DeviceFeature) -> Result<(), Error> {
        if !self.physical_device.is_feature_supported(feature) {
            return post_error(Error::FeatureUnsupported(feature));
        }
        feature.enable(&mut self.features);
        Ok(())
    }

    /// Enables the 1.2 timeline semaphore feature. The requested api version must be at least
    /// 1.2 when the device is created.
    pub fn enable_timeline_semaphores(&mut self) -> Result<(), Error> {
        if !self.physical_device.supports_timeline_semaphores() {
            return post_error(Error::Logic(String::from("the physical device does not support timeline semaphores")));
        }
        self.timeline_semaphores = true;
        Ok(())
    }

    pub fn timeline_semaphores_enabled(&self) -> bool {
        self.timeline_semaphores
    }

    /// Requests one more queue of the family. Returns the index of the queue inside its
    /// family.
    pub fn request_queue(&mut self, family: u32, priority: f32) -> Result<u32, Error> {
        let available = match self.physical_device.queue_family(family) {
            Some(properties) => properties.queue_count(),
            None => return post_error(Error::Logic(format!("queue family index {} does not exist", family))),
        };

        let position = self.queues.iter().position(|(index, _)| *index == family);
        let requested = position.map(|position| self.queues[position].1.len() as u32).unwrap_or(0) + 1;
        if requested > available {
            return post_error(Error::NotEnoughQueues { family, requested, available });
        }

        match position {
            Some(position) => self.queues[position].1.push(priority),
            None => self.queues.push((family, vec![priority])),
        }
        Ok(requested - 1)
    }

    /// Replaces the default [`DedicatedAllocator`].
    pub fn set_allocator<F>(&mut self, factory: F) where F: FnOnce(Arc<DeviceFunctions>) -> Result<Arc<dyn DeviceAllocator>, Error> + 'static {
        self.allocator = Some(Box::new(factory));
    }
}

impl Debug for DeviceCreateConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCreateConfig")
            .field("physical_device", &self.physical_device)
            .field("request", &self.request)
            .field("timeline_semaphores", &self.timeline_semaphores)
            .field("queues", &self.queues)
            .finish()
    }
}

pub fn create_device(config: DeviceCreateConfig) -> Result<Arc<DeviceContext>, Error> {
    log::info!("Creating vulkan device with config: {:?}", config);

    let physical_device = config.physical_device;
    let instance = physical_device.instance().clone();

    let implicit = [
        ImplicitCapability::new(EXT_MEMORY_BUDGET).when(instance.is_extension_enabled(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2)),
    ];
    let capabilities = config.request.resolve(physical_device.capabilities(), &implicit)?;
    let version = capabilities.version();
    if config.timeline_semaphores && !version.is_at_least(VulkanVersion::VK_1_2) {
        return post_error(Error::Logic(format!("timeline semaphores need a 1.2 device but {} was requested", version)));
    }

    let queue_create_infos: Vec<_> = config.queues.iter().map(|(family, priorities)| {
        vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(*family)
            .queue_priorities(priorities)
            .build()
    }).collect();

    let extensions = capabilities.extension_name_ptrs();
    let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features {
        timeline_semaphore: vk::TRUE,
        ..Default::default()
    };
    let mut create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&config.features);
    if config.timeline_semaphores {
        create_info = create_info.push_next(&mut vulkan_12);
    }

    let mut handle = vk::Device::null();
    unsafe {
        vk_check!((instance.vk().create_device)(physical_device.handle(), &*create_info, std::ptr::null(), &mut handle))?;
    }

    let get_device_proc_addr = instance.vk().get_device_proc_addr;
    let mut loader = |name: &CStr| unsafe { get_device_proc_addr(handle, name.as_ptr()) };

    let core = match unsafe { DeviceCore::resolve(version, &mut loader) } {
        Ok(core) => core,
        Err(err) => {
            destroy_unresolved(get_device_proc_addr, handle);
            return Err(err);
        }
    };

    let swapchain_khr = if capabilities.is_extension_enabled(KHR_SWAPCHAIN) {
        match check_table(SwapchainKhrFn::NAME, unsafe { SwapchainKhrFn::load(&mut loader) }) {
            Ok(table) => Some(table),
            Err(err) => {
                unsafe { (core.v1_0().destroy_device)(handle, std::ptr::null()) };
                return Err(err);
            }
        }
    } else {
        None
    };

    let enabled: Vec<_> = capabilities.extensions().map(CStr::to_string_lossy).collect();
    log::info!("Created vulkan device {:?} on {:?} with version {} and extensions {:?}", handle, physical_device.name(), version, enabled);

    let functions = Arc::new(DeviceFunctions::new(physical_device, handle, core, swapchain_khr, capabilities, config.features, config.timeline_semaphores));

    let mut queues = Vec::new();
    for (family, priorities) in &config.queues {
        for index in 0..priorities.len() as u32 {
            queues.push(Arc::new(Queue::new(functions.clone(), *family, index)));
        }
    }

    let allocator = match config.allocator {
        Some(factory) => factory(functions.clone())?,
        None => Arc::new(DedicatedAllocator::new(functions.clone())) as Arc<dyn DeviceAllocator>,
    };

    Ok(DeviceContext::new(functions, queues, allocator))
}

const DESTROY_DEVICE: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"vkDestroyDevice\0") };

fn destroy_unresolved(get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr, handle: vk::Device) {
    match unsafe { get_device_proc_addr(handle, DESTROY_DEVICE.as_ptr()) } {
        Some(ptr) => unsafe {
            let destroy = std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkDestroyDevice>(ptr);
            destroy(handle, std::ptr::null());
        },
        None => {
            log::error!("Unable to destroy device {:?}. vkDestroyDevice is not available", handle);
        }
    }
}
