use std::ffi::{CStr, CString};

use ash::vk;

use b4d_vk::error::Error;
use b4d_vk::instance::capabilities::{EXT_DEBUG_UTILS, EXT_MEMORY_BUDGET, KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2, KHR_SWAPCHAIN};
use b4d_vk::instance::{create_instance, AvailableCapabilities, CapabilityRequest, InstanceCreateConfig, VulkanVersion};
use b4d_vk::device::{create_device, DeviceCreateConfig};
use b4d_vk::test_utils::{make_test_library, make_test_physical_device, MockConfig, MockDriver};

fn missing_name(name: &CStr) -> CString {
    let mut bytes = name.to_bytes().to_vec();
    bytes.extend_from_slice(b"_missing");
    CString::new(bytes).unwrap()
}

fn instance_config() -> InstanceCreateConfig {
    InstanceCreateConfig::new(CString::new("Capability Tests").unwrap(), 1)
}

#[test]
fn device_extensions_are_idempotent() {
    MockDriver::configure(MockConfig::default());
    let physical_device = make_test_physical_device(VulkanVersion::VK_1_0);
    let supported: Vec<CString> = physical_device.capabilities().extensions().map(CStr::to_owned).collect();
    assert!(!supported.is_empty());

    let mut config = DeviceCreateConfig::new(physical_device);
    config.request_queue(0, 1.0).unwrap();
    for name in &supported {
        config.enable_extension(name).unwrap();
        config.enable_extension(name).unwrap();
        assert!(config.is_extension_enabled(name));
    }

    let device = create_device(config).unwrap();
    let enabled: Vec<_> = device.get_functions().capabilities().extensions().collect();
    assert_eq!(enabled.len(), supported.len());
    for name in &supported {
        assert!(device.get_functions().is_extension_enabled(name));
    }
}

#[test]
fn unsupported_device_extensions_fail() {
    MockDriver::configure(MockConfig::default());
    let physical_device = make_test_physical_device(VulkanVersion::VK_1_0);
    let supported: Vec<CString> = physical_device.capabilities().extensions().map(CStr::to_owned).collect();

    let mut config = DeviceCreateConfig::new(physical_device);
    for name in &supported {
        let missing = missing_name(name);
        assert_eq!(config.enable_extension(&missing), Err(Error::ExtensionUnsupported(missing.clone())));
        assert!(!config.is_extension_enabled(&missing));
    }
}

#[test]
fn resolve_is_monotone() {
    let available = AvailableCapabilities::new(VulkanVersion::VK_1_1, [KHR_SWAPCHAIN.to_owned(), EXT_MEMORY_BUDGET.to_owned()], Vec::new());

    let mut request = CapabilityRequest::new(VulkanVersion::VK_1_0);
    assert!(request.add_extension(KHR_SWAPCHAIN));
    assert!(!request.add_extension(KHR_SWAPCHAIN));
    let resolved = request.resolve(&available, &[]).unwrap();
    assert_eq!(resolved.extensions().count(), 1);

    for name in available.extensions() {
        let missing = missing_name(name);
        let mut request = request.clone();
        request.add_extension(&missing);
        assert_eq!(request.resolve(&available, &[]).unwrap_err(), Error::ExtensionUnsupported(missing));
    }

    let mut request = CapabilityRequest::new(VulkanVersion::VK_1_2);
    request.add_extension(KHR_SWAPCHAIN);
    assert_eq!(request.resolve(&available, &[]).unwrap_err(), Error::ApiVersionUnsupported {
        supported: VulkanVersion::VK_1_1,
        requested: VulkanVersion::VK_1_2,
    });
}

#[test]
fn instance_extensions_are_idempotent() {
    MockDriver::configure(MockConfig::default());
    let library = make_test_library();

    let mut config = instance_config();
    config.add_required_extension(EXT_DEBUG_UTILS);
    config.add_required_extension(EXT_DEBUG_UTILS);
    config.add_required_extension(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2);
    let instance = create_instance(&library, config).unwrap();

    assert_eq!(instance.capabilities().extensions().count(), 2);
    assert!(instance.is_extension_enabled(EXT_DEBUG_UTILS));
    assert!(instance.debug_utils().is_ok());
}

#[test]
fn unsupported_instance_requests_fail_before_creation() {
    MockDriver::configure(MockConfig::default());
    let library = make_test_library();

    let mut config = instance_config();
    config.add_required_extension(KHR_SWAPCHAIN);
    MockDriver::clear_trace();
    assert_eq!(create_instance(&library, config).unwrap_err(), Error::ExtensionUnsupported(KHR_SWAPCHAIN.to_owned()));

    let mut config = instance_config();
    let layer = CString::new("VK_LAYER_b4d_missing").unwrap();
    config.add_required_layer(&layer);
    assert_eq!(create_instance(&library, config).unwrap_err(), Error::LayerUnsupported(layer));

    assert!(MockDriver::trace().iter().all(|call| !call.starts_with("vkCreateInstance")));
}

#[test]
fn implicit_extensions_are_added() {
    MockDriver::configure(MockConfig::default());
    let library = make_test_library();
    let instance = create_instance(&library, instance_config()).unwrap();
    assert!(instance.is_extension_enabled(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2));

    let physical_device = b4d_vk::instance::PhysicalDevice::enumerate(&instance).unwrap().remove(0);
    let mut config = DeviceCreateConfig::new(physical_device);
    config.request_queue(0, 1.0).unwrap();
    let device = create_device(config).unwrap();
    assert!(device.get_functions().is_extension_enabled(EXT_MEMORY_BUDGET));
    assert!(!device.get_functions().is_extension_enabled(KHR_SWAPCHAIN));
}

#[test]
fn implicit_extensions_are_skipped_when_unsupported() {
    MockDriver::configure(MockConfig {
        instance_extensions: vec![EXT_DEBUG_UTILS],
        ..MockConfig::default()
    });
    let library = make_test_library();
    let instance = create_instance(&library, instance_config()).unwrap();
    assert!(!instance.is_extension_enabled(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2));
    MockDriver::configure(MockConfig::default());
}

#[test]
fn missing_instance_version_means_1_0() {
    MockDriver::configure(MockConfig {
        instance_version: None,
        ..MockConfig::default()
    });
    let library = make_test_library();
    assert_eq!(library.instance_api_version(), VulkanVersion::VK_1_0);

    let mut config = instance_config();
    config.set_api_version(VulkanVersion::VK_1_1);
    assert_eq!(create_instance(&library, config).unwrap_err(), Error::ApiVersionUnsupported {
        supported: VulkanVersion::VK_1_0,
        requested: VulkanVersion::VK_1_1,
    });
    MockDriver::configure(MockConfig::default());
}

#[test]
fn device_version_is_bounded_by_instance() {
    MockDriver::configure(MockConfig::default());
    let physical_device = make_test_physical_device(VulkanVersion::VK_1_1);
    assert_eq!(physical_device.api_version(), VulkanVersion::VK_1_3);

    let mut config = DeviceCreateConfig::new(physical_device);
    config.request_api_version(VulkanVersion::VK_1_1).unwrap();
    assert_eq!(config.request_api_version(VulkanVersion::VK_1_2), Err(Error::ApiVersionUnsupported {
        supported: VulkanVersion::VK_1_1,
        requested: VulkanVersion::VK_1_2,
    }));
}

#[test]
fn queue_requests_are_bounded() {
    MockDriver::configure(MockConfig::default());
    let mut config = DeviceCreateConfig::new(make_test_physical_device(VulkanVersion::VK_1_0));
    assert_eq!(config.request_queue(0, 1.0), Ok(0));
    assert_eq!(config.request_queue(0, 0.5), Ok(1));
    assert_eq!(config.request_queue(0, 0.5), Err(Error::NotEnoughQueues { family: 0, requested: 3, available: 2 }));
    assert_eq!(config.request_queue(1, 1.0), Ok(0));

    let device = create_device(config).unwrap();
    assert!(device.get_queue(0, 1).is_some());
    assert!(device.get_queue(1, 0).is_some());
    assert!(device.get_queue(2, 0).is_none());
}

#[test]
fn null_entry_points_are_reported() {
    MockDriver::configure(MockConfig {
        hidden_symbols: vec!["vkCmdDraw", "vkCmdDispatch"],
        ..MockConfig::default()
    });
    let mut config = DeviceCreateConfig::new(make_test_physical_device(VulkanVersion::VK_1_0));
    config.request_queue(0, 1.0).unwrap();
    match create_device(config) {
        Err(Error::NullEntryPoints { missing, .. }) => {
            assert!(missing.contains(&"vkCmdDraw"));
            assert!(missing.contains(&"vkCmdDispatch"));
        }
        other => panic!("Expected missing entry points but got {:?}", other.map(|_| ())),
    }
    MockDriver::configure(MockConfig::default());
}

#[test]
fn unsupported_features_fail() {
    MockDriver::configure(MockConfig {
        features: vk::PhysicalDeviceFeatures::default(),
        ..MockConfig::default()
    });
    let physical_device = make_test_physical_device(VulkanVersion::VK_1_0);
    let mut config = DeviceCreateConfig::new(physical_device);
    let feature = b4d_vk::instance::DeviceFeature::SamplerAnisotropy;
    assert_eq!(config.enable_feature(feature), Err(Error::FeatureUnsupported(feature)));
    MockDriver::configure(MockConfig::default());
}

#[test]
fn timeline_semaphores_follow_the_driver() {
    MockDriver::configure(MockConfig {
        timeline_semaphore: false,
        ..MockConfig::default()
    });
    let mut config = DeviceCreateConfig::new(make_test_physical_device(VulkanVersion::VK_1_2));
    assert!(!config.physical_device().supports_timeline_semaphores());
    assert!(matches!(config.enable_timeline_semaphores(), Err(Error::Logic(_))));

    MockDriver::configure(MockConfig::default());
    assert!(!make_test_physical_device(VulkanVersion::VK_1_0).supports_timeline_semaphores());

    let mut config = DeviceCreateConfig::new(make_test_physical_device(VulkanVersion::VK_1_2));
    config.enable_timeline_semaphores().unwrap();
    config.request_queue(0, 1.0).unwrap();
    assert!(matches!(create_device(config), Err(Error::Logic(_))));

    let mut config = DeviceCreateConfig::new(make_test_physical_device(VulkanVersion::VK_1_2));
    config.request_api_version(VulkanVersion::VK_1_2).unwrap();
    config.enable_timeline_semaphores().unwrap();
    config.request_queue(0, 1.0).unwrap();
    let device = create_device(config).unwrap();
    assert!(device.get_functions().timeline_semaphores_enabled());
}
