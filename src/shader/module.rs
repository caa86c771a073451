use std::ffi::{CStr, CString};
use std::fmt::{Debug, Formatter};

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{post_error, Error};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::shader::reflect::{DescriptorBinding, InterfaceVariable, PushConstantRange, ShaderReflection};
use crate::shader::spirv::SpirvModule;
use crate::vk_check;

/// A shader module with exactly one entry point and its reflected interface.
pub struct ShaderModule {
    handle: DeviceHandle<vk::ShaderModule>,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    interface: Vec<InterfaceVariable>,
    descriptor_bindings: Vec<DescriptorBinding>,
    push_constants: Option<PushConstantRange>,
}

impl ShaderModule {
    /// Creates a shader module. The module must declare exactly one entry point and its
    /// execution model must match `expected_stage`.
    pub fn new(device: &DeviceContext, code: &SpirvModule, expected_stage: vk::ShaderStageFlags) -> Result<Self, Error> {
        let reflection = ShaderReflection::new(code)?;

        let mut entry_points = reflection.entry_points();
        if entry_points.len() != 1 {
            return post_error(Error::BadShaderModule(format!("expected exactly one entry point but found {}", entry_points.len())));
        }
        let entry = entry_points.remove(0);
        if entry.stage != expected_stage {
            return post_error(Error::BadShaderModule(format!("entry point \"{}\" is a {:?} shader but {:?} was expected", entry.name, entry.model, expected_stage)));
        }
        let entry_point = match CString::new(entry.name.as_str()) {
            Ok(name) => name,
            Err(_) => return post_error(Error::BadShaderModule(String::from("entry point name contains a nul byte"))),
        };

        let create_info = vk::ShaderModuleCreateInfo::builder()
            .code(code.words());

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut module = vk::ShaderModule::null();
            unsafe {
                vk_check!((functions.vk().create_shader_module)(functions.handle(), &*create_info, std::ptr::null(), &mut module))?;
            }
            Ok(module)
        })?;

        Ok(Self {
            handle,
            stage: expected_stage,
            interface: reflection.interface_variables(&entry),
            descriptor_bindings: reflection.descriptor_bindings(&entry),
            push_constants: reflection.push_constants(&entry),
            entry_point,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::ShaderModule> {
        self.handle.weak()
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &CStr {
        self.entry_point.as_c_str()
    }

    pub fn interface(&self) -> &[InterfaceVariable] {
        &self.interface
    }

    pub fn descriptor_bindings(&self) -> &[DescriptorBinding] {
        &self.descriptor_bindings
    }

    pub fn push_constants(&self) -> Option<PushConstantRange> {
        self.push_constants
    }
}

impl Debug for ShaderModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("handle", &self.handle())
            .field("stage", &self.stage)
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

macro_rules! typed_shader {
    ($(#[$meta:meta])* $name:ident, $stage:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(ShaderModule);

        impl $name {
            pub const STAGE: vk::ShaderStageFlags = vk::ShaderStageFlags::$stage;

            pub fn new(device: &DeviceContext, code: &SpirvModule) -> Result<Self, Error> {
                ShaderModule::new(device, code, Self::STAGE).map(Self)
            }

            pub fn module(&self) -> &ShaderModule {
                &self.0
            }
        }
    }
}

typed_shader!(
    /// A shader module with a vertex entry point.
    VertexShader, VERTEX
);
typed_shader!(
    /// A shader module with a fragment entry point.
    FragmentShader, FRAGMENT
);
typed_shader!(
    /// A shader module with a compute entry point.
    ComputeShader, COMPUTE
);
