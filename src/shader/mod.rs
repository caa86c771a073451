//! SPIR-V modules, their reflection and linking, and device shader modules.

pub mod link;
pub mod reflect;
pub mod spirv;

mod module;

pub use link::{link, Diagnostic, DiagnosticLevel, LinkFlags};
pub use module::{ComputeShader, FragmentShader, ShaderModule, VertexShader};
pub use reflect::{DescriptorBinding, Direction, EntryPoint, InterfaceVariable, PushConstantRange, ShaderReflection};
pub use spirv::SpirvModule;
