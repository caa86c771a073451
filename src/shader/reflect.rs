//! Structural reflection of SPIR-V modules.
//!
//! Only declarations are inspected. Instruction level semantics are never validated.

use std::collections::{HashMap, HashSet};

use ash::vk;
use rspirv::dr;
use rspirv::spirv::{Decoration, Dim, ExecutionModel, Op, StorageClass, Word};

use crate::error::Error;
use crate::shader::spirv::SpirvModule;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub model: ExecutionModel,
    /// Empty for execution models without a matching vulkan shader stage.
    pub stage: vk::ShaderStageFlags,
    function: Word,
    interface: Vec<Word>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InterfaceVariable {
    pub location: u32,
    pub format: vk::Format,
    pub name: Option<String>,
    pub direction: Direction,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DescriptorBinding {
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// 0 for runtime sized arrays.
    pub count: u32,
    pub name: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PushConstantRange {
    pub offset: u32,
    pub size: u32,
}

pub(crate) fn execution_model_stage(model: ExecutionModel) -> vk::ShaderStageFlags {
    match model {
        ExecutionModel::Vertex => vk::ShaderStageFlags::VERTEX,
        ExecutionModel::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ExecutionModel::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ExecutionModel::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ExecutionModel::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ExecutionModel::GLCompute => vk::ShaderStageFlags::COMPUTE,
        _ => vk::ShaderStageFlags::empty(),
    }
}

pub(crate) fn operand_id(operand: &dr::Operand) -> Option<Word> {
    match operand {
        dr::Operand::IdRef(id) | dr::Operand::IdScope(id) | dr::Operand::IdMemorySemantics(id) => Some(*id),
        _ => None,
    }
}

fn id_at(inst: &dr::Instruction, index: usize) -> Option<Word> {
    match inst.operands.get(index) {
        Some(dr::Operand::IdRef(id)) => Some(*id),
        _ => None,
    }
}

fn literal_at(inst: &dr::Instruction, index: usize) -> Option<u32> {
    match inst.operands.get(index) {
        Some(dr::Operand::LiteralInt32(value)) => Some(*value),
        _ => None,
    }
}

fn storage_class_at(inst: &dr::Instruction, index: usize) -> Option<StorageClass> {
    match inst.operands.get(index) {
        Some(dr::Operand::StorageClass(class)) => Some(*class),
        _ => None,
    }
}

/// A parsed module with lookup tables for its global declarations.
pub struct ShaderReflection {
    module: dr::Module,
    globals: HashMap<Word, usize>,
    names: HashMap<Word, String>,
}

impl ShaderReflection {
    pub fn new(module: &SpirvModule) -> Result<Self, Error> {
        Ok(Self::from_dr(module.parse()?))
    }

    pub fn from_dr(module: dr::Module) -> Self {
        let globals = module.types_global_values.iter().enumerate()
            .filter_map(|(index, inst)| inst.result_id.map(|id| (id, index)))
            .collect();

        let names = module.debug_names.iter()
            .filter(|inst| inst.class.opcode == Op::Name)
            .filter_map(|inst| match (inst.operands.get(0), inst.operands.get(1)) {
                (Some(dr::Operand::IdRef(target)), Some(dr::Operand::LiteralString(name))) => Some((*target, name.clone())),
                _ => None,
            })
            .collect();

        Self {
            module,
            globals,
            names,
        }
    }

    pub fn module(&self) -> &dr::Module {
        &self.module
    }

    pub fn entry_points(&self) -> Vec<EntryPoint> {
        self.module.entry_points.iter().filter_map(|inst| {
            let model = match inst.operands.get(0) {
                Some(dr::Operand::ExecutionModel(model)) => *model,
                _ => return None,
            };
            let function = id_at(inst, 1)?;
            let name = match inst.operands.get(2) {
                Some(dr::Operand::LiteralString(name)) => name.clone(),
                _ => return None,
            };
            let interface = inst.operands.iter().skip(3).filter_map(operand_id).collect();

            Some(EntryPoint {
                name,
                model,
                stage: execution_model_stage(model),
                function,
                interface,
            })
        }).collect()
    }

    pub fn find_entry_point(&self, name: &str, stage: vk::ShaderStageFlags) -> Option<EntryPoint> {
        self.entry_points().into_iter().find(|entry| entry.name == name && entry.stage == stage)
    }

    /// Returns the user defined inputs and outputs of an entry point ordered by direction and
    /// location. Built-ins are skipped.
    pub fn interface_variables(&self, entry: &EntryPoint) -> Vec<InterfaceVariable> {
        let mut variables: Vec<_> = entry.interface.iter().filter_map(|id| {
            let (class, pointee) = self.variable(*id)?;
            let direction = match class {
                StorageClass::Input => Direction::Input,
                StorageClass::Output => Direction::Output,
                _ => return None,
            };
            let location = self.decoration(*id, Decoration::Location)?;

            Some(InterfaceVariable {
                location,
                format: self.format_of(pointee),
                name: self.names.get(id).cloned(),
                direction,
            })
        }).collect();

        variables.sort_by_key(|variable| (variable.direction == Direction::Output, variable.location));
        variables
    }

    /// Returns the descriptor bindings statically referenced by the entry point ordered by set
    /// and binding.
    pub fn descriptor_bindings(&self, entry: &EntryPoint) -> Vec<DescriptorBinding> {
        let mut bindings: Vec<_> = self.referenced_globals(entry).into_iter().filter_map(|id| {
            let (class, pointee) = self.variable(id)?;
            if !matches!(class, StorageClass::Uniform | StorageClass::UniformConstant | StorageClass::StorageBuffer) {
                return None;
            }

            let (element, count) = self.unwrap_array(pointee);
            let descriptor_type = self.descriptor_type(class, element)?;
            let name = self.names.get(&id).or_else(|| self.names.get(&element)).cloned();

            Some(DescriptorBinding {
                set: self.decoration(id, Decoration::DescriptorSet).unwrap_or(0),
                binding: self.decoration(id, Decoration::Binding).unwrap_or(0),
                descriptor_type,
                count,
                name,
            })
        }).collect();

        bindings.sort_by_key(|binding| (binding.set, binding.binding));
        bindings
    }

    /// Returns the byte range of the push constant block used by the entry point.
    pub fn push_constants(&self, entry: &EntryPoint) -> Option<PushConstantRange> {
        self.referenced_globals(entry).into_iter().find_map(|id| {
            let (class, pointee) = self.variable(id)?;
            if class != StorageClass::PushConstant {
                return None;
            }

            let block = self.global(pointee)?;
            let mut start = u32::MAX;
            let mut end = 0;
            for (member, operand) in block.operands.iter().enumerate() {
                let member_type = operand_id(operand)?;
                let offset = self.member_decoration(pointee, member as u32, Decoration::Offset).unwrap_or(0);
                start = start.min(offset);
                end = end.max(offset + self.type_size(member_type, 0)?);
            }

            if end == 0 {
                None
            } else {
                Some(PushConstantRange { offset: start, size: end - start })
            }
        })
    }

    fn global(&self, id: Word) -> Option<&dr::Instruction> {
        self.globals.get(&id).map(|index| &self.module.types_global_values[*index])
    }

    /// Returns the storage class and pointee type of a global variable.
    fn variable(&self, id: Word) -> Option<(StorageClass, Word)> {
        let variable = self.global(id)?;
        if variable.class.opcode != Op::Variable {
            return None;
        }
        let pointer = self.global(variable.result_type?)?;
        Some((storage_class_at(variable, 0)?, id_at(pointer, 1)?))
    }

    fn decorations(&self, target: Word, decoration: Decoration) -> impl Iterator<Item=&dr::Instruction> {
        self.module.annotations.iter().filter(move |inst| {
            inst.class.opcode == Op::Decorate
                && id_at(inst, 0) == Some(target)
                && matches!(inst.operands.get(1), Some(dr::Operand::Decoration(found)) if *found == decoration)
        })
    }

    fn decoration(&self, target: Word, decoration: Decoration) -> Option<u32> {
        self.decorations(target, decoration).find_map(|inst| literal_at(inst, 2))
    }

    fn has_decoration(&self, target: Word, decoration: Decoration) -> bool {
        self.decorations(target, decoration).next().is_some()
    }

    fn member_decoration(&self, target: Word, member: u32, decoration: Decoration) -> Option<u32> {
        self.module.annotations.iter().find_map(|inst| {
            if inst.class.opcode != Op::MemberDecorate || id_at(inst, 0) != Some(target) || literal_at(inst, 1) != Some(member) {
                return None;
            }
            match inst.operands.get(2) {
                Some(dr::Operand::Decoration(found)) if *found == decoration => literal_at(inst, 3),
                _ => None,
            }
        })
    }

    fn constant_value(&self, id: Word) -> Option<u32> {
        let constant = self.global(id)?;
        if constant.class.opcode != Op::Constant {
            return None;
        }
        literal_at(constant, 0)
    }

    /// Strips array types returning the element type and the total element count.
    fn unwrap_array(&self, mut ty: Word) -> (Word, u32) {
        let mut count = 1u32;
        while let Some(inst) = self.global(ty) {
            match inst.class.opcode {
                Op::TypeArray => {
                    let length = id_at(inst, 1).and_then(|id| self.constant_value(id)).unwrap_or(1);
                    count = count.saturating_mul(length);
                }
                Op::TypeRuntimeArray => count = 0,
                _ => break,
            }
            match id_at(inst, 0) {
                Some(element) => ty = element,
                None => break,
            }
        }
        (ty, count)
    }

    fn descriptor_type(&self, class: StorageClass, ty: Word) -> Option<vk::DescriptorType> {
        let inst = self.global(ty)?;
        match class {
            StorageClass::StorageBuffer => Some(vk::DescriptorType::STORAGE_BUFFER),
            StorageClass::Uniform => {
                if self.has_decoration(ty, Decoration::BufferBlock) {
                    Some(vk::DescriptorType::STORAGE_BUFFER)
                } else {
                    Some(vk::DescriptorType::UNIFORM_BUFFER)
                }
            }
            _ => match inst.class.opcode {
                Op::TypeSampler => Some(vk::DescriptorType::SAMPLER),
                Op::TypeSampledImage => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
                Op::TypeImage => {
                    let dim = match inst.operands.get(1) {
                        Some(dr::Operand::Dim(dim)) => *dim,
                        _ => return None,
                    };
                    let storage = literal_at(inst, 5) == Some(2);
                    Some(match (dim, storage) {
                        (Dim::DimSubpassData, _) => vk::DescriptorType::INPUT_ATTACHMENT,
                        (Dim::DimBuffer, false) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
                        (Dim::DimBuffer, true) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
                        (_, true) => vk::DescriptorType::STORAGE_IMAGE,
                        (_, false) => vk::DescriptorType::SAMPLED_IMAGE,
                    })
                }
                _ => None,
            }
        }
    }

    fn format_of(&self, ty: Word) -> vk::Format {
        let (component, count) = match self.global(ty) {
            Some(inst) if inst.class.opcode == Op::TypeVector => match (id_at(inst, 0), literal_at(inst, 1)) {
                (Some(component), Some(count)) => (component, count),
                _ => return vk::Format::UNDEFINED,
            },
            _ => (ty, 1),
        };
        let scalar = match self.global(component) {
            Some(inst) => inst,
            None => return vk::Format::UNDEFINED,
        };

        let width = literal_at(scalar, 0).unwrap_or(0);
        let signed = literal_at(scalar, 1) == Some(1);
        let formats: [vk::Format; 4] = match (scalar.class.opcode, width, signed) {
            (Op::TypeFloat, 32, _) => [vk::Format::R32_SFLOAT, vk::Format::R32G32_SFLOAT, vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32B32A32_SFLOAT],
            (Op::TypeFloat, 16, _) => [vk::Format::R16_SFLOAT, vk::Format::R16G16_SFLOAT, vk::Format::R16G16B16_SFLOAT, vk::Format::R16G16B16A16_SFLOAT],
            (Op::TypeFloat, 64, _) => [vk::Format::R64_SFLOAT, vk::Format::R64G64_SFLOAT, vk::Format::R64G64B64_SFLOAT, vk::Format::R64G64B64A64_SFLOAT],
            (Op::TypeInt, 32, true) => [vk::Format::R32_SINT, vk::Format::R32G32_SINT, vk::Format::R32G32B32_SINT, vk::Format::R32G32B32A32_SINT],
            (Op::TypeInt, 32, false) => [vk::Format::R32_UINT, vk::Format::R32G32_UINT, vk::Format::R32G32B32_UINT, vk::Format::R32G32B32A32_UINT],
            _ => return vk::Format::UNDEFINED,
        };
        match count {
            1..=4 => formats[count as usize - 1],
            _ => vk::Format::UNDEFINED,
        }
    }

    /// Size in bytes of a type as laid out in a block.
    fn type_size(&self, ty: Word, depth: u32) -> Option<u32> {
        // Type graphs are acyclic, the limit only guards against malformed modules
        if depth > 32 {
            return None;
        }
        let inst = self.global(ty)?;
        match inst.class.opcode {
            Op::TypeInt | Op::TypeFloat => Some(literal_at(inst, 0)? / 8),
            Op::TypeBool => Some(4),
            Op::TypeVector | Op::TypeMatrix => Some(literal_at(inst, 1)? * self.type_size(id_at(inst, 0)?, depth + 1)?),
            Op::TypeArray => {
                let length = self.constant_value(id_at(inst, 1)?)?;
                let stride = match self.decoration(ty, Decoration::ArrayStride) {
                    Some(stride) => stride,
                    None => self.type_size(id_at(inst, 0)?, depth + 1)?,
                };
                Some(length * stride)
            }
            Op::TypeStruct => {
                let mut end = 0;
                for (member, operand) in inst.operands.iter().enumerate() {
                    let offset = self.member_decoration(ty, member as u32, Decoration::Offset).unwrap_or(end);
                    end = end.max(offset + self.type_size(operand_id(operand)?, depth + 1)?);
                }
                Some(end)
            }
            _ => None,
        }
    }

    /// Collects the global variables referenced by the functions reachable from the entry point
    /// together with its declared interface.
    fn referenced_globals(&self, entry: &EntryPoint) -> Vec<Word> {
        let functions: HashMap<Word, &dr::Function> = self.module.functions.iter()
            .filter_map(|function| Some((function.def.as_ref()?.result_id?, function)))
            .collect();

        let mut visited = HashSet::new();
        let mut pending = vec![entry.function];
        let mut referenced: Vec<Word> = entry.interface.clone();
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            let function = match functions.get(&id) {
                Some(function) => function,
                None => continue,
            };
            for inst in function.blocks.iter().flat_map(|block| block.instructions.iter()) {
                if inst.class.opcode == Op::FunctionCall {
                    if let Some(callee) = id_at(inst, 0) {
                        pending.push(callee);
                    }
                }
                referenced.extend(inst.operands.iter().filter_map(operand_id));
            }
        }

        let mut seen = HashSet::new();
        referenced.retain(|id| seen.insert(*id) && self.variable(*id).is_some());
        referenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::spirv;

    #[test]
    fn compute_module() {
        let reflection = ShaderReflection::new(&spirv::compute_module()).unwrap();

        let entries = reflection.entry_points();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "main");
        assert_eq!(entries[0].stage, vk::ShaderStageFlags::COMPUTE);

        let bindings = reflection.descriptor_bindings(&entries[0]);
        assert_eq!(bindings.len(), 2);
        assert_eq!((bindings[0].set, bindings[0].binding, bindings[0].descriptor_type, bindings[0].count), (0, 0, vk::DescriptorType::STORAGE_BUFFER, 1));
        assert_eq!((bindings[1].set, bindings[1].binding, bindings[1].descriptor_type, bindings[1].count), (1, 2, vk::DescriptorType::STORAGE_IMAGE, 4));
        assert_eq!(bindings[0].name.as_deref(), Some("data"));

        assert_eq!(reflection.push_constants(&entries[0]), Some(PushConstantRange { offset: 0, size: 16 }));
    }

    #[test]
    fn unreferenced_globals_are_skipped() {
        let reflection = ShaderReflection::new(&spirv::compute_module()).unwrap();
        let entry = &reflection.entry_points()[0];
        let names: Vec<_> = reflection.descriptor_bindings(entry).into_iter().filter_map(|binding| binding.name).collect();
        assert!(!names.iter().any(|name| name == "unused"));
    }

    #[test]
    fn vertex_interface() {
        let reflection = ShaderReflection::new(&spirv::vertex_module()).unwrap();
        let entry = reflection.find_entry_point("main", vk::ShaderStageFlags::VERTEX).unwrap();

        let variables = reflection.interface_variables(&entry);
        assert_eq!(variables, vec![
            InterfaceVariable { location: 0, format: vk::Format::R32G32B32_SFLOAT, name: Some(String::from("position")), direction: Direction::Input },
            InterfaceVariable { location: 1, format: vk::Format::R32G32_SFLOAT, name: Some(String::from("uv")), direction: Direction::Input },
            InterfaceVariable { location: 0, format: vk::Format::R32G32_SFLOAT, name: Some(String::from("out_uv")), direction: Direction::Output },
        ]);
        assert!(reflection.descriptor_bindings(&entry).is_empty());
        assert_eq!(reflection.push_constants(&entry), None);
    }
}
