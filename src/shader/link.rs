//! Linking of multiple SPIR-V modules into one.
//!
//! Ids of every input module are shifted into a disjoint range, the logical sections are
//! merged and equal non-aggregate types are folded. Symbols declared with the `Import` linkage
//! type are then bound to the `Export` declaration of the same name.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use rspirv::dr;
use rspirv::spirv::{Capability, Decoration, LinkageType, Op, Word};

use crate::error::{post_error, Error};
use crate::shader::reflect::operand_id;
use crate::shader::spirv::SpirvModule;

#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct LinkFlags {
    /// Keep exported symbols and allow unresolved imports.
    pub create_library: bool,
    /// Check that every referenced id is defined in the result.
    pub verify_ids: bool,
    /// Allow imports without a matching export.
    pub allow_partial_linkage: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum DiagnosticLevel {
    Fatal,
    InternalError,
    Error,
    Warning,
    Info,
    Debug,
}

/// A message produced while linking.
///
/// `line` and `column` are the module index and instruction index the message refers to, or
/// 0 if it is not tied to one instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub source: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}:{}:{}: {}", self.level, self.source, self.line, self.column, self.message)
    }
}

/// Types which carry no members or decorations and can be folded when equal.
const FOLDABLE_TYPES: &[Op] = &[
    Op::TypeVoid,
    Op::TypeBool,
    Op::TypeInt,
    Op::TypeFloat,
    Op::TypeVector,
    Op::TypeMatrix,
    Op::TypeImage,
    Op::TypeSampler,
    Op::TypeSampledImage,
    Op::TypePointer,
    Op::TypeFunction,
];

struct Linker<'a> {
    flags: LinkFlags,
    callback: Option<&'a mut dyn FnMut(&Diagnostic)>,
    errors: Vec<String>,
}

impl<'a> Linker<'a> {
    fn report(&mut self, level: DiagnosticLevel, source: &str, line: usize, column: usize, message: String) {
        match level {
            DiagnosticLevel::Fatal | DiagnosticLevel::InternalError | DiagnosticLevel::Error => log::error!("SPIR-V link: {}", message),
            DiagnosticLevel::Warning => log::warn!("SPIR-V link: {}", message),
            DiagnosticLevel::Info => log::info!("SPIR-V link: {}", message),
            DiagnosticLevel::Debug => log::debug!("SPIR-V link: {}", message),
        }

        let diagnostic = Diagnostic {
            level,
            source: String::from(source),
            line,
            column,
            message,
        };
        if let Some(callback) = self.callback.as_deref_mut() {
            callback(&diagnostic);
        }
        if level <= DiagnosticLevel::Error {
            self.errors.push(diagnostic.message);
        }
    }

    fn fail<T>(&mut self) -> Result<T, Error> {
        post_error(Error::SpirvLink(self.errors.join("; ")))
    }
}

fn for_each_inst_mut<F: FnMut(&mut dr::Instruction)>(module: &mut dr::Module, mut f: F) {
    module.capabilities.iter_mut().for_each(&mut f);
    module.extensions.iter_mut().for_each(&mut f);
    module.ext_inst_imports.iter_mut().for_each(&mut f);
    module.memory_model.iter_mut().for_each(&mut f);
    module.entry_points.iter_mut().for_each(&mut f);
    module.execution_modes.iter_mut().for_each(&mut f);
    module.debug_string_source.iter_mut().for_each(&mut f);
    module.debug_names.iter_mut().for_each(&mut f);
    module.debug_module_processed.iter_mut().for_each(&mut f);
    module.annotations.iter_mut().for_each(&mut f);
    module.types_global_values.iter_mut().for_each(&mut f);
    for function in &mut module.functions {
        function.def.iter_mut().for_each(&mut f);
        function.parameters.iter_mut().for_each(&mut f);
        for block in &mut function.blocks {
            block.label.iter_mut().for_each(&mut f);
            block.instructions.iter_mut().for_each(&mut f);
        }
        function.end.iter_mut().for_each(&mut f);
    }
}

fn for_each_inst<F: FnMut(&dr::Instruction)>(module: &dr::Module, mut f: F) {
    module.capabilities.iter()
        .chain(module.extensions.iter())
        .chain(module.ext_inst_imports.iter())
        .chain(module.memory_model.iter())
        .chain(module.entry_points.iter())
        .chain(module.execution_modes.iter())
        .chain(module.debug_string_source.iter())
        .chain(module.debug_names.iter())
        .chain(module.debug_module_processed.iter())
        .chain(module.annotations.iter())
        .chain(module.types_global_values.iter())
        .for_each(&mut f);
    for function in &module.functions {
        function.def.iter()
            .chain(function.parameters.iter())
            .chain(function.blocks.iter().flat_map(|block| block.label.iter().chain(block.instructions.iter())))
            .chain(function.end.iter())
            .for_each(&mut f);
    }
}

fn remap_ids<F: Fn(Word) -> Word>(inst: &mut dr::Instruction, f: F) {
    if let Some(id) = inst.result_id.as_mut() {
        *id = f(*id);
    }
    if let Some(id) = inst.result_type.as_mut() {
        *id = f(*id);
    }
    for operand in &mut inst.operands {
        match operand {
            dr::Operand::IdRef(id) | dr::Operand::IdScope(id) | dr::Operand::IdMemorySemantics(id) => *id = f(*id),
            _ => {}
        }
    }
}

fn resolve(replacements: &HashMap<Word, Word>, mut id: Word) -> Word {
    while let Some(next) = replacements.get(&id) {
        id = *next;
    }
    id
}

fn linkage_of(inst: &dr::Instruction) -> Option<(Word, &str, LinkageType)> {
    if inst.class.opcode != Op::Decorate {
        return None;
    }
    match inst.operands.as_slice() {
        [dr::Operand::IdRef(target), dr::Operand::Decoration(Decoration::LinkageAttributes), dr::Operand::LiteralString(name), dr::Operand::LinkageType(linkage)] => {
            Some((*target, name.as_str(), *linkage))
        }
        _ => None,
    }
}

fn decoration_target(inst: &dr::Instruction) -> Option<Word> {
    match inst.class.opcode {
        Op::Decorate | Op::DecorateId | Op::Name => inst.operands.first().and_then(operand_id),
        _ => None,
    }
}

/// Links the modules into one. Diagnostics are logged and, if given, passed to the callback.
pub fn link(modules: &[SpirvModule], flags: LinkFlags, callback: Option<&mut dyn FnMut(&Diagnostic)>) -> Result<SpirvModule, Error> {
    let mut linker = Linker {
        flags,
        callback,
        errors: Vec::new(),
    };

    if modules.is_empty() {
        linker.report(DiagnosticLevel::Error, "linker", 0, 0, String::from("no modules given"));
        return linker.fail();
    }

    let mut parsed = Vec::with_capacity(modules.len());
    for (index, module) in modules.iter().enumerate() {
        match module.parse() {
            Ok(module) => parsed.push(module),
            Err(err) => {
                linker.report(DiagnosticLevel::Fatal, &format!("module #{}", index), index, 0, err.to_string());
                return linker.fail();
            }
        }
    }

    let mut merged = merge(&mut linker, parsed);
    let replacements = fold_types(&mut merged);
    apply(&mut merged, &replacements);

    let replacements = resolve_linkage(&mut linker, &mut merged);
    apply(&mut merged, &replacements);

    if linker.flags.verify_ids {
        verify_ids(&mut linker, &merged);
    }
    if !linker.errors.is_empty() {
        return linker.fail();
    }

    let linked = SpirvModule::from_dr(&merged)?;
    log::debug!("Linked {} SPIR-V modules into {:?}", modules.len(), linked);
    Ok(linked)
}

fn apply(module: &mut dr::Module, replacements: &HashMap<Word, Word>) {
    if replacements.is_empty() {
        return;
    }
    for_each_inst_mut(module, |inst| remap_ids(inst, |id| resolve(replacements, id)));
}

/// Shifts the ids of every module into a disjoint range and concatenates their sections.
fn merge(linker: &mut Linker, modules: Vec<dr::Module>) -> dr::Module {
    let mut merged = dr::Module::new();
    let mut offset: Word = 0;
    let mut version = (1u8, 0u8);
    let mut import_names: HashMap<String, Word> = HashMap::new();
    let mut replacements = HashMap::new();
    let mut entry_names = HashSet::new();

    for (index, mut module) in modules.into_iter().enumerate() {
        let bound = module.header.as_ref().map(|header| header.bound).unwrap_or(1);
        if let Some(header) = module.header.as_ref() {
            version = version.max(header.version());
        }

        for_each_inst_mut(&mut module, |inst| remap_ids(inst, |id| id + offset));
        offset += bound.saturating_sub(1);

        for capability in module.capabilities {
            if !merged.capabilities.iter().any(|existing| existing.operands == capability.operands) {
                merged.capabilities.push(capability);
            }
        }
        for extension in module.extensions {
            if !merged.extensions.iter().any(|existing| existing.operands == extension.operands) {
                merged.extensions.push(extension);
            }
        }
        for import in module.ext_inst_imports {
            let (id, name) = match (import.result_id, import.operands.first()) {
                (Some(id), Some(dr::Operand::LiteralString(name))) => (id, name.clone()),
                _ => continue,
            };
            match import_names.get(&name) {
                Some(existing) => {
                    replacements.insert(id, *existing);
                }
                None => {
                    import_names.insert(name, id);
                    merged.ext_inst_imports.push(import);
                }
            }
        }

        if let Some(model) = module.memory_model {
            let differs = merged.memory_model.as_ref().map(|existing| existing.operands != model.operands);
            match differs {
                None => merged.memory_model = Some(model),
                Some(true) => {
                    linker.report(DiagnosticLevel::Error, &format!("module #{}", index), index, 0, format!("memory model of module #{} differs from module #0", index));
                }
                Some(false) => {}
            }
        }

        for entry in &module.entry_points {
            let key = format!("{:?}", entry.operands.iter().take(3).collect::<Vec<_>>());
            if !entry_names.insert(key) {
                linker.report(DiagnosticLevel::Warning, &format!("module #{}", index), index, 0, String::from("entry point declared more than once"));
            }
        }
        merged.entry_points.extend(module.entry_points);
        merged.execution_modes.extend(module.execution_modes);
        merged.debug_string_source.extend(module.debug_string_source);
        merged.debug_names.extend(module.debug_names);
        merged.debug_module_processed.extend(module.debug_module_processed);
        merged.annotations.extend(module.annotations);
        merged.types_global_values.extend(module.types_global_values);
        merged.functions.extend(module.functions);
    }

    let mut header = dr::ModuleHeader::new(offset + 1);
    header.set_version(version.0, version.1);
    merged.header = Some(header);

    apply(&mut merged, &replacements);
    merged
}

/// Folds equal non-aggregate types. Decorated types are kept apart.
fn fold_types(module: &mut dr::Module) -> HashMap<Word, Word> {
    let decorated: HashSet<Word> = module.annotations.iter().filter_map(decoration_target).collect();
    let mut replacements = HashMap::new();
    let mut seen: Vec<(Op, Vec<dr::Operand>, Word)> = Vec::new();

    module.types_global_values.retain_mut(|inst| {
        remap_ids(inst, |id| resolve(&replacements, id));

        let opcode = inst.class.opcode;
        let id = match inst.result_id {
            Some(id) => id,
            None => return true,
        };
        if !FOLDABLE_TYPES.contains(&opcode) || decorated.contains(&id) {
            return true;
        }

        match seen.iter().find(|(op, operands, _)| *op == opcode && *operands == inst.operands) {
            Some((_, _, existing)) => {
                replacements.insert(id, *existing);
                false
            }
            None => {
                seen.push((opcode, inst.operands.clone(), id));
                true
            }
        }
    });

    replacements
}

/// Returns the type a linkable symbol is declared with.
fn symbol_type(module: &dr::Module, id: Word) -> Option<Word> {
    let function = module.functions.iter()
        .filter_map(|function| function.def.as_ref())
        .find(|def| def.result_id == Some(id));
    if let Some(def) = function {
        return def.operands.get(1).and_then(operand_id);
    }
    module.types_global_values.iter()
        .find(|inst| inst.result_id == Some(id))
        .and_then(|inst| inst.result_type)
}

/// Binds imports to exports and removes the resolved import declarations.
fn resolve_linkage(linker: &mut Linker, module: &mut dr::Module) -> HashMap<Word, Word> {
    let mut exports: HashMap<String, Word> = HashMap::new();
    let mut imports: Vec<(String, Word)> = Vec::new();
    for (index, inst) in module.annotations.iter().enumerate() {
        match linkage_of(inst) {
            Some((target, name, LinkageType::Export)) => {
                if exports.insert(String::from(name), target).is_some() {
                    linker.report(DiagnosticLevel::Error, "linker", 0, index, format!("symbol \"{}\" is exported more than once", name));
                }
            }
            Some((target, name, LinkageType::Import)) => imports.push((String::from(name), target)),
            _ => {}
        }
    }

    let mut replacements = HashMap::new();
    let mut removed = HashSet::new();
    let mut unresolved = false;
    for (name, import) in &imports {
        match exports.get(name) {
            Some(export) => {
                if symbol_type(module, *import) != symbol_type(module, *export) {
                    linker.report(DiagnosticLevel::Error, "linker", 0, 0, format!("type mismatch between import and export of symbol \"{}\"", name));
                }
                replacements.insert(*import, *export);
                removed.insert(*import);
            }
            None => {
                unresolved = true;
                if !(linker.flags.allow_partial_linkage || linker.flags.create_library) {
                    linker.report(DiagnosticLevel::Error, "linker", 0, 0, format!("unresolved import of symbol \"{}\"", name));
                }
            }
        }
    }

    module.functions.retain(|function| {
        let id = function.def.as_ref().and_then(|def| def.result_id);
        match id {
            Some(id) if removed.contains(&id) => {
                removed.extend(function.parameters.iter().filter_map(|parameter| parameter.result_id));
                false
            }
            _ => true,
        }
    });
    module.types_global_values.retain(|inst| !(inst.class.opcode == Op::Variable && inst.result_id.map_or(false, |id| removed.contains(&id))));

    let keep_exports = linker.flags.create_library;
    module.annotations.retain(|inst| {
        if let Some((target, _, linkage)) = linkage_of(inst) {
            return match linkage {
                LinkageType::Import => !removed.contains(&target),
                _ => keep_exports,
            };
        }
        !decoration_target(inst).map_or(false, |target| removed.contains(&target))
    });
    module.debug_names.retain(|inst| !decoration_target(inst).map_or(false, |target| removed.contains(&target)));

    let linkage_left = module.annotations.iter().any(|inst| linkage_of(inst).is_some());
    if !linkage_left && !unresolved {
        module.capabilities.retain(|inst| !matches!(inst.operands.first(), Some(dr::Operand::Capability(Capability::Linkage))));
    }

    replacements
}

fn verify_ids(linker: &mut Linker, module: &dr::Module) {
    let mut defined = HashSet::new();
    for_each_inst(module, |inst| {
        if let Some(id) = inst.result_id {
            defined.insert(id);
        }
    });

    let mut missing = Vec::new();
    for_each_inst(module, |inst| {
        let referenced = inst.result_type.into_iter().chain(inst.operands.iter().filter_map(operand_id));
        for id in referenced {
            if !defined.contains(&id) && !missing.contains(&id) {
                missing.push(id);
            }
        }
    });

    for id in missing {
        linker.report(DiagnosticLevel::Error, "linker", 0, 0, format!("id %{} is referenced but never defined", id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::ShaderReflection;
    use crate::util::test::spirv;

    #[test]
    fn imports_bind_to_exports() {
        let library = spirv::export_module("helper");
        let user = spirv::import_module("helper");

        let linked = link(&[user, library], LinkFlags { verify_ids: true, ..Default::default() }, None).unwrap();
        let module = linked.parse().unwrap();

        // The import declaration is gone, the definition and the caller remain
        assert_eq!(module.functions.len(), 2);
        assert!(module.functions.iter().all(|function| !function.blocks.is_empty()));
        assert!(module.annotations.iter().all(|inst| linkage_of(inst).is_none()));
        assert!(!module.capabilities.iter().any(|inst| matches!(inst.operands.first(), Some(dr::Operand::Capability(Capability::Linkage)))));
    }

    #[test]
    fn unresolved_imports_need_partial_linkage() {
        let user = spirv::import_module("missing");
        let mut diagnostics = Vec::new();
        let mut callback = |diagnostic: &Diagnostic| diagnostics.push(diagnostic.clone());

        let result = link(std::slice::from_ref(&user), LinkFlags::default(), Some(&mut callback));
        assert!(matches!(result, Err(Error::SpirvLink(_))));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].level, DiagnosticLevel::Error);
        assert!(diagnostics[0].message.contains("missing"));

        let flags = LinkFlags { allow_partial_linkage: true, ..Default::default() };
        assert!(link(std::slice::from_ref(&user), flags, None).is_ok());
    }

    #[test]
    fn duplicate_exports_fail() {
        let first = spirv::export_module("helper");
        let second = spirv::export_module("helper");
        let flags = LinkFlags { create_library: true, ..Default::default() };
        match link(&[first, second], flags, None) {
            Err(Error::SpirvLink(message)) => assert!(message.contains("exported more than once")),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn equal_types_are_folded() {
        let module = spirv::compute_module();
        let single = module.parse().unwrap();
        let linked = link(&[module.clone(), module], LinkFlags { allow_partial_linkage: true, ..Default::default() }, None).unwrap();
        let linked = linked.parse().unwrap();

        let count = |module: &dr::Module, op: Op| module.types_global_values.iter().filter(|inst| inst.class.opcode == op).count();
        assert_eq!(count(&linked, Op::TypeVoid), 1);
        assert_eq!(count(&linked, Op::TypeFunction), count(&single, Op::TypeFunction));
        assert_eq!(count(&linked, Op::TypeStruct), 2 * count(&single, Op::TypeStruct));

        let reflection = ShaderReflection::from_dr(linked);
        assert_eq!(reflection.entry_points().len(), 2);
    }

    #[test]
    fn empty_input_fails() {
        assert!(link(&[], LinkFlags::default(), None).is_err());
    }
}
