//! SPIR-V tooling over rspirv's data representation: a structural verifier,
//! a linker and a dead-code optimizer.

use std::collections::{HashMap, HashSet};

use rspirv::binary::Assemble;
use rspirv::dr::{self, Instruction, Operand};
use rspirv::grammar::reflect;
use rspirv::spirv::{Capability, Decoration, LinkageType, Op};

use crate::backend::{Linker, Optimizer, PassSet, Verifier};
use crate::context::Context;
use crate::error::Diagnostic;
use crate::ir::{Spirv, SPIRV_MAGIC};

/// Installs the linker and optimizer, and puts the structural verifier in
/// front of whatever verifier was registered before.
pub(crate) fn register(ctx: &mut Context) {
    let verifier = match ctx.take_verifier() {
        Some(semantic) => StructuralVerifier::layered(semantic),
        None => StructuralVerifier::new(),
    };
    ctx.set_verifier(verifier)
        .set_optimizer(DeadCodeOptimizer)
        .set_linker(RspirvLinker);
}

fn load(spv: &Spirv) -> Result<dr::Module, String> {
    dr::load_words(spv.words()).map_err(|e| format!("malformed SPIR-V: {}", e))
}

fn store(module: &dr::Module) -> Spirv {
    Spirv::from_words(module.assemble())
}

/// Every id an instruction uses, its result type included.
fn refs(inst: &Instruction) -> impl Iterator<Item = u32> + '_ {
    inst.result_type.into_iter()
        .chain(inst.operands.iter().filter_map(Operand::id_ref_any))
}

fn refs_mut(inst: &mut Instruction) -> impl Iterator<Item = &mut u32> + '_ {
    inst.result_type.as_mut().into_iter()
        .chain(inst.operands.iter_mut().filter_map(Operand::id_ref_any_mut))
}

/// The id a debug name or annotation applies to.
fn target(inst: &Instruction) -> Option<u32> {
    inst.operands.first().and_then(Operand::id_ref_any)
}

/// `(target, name, kind)` of a `LinkageAttributes` decoration.
fn linkage(inst: &Instruction) -> Option<(u32, &str, LinkageType)> {
    if inst.class.opcode != Op::Decorate {
        return None;
    }
    match inst.operands.as_slice() {
        [Operand::IdRef(target), Operand::Decoration(Decoration::LinkageAttributes),
            Operand::LiteralString(name), Operand::LinkageType(kind)] => Some((*target, name, *kind)),
        _ => None,
    }
}

fn has_capability(module: &dr::Module, cap: Capability) -> bool {
    module.capabilities.iter()
        .any(|x| x.operands.first() == Some(&Operand::Capability(cap)))
}

fn is_spec_constant(op: Op) -> bool {
    matches!(op, Op::SpecConstantTrue | Op::SpecConstantFalse | Op::SpecConstant
        | Op::SpecConstantComposite | Op::SpecConstantOp)
}

/// Drops debug names and annotations that apply to `forgotten` ids.
fn forget(module: &mut dr::Module, forgotten: &HashSet<u32>) {
    if forgotten.is_empty() {
        return;
    }
    let alive = |inst: &Instruction| target(inst).map_or(true, |id| !forgotten.contains(&id));
    module.debug_names.retain(alive);
    module.annotations.retain(alive);
    for inst in module.annotations.iter_mut() {
        // Targets follow the group, alone or paired with a member index.
        let stride = match inst.class.opcode {
            Op::GroupDecorate => 1,
            Op::GroupMemberDecorate => 2,
            _ => continue,
        };
        let (group, targets) = match inst.operands.split_first() {
            Some(x) => x,
            None => continue,
        };
        let mut operands = vec![group.clone()];
        for chunk in targets.chunks(stride) {
            if chunk[0].id_ref_any().map_or(true, |id| !forgotten.contains(&id)) {
                operands.extend_from_slice(chunk);
            }
        }
        inst.operands = operands;
    }
}

/// Renumbers ids densely in definition order and shrinks the bound. Modules
/// using an id they never define are left alone.
fn compact_ids(module: &mut dr::Module) {
    let mut remap = HashMap::new();
    for inst in module.all_inst_iter() {
        if let Some(id) = inst.result_id {
            let next = remap.len() as u32 + 1;
            remap.entry(id).or_insert(next);
        }
    }
    if module.all_inst_iter().flat_map(refs).any(|id| !remap.contains_key(&id)) {
        return;
    }
    for inst in module.all_inst_iter_mut() {
        if let Some(id) = inst.result_id.as_mut() {
            *id = remap.get(&*id).copied().unwrap_or(*id);
        }
        for id in refs_mut(inst) {
            *id = remap.get(&*id).copied().unwrap_or(*id);
        }
    }
    if let Some(header) = module.header.as_mut() {
        header.bound = remap.len() as u32 + 1;
    }
}

/// Checks the module header, the logical layout and id bookkeeping, then
/// hands valid modules to a layered semantic verifier. Modules still carrying
/// linkage declarations are not complete programs and only get the
/// structural checks.
pub struct StructuralVerifier {
    semantic: Option<Box<dyn Verifier>>,
}
impl StructuralVerifier {
    pub fn new() -> Self {
        StructuralVerifier { semantic: None }
    }
    pub fn layered(semantic: Box<dyn Verifier>) -> Self {
        StructuralVerifier { semantic: Some(semantic) }
    }
}
impl Default for StructuralVerifier {
    fn default() -> Self {
        StructuralVerifier::new()
    }
}
impl Verifier for StructuralVerifier {
    fn check(&self, spv: &Spirv) -> Vec<Diagnostic> {
        let diags = check_structure(spv);
        if !diags.is_empty() {
            return diags;
        }
        match &self.semantic {
            Some(semantic) if spv.linkage_symbols().is_empty() => semantic.check(spv),
            _ => Vec::new(),
        }
    }
}

fn check_structure(spv: &Spirv) -> Vec<Diagnostic> {
    let header = match spv.header() {
        Some(x) if x.magic == SPIRV_MAGIC => x,
        _ => return vec![Diagnostic::message("invalid SPIR-V magic number")],
    };
    let module = match load(spv) {
        Ok(x) => x,
        Err(e) => return vec![Diagnostic::message(e)],
    };

    let mut diags = Vec::new();
    let (major, minor) = header.version();
    if major != 1 || minor > 6 {
        diags.push(Diagnostic::message(format!("unsupported SPIR-V version {}.{}", major, minor)));
    }
    if module.memory_model.is_none() {
        diags.push(Diagnostic::message("missing OpMemoryModel"));
    }
    if module.entry_points.is_empty() && !has_capability(&module, Capability::Linkage) {
        diags.push(Diagnostic::message(
            "no OpEntryPoint, which is only allowed with the Linkage capability"));
    }

    let mut defined = HashSet::new();
    for inst in module.all_inst_iter() {
        let id = match inst.result_id {
            Some(x) => x,
            None => continue,
        };
        if id == 0 || id >= header.bound {
            diags.push(Diagnostic::message(format!(
                "result id %{} of Op{:?} is outside the id bound {}", id, inst.class.opcode, header.bound)));
        }
        if !defined.insert(id) {
            diags.push(Diagnostic::message(format!("id %{} is defined more than once", id)));
        }
    }
    let mut undefined = module.all_inst_iter()
        .flat_map(refs)
        .filter(|id| !defined.contains(id))
        .collect::<Vec<_>>();
    undefined.sort_unstable();
    undefined.dedup();
    for id in undefined {
        diags.push(Diagnostic::message(format!("id %{} is used but never defined", id)));
    }

    let functions = module.functions.iter()
        .filter_map(dr::Function::def_id)
        .collect::<HashSet<_>>();
    for inst in module.entry_points.iter() {
        let name = match inst.operands.get(2) {
            Some(Operand::LiteralString(x)) => x.as_str(),
            _ => "",
        };
        match inst.operands.get(1).and_then(Operand::id_ref_any) {
            Some(id) if functions.contains(&id) => {},
            _ => diags.push(Diagnostic::message(format!(
                "entry point \"{}\" does not name a function", name))),
        }
    }
    diags
}

/// Removes functions, types, constants and global variables that no entry
/// point or export can reach. The size pass set also strips debug info and
/// renumbers ids densely.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadCodeOptimizer;
impl Optimizer for DeadCodeOptimizer {
    fn run(&self, spv: &Spirv, passes: PassSet) -> Result<Spirv, Vec<Diagnostic>> {
        let mut module = load(spv).map_err(|e| vec![Diagnostic::message(e)])?;
        eliminate_dead_code(&mut module);
        if passes == PassSet::Size {
            strip_debug_info(&mut module);
            compact_ids(&mut module);
        }
        Ok(store(&module))
    }
}

fn eliminate_dead_code(module: &mut dr::Module) {
    let mut work = module.entry_points.iter()
        .chain(module.execution_modes.iter())
        .flat_map(refs)
        .collect::<Vec<_>>();
    work.extend(module.annotations.iter()
        .filter_map(linkage)
        .filter(|(_, _, kind)| *kind == LinkageType::Export)
        .map(|(target, _, _)| target));
    if work.is_empty() {
        return;
    }
    work.extend(module.types_global_values.iter()
        .filter(|x| is_spec_constant(x.class.opcode))
        .filter_map(|x| x.result_id));

    let globals = module.types_global_values.iter()
        .enumerate()
        .filter_map(|(i, x)| Some((x.result_id?, i)))
        .collect::<HashMap<_, _>>();
    let functions = module.functions.iter()
        .enumerate()
        .filter_map(|(i, x)| Some((x.def_id()?, i)))
        .collect::<HashMap<_, _>>();
    let mut live = HashSet::new();
    while let Some(id) = work.pop() {
        if !live.insert(id) {
            continue;
        }
        if let Some(&i) = globals.get(&id) {
            work.extend(refs(&module.types_global_values[i]));
        } else if let Some(&i) = functions.get(&id) {
            work.extend(module.functions[i].all_inst_iter().flat_map(refs));
        }
    }

    let mut removed = HashSet::new();
    module.types_global_values.retain(|inst| {
        let keep = match inst.result_id {
            Some(id) => live.contains(&id) || is_spec_constant(inst.class.opcode),
            // OpTypeForwardPointer and OpLine.
            None => refs(inst).all(|id| live.contains(&id)),
        };
        if !keep {
            removed.extend(inst.result_id);
        }
        keep
    });
    module.functions.retain(|f| {
        let keep = f.def_id().map_or(true, |id| live.contains(&id));
        if !keep {
            removed.extend(f.all_inst_iter().filter_map(|x| x.result_id));
        }
        keep
    });
    module.ext_inst_imports.retain(|inst| {
        let keep = inst.result_id.map_or(true, |id| live.contains(&id));
        if !keep {
            removed.extend(inst.result_id);
        }
        keep
    });
    tracing::trace!(nremoved = removed.len(), "eliminated dead SPIR-V code");
    forget(module, &removed);
}

fn strip_debug_info(module: &mut dr::Module) {
    module.debug_names.clear();
    module.debug_module_processed.clear();
    module.types_global_values.retain(|x| !reflect::is_location_debug(x.class.opcode));
    for block in module.functions.iter_mut().flat_map(|f| f.blocks.iter_mut()) {
        block.instructions.retain(|x| !reflect::is_location_debug(x.class.opcode));
    }
    let used = module.all_inst_iter()
        .filter(|x| !reflect::is_debug(x.class.opcode))
        .flat_map(refs)
        .collect::<HashSet<_>>();
    // Strings can still be named by non-semantic instructions.
    module.debug_string_source.retain(|x| {
        x.class.opcode == Op::String && x.result_id.map_or(false, |id| used.contains(&id))
    });
}

/// Links modules by resolving every imported function and variable against
/// the export of the same name. Identical types and constants are merged.
/// Linkage declarations are consumed when the result has an entry point,
/// and kept on exports when it is itself a library.
#[derive(Debug, Clone, Copy, Default)]
pub struct RspirvLinker;
impl Linker for RspirvLinker {
    fn link(&self, spvs: &[Spirv]) -> Result<Spirv, Vec<Diagnostic>> {
        let modules = spvs.iter()
            .enumerate()
            .map(|(i, spv)| load(spv).map_err(|e| vec![Diagnostic::message(format!("module {}: {}", i, e))]))
            .collect::<Result<Vec<_>, _>>()?;
        let linked = link_modules(modules)?;
        tracing::trace!(bound = ?linked.header.as_ref().map(|x| x.bound), "linked SPIR-V modules");
        Ok(store(&linked))
    }
}

fn link_modules(modules: Vec<dr::Module>) -> Result<dr::Module, Vec<Diagnostic>> {
    let mut out = dr::Module::new();
    let mut version = 0;
    let mut offset = 0u32;
    let mut diags = Vec::new();
    for (i, mut module) in modules.into_iter().enumerate() {
        let header = module.header.take()
            .ok_or_else(|| vec![Diagnostic::message(format!("module {}: missing header", i))])?;
        if let Some(id) = module.all_inst_iter().filter_map(|x| x.result_id).find(|x| *x >= header.bound) {
            return Err(vec![Diagnostic::message(format!(
                "module {}: id %{} is outside the id bound {}", i, id, header.bound))]);
        }
        version = version.max(header.version);
        for inst in module.all_inst_iter_mut() {
            if let Some(id) = inst.result_id.as_mut() {
                *id += offset;
            }
            for id in refs_mut(inst) {
                *id += offset;
            }
        }
        offset = offset.checked_add(header.bound)
            .ok_or_else(|| vec![Diagnostic::message("linked module exceeds the id space")])?;

        if let Some(model) = module.memory_model {
            match &out.memory_model {
                Some(x) if x.operands != model.operands => diags.push(Diagnostic::message(
                    format!("module {}: memory model differs from the modules before it", i))),
                Some(_) => {},
                None => out.memory_model = Some(model),
            }
        }
        out.capabilities.extend(module.capabilities);
        out.extensions.extend(module.extensions);
        out.ext_inst_imports.extend(module.ext_inst_imports);
        out.entry_points.extend(module.entry_points);
        out.execution_modes.extend(module.execution_modes);
        out.debug_string_source.extend(module.debug_string_source);
        out.debug_names.extend(module.debug_names);
        out.debug_module_processed.extend(module.debug_module_processed);
        out.annotations.extend(module.annotations);
        out.types_global_values.extend(module.types_global_values);
        out.functions.extend(module.functions);
    }
    if !diags.is_empty() {
        return Err(diags);
    }

    let mut remap = HashMap::new();
    let mut forgotten = merge_globals(&mut out, &mut remap);
    resolve_imports(&mut out, &mut remap, &mut forgotten)?;
    forget(&mut out, &forgotten);
    for inst in out.all_inst_iter_mut() {
        for id in refs_mut(inst) {
            *id = resolve(&remap, *id);
        }
    }
    if !out.annotations.iter().any(|x| linkage(x).is_some()) {
        out.capabilities.retain(|x| x.operands.first() != Some(&Operand::Capability(Capability::Linkage)));
    }
    // Function declarations precede definitions.
    out.functions.sort_by_key(|f| !f.blocks.is_empty());

    let mut header = dr::ModuleHeader::new(offset);
    header.version = version;
    out.header = Some(header);
    compact_ids(&mut out);
    Ok(out)
}

fn resolve(remap: &HashMap<u32, u32>, mut id: u32) -> u32 {
    while let Some(&next) = remap.get(&id) {
        id = next;
    }
    id
}

fn dedup_by_operands(insts: &mut Vec<Instruction>) {
    let mut seen = Vec::<Vec<Operand>>::new();
    insts.retain(|x| {
        if seen.contains(&x.operands) {
            false
        } else {
            seen.push(x.operands.clone());
            true
        }
    });
}

/// Merges capabilities, extensions, extended instruction set imports, and
/// identical undecorated types and constants. Returns the ids that were
/// merged away.
fn merge_globals(module: &mut dr::Module, remap: &mut HashMap<u32, u32>) -> HashSet<u32> {
    dedup_by_operands(&mut module.capabilities);
    dedup_by_operands(&mut module.extensions);

    let mut forgotten = HashSet::new();
    let mut sets = Vec::<(Vec<Operand>, u32)>::new();
    module.ext_inst_imports.retain(|inst| {
        let id = match inst.result_id {
            Some(x) => x,
            None => return true,
        };
        match sets.iter().find(|(name, _)| *name == inst.operands) {
            Some(&(_, first)) => {
                remap.insert(id, first);
                forgotten.insert(id);
                false
            },
            None => {
                sets.push((inst.operands.clone(), id));
                true
            },
        }
    });

    let mut pinned = module.annotations.iter()
        .filter_map(target)
        .collect::<HashSet<_>>();
    pinned.extend(module.types_global_values.iter()
        .filter(|x| x.class.opcode == Op::TypeForwardPointer)
        .flat_map(refs));
    let mergeable = |op: Op| {
        (reflect::is_type(op) && !matches!(op, Op::TypeStruct | Op::TypeOpaque | Op::TypeForwardPointer))
            || (reflect::is_constant(op) && !is_spec_constant(op))
    };
    let mut seen = HashMap::<Vec<u32>, u32>::new();
    module.types_global_values.retain_mut(|inst| {
        for id in refs_mut(inst) {
            *id = resolve(remap, *id);
        }
        let id = match inst.result_id {
            Some(x) if mergeable(inst.class.opcode) && !pinned.contains(&x) => x,
            _ => return true,
        };
        let mut key = vec![inst.class.opcode as u32, inst.result_type.unwrap_or(0)];
        for operand in inst.operands.iter() {
            operand.assemble_into(&mut key);
        }
        match seen.get(&key) {
            Some(&first) => {
                remap.insert(id, first);
                forgotten.insert(id);
                false
            },
            None => {
                seen.insert(key, id);
                true
            },
        }
    });
    forgotten
}

/// What an imported symbol has to agree on with its export: the kind of
/// definition, its type and, for functions, the function type.
fn signature(module: &dr::Module, remap: &HashMap<u32, u32>, id: u32) -> Option<(Op, u32, u32)> {
    let def = module.functions.iter()
        .filter_map(|f| f.def.as_ref())
        .chain(module.types_global_values.iter())
        .find(|x| x.result_id == Some(id))?;
    let ty = resolve(remap, def.result_type.unwrap_or(0));
    let fn_ty = def.operands.get(1).and_then(Operand::id_ref_any).map_or(0, |x| resolve(remap, x));
    Some((def.class.opcode, ty, fn_ty))
}

fn resolve_imports(
    module: &mut dr::Module,
    remap: &mut HashMap<u32, u32>,
    forgotten: &mut HashSet<u32>,
) -> Result<(), Vec<Diagnostic>> {
    let mut exports = HashMap::<String, u32>::new();
    let mut imports = Vec::new();
    let mut diags = Vec::new();
    for (target, name, kind) in module.annotations.iter().filter_map(linkage) {
        match kind {
            LinkageType::Import => imports.push((target, name.to_owned())),
            LinkageType::Export => {
                if exports.insert(name.to_owned(), target).is_some() {
                    diags.push(Diagnostic::message(format!(
                        "symbol \"{}\" is exported by more than one module", name)));
                }
            },
        }
    }

    let mut resolved = HashSet::new();
    for (import, name) in imports {
        let export = match exports.get(&name) {
            Some(&x) => x,
            None => {
                diags.push(Diagnostic::message(format!("unresolved external reference to \"{}\"", name)));
                continue;
            },
        };
        if signature(module, remap, import) != signature(module, remap, export) {
            diags.push(Diagnostic::message(format!(
                "type of imported symbol \"{}\" does not match its export", name)));
            continue;
        }
        remap.insert(import, export);
        resolved.insert(import);
        resolved.insert(export);
    }
    if !diags.is_empty() {
        return Err(diags);
    }

    module.functions.retain(|f| {
        let keep = f.def_id().map_or(true, |id| !(resolved.contains(&id) && f.blocks.is_empty()));
        if !keep {
            forgotten.extend(f.all_inst_iter().filter_map(|x| x.result_id));
        }
        keep
    });
    module.types_global_values.retain(|inst| {
        let keep = inst.result_id.map_or(true, |id| !remap.contains_key(&id) || !resolved.contains(&id));
        if !keep {
            forgotten.extend(inst.result_id);
        }
        keep
    });

    // An executable keeps no linkage declarations; a library keeps its
    // exports.
    let library = module.entry_points.is_empty();
    module.annotations.retain(|inst| match linkage(inst) {
        Some((_, _, LinkageType::Export)) => library,
        Some((target, _, LinkageType::Import)) => !resolved.contains(&target),
        None => true,
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rspirv::spirv::{AddressingModel, ExecutionMode, ExecutionModel, FunctionControl,
        MemoryModel, StorageClass};

    fn linkage_decoration(name: &str, kind: LinkageType) -> [Operand; 2] {
        [Operand::LiteralString(name.to_owned()), Operand::LinkageType(kind)]
    }

    /// A library exporting `float scale(float)`, which doubles its argument.
    pub(crate) fn scale_library() -> Spirv {
        let mut b = dr::Builder::new();
        b.set_version(1, 3);
        b.capability(Capability::Shader);
        b.capability(Capability::Linkage);
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let float = b.type_float(32);
        let fn_ty = b.type_function(float, vec![float]);
        let two = b.constant_f32(float, 2.0);
        let scale = b.begin_function(float, None, FunctionControl::NONE, fn_ty).unwrap();
        let x = b.function_parameter(float).unwrap();
        b.begin_block(None).unwrap();
        let y = b.f_mul(float, None, x, two).unwrap();
        b.ret_value(y).unwrap();
        b.end_function().unwrap();
        b.name(scale, "scale");
        b.decorate(scale, Decoration::LinkageAttributes, linkage_decoration("scale", LinkageType::Export));
        store(&b.module())
    }

    /// A fragment shader importing `scale` under `import_name`, with an
    /// unused helper function.
    pub(crate) fn scale_shader(import_name: &str) -> Spirv {
        let mut b = dr::Builder::new();
        b.set_version(1, 3);
        b.capability(Capability::Shader);
        b.capability(Capability::Linkage);
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let void = b.type_void();
        let float = b.type_float(32);
        let vec4 = b.type_vector(float, 4);
        let out_ptr = b.type_pointer(None, StorageClass::Output, vec4);
        let color = b.variable(out_ptr, None, StorageClass::Output, None);
        b.decorate(color, Decoration::Location, vec![Operand::LiteralInt32(0)]);
        let half = b.constant_f32(float, 0.5);
        let one = b.constant_f32(float, 1.0);
        let fn_ty = b.type_function(float, vec![float]);
        let main_ty = b.type_function(void, vec![]);

        let scale = b.begin_function(float, None, FunctionControl::NONE, fn_ty).unwrap();
        b.function_parameter(float).unwrap();
        b.end_function().unwrap();
        b.decorate(scale, Decoration::LinkageAttributes, linkage_decoration(import_name, LinkageType::Import));

        let unused = b.begin_function(void, None, FunctionControl::NONE, main_ty).unwrap();
        b.begin_block(None).unwrap();
        b.ret().unwrap();
        b.end_function().unwrap();
        b.name(unused, "unused");

        let main = b.begin_function(void, None, FunctionControl::NONE, main_ty).unwrap();
        b.begin_block(None).unwrap();
        let s = b.function_call(float, None, scale, vec![half]).unwrap();
        let c = b.composite_construct(vec4, None, vec![s, s, s, one]).unwrap();
        b.store(color, c, None, vec![]).unwrap();
        b.ret().unwrap();
        b.end_function().unwrap();
        b.name(main, "main");
        b.entry_point(ExecutionModel::Fragment, main, "main", vec![color]);
        b.execution_mode(main, ExecutionMode::OriginUpperLeft, vec![]);
        store(&b.module())
    }

    fn count(spv: &Spirv, opcode: Op) -> usize {
        spv.instructions().filter(|x| x.opcode == opcode as u16).count()
    }

    #[test]
    fn structural_errors_are_reported() {
        // No OpMemoryModel, and a type whose id is past the bound.
        let words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 5,
            0, (2 << 16) | 17, 1, (2 << 16) | 19, 7];
        let diags = StructuralVerifier::new().check(&Spirv::from_words(words));
        let text = Diagnostic::join(&diags);
        assert!(text.contains("missing OpMemoryModel"), "{}", text);
        assert!(text.contains("%7"), "{}", text);
        assert!(text.contains("no OpEntryPoint"), "{}", text);

        let diags = StructuralVerifier::new().check(&Spirv::from_words(vec![1, 2, 3]));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn undefined_ids_are_reported() {
        let mut module = load(&scale_library()).unwrap();
        module.types_global_values.retain(|x| x.class.opcode != Op::TypeFloat);
        let diags = StructuralVerifier::new().check(&store(&module));
        assert!(diags.iter().any(|x| x.message.contains("never defined")));
    }

    #[test]
    fn well_formed_modules_reach_the_layered_verifier() {
        struct Reject;
        impl Verifier for Reject {
            fn check(&self, _: &Spirv) -> Vec<Diagnostic> {
                vec![Diagnostic::message("rejected")]
            }
        }
        let verifier = StructuralVerifier::layered(Box::new(Reject));
        // Libraries are checked structurally only.
        assert!(verifier.check(&scale_library()).is_empty());
        let linked = RspirvLinker.link(&[scale_shader("scale"), scale_library()]).unwrap();
        assert_eq!(Diagnostic::join(&verifier.check(&linked)), "rejected");
    }

    #[test]
    fn imports_resolve_against_exports() {
        let linked = RspirvLinker.link(&[scale_shader("scale"), scale_library()]).unwrap();
        assert!(linked.linkage_symbols().is_empty());
        assert_eq!(count(&linked, Op::Capability), 1);
        assert_eq!(count(&linked, Op::TypeFloat), 1);
        // `scale`, `unused` and `main`, with the import declaration gone.
        assert_eq!(count(&linked, Op::Function), 3);
        assert_eq!(count(&linked, Op::FunctionParameter), 1);
        assert_eq!(linked.entry_point_names(), ["main"]);
        assert!(StructuralVerifier::new().check(&linked).is_empty());

        let bound = linked.header().unwrap().bound;
        let max_id = load(&linked).unwrap()
            .all_inst_iter()
            .filter_map(|x| x.result_id)
            .max()
            .unwrap();
        assert_eq!(bound, max_id + 1);
    }

    #[test]
    fn unresolved_and_mismatched_imports_fail() {
        let diags = RspirvLinker.link(&[scale_shader("shift"), scale_library()]).unwrap_err();
        assert!(Diagnostic::join(&diags).contains("unresolved external reference to \"shift\""));

        let mut module = load(&scale_library()).unwrap();
        let int = module.header.as_ref().unwrap().bound;
        module.header.as_mut().unwrap().bound += 1;
        let float_pos = module.types_global_values.iter()
            .position(|x| x.class.opcode == Op::TypeFloat)
            .unwrap();
        module.types_global_values.insert(float_pos + 1, Instruction::new(
            Op::TypeInt, None, Some(int), vec![Operand::LiteralInt32(32), Operand::LiteralInt32(1)]));
        let def = module.functions[0].def.as_mut().unwrap();
        def.result_type = Some(int);
        let diags = RspirvLinker.link(&[scale_shader("scale"), store(&module)]).unwrap_err();
        assert!(Diagnostic::join(&diags).contains("does not match its export"));
    }

    #[test]
    fn linking_libraries_keeps_exports() {
        let linked = RspirvLinker.link(&[scale_library()]).unwrap();
        assert_eq!(linked.linkage_symbols().len(), 1);
        assert_eq!(count(&linked, Op::Capability), 2);
    }

    #[test]
    fn pass_sets_differ() {
        let spv = RspirvLinker.link(&[scale_shader("scale"), scale_library()]).unwrap();
        let fast = DeadCodeOptimizer.run(&spv, PassSet::Performance).unwrap();
        let small = DeadCodeOptimizer.run(&spv, PassSet::Size).unwrap();

        // `unused` is gone from both, names only from the size build.
        assert_eq!(count(&fast, Op::Function), 2);
        assert_eq!(count(&small, Op::Function), 2);
        assert!(count(&fast, Op::Name) > 0);
        assert_eq!(count(&small, Op::Name), 0);
        assert!(small.len() < fast.len());
        assert!(fast.len() < spv.len());
        assert!(small.header().unwrap().bound <= fast.header().unwrap().bound);
        for out in [&fast, &small] {
            assert!(StructuralVerifier::new().check(out).is_empty());
        }
    }

    #[test]
    fn modules_without_roots_are_left_intact() {
        let mut module = load(&scale_library()).unwrap();
        module.annotations.clear();
        let spv = store(&module);
        let out = DeadCodeOptimizer.run(&spv, PassSet::Performance).unwrap();
        assert_eq!(out, spv);
    }
}
