//! Stateless operations over SPIR-V modules.
//!
//! Each operation takes the tool it delegates to explicitly and never
//! modifies its input module.

use std::collections::{HashMap, HashSet};

use crate::backend::{Backend, Disassembler, Frontend, GenerateOptions, Linker,
    Optimizer, ParseOptions, PassSet, Verifier};
use crate::error::{Diagnostic, Error, Result};
use crate::ir::{LinkageKind, Spirv};
use crate::lang::ShaderStage;

/// What [`validate`] does with a module that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// Fail with [`Error::Validation`].
    #[default]
    Fail,
    /// Return the diagnostics to the caller.
    Report,
}

/// Check `spv` for structural and semantic validity. Returns `None` for a
/// valid module, or the newline-joined diagnostics under
/// [`ValidationPolicy::Report`].
pub fn validate(
    verifier: &dyn Verifier,
    spv: &Spirv,
    policy: ValidationPolicy,
) -> Result<Option<String>> {
    let diags = verifier.check(spv);
    if diags.is_empty() {
        return Ok(None);
    }
    let diagnostics = Diagnostic::join(&diags);
    match policy {
        ValidationPolicy::Fail => Err(Error::Validation { diagnostics }),
        ValidationPolicy::Report => {
            tracing::warn!(ndiag = diags.len(), "SPIR-V module failed validation");
            Ok(Some(diagnostics))
        },
    }
}

/// Run the performance pass set, or the size pass set if `for_speed` is
/// false.
pub fn optimize(optimizer: &dyn Optimizer, spv: &Spirv, for_speed: bool) -> Result<Spirv> {
    let passes = if for_speed { PassSet::Performance } else { PassSet::Size };
    let out = optimizer.run(spv, passes)
        .map_err(|diags| Error::Optimization { diagnostics: Diagnostic::join(&diags) })?;
    tracing::debug!(?passes, before = spv.len(), after = out.len(), "optimized SPIR-V module");
    Ok(out)
}

/// Link `spvs` into a single module.
///
/// Linkage declarations are checked up front: every import must be exported
/// by some module and no symbol may be exported twice, unless it's declared
/// link-once-ODR. A module set failing these checks never reaches the
/// linker.
pub fn link(linker: &dyn Linker, spvs: &[Spirv]) -> Result<Spirv> {
    check_linkage(spvs)?;
    let out = linker.link(spvs)
        .map_err(|diags| Error::link(Diagnostic::join(&diags)))?;
    tracing::debug!(nmodule = spvs.len(), "linked SPIR-V modules");
    Ok(out)
}

fn check_linkage(spvs: &[Spirv]) -> Result<()> {
    if spvs.is_empty() {
        return Err(Error::link(Diagnostic::message("no modules to link").to_string()));
    }

    let mut exports = HashMap::<String, usize>::new();
    let mut odr = HashSet::<String>::new();
    let mut imports = Vec::new();
    for spv in spvs {
        for sym in spv.linkage_symbols() {
            match sym.kind {
                LinkageKind::Export => *exports.entry(sym.name).or_default() += 1,
                LinkageKind::LinkOnceOdr => { odr.insert(sym.name); },
                LinkageKind::Import => imports.push(sym.name),
            }
        }
    }

    let mut diags = Vec::new();
    for name in imports.iter() {
        if !exports.contains_key(name) && !odr.contains(name) {
            diags.push(Diagnostic::message(format!(
                "unresolved external reference to \"{}\"", name)));
        }
    }
    let mut duplicates = exports.iter()
        .filter(|(_, n)| **n > 1)
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>();
    duplicates.sort_unstable();
    for name in duplicates {
        diags.push(Diagnostic::message(format!(
            "symbol \"{}\" is exported by more than one module", name)));
    }

    if diags.is_empty() {
        Ok(())
    } else {
        Err(Error::link(Diagnostic::join(&diags)))
    }
}

pub fn disassemble(disassembler: &dyn Disassembler, spv: &Spirv) -> Result<String> {
    disassembler.disassemble(spv)
        .map_err(|diags| Error::Disassembly { diagnostics: Diagnostic::join(&diags) })
}

/// Round-trip `spv` through GLSL: generate GLSL for `(stage, entry_point)`
/// and parse it back. The result exposes a single entry point named `main`.
/// Generator and parser errors are returned unchanged.
pub fn canonicalize(
    generator: &dyn Backend,
    parser: &dyn Frontend,
    spv: &Spirv,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<Spirv> {
    let gen_opts = GenerateOptions {
        stage: Some(stage),
        entry: entry_point.to_owned(),
        ..Default::default()
    };
    let glsl = generator.generate(spv, &gen_opts)?;
    let glsl = glsl.as_text()
        .ok_or_else(|| Error::codegen("GLSL generator returned binary output"))?;

    let parse_opts = ParseOptions {
        stage: Some(stage),
        ..Default::default()
    };
    let out = parser.parse(glsl, &parse_opts)?;
    tracing::debug!(%stage, entry_point, "canonicalized SPIR-V module");
    Ok(out)
}
