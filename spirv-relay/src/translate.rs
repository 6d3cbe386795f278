//! One-shot translation jobs.
//!
//! A job parses its source into SPIR-V, validates it, optionally optimizes
//! and canonicalizes it, and finally hands it to the generator of the
//! target language.

use std::path::Path;

use crate::backend::{GenerateOptions, GlslOptions, HlslOptions, MslOptions, Output,
    ParseOptions, PassSet, SpirvOptions};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ir::Spirv;
use crate::lang::{Language, ShaderStage};
use crate::pipeline::ValidationPolicy;
use crate::preprocess::resolve::SourceProvider;
use crate::preprocess::{Preprocessor, ProcessingConfig};

/// Input of a translation job.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Text(&'a str),
    Spirv(&'a Spirv),
}

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    /// Whitespace is removed before use.
    pub entry_point: String,
    pub stage: Option<ShaderStage>,
    /// Where the source came from, for diagnostics.
    pub path: Option<String>,
    /// `None` skips validation.
    pub validation: Option<ValidationPolicy>,
    pub optimize: Option<PassSet>,
    /// Round-trip through GLSL before generating. Requires a stage; the
    /// entry point is renamed to `main`.
    pub canonicalize: bool,
    pub debug: bool,
    pub glsl: GlslOptions,
    pub hlsl: HlslOptions,
    pub msl: MslOptions,
    /// Anything but the default re-emits the module through the registered
    /// SPIR-V generator.
    pub spirv: SpirvOptions,
}
impl Default for TranslateOptions {
    fn default() -> TranslateOptions {
        TranslateOptions {
            entry_point: "main".to_owned(),
            stage: None,
            path: None,
            validation: Some(ValidationPolicy::Fail),
            optimize: None,
            canonicalize: false,
            debug: true,
            glsl: GlslOptions::default(),
            hlsl: HlslOptions::default(),
            msl: MslOptions::default(),
            spirv: SpirvOptions::default(),
        }
    }
}

/// Translate `source`, written in `from`, to `to`.
pub fn translate(
    ctx: &Context,
    source: Source<'_>,
    from: Language,
    to: Language,
    opts: &TranslateOptions,
) -> Result<Output> {
    let entry_point = opts.entry_point.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    if to == Language::Glsl && opts.stage.is_none() {
        return Err(Error::InvalidOptions("generating GLSL requires a shader stage".to_owned()));
    }

    let mut spv = match source {
        Source::Spirv(spv) if from == Language::Spirv => spv.clone(),
        Source::Spirv(_) => {
            return Err(Error::InvalidOptions(format!("binary input cannot be {}", from)));
        },
        Source::Text(_) if from == Language::Spirv => {
            return Err(Error::InvalidOptions("SPIR-V input must be binary".to_owned()));
        },
        Source::Text(text) => {
            let parse_opts = ParseOptions {
                stage: opts.stage,
                entry: entry_point.clone(),
                path: opts.path.clone(),
                vulkan: opts.glsl.vulkan,
                debug: opts.debug,
            };
            ctx.parse(from, text, &parse_opts)?
        },
    };

    if let Some(policy) = opts.validation {
        if let Some(diags) = ctx.validate(&spv, policy)? {
            tracing::warn!(path = ?opts.path, "{}", diags);
        }
    }
    if let Some(passes) = opts.optimize {
        spv = ctx.optimize(&spv, passes == PassSet::Performance)?;
    }
    let entry_point = if opts.canonicalize {
        let stage = opts.stage.ok_or_else(|| {
            Error::InvalidOptions("canonicalization requires a shader stage".to_owned())
        })?;
        spv = ctx.canonicalize(&spv, stage, &entry_point)?;
        "main".to_owned()
    } else {
        entry_point
    };

    let out = match to {
        // Custom SPIR-V options need a generator to re-emit the module.
        Language::Spirv if opts.spirv == SpirvOptions::default() => Output::Binary(spv),
        Language::SpirvAsm => Output::Text(ctx.disassemble(&spv)?),
        lang => {
            let gen_opts = GenerateOptions {
                stage: opts.stage,
                entry: entry_point,
                glsl: opts.glsl,
                hlsl: opts.hlsl,
                msl: opts.msl,
                spirv: opts.spirv,
            };
            ctx.generate(lang, &spv, &gen_opts)?
        },
    };
    tracing::debug!(%from, %to, "translated shader");
    Ok(out)
}

/// Translate the file at `path`. Text sources go through `pp` first;
/// `.spv` binaries are read as they are.
pub fn translate_file<P: SourceProvider>(
    ctx: &Context,
    pp: &mut Preprocessor<P>,
    path: impl AsRef<Path>,
    from: Language,
    to: Language,
    cfg: &ProcessingConfig,
    opts: &TranslateOptions,
) -> Result<Output> {
    let path = path.as_ref();
    let opts = TranslateOptions {
        path: Some(path.to_string_lossy().into_owned()),
        ..opts.clone()
    };
    if from == Language::Spirv {
        let bytes = std::fs::read(path)
            .map_err(|source| Error::Io { path: path.to_owned(), source })?;
        let spv = Spirv::from_bytes(&bytes)?;
        return translate(ctx, Source::Spirv(&spv), from, to, &opts);
    }
    let text = pp.process(path, cfg)?;
    translate(ctx, Source::Text(&text), from, to, &opts)
}
