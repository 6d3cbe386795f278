//! Translators backed by naga: WGSL and GLSL parsing, code generation for
//! every naga output language and semantic validation.

use naga::back::spv::WriterFlags;
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::Module;

use crate::backend::{Backend, Frontend, GenerateOptions, GlslOptions, HlslOptions,
    MslOptions, Output, ParseOptions, SpirvOptions, Verifier};
use crate::context::Context;
use crate::error::{Diagnostic, Error, Result};
use crate::ir::{Spirv, SPIRV_MAGIC};
use crate::lang::{Language, ShaderStage};
use crate::session::{Diagnosed, Session, SessionTranslator, Target};

pub(crate) fn register(ctx: &mut Context) {
    ctx.register_frontend(Language::Wgsl, WgslFrontend)
        .register_frontend(Language::Glsl, GlslFrontend)
        .register_backend(Language::Glsl, NagaBackend::new(Language::Glsl))
        .register_backend(Language::Hlsl, NagaBackend::new(Language::Hlsl))
        .register_backend(Language::Msl, NagaBackend::new(Language::Msl))
        .register_backend(Language::Wgsl, NagaBackend::new(Language::Wgsl))
        .register_backend(Language::Spirv, NagaBackend::new(Language::Spirv))
        .set_verifier(NagaVerifier);
}

fn naga_stage(stage: ShaderStage) -> Result<naga::ShaderStage> {
    let stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
        x => return Err(Error::unsupported(format!("naga cannot translate {} shaders", x))),
    };
    Ok(stage)
}

fn validate_module(module: &Module) -> std::result::Result<ModuleInfo, String> {
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(module)
        .map_err(|e| e.as_inner().to_string())
}

fn read_spirv(spv: &Spirv) -> std::result::Result<Module, String> {
    naga::front::spv::parse_u8_slice(spv.as_bytes(), &naga::front::spv::Options::default())
        .map_err(|e| e.to_string())
}

fn write_spirv(
    module: &Module,
    info: &ModuleInfo,
    opts: &SpirvOptions,
    entry: Option<(naga::ShaderStage, &str)>,
) -> std::result::Result<Spirv, String> {
    let mut spv_opts = naga::back::spv::Options::default();
    spv_opts.lang_version = opts.version;
    spv_opts.flags.set(WriterFlags::DEBUG, opts.debug);
    spv_opts.flags.set(WriterFlags::ADJUST_COORDINATE_SPACE, opts.y_flip);
    let pipeline = entry.map(|(shader_stage, entry_point)| naga::back::spv::PipelineOptions {
        shader_stage,
        entry_point: entry_point.to_owned(),
    });
    let words = naga::back::spv::write_vec(module, info, &spv_opts, pipeline.as_ref())
        .map_err(|e| e.to_string())?;
    Ok(Spirv::from_words(words))
}

fn write_glsl(
    module: &Module,
    info: &ModuleInfo,
    stage: naga::ShaderStage,
    entry: &str,
    opts: &GlslOptions,
) -> std::result::Result<String, String> {
    use naga::back::glsl;

    let version = if opts.es {
        glsl::Version::Embedded { version: opts.version, is_webgl: false }
    } else {
        glsl::Version::Desktop(opts.version)
    };
    let options = glsl::Options { version, ..Default::default() };
    let pipeline = glsl::PipelineOptions {
        shader_stage: stage,
        entry_point: entry.to_owned(),
        multiview: None,
    };
    let mut out = String::new();
    let mut writer = glsl::Writer::new(&mut out, module, info, &options, &pipeline,
        naga::proc::BoundsCheckPolicies::default())
        .map_err(|e| e.to_string())?;
    writer.write().map_err(|e| e.to_string())?;
    Ok(out)
}

fn write_hlsl(module: &Module, info: &ModuleInfo, opts: &HlslOptions) -> std::result::Result<String, String> {
    use naga::back::hlsl;

    let shader_model = match opts.shader_model {
        50 => hlsl::ShaderModel::V5_0,
        51 => hlsl::ShaderModel::V5_1,
        60 => hlsl::ShaderModel::V6_0,
        x => return Err(format!("unsupported HLSL shader model {}.{}", x / 10, x % 10)),
    };
    let options = hlsl::Options { shader_model, ..Default::default() };
    let mut out = String::new();
    hlsl::Writer::new(&mut out, &options)
        .write(module, info, None)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

fn write_msl(module: &Module, info: &ModuleInfo, opts: &MslOptions) -> std::result::Result<String, String> {
    use naga::back::msl;

    let options = msl::Options { lang_version: opts.lang_version, ..Default::default() };
    let (out, _) = msl::write_string(module, info, &options, &msl::PipelineOptions::default())
        .map_err(|e| e.to_string())?;
    Ok(out)
}

fn write_wgsl(module: &Module, info: &ModuleInfo) -> std::result::Result<String, String> {
    naga::back::wgsl::write_string(module, info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|e| e.to_string())
}

/// WGSL to SPIR-V. Every entry point of the source is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgslFrontend;
impl Frontend for WgslFrontend {
    fn parse(&self, src: &str, opts: &ParseOptions) -> Result<Spirv> {
        let module = naga::front::wgsl::parse_str(src)
            .map_err(|e| Error::parse(e.emit_to_string(src)))?;
        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| Error::parse(e.emit_to_string(src)))?;
        let spv_opts = SpirvOptions { debug: opts.debug, ..Default::default() };
        write_spirv(&module, &info, &spv_opts, None).map_err(Error::codegen)
    }
}

/// GLSL to SPIR-V. naga only accepts `main` as the entry point and needs to
/// be told the stage up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlslFrontend;
impl Frontend for GlslFrontend {
    fn parse(&self, src: &str, opts: &ParseOptions) -> Result<Spirv> {
        let stage = opts.stage
            .ok_or_else(|| Error::InvalidOptions("parsing GLSL requires a shader stage".to_owned()))?;
        if opts.entry != "main" {
            tracing::warn!(entry = %opts.entry, "naga parses GLSL with `main` as the entry point");
        }
        let glsl_opts = naga::front::glsl::Options::from(naga_stage(stage)?);
        let module = naga::front::glsl::Frontend::default()
            .parse(&glsl_opts, src)
            .map_err(|e| Error::parse(e.to_string()))?;
        let info = validate_module(&module).map_err(Error::parse)?;
        let spv_opts = SpirvOptions { debug: opts.debug, ..Default::default() };
        write_spirv(&module, &info, &spv_opts, None).map_err(Error::codegen)
    }
}

/// SPIR-V to one of naga's output languages.
#[derive(Debug, Clone, Copy)]
pub struct NagaBackend {
    lang: Language,
}
impl NagaBackend {
    pub fn new(lang: Language) -> Self {
        NagaBackend { lang }
    }
}
impl Backend for NagaBackend {
    fn generate(&self, spv: &Spirv, opts: &GenerateOptions) -> Result<Output> {
        let module = read_spirv(spv).map_err(Error::parse)?;
        let info = validate_module(&module).map_err(Error::codegen)?;
        let out = match self.lang {
            Language::Glsl => {
                let stage = opts.stage.ok_or_else(|| {
                    Error::InvalidOptions("generating GLSL requires a shader stage".to_owned())
                })?;
                let stage = naga_stage(stage)?;
                Output::Text(write_glsl(&module, &info, stage, &opts.entry, &opts.glsl)
                    .map_err(Error::codegen)?)
            },
            Language::Hlsl => Output::Text(write_hlsl(&module, &info, &opts.hlsl).map_err(Error::codegen)?),
            Language::Msl => Output::Text(write_msl(&module, &info, &opts.msl).map_err(Error::codegen)?),
            Language::Wgsl => Output::Text(write_wgsl(&module, &info).map_err(Error::codegen)?),
            Language::Spirv => {
                let entry = match opts.stage {
                    Some(stage) => Some((naga_stage(stage)?, opts.entry.as_str())),
                    None => None,
                };
                Output::Binary(write_spirv(&module, &info, &opts.spirv, entry).map_err(Error::codegen)?)
            },
            x => return Err(Error::unsupported(format!("naga cannot generate {}", x))),
        };
        Ok(out)
    }
}

/// naga's SPIR-V front end and IR validator. This checks what naga can
/// represent, not the module's binary layout; the `rspirv` feature puts a
/// structural verifier in front of it. Findings carry no position.
#[derive(Debug, Clone, Copy, Default)]
pub struct NagaVerifier;
impl Verifier for NagaVerifier {
    fn check(&self, spv: &Spirv) -> Vec<Diagnostic> {
        match spv.header() {
            Some(header) if header.magic == SPIRV_MAGIC => {},
            _ => return vec![Diagnostic::message("invalid SPIR-V magic number")],
        }
        let module = match read_spirv(spv) {
            Ok(x) => x,
            Err(e) => return vec![Diagnostic::message(e)],
        };
        match validate_module(&module) {
            Ok(_) => Vec::new(),
            Err(e) => vec![Diagnostic::message(e)],
        }
    }
}

/// A parsed WGSL source unit.
#[derive(Debug, Clone)]
pub struct WgslModule {
    pub name: String,
    pub module: Module,
}

/// A module reduced to a single entry point.
#[derive(Debug)]
pub struct WgslProgram {
    module: Module,
    info: ModuleInfo,
    stage: naga::ShaderStage,
    entry_point: String,
}

/// Session translator for WGSL sources, which can hold any number of entry
/// points per module.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgslTranslator;
impl SessionTranslator for WgslTranslator {
    type Module = WgslModule;
    type Program = WgslProgram;

    fn load(&mut self, source: &str, path: &str, module_name: &str) -> Diagnosed<WgslModule> {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(x) => x,
            Err(e) => return Diagnosed::failed(e.emit_to_string_with_path(source, path)),
        };
        if let Err(e) = Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module) {
            return Diagnosed::failed(e.emit_to_string_with_path(source, path));
        }
        Diagnosed::ok(WgslModule { name: module_name.to_owned(), module })
    }

    fn has_entry_point(&self, module: &WgslModule, entry_point: &str) -> bool {
        module.module.entry_points.iter().any(|x| x.name == entry_point)
    }

    fn compose(&mut self, module: &WgslModule, entry_point: &str) -> Diagnosed<WgslProgram> {
        let mut module = module.module.clone();
        module.entry_points.retain(|x| x.name == entry_point);
        let stage = match module.entry_points.first() {
            Some(x) => x.stage,
            None => return Diagnosed::failed(format!("error: entry point `{}` is missing", entry_point)),
        };
        naga::compact::compact(&mut module);
        match validate_module(&module) {
            Ok(info) => Diagnosed::ok(WgslProgram {
                module,
                info,
                stage,
                entry_point: entry_point.to_owned(),
            }),
            Err(e) => Diagnosed::failed(format!("error: {}", e)),
        }
    }

    fn generate(&mut self, program: &WgslProgram, target: &Target) -> Diagnosed<Vec<u8>> {
        let WgslProgram { module, info, stage, entry_point } = program;
        let out = match target {
            Target::Spirv(opts) => write_spirv(module, info, opts, Some((*stage, entry_point.as_str())))
                .map(|x| x.as_bytes().to_vec()),
            Target::Glsl(opts) => write_glsl(module, info, *stage, entry_point, opts)
                .map(String::into_bytes),
            Target::Hlsl(opts) => write_hlsl(module, info, opts).map(String::into_bytes),
            Target::Msl(opts) => write_msl(module, info, opts).map(String::into_bytes),
            Target::Wgsl => write_wgsl(module, info).map(String::into_bytes),
        };
        match out {
            Ok(x) => Diagnosed::ok(x),
            Err(e) => Diagnosed::failed(format!("error: {}", e)),
        }
    }
}

/// A session reading WGSL and writing to `targets`.
pub fn wgsl_session(targets: impl Into<Vec<Target>>) -> Session<WgslTranslator> {
    Session::new(WgslTranslator, targets)
}
