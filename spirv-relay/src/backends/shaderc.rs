use std::path::Path;

use crate::backend::{Frontend, ParseOptions};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ir::Spirv;
use crate::lang::{Language, ShaderStage};
use crate::preprocess::resolve::{FileSystem, IncludeResolver};
use crate::preprocess::{SearchRoots, SourceCache};

pub(crate) fn register(ctx: &mut Context) {
    ctx.register_frontend(Language::Glsl, ShadercFrontend::new(Language::Glsl))
        .register_frontend(Language::Hlsl, ShadercFrontend::new(Language::Hlsl));
}

/// GLSL and HLSL to SPIR-V with shaderc. Includes left in the source are
/// resolved the same way the preprocessor resolves them.
#[derive(Debug, Clone)]
pub struct ShadercFrontend {
    lang: Language,
    roots: SearchRoots,
    defines: Vec<(String, Option<String>)>,
}
impl ShadercFrontend {
    pub fn new(lang: Language) -> Self {
        ShadercFrontend { lang, roots: SearchRoots::default(), defines: Vec::new() }
    }
    pub fn with_search_roots(mut self, roots: SearchRoots) -> Self {
        self.roots = roots;
        self
    }
    pub fn define(mut self, name: &str, value: Option<&str>) -> Self {
        self.defines.push((name.to_owned(), value.map(str::to_owned)));
        self
    }
}

fn shader_kind(stage: Option<ShaderStage>) -> shaderc::ShaderKind {
    match stage {
        None                                    => shaderc::ShaderKind::InferFromSource,
        Some(ShaderStage::Vertex)                => shaderc::ShaderKind::DefaultVertex,
        Some(ShaderStage::TesselationControl)    => shaderc::ShaderKind::DefaultTessControl,
        Some(ShaderStage::TesselationEvaluation) => shaderc::ShaderKind::DefaultTessEvaluation,
        Some(ShaderStage::Geometry)              => shaderc::ShaderKind::DefaultGeometry,
        Some(ShaderStage::Fragment)              => shaderc::ShaderKind::DefaultFragment,
        Some(ShaderStage::Compute)               => shaderc::ShaderKind::DefaultCompute,
        Some(ShaderStage::Mesh)                  => shaderc::ShaderKind::DefaultMesh,
        Some(ShaderStage::Task)                  => shaderc::ShaderKind::DefaultTask,
        Some(ShaderStage::RayGeneration)         => shaderc::ShaderKind::DefaultRayGeneration,
        Some(ShaderStage::Intersection)          => shaderc::ShaderKind::DefaultIntersection,
        Some(ShaderStage::AnyHit)                => shaderc::ShaderKind::DefaultAnyHit,
        Some(ShaderStage::ClosestHit)            => shaderc::ShaderKind::DefaultClosestHit,
        Some(ShaderStage::Miss)                  => shaderc::ShaderKind::DefaultMiss,
        Some(ShaderStage::Callable)              => shaderc::ShaderKind::DefaultCallable,
    }
}

impl Frontend for ShadercFrontend {
    fn parse(&self, src: &str, opts: &ParseOptions) -> Result<Spirv> {
        use shaderc::{IncludeType, ResolvedInclude};

        let lang = match self.lang {
            Language::Glsl => shaderc::SourceLanguage::GLSL,
            Language::Hlsl => shaderc::SourceLanguage::HLSL,
            x => return Err(Error::unsupported(format!("shaderc cannot parse {}", x))),
        };
        let (target_env, env_version) = if opts.vulkan {
            (shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_1)
        } else {
            (shaderc::TargetEnv::OpenGL, shaderc::EnvVersion::OpenGL4_5)
        };

        let cache = SourceCache::default();
        let mut opt = shaderc::CompileOptions::new()
            .ok_or_else(|| Error::parse("cannot create `shaderc::CompileOptions`"))?;
        opt.set_target_env(target_env, env_version as u32);
        opt.set_source_language(lang);
        opt.set_include_callback(|name, ty, src_path, _depth| {
            let resolver = IncludeResolver {
                roots: &self.roots,
                cache: &cache,
                provider: &FileSystem,
                synthesize_guards: true,
            };
            let is_system = matches!(ty, IncludeType::Standard);
            let found = resolver.resolve(name, is_system, Some(Path::new(src_path)))
                .map_err(|e| e.to_string())?;
            let resolved_name = found.path().to_string_lossy().into_owned();
            Ok(ResolvedInclude { resolved_name, content: found.into_text() })
        });
        for (k, v) in self.defines.iter() {
            opt.add_macro_definition(k, v.as_deref());
        }
        if opts.debug {
            opt.set_generate_debug_info();
        }

        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| Error::parse("cannot create `shaderc::Compiler`"))?;
        let path = opts.path.as_deref().unwrap_or("<inline>");
        let out = compiler
            .compile_into_spirv(src, shader_kind(opts.stage), path, &opts.entry, Some(&opt))
            .map_err(|e| Error::parse(e.to_string()))?;
        if out.get_num_warnings() != 0 {
            tracing::warn!(path, "{}", out.get_warning_messages());
        }
        Ok(Spirv::from_words(out.as_binary()))
    }
}
