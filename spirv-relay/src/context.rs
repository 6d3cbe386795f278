//! Process-wide translator registry.
//!
//! Translators are registered once, when the global context is first
//! requested through [`ensure_initialized`]. Embedders that need a different
//! set of translators, and tests, can build their own [`Context`].

use std::collections::HashMap;

use once_cell::sync::OnceCell;

use crate::backend::{Backend, Disassembler, Frontend, GenerateOptions, Linker,
    Optimizer, Output, ParseOptions, Verifier};
use crate::error::{Error, Result};
use crate::ir::Spirv;
use crate::lang::{Language, ShaderStage};
use crate::pipeline::{self, ValidationPolicy};

static CONTEXT: OnceCell<Context> = OnceCell::new();

/// The global context, with every translator enabled in this build. The
/// first call registers the translators; concurrent first calls are safe and
/// later calls are free.
pub fn ensure_initialized() -> &'static Context {
    CONTEXT.get_or_init(|| {
        let ctx = Context::with_default_backends();
        tracing::debug!(
            frontends = ?ctx.frontend_languages(),
            backends = ?ctx.backend_languages(),
            "translator context initialized");
        ctx
    })
}

pub fn is_initialized() -> bool {
    CONTEXT.get().is_some()
}

#[derive(Default)]
pub struct Context {
    frontends: HashMap<Language, Box<dyn Frontend>>,
    backends: HashMap<Language, Box<dyn Backend>>,
    verifier: Option<Box<dyn Verifier>>,
    optimizer: Option<Box<dyn Optimizer>>,
    linker: Option<Box<dyn Linker>>,
    disassembler: Option<Box<dyn Disassembler>>,
}
impl Context {
    /// A context without any translator.
    pub fn empty() -> Self {
        Context::default()
    }
    /// A context with every translator enabled by cargo features.
    pub fn with_default_backends() -> Self {
        let mut ctx = Context::empty();
        crate::backends::register_defaults(&mut ctx);
        ctx
    }

    /// Register the parser for `lang`, replacing any previous one.
    pub fn register_frontend(&mut self, lang: Language, frontend: impl Frontend + 'static) -> &mut Self {
        self.frontends.insert(lang, Box::new(frontend));
        self
    }
    /// Register the generator for `lang`, replacing any previous one.
    pub fn register_backend(&mut self, lang: Language, backend: impl Backend + 'static) -> &mut Self {
        self.backends.insert(lang, Box::new(backend));
        self
    }
    pub fn set_verifier(&mut self, verifier: impl Verifier + 'static) -> &mut Self {
        self.verifier = Some(Box::new(verifier));
        self
    }
    /// Remove the registered verifier, typically to wrap it in another one.
    pub fn take_verifier(&mut self) -> Option<Box<dyn Verifier>> {
        self.verifier.take()
    }
    pub fn set_optimizer(&mut self, optimizer: impl Optimizer + 'static) -> &mut Self {
        self.optimizer = Some(Box::new(optimizer));
        self
    }
    pub fn set_linker(&mut self, linker: impl Linker + 'static) -> &mut Self {
        self.linker = Some(Box::new(linker));
        self
    }
    pub fn set_disassembler(&mut self, disassembler: impl Disassembler + 'static) -> &mut Self {
        self.disassembler = Some(Box::new(disassembler));
        self
    }

    pub fn frontend_languages(&self) -> Vec<Language> {
        let mut out = self.frontends.keys().copied().collect::<Vec<_>>();
        out.sort_by_key(|x| x.name());
        out
    }
    pub fn backend_languages(&self) -> Vec<Language> {
        let mut out = self.backends.keys().copied().collect::<Vec<_>>();
        out.sort_by_key(|x| x.name());
        out
    }

    pub fn frontend(&self, lang: Language) -> Result<&dyn Frontend> {
        self.frontends.get(&lang)
            .map(|x| x.as_ref())
            .ok_or_else(|| Error::unsupported(format!("no {} front end is enabled", lang)))
    }
    pub fn backend(&self, lang: Language) -> Result<&dyn Backend> {
        self.backends.get(&lang)
            .map(|x| x.as_ref())
            .ok_or_else(|| Error::unsupported(format!("no {} back end is enabled", lang)))
    }
    pub fn verifier(&self) -> Result<&dyn Verifier> {
        self.verifier.as_deref()
            .ok_or_else(|| Error::unsupported("no SPIR-V verifier is enabled"))
    }
    pub fn optimizer(&self) -> Result<&dyn Optimizer> {
        self.optimizer.as_deref()
            .ok_or_else(|| Error::unsupported("no SPIR-V optimizer is enabled"))
    }
    pub fn disassembler(&self) -> Result<&dyn Disassembler> {
        self.disassembler.as_deref()
            .ok_or_else(|| Error::unsupported("no SPIR-V disassembler is enabled"))
    }

    pub fn parse(&self, lang: Language, src: &str, opts: &ParseOptions) -> Result<Spirv> {
        let spv = self.frontend(lang)?.parse(src, opts)?;
        tracing::debug!(%lang, nword = spv.len(), "parsed shader source");
        Ok(spv)
    }
    pub fn generate(&self, lang: Language, spv: &Spirv, opts: &GenerateOptions) -> Result<Output> {
        self.backend(lang)?.generate(spv, opts)
    }

    pub fn validate(&self, spv: &Spirv, policy: ValidationPolicy) -> Result<Option<String>> {
        pipeline::validate(self.verifier()?, spv, policy)
    }
    pub fn optimize(&self, spv: &Spirv, for_speed: bool) -> Result<Spirv> {
        pipeline::optimize(self.optimizer()?, spv, for_speed)
    }
    /// Fails with [`Error::Link`] when no linker is registered.
    pub fn link(&self, spvs: &[Spirv]) -> Result<Spirv> {
        let linker = self.linker.as_deref()
            .ok_or_else(|| Error::link("no SPIR-V linker is available"))?;
        pipeline::link(linker, spvs)
    }
    pub fn disassemble(&self, spv: &Spirv) -> Result<String> {
        pipeline::disassemble(self.disassembler()?, spv)
    }
    /// Round-trip through the registered GLSL generator and parser.
    pub fn canonicalize(&self, spv: &Spirv, stage: ShaderStage, entry_point: &str) -> Result<Spirv> {
        pipeline::canonicalize(
            self.backend(Language::Glsl)?,
            self.frontend(Language::Glsl)?,
            spv,
            stage,
            entry_point,
        )
    }

    /// A session reading WGSL and writing to `targets`.
    #[cfg(feature = "naga")]
    pub fn wgsl_session(
        &self,
        targets: impl Into<Vec<crate::session::Target>>,
    ) -> crate::session::Session<crate::backends::naga::WgslTranslator> {
        crate::backends::naga::wgsl_session(targets)
    }
}
