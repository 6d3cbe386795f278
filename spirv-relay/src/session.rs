//! Multi-target compilation sessions.
//!
//! A [`Session`] parses source units once and generates code for any number
//! of `(target, entry point)` pairs, each of which is generated at most once.
//! The language-specific work is done by a [`SessionTranslator`].

use std::collections::HashMap;

use crate::backend::{GlslOptions, HlslOptions, MslOptions, SpirvOptions};
use crate::error::{Error, Result};
use crate::lang::Language;

/// An output slot of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Spirv(SpirvOptions),
    Glsl(GlslOptions),
    Hlsl(HlslOptions),
    Msl(MslOptions),
    Wgsl,
}
impl Target {
    pub fn language(&self) -> Language {
        match self {
            Target::Spirv(_) => Language::Spirv,
            Target::Glsl(_) => Language::Glsl,
            Target::Hlsl(_) => Language::Hlsl,
            Target::Msl(_) => Language::Msl,
            Target::Wgsl => Language::Wgsl,
        }
    }
}

/// A translator result together with whatever the translator had to say
/// about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosed<T> {
    pub value: Option<T>,
    pub diagnostics: Option<String>,
}
impl<T> Diagnosed<T> {
    pub fn ok(value: T) -> Self {
        Diagnosed { value: Some(value), diagnostics: None }
    }
    pub fn new(value: Option<T>, diagnostics: Option<String>) -> Self {
        Diagnosed { value, diagnostics }
    }
    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Diagnosed { value: None, diagnostics: Some(diagnostics.into()) }
    }
}

/// The language-specific half of a [`Session`].
pub trait SessionTranslator {
    /// A parsed source unit.
    type Module;
    /// A module composed with a single entry point, ready for code
    /// generation.
    type Program;

    fn load(&mut self, source: &str, path: &str, module_name: &str) -> Diagnosed<Self::Module>;
    fn has_entry_point(&self, module: &Self::Module, entry_point: &str) -> bool;
    fn compose(&mut self, module: &Self::Module, entry_point: &str) -> Diagnosed<Self::Program>;
    fn generate(&mut self, program: &Self::Program, target: &Target) -> Diagnosed<Vec<u8>>;
}

/// Decides which translator diagnostics abort the session operation.
///
/// Diagnostics are fatal when they contain the error marker and none of the
/// allow-listed codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticPolicy {
    pub error_marker: String,
    pub allowed: Vec<String>,
}
impl Default for DiagnosticPolicy {
    fn default() -> DiagnosticPolicy {
        DiagnosticPolicy {
            error_marker: "error".to_owned(),
            allowed: vec!["error 100".to_owned()],
        }
    }
}
impl DiagnosticPolicy {
    pub fn is_fatal(&self, diagnostics: &str) -> bool {
        diagnostics.contains(&self.error_marker)
            && !self.allowed.iter().any(|x| diagnostics.contains(x.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Loading,
    Generating,
}

pub struct Session<T: SessionTranslator> {
    translator: T,
    targets: Vec<Target>,
    modules: Vec<T::Module>,
    cache: HashMap<(usize, String), Vec<u8>>,
    policy: DiagnosticPolicy,
    /// The diagnostics of the first generator invocation are not reported.
    suppress_next: bool,
    state: SessionState,
}
impl<T: SessionTranslator> Session<T> {
    pub fn new(translator: T, targets: impl Into<Vec<Target>>) -> Self {
        Session {
            translator,
            targets: targets.into(),
            modules: Vec::new(),
            cache: HashMap::new(),
            policy: DiagnosticPolicy::default(),
            suppress_next: true,
            state: SessionState::Created,
        }
    }
    pub fn with_policy(mut self, policy: DiagnosticPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }
    pub fn modules(&self) -> &[T::Module] {
        &self.modules
    }
    pub fn translator(&self) -> &T {
        &self.translator
    }

    /// Parse a source unit and append it to the loaded modules.
    pub fn load(&mut self, source: &str, path: &str, module_name: &str) -> Result<()> {
        self.state = SessionState::Loading;
        let Diagnosed { value, diagnostics } = self.translator.load(source, path, module_name);
        if let Some(diags) = diagnostics.as_deref() {
            if self.policy.is_fatal(diags) {
                return Err(Error::parse(diags));
            }
            tracing::warn!(path, module_name, "{}", diags);
        }
        let module = value.ok_or_else(|| {
            Error::parse(diagnostics.unwrap_or_else(|| format!("cannot load module `{}`", module_name)))
        })?;
        tracing::debug!(path, module_name, "loaded module");
        self.modules.push(module);
        Ok(())
    }

    /// Compose the first loaded module exposing `entry_point` with that
    /// entry point.
    pub fn compose(&mut self, entry_point: &str) -> Result<T::Program> {
        let module = self.modules.iter()
            .find(|x| self.translator.has_entry_point(x, entry_point))
            .ok_or_else(|| Error::EntryPointNotFound { name: entry_point.to_owned() })?;
        let Diagnosed { value, diagnostics } = self.translator.compose(module, entry_point);
        if let Some(diags) = diagnostics.as_deref() {
            if self.policy.is_fatal(diags) {
                return Err(Error::codegen(diags));
            }
            tracing::warn!(entry_point, "{}", diags);
        }
        value.ok_or_else(|| {
            Error::codegen(diagnostics.unwrap_or_else(|| format!("cannot compose entry point `{}`", entry_point)))
        })
    }

    /// Code for `entry_point` in the target slot `target_index`. Each pair
    /// is generated once; later requests return the same bytes.
    pub fn generate(&mut self, target_index: usize, entry_point: &str) -> Result<&[u8]> {
        if target_index >= self.targets.len() {
            return Err(Error::codegen(format!(
                "target index {} is out of range; the session has {} targets",
                target_index, self.targets.len())));
        }
        let key = (target_index, entry_point.to_owned());
        if !self.cache.contains_key(&key) {
            let bytes = self.generate_uncached(target_index, entry_point)?;
            self.cache.insert(key.clone(), bytes);
        } else {
            tracing::trace!(target_index, entry_point, "generated code served from cache");
        }
        Ok(&self.cache[&key])
    }

    fn generate_uncached(&mut self, target_index: usize, entry_point: &str) -> Result<Vec<u8>> {
        self.state = SessionState::Generating;
        let program = self.compose(entry_point)?;
        let target = self.targets[target_index];
        let Diagnosed { value, diagnostics } = self.translator.generate(&program, &target);
        let suppress = std::mem::replace(&mut self.suppress_next, false);

        if let Some(diags) = diagnostics.as_deref() {
            if suppress && value.is_some() {
                tracing::debug!(target_index, entry_point, "suppressed first generation diagnostics: {}", diags);
            } else if self.policy.is_fatal(diags) {
                return Err(Error::codegen(diags));
            } else {
                tracing::warn!(target_index, entry_point, "{}", diags);
            }
        }
        let bytes = value.ok_or_else(|| {
            Error::codegen(diagnostics.unwrap_or_else(|| format!(
                "no code generated for `{}` ({})", entry_point, target.language())))
        })?;
        tracing::debug!(target_index, entry_point, nbyte = bytes.len(), "generated code");
        Ok(bytes)
    }

    /// Load `source` and generate `entry_point` for the first target.
    pub fn parse_from_memory(
        &mut self,
        source: &str,
        entry_point: &str,
        path: &str,
        module_name: &str,
    ) -> Result<Vec<u8>> {
        self.load(source, path, module_name)?;
        Ok(self.generate(0, entry_point)?.to_vec())
    }
}
