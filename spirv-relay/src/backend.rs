//! Translator interfaces.
//!
//! Every concrete shading-language compiler lives behind one of these traits.
//! The relay only composes them; see [`crate::backends`] for the
//! implementations shipped with this crate.

use crate::error::{Diagnostic, Result};
use crate::ir::Spirv;
use crate::lang::ShaderStage;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub stage: Option<ShaderStage>,
    pub entry: String,
    /// Where the source text came from, used in diagnostics and for relative
    /// includes.
    pub path: Option<String>,
    /// Target Vulkan semantics rather than OpenGL.
    pub vulkan: bool,
    pub debug: bool,
}
impl Default for ParseOptions {
    fn default() -> ParseOptions {
        ParseOptions {
            stage: None,
            entry: "main".to_owned(),
            path: None,
            vulkan: true,
            debug: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlslOptions {
    pub version: u16,
    /// Emit GLSL ES (WebGL) instead of desktop GLSL.
    pub es: bool,
    pub vulkan: bool,
}
impl Default for GlslOptions {
    fn default() -> GlslOptions {
        GlslOptions { version: 450, es: false, vulkan: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HlslOptions {
    /// Shader model times ten, e.g. `50` for SM 5.0.
    pub shader_model: u16,
}
impl Default for HlslOptions {
    fn default() -> HlslOptions {
        HlslOptions { shader_model: 50 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MslOptions {
    pub lang_version: (u8, u8),
}
impl Default for MslOptions {
    fn default() -> MslOptions {
        MslOptions { lang_version: (1, 0) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpirvOptions {
    pub version: (u8, u8),
    pub debug: bool,
    /// Flip the Y axis between WebGPU and Vulkan conventions.
    pub y_flip: bool,
}
impl Default for SpirvOptions {
    fn default() -> SpirvOptions {
        SpirvOptions { version: (1, 3), debug: true, y_flip: true }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub stage: Option<ShaderStage>,
    pub entry: String,
    pub glsl: GlslOptions,
    pub hlsl: HlslOptions,
    pub msl: MslOptions,
    pub spirv: SpirvOptions,
}
impl Default for GenerateOptions {
    fn default() -> GenerateOptions {
        GenerateOptions {
            stage: None,
            entry: "main".to_owned(),
            glsl: GlslOptions::default(),
            hlsl: HlslOptions::default(),
            msl: MslOptions::default(),
            spirv: SpirvOptions::default(),
        }
    }
}

/// Generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Text(String),
    Binary(Spirv),
}
impl Output {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(x) => Some(x),
            Output::Binary(_) => None,
        }
    }
    pub fn as_spirv(&self) -> Option<&Spirv> {
        match self {
            Output::Text(_) => None,
            Output::Binary(x) => Some(x),
        }
    }
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Output::Text(x) => x.into_bytes(),
            Output::Binary(x) => x.as_bytes().to_vec(),
        }
    }
}

/// Optimization pass selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassSet {
    Performance,
    Size,
}

/// Turns source text into SPIR-V.
pub trait Frontend: Send + Sync {
    fn parse(&self, src: &str, opts: &ParseOptions) -> Result<Spirv>;
}

/// Turns SPIR-V into target code.
pub trait Backend: Send + Sync {
    fn generate(&self, spv: &Spirv, opts: &GenerateOptions) -> Result<Output>;
}

pub trait Verifier: Send + Sync {
    /// Every problem found; empty when the module is valid.
    fn check(&self, spv: &Spirv) -> Vec<Diagnostic>;
}

pub trait Optimizer: Send + Sync {
    fn run(&self, spv: &Spirv, passes: PassSet) -> Result<Spirv, Vec<Diagnostic>>;
}

pub trait Linker: Send + Sync {
    fn link(&self, spvs: &[Spirv]) -> Result<Spirv, Vec<Diagnostic>>;
}

pub trait Disassembler: Send + Sync {
    fn disassemble(&self, spv: &Spirv) -> Result<String, Vec<Diagnostic>>;
}
