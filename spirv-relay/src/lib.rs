//! # spirv-relay
//!
//! Translate shaders between shading languages by relaying them through
//! SPIR-V. The crate doesn't compile any shading language itself; it
//! sequences the translators it's built with and the SPIR-V tooling around
//! them.
//!
//! ## Preprocessing
//!
//! [`preprocess::Preprocessor`] expands `#include`, macros and conditionals
//! before any front end sees the source. Includes are searched next to the
//! including file, then in the configured search roots:
//!
//! ```no_run
//! use spirv_relay::preprocess::{Preprocessor, ProcessingConfig};
//!
//! let mut pp = Preprocessor::new();
//! pp.add_search_root("shaders/include")
//!     .add_define("LIGHT_COUNT", "4");
//! let src = pp.process("shaders/forward.frag", &ProcessingConfig::default())?;
//! # Ok::<(), spirv_relay::Error>(())
//! ```
//!
//! `#pragma once` is rewritten into an include guard, and every processed
//! file is cached by path for the lifetime of the preprocessor.
//!
//! ## Source and Target Languages
//!
//! Which languages are available depends on the enabled features:
//!
//! - `naga` (default): WGSL and GLSL in; GLSL, HLSL, MSL, WGSL and SPIR-V
//! out; semantic SPIR-V validation;
//! - `rspirv` (default): structural SPIR-V validation, linking and a
//! dead-code optimizer that also strips debug info for size;
//! - `spvasm` (default): SPIR-V assembly in, disassembly out;
//! - `shaderc`: GLSL and HLSL in, with full `#include` support;
//! - `spirv-tools`: validation and optimization by SPIRV-Tools, built from
//! source.
//!
//! Binary SPIR-V can always be read and written.
//!
//! ## Translating
//!
//! ```no_run
//! use spirv_relay::{translate, Language, ShaderStage, Source, TranslateOptions};
//!
//! let ctx = spirv_relay::ensure_initialized();
//! let opts = TranslateOptions {
//!     entry_point: "fs_main".to_owned(),
//!     stage: Some(ShaderStage::Fragment),
//!     ..Default::default()
//! };
//! let wgsl = "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
//! let glsl = translate(ctx, Source::Text(wgsl), Language::Wgsl, Language::Glsl, &opts)?;
//! # Ok::<(), spirv_relay::Error>(())
//! ```
//!
//! ## Sessions
//!
//! A [`Session`] parses once and generates any `(target, entry point)` pair
//! on demand, caching what it generated. With the `naga` feature,
//! [`Context::wgsl_session`] creates one for WGSL sources.

pub mod backend;
pub mod backends;
pub mod context;
pub mod error;
pub mod ir;
pub mod lang;
pub mod pipeline;
pub mod preprocess;
pub mod session;
pub mod translate;

pub use backend::{GenerateOptions, Output, ParseOptions};
pub use context::{ensure_initialized, is_initialized, Context};
pub use error::{Diagnostic, Error, Result};
pub use ir::Spirv;
pub use lang::{Language, ShaderStage};
pub use pipeline::ValidationPolicy;
pub use session::{Session, Target};
pub use translate::{translate, translate_file, Source, TranslateOptions};
