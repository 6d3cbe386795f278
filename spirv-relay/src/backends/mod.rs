//! Translators shipped with the crate, each behind a cargo feature.

#[cfg(feature = "naga")]
pub mod naga;
#[cfg(feature = "rspirv")]
pub mod rspirv;
#[cfg(feature = "shaderc")]
pub mod shaderc;
#[cfg(feature = "spirv-tools")]
pub mod spirv_tools;
#[cfg(feature = "spvasm")]
pub mod spvasm;

use crate::context::Context;

/// Register every translator enabled in this build. Later registrations
/// replace earlier ones, so shaderc takes over GLSL parsing from naga and
/// SPIRV-Tools takes over validation and optimization when enabled.
pub(crate) fn register_defaults(ctx: &mut Context) {
    register_naga(ctx);
    register_rspirv(ctx);
    register_spvasm(ctx);
    register_spirv_tools(ctx);
    register_shaderc(ctx);
}

#[cfg(feature = "naga")]
fn register_naga(ctx: &mut Context) {
    naga::register(ctx);
}
#[cfg(not(feature = "naga"))]
fn register_naga(_: &mut Context) {
    tracing::debug!("naga backend is not enabled");
}

#[cfg(feature = "rspirv")]
fn register_rspirv(ctx: &mut Context) {
    rspirv::register(ctx);
}
#[cfg(not(feature = "rspirv"))]
fn register_rspirv(_: &mut Context) {
    tracing::debug!("rspirv backend is not enabled");
}

#[cfg(feature = "spvasm")]
fn register_spvasm(ctx: &mut Context) {
    spvasm::register(ctx);
}
#[cfg(not(feature = "spvasm"))]
fn register_spvasm(_: &mut Context) {
    tracing::debug!("spvasm backend is not enabled");
}

#[cfg(feature = "spirv-tools")]
fn register_spirv_tools(ctx: &mut Context) {
    spirv_tools::register(ctx);
}
#[cfg(not(feature = "spirv-tools"))]
fn register_spirv_tools(_: &mut Context) {
    tracing::debug!("spirv-tools backend is not enabled");
}

#[cfg(feature = "shaderc")]
fn register_shaderc(ctx: &mut Context) {
    shaderc::register(ctx);
}
#[cfg(not(feature = "shaderc"))]
fn register_shaderc(_: &mut Context) {
    tracing::debug!("shaderc backend is not enabled");
}
