//! Validation and optimization through SPIRV-Tools.

use spirv_tools::error::{Message, MessageLevel};
use spirv_tools::opt::{self, Optimizer as _};
use spirv_tools::val::{self, Validator as _};
use spirv_tools::TargetEnv;

use crate::backend::{Optimizer, PassSet, Verifier};
use crate::context::Context;
use crate::error::Diagnostic;
use crate::ir::Spirv;

pub(crate) fn register(ctx: &mut Context) {
    ctx.set_verifier(SpirvToolsVerifier)
        .set_optimizer(SpirvToolsOptimizer);
}

/// The universal environment matching the module's declared version.
fn target_env(spv: &Spirv) -> TargetEnv {
    match spv.header().map(|x| x.version()) {
        Some((1, 0)) => TargetEnv::Universal_1_0,
        Some((1, 1)) => TargetEnv::Universal_1_1,
        Some((1, 2)) => TargetEnv::Universal_1_2,
        Some((1, 3)) => TargetEnv::Universal_1_3,
        Some((1, 4)) => TargetEnv::Universal_1_4,
        _ => TargetEnv::Universal_1_5,
    }
}

fn diagnostic(e: spirv_tools::Error) -> Diagnostic {
    match e.diagnostic {
        Some(x) => Diagnostic::new(x.line, x.column, x.message),
        None => Diagnostic::message(e.inner.to_string()),
    }
}

/// `spirv-val` against the module's SPIR-V version.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpirvToolsVerifier;
impl Verifier for SpirvToolsVerifier {
    fn check(&self, spv: &Spirv) -> Vec<Diagnostic> {
        match val::create(Some(target_env(spv))).validate(spv.words(), None) {
            Ok(()) => Vec::new(),
            Err(e) => vec![diagnostic(e)],
        }
    }
}

/// `spirv-opt` with its performance or size recipe.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpirvToolsOptimizer;
impl Optimizer for SpirvToolsOptimizer {
    fn run(&self, spv: &Spirv, passes: PassSet) -> Result<Spirv, Vec<Diagnostic>> {
        let mut optimizer = opt::create(Some(target_env(spv)));
        match passes {
            PassSet::Performance => optimizer.register_performance_passes(),
            PassSet::Size => optimizer.register_size_passes(),
        };
        let mut diags = Vec::new();
        let mut on_message = |msg: Message| match msg.level {
            MessageLevel::Fatal | MessageLevel::InternalError | MessageLevel::Error => {
                diags.push(Diagnostic::new(msg.line, msg.column, msg.message));
            },
            _ => tracing::debug!(line = msg.line, message = %msg.message, "spirv-opt"),
        };
        match optimizer.optimize(spv.words(), &mut on_message, None) {
            Ok(binary) => Ok(Spirv::from_words(binary.as_words())),
            Err(e) => {
                diags.push(diagnostic(e));
                Err(diags)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SPIRV_MAGIC;

    #[test]
    fn malformed_modules_are_rejected() {
        // No OpMemoryModel, and an id past the bound.
        let words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 5,
            0, (2 << 16) | 17, 1, (2 << 16) | 19, 7];
        assert!(!SpirvToolsVerifier.check(&Spirv::from_words(words)).is_empty());
    }

    #[test]
    fn environment_follows_the_header() {
        let spv = Spirv::from_words(vec![SPIRV_MAGIC, 0x0001_0300, 0, 1, 0]);
        assert_eq!(target_env(&spv), TargetEnv::Universal_1_3);
        assert_eq!(target_env(&Spirv::default()), TargetEnv::Universal_1_5);
    }
}
