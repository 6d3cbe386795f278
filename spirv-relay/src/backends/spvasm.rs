use spq_spvasm::{asm::Assembler, dis::Disassembler as SpvasmDisassembler, SpirvHeader};

use crate::backend::{Disassembler, Frontend, ParseOptions, SpirvOptions};
use crate::context::Context;
use crate::error::{Diagnostic, Error, Result};
use crate::ir::Spirv;
use crate::lang::Language;

// TODO: Register a SPIR-V generator ID for the relay.
const GENERATOR: u32 = 0;

pub(crate) fn register(ctx: &mut Context) {
    ctx.register_frontend(Language::SpirvAsm, Assemble::default())
        .set_disassembler(Disassemble);
}

fn version_word((major, minor): (u8, u8)) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8)
}

/// SPIR-V assembly text to binary.
#[derive(Debug, Clone, Copy)]
pub struct Assemble {
    /// `(major, minor)` written into the module header.
    pub version: (u8, u8),
}
impl Default for Assemble {
    fn default() -> Assemble {
        Assemble { version: SpirvOptions::default().version }
    }
}
impl Frontend for Assemble {
    fn parse(&self, src: &str, _: &ParseOptions) -> Result<Spirv> {
        let header = SpirvHeader::new(version_word(self.version), GENERATOR);
        Assembler::new().assemble(src, header)
            .map(|binary| Spirv::from_words(binary.into_words()))
            .map_err(|e| Error::parse(format!("failed to assemble SPIR-V: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Disassemble;
impl Disassembler for Disassemble {
    fn disassemble(&self, spv: &Spirv) -> std::result::Result<String, Vec<Diagnostic>> {
        SpvasmDisassembler::new()
            .disassemble(&spv.words().to_vec().into())
            .map_err(|e| vec![Diagnostic::message(e.to_string())])
    }
}
