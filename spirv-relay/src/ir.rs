//! SPIR-V module buffers.
//!
//! The pipeline treats a module as an indivisible word buffer. The handful of
//! structural queries here (header, entry point names, linkage symbols) only
//! need the instruction framing, never the full grammar.

use crate::error::{Error, Result};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;
pub const HEADER_WORD_COUNT: usize = 5;

const OP_ENTRY_POINT: u16 = 15;
const OP_DECORATE: u16 = 71;
const DECORATION_LINKAGE_ATTRIBUTES: u32 = 41;

/// The fixed five-word SPIR-V header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}
impl Header {
    /// `(major, minor)` decoded from the version word.
    pub fn version(&self) -> (u8, u8) {
        (((self.version >> 16) & 0xff) as u8, ((self.version >> 8) & 0xff) as u8)
    }
}

/// A compiled module. Pipeline stages never mutate one in place; every
/// transformation returns a fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Spirv {
    words: Vec<u32>,
}
impl Spirv {
    pub fn from_words(words: impl Into<Vec<u32>>) -> Spirv {
        Spirv { words: words.into() }
    }
    /// Reinterpret a little-endian byte stream, e.g. a `.spv` file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Spirv> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidModule(format!(
                "byte length {} is not a multiple of 4", bytes.len())));
        }
        let words = bytes.chunks_exact(4)
            .map(|x| u32::from_le_bytes([x[0], x[1], x[2], x[3]]))
            .collect::<Vec<_>>();
        Ok(Spirv { words })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
    pub fn len(&self) -> usize {
        self.words.len()
    }
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn header(&self) -> Option<Header> {
        match self.words.get(..HEADER_WORD_COUNT)? {
            &[magic, version, generator, bound, schema] => {
                Some(Header { magic, version, generator, bound, schema })
            },
            _ => None,
        }
    }

    /// Instructions following the header. Iteration stops at the first
    /// malformed word count.
    pub fn instructions(&self) -> Instructions<'_> {
        let rest = self.words.get(HEADER_WORD_COUNT..).unwrap_or(&[]);
        Instructions { rest }
    }

    /// Names of all `OpEntryPoint` instructions, in module order.
    pub fn entry_point_names(&self) -> Vec<String> {
        self.instructions()
            .filter(|x| x.opcode == OP_ENTRY_POINT)
            .filter_map(|x| x.operands.get(2..).map(|name| decode_str(name).0))
            .collect()
    }

    /// Symbols declared with the `LinkageAttributes` decoration.
    pub fn linkage_symbols(&self) -> Vec<LinkageSymbol> {
        let mut out = Vec::new();
        for instr in self.instructions() {
            if instr.opcode != OP_DECORATE { continue; }
            let (target, decoration) = match instr.operands {
                [target, decoration, ..] => (*target, *decoration),
                _ => continue,
            };
            if decoration != DECORATION_LINKAGE_ATTRIBUTES { continue; }
            let (name, consumed) = decode_str(&instr.operands[2..]);
            let kind = match instr.operands.get(2 + consumed) {
                Some(0) => LinkageKind::Export,
                Some(1) => LinkageKind::Import,
                Some(2) => LinkageKind::LinkOnceOdr,
                _ => continue,
            };
            out.push(LinkageSymbol { name, kind, target });
        }
        out
    }
}
impl From<Vec<u32>> for Spirv {
    fn from(words: Vec<u32>) -> Spirv {
        Spirv::from_words(words)
    }
}
impl AsRef<[u32]> for Spirv {
    fn as_ref(&self) -> &[u32] {
        &self.words
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: u16,
    pub operands: &'a [u32],
}

pub struct Instructions<'a> {
    rest: &'a [u32],
}
impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;
    fn next(&mut self) -> Option<Instruction<'a>> {
        let first = *self.rest.first()?;
        let nword = (first >> 16) as usize;
        if nword == 0 || nword > self.rest.len() {
            self.rest = &[];
            return None;
        }
        let instr = Instruction {
            opcode: (first & 0xffff) as u16,
            operands: &self.rest[1..nword],
        };
        self.rest = &self.rest[nword..];
        Some(instr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkageKind {
    Export,
    Import,
    LinkOnceOdr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkageSymbol {
    pub name: String,
    pub kind: LinkageKind,
    /// Result id the decoration applies to.
    pub target: u32,
}

/// Decode a nul-terminated literal string. Returns the string and the number
/// of words it occupies.
fn decode_str(words: &[u32]) -> (String, usize) {
    let mut bytes = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return (String::from_utf8_lossy(&bytes).into_owned(), i + 1);
            }
            bytes.push(byte);
        }
    }
    (String::from_utf8_lossy(&bytes).into_owned(), words.len())
}
