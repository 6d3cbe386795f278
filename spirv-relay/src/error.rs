use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A positional message reported by an IR tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}
impl Diagnostic {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Diagnostic {
        Diagnostic { line, column, message: message.into() }
    }
    /// A diagnostic that carries no source position.
    pub fn message(message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(0, 0, message)
    }

    /// Newline-joined `line:column: message` report.
    pub fn join(diags: &[Diagnostic]) -> String {
        diags.iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("included file `{token}` could not be found")]
    IncludeNotFound { token: String },
    #[error("preprocessing failed on line {line}: {message}")]
    Preprocess { message: String, line: usize },
    #[error("SPIR-V validation failed:\n{diagnostics}")]
    Validation { diagnostics: String },
    #[error("SPIR-V optimization failed:\n{diagnostics}")]
    Optimization { diagnostics: String },
    #[error("SPIR-V linking failed:\n{diagnostics}")]
    Link { diagnostics: String },
    #[error("cannot parse shader source:\n{diagnostics}")]
    Parse { diagnostics: String },
    #[error("entry point `{name}` not found in any loaded module")]
    EntryPointNotFound { name: String },
    #[error("code generation failed:\n{diagnostics}")]
    CodeGen { diagnostics: String },
    #[error("SPIR-V disassembly failed:\n{diagnostics}")]
    Disassembly { diagnostics: String },
    #[error("cannot read from \"{}\"", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed SPIR-V: {0}")]
    InvalidModule(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    InvalidOptions(String),
}
impl Error {
    pub(crate) fn parse(diagnostics: impl Into<String>) -> Error {
        Error::Parse { diagnostics: diagnostics.into() }
    }
    pub(crate) fn codegen(diagnostics: impl Into<String>) -> Error {
        Error::CodeGen { diagnostics: diagnostics.into() }
    }
    pub(crate) fn link(diagnostics: impl Into<String>) -> Error {
        Error::Link { diagnostics: diagnostics.into() }
    }
    pub(crate) fn unsupported(what: impl Into<String>) -> Error {
        Error::Unsupported(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_join_positionally() {
        let diags = [
            Diagnostic::new(3, 7, "ID 12 has not been defined"),
            Diagnostic::message("missing OpMemoryModel"),
        ];
        assert_eq!(
            Diagnostic::join(&diags),
            "3:7: ID 12 has not been defined\n0:0: missing OpMemoryModel",
        );
        assert_eq!(Diagnostic::join(&[]), "");
    }

    #[test]
    fn errors_carry_their_diagnostics() {
        let e = Error::link("0:0: unresolved external reference to \"foo\"");
        assert!(e.to_string().contains("unresolved external reference"));
        let e = Error::EntryPointNotFound { name: "vs_main".to_owned() };
        assert_eq!(e.to_string(), "entry point `vs_main` not found in any loaded module");
    }
}
