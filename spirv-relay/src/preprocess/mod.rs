//! Source preprocessing.
//!
//! A [`Preprocessor`] owns the search roots, the injected definitions and a
//! cache of fully processed files. Every run prepends the definitions to the
//! source, expands directives with the [`directive`] engine and resolves
//! includes through [`resolve::IncludeResolver`].
//!
//! The cache is keyed by path alone. Processing the same file twice with a
//! different [`ProcessingConfig`] returns the first result.
//!
//! ```no_run
//! use spirv_relay::preprocess::{Preprocessor, ProcessingConfig};
//!
//! let mut pp = Preprocessor::new();
//! pp.add_search_root("shaders/include")
//!     .add_define("USE_SHADOWS", "1");
//! let text = pp.process("shaders/lit.frag", &ProcessingConfig::default())?;
//! # Ok::<(), spirv_relay::Error>(())
//! ```

pub mod directive;
pub mod resolve;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use directive::DirectiveEngine;
use resolve::{FileSystem, IncludeResolver, SourceProvider};

/// Normalized identity of a source file. Made absolute against the current
/// directory and lexically cleaned up; the filesystem is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourcePath(PathBuf);
impl SourcePath {
    pub fn new(path: impl AsRef<Path>) -> SourcePath {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_owned());
        let mut out = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => {},
                Component::ParentDir => {
                    if !out.pop() {
                        out.push(component);
                    }
                },
                x => out.push(x),
            }
        }
        SourcePath(out)
    }
    pub fn as_path(&self) -> &Path {
        &self.0
    }
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}
impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
impl AsRef<Path> for SourcePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub strip_comments: bool,
    /// Collapse every whitespace run of the output to a single space.
    pub strip_whitespace: bool,
    /// Rewrite `#pragma once` into an include guard.
    pub synthesize_include_guards: bool,
    /// Path of the text being processed, if it came from a file. Relative
    /// includes are resolved against its directory.
    pub origin_path: Option<PathBuf>,
}
impl Default for ProcessingConfig {
    fn default() -> ProcessingConfig {
        ProcessingConfig {
            strip_comments: false,
            strip_whitespace: false,
            synthesize_include_guards: true,
            origin_path: None,
        }
    }
}

/// Macro definitions injected ahead of every source. Kept sorted so the
/// prologue doesn't depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefineSet(BTreeSet<String>);
impl DefineSet {
    pub fn insert(&mut self, name: &str, value: &str) -> bool {
        let define = format!("#define {} {}", name, value);
        self.0.insert(define.trim_end().to_owned())
    }
    /// Remove the definition of exactly `name`. Returns whether one existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|define| define_name(define) != Some(name));
        self.0.len() != before
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|define| define_name(define) == Some(name))
    }
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text prepended to every preprocessed source.
    pub fn prologue(&self) -> String {
        let mut out = String::from("\n");
        for define in &self.0 {
            out.push_str(define);
            out.push('\n');
        }
        out
    }
    /// Number of lines [`prologue`](Self::prologue) occupies.
    pub fn prologue_lines(&self) -> usize {
        self.0.len() + 1
    }
}

fn define_name(define: &str) -> Option<&str> {
    let rest = define.strip_prefix("#define")?.trim_start();
    let end = rest.find(|c: char| c.is_whitespace() || c == '(').unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Ordered include directories. The first root containing a file wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRoots(Vec<PathBuf>);
impl SearchRoots {
    /// Append a root. Returns `false` if it's already listed.
    pub fn push(&mut self, root: impl Into<PathBuf>) -> bool {
        let root = root.into();
        if self.0.contains(&root) {
            return false;
        }
        self.0.push(root);
        true
    }
    pub fn remove(&mut self, root: impl AsRef<Path>) -> bool {
        let before = self.0.len();
        self.0.retain(|x| x != root.as_ref());
        self.0.len() != before
    }
    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.0.iter()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl<P: Into<PathBuf>> FromIterator<P> for SearchRoots {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> SearchRoots {
        let mut out = SearchRoots::default();
        for root in iter {
            out.push(root);
        }
        out
    }
}
impl<'a> IntoIterator for &'a SearchRoots {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Fully processed text per source file. Entries are never invalidated.
#[derive(Debug, Clone, Default)]
pub struct SourceCache(HashMap<SourcePath, String>);
impl SourceCache {
    pub fn get(&self, path: &SourcePath) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }
    pub fn insert(&mut self, path: SourcePath, text: String) {
        self.0.insert(path, text);
    }
    pub fn contains(&self, path: &SourcePath) -> bool {
        self.0.contains_key(path)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Replace the first `#pragma once` with an `#ifndef` guard derived from
/// `path` and close it at the end of the text. Text without the pragma is
/// returned as is.
pub fn synthesize_include_guard(text: &str, path: &str) -> String {
    const PRAGMA_ONCE: &str = "#pragma once";
    let Some(pos) = text.find(PRAGMA_ONCE) else {
        return text.to_owned();
    };
    let guard = include_guard_name(path);

    let mut out = String::with_capacity(text.len() + guard.len() * 3 + 32);
    out.push_str(&text[..pos]);
    out.push_str(&format!("#ifndef {0}\n#define {0}\n", guard));
    out.push_str(&text[pos + PRAGMA_ONCE.len()..]);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("#endif // {}\n", guard));
    out
}

/// `__` + path with every non-alphanumeric character replaced by `_`,
/// upper-cased, + `_GUARD__`.
pub fn include_guard_name(path: &str) -> String {
    let mangled = path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect::<String>();
    format!("__{}_GUARD__", mangled)
}

/// Collapse every whitespace run into one space and trim both ends.
pub fn consolidate_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Preprocessor<P: SourceProvider = FileSystem> {
    provider: P,
    roots: SearchRoots,
    defines: DefineSet,
    cache: SourceCache,
}
impl Preprocessor<FileSystem> {
    pub fn new() -> Self {
        Preprocessor::with_provider(FileSystem)
    }
}
impl Default for Preprocessor<FileSystem> {
    fn default() -> Self {
        Preprocessor::new()
    }
}
impl<P: SourceProvider> Preprocessor<P> {
    pub fn with_provider(provider: P) -> Self {
        Preprocessor {
            provider,
            roots: SearchRoots::default(),
            defines: DefineSet::default(),
            cache: SourceCache::default(),
        }
    }

    pub fn add_search_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.roots.push(root);
        self
    }
    pub fn set_search_roots(&mut self, roots: SearchRoots) -> &mut Self {
        self.roots = roots;
        self
    }
    pub fn add_define(&mut self, name: &str, value: &str) -> &mut Self {
        self.defines.insert(name, value);
        self
    }
    pub fn remove_define(&mut self, name: &str) -> &mut Self {
        self.defines.remove(name);
        self
    }

    pub fn search_roots(&self) -> &SearchRoots {
        &self.roots
    }
    pub fn defines(&self) -> &DefineSet {
        &self.defines
    }
    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Preprocess the file at `path`. A cached result is returned as is,
    /// whatever `cfg` says.
    pub fn process(&mut self, path: impl AsRef<Path>, cfg: &ProcessingConfig) -> Result<String> {
        let path = path.as_ref();
        let key = SourcePath::new(path);
        if let Some(text) = self.cache.get(&key) {
            tracing::trace!(path = %key, "preprocessed source served from cache");
            return Ok(text.to_owned());
        }
        let text = self.provider.read(path)
            .map_err(|source| Error::Io { path: path.to_owned(), source })?;
        self.process_from_memory_and_cache(&text, path, cfg)
    }

    /// Preprocess `text` as if it had been read from `path` and remember the
    /// result under that path.
    pub fn process_from_memory_and_cache(
        &mut self,
        text: &str,
        path: impl AsRef<Path>,
        cfg: &ProcessingConfig,
    ) -> Result<String> {
        let path = path.as_ref();
        let text = if cfg.synthesize_include_guards {
            synthesize_include_guard(text, &path.to_string_lossy())
        } else {
            text.to_owned()
        };
        let cfg = ProcessingConfig {
            origin_path: Some(path.to_owned()),
            ..cfg.clone()
        };
        let out = self.process_from_memory(&text, &cfg)?;
        self.cache.insert(SourcePath::new(path), out.clone());
        Ok(out)
    }

    /// Preprocess `text`. Nothing is cached.
    pub fn process_from_memory(&self, text: &str, cfg: &ProcessingConfig) -> Result<String> {
        let mut src = self.defines.prologue();
        src.push_str(text);
        src.push('\n');

        let mut resolver = IncludeResolver {
            roots: &self.roots,
            cache: &self.cache,
            provider: &self.provider,
            synthesize_guards: cfg.synthesize_include_guards,
        };
        let origin = cfg.origin_path.as_deref().map(SourcePath::new);
        let out = DirectiveEngine::new(&mut resolver, cfg.strip_comments)
            .with_line_offset(self.defines.prologue_lines())
            .process(&src, origin.as_ref().map(SourcePath::as_path))?;
        tracing::debug!(
            origin = ?cfg.origin_path,
            ndefine = self.defines.len(),
            "preprocessed source");

        if cfg.strip_whitespace {
            Ok(consolidate_whitespace(&out))
        } else {
            Ok(out)
        }
    }
}
