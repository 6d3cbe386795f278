use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{synthesize_include_guard, SearchRoots, SourceCache, SourcePath};
use super::directive::{IncludeHandler, Included};
use crate::error::{Error, Result};

/// Where source text comes from. The real filesystem by default; tests and
/// embedders can substitute a virtual one.
pub trait SourceProvider {
    fn exists(&self, path: &Path) -> bool;
    fn read(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystem;
impl SourceProvider for FileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Where an include token ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from the source cache; the filesystem was not consulted.
    Cached { path: PathBuf, text: String },
    /// Read from the provider.
    Read { path: PathBuf, text: String },
}
impl Resolution {
    pub fn path(&self) -> &Path {
        match self {
            Resolution::Cached { path, .. } | Resolution::Read { path, .. } => path,
        }
    }
    pub fn into_text(self) -> String {
        match self {
            Resolution::Cached { text, .. } | Resolution::Read { text, .. } => text,
        }
    }
}

/// Resolves include tokens against the requesting file, the working
/// directory and the configured search roots.
pub struct IncludeResolver<'a> {
    pub(crate) roots: &'a SearchRoots,
    pub(crate) cache: &'a SourceCache,
    pub(crate) provider: &'a dyn SourceProvider,
    pub(crate) synthesize_guards: bool,
}
impl<'a> IncludeResolver<'a> {
    /// Candidate paths in the order they are tried.
    ///
    /// Quoted includes look next to the includer, then relative to the
    /// working directory, then in the search roots. System includes try the
    /// search roots first and fall back to the quoted-include locations.
    pub fn candidates(&self, token: &str, is_system: bool, includer: Option<&Path>) -> Vec<PathBuf> {
        let mut local = Vec::with_capacity(2);
        if let Some(includer) = includer {
            let dir = includer.parent().unwrap_or_else(|| Path::new(""));
            local.push(dir.join(token));
        }
        local.push(PathBuf::from(token));
        let rooted = self.roots.iter().map(|root| root.join(token));

        if is_system {
            rooted.chain(local).collect()
        } else {
            local.into_iter().chain(rooted).collect()
        }
    }

    pub fn resolve(&self, token: &str, is_system: bool, includer: Option<&Path>) -> Result<Resolution> {
        for candidate in self.candidates(token, is_system, includer) {
            let key = SourcePath::new(&candidate);
            if let Some(text) = self.cache.get(&key) {
                tracing::trace!(token, path = %key, "include served from cache");
                return Ok(Resolution::Cached { path: key.into_path_buf(), text: text.to_owned() });
            }
            if self.provider.exists(&candidate) {
                let text = self.provider.read(&candidate)
                    .map_err(|source| Error::Io { path: candidate.clone(), source })?;
                let text = if self.synthesize_guards {
                    synthesize_include_guard(&text, &key.to_string())
                } else {
                    text
                };
                return Ok(Resolution::Read { path: key.into_path_buf(), text });
            }
        }
        Err(Error::IncludeNotFound { token: token.to_owned() })
    }
}
impl<'a> IncludeHandler for IncludeResolver<'a> {
    fn include(&mut self, token: &str, is_system: bool, includer: Option<&Path>) -> Result<Included> {
        let resolution = self.resolve(token, is_system, includer)?;
        let path = resolution.path().to_owned();
        Ok(Included { path, text: resolution.into_text() })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// In-memory files with read accounting.
    #[derive(Default)]
    pub(crate) struct MemoryFiles {
        pub files: HashMap<PathBuf, String>,
        pub reads: Cell<usize>,
        pub lookups: Cell<usize>,
    }
    impl MemoryFiles {
        pub fn with(mut self, path: &str, text: &str) -> Self {
            self.files.insert(SourcePath::new(path).into_path_buf(), text.to_owned());
            self
        }
    }
    impl SourceProvider for MemoryFiles {
        fn exists(&self, path: &Path) -> bool {
            self.lookups.set(self.lookups.get() + 1);
            self.files.contains_key(SourcePath::new(path).as_path())
        }
        fn read(&self, path: &Path) -> io::Result<String> {
            self.reads.set(self.reads.get() + 1);
            self.files.get(SourcePath::new(path).as_path())
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn resolver<'a>(roots: &'a SearchRoots, cache: &'a SourceCache, files: &'a MemoryFiles) -> IncludeResolver<'a> {
        IncludeResolver { roots, cache, provider: files, synthesize_guards: false }
    }

    #[test]
    fn system_includes_follow_root_order() {
        let files = MemoryFiles::default()
            .with("/a/light.h", "from a")
            .with("/b/light.h", "from b");
        let roots = SearchRoots::from_iter(["/a", "/b"]);
        let cache = SourceCache::default();
        let found = resolver(&roots, &cache, &files)
            .resolve("light.h", true, Some(Path::new("/src/main.glsl")))
            .unwrap();
        assert_eq!(found.path(), Path::new("/a/light.h"));
        assert_eq!(found.into_text(), "from a");

        let roots = SearchRoots::from_iter(["/b", "/a"]);
        let found = resolver(&roots, &cache, &files)
            .resolve("light.h", true, None)
            .unwrap();
        assert_eq!(found.into_text(), "from b");
    }

    #[test]
    fn quoted_includes_prefer_the_includer_directory() {
        let files = MemoryFiles::default()
            .with("/src/light.h", "adjacent")
            .with("/a/light.h", "rooted");
        let roots = SearchRoots::from_iter(["/a"]);
        let cache = SourceCache::default();
        let r = resolver(&roots, &cache, &files);
        let found = r.resolve("light.h", false, Some(Path::new("/src/main.glsl"))).unwrap();
        assert_eq!(found.into_text(), "adjacent");
        // Without an includer the quoted include falls through to the roots.
        let found = r.resolve("light.h", false, None).unwrap();
        assert_eq!(found.into_text(), "rooted");
    }

    #[test]
    fn system_includes_fall_back_to_the_includer_directory() {
        let files = MemoryFiles::default().with("/src/util/noise.h", "noise");
        let roots = SearchRoots::from_iter(["/a"]);
        let cache = SourceCache::default();
        let found = resolver(&roots, &cache, &files)
            .resolve("util/noise.h", true, Some(Path::new("/src/main.glsl")))
            .unwrap();
        assert_eq!(found.path(), Path::new("/src/util/noise.h"));
    }

    #[test]
    fn unresolved_includes_fail() {
        let files = MemoryFiles::default();
        let roots = SearchRoots::from_iter(["/a"]);
        let cache = SourceCache::default();
        let err = resolver(&roots, &cache, &files)
            .resolve("missing.h", true, None)
            .unwrap_err();
        assert!(matches!(err, Error::IncludeNotFound { token } if token == "missing.h"));
    }

    #[test]
    fn cache_hits_skip_the_provider() {
        let files = MemoryFiles::default().with("/a/light.h", "from disk");
        let roots = SearchRoots::from_iter(["/a"]);
        let mut cache = SourceCache::default();
        cache.insert(SourcePath::new("/a/light.h"), "from cache".to_owned());
        let found = resolver(&roots, &cache, &files)
            .resolve("light.h", true, None)
            .unwrap();
        assert!(matches!(found, Resolution::Cached { .. }));
        assert_eq!(found.into_text(), "from cache");
        assert_eq!(files.reads.get(), 0);
        assert_eq!(files.lookups.get(), 0);
    }

    #[test]
    fn read_includes_get_guards() {
        let files = MemoryFiles::default().with("/a/once.h", "#pragma once\nint x;\n");
        let roots = SearchRoots::from_iter(["/a"]);
        let cache = SourceCache::default();
        let mut r = resolver(&roots, &cache, &files);
        r.synthesize_guards = true;
        let text = r.resolve("once.h", true, None).unwrap().into_text();
        // The guard is keyed by the resolved, absolute path.
        assert!(text.starts_with("#ifndef ___A_ONCE_H_GUARD__\n#define ___A_ONCE_H_GUARD__\n"));
        assert!(text.ends_with("#endif // ___A_ONCE_H_GUARD__\n"));
    }
}
