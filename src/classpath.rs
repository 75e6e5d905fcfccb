//! Namespace resolution for `use` statements.
//!
//! Libraries register their namespaces in memory while a VM is being built.
//! In filesystem mode, namespaces that no library registered are looked up
//! as `.zy` files below a root directory. Restricted mode never reads from disk,
//! which is what sandboxed hosts without a usable working directory need.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::source::SourceUnit;

pub const SOURCE_EXTENSION: &str = "zy";

/// How namespaces that no library registered are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverMode {
    /// Fall back to `.zy` files below `root`.
    Filesystem { root: PathBuf },
    /// Only in-memory definitions; never touches the filesystem.
    Restricted,
}

impl ResolverMode {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::Filesystem { root: root.into() }
    }

    /// Chooses the filesystem strategy only when `working_dir` names a
    /// directory that can actually be listed.
    pub fn select(working_dir: io::Result<PathBuf>) -> Self {
        match working_dir {
            Ok(dir) if fs::read_dir(&dir).is_ok() => Self::Filesystem { root: dir },
            _ => Self::Restricted,
        }
    }

    pub fn from_current_dir() -> Self {
        Self::select(std::env::current_dir())
    }

    pub fn root(&self) -> Option<&Path> {
        match self {
            Self::Filesystem { root } => Some(root),
            Self::Restricted => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Filesystem { .. } => "filesystem",
            Self::Restricted => "restricted",
        }
    }
}

impl Default for ResolverMode {
    fn default() -> Self {
        Self::Restricted
    }
}

/// What a namespace identifier resolves to.
#[derive(Debug, Clone)]
pub enum LoadableDefinition {
    /// Symbols installed into the VM by a library under `namespace`.
    Library {
        namespace: String,
        symbols: Vec<String>,
    },
    /// A source file whose declarations form the namespace.
    Source(SourceUnit),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("namespace `{0}` not found")]
    NotFound(String),
    #[error("invalid namespace identifier `{0}`")]
    Invalid(String),
    #[error("cannot read `{}` for namespace `{namespace}`: {source}", path.display())]
    Unreadable {
        namespace: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ClassPathResolver {
    mode: ResolverMode,
    definitions: IndexMap<String, LoadableDefinition>,
}

impl ClassPathResolver {
    pub fn new(mode: ResolverMode) -> Self {
        Self {
            mode,
            definitions: IndexMap::new(),
        }
    }

    pub fn restricted() -> Self {
        Self::new(ResolverMode::Restricted)
    }

    pub fn mode(&self) -> &ResolverMode {
        &self.mode
    }

    pub fn register(
        &mut self,
        namespace: &str,
        definition: LoadableDefinition,
    ) -> Result<String, ResolveError> {
        let key = canonical_namespace(namespace)
            .ok_or_else(|| ResolveError::Invalid(namespace.to_string()))?;
        self.definitions.insert(key.clone(), definition);
        Ok(key)
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        canonical_namespace(namespace)
            .map(|key| self.definitions.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn resolve(&self, namespace: &str) -> Result<LoadableDefinition, ResolveError> {
        let key = canonical_namespace(namespace)
            .ok_or_else(|| ResolveError::Invalid(namespace.to_string()))?;
        if let Some(definition) = self.definitions.get(&key) {
            return Ok(definition.clone());
        }
        match &self.mode {
            ResolverMode::Restricted => Err(ResolveError::NotFound(key)),
            ResolverMode::Filesystem { root } => load_source(root, &key),
        }
    }
}

fn load_source(root: &Path, key: &str) -> Result<LoadableDefinition, ResolveError> {
    let mut path = root.to_path_buf();
    for segment in key.split('\\') {
        path.push(segment);
    }
    path.set_extension(SOURCE_EXTENSION);
    match fs::read_to_string(&path) {
        Ok(code) => Ok(LoadableDefinition::Source(SourceUnit::new(
            code,
            path.display().to_string(),
        ))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(ResolveError::NotFound(key.to_string()))
        }
        Err(source) => Err(ResolveError::Unreadable {
            namespace: key.to_string(),
            path,
            source,
        }),
    }
}

/// Normalises `std/math`, `\std\math` and `std\math` to `std\math`.
///
/// Returns `None` when a segment is not a plain identifier, which also keeps
/// `..` and absolute paths out of filesystem lookups.
pub fn canonical_namespace(identifier: &str) -> Option<String> {
    let trimmed = identifier.trim().trim_start_matches(['\\', '/']);
    if trimmed.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for segment in trimmed.split(['\\', '/']) {
        let mut chars = segment.chars();
        let valid = chars
            .next()
            .map(|first| first.is_alphabetic() || first == '_')
            .unwrap_or(false)
            && chars.all(|ch| ch.is_alphanumeric() || ch == '_');
        if !valid {
            return None;
        }
        segments.push(segment);
    }
    Some(segments.join("\\"))
}
