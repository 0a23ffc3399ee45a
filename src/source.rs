//! Source fetching is out of scope for this engine (see Non-goals); this
//! module defines only the trait boundary a concrete fetcher (git, tar,
//! local directory...) plugs into, plus a registry keyed by `source-type`.

use crate::error::Result;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;

pub trait SourceHandler: Send + Sync {
    /// Fetch (or refresh) the source into `part_src_dir`.
    fn pull(&self, part_src_dir: &Path) -> Result<()>;

    /// Return true if the source has changed on disk/upstream since the
    /// last `pull`/`update`. Must be called before `update()`.
    fn check(&self, part_src_dir: &Path) -> Result<bool>;

    /// Refresh an already-pulled source in place. Only valid after `check`
    /// has been called and returned `true`.
    fn update(&self, part_src_dir: &Path) -> Result<()>;

    /// Metadata recorded in PULL state assets (e.g. resolved commit).
    fn source_details(&self) -> IndexMap<String, String> {
        IndexMap::new()
    }
}

/// Maps a part's `source-type` to the handler that knows how to fetch it.
/// Empty by default: concrete fetchers are a caller responsibility.
#[derive(Default)]
pub struct SourceRegistry {
    handlers: HashMap<String, Box<dyn SourceHandler>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_type: impl Into<String>, handler: Box<dyn SourceHandler>) {
        self.handlers.insert(source_type.into(), handler);
    }

    pub fn get(&self, source_type: &str) -> Option<&dyn SourceHandler> {
        self.handlers.get(source_type).map(|h| h.as_ref())
    }
}

/// Copies a directory tree verbatim. Used only by tests to exercise the
/// `SourceHandler` trait boundary without a real fetcher.
#[cfg(test)]
pub struct LocalSource {
    pub origin: std::path::PathBuf,
}

#[cfg(test)]
impl SourceHandler for LocalSource {
    fn pull(&self, part_src_dir: &Path) -> Result<()> {
        copy_dir(&self.origin, part_src_dir)
    }

    fn check(&self, part_src_dir: &Path) -> Result<bool> {
        Ok(dir_signature(&self.origin)? != dir_signature(part_src_dir)?)
    }

    fn update(&self, part_src_dir: &Path) -> Result<()> {
        copy_dir(&self.origin, part_src_dir)
    }
}

#[cfg(test)]
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
fn dir_signature(dir: &Path) -> Result<u64> {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if !dir.exists() {
        return Ok(0);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        entry.file_name().hash(&mut hasher);
        if let Ok(meta) = entry.metadata() {
            meta.len().hash(&mut hasher);
        }
    }
    Ok(hasher.finish())
}
