//! Include/exclude glob resolution for file migration between pipeline
//! stages (install → stage → prime).

use crate::error::{Error, Result};
use globset::Glob;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// An ordered list of include/exclude entries, as used by a part's `stage`
/// or `prime` keys. Entries starting with `-` are excludes; a leading `\`
/// escapes a literal leading `-` or `\` in an include.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fileset {
    name: String,
    entries: Vec<String>,
}

impl Fileset {
    pub fn new(name: impl Into<String>, entries: Vec<String>) -> Self {
        Self { name: name.into(), entries }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn includes(&self) -> Vec<&str> {
        self.entries.iter().filter(|e| !e.starts_with('-')).map(String::as_str).collect()
    }

    pub fn excludes(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.starts_with('-'))
            .map(|e| &e.as_str()[1..])
            .collect()
    }

    fn remove(&mut self, item: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e == item) {
            self.entries.remove(pos);
        }
    }

    /// Merge `other` into `self` following the stage→prime merge rule: if
    /// `other` carries a bare `*` or consists only of excludes, the two
    /// filesets are unioned (prime inherits stage's picks); otherwise
    /// `other` fully replaces `self` (an explicit prime list overrides
    /// stage). Entries excluded by `self` but included by `other` are not
    /// rejected here — see the open question recorded in `DESIGN.md`.
    pub fn combine(&mut self, other: &Fileset) {
        let mut other = other.clone();
        let mut to_combine = false;

        if other.entries.iter().any(|e| e == "*") {
            to_combine = true;
            other.remove("*");
        }

        if !other.entries.is_empty() && other.entries.iter().all(|e| e.starts_with('-')) {
            to_combine = true;
        }

        if to_combine {
            let mut merged: BTreeSet<String> =
                self.entries.iter().cloned().collect();
            merged.extend(other.entries.iter().cloned());
            self.entries = merged.into_iter().collect();
        } else {
            self.entries = other.entries;
        }
    }
}

fn normalize_relative(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn split_entries(fileset: &Fileset) -> Result<(Vec<String>, Vec<String>)> {
    let mut includes = Vec::new();
    let mut excludes = Vec::new();

    for item in &fileset.entries {
        if let Some(rest) = item.strip_prefix('-') {
            excludes.push(rest.to_string());
        } else if let Some(rest) = item.strip_prefix('\\') {
            includes.push(rest.to_string());
        } else {
            includes.push(item.clone());
        }
    }

    for entry in includes.iter().chain(excludes.iter()) {
        if Path::new(entry).is_absolute() {
            return Err(Error::FilesetError {
                name: fileset.name.clone(),
                message: format!("path {entry:?} must be relative"),
            });
        }
    }

    if includes.is_empty() {
        includes.push("*".to_string());
    }

    Ok((includes, excludes))
}

/// Expand a single pattern against `directory`, returning paths relative
/// to it. Non-glob patterns are treated as a literal single path that may
/// or may not exist.
fn expand_pattern(directory: &Path, pattern: &str) -> Result<HashSet<PathBuf>> {
    let mut matches = HashSet::new();
    if pattern.contains('*') {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::FilesetError {
                name: String::new(),
                message: format!("invalid pattern {pattern:?}: {e}"),
            })?
            .compile_matcher();
        walk(directory, directory, &mut |rel| {
            if glob.is_match(rel) {
                matches.insert(rel.to_path_buf());
            }
        })?;
    } else {
        let full = directory.join(pattern);
        if full.symlink_metadata().is_ok() {
            matches.insert(PathBuf::from(pattern));
        }
    }
    Ok(matches)
}

fn walk(
    base: &Path,
    current: &Path,
    visit: &mut impl FnMut(&Path),
) -> Result<()> {
    let read_dir = match std::fs::read_dir(current) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(base).unwrap();
        visit(rel);
        if entry.file_type()?.is_dir() {
            walk(base, &path, visit)?;
        }
    }
    Ok(())
}

/// Expand directory matches to include every file and directory beneath
/// them, so an exclude like `*/*.so` still reaches into an include like
/// `lib`.
fn expand_directories(directory: &Path, matches: &mut HashSet<PathBuf>) -> Result<()> {
    let dirs: Vec<PathBuf> = matches
        .iter()
        .filter(|m| directory.join(m).is_dir())
        .cloned()
        .collect();
    for dir in dirs {
        let base = directory.join(&dir);
        walk(&base, &base, &mut |rel| {
            matches.insert(dir.join(rel));
        })?;
    }
    Ok(())
}

fn generate_include_set(directory: &Path, includes: &[String]) -> Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    for include in includes {
        files.extend(expand_pattern(directory, include)?);
    }
    expand_directories(directory, &mut files)?;
    Ok(files)
}

fn generate_exclude_set(
    directory: &Path,
    excludes: &[String],
) -> Result<(HashSet<PathBuf>, HashSet<PathBuf>)> {
    let mut files = HashSet::new();
    for exclude in excludes {
        files.extend(expand_pattern(directory, exclude)?);
    }
    let dirs: HashSet<PathBuf> = files.iter().filter(|f| directory.join(f).is_dir()).cloned().collect();
    Ok((files, dirs))
}

/// Resolve a fileset against `srcdir`, returning the sets of files and
/// directories that should be migrated to the destination tree. Matches
/// the original craft-parts `migratable_filesets` semantics, including
/// implicitly adding every ancestor directory of a selected file.
pub fn migratable_filesets(fileset: &Fileset, srcdir: &Path) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
    let (includes, excludes) = split_entries(fileset)?;

    let include_files = generate_include_set(srcdir, &includes)?;
    let (exclude_files, exclude_dirs) = generate_exclude_set(srcdir, &excludes)?;

    let mut files: HashSet<PathBuf> = include_files.difference(&exclude_files).cloned().collect();
    files.retain(|f| !exclude_dirs.iter().any(|d| f.starts_with(d) && f != d));

    let mut dirs: HashSet<PathBuf> = files
        .iter()
        .filter(|f| {
            let full = srcdir.join(f);
            full.is_dir() && !full.is_symlink()
        })
        .cloned()
        .collect();
    files.retain(|f| !dirs.contains(f));

    for filename in files.clone() {
        let mut dirname = normalize_relative(&filename);
        while let Some(parent) = dirname.parent().filter(|p| !p.as_os_str().is_empty()) {
            dirs.insert(parent.to_path_buf());
            dirname = parent.to_path_buf();
        }
    }

    let resolved_dirs: BTreeSet<PathBuf> = dirs.into_iter().map(|d| normalize_relative(&d)).collect();
    let resolved_files: BTreeSet<PathBuf> = files.into_iter().map(|f| normalize_relative(&f)).collect();

    Ok((resolved_files, resolved_dirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn default_fileset_includes_everything() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        touch(&dir.path().join("sub/b.txt"));

        let fileset = Fileset::new("stage", vec![]);
        let (files, dirs) = migratable_filesets(&fileset, dir.path()).unwrap();
        assert!(files.contains(Path::new("a.txt")));
        assert!(files.contains(Path::new("sub/b.txt")));
        assert!(dirs.contains(Path::new("sub")));
    }

    #[test]
    fn exclude_removes_matching_files() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        touch(&dir.path().join("a.o"));

        let fileset = Fileset::new("stage", vec!["*".into(), "-*.o".into()]);
        let (files, _) = migratable_filesets(&fileset, dir.path()).unwrap();
        assert!(files.contains(Path::new("a.txt")));
        assert!(!files.contains(Path::new("a.o")));
    }

    #[test]
    fn combine_unions_when_other_has_wildcard() {
        let mut stage = Fileset::new("stage", vec!["bin/foo".into()]);
        let prime = Fileset::new("prime", vec!["*".into(), "-*.la".into()]);
        stage.combine(&prime);
        assert!(stage.entries().iter().any(|e| e == "bin/foo"));
        assert!(stage.entries().iter().any(|e| e == "-*.la"));
    }

    #[test]
    fn combine_replaces_when_other_is_explicit() {
        let mut stage = Fileset::new("stage", vec!["bin/foo".into(), "bin/bar".into()]);
        let prime = Fileset::new("prime", vec!["bin/foo".into()]);
        stage.combine(&prime);
        assert_eq!(stage.entries(), &["bin/foo".to_string()]);
    }

    #[test]
    fn rejects_absolute_paths() {
        let dir = tempdir().unwrap();
        let fileset = Fileset::new("stage", vec!["/etc/passwd".into()]);
        assert!(migratable_filesets(&fileset, dir.path()).is_err());
    }
}
