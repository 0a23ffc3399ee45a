//! `organize` mapping: rename/relocate files inside a part's install dir
//! before staging.

use crate::error::{Error, Result};
use globset::Glob;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Apply `mapping` (src pattern -> dst) inside `install_dir`. Non-glob
/// entries are applied before glob entries, matching the original
/// `sorted(entries, key=lambda x: ("*" in x, x))` ordering.
pub fn organize_filesets(
    part_name: &str,
    mapping: &IndexMap<String, String>,
    install_dir: &Path,
    overwrite: bool,
) -> Result<()> {
    let mut entries: Vec<(&String, &String)> = mapping.iter().collect();
    entries.sort_by_key(|(src, _)| (src.contains('*'), (*src).clone()));

    for (src_pattern, dst) in entries {
        let matches = expand(install_dir, src_pattern)?;
        let is_dir_dst = dst.ends_with('/');
        let dst_path = install_dir.join(dst.trim_end_matches('/'));

        if matches.len() > 1 && !is_dir_dst {
            return Err(Error::FileOrganizeError {
                part: part_name.to_string(),
                message: format!(
                    "multiple files match {src_pattern:?} but destination {dst:?} is not a directory"
                ),
            });
        }

        if is_dir_dst {
            std::fs::create_dir_all(&dst_path)?;
        }

        for src in matches {
            let src_full = install_dir.join(&src);
            let final_dst = if is_dir_dst {
                dst_path.join(src.file_name().ok_or_else(|| Error::FileOrganizeError {
                    part: part_name.to_string(),
                    message: format!("{src:?} has no file name"),
                })?)
            } else {
                dst_path.clone()
            };

            if final_dst.symlink_metadata().is_ok() && !overwrite {
                return Err(Error::FileOrganizeError {
                    part: part_name.to_string(),
                    message: format!("organize destination {final_dst:?} already exists"),
                });
            }

            if let Some(parent) = final_dst.parent() {
                std::fs::create_dir_all(parent)?;
            }

            if src_full.is_dir() && !src_pattern.contains('*') {
                link_or_copy_tree(&src_full, &final_dst)?;
                std::fs::remove_dir_all(&src_full)?;
            } else {
                if final_dst.exists() {
                    std::fs::remove_file(&final_dst)?;
                }
                std::fs::rename(&src_full, &final_dst)?;
            }
        }
    }
    Ok(())
}

fn expand(install_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !pattern.contains('*') {
        let full = install_dir.join(pattern);
        return Ok(if full.symlink_metadata().is_ok() { vec![PathBuf::from(pattern)] } else { vec![] });
    }
    let glob = Glob::new(pattern)
        .map_err(|e| Error::FileOrganizeError {
            part: String::new(),
            message: format!("invalid pattern {pattern:?}: {e}"),
        })?
        .compile_matcher();
    let mut matches = Vec::new();
    walk(install_dir, install_dir, &mut |rel| {
        if glob.is_match(rel) {
            matches.push(rel.to_path_buf());
        }
    })?;
    Ok(matches)
}

fn walk(base: &Path, current: &Path, visit: &mut impl FnMut(&Path)) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
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

fn link_or_copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            link_or_copy_tree(&entry.path(), &target)?;
        } else {
            crate::executor::migration::link_or_copy(&entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renames_a_single_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("foo"), b"x").unwrap();
        let mut mapping = IndexMap::new();
        mapping.insert("foo".to_string(), "bar".to_string());
        organize_filesets("p", &mapping, dir.path(), false).unwrap();
        assert!(dir.path().join("bar").exists());
        assert!(!dir.path().join("foo").exists());
    }

    #[test]
    fn glob_into_directory_destination() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.so"), b"x").unwrap();
        std::fs::write(dir.path().join("b.so"), b"x").unwrap();
        let mut mapping = IndexMap::new();
        mapping.insert("*.so".to_string(), "lib/".to_string());
        organize_filesets("p", &mapping, dir.path(), false).unwrap();
        assert!(dir.path().join("lib/a.so").exists());
        assert!(dir.path().join("lib/b.so").exists());
    }

    #[test]
    fn multiple_matches_to_file_destination_errors() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.so"), b"x").unwrap();
        std::fs::write(dir.path().join("b.so"), b"x").unwrap();
        let mut mapping = IndexMap::new();
        mapping.insert("*.so".to_string(), "one.so".to_string());
        assert!(organize_filesets("p", &mapping, dir.path(), false).is_err());
    }
}
