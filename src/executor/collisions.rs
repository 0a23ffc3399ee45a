//! Stage-time collision detection between parts' resolved file sets.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Check `new_part`'s resolved stage files (rooted at `new_install_dir`)
/// against the union of every earlier part's. Each earlier entry pairs
/// the part's name, its own install dir, and its resolved file set.
/// Returns `PartConflictError` naming both parts and the offending paths
/// on the first colliding part found.
pub fn check_for_stage_collisions(
    new_part_name: &str,
    new_install_dir: &Path,
    new_files: &BTreeSet<PathBuf>,
    earlier_parts: &[(String, PathBuf, BTreeSet<PathBuf>)],
) -> Result<()> {
    for (other_name, other_install_dir, other_files) in earlier_parts {
        let mut conflicts = Vec::new();
        for path in new_files.intersection(other_files) {
            let a = new_install_dir.join(path);
            let b = other_install_dir.join(path);
            if a.symlink_metadata().is_ok() && b.symlink_metadata().is_ok() && file_collides(&a, &b)? {
                conflicts.push(path.display().to_string());
            }
        }

        if !conflicts.is_empty() {
            return Err(Error::PartConflictError {
                part: new_part_name.to_string(),
                other_part: other_name.clone(),
                conflict_files: conflicts,
            });
        }
    }
    Ok(())
}

/// Compare file contents, ignoring `prefix=` lines in `.pc` files so that
/// two parts installing the same pkg-config file with different build
/// prefixes don't spuriously conflict.
pub fn file_collides(a: &Path, b: &Path) -> Result<bool> {
    let a_meta = a.symlink_metadata()?;
    let b_meta = b.symlink_metadata()?;

    if a_meta.is_symlink() != b_meta.is_symlink() {
        return Ok(true);
    }
    if a_meta.is_symlink() {
        return Ok(std::fs::read_link(a)? != std::fs::read_link(b)?);
    }
    if a_meta.is_dir() != b_meta.is_dir() {
        return Ok(true);
    }
    if a_meta.is_dir() {
        return Ok(false);
    }

    let a_bytes = std::fs::read(a)?;
    let b_bytes = std::fs::read(b)?;
    if a_bytes == b_bytes {
        return Ok(false);
    }

    if a.extension().and_then(|e| e.to_str()) == Some("pc") {
        fn strip_prefix_lines(bytes: &[u8]) -> Vec<&[u8]> {
            bytes
                .split(|&b| b == b'\n')
                .filter(|line| !line.starts_with(b"prefix="))
                .collect()
        }
        return Ok(strip_prefix_lines(&a_bytes) != strip_prefix_lines(&b_bytes));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pkgconfig_prefix_lines_are_ignored() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.pc");
        let b = dir.path().join("b.pc");
        std::fs::write(&a, "prefix=/foo\nName: x\n").unwrap();
        std::fs::write(&b, "prefix=/bar\nName: x\n").unwrap();
        assert!(!file_collides(&a, &b).unwrap());
    }

    #[test]
    fn non_prefix_differences_still_collide() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.pc");
        let b = dir.path().join("b.pc");
        std::fs::write(&a, "prefix=/foo\nName: x\n").unwrap();
        std::fs::write(&b, "prefix=/bar\nName: y\n").unwrap();
        assert!(file_collides(&a, &b).unwrap());
    }

    #[test]
    fn differing_regular_files_collide() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "one").unwrap();
        std::fs::write(&b, "two").unwrap();
        assert!(file_collides(&a, &b).unwrap());
    }
}
