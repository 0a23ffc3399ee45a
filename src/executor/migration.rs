//! Copying files/directories from one step's tree into the next
//! (install → stage → prime), hard-linking when possible.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Migrate `dirs` then `files` (both relative to `srcdir`) into `destdir`.
/// `fixup` is called with the migrated destination path of each file,
/// used by the stage step to rewrite pkg-config prefixes.
///
/// `already_resolved` lists paths a collision check has already cleared
/// against a pre-existing destination file (e.g. two parts' pkg-config
/// files that are equivalent modulo `prefix=`): those are left untouched
/// rather than re-copied or treated as a conflict.
pub fn migrate_files(
    files: &std::collections::BTreeSet<PathBuf>,
    dirs: &std::collections::BTreeSet<PathBuf>,
    srcdir: &Path,
    destdir: &Path,
    already_resolved: &std::collections::BTreeSet<PathBuf>,
    mut fixup: impl FnMut(&Path) -> Result<()>,
) -> Result<()> {
    let mut sorted_dirs: Vec<&PathBuf> = dirs.iter().collect();
    sorted_dirs.sort();
    for dir in sorted_dirs {
        let dest = destdir.join(dir);
        std::fs::create_dir_all(&dest)?;
        if let Ok(meta) = srcdir.join(dir).metadata() {
            let _ = filetime::set_file_mtime(&dest, filetime::FileTime::from_last_modification_time(&meta));
        }
    }

    let mut sorted_files: Vec<&PathBuf> = files.iter().collect();
    sorted_files.sort();

    for file in &sorted_files {
        let dest = destdir.join(file);
        if dest.symlink_metadata().is_ok() {
            let existing_is_symlink = dest.symlink_metadata()?.is_symlink();
            if existing_is_symlink || already_resolved.contains(*file) {
                continue;
            }
            return Err(Error::StageFilesConflictError(dest));
        }
    }

    for file in sorted_files {
        let src = srcdir.join(file);
        let dest = destdir.join(file);
        if dest.symlink_metadata().is_ok() {
            continue;
        }
        link_or_copy(&src, &dest)?;
        if !already_resolved.contains(file) {
            fixup(&dest)?;
        }
    }

    Ok(())
}

/// Hard-link `src` to `dst`, falling back to a copy (e.g. across
/// filesystems) or to recreating a symlink verbatim. Never dereferences a
/// symlink source.
pub fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let meta = src.symlink_metadata()?;
    if meta.is_symlink() {
        let target = std::fs::read_link(src)?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dst)?;
        #[cfg(not(unix))]
        std::fs::copy(src, dst)?;
        return Ok(());
    }

    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    #[test]
    fn migrates_files_and_directories() {
        let srcdir = tempdir().unwrap();
        let destdir = tempdir().unwrap();
        std::fs::create_dir_all(srcdir.path().join("bin")).unwrap();
        std::fs::write(srcdir.path().join("bin/tool"), b"exe").unwrap();

        let mut files = BTreeSet::new();
        files.insert(PathBuf::from("bin/tool"));
        let mut dirs = BTreeSet::new();
        dirs.insert(PathBuf::from("bin"));

        migrate_files(&files, &dirs, srcdir.path(), destdir.path(), &BTreeSet::new(), |_| Ok(()))
            .unwrap();
        assert!(destdir.path().join("bin/tool").exists());
    }

    #[test]
    fn pre_existing_conflict_aborts() {
        let srcdir = tempdir().unwrap();
        let destdir = tempdir().unwrap();
        std::fs::write(srcdir.path().join("a"), b"1").unwrap();
        std::fs::write(destdir.path().join("a"), b"2").unwrap();

        let mut files = BTreeSet::new();
        files.insert(PathBuf::from("a"));

        let result = migrate_files(
            &files,
            &BTreeSet::new(),
            srcdir.path(),
            destdir.path(),
            &BTreeSet::new(),
            |_| Ok(()),
        );
        assert!(result.is_err());
    }
}
