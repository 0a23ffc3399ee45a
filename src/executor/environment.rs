//! Build environment derived from existing install/stage subdirectories,
//! so plugins find headers and libraries without hardcoding triplets.

use indexmap::IndexMap;
use std::path::Path;

const BIN_DIRS: &[&str] = &["usr/sbin", "usr/bin", "sbin", "bin"];
const INCLUDE_DIRS: &[&str] = &["include", "usr/include"];
const LIB_DIRS: &[&str] = &["lib", "usr/lib"];
const PKGCONFIG_DIRS: &[&str] = &[
    "lib/pkgconfig",
    "lib/{triplet}/pkgconfig",
    "usr/lib/pkgconfig",
    "usr/lib/{triplet}/pkgconfig",
    "share/pkgconfig",
    "usr/share/pkgconfig",
    "lib32/pkgconfig",
    "lib64/pkgconfig",
];

fn existing(roots: &[&Path], rel: &str) -> Vec<String> {
    roots
        .iter()
        .map(|root| root.join(rel))
        .filter(|p| p.is_dir())
        .map(|p| p.to_string_lossy().to_string())
        .collect()
}

/// Assemble `PATH`/`CFLAGS`/`CXXFLAGS`/`CPPFLAGS`/`LDFLAGS`/`PKG_CONFIG_PATH`
/// by probing `part/install` and `stage/` for the usual subdirectories.
pub fn derive_build_environment(
    install_dir: &Path,
    stage_dir: &Path,
    arch_triplet: &str,
) -> IndexMap<String, String> {
    let roots = [install_dir, stage_dir];

    let mut bin_paths = Vec::new();
    for dir in BIN_DIRS {
        bin_paths.extend(existing(&roots, dir));
    }
    if let Ok(path) = std::env::var("PATH") {
        bin_paths.push(path);
    }

    let mut include_paths = Vec::new();
    for dir in INCLUDE_DIRS {
        include_paths.extend(existing(&roots, dir));
        include_paths.extend(existing(&roots, &format!("{dir}/{arch_triplet}")));
    }
    let isystem_flags: Vec<String> = include_paths.iter().map(|p| format!("-isystem{p}")).collect();

    let mut lib_paths = Vec::new();
    for dir in LIB_DIRS {
        lib_paths.extend(existing(&roots, dir));
        lib_paths.extend(existing(&roots, &format!("{dir}/{arch_triplet}")));
    }
    let ldflags: Vec<String> = lib_paths.iter().map(|p| format!("-L{p}")).collect();

    let mut pkgconfig_paths = Vec::new();
    for dir in PKGCONFIG_DIRS {
        pkgconfig_paths.extend(existing(&roots, &dir.replace("{triplet}", arch_triplet)));
    }

    let mut env = IndexMap::new();
    env.insert("PATH".to_string(), bin_paths.join(":"));
    env.insert("CFLAGS".to_string(), isystem_flags.join(" "));
    env.insert("CXXFLAGS".to_string(), isystem_flags.join(" "));
    env.insert("CPPFLAGS".to_string(), isystem_flags.join(" "));
    env.insert("LDFLAGS".to_string(), ldflags.join(" "));
    env.insert("PKG_CONFIG_PATH".to_string(), pkgconfig_paths.join(":"));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn only_existing_dirs_are_included() {
        let install = tempdir().unwrap();
        std::fs::create_dir_all(install.path().join("usr/include")).unwrap();
        let stage = tempdir().unwrap();

        let env = derive_build_environment(install.path(), stage.path(), "x86_64-linux-gnu");
        assert!(env["CFLAGS"].contains("usr/include"));
        assert!(!env["CFLAGS"].contains("isystem/lib"));
        assert_eq!(env["LDFLAGS"], "");
    }
}
