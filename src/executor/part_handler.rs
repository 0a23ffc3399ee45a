//! Dispatches a single `(part, step)` action to the right built-in
//! behavior: run the plugin, or run an `override-*` scriptlet instead.

use super::{collisions, environment, migration, organize, scriptlet::ScriptletRunner};
use crate::callbacks::CallbackRegistry;
use crate::cmd::CmdRunner;
use crate::error::{Error, Result};
use crate::fileset::{migratable_filesets, Fileset};
use crate::package::PackageRepository;
use crate::parts::Part;
use crate::plugin::PluginRegistry;
use crate::project::ProjectInfo;
use crate::source::SourceRegistry;
use crate::state::PartState;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct PartHandler<'a> {
    pub plugins: &'a PluginRegistry,
    pub sources: &'a SourceRegistry,
    pub packages: Option<&'a dyn PackageRepository>,
    pub callbacks: &'a CallbackRegistry,
    pub project: &'a ProjectInfo,
    pub stage_dir: PathBuf,
    pub prime_dir: PathBuf,
}

impl<'a> PartHandler<'a> {
    fn control_call(&self, part: &Part, function: &str) -> Result<()> {
        match function {
            "pull" => self.run_pull(part).map(|_| ()),
            "build" => self.run_build(part).map(|_| ()),
            "stage" => self.run_stage(part, &[]).map(|_| ()),
            "prime" => self.run_prime(part).map(|_| ()),
            other => Err(Error::InvalidControlAPICall(other.to_string())),
        }
    }

    pub fn run_pull(&self, part: &Part) -> Result<PartState> {
        self.callbacks.run_pre(&part.name, crate::step::Step::Pull)?;
        info!(part = %part.name, "pulling");

        if part.part_src_dir.exists() {
            std::fs::remove_dir_all(&part.part_src_dir)?;
        }
        std::fs::create_dir_all(&part.part_src_dir)?;

        let mut assets = indexmap::IndexMap::new();

        if let Some(script) = &part.spec.override_pull {
            let runner = ScriptletRunner::new()?;
            runner.run(&part.name, "override-pull", script, &part.part_src_dir, &[], |f| {
                self.control_call(part, f)
            })?;
        } else if let Some(source_type) = &part.spec.source_type
            && let Some(handler) = self.sources.get(source_type) {
                handler.pull(&part.part_src_dir)?;
                assets.extend(handler.source_details());
            }

        if !part.spec.stage_packages.is_empty()
            && let Some(repo) = self.packages {
                let dest = part.part_dir.join("stage_packages");
                let resolved = repo.fetch(&part.spec.stage_packages, &dest)?;
                for (name, version) in resolved {
                    assets.insert(name, version);
                }
            }

        self.callbacks.run_post(&part.name, crate::step::Step::Pull)?;

        Ok(PartState {
            timestamp: crate::state::next_timestamp(),
            properties: part.property_snapshot(crate::step::Step::Pull),
            project_options: self.project.option_snapshot(crate::step::Step::Pull),
            assets,
            ..Default::default()
        })
    }

    pub fn run_build(&self, part: &Part) -> Result<PartState> {
        self.callbacks.run_pre(&part.name, crate::step::Step::Build)?;
        info!(part = %part.name, "building");

        let plugin = self.plugins.get(part.plugin_name())?;

        std::fs::create_dir_all(&part.part_build_dir)?;
        std::fs::create_dir_all(&part.part_install_dir)?;

        if !plugin.out_of_source_build() {
            copy_tree(&part.part_src_dir, &part.part_build_dir)?;
        }

        let mut env = environment::derive_build_environment(
            &part.part_install_dir,
            &self.stage_dir,
            &self.project.target_arch,
        );
        for (k, v) in plugin.get_build_environment() {
            env.insert(k, v);
        }
        env.insert("CRAFT_PART_INSTALL".to_string(), part.part_install_dir.display().to_string());
        env.insert("CRAFT_PART_SRC".to_string(), part.part_src_dir.display().to_string());
        env.insert("CRAFT_PART_BUILD".to_string(), part.part_build_dir.display().to_string());

        let cwd = if let Some(subdir) = &part.spec.source_subdir {
            part.part_build_dir.join(subdir)
        } else {
            part.part_build_dir.clone()
        };

        if let Some(script) = &part.spec.override_build {
            let runner = ScriptletRunner::new()?;
            let env_pairs: Vec<(String, String)> = env.into_iter().collect();
            runner.run(&part.name, "override-build", script, &cwd, &env_pairs, |f| {
                self.control_call(part, f)
            })?;
        } else {
            let body = plugin.get_build_commands().join("\n");
            let mut runner = CmdRunner::new("/bin/sh").arg("-c").arg(&body).current_dir(&cwd);
            for (k, v) in &env {
                runner = runner.env(k, v);
            }
            let result = runner.execute()?;
            if !result.status.success() {
                return Err(Error::PluginBuildError {
                    part: part.name.clone(),
                    status: result.status.to_string(),
                    stderr: result.stderr,
                });
            }
        }

        organize::organize_filesets(
            &part.name,
            &part.spec.organize,
            &part.part_install_dir,
            false,
        )?;

        self.callbacks.run_post(&part.name, crate::step::Step::Build)?;

        Ok(PartState {
            timestamp: crate::state::next_timestamp(),
            properties: part.property_snapshot(crate::step::Step::Build),
            project_options: self.project.option_snapshot(crate::step::Step::Build),
            ..Default::default()
        })
    }

    pub fn run_stage(
        &self,
        part: &Part,
        earlier_parts: &[(String, PathBuf, BTreeSet<PathBuf>)],
    ) -> Result<PartState> {
        self.callbacks.run_pre(&part.name, crate::step::Step::Stage)?;
        info!(part = %part.name, "staging");

        let stage_patterns = if part.spec.stage.is_empty() {
            vec!["*".to_string()]
        } else {
            part.spec.stage.clone()
        };
        let fileset = Fileset::new("stage", stage_patterns);
        let (files, dirs) = migratable_filesets(&fileset, &part.part_install_dir)?;

        collisions::check_for_stage_collisions(
            &part.name,
            &part.part_install_dir,
            &files,
            earlier_parts,
        )?;

        // Anything reaching here that overlaps an earlier part's file set
        // passed the collision check (identical content, or pkg-config
        // files equal modulo `prefix=`) — already staged, leave it alone.
        let already_staged: BTreeSet<PathBuf> = earlier_parts
            .iter()
            .flat_map(|(_, _, other_files)| files.intersection(other_files).cloned())
            .collect();

        if let Some(script) = &part.spec.override_stage {
            let runner = ScriptletRunner::new()?;
            runner.run(&part.name, "override-stage", script, &self.stage_dir, &[], |f| {
                self.control_call(part, f)
            })?;
        } else {
            std::fs::create_dir_all(&self.stage_dir)?;
            migration::migrate_files(
                &files,
                &dirs,
                &part.part_install_dir,
                &self.stage_dir,
                &already_staged,
                |dest| rewrite_pkgconfig_prefix(dest, &self.stage_dir),
            )?;
        }

        self.callbacks.run_post(&part.name, crate::step::Step::Stage)?;

        Ok(PartState {
            timestamp: crate::state::next_timestamp(),
            properties: part.property_snapshot(crate::step::Step::Stage),
            files,
            directories: dirs,
            ..Default::default()
        })
    }

    pub fn run_prime(&self, part: &Part) -> Result<PartState> {
        self.callbacks.run_pre(&part.name, crate::step::Step::Prime)?;
        info!(part = %part.name, "priming");

        let prime_patterns = if part.spec.prime.is_empty() {
            vec!["*".to_string()]
        } else {
            part.spec.prime.clone()
        };
        let mut fileset = Fileset::new("prime", prime_patterns);

        // Only pull in the stage fileset when prime is still the default
        // (`*`) or declares no includes of its own — an explicit prime
        // list is authoritative and must not be overwritten by stage's.
        let is_default_prime = fileset.entries() == ["*".to_string()].as_slice();
        if is_default_prime || fileset.includes().is_empty() {
            let stage_patterns = if part.spec.stage.is_empty() {
                vec!["*".to_string()]
            } else {
                part.spec.stage.clone()
            };
            let stage_fileset = Fileset::new("stage", stage_patterns);
            fileset.combine(&stage_fileset);
        }

        let (files, dirs) = migratable_filesets(&fileset, &self.stage_dir)?;

        if let Some(script) = &part.spec.override_prime {
            let runner = ScriptletRunner::new()?;
            runner.run(&part.name, "override-prime", script, &self.prime_dir, &[], |f| {
                self.control_call(part, f)
            })?;
        } else {
            std::fs::create_dir_all(&self.prime_dir)?;
            migration::migrate_files(
                &files,
                &dirs,
                &self.stage_dir,
                &self.prime_dir,
                &BTreeSet::new(),
                |_| Ok(()),
            )?;
        }

        self.callbacks.run_post(&part.name, crate::step::Step::Prime)?;

        Ok(PartState {
            timestamp: crate::state::next_timestamp(),
            properties: part.property_snapshot(crate::step::Step::Prime),
            files,
            directories: dirs,
            ..Default::default()
        })
    }

    /// Remove the on-disk artifacts recorded in `state` for `step`.
    pub fn clean(&self, part: &Part, step: crate::step::Step, state: &PartState) -> Result<()> {
        use crate::step::Step;
        match step {
            Step::Pull => {
                if part.part_src_dir.exists() {
                    std::fs::remove_dir_all(&part.part_src_dir)?;
                }
            }
            Step::Build => {
                if part.part_build_dir.exists() {
                    std::fs::remove_dir_all(&part.part_build_dir)?;
                }
                if part.part_install_dir.exists() {
                    std::fs::remove_dir_all(&part.part_install_dir)?;
                }
            }
            Step::Stage => remove_recorded(&self.stage_dir, state)?,
            Step::Prime => remove_recorded(&self.prime_dir, state)?,
        }
        Ok(())
    }
}

fn remove_recorded(root: &Path, state: &PartState) -> Result<()> {
    for file in &state.files {
        let path = root.join(file);
        if path.symlink_metadata().is_ok() {
            std::fs::remove_file(&path)?;
        }
    }
    let mut dirs: Vec<&PathBuf> = state.directories.iter().collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let path = root.join(dir);
        if path.is_dir() {
            let _ = std::fs::remove_dir(&path);
        }
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            migration::link_or_copy(&entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Rewrite a `.pc` file's hardcoded install prefix to point at `stage_dir`.
fn rewrite_pkgconfig_prefix(path: &Path, stage_dir: &Path) -> Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some("pc") {
        return Ok(());
    }
    if path.symlink_metadata()?.is_symlink() {
        return Ok(());
    }
    let contents = std::fs::read_to_string(path)?;
    let rewritten: String = contents
        .lines()
        .map(|line| {
            if let Some(rest) = line.strip_prefix("prefix=") {
                let _ = rest;
                format!("prefix={}", stage_dir.display())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, rewritten + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackRegistry;
    use crate::parts::PartSpec;
    use crate::plugin::PluginRegistry;
    use crate::project::ProjectInfo;
    use crate::source::SourceRegistry;

    fn handler<'a>(
        plugins: &'a PluginRegistry,
        sources: &'a SourceRegistry,
        callbacks: &'a CallbackRegistry,
        project: &'a ProjectInfo,
        stage_dir: PathBuf,
        prime_dir: PathBuf,
    ) -> PartHandler<'a> {
        PartHandler { plugins, sources, packages: None, callbacks, project, stage_dir, prime_dir }
    }

    #[test]
    fn explicit_prime_list_is_not_overwritten_by_stage() {
        let plugins = PluginRegistry::new();
        let sources = SourceRegistry::new();
        let callbacks = CallbackRegistry::new();
        let work_dir = tempfile::tempdir().unwrap();
        let project = ProjectInfo::new(work_dir.path());
        let stage_dir = tempfile::tempdir().unwrap();
        let prime_dir = tempfile::tempdir().unwrap();

        std::fs::write(stage_dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(stage_dir.path().join("b.txt"), b"b").unwrap();

        let mut spec: PartSpec = serde_yaml::from_str("plugin: nil").unwrap();
        spec.prime = vec!["a.txt".to_string()];
        spec.stage = vec!["b.txt".to_string()];
        let part = Part::new("foo", spec, work_dir.path()).unwrap();

        let ph = handler(
            &plugins,
            &sources,
            &callbacks,
            &project,
            stage_dir.path().to_path_buf(),
            prime_dir.path().to_path_buf(),
        );
        let state = ph.run_prime(&part).unwrap();

        assert_eq!(state.files, BTreeSet::from([PathBuf::from("a.txt")]));
        assert!(prime_dir.path().join("a.txt").exists());
        assert!(!prime_dir.path().join("b.txt").exists());
    }

    #[test]
    fn default_prime_pulls_in_the_stage_fileset() {
        let plugins = PluginRegistry::new();
        let sources = SourceRegistry::new();
        let callbacks = CallbackRegistry::new();
        let work_dir = tempfile::tempdir().unwrap();
        let project = ProjectInfo::new(work_dir.path());
        let stage_dir = tempfile::tempdir().unwrap();
        let prime_dir = tempfile::tempdir().unwrap();

        std::fs::write(stage_dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(stage_dir.path().join("b.txt"), b"b").unwrap();

        let mut spec: PartSpec = serde_yaml::from_str("plugin: nil").unwrap();
        spec.stage = vec!["b.txt".to_string()];
        let part = Part::new("foo", spec, work_dir.path()).unwrap();

        let ph = handler(
            &plugins,
            &sources,
            &callbacks,
            &project,
            stage_dir.path().to_path_buf(),
            prime_dir.path().to_path_buf(),
        );
        let state = ph.run_prime(&part).unwrap();

        assert_eq!(state.files, BTreeSet::from([PathBuf::from("b.txt")]));
    }
}
