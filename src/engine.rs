//! Top-level entry point wiring the sequencer, state manager and executor
//! together. Holds the registries as explicit instance state rather than
//! module statics, so multiple engines can coexist (e.g. in tests).

use crate::callbacks::CallbackRegistry;
use crate::error::{Error, Result};
use crate::executor::PartHandler;
use crate::package::PackageRepository;
use crate::parts::{sort_parts, Part, PartSpec};
use crate::plugin::PluginRegistry;
use crate::project::ProjectInfo;
use crate::source::SourceRegistry;
use crate::state::StateManager;
use crate::step::{Action, ActionKind, Step};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

pub struct Engine {
    pub parts: Vec<Part>,
    pub project: ProjectInfo,
    pub plugins: PluginRegistry,
    pub sources: SourceRegistry,
    pub packages: Option<Box<dyn PackageRepository>>,
    pub callbacks: CallbackRegistry,
}

impl Engine {
    pub fn new(specs: IndexMap<String, PartSpec>, work_dir: PathBuf) -> Result<Self> {
        let mut parts = Vec::new();
        for (name, spec) in specs {
            parts.push(Part::new(name, spec, &work_dir)?);
        }
        // fail fast on an unsortable / cyclic dependency graph
        sort_parts(&parts)?;

        Ok(Self {
            parts,
            project: ProjectInfo::new(work_dir),
            plugins: PluginRegistry::new(),
            sources: SourceRegistry::new(),
            packages: None,
            callbacks: CallbackRegistry::new(),
        })
    }

    pub fn stage_dir(&self) -> PathBuf {
        self.project.work_dir.join("stage")
    }

    pub fn prime_dir(&self) -> PathBuf {
        self.project.work_dir.join("prime")
    }

    /// Plan and then execute every action needed to bring `part_filter`
    /// up to `target_step`, returning the actions actually taken.
    pub fn run(&self, target_step: Step, part_filter: &[String]) -> Result<Vec<Action>> {
        for name in part_filter {
            crate::parts::part_by_name(name, &self.parts)?;
        }

        let mut state_manager = StateManager::new(&self.parts, &self.sources, &self.project)?;
        let actions = {
            let mut sequencer = crate::sequencer::Sequencer::new(&mut state_manager, &self.parts)?;
            sequencer.plan(target_step, part_filter)?
        };

        let handler = PartHandler {
            plugins: &self.plugins,
            sources: &self.sources,
            packages: self.packages.as_deref(),
            callbacks: &self.callbacks,
            project: &self.project,
            stage_dir: self.stage_dir(),
            prime_dir: self.prime_dir(),
        };

        // Collisions must be checked against every other part's staged
        // files, not just ones staged earlier in this same `run()` call:
        // seed from persisted state for parts that aren't themselves being
        // (re)staged by this action list.
        let restaging: std::collections::HashSet<&str> = actions
            .iter()
            .filter(|a| a.step == Step::Stage && !matches!(a.kind, ActionKind::Skip))
            .map(|a| a.part_name.as_str())
            .collect();
        let mut staged_so_far: Vec<(String, PathBuf, BTreeSet<PathBuf>)> = self
            .parts
            .iter()
            .filter(|p| !restaging.contains(p.name.as_str()))
            .filter_map(|p| {
                state_manager
                    .get_state(&p.name, Step::Stage)
                    .map(|s| (p.name.clone(), p.part_install_dir.clone(), s.files.clone()))
            })
            .collect();

        for action in &actions {
            let part = crate::parts::part_by_name(&action.part_name, &self.parts)?;
            info!(%action, "executing");

            match action.kind {
                ActionKind::Skip => continue,
                ActionKind::Rerun => state_manager.clean_part(&part.name, action.step),
                _ => {}
            }

            if action.kind == ActionKind::Update {
                self.run_update(&handler, part, action.step, &mut state_manager)?;
                continue;
            }

            let new_state = match action.step {
                Step::Pull => handler.run_pull(part)?,
                Step::Build => handler.run_build(part)?,
                Step::Stage => handler.run_stage(part, &staged_so_far)?,
                Step::Prime => handler.run_prime(part)?,
            };

            if action.step == Step::Stage {
                staged_so_far.push((
                    part.name.clone(),
                    part.part_install_dir.clone(),
                    new_state.files.clone(),
                ));
            }

            crate::state::part_state::save_state(part, action.step, &new_state)?;
            state_manager.set_state(&part.name, action.step, new_state);
        }

        Ok(actions)
    }

    fn run_update(
        &self,
        handler: &PartHandler<'_>,
        part: &Part,
        step: Step,
        state_manager: &mut StateManager,
    ) -> Result<()> {
        match step {
            Step::Pull => {
                if let Some(source_type) = &part.spec.source_type
                    && let Some(src) = self.sources.get(source_type) {
                        src.update(&part.part_src_dir)?;
                    }
                let mut state = state_manager
                    .get_state(&part.name, Step::Pull)
                    .cloned()
                    .unwrap_or_default();
                state.timestamp = crate::state::next_timestamp();
                crate::state::part_state::save_state(part, step, &state)?;
                state_manager.set_state(&part.name, step, state);
                Ok(())
            }
            Step::Build => {
                let state = handler.run_build(part)?;
                crate::state::part_state::save_state(part, step, &state)?;
                state_manager.set_state(&part.name, step, state);
                Ok(())
            }
            Step::Stage | Step::Prime => {
                Err(Error::InvalidAction { step, kind: ActionKind::Update })
            }
        }
    }

    /// Remove state and on-disk artifacts for `step` and everything after
    /// it, for every part in `part_filter` (or all parts).
    pub fn clean(&self, part_filter: &[String], step: Step) -> Result<()> {
        let mut state_manager = StateManager::new(&self.parts, &self.sources, &self.project)?;
        let handler = PartHandler {
            plugins: &self.plugins,
            sources: &self.sources,
            packages: self.packages.as_deref(),
            callbacks: &self.callbacks,
            project: &self.project,
            stage_dir: self.stage_dir(),
            prime_dir: self.prime_dir(),
        };

        let targets: Vec<&Part> = if part_filter.is_empty() {
            self.parts.iter().collect()
        } else {
            part_filter
                .iter()
                .map(|n| crate::parts::part_by_name(n, &self.parts))
                .collect::<Result<Vec<_>>>()?
        };

        for part in targets {
            for s in std::iter::once(step).chain(step.next_steps()).collect::<Vec<_>>().into_iter().rev()
            {
                if let Some(state) = state_manager.get_state(&part.name, s).cloned() {
                    handler.clean(part, s, &state)?;
                    crate::state::part_state::remove_state(part, s)?;
                }
            }
            state_manager.clean_part(&part.name, step);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ActionKind, Step};
    use indexmap::IndexMap;

    fn spec(after: &[&str]) -> PartSpec {
        let mut s: PartSpec = serde_yaml::from_str("plugin: nil").unwrap();
        s.after = after.iter().map(|s| s.to_string()).collect();
        s
    }

    fn three_part_specs() -> IndexMap<String, PartSpec> {
        let mut specs = IndexMap::new();
        specs.insert("bar".to_string(), spec(&["foo"]));
        specs.insert("foo".to_string(), spec(&[]));
        specs.insert("foobar".to_string(), spec(&[]));
        specs
    }

    fn summary(actions: &[Action]) -> Vec<(String, Step, ActionKind)> {
        actions.iter().map(|a| (a.part_name.clone(), a.step, a.kind)).collect()
    }

    #[test]
    fn simple_three_part_plan_runs_pull_for_all() {
        let work_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(three_part_specs(), work_dir.path().to_path_buf()).unwrap();

        let actions = engine.run(Step::Pull, &[]).unwrap();
        assert_eq!(
            summary(&actions),
            vec![
                ("foo".into(), Step::Pull, ActionKind::Run),
                ("bar".into(), Step::Pull, ActionKind::Run),
                ("foobar".into(), Step::Pull, ActionKind::Run),
            ]
        );
    }

    #[test]
    fn priming_one_part_after_pull_runs_its_whole_pipeline() {
        let work_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(three_part_specs(), work_dir.path().to_path_buf()).unwrap();
        engine.run(Step::Pull, &[]).unwrap();

        let actions = engine.run(Step::Prime, &["foobar".to_string()]).unwrap();
        assert_eq!(
            summary(&actions),
            vec![
                ("foobar".into(), Step::Pull, ActionKind::Skip),
                ("foobar".into(), Step::Build, ActionKind::Run),
                ("foobar".into(), Step::Stage, ActionKind::Run),
                ("foobar".into(), Step::Prime, ActionKind::Run),
            ]
        );
    }

    #[test]
    fn building_a_dependent_part_pulls_in_its_dependency() {
        let work_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(three_part_specs(), work_dir.path().to_path_buf()).unwrap();
        engine.run(Step::Pull, &[]).unwrap();

        let actions = engine.run(Step::Build, &["bar".to_string()]).unwrap();
        assert_eq!(
            summary(&actions),
            vec![
                ("bar".into(), Step::Pull, ActionKind::Skip),
                ("foo".into(), Step::Pull, ActionKind::Skip),
                ("foo".into(), Step::Build, ActionKind::Run),
                ("foo".into(), Step::Stage, ActionKind::Run),
                ("bar".into(), Step::Build, ActionKind::Run),
            ]
        );
    }

    #[test]
    fn rerunning_the_same_build_reruns_only_the_requested_step() {
        let work_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(three_part_specs(), work_dir.path().to_path_buf()).unwrap();
        engine.run(Step::Pull, &[]).unwrap();
        engine.run(Step::Build, &["bar".to_string()]).unwrap();

        let actions = engine.run(Step::Build, &["bar".to_string()]).unwrap();
        assert_eq!(
            summary(&actions),
            vec![
                ("bar".into(), Step::Pull, ActionKind::Skip),
                ("bar".into(), Step::Build, ActionKind::Rerun),
            ]
        );
        assert_eq!(actions[1].reason.as_deref(), Some("requested step"));
    }

    #[test]
    fn plan_is_idempotent_once_a_target_has_fully_run() {
        let work_dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(three_part_specs(), work_dir.path().to_path_buf()).unwrap();
        engine.run(Step::Prime, &[]).unwrap();

        let mut state_manager =
            StateManager::new(&engine.parts, &engine.sources, &engine.project).unwrap();
        let mut sequencer = crate::sequencer::Sequencer::new(&mut state_manager, &engine.parts).unwrap();
        let actions = sequencer.plan(Step::Prime, &[]).unwrap();
        assert!(actions.iter().all(|a| a.kind == ActionKind::Skip));
    }

    #[test]
    fn staging_two_parts_with_conflicting_files_fails() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut specs = IndexMap::new();
        specs.insert("one".to_string(), spec(&[]));
        specs.insert("two".to_string(), spec(&[]));
        let engine = Engine::new(specs, work_dir.path().to_path_buf()).unwrap();

        engine.run(Step::Build, &[]).unwrap();
        for name in ["one", "two"] {
            let part = crate::parts::part_by_name(name, &engine.parts).unwrap();
            std::fs::write(part.part_install_dir.join("clash.txt"), format!("content from {name}"))
                .unwrap();
        }

        engine.run(Step::Stage, &["one".to_string()]).unwrap();
        let err = engine.run(Step::Stage, &["two".to_string()]).unwrap_err();
        assert!(matches!(err, Error::PartConflictError { .. }));
    }

    #[test]
    fn identical_pkgconfig_files_with_different_prefixes_do_not_collide() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut specs = IndexMap::new();
        specs.insert("one".to_string(), spec(&[]));
        specs.insert("two".to_string(), spec(&[]));
        let engine = Engine::new(specs, work_dir.path().to_path_buf()).unwrap();

        engine.run(Step::Build, &[]).unwrap();
        for name in ["one", "two"] {
            let part = crate::parts::part_by_name(name, &engine.parts).unwrap();
            let prefix = format!("prefix=/install/{name}\nName: shared\n");
            std::fs::write(part.part_install_dir.join("shared.pc"), prefix).unwrap();
        }

        engine.run(Step::Stage, &["one".to_string()]).unwrap();
        let actions = engine.run(Step::Stage, &["two".to_string()]).unwrap();
        assert_eq!(actions.last().unwrap().kind, ActionKind::Run);
        assert!(engine.stage_dir().join("shared.pc").exists());
    }

    #[test]
    fn clean_removes_only_this_parts_staged_files() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut specs = IndexMap::new();
        specs.insert("one".to_string(), spec(&[]));
        specs.insert("two".to_string(), spec(&[]));
        let engine = Engine::new(specs, work_dir.path().to_path_buf()).unwrap();

        engine.run(Step::Build, &[]).unwrap();
        for name in ["one", "two"] {
            let part = crate::parts::part_by_name(name, &engine.parts).unwrap();
            std::fs::write(part.part_install_dir.join(format!("{name}.txt")), "x").unwrap();
        }
        engine.run(Step::Stage, &[]).unwrap();
        assert!(engine.stage_dir().join("one.txt").exists());
        assert!(engine.stage_dir().join("two.txt").exists());

        engine.clean(&["one".to_string()], Step::Stage).unwrap();
        assert!(!engine.stage_dir().join("one.txt").exists());
        assert!(engine.stage_dir().join("two.txt").exists());
    }
}
