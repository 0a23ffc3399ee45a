//! Dependency-ordered action planning: given a target step and an
//! optional part filter, compute the exact sequence of `Action`s needed
//! to bring those parts up to the target step.

use crate::error::Result;
use crate::parts::{sort_parts, Part};
use crate::state::StateManager;
use crate::step::{Action, ActionKind, Step};
use tracing::debug;

pub struct Sequencer<'a, 'b> {
    manager: &'a mut StateManager<'b>,
    sorted_parts: Vec<Part>,
    planned: std::collections::HashSet<(String, Step)>,
}

impl<'a, 'b> Sequencer<'a, 'b> {
    pub fn new(manager: &'a mut StateManager<'b>, all_parts: &[Part]) -> Result<Self> {
        let sorted_parts = sort_parts(all_parts)?;
        Ok(Self { manager, sorted_parts, planned: std::collections::HashSet::new() })
    }

    /// Plan every action needed to bring `part_filter` (or all parts, if
    /// empty) up to `target_step`.
    pub fn plan(&mut self, target_step: Step, part_filter: &[String]) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        self.planned.clear();
        let parts: Vec<Part> = self.sorted_parts.clone();
        for step in target_step.previous_steps().into_iter().chain(std::iter::once(target_step)) {
            for part in &parts {
                if !part_filter.is_empty() && !part_filter.contains(&part.name) {
                    continue;
                }
                self.add_step_actions(part, step, target_step, part_filter, &mut actions)?;
            }
        }
        Ok(actions)
    }

    /// `target_step`/`part_filter` here are always the original request's,
    /// threaded unchanged through dependency recursion — only the literal
    /// `(p, S)` the caller asked for counts as "requested", not a
    /// dependency's prerequisite step.
    fn add_step_actions(
        &mut self,
        part: &Part,
        step: Step,
        target_step: Step,
        part_filter: &[String],
        actions: &mut Vec<Action>,
    ) -> Result<()> {
        if !self.planned.insert((part.name.clone(), step)) {
            // Already planned earlier in this same `plan()` call — either
            // by the outer per-step loop or by another part's dependency
            // recursion reaching for the same prerequisite.
            return Ok(());
        }

        if let Some(prereq) = step.prereq() {
            let deps: Vec<Part> = self
                .manager
                .dependencies_of(&part.name)?
                .into_iter()
                .filter(|d| part.spec.after.contains(&d.name))
                .cloned()
                .collect();
            for dep in deps {
                if self.manager.should_run(&dep, prereq)? {
                    let reason = format!("required to {} {}", step.verb(), part.name);
                    let before = actions.len();
                    // Bring the dependency up to `prereq`, not just to that one
                    // step: it may itself need earlier steps of its own first
                    // (e.g. BUILD before STAGE). Every action newly emitted in
                    // this pull-forward is here because of the same cascade,
                    // so all of them carry the reason, not just the last.
                    for dep_step in prereq.previous_steps().into_iter().chain(std::iter::once(prereq)) {
                        self.add_step_actions(&dep, dep_step, target_step, part_filter, actions)?;
                    }
                    for action in &mut actions[before..] {
                        if action.part_name == dep.name && action.reason.is_none() {
                            action.reason = Some(reason.clone());
                        }
                    }
                }
            }
        }

        let has_run = self.manager.has_step_run(&part.name, step);
        let is_requested = part_filter.contains(&part.name) && step == target_step;

        let action = if !has_run {
            Action::new(&part.name, step, ActionKind::Run)
        } else if is_requested {
            Action::new(&part.name, step, ActionKind::Rerun).with_reason("requested step")
        } else if let Some(dirty) = self.manager.dirty_report(part, step)? {
            Action::new(&part.name, step, ActionKind::Rerun).with_reason(dirty.summary())
        } else if let Some(outdated) = self.manager.outdated_report(part, step)? {
            let kind = if matches!(step, Step::Pull | Step::Build) {
                ActionKind::Update
            } else {
                ActionKind::Rerun
            };
            Action::new(&part.name, step, kind).with_reason(outdated.to_string())
        } else {
            Action::new(&part.name, step, ActionKind::Skip).with_reason("already ran")
        };

        debug!(part = %part.name, %step, kind = %action.kind, "planned action");

        if !matches!(action.kind, ActionKind::Skip) {
            self.manager.set_state(&part.name, step, crate::state::PartState {
                timestamp: crate::state::next_timestamp(),
                ..self.manager.get_state(&part.name, step).cloned().unwrap_or_default()
            });
        }

        actions.push(action);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::{Part, PartSpec};
    use crate::project::ProjectInfo;
    use crate::source::SourceRegistry;

    fn spec(after: &[&str], source: Option<&str>) -> PartSpec {
        let mut s: PartSpec = serde_yaml::from_str("plugin: nil").unwrap();
        s.after = after.iter().map(|s| s.to_string()).collect();
        s.source = source.map(|s| s.to_string());
        s
    }

    fn three_parts(work_dir: &std::path::Path) -> Vec<Part> {
        vec![
            Part::new("bar", spec(&["foo"], None), work_dir).unwrap(),
            Part::new("foo", spec(&[], Some("a.tar.gz")), work_dir).unwrap(),
            Part::new("foobar", spec(&[], None), work_dir).unwrap(),
        ]
    }

    #[test]
    fn simple_three_part_pull_plan() {
        let work_dir = tempfile::tempdir().unwrap();
        let parts = three_parts(work_dir.path());
        let project = ProjectInfo::new(work_dir.path());
        let sources = SourceRegistry::new();
        let mut manager = StateManager::new(&parts, &sources, &project).unwrap();
        let mut sequencer = Sequencer::new(&mut manager, &parts).unwrap();

        let actions = sequencer.plan(Step::Pull, &[]).unwrap();
        let summary: Vec<(String, Step, ActionKind)> =
            actions.iter().map(|a| (a.part_name.clone(), a.step, a.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("foo".into(), Step::Pull, ActionKind::Run),
                ("bar".into(), Step::Pull, ActionKind::Run),
                ("foobar".into(), Step::Pull, ActionKind::Run),
            ]
        );
    }

    #[test]
    fn explicit_request_reruns() {
        let work_dir = tempfile::tempdir().unwrap();
        let parts = three_parts(work_dir.path());
        let project = ProjectInfo::new(work_dir.path());
        let sources = SourceRegistry::new();
        let mut manager = StateManager::new(&parts, &sources, &project).unwrap();

        for part in &parts {
            manager.set_state(
                &part.name,
                Step::Pull,
                crate::state::PartState {
                    timestamp: crate::state::next_timestamp(),
                    properties: part.property_snapshot(Step::Pull),
                    project_options: project.option_snapshot(Step::Pull),
                    ..Default::default()
                },
            );
        }

        let mut sequencer = Sequencer::new(&mut manager, &parts).unwrap();
        let actions = sequencer.plan(Step::Build, &["bar".to_string()]).unwrap();
        assert_eq!(actions.last().unwrap().kind, ActionKind::Run);
        assert_eq!(actions.last().unwrap().part_name, "bar");
    }

    #[test]
    fn pulling_a_dependency_forward_tags_every_step_with_the_reason() {
        let work_dir = tempfile::tempdir().unwrap();
        let parts = three_parts(work_dir.path());
        let project = ProjectInfo::new(work_dir.path());
        let sources = SourceRegistry::new();
        let mut manager = StateManager::new(&parts, &sources, &project).unwrap();
        let mut sequencer = Sequencer::new(&mut manager, &parts).unwrap();

        let actions = sequencer.plan(Step::Stage, &["bar".to_string()]).unwrap();
        let foo_actions: Vec<&Action> =
            actions.iter().filter(|a| a.part_name == "foo" && a.step != Step::Pull).collect();
        assert_eq!(foo_actions.len(), 2);
        for action in foo_actions {
            assert_eq!(action.reason.as_deref(), Some("required to build bar"));
        }
    }
}
