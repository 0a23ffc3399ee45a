//! Dirty/outdated detection: whether a step's recorded state still
//! matches the part's current inputs, and whether an earlier stage has
//! moved on since this one ran.

use super::reports::{Dependency, DirtyReport, OutdatedReport};
use super::StateManager;
use crate::error::Result;
use crate::parts::Part;
use crate::step::Step;

/// A step's own property/option snapshot can always mark it dirty,
/// including PULL (e.g. a changed `source`). What's never dirty for PULL
/// is the dependency-cascade component: v2 plugins don't need their
/// dependencies staged to pull, so `prereq(PULL)` is `None` and there is
/// nothing to cascade from.
pub fn dirty_report(manager: &StateManager, part: &Part, step: Step) -> Result<Option<DirtyReport>> {
    let state = match manager.get_state(&part.name, step) {
        Some(s) => s,
        None => return Ok(None),
    };

    let mut dirty_properties = Vec::new();
    let current_properties = part.property_snapshot(step);
    for (key, value) in &current_properties {
        if state.properties.get(key) != Some(value) {
            dirty_properties.push(key.clone());
        }
    }

    let mut dirty_project_options = Vec::new();
    let current_options = manager.project().option_snapshot(step);
    for (key, value) in &current_options {
        if state.project_options.get(key) != Some(value) {
            dirty_project_options.push(key.clone());
        }
    }

    let mut changed_dependencies = Vec::new();
    if let Some(prerequisite_step) = step.prereq() {
        for dependency in manager.dependencies_of(&part.name)? {
            let dependency_changed = match manager.get_state(&dependency.name, prerequisite_step) {
                Some(dep_state) => state.timestamp < dep_state.timestamp,
                None => true,
            };
            if dependency_changed || manager.should_run(dependency, prerequisite_step)? {
                changed_dependencies
                    .push(Dependency { part_name: dependency.name.clone(), step: prerequisite_step });
            }
        }
    }

    let report = DirtyReport { dirty_properties, dirty_project_options, changed_dependencies };
    if report.is_empty() {
        Ok(None)
    } else {
        Ok(Some(report))
    }
}

/// An earlier step in this part's own pipeline ran more recently, or (for
/// PULL) the source tree changed on disk since the last pull.
pub fn outdated_report(
    manager: &StateManager,
    part: &Part,
    step: Step,
) -> Result<Option<OutdatedReport>> {
    let this_state = match manager.get_state(&part.name, step) {
        Some(s) => s,
        None => return Ok(None),
    };

    for earlier in step.previous_steps() {
        if let Some(earlier_state) = manager.get_state(&part.name, earlier)
            && earlier_state.timestamp > this_state.timestamp {
                return Ok(Some(OutdatedReport::EarlierStepChanged { step: earlier }));
            }
    }

    if step == Step::Pull
        && let Some(source_type) = &part.spec.source_type
            && let Some(handler) = manager.sources().get(source_type)
                && handler.check(&part.part_src_dir)? {
                    return Ok(Some(OutdatedReport::SourceChanged));
                }

    Ok(None)
}
