//! Persistent and in-memory tracking of what has already run, and whether
//! it needs to run again.

mod dirty;
pub mod part_state;
mod reports;

pub use part_state::PartState;
pub use reports::{Dependency, DirtyReport, OutdatedReport};

use crate::error::Result;
use crate::parts::{part_dependencies, Part};
use crate::project::ProjectInfo;
use crate::source::SourceRegistry;
use crate::step::Step;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter used for `PartState::timestamp` instead of wall-clock
/// mtime, so ordering between states written within the same process is
/// exact even on filesystems with coarse mtime resolution.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub fn next_timestamp() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// In-memory view of per-(part, step) state, seeded from disk and updated
/// as the sequencer plans and the executor runs.
pub struct StateManager<'a> {
    states: HashMap<(String, Step), PartState>,
    all_parts: &'a [Part],
    sources: &'a SourceRegistry,
    project: &'a ProjectInfo,
}

impl<'a> StateManager<'a> {
    pub fn new(
        all_parts: &'a [Part],
        sources: &'a SourceRegistry,
        project: &'a ProjectInfo,
    ) -> Result<Self> {
        let mut states = HashMap::new();
        for part in all_parts {
            for step in Step::ALL {
                if let Some(state) = part_state::load_state(part, step)? {
                    states.insert((part.name.clone(), step), state);
                }
            }
        }
        Ok(Self { states, all_parts, sources, project })
    }

    pub fn set_state(&mut self, part_name: &str, step: Step, state: PartState) {
        self.states.insert((part_name.to_string(), step), state);
    }

    pub fn get_state(&self, part_name: &str, step: Step) -> Option<&PartState> {
        self.states.get(&(part_name.to_string(), step))
    }

    pub fn has_step_run(&self, part_name: &str, step: Step) -> bool {
        self.states.contains_key(&(part_name.to_string(), step))
    }

    /// True if this step (or any earlier step of the same part) needs to
    /// run before the pipeline can be considered up to date.
    pub fn should_run(&self, part: &Part, step: Step) -> Result<bool> {
        if !self.has_step_run(&part.name, step)
            || self.outdated_report(part, step)?.is_some()
            || self.dirty_report(part, step)?.is_some()
        {
            return Ok(true);
        }
        if let Some(previous) = step.previous() {
            return self.should_run(part, previous);
        }
        Ok(false)
    }

    /// Remove state for `step` and everything after it; the executor is
    /// responsible for deleting the corresponding on-disk artifacts.
    pub fn clean_part(&mut self, part_name: &str, step: Step) {
        for s in std::iter::once(step).chain(step.next_steps()) {
            self.states.remove(&(part_name.to_string(), s));
        }
    }

    pub fn dirty_report(&self, part: &Part, step: Step) -> Result<Option<DirtyReport>> {
        dirty::dirty_report(self, part, step)
    }

    pub fn outdated_report(&self, part: &Part, step: Step) -> Result<Option<OutdatedReport>> {
        dirty::outdated_report(self, part, step)
    }

    pub(crate) fn dependencies_of(&self, part_name: &str) -> Result<Vec<&'a Part>> {
        Ok(part_dependencies(part_name, self.all_parts, true)?.into_iter().collect())
    }

    pub(crate) fn sources(&self) -> &'a SourceRegistry {
        self.sources
    }

    pub(crate) fn project(&self) -> &'a ProjectInfo {
        self.project
    }
}
