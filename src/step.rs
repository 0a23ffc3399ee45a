//! The four-stage pipeline steps and the actions the sequencer plans for them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four phases every part traverses, in a fixed total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    Pull,
    Build,
    Stage,
    Prime,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Pull, Step::Build, Step::Stage, Step::Prime];

    /// Steps strictly before this one, in pipeline order.
    pub fn previous_steps(self) -> Vec<Step> {
        Self::ALL.iter().copied().take_while(|&s| s != self).collect()
    }

    /// Steps strictly after this one, in pipeline order.
    pub fn next_steps(self) -> Vec<Step> {
        Self::ALL.iter().copied().skip_while(|&s| s != self).skip(1).collect()
    }

    pub fn previous(self) -> Option<Step> {
        self.previous_steps().last().copied()
    }

    /// The step another part must reach before this step can run on a part
    /// that depends on it (`after`), per the dependency order table.
    pub fn prereq(self) -> Option<Step> {
        match self {
            Step::Pull => None,
            Step::Build => Some(Step::Stage),
            Step::Stage => Some(Step::Stage),
            Step::Prime => Some(Step::Prime),
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Step::Pull => "pull",
            Step::Build => "build",
            Step::Stage => "stage",
            Step::Prime => "prime",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb())
    }
}

/// What the sequencer decided to do with a given `(part, step)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Run,
    Rerun,
    Skip,
    Update,
}

impl ActionKind {
    /// `Update` only makes sense for steps that support a cheap in-place
    /// refresh; STAGE/PRIME must fully re-migrate instead.
    pub fn valid_for(self, step: Step) -> bool {
        match self {
            ActionKind::Update => matches!(step, Step::Pull | Step::Build),
            _ => true,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Run => "RUN",
            ActionKind::Rerun => "RERUN",
            ActionKind::Skip => "SKIP",
            ActionKind::Update => "UPDATE",
        };
        write!(f, "{s}")
    }
}

/// A single planned unit of work, with the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub part_name: String,
    pub step: Step,
    pub kind: ActionKind,
    pub reason: Option<String>,
}

impl Action {
    pub fn new(part_name: impl Into<String>, step: Step, kind: ActionKind) -> Self {
        Self { part_name: part_name.into(), step, kind, reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.part_name, self.step)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total() {
        assert!(Step::Pull < Step::Build);
        assert!(Step::Build < Step::Stage);
        assert!(Step::Stage < Step::Prime);
    }

    #[test]
    fn previous_and_next_steps() {
        assert_eq!(Step::Stage.previous_steps(), vec![Step::Pull, Step::Build]);
        assert_eq!(Step::Stage.next_steps(), vec![Step::Prime]);
        assert!(Step::Prime.next_steps().is_empty());
        assert!(Step::Pull.previous_steps().is_empty());
    }

    #[test]
    fn update_only_valid_for_pull_and_build() {
        assert!(ActionKind::Update.valid_for(Step::Pull));
        assert!(ActionKind::Update.valid_for(Step::Build));
        assert!(!ActionKind::Update.valid_for(Step::Stage));
        assert!(!ActionKind::Update.valid_for(Step::Prime));
    }
}
