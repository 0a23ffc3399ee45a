//! Why a step needs to run again: because its own inputs changed (dirty),
//! or because an earlier step/the source tree moved on without it
//! (outdated).

use crate::step::Step;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub part_name: String,
    pub step: Step,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyReport {
    pub dirty_properties: Vec<String>,
    pub dirty_project_options: Vec<String>,
    pub changed_dependencies: Vec<Dependency>,
}

impl DirtyReport {
    pub fn is_empty(&self) -> bool {
        self.dirty_properties.is_empty()
            && self.dirty_project_options.is_empty()
            && self.changed_dependencies.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for p in &self.dirty_properties {
            parts.push(format!("'{p}' property changed"));
        }
        for o in &self.dirty_project_options {
            parts.push(format!("'{o}' option changed"));
        }
        for d in &self.changed_dependencies {
            parts.push(format!("{}:{} changed", d.part_name, d.step));
        }
        parts.join(", ")
    }
}

impl fmt::Display for DirtyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutdatedReport {
    /// An earlier step in this part's own pipeline has a newer timestamp.
    EarlierStepChanged { step: Step },
    /// The source tree on disk changed since PULL ran.
    SourceChanged,
}

impl fmt::Display for OutdatedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutdatedReport::EarlierStepChanged { step } => {
                write!(f, "{step} step changed since this step ran")
            }
            OutdatedReport::SourceChanged => write!(f, "source definition changed"),
        }
    }
}
