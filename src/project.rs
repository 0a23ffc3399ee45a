//! Cross-cutting options that affect every part's build, independent of
//! any single part's own properties.

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub application_name: String,
    pub target_arch: String,
    pub parallel_build_count: u32,
    pub work_dir: std::path::PathBuf,
}

impl ProjectInfo {
    pub fn new(work_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            application_name: "partforge".to_string(),
            target_arch: std::env::consts::ARCH.to_string(),
            parallel_build_count: 1,
            work_dir: work_dir.into(),
        }
    }

    /// The subset of project options relevant to dirtiness-checking a step
    /// (currently just `target_arch`; PULL and BUILD are the only steps
    /// that care, per the per-step property table).
    pub fn option_snapshot(&self, step: crate::step::Step) -> IndexMap<String, String> {
        use crate::step::Step;
        let mut snap = IndexMap::new();
        if matches!(step, Step::Pull | Step::Build) {
            snap.insert("target_arch".to_string(), self.target_arch.clone());
        }
        snap
    }
}
