//! Part specifications, on-disk layout, and dependency ordering.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The user-facing declaration of a part, as parsed from `parts.yaml`.
///
/// Plugin-specific options are captured verbatim in `extra` rather than
/// modeled per-plugin, since the plugin registry is open and new plugins
/// should not require changes here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartSpec {
    #[serde(default)]
    pub plugin: Option<String>,

    #[serde(default)]
    pub source: Option<String>,
    #[serde(rename = "source-type", default)]
    pub source_type: Option<String>,
    #[serde(rename = "source-branch", default)]
    pub source_branch: Option<String>,
    #[serde(rename = "source-tag", default)]
    pub source_tag: Option<String>,
    #[serde(rename = "source-commit", default)]
    pub source_commit: Option<String>,
    #[serde(rename = "source-depth", default)]
    pub source_depth: Option<u32>,
    #[serde(rename = "source-checksum", default)]
    pub source_checksum: Option<String>,
    #[serde(rename = "source-subdir", default)]
    pub source_subdir: Option<String>,

    #[serde(default)]
    pub after: Vec<String>,

    #[serde(rename = "build-packages", default)]
    pub build_packages: Vec<String>,
    #[serde(rename = "stage-packages", default)]
    pub stage_packages: Vec<String>,
    #[serde(rename = "build-snaps", default)]
    pub build_snaps: Vec<String>,
    #[serde(rename = "stage-snaps", default)]
    pub stage_snaps: Vec<String>,

    #[serde(default)]
    pub stage: Vec<String>,
    #[serde(default)]
    pub prime: Vec<String>,
    #[serde(default)]
    pub organize: indexmap::IndexMap<String, String>,

    #[serde(rename = "override-pull", default)]
    pub override_pull: Option<String>,
    #[serde(rename = "override-build", default)]
    pub override_build: Option<String>,
    #[serde(rename = "override-stage", default)]
    pub override_stage: Option<String>,
    #[serde(rename = "override-prime", default)]
    pub override_prime: Option<String>,

    #[serde(rename = "disable-parallel", default)]
    pub disable_parallel: bool,

    #[serde(flatten)]
    pub extra: indexmap::IndexMap<String, serde_yaml::Value>,
}

/// A named part together with the on-disk paths it owns under `work_dir`.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub spec: PartSpec,
    pub part_dir: PathBuf,
    pub part_src_dir: PathBuf,
    pub part_build_dir: PathBuf,
    pub part_install_dir: PathBuf,
    pub part_state_dir: PathBuf,
}

/// Regex-equivalent validation for part names: lowercase alphanumeric,
/// `+`/`-` allowed after the first character; "plugins" is reserved.
pub fn validate_part_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_rest =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '+' || c == '-');
    if !valid_first || !valid_rest || name.is_empty() {
        return Err(Error::SchemaValidation(format!("invalid part name {name:?}")));
    }
    if name == "plugins" {
        return Err(Error::SchemaValidation("part name \"plugins\" is reserved".into()));
    }
    Ok(())
}

impl Part {
    pub fn new(name: impl Into<String>, spec: PartSpec, work_dir: &Path) -> Result<Self> {
        let name = name.into();
        validate_part_name(&name)?;
        let part_dir = work_dir.join("parts").join(&name);
        Ok(Self {
            part_src_dir: part_dir.join("src"),
            part_build_dir: part_dir.join("build"),
            part_install_dir: part_dir.join("install"),
            part_state_dir: part_dir.join("state"),
            part_dir,
            name,
            spec,
        })
    }

    pub fn plugin_name(&self) -> &str {
        self.spec.plugin.as_deref().unwrap_or(&self.name)
    }

    pub fn state_file(&self, step: crate::step::Step) -> PathBuf {
        self.part_state_dir.join(step.verb())
    }

    /// The subset of this part's properties relevant to dirtiness-checking
    /// `step`, per the per-step property table.
    pub fn property_snapshot(&self, step: crate::step::Step) -> indexmap::IndexMap<String, String> {
        use crate::step::Step;
        let mut snap = indexmap::IndexMap::new();
        let s = &self.spec;
        macro_rules! put {
            ($key:expr, $val:expr) => {
                snap.insert($key.to_string(), $val);
            };
        }
        match step {
            Step::Pull => {
                put!("override-pull", s.override_pull.clone().unwrap_or_default());
                put!("plugin", s.plugin.clone().unwrap_or_default());
                put!("source", s.source.clone().unwrap_or_default());
                put!("source-commit", s.source_commit.clone().unwrap_or_default());
                put!("source-depth", s.source_depth.map(|d| d.to_string()).unwrap_or_default());
                put!("source-tag", s.source_tag.clone().unwrap_or_default());
                put!("source-type", s.source_type.clone().unwrap_or_default());
                put!("source-branch", s.source_branch.clone().unwrap_or_default());
                put!("source-subdir", s.source_subdir.clone().unwrap_or_default());
                put!("stage-packages", s.stage_packages.join(","));
            }
            Step::Build => {
                put!("after", s.after.join(","));
                put!("build-packages", s.build_packages.join(","));
                put!("disable-parallel", s.disable_parallel.to_string());
                put!(
                    "organize",
                    s.organize.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
                );
                put!("override-build", s.override_build.clone().unwrap_or_default());
            }
            Step::Stage => {
                put!("override-stage", s.override_stage.clone().unwrap_or_default());
                let stage = if s.stage.is_empty() { vec!["*".to_string()] } else { s.stage.clone() };
                put!("stage", stage.join(","));
            }
            Step::Prime => {
                put!("override-prime", s.override_prime.clone().unwrap_or_default());
                let prime = if s.prime.is_empty() { vec!["*".to_string()] } else { s.prime.clone() };
                put!("prime", prime.join(","));
            }
        }
        snap
    }
}

/// Look up a part by name. Must use value equality, not identity: the
/// original implementation this engine is modeled on compared names with
/// `is`, which only works by accident on interned string literals.
pub fn part_by_name<'a>(name: &str, parts: &'a [Part]) -> Result<&'a Part> {
    parts.iter().find(|p| p.name == name).ok_or_else(|| Error::InvalidPartName(name.to_string()))
}

/// Sort parts so that every part appears before anything that depends on
/// it (via `after`), breaking ties deterministically by name.
///
/// This repeatedly pulls out a part that nothing remaining depends on, so
/// the result is a valid topological order; among several valid choices at
/// each step, sorting the working set by descending name first means the
/// lexicographically-first eligible part is always chosen, giving a
/// reproducible order across runs.
pub fn sort_parts(parts: &[Part]) -> Result<Vec<Part>> {
    let mut remaining: Vec<&Part> = parts.iter().collect();
    remaining.sort_by(|a, b| b.name.cmp(&a.name));

    let mut sorted: Vec<&Part> = Vec::with_capacity(parts.len());
    while !remaining.is_empty() {
        let pick = remaining
            .iter()
            .position(|part| !remaining.iter().any(|other| other.spec.after.contains(&part.name)))
            .ok_or(Error::PartDependencyCycle)?;
        sorted.insert(0, remaining.remove(pick));
    }
    Ok(sorted.into_iter().cloned().collect())
}

/// All parts named in `part_name`'s `after` list, optionally including
/// transitive dependencies.
pub fn part_dependencies<'a>(
    part_name: &str,
    parts: &'a [Part],
    recursive: bool,
) -> Result<HashSet<&'a Part>> {
    let part = part_by_name(part_name, parts)?;
    let mut deps: HashSet<&Part> = parts.iter().filter(|p| part.spec.after.contains(&p.name)).collect();

    if recursive {
        let direct_names: Vec<String> = part.spec.after.clone();
        for dep_name in direct_names {
            deps.extend(part_dependencies(&dep_name, parts, recursive)?);
        }
    }
    Ok(deps)
}

impl PartialEq for Part {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Part {}
impl std::hash::Hash for Part {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_parts(pairs: &[(&str, &[&str])]) -> Vec<Part> {
        let work_dir = PathBuf::from("/tmp/work");
        pairs
            .iter()
            .map(|(name, after)| {
                let mut spec = PartSpec::default_for_test();
                spec.after = after.iter().map(|s| s.to_string()).collect();
                Part::new(*name, spec, &work_dir).unwrap()
            })
            .collect()
    }

    impl PartSpec {
        fn default_for_test() -> Self {
            serde_yaml::from_str("plugin: nil").unwrap()
        }
    }

    #[test]
    fn sort_parts_respects_dependencies() {
        let parts = make_parts(&[("bar", &["foo"]), ("foo", &[]), ("foobar", &["bar"])]);
        let sorted = sort_parts(&parts).unwrap();
        let names: Vec<&str> = sorted.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "bar", "foobar"]);
    }

    #[test]
    fn sort_parts_detects_cycle() {
        let parts = make_parts(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(sort_parts(&parts), Err(Error::PartDependencyCycle)));
    }

    #[test]
    fn part_by_name_uses_value_equality() {
        let parts = make_parts(&[("foo", &[])]);
        let looked_up_name = String::from("foo");
        assert!(part_by_name(&looked_up_name, &parts).is_ok());
        assert!(part_by_name("missing", &parts).is_err());
    }

    #[test]
    fn part_dependencies_recursive() {
        let parts = make_parts(&[("bar", &["foo"]), ("foo", &[]), ("foobar", &["bar"])]);
        let deps = part_dependencies("foobar", &parts, true).unwrap();
        let names: HashSet<&str> = deps.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, HashSet::from(["bar", "foo"]));
    }
}
