//! The build-system plugin contract, plus the two reference plugins
//! (`nil`, `dump`) needed to exercise a full pipeline without a real
//! toolchain.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};

pub trait Plugin: Send + Sync {
    /// Validate and extract this plugin's options from the part's open
    /// `extra` map. Most plugins have no options of their own.
    fn validate_properties(&self, _data: &IndexMap<String, serde_yaml::Value>) -> Result<()> {
        Ok(())
    }

    fn get_build_snaps(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn get_build_packages(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn get_build_environment(&self) -> IndexMap<String, String> {
        IndexMap::new()
    }

    fn get_build_commands(&self) -> Vec<String> {
        Vec::new()
    }

    fn out_of_source_build(&self) -> bool {
        false
    }
}

/// Runs only `override-*` scriptlets; has no default build commands of
/// its own. Useful for parts whose entire behavior is a custom scriptlet.
pub struct NilPlugin;

impl Plugin for NilPlugin {}

/// Copies `part/src` verbatim into `part/install`, for parts that are
/// just pre-built trees dropped into the pipeline.
pub struct DumpPlugin;

impl Plugin for DumpPlugin {
    fn get_build_commands(&self) -> Vec<String> {
        vec!["cp -a . \"$CRAFT_PART_INSTALL\"/".to_string()]
    }

    fn out_of_source_build(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register("nil", Box::new(NilPlugin));
        registry.register("dump", Box::new(DumpPlugin));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Box<dyn Plugin>) {
        self.plugins.insert(name.into(), plugin);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Plugin> {
        self.plugins.get(name).map(|p| p.as_ref()).ok_or_else(|| Error::InvalidPlugin(name.to_string()))
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
    }
}
