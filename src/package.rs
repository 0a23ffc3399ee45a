//! Platform package management (stage-packages/stage-snaps resolution) is
//! out of scope (see Non-goals); this trait is the only thing the engine
//! depends on, so a concrete repository (apt, snap store, ...) can plug
//! in without the engine knowing about package formats.

use crate::error::Result;
use std::path::Path;

pub trait PackageRepository: Send + Sync {
    /// Fetch and unpack `packages` into `dest_dir`, returning the resolved
    /// version of each for recording in PULL state assets.
    fn fetch(&self, packages: &[String], dest_dir: &Path) -> Result<Vec<(String, String)>>;
}
