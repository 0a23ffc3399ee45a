//! Executes planned `Action`s against a single part: runs the plugin or
//! override scriptlet, migrates files between pipeline stages, and
//! records the resulting state.

pub mod collisions;
pub mod environment;
pub mod migration;
pub mod organize;
pub mod part_handler;
pub mod scriptlet;

pub use part_handler::PartHandler;
