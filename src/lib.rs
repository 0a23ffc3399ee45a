//! A reusable parts lifecycle engine: drives a declarative set of software
//! parts through PULL → BUILD → STAGE → PRIME, incrementally and in
//! dependency order, persisting per-step state so only what's necessary
//! re-runs.
//!
//! The three subsystems that carry the hard engineering are [`sequencer`]
//! (action planning), [`state`] (persisted per-(part,step) records and
//! dirty/outdated detection), and [`executor`] (per-part step execution,
//! file migration, and collision detection). Everything else — source
//! fetching, package management, concrete build plugins — is an
//! abstract trait boundary a caller plugs concrete implementations into.

pub mod callbacks;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fileset;
pub mod package;
pub mod parts;
pub mod plugin;
pub mod project;
pub mod sequencer;
pub mod source;
pub mod state;
pub mod step;

pub use engine::Engine;
pub use error::{Error, Result};
pub use step::{Action, ActionKind, Step};
