//! Error taxonomy for the lifecycle engine.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias over
//! [`Error`]. The CLI front end (`src/cli.rs`) maps error categories back onto
//! the process exit codes described by the external interface.

use crate::step::Step;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid parts specification: {0}")]
    SchemaValidation(String),

    #[error("unsupported target architecture: {0}")]
    InvalidArchitecture(String),

    #[error("dependency cycle detected among parts")]
    PartDependencyCycle,

    #[error("no such part: {0}")]
    InvalidPartName(String),

    #[error("plugin {0:?} is not registered")]
    InvalidPlugin(String),

    #[error("failed to build part {part}: build script exited with status {status}\n{stderr}")]
    PluginBuildError {
        part: String,
        status: String,
        stderr: String,
    },

    #[error("scriptlet {name:?} for part {part} exited with status {code:?}")]
    ScriptletRunError {
        part: String,
        name: String,
        code: Option<i32>,
    },

    #[error("scriptlet called unknown control API function {0:?}")]
    InvalidControlAPICall(String),

    #[error("{kind:?} is not a valid action for step {step:?}")]
    InvalidAction { step: Step, kind: crate::step::ActionKind },

    #[error(
        "part {part} conflicts with previously staged part {other_part}: {}",
        conflict_files.join(", ")
    )]
    PartConflictError {
        part: String,
        other_part: String,
        conflict_files: Vec<String>,
    },

    #[error("file {0} already exists in the destination tree")]
    StageFilesConflictError(PathBuf),

    #[error("part {part}: {message}")]
    FileOrganizeError { part: String, message: String },

    #[error("fileset {name:?}: {message}")]
    FilesetError { name: String, message: String },

    #[error("source for part {0} not found")]
    SourceNotFound(String),

    #[error("invalid source option for part {part}: {message}")]
    InvalidSourceOption { part: String, message: String },

    #[error("failed to pull source for part {part}: {message}")]
    PullError { part: String, message: String },

    #[error("checksum mismatch for part {part}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        part: String,
        expected: String,
        actual: String,
    },

    #[error("network error while pulling part {part}: {message}")]
    NetworkError { part: String, message: String },

    #[error("failed to fetch package {package} for part {part}: {message}")]
    PackageFetchError {
        part: String,
        package: String,
        message: String,
    },

    #[error("package {0} not found")]
    PackageNotFound(String),

    #[error("failed to unpack {archive}: {message}")]
    UnpackError { archive: PathBuf, message: String },

    #[error("callback already registered for step {0:?}")]
    CallbackRegistration(Step),

    #[error("internal invariant violated: {0}")]
    InternalError(String),
}
