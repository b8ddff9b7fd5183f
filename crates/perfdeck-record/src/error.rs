//! Recording errors surfaced to the front-end.
//!
//! Every variant renders to the user-facing message carried by the terminal
//! `RecordEvent::Failed` event. None of these are retried automatically;
//! the caller decides whether to issue another `start`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Folder '{}' does not exist.", .0.display())]
    FolderMissing(PathBuf),
    #[error("'{}' is not a folder.", .0.display())]
    NotADirectory(PathBuf),
    #[error("Folder '{}' is not writable.", .0.display())]
    NotWritable(PathBuf),
    #[error("Process does not exist.")]
    EmptyPidSet,
    #[error("File '{}' does not exist.", .0.display())]
    ExeMissing(PathBuf),
    #[error("'{}' is not a file.", .0.display())]
    ExeNotAFile(PathBuf),
    #[error("File '{}' is not executable.", .0.display())]
    ExeNotExecutable(PathBuf),
    #[error("Failed to start '{binary}': {reason}")]
    Spawn { binary: String, reason: String },
    #[error("Failed to record perf data, error code {0}.")]
    ExitCode(i32),
    #[error("Failed to find `elevate_perf_privileges.sh` script.")]
    ScriptMissing,
    #[error("Failed to elevate privileges.")]
    ElevationFailed,
    #[error("Failed to elevate privileges: {0}")]
    ElevationOutput(String),
}
