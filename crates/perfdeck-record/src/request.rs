//! Recording requests and perf command-line assembly.
//!
//! A [`RecordingRequest`] is an immutable description of one recording run.
//! The target-selection enum makes "exactly one of pid set, launched
//! executable, or system-wide" structural rather than a runtime invariant.

use std::path::Path;
use std::path::PathBuf;

use crate::error::RecordError;

/// What the recording attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    /// Attach to already-running processes by pid.
    Processes(Vec<String>),
    /// Launch an executable under perf.
    Launch {
        exe: PathBuf,
        args: Vec<String>,
        working_directory: Option<PathBuf>,
    },
    /// Record all CPUs system-wide.
    SystemWide,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRequest {
    pub perf_options: Vec<String>,
    pub output_path: PathBuf,
    pub elevate: bool,
    pub target: RecordTarget,
}

impl RecordingRequest {
    pub fn processes(
        pids: Vec<String>,
        perf_options: Vec<String>,
        output_path: impl Into<PathBuf>,
        elevate: bool,
    ) -> Self {
        Self {
            perf_options,
            output_path: output_path.into(),
            elevate,
            target: RecordTarget::Processes(pids),
        }
    }

    pub fn launch(
        exe: impl Into<PathBuf>,
        args: Vec<String>,
        working_directory: Option<PathBuf>,
        perf_options: Vec<String>,
        output_path: impl Into<PathBuf>,
        elevate: bool,
    ) -> Self {
        Self {
            perf_options,
            output_path: output_path.into(),
            elevate,
            target: RecordTarget::Launch {
                exe: exe.into(),
                args,
                working_directory,
            },
        }
    }

    /// System-wide recording always needs elevated privileges.
    pub fn system_wide(perf_options: Vec<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            perf_options,
            output_path: output_path.into(),
            elevate: true,
            target: RecordTarget::SystemWide,
        }
    }

    /// The same request with the elevation flag cleared, for the chained
    /// start after a successful elevation handshake.
    pub(crate) fn without_elevation(mut self) -> Self {
        self.elevate = false;
        self
    }

    pub(crate) fn working_directory(&self) -> Option<&Path> {
        match &self.target {
            RecordTarget::Launch {
                working_directory, ..
            } => working_directory.as_deref(),
            _ => None,
        }
    }

    /// Target-selection tokens, appended after the user-supplied options.
    ///
    /// Validates the target: an empty pid set and a missing, non-file or
    /// non-executable launch target are rejected here, before anything is
    /// spawned.
    pub(crate) fn target_args(&self) -> Result<Vec<String>, RecordError> {
        match &self.target {
            RecordTarget::Processes(pids) => {
                if pids.is_empty() {
                    return Err(RecordError::EmptyPidSet);
                }
                Ok(vec!["--pid".into(), pids.join(",")])
            }
            RecordTarget::Launch { exe, args, .. } => {
                let exe = resolve_executable(exe)?;
                let mut tokens = vec![exe.to_string_lossy().into_owned()];
                tokens.extend(args.iter().cloned());
                Ok(tokens)
            }
            RecordTarget::SystemWide => Ok(vec!["--all-cpus".into()]),
        }
    }

    /// The full argument list for the perf binary: `record -o <output>`,
    /// then the caller's options, then the target tokens last.
    pub(crate) fn command_args(&self) -> Result<Vec<String>, RecordError> {
        let mut args = vec![
            "record".to_string(),
            "-o".to_string(),
            self.output_path.to_string_lossy().into_owned(),
        ];
        args.extend(self.perf_options.iter().cloned());
        args.extend(self.target_args()?);
        Ok(args)
    }
}

/// Resolves a launch target, falling back to a `PATH` lookup when the given
/// path does not exist as written.
fn resolve_executable(exe: &Path) -> Result<PathBuf, RecordError> {
    let resolved = if exe.exists() {
        exe.to_path_buf()
    } else {
        which::which(exe).map_err(|_| RecordError::ExeMissing(exe.to_path_buf()))?
    };
    let metadata =
        std::fs::metadata(&resolved).map_err(|_| RecordError::ExeMissing(exe.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(RecordError::ExeNotAFile(resolved));
    }
    if !is_executable(&metadata) {
        return Err(RecordError::ExeNotExecutable(resolved));
    }
    // perf gets the absolute path so the launched row in the UI is unambiguous
    match resolved.canonicalize() {
        Ok(absolute) => Ok(absolute),
        Err(_) => Ok(resolved),
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}
