//! The privilege-elevation handshake.
//!
//! Recording kernel-level events needs elevated privileges the front-end
//! itself does not hold. A separately-authorized helper launches the
//! `elevate_perf_privileges.sh` bootstrap script as root; the script relaxes
//! the relevant sysctls, prints a sentinel line into an output-capture file,
//! and keeps running in the background while the actual recording happens
//! unprivileged.
//!
//! I/O redirection across the privilege boundary is not available, so the
//! script's output is captured through a temporary file polled on a fixed
//! interval. The handshake is the state machine around that polling:
//!
//! `Idle -> Launching -> Polling -> { ChainedRecording | Failed }`

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::warn;

use crate::controller::RecordEvent;
use crate::controller::Shared;
use crate::controller::terminate;
use crate::error::RecordError;
use crate::request::RecordingRequest;

/// Polkit action id under which the helper launch is authorized.
pub const ELEVATE_ACTION_ID: &str = "dev.perfdeck.elevate";
/// Name of the bootstrap script the helper runs as root.
pub const ELEVATE_SCRIPT_NAME: &str = "elevate_perf_privileges.sh";

/// Everything the script prints before this line is progress chatter; the
/// line itself means the privileged side is up.
const PRIVILEGES_SENTINEL: &str = "\nprivileges elevated!\n";
const ERROR_MARKER: &str = "Error:";

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Once the bootstrap has had this long to settle, its own teardown must no
/// longer be reported as an elevation failure.
const HELPER_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Launching,
    Polling,
    ChainedRecording,
    Failed,
}

/// Progress signals from the separately-privileged helper launch.
#[derive(Debug)]
pub enum HelperSignal {
    /// The elevated bootstrap process could not be started.
    SpawnFailed(String),
    /// The elevated bootstrap process is running.
    Started,
    /// The bootstrap process ended.
    Exited { success: bool },
}

pub struct HelperJob {
    pub signals: mpsc::UnboundedReceiver<HelperSignal>,
    pub pid: Option<u32>,
}

/// The privilege boundary. The default implementation goes through polkit;
/// the trait seam keeps the handshake logic testable without it.
pub trait AuthHelper: Send + Sync {
    /// Launches the bootstrap script under elevated privileges, passing the
    /// script path and the output-capture file path as its only inputs.
    fn launch(&self, script: &Path, output: &Path) -> HelperJob;
}

/// Launches the bootstrap script through `pkexec`, authorized as
/// [`ELEVATE_ACTION_ID`] by the installed policy file.
pub struct PkexecHelper;

impl AuthHelper for PkexecHelper {
    fn launch(&self, script: &Path, output: &Path) -> HelperJob {
        let (tx, signals) = mpsc::unbounded_channel();
        let mut command = Command::new("pkexec");
        command
            .arg(script)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match command.spawn() {
            Err(err) => {
                let _ = tx.send(HelperSignal::SpawnFailed(err.to_string()));
                HelperJob { signals, pid: None }
            }
            Ok(mut child) => {
                let pid = child.id();
                let _ = tx.send(HelperSignal::Started);
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) => {
                            let _ = tx.send(HelperSignal::Exited {
                                success: status.success(),
                            });
                        }
                        Err(err) => {
                            let _ = tx.send(HelperSignal::SpawnFailed(err.to_string()));
                        }
                    }
                });
                HelperJob { signals, pid }
            }
        }
    }
}

/// One handshake attempt. Owns the temp output file and the driver task;
/// dropped on success, failure, or a superseding request.
pub(crate) struct ElevationSession {
    _output_file: NamedTempFile,
    driver: AbortHandle,
}

impl ElevationSession {
    pub(crate) fn cancel(self) {
        // abort before the file handle drops, so no periodic callback is
        // left reading an unlinked path
        self.driver.abort();
    }
}

pub(crate) fn start_handshake(shared: &Arc<Shared>, generation: u64, request: RecordingRequest) {
    let script = shared.elevate_script().or_else(find_elevate_script);
    let Some(script) = script else {
        shared.emit_failure(generation, RecordError::ScriptMissing);
        return;
    };
    debug!(script = %script.display(), "elevation handshake: Idle -> Launching");

    let output_file = match NamedTempFile::new() {
        Ok(file) => file,
        Err(err) => {
            warn!("failed to create elevation output capture file: {err}");
            shared.emit_failure(generation, RecordError::ElevationFailed);
            return;
        }
    };
    let output_path = output_file.path().to_path_buf();
    let job = shared.auth_helper().launch(&script, &output_path);
    let driver = tokio::spawn(drive(shared.clone(), generation, request, output_path, job));
    shared.install_handshake(
        generation,
        ElevationSession {
            _output_file: output_file,
            driver: driver.abort_handle(),
        },
    );
}

/// Locates the bootstrap script: the libexec directory next to the running
/// binary first, then the search path.
fn find_elevate_script() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(prefix) = exe.parent().and_then(Path::parent) {
            let candidate = prefix.join("libexec").join(ELEVATE_SCRIPT_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    which::which(ELEVATE_SCRIPT_NAME).ok()
}

async fn drive(
    shared: Arc<Shared>,
    generation: u64,
    request: RecordingRequest,
    output_path: PathBuf,
    mut job: HelperJob,
) {
    let mut state = HandshakeState::Launching;
    let mut helper_watched = true;
    let settle = tokio::time::sleep(HELPER_SETTLE_TIMEOUT);
    tokio::pin!(settle);
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut captured = String::new();
    let mut read_offset = 0usize;

    loop {
        tokio::select! {
            signal = job.signals.recv(), if helper_watched => match signal {
                Some(HelperSignal::Started) => {
                    if state == HandshakeState::Launching {
                        advance(&mut state, HandshakeState::Polling);
                    }
                }
                Some(HelperSignal::SpawnFailed(reason)) => {
                    warn!("elevation helper failed: {reason}");
                    advance(&mut state, HandshakeState::Failed);
                    finish_failed(&shared, generation, RecordError::ElevationFailed);
                    return;
                }
                Some(HelperSignal::Exited { success: false }) => {
                    advance(&mut state, HandshakeState::Failed);
                    finish_failed(&shared, generation, RecordError::ElevationFailed);
                    return;
                }
                Some(HelperSignal::Exited { success: true }) | None => {
                    helper_watched = false;
                }
            },
            _ = &mut settle, if helper_watched => {
                // the bootstrap stays running in the background; from here on
                // its termination is its own business, not a failure
                helper_watched = false;
                if let Some(pid) = job.pid {
                    terminate(pid);
                }
            }
            _ = poll.tick(), if state == HandshakeState::Polling => {
                let new_text = read_appended(&output_path, &mut read_offset).await;
                if new_text.is_empty() {
                    continue;
                }
                captured.push_str(&new_text);
                if captured.contains(PRIVILEGES_SENTINEL) {
                    shared.emit_if_current(generation, RecordEvent::Output(new_text));
                    shared.emit_if_current(generation, RecordEvent::Output("\n".into()));
                    advance(&mut state, HandshakeState::ChainedRecording);
                    shared.clear_handshake(generation);
                    if shared.generation_is_current(generation) {
                        Shared::start_recording(&shared, generation, request.without_elevation());
                    }
                    return;
                } else if captured.contains(ERROR_MARKER) {
                    advance(&mut state, HandshakeState::Failed);
                    finish_failed(&shared, generation, RecordError::ElevationOutput(captured.clone()));
                    return;
                } else {
                    shared.emit_if_current(generation, RecordEvent::Output(new_text));
                }
            }
            else => {
                // helper gone without a terminal signal and polling never
                // started; nothing left to wake us up
                debug!("elevation handshake stalled before polling began");
                shared.clear_handshake(generation);
                return;
            }
        }
    }
}

fn advance(state: &mut HandshakeState, next: HandshakeState) {
    debug!("elevation handshake: {state:?} -> {next:?}");
    *state = next;
}

fn finish_failed(shared: &Arc<Shared>, generation: u64, error: RecordError) {
    shared.clear_handshake(generation);
    shared.emit_failure(generation, error);
}

/// Reads whatever the bootstrap appended since the last poll.
async fn read_appended(path: &Path, offset: &mut usize) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            if bytes.len() <= *offset {
                return String::new();
            }
            let new = String::from_utf8_lossy(&bytes[*offset..]).into_owned();
            *offset = bytes.len();
            new
        }
        Err(_) => String::new(),
    }
}
