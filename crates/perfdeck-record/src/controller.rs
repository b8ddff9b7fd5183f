//! The recording controller.
//!
//! Owns at most one live `perf record` process, assembles its command line
//! from a [`RecordingRequest`], merges the process's stdout and stderr into
//! a single stream of [`RecordEvent`]s, and enforces the stop / supersede /
//! teardown policy. When a request asks for elevated privileges the
//! controller first runs the elevation handshake (see [`crate::elevate`])
//! and chains into the plain start once privileges are up.

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::elevate;
use crate::elevate::AuthHelper;
use crate::elevate::ElevationSession;
use crate::elevate::PkexecHelper;
use crate::error::RecordError;
use crate::request::RecordingRequest;
use crate::sync::mutex_lock_or_recover;

/// How long `Drop` waits for the process to honour the terminate request.
const STOP_WAIT_ON_DROP: Duration = Duration::from_millis(100);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);
const READ_CHUNK_SIZE: usize = 8192;

/// Structured outcome of a recording run, delivered on the controller's
/// event channel in order: one `Started`, any number of `Output`s, then
/// exactly one `Finished` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    Started { binary: String, args: Vec<String> },
    Output(String),
    Finished(PathBuf),
    Failed(String),
}

pub struct RecordController {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<RecordEvent>,
}

struct Inner {
    perf_binary: PathBuf,
    elevate_script: Option<PathBuf>,
    auth_helper: Arc<dyn AuthHelper>,
    /// Bumped on every `start`; tasks belonging to an older generation may
    /// no longer deliver events or chain recordings.
    generation: u64,
    active: Option<ActiveRecording>,
    handshake: Option<ElevationSession>,
}

struct ActiveRecording {
    child: Arc<Mutex<Child>>,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    command: Vec<String>,
    user_terminated: Arc<AtomicBool>,
    tasks: Vec<AbortHandle>,
}

impl RecordController {
    /// Creates a controller and the receiving end of its event channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecordEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                perf_binary: PathBuf::from("perf"),
                elevate_script: None,
                auth_helper: Arc::new(PkexecHelper),
                generation: 0,
                active: None,
                handshake: None,
            }),
            events,
        });
        (Self { shared }, receiver)
    }

    /// Overrides the perf binary, e.g. a cross-toolchain perf from a profile.
    pub fn with_perf_binary(self, binary: impl Into<PathBuf>) -> Self {
        mutex_lock_or_recover(&self.shared.inner).perf_binary = binary.into();
        self
    }

    /// Overrides the bootstrap script location instead of searching for it.
    pub fn with_elevate_script(self, script: impl Into<PathBuf>) -> Self {
        mutex_lock_or_recover(&self.shared.inner).elevate_script = Some(script.into());
        self
    }

    /// Overrides the privilege-elevation helper mechanism.
    pub fn with_auth_helper(self, helper: Arc<dyn AuthHelper>) -> Self {
        mutex_lock_or_recover(&self.shared.inner).auth_helper = helper;
        self
    }

    /// Starts a recording. Non-blocking; must be called on a tokio runtime.
    ///
    /// All outcomes, including validation failures, arrive as events. A
    /// second `start` while a recording or handshake is in flight supersedes
    /// it: the old process is force-killed and its remaining events dropped.
    pub fn start(&self, request: RecordingRequest) {
        let generation = {
            let mut inner = mutex_lock_or_recover(&self.shared.inner);
            inner.supersede();
            inner.generation += 1;
            inner.generation
        };
        if request.elevate {
            elevate::start_handshake(&self.shared, generation, request);
        } else {
            Shared::start_recording(&self.shared, generation, request);
        }
    }

    /// Requests a graceful stop of the live process.
    ///
    /// Marks the next termination as user-requested and sends SIGTERM; no
    /// forced kill. Idempotent, and safe to call with no active process.
    pub fn stop(&self) {
        let inner = mutex_lock_or_recover(&self.shared.inner);
        let Some(active) = inner.active.as_ref() else {
            return;
        };
        active.user_terminated.store(true, Ordering::SeqCst);
        if let Some(pid) = active.pid {
            terminate(pid);
        }
    }

    /// Writes to the live process's stdin.
    ///
    /// # Panics
    ///
    /// Calling this without an active recording process is a programming
    /// error, not a recoverable condition.
    pub async fn send_input(&self, bytes: &[u8]) {
        let (generation, mut stdin) = {
            let mut inner = mutex_lock_or_recover(&self.shared.inner);
            let generation = inner.generation;
            let active = inner
                .active
                .as_mut()
                .expect("send_input called without an active recording process");
            let stdin = active
                .stdin
                .take()
                .expect("send_input called without an active recording process");
            (generation, stdin)
        };
        if let Err(err) = stdin.write_all(bytes).await {
            warn!("failed to write to recording process: {err}");
        } else if let Err(err) = stdin.flush().await {
            warn!("failed to flush recording process input: {err}");
        }
        let mut inner = mutex_lock_or_recover(&self.shared.inner);
        if inner.generation == generation {
            if let Some(active) = inner.active.as_mut() {
                active.stdin = Some(stdin);
            }
        }
        // superseded while writing: dropping the handle closes the old pipe
    }

    /// The full command line of the active process, for display.
    pub fn command_line(&self) -> Option<String> {
        let inner = mutex_lock_or_recover(&self.shared.inner);
        inner.active.as_ref().map(|active| {
            let mut tokens = vec![inner.perf_binary.to_string_lossy().into_owned()];
            tokens.extend(active.command.iter().cloned());
            tokens.join(" ")
        })
    }

    pub fn is_recording(&self) -> bool {
        mutex_lock_or_recover(&self.shared.inner).active.is_some()
    }
}

impl Drop for RecordController {
    fn drop(&mut self) {
        let (active, handshake) = {
            let mut inner = mutex_lock_or_recover(&self.shared.inner);
            (inner.active.take(), inner.handshake.take())
        };
        if let Some(session) = handshake {
            session.cancel();
        }
        let Some(active) = active else {
            return;
        };
        active.user_terminated.store(true, Ordering::SeqCst);
        if let Some(pid) = active.pid {
            terminate(pid);
        }
        let deadline = Instant::now() + STOP_WAIT_ON_DROP;
        loop {
            {
                let mut child = mutex_lock_or_recover(&active.child);
                match child.try_wait() {
                    Ok(Some(_)) | Err(_) => break,
                    Ok(None) => {}
                }
            }
            if Instant::now() >= deadline {
                // the OS process may outlive us; that is accepted
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        for task in active.tasks {
            task.abort();
        }
    }
}

impl Inner {
    /// Tears down whatever the previous `start` left running. The old
    /// process is killed without a grace period and its events dropped.
    fn supersede(&mut self) {
        if let Some(active) = self.active.take() {
            for task in &active.tasks {
                task.abort();
            }
            if let Err(err) = mutex_lock_or_recover(&active.child).start_kill() {
                debug!("superseded recording process already gone: {err}");
            }
        }
        if let Some(session) = self.handshake.take() {
            session.cancel();
        }
    }
}

impl Shared {
    pub(crate) fn emit(&self, event: RecordEvent) {
        let _ = self.events.send(event);
    }

    /// Emits only when `generation` is still the live one, so superseded
    /// tasks cannot leak stale events.
    pub(crate) fn emit_if_current(&self, generation: u64, event: RecordEvent) {
        if mutex_lock_or_recover(&self.inner).generation == generation {
            self.emit(event);
        }
    }

    pub(crate) fn emit_failure(&self, generation: u64, error: RecordError) {
        self.emit_if_current(generation, RecordEvent::Failed(error.to_string()));
    }

    pub(crate) fn elevate_script(&self) -> Option<PathBuf> {
        mutex_lock_or_recover(&self.inner).elevate_script.clone()
    }

    pub(crate) fn auth_helper(&self) -> Arc<dyn AuthHelper> {
        mutex_lock_or_recover(&self.inner).auth_helper.clone()
    }

    pub(crate) fn generation_is_current(&self, generation: u64) -> bool {
        mutex_lock_or_recover(&self.inner).generation == generation
    }

    pub(crate) fn install_handshake(&self, generation: u64, session: ElevationSession) {
        let mut inner = mutex_lock_or_recover(&self.inner);
        if inner.generation == generation {
            inner.handshake = Some(session);
        } else {
            session.cancel();
        }
    }

    pub(crate) fn clear_handshake(&self, generation: u64) {
        let mut inner = mutex_lock_or_recover(&self.inner);
        if inner.generation == generation {
            // dropping the session unlinks its temp output file
            inner.handshake = None;
        }
    }

    /// Validates the request and spawns the perf process. Every failure is
    /// reported as a single terminal `Failed` event; nothing is spawned on
    /// a validation error.
    pub(crate) fn start_recording(self: &Arc<Self>, generation: u64, request: RecordingRequest) {
        let args = match request.command_args() {
            Ok(args) => args,
            Err(err) => return self.emit_failure(generation, err),
        };
        if let Err(err) = validate_output_folder(&request.output_path) {
            return self.emit_failure(generation, err);
        }

        let binary = mutex_lock_or_recover(&self.inner).perf_binary.clone();
        let mut command = Command::new(&binary);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = request.working_directory() {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return self.emit_failure(
                    generation,
                    RecordError::Spawn {
                        binary: binary.to_string_lossy().into_owned(),
                        reason: err.to_string(),
                    },
                );
            }
        };

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let user_terminated = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(child));

        // stdout and stderr feed the same event stream
        let mut readers = Vec::new();
        if let Some(stream) = stdout {
            readers.push(tokio::spawn(forward_output(self.clone(), generation, stream)));
        }
        if let Some(stream) = stderr {
            readers.push(tokio::spawn(forward_output(self.clone(), generation, stream)));
        }
        let mut tasks: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();
        let watcher = tokio::spawn(watch_exit(
            self.clone(),
            generation,
            child.clone(),
            request.output_path.clone(),
            user_terminated.clone(),
            readers,
        ));
        tasks.push(watcher.abort_handle());

        let mut inner = mutex_lock_or_recover(&self.inner);
        if inner.generation != generation {
            for task in &tasks {
                task.abort();
            }
            let _ = mutex_lock_or_recover(&child).start_kill();
            return;
        }
        inner.active = Some(ActiveRecording {
            child,
            pid,
            stdin,
            command: args.clone(),
            user_terminated,
            tasks,
        });
        drop(inner);

        debug!(binary = %binary.display(), ?args, "recording process started");
        self.emit(RecordEvent::Started {
            binary: binary.to_string_lossy().into_owned(),
            args,
        });
    }
}

async fn forward_output<R>(shared: Arc<Shared>, generation: u64, mut stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if !shared.generation_is_current(generation) {
                    break;
                }
                shared.emit(RecordEvent::Output(text));
            }
        }
    }
}

async fn watch_exit(
    shared: Arc<Shared>,
    generation: u64,
    child: Arc<Mutex<Child>>,
    output_path: PathBuf,
    user_terminated: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
) {
    // lock order is state lock before child lock everywhere; the child
    // guard never outlives this block
    let waited = loop {
        let waited = {
            let mut child = mutex_lock_or_recover(&child);
            child.try_wait()
        };
        match waited {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(err) => break Err(err),
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    };
    let status = match waited {
        Ok(status) => status,
        Err(err) => {
            let mut inner = mutex_lock_or_recover(&shared.inner);
            if inner.generation != generation {
                return;
            }
            inner.active = None;
            drop(inner);
            shared.emit(RecordEvent::Failed(err.to_string()));
            return;
        }
    };

    // let the readers drain buffered output before the terminal event
    for reader in readers {
        let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
    }

    let outcome = exit_outcome(&status, &output_path, user_terminated.load(Ordering::SeqCst));
    {
        let mut inner = mutex_lock_or_recover(&shared.inner);
        if inner.generation != generation {
            return;
        }
        inner.active = None;
    }
    match outcome {
        Ok(()) => shared.emit(RecordEvent::Finished(output_path)),
        Err(err) => shared.emit(RecordEvent::Failed(err.to_string())),
    }
}

/// The success policy: the output file must exist, and the run counts as
/// successful on a clean exit, on a user-requested SIGTERM, or whenever the
/// file ended up non-empty regardless of the exit code.
fn exit_outcome(
    status: &ExitStatus,
    output_path: &Path,
    user_terminated: bool,
) -> Result<(), RecordError> {
    let metadata = std::fs::metadata(output_path).ok();
    let exists = metadata.is_some();
    let non_empty = metadata.map(|m| m.len() > 0).unwrap_or(false);
    let clean_exit = status.code() == Some(0);
    let stopped_by_user = user_terminated && terminated_by_sigterm(status);
    if exists && (clean_exit || stopped_by_user || non_empty) {
        Ok(())
    } else {
        Err(RecordError::ExitCode(exit_code(status)))
    }
}

fn validate_output_folder(output_path: &Path) -> Result<(), RecordError> {
    let folder = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let metadata = match std::fs::metadata(&folder) {
        Ok(metadata) => metadata,
        Err(_) => return Err(RecordError::FolderMissing(folder)),
    };
    if !metadata.is_dir() {
        return Err(RecordError::NotADirectory(folder));
    }
    if !folder_is_writable(&folder) {
        return Err(RecordError::NotWritable(folder));
    }
    Ok(())
}

#[cfg(unix)]
fn folder_is_writable(folder: &Path) -> bool {
    // access(2) honours the effective uid, unlike a plain mode-bit check
    use std::os::unix::ffi::OsStrExt;
    let Ok(path) = std::ffi::CString::new(folder.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn folder_is_writable(folder: &Path) -> bool {
    !std::fs::metadata(folder)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true)
}

#[cfg(unix)]
fn terminated_by_sigterm(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGTERM)
}

#[cfg(not(unix))]
fn terminated_by_sigterm(_status: &ExitStatus) -> bool {
    false
}

#[cfg(unix)]
fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal()).unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Sends a graceful terminate to `pid`. Used for user-requested stops and
/// for settling the elevation helper.
#[cfg(unix)]
pub(crate) fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate(_pid: u32) {}
