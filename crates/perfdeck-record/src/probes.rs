//! Capability probes for the installed perf binary.
//!
//! These are best-effort string matches against another program's
//! human-readable output; a changed format means "not supported", never an
//! error. Probe subprocess output is cached for the process lifetime, so
//! the blocking ~1s waits happen once, at startup.

use std::io::Read;
use std::path::Path;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use once_cell::sync::Lazy;
use tracing::warn;

const TRACING_DIR: &str = "/sys/kernel/debug/tracing";
const PARANOID_FILE: &str = "/proc/sys/kernel/perf_event_paranoid";
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

static RECORD_HELP: Lazy<Vec<u8>> = Lazy::new(|| {
    let help = perf_output(&["record", "--help"]);
    if help.is_empty() {
        // no man page installed, assume the best
        return b"--sample-cpu --switch-events".to_vec();
    }
    help
});

static BUILD_OPTIONS: Lazy<Vec<u8>> = Lazy::new(|| perf_output(&["version", "--build-options"]));

/// Whether the kernel tracing directory is usable: `path` below the tracing
/// root is a readable directory and the paranoia setting is fully relaxed.
pub fn can_trace(path: &str) -> bool {
    let dir = Path::new(TRACING_DIR).join(path);
    if !dir.is_dir() || std::fs::read_dir(&dir).is_err() {
        return false;
    }
    match std::fs::read_to_string(PARANOID_FILE) {
        Ok(contents) => contents.trim() == "-1",
        Err(_) => false,
    }
}

pub fn can_profile_off_cpu() -> bool {
    can_trace("events/sched/sched_switch")
}

/// The extra record options off-CPU profiling needs.
pub fn off_cpu_profiling_options() -> Vec<String> {
    vec![
        "--switch-events".into(),
        "--event".into(),
        "sched:sched_switch".into(),
    ]
}

pub fn can_sample_cpu() -> bool {
    help_mentions(&RECORD_HELP, "--sample-cpu")
}

pub fn can_switch_events() -> bool {
    help_mentions(&RECORD_HELP, "--switch-events")
}

pub fn can_use_aio() -> bool {
    build_option_enabled(&BUILD_OPTIONS, "aio")
}

pub fn can_compress() -> bool {
    build_option_enabled(&BUILD_OPTIONS, "zstd")
}

pub fn is_perf_installed() -> bool {
    which::which("perf").is_ok()
}

fn help_mentions(help: &[u8], flag: &str) -> bool {
    contains(help, flag.as_bytes())
}

/// Matches the `name: [ on  ]` marker in `perf version --build-options`.
fn build_option_enabled(build_options: &[u8], name: &str) -> bool {
    let marker = format!("{name}: [ on  ]");
    contains(build_options, marker.as_bytes())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Runs `perf` with the given arguments and returns whatever it printed to
/// stdout, killing it after [`PROBE_TIMEOUT`]. Failures are logged and
/// yield the output captured so far.
fn perf_output(args: &[&str]) -> Vec<u8> {
    let mut child = match Command::new("perf")
        .args(args)
        .env("LANG", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!("failed to run perf {args:?}: {err}");
            return Vec::new();
        }
    };

    let deadline = Instant::now() + PROBE_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(err) => {
                warn!("failed to wait for perf {args:?}: {err}");
                let _ = child.kill();
                break None;
            }
        }
    };
    match status {
        Some(status) if status.success() => {}
        Some(status) => warn!("perf {args:?} exited with {status}"),
        None => warn!("perf {args:?} did not finish within {PROBE_TIMEOUT:?}"),
    }

    let mut output = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = stdout.read_to_end(&mut output);
    }
    output
}
