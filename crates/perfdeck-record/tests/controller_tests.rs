//! Recording controller lifecycle tests.
//!
//! These run against a stub perf binary (a small shell script) so they
//! exercise the real spawn / stream / exit paths without perf installed.

#![cfg(unix)]

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use perfdeck_record::RecordController;
use perfdeck_record::RecordEvent;
use perfdeck_record::RecordingRequest;
use tokio::sync::mpsc::UnboundedReceiver;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\n\
         out=\"\"\n\
         while [ $# -gt 0 ]; do\n\
         \x20 if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift 2; else shift; fi\n\
         done\n\
         {body}\n"
    );
    std::fs::write(&path, script).unwrap();
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn pid_request(output: &Path) -> RecordingRequest {
    RecordingRequest::processes(vec!["4242".into()], vec![], output, false)
}

async fn next_event(rx: &mut UnboundedReceiver<RecordEvent>) -> RecordEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a record event")
        .expect("event channel closed")
}

async fn assert_silent(rx: &mut UnboundedReceiver<RecordEvent>) {
    let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(extra.is_err(), "expected no further events, got {extra:?}");
}

#[tokio::test]
async fn test_missing_output_folder_fails_once_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("spawned");
    let stub = write_script(
        dir.path(),
        "fake-perf",
        &format!("touch {}\nexit 0", marker.display()),
    );
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary(&stub);

    controller.start(pid_request(Path::new("/no/such/folder/out.data")));

    match next_event(&mut rx).await {
        RecordEvent::Failed(message) => {
            assert_eq!(message, "Folder '/no/such/folder' does not exist.");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_silent(&mut rx).await;
    assert!(!marker.exists(), "no process may be spawned on bad output");
}

#[tokio::test]
async fn test_successful_run_emits_started_output_finished() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_script(
        dir.path(),
        "fake-perf",
        "echo recording started\nprintf 'PERFDATA' > \"$out\"\nexit 0",
    );
    let output = dir.path().join("out.data");
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary(&stub);

    controller.start(pid_request(&output));

    match next_event(&mut rx).await {
        RecordEvent::Started { binary, args } => {
            assert_eq!(binary, stub.to_string_lossy());
            assert_eq!(args[0], "record");
            assert_eq!(args[1], "-o");
        }
        other => panic!("expected Started first, got {other:?}"),
    }

    let mut saw_output = false;
    loop {
        match next_event(&mut rx).await {
            RecordEvent::Output(text) => saw_output |= text.contains("recording started"),
            RecordEvent::Finished(path) => {
                assert_eq!(path, output);
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_output, "process output must be forwarded");
    assert_eq!(std::fs::read(&output).unwrap(), b"PERFDATA");
}

#[tokio::test]
async fn test_nonzero_exit_without_output_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_script(dir.path(), "fake-perf", "exit 3");
    let output = dir.path().join("out.data");
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary(&stub);

    controller.start(pid_request(&output));

    loop {
        match next_event(&mut rx).await {
            RecordEvent::Failed(message) => {
                assert_eq!(message, "Failed to record perf data, error code 3.");
                break;
            }
            RecordEvent::Started { .. } | RecordEvent::Output(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_yields_one_terminal_event() {
    let dir = tempfile::tempdir().unwrap();
    // creates the output file up front, then waits to be terminated
    let stub = write_script(dir.path(), "fake-perf", ": > \"$out\"\nsleep 10");
    let output = dir.path().join("out.data");
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary(&stub);

    // stopping with no active process is a no-op
    controller.stop();

    controller.start(pid_request(&output));
    match next_event(&mut rx).await {
        RecordEvent::Started { .. } => {}
        other => panic!("expected Started, got {other:?}"),
    }

    // give the script a moment to create the output file
    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.stop();
    controller.stop();

    loop {
        match next_event(&mut rx).await {
            RecordEvent::Finished(path) => {
                assert_eq!(path, output);
                break;
            }
            RecordEvent::Output(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn test_superseding_start_drops_the_old_recording() {
    let dir = tempfile::tempdir().unwrap();
    let slow = write_script(dir.path(), "slow-perf", ": > \"$out\"\nsleep 10");
    let quick = write_script(
        dir.path(),
        "quick-perf",
        "printf 'PERFDATA' > \"$out\"\nexit 0",
    );
    let old_output = dir.path().join("old.data");
    let new_output = dir.path().join("new.data");
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary(&slow);

    controller.start(pid_request(&old_output));
    match next_event(&mut rx).await {
        RecordEvent::Started { .. } => {}
        other => panic!("expected Started, got {other:?}"),
    }

    let controller = controller.with_perf_binary(&quick);
    controller.start(pid_request(&new_output));

    // only the new recording's events may arrive from here on
    loop {
        match next_event(&mut rx).await {
            RecordEvent::Finished(path) => {
                assert_eq!(path, new_output, "old terminal event must not be delivered");
                break;
            }
            RecordEvent::Failed(message) => panic!("unexpected failure: {message}"),
            RecordEvent::Started { .. } | RecordEvent::Output(_) => {}
        }
    }
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn test_command_line_reports_active_process() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_script(dir.path(), "fake-perf", ": > \"$out\"\nsleep 10");
    let output = dir.path().join("out.data");
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary(&stub);

    assert_eq!(controller.command_line(), None);
    controller.start(pid_request(&output));
    match next_event(&mut rx).await {
        RecordEvent::Started { .. } => {}
        other => panic!("expected Started, got {other:?}"),
    }

    let command = controller.command_line().expect("recording is active");
    assert!(command.contains("record -o"));
    assert!(command.ends_with("--pid 4242"));

    controller.stop();
}

#[tokio::test]
async fn test_spawn_failure_reports_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.data");
    let (controller, mut rx) = RecordController::new();
    let controller = controller.with_perf_binary("/no/such/perf-binary");

    controller.start(pid_request(&output));

    match next_event(&mut rx).await {
        RecordEvent::Failed(message) => {
            assert!(message.contains("/no/such/perf-binary"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
#[should_panic(expected = "send_input called without an active recording process")]
async fn test_send_input_without_active_process_panics() {
    let (controller, _rx) = RecordController::new();
    controller.send_input(b"data\n").await;
}
