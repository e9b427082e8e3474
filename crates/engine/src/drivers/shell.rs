//! Shell driver: blocking subprocess execution with output capture and a
//! wall-clock timeout.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use cpflow_types::{OperationResult, ShellRequest};

/// How often the driver polls a running child for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
pub struct ShellDriver;

impl ShellDriver {
    pub fn execute(&self, request: &ShellRequest) -> OperationResult {
        let Some((program, args)) = request.cmd.split_first() else {
            return OperationResult::failed("shell request has an empty command array");
        };

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &request.env {
            command.env(key, value);
        }

        debug!(cmd = %request.cmd.join(" "), "spawning subprocess");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => return OperationResult::failed(format!("failed to spawn '{program}': {error}")),
        };

        // Feed stdin before waiting so short-lived children never block on
        // a writer that has not started.
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = &request.input {
                if let Err(error) = stdin.write_all(input.as_bytes()) {
                    debug!(%error, "failed to write subprocess stdin");
                }
            }
            // Dropping closes the pipe either way.
        }

        // Drain stdout/stderr on reader threads to avoid pipe-buffer
        // deadlock on chatty children.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let status = match wait_with_deadline(&mut child, Duration::from_secs(request.timeout_secs)) {
            WaitOutcome::Finished(status) => status,
            WaitOutcome::TimedOut => {
                let _ = child.kill();
                let _ = child.wait();
                return OperationResult {
                    success: false,
                    stdout: join_reader(stdout_reader),
                    stderr: join_reader(stderr_reader),
                    error_message: Some(format!("command timed out after {}s", request.timeout_secs)),
                    ..OperationResult::default()
                };
            }
            WaitOutcome::WaitFailed(error) => {
                return OperationResult::failed(format!("failed to wait for '{program}': {error}"));
            }
        };

        let exit_code = status.code();
        OperationResult {
            success: status.success(),
            exit_code,
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
            error_message: None,
            ..OperationResult::default()
        }
    }
}

enum WaitOutcome {
    Finished(std::process::ExitStatus),
    TimedOut,
    WaitFailed(std::io::Error),
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitOutcome::Finished(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    return WaitOutcome::TimedOut;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(error) => return WaitOutcome::WaitFailed(error),
        }
    }
}

fn spawn_pipe_reader<R: std::io::Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = pipe.read_to_string(&mut buffer);
            buffer
        })
    })
}

fn join_reader(reader: Option<thread::JoinHandle<String>>) -> String {
    reader.and_then(|handle| handle.join().ok()).unwrap_or_default()
}
