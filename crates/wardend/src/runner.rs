//! Command runners: the seam between the orchestrator and the host.
//!
//! The orchestrator owns timeouts. A runner only has to make sure that
//! dropping its future stops the command.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    /// -1 when the process could not be spawned or was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    pub fn timeout(command: &str, limit: Duration) -> Self {
        Self {
            command: command.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("timed out after {}s", limit.as_secs()),
            duration_ms: limit.as_millis() as u64,
            timed_out: true,
        }
    }
}

/// Something that can run a remediation command.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: &str) -> impl Future<Output = CommandOutput> + Send;
}

/// Runs commands through `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        let start = Instant::now();
        debug!("Running: {} -c {:?}", self.shell, command);

        // kill_on_drop: a timed-out future takes the child down with it
        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(output) => CommandOutput {
                command: command.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms,
                timed_out: false,
            },
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command, e);
                CommandOutput {
                    command: command.to_string(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("spawn failed: {}", e),
                    duration_ms,
                    timed_out: false,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Script {
    needle: String,
    exit_code: i32,
    stdout: String,
    delay: Duration,
}

/// In-memory runner with canned responses, for tests and dry runs.
///
/// The first script whose needle occurs in the command answers it;
/// unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Vec<Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: &str, exit_code: i32, stdout: &str) -> Self {
        self.scripts.push(Script {
            needle: needle.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            delay: Duration::ZERO,
        });
        self
    }

    /// Succeed after sleeping for `delay`.
    pub fn hang(mut self, needle: &str, delay: Duration) -> Self {
        self.scripts.push(Script {
            needle: needle.to_string(),
            exit_code: 0,
            stdout: String::new(),
            delay,
        });
        self
    }

    /// Commands seen so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(command.to_string());

        let script = self
            .scripts
            .iter()
            .find(|s| command.contains(&s.needle))
            .cloned();

        let (exit_code, stdout, delay) = match script {
            Some(s) => (s.exit_code, s.stdout, s.delay),
            None => (0, String::new(), Duration::ZERO),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        CommandOutput {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr: String::new(),
            duration_ms: delay.as_millis() as u64,
            timed_out: false,
        }
    }
}
