//! Execution of one target through an external command.

use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use benchwatch_config::CommandConfig;
use benchwatch_types::{ExecutionOutcome, Target};

use crate::process::{ChildGuard, read_stream, set_new_session};

pub type ExecFut<'a> = Pin<Box<dyn Future<Output = ExecutionOutcome> + Send + 'a>>;

/// Runs one target to completion.
///
/// Implementations never fail: every problem (spawn error, non-zero exit,
/// timeout) is reported as a failed outcome.
pub trait Executor: Send + Sync {
    fn execute<'a>(&'a self, target: &'a Target) -> ExecFut<'a>;
}

/// Program, argument template, and limits for `CommandExecutor`.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    /// Arguments with `{filter}`, `{path}`, `{dir}`, `{name}` placeholders.
    pub args: Vec<String>,
    pub filter: String,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl CommandSpec {
    #[must_use]
    pub fn from_config(command: &CommandConfig, filter: &str, timeout: Duration) -> Self {
        Self {
            program: command.program.clone(),
            args: command.args.clone(),
            filter: filter.to_string(),
            timeout,
            max_output_bytes: command.max_output_bytes,
        }
    }

    /// Arguments for `target` with every placeholder substituted.
    #[must_use]
    pub fn expand_args(&self, target: &Target) -> Vec<String> {
        let path = target.path().display().to_string();
        let dir = target.dir().display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{filter}", &self.filter)
                    .replace("{path}", &path)
                    .replace("{dir}", &dir)
                    .replace("{name}", target.display_name())
            })
            .collect()
    }
}

pub struct CommandExecutor {
    spec: CommandSpec,
}

struct Finished {
    status: ExitStatus,
    stdout: String,
    stderr: String,
    truncated: bool,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    #[must_use]
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, target: &Target) -> ExecutionOutcome {
        let started = Instant::now();
        tracing::debug!(target = %target, program = %self.spec.program, "spawning");

        let result = tokio::time::timeout(self.spec.timeout, self.spawn_and_wait(target)).await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(finished)) if finished.status.success() => {
                ExecutionOutcome::success(target.clone(), elapsed)
            }
            Ok(Ok(finished)) => {
                let exit_code = finished.status.code().unwrap_or(-1);
                let output = combine_output(&finished);
                let message = if output.trim().is_empty() {
                    format!("exit code {exit_code}")
                } else {
                    format!("exit code {exit_code}\n\n{output}")
                };
                ExecutionOutcome::failure(target.clone(), elapsed, message)
            }
            Ok(Err(err)) => ExecutionOutcome::failure(
                target.clone(),
                elapsed,
                format!("failed to run `{}`: {err}", self.spec.program),
            ),
            // Dropping the in-flight future dropped its ChildGuard, which
            // killed the process group.
            Err(_) => ExecutionOutcome::failure(
                target.clone(),
                elapsed,
                format!("timed out after {}", format_timeout(self.spec.timeout)),
            ),
        }
    }

    async fn spawn_and_wait(&self, target: &Target) -> std::io::Result<Finished> {
        let mut command = tokio::process::Command::new(&self.spec.program);
        command
            .args(self.spec.expand_args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(target.dir());
        set_new_session(&mut command);

        let child = command.spawn()?;
        let mut guard = ChildGuard::new(child);
        let child = guard
            .child_mut()
            .ok_or_else(|| std::io::Error::other("child already reaped"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stderr"))?;

        let max_collect = self.spec.max_output_bytes;
        let stdout_task = tokio::spawn(read_stream(stdout, max_collect));
        let stderr_task = tokio::spawn(read_stream(stderr, max_collect));

        let status = child.wait().await?;
        guard.disarm();

        let (stdout, stdout_cut) = stdout_task.await.unwrap_or_default();
        let (stderr, stderr_cut) = stderr_task.await.unwrap_or_default();

        Ok(Finished {
            status,
            stdout,
            stderr,
            truncated: stdout_cut || stderr_cut,
        })
    }
}

impl Executor for CommandExecutor {
    fn execute<'a>(&'a self, target: &'a Target) -> ExecFut<'a> {
        Box::pin(self.run(target))
    }
}

fn combine_output(finished: &Finished) -> String {
    let mut output = String::new();
    output.push_str(finished.stdout.trim_end());
    if !finished.stderr.trim().is_empty() {
        if !output.is_empty() {
            output.push_str("\n\n");
        }
        output.push_str("[stderr]\n");
        output.push_str(finished.stderr.trim_end());
    }
    if finished.truncated {
        output.push_str("\n\n[output truncated]");
    }
    output
}

fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}
