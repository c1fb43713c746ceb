//! Process-backed sandbox.
//!
//! Each attempt runs in `<work_dir>/` as a child process of the configured
//! interpreter:
//!
//! ```text
//! <work_dir>/
//!   main.<ext>          generated code
//!   requirements.txt    detected dependencies
//!   deps/               installer target, exported via the dependency env var
//!   ...                 anything the script writes is reported as an artifact
//! ```
//!
//! The child is placed in its own process group so a timeout or cancellation
//! can kill everything it spawned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::dependencies::{detect_dependencies, missing_modules};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionOutcome, FailureCategory, SandboxConfig};
use crate::domain::ports::{Sandbox, SandboxRequest};

const MANIFEST_FILE: &str = "requirements.txt";
const DEPS_DIR: &str = "deps";

/// Grace period for output readers after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// How a child process ended.
enum ChildExit {
    Exited { code: Option<i32>, stdout: String, stderr: String },
    TimedOut { stdout: String, stderr: String },
    Cancelled,
}

/// Sandbox that runs task code with a local interpreter.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn script_name(&self) -> String {
        format!("main.{}", self.config.script_extension)
    }

    /// Install `packages` into `deps/`. Returns the failure outcome, if any.
    async fn install_dependencies(
        &self,
        request: &SandboxRequest,
        deps_dir: &Path,
        packages: &[String],
    ) -> DomainResult<Option<ExecutionOutcome>> {
        let Some((program, args)) = self.config.installer.split_first() else {
            return Ok(Some(ExecutionOutcome::failure(
                request.task_id,
                request.attempt,
                FailureCategory::DependencyResolutionError,
                format!(
                    "DependencyResolutionError: no installer configured for {}",
                    packages.join(", ")
                ),
            )));
        };

        debug!(task_id = %request.task_id, packages = ?packages, "installing dependencies");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(deps_dir)
            .args(packages)
            .current_dir(&request.work_dir);

        let outcome = match self.run_child(cmd, request.timeout, &request.cancel).await? {
            ChildExit::Exited { code: Some(0), .. } => None,
            ChildExit::Exited { code, stderr, .. } => Some(
                ExecutionOutcome::failure(
                    request.task_id,
                    request.attempt,
                    FailureCategory::DependencyResolutionError,
                    format!("{stderr}\nDependencyResolutionError: installer failed for {}", packages.join(", ")),
                )
                .with_exit_code(code),
            ),
            ChildExit::TimedOut { stderr, .. } => Some(ExecutionOutcome::failure(
                request.task_id,
                request.attempt,
                FailureCategory::DependencyResolutionError,
                format!("{stderr}\nDependencyResolutionError: installer timed out"),
            )),
            ChildExit::Cancelled => Some(cancelled(request)),
        };
        Ok(outcome)
    }

    /// Spawn `cmd` and wait for it under the timeout and cancellation token.
    async fn run_child(
        &self,
        mut cmd: Command,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> DomainResult<ChildExit> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to spawn process: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(stdout, max));
        let stderr_task = tokio::spawn(read_capped(stderr, max));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            () = tokio::time::sleep(timeout) => Waited::TimedOut,
            () = cancel.cancelled() => Waited::Cancelled,
        };

        let code = match waited {
            Waited::Exited(status) => Some(
                status
                    .map_err(|e| DomainError::ExecutionFailed(format!("Failed to wait for process: {e}")))?
                    .code(),
            ),
            Waited::TimedOut => {
                kill_tree(&mut child).await;
                None
            }
            Waited::Cancelled => {
                kill_tree(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Ok(ChildExit::Cancelled);
            }
        };

        // Orphaned grandchildren may hold the pipes open; don't wait on them forever.
        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;

        Ok(match code {
            Some(code) => ChildExit::Exited { code, stdout, stderr },
            None => ChildExit::TimedOut { stdout, stderr },
        })
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(&self, request: SandboxRequest) -> DomainResult<ExecutionOutcome> {
        let started = Instant::now();
        let work_dir = request.work_dir.clone();
        let deps_dir = work_dir.join(DEPS_DIR);
        tokio::fs::create_dir_all(&deps_dir).await?;

        let script = self.script_name();
        tokio::fs::write(work_dir.join(&script), &request.code).await?;

        let packages = detect_dependencies(&request.code);
        let mut manifest = packages.join("\n");
        if !manifest.is_empty() {
            manifest.push('\n');
        }
        tokio::fs::write(work_dir.join(MANIFEST_FILE), manifest).await?;

        if !packages.is_empty() {
            if let Some(failed) = self.install_dependencies(&request, &deps_dir, &packages).await? {
                return Ok(failed.with_duration_ms(elapsed_ms(started)));
            }
        }

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&script)
            .current_dir(&work_dir)
            .env(&self.config.dependency_env_var, &deps_dir)
            .env("FORGELOOP_TASK_ID", request.task_id.to_string())
            .env("FORGELOOP_ATTEMPT", request.attempt.to_string());

        let exit = self.run_child(cmd, request.timeout, &request.cancel).await?;
        let outcome = match exit {
            ChildExit::Exited { code: Some(0), stdout, .. } => {
                ExecutionOutcome::success(request.task_id, request.attempt)
                    .with_stdout(stdout)
                    .with_artifacts(list_artifacts(&work_dir, &script).await?)
            }
            ChildExit::Exited { code, stdout, stderr } => {
                let category = if missing_modules(&stderr).is_empty() {
                    FailureCategory::RuntimeError
                } else {
                    FailureCategory::DependencyResolutionError
                };
                ExecutionOutcome::failure(request.task_id, request.attempt, category, stderr)
                    .with_stdout(stdout)
                    .with_exit_code(code)
            }
            ChildExit::TimedOut { stdout, stderr } => {
                warn!(task_id = %request.task_id, attempt = request.attempt, "sandbox timed out");
                let message = format!(
                    "{stderr}\nTimeout: killed after {}s",
                    request.timeout.as_secs()
                );
                ExecutionOutcome::failure(request.task_id, request.attempt, FailureCategory::TimeoutError, message)
                    .with_stdout(stdout)
            }
            ChildExit::Cancelled => cancelled(&request),
        };

        Ok(outcome.with_duration_ms(elapsed_ms(started)))
    }
}

fn cancelled(request: &SandboxRequest) -> ExecutionOutcome {
    ExecutionOutcome::failure(
        request.task_id,
        request.attempt,
        FailureCategory::Cancelled,
        "Cancelled: plan cancelled",
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn drain(task: tokio::task::JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Kill the child's whole process group, then reap it.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!(pid, error = %e, "killpg failed");
            }
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
    let _ = child.wait().await;
}

/// Read a stream to the end, keeping at most `max` bytes.
async fn read_capped<R>(reader: Option<R>, max: usize) -> String
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = max.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
                truncated |= n > room;
            }
        }
    }
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    text
}

/// Files the script produced, relative to `work_dir`, sorted.
async fn list_artifacts(work_dir: &Path, script: &str) -> DomainResult<Vec<String>> {
    let mut found = Vec::new();
    let mut pending: Vec<PathBuf> = vec![work_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(work_dir) else {
                continue;
            };
            let relative = relative.to_string_lossy().into_owned();
            if relative == script || relative == MANIFEST_FILE || relative == DEPS_DIR {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else {
                found.push(relative);
            }
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::models::ExitStatus;
    use uuid::Uuid;

    fn sh_sandbox(timeout_secs: u64) -> ProcessSandbox {
        ProcessSandbox::new(SandboxConfig {
            interpreter: "sh".into(),
            script_extension: "sh".into(),
            installer: Vec::new(),
            timeout_secs,
            max_output_bytes: 64,
            ..SandboxConfig::default()
        })
    }

    fn request(dir: &Path, code: &str, timeout: Duration) -> SandboxRequest {
        SandboxRequest {
            plan_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            attempt: 1,
            code: code.to_string(),
            work_dir: dir.join("task"),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_success_lists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(5);
        let req = request(dir.path(), "echo hello\necho data > out.txt\n", Duration::from_secs(5));

        let outcome = sandbox.execute(req).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.artifact_paths, vec!["out.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(5);
        let req = request(dir.path(), "echo 'E_IMPORT: cannot import helper' >&2\nexit 3\n", Duration::from_secs(5));

        let outcome = sandbox.execute(req).await.unwrap();
        assert_eq!(outcome.category, Some(FailureCategory::RuntimeError));
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(
            outcome.signature.unwrap().key(),
            "runtime_error:E_IMPORT:cannot import helper"
        );
    }

    #[tokio::test]
    async fn test_missing_module_is_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(5);
        let req = request(
            dir.path(),
            "echo \"ModuleNotFoundError: No module named 'pandas'\" >&2\nexit 1\n",
            Duration::from_secs(5),
        );

        let outcome = sandbox.execute(req).await.unwrap();
        assert_eq!(outcome.category, Some(FailureCategory::DependencyResolutionError));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(1);
        let req = request(dir.path(), "sleep 30\n", Duration::from_millis(300));

        let started = Instant::now();
        let outcome = sandbox.execute(req).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.exit_status, ExitStatus::Timeout);
        assert_eq!(outcome.category, Some(FailureCategory::TimeoutError));
    }

    #[tokio::test]
    async fn test_cancellation_stops_child() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(30);
        let req = request(dir.path(), "sleep 30\n", Duration::from_secs(30));
        let cancel = req.cancel.clone();

        let handle = tokio::spawn(async move { sandbox.execute(req).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.exit_status, ExitStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(5);
        let code = "i=0\nwhile [ $i -lt 100 ]; do echo xxxxxxxxxx; i=$((i+1)); done\n";
        let req = request(dir.path(), code, Duration::from_secs(5));

        let outcome = sandbox.execute(req).await.unwrap();
        assert!(outcome.stdout.ends_with("[output truncated]"));
        assert!(outcome.stdout.len() < 100);
    }

    #[tokio::test]
    async fn test_third_party_import_without_installer() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sh_sandbox(5);
        let req = request(dir.path(), "import pandas\n", Duration::from_secs(5));

        let outcome = sandbox.execute(req).await.unwrap();
        assert_eq!(outcome.category, Some(FailureCategory::DependencyResolutionError));
        let manifest = std::fs::read_to_string(dir.path().join("task").join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest, "pandas\n");
    }
}
