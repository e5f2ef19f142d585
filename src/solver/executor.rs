//! Sandboxed execution of generated code.
//!
//! Generated Python never runs in this process. Each call gets:
//! - a throwaway working directory (removed when the call returns)
//! - a cleared environment, so service credentials are not visible
//! - a wall-clock timeout, after which the interpreter is killed
//! - on Unix, a CPU-time rlimit matching the timeout
//!
//! A bundled harness execs the code in a fresh scope and prints a JSON probe
//! of the `result` variable on a marker line.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use super::normalize::{RawAnswer, ResultProbe};
use crate::config::ExecSettings;
use crate::util::{sanitize_output, tail_chars};

const HARNESS: &str = include_str!("harness.py");
const RESULT_MARKER: &str = "__QUIZ_SOLVER_RESULT__";

/// Environment variables forwarded to generated code.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR", "SYSTEMROOT"];

/// Answer text used when the code never assigns `result`.
pub const MISSING_RESULT: &str = "Error: No result variable";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Execution Error: {0}")]
    Raised(String),

    #[error("Execution Error: could not prepare sandbox: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Execution Error: could not start {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Execution Error: timed out after {0} seconds")]
    Timeout(u64),

    #[error("Execution Error: interpreter exited with status {status} without a result: {stderr}")]
    NoReport { status: i32, stderr: String },

    #[error("Execution Error: unreadable result report: {0}")]
    BadReport(String),
}

/// Runs generated code and reports its `result`.
///
/// Implementations never fail: every fault is folded into
/// [`RawAnswer::Error`].
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str) -> RawAnswer;
}

/// What the harness prints after the marker.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum HarnessReport {
    Ok { probe: ResultProbe },
    Error { message: String },
    Missing,
}

/// Subprocess-backed Python runner.
pub struct PythonSandbox {
    settings: ExecSettings,
}

impl PythonSandbox {
    pub fn new(settings: ExecSettings) -> Self {
        Self { settings }
    }

    async fn execute(&self, code: &str) -> Result<RawAnswer, ExecError> {
        let workdir = tempfile::Builder::new()
            .prefix("quiz-exec-")
            .tempdir()
            .map_err(ExecError::Workspace)?;
        let harness_path = workdir.path().join("_harness.py");
        let solution_path = workdir.path().join("solution.py");
        tokio::fs::write(&harness_path, HARNESS)
            .await
            .map_err(ExecError::Workspace)?;
        tokio::fs::write(&solution_path, code)
            .await
            .map_err(ExecError::Workspace)?;

        let timeout_secs = self.settings.timeout.as_secs().max(1);
        let mut cmd = Command::new(&self.settings.python_bin);
        cmd.arg(&harness_path)
            .arg(&solution_path)
            .current_dir(workdir.path())
            .env_clear()
            .envs(PASSTHROUGH_ENV.iter().filter_map(|k| std::env::var(k).ok().map(|v| (*k, v))))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        limit_cpu(&mut cmd, timeout_secs);

        tracing::debug!(
            "Running generated code ({} bytes) in {:?}",
            code.len(),
            workdir.path()
        );

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExecError::Spawn {
                    bin: self.settings.python_bin.clone(),
                    source,
                })
            }
            Err(_) => return Err(ExecError::Timeout(timeout_secs)),
        };

        let stderr = sanitize_output(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!("Generated code stderr: {}", tail_chars(&stderr, 2000));
        }

        let Some(report_line) = find_report(&output.stdout) else {
            tracing::debug!(
                "Generated code stdout: {}",
                tail_chars(&sanitize_output(&output.stdout), 2000)
            );
            return Err(ExecError::NoReport {
                status: output.status.code().unwrap_or(-1),
                stderr: tail_chars(stderr.trim(), 500).to_string(),
            });
        };

        match serde_json::from_str::<HarnessReport>(&report_line)
            .map_err(|e| ExecError::BadReport(e.to_string()))?
        {
            HarnessReport::Ok { probe } => Ok(RawAnswer::Probe(probe)),
            HarnessReport::Error { message } => Err(ExecError::Raised(message)),
            HarnessReport::Missing => Ok(RawAnswer::Error(MISSING_RESULT.to_string())),
        }
    }
}

#[async_trait]
impl CodeRunner for PythonSandbox {
    async fn run(&self, code: &str) -> RawAnswer {
        match self.execute(code).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("{}", e);
                RawAnswer::Error(e.to_string())
            }
        }
    }
}

/// Payload of the last marker line in raw stdout.
///
/// Only that line is decoded; whatever else the code printed may be binary.
fn find_report(stdout: &[u8]) -> Option<String> {
    stdout
        .split(|b| *b == b'\n')
        .rev()
        .find_map(|line| line.strip_prefix(RESULT_MARKER.as_bytes()))
        .map(|payload| String::from_utf8_lossy(payload).trim_end().to_string())
}

#[cfg(unix)]
fn limit_cpu(cmd: &mut Command, secs: u64) {
    let limit = libc::rlimit {
        rlim_cur: secs as libc::rlim_t,
        rlim_max: secs.saturating_add(5) as libc::rlim_t,
    };
    // SAFETY: setrlimit is async-signal-safe and touches only the child.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setrlimit(libc::RLIMIT_CPU, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn limit_cpu(_cmd: &mut Command, _secs: u64) {}
