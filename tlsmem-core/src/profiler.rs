// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Profiler process management.
//!
//! Launches the workload driver under the heap profiler and waits for it,
//! bounded by an optional timeout. A Run that overstays gets SIGTERM, then
//! SIGKILL once the grace period is over.

use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::config::{ProfilerConfig, OUTPUT_PLACEHOLDER};

/// Driver stdout and stderr, kept next to the trace.
pub const DRIVER_LOG: &str = "driver.log";

/// Environment variable naming the Run's output directory.
pub const ENV_OUTPUT_DIR: &str = "TLSMEM_OUTPUT_DIR";

/// Environment variable naming the directory the driver's snapshots are
/// collected from.
pub const ENV_SNAPSHOT_DIR: &str = "TLSMEM_SNAPSHOT_DIR";

/// Environment variable naming the candidate under test.
pub const ENV_CANDIDATE: &str = "TLSMEM_CANDIDATE";

/// Environment variable naming the mode under test.
pub const ENV_MODE: &str = "TLSMEM_MODE";

/// One driver invocation under the profiler.
#[derive(Debug, Clone)]
pub struct ProfileRequest {
    /// Built driver executable.
    pub driver: PathBuf,
    /// Driver arguments followed by the mode flags.
    pub args: Vec<String>,
    /// Run directory; also the working directory.
    pub output_dir: PathBuf,
    /// Where the profiler writes its trace.
    pub trace_path: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// How a profiled Run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileExit {
    Exited { code: i32 },
    Signaled { signal: i32 },
    TimedOut { after: Duration },
}

impl ProfileExit {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited { code },
            (None, Some(signal)) => Self::Signaled { signal },
            (None, None) => Self::Exited { code: -1 },
        }
    }
}

/// Runs the workload driver under a heap profiler.
#[allow(async_fn_in_trait)]
pub trait Profiler {
    /// Run to completion or timeout. Errors only when the process cannot be
    /// started or waited for.
    async fn profile(&self, request: &ProfileRequest) -> std::io::Result<ProfileExit>;
}

/// [`Profiler`] wrapping the driver in an external command, `valgrind
/// --tool=massif` by default.
#[derive(Debug, Clone)]
pub struct CommandProfiler {
    program: String,
    args: Vec<String>,
    grace: Duration,
}

impl CommandProfiler {
    pub fn new(program: impl Into<String>, args: Vec<String>, grace: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            grace,
        }
    }

    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.grace)
    }

    /// Full argument vector: profiler args, driver, driver args.
    pub fn command_line(&self, request: &ProfileRequest) -> Vec<String> {
        let output = request.trace_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .chain(std::iter::once(request.driver.to_string_lossy().into_owned()))
            .chain(request.args.iter().cloned())
            .collect()
    }

    /// SIGTERM, then SIGKILL if the child outlives the grace period.
    async fn terminate(&self, child: &mut Child) -> std::io::Result<()> {
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "Failed to send SIGTERM");
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(status) => status.map(|_| ()),
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "Profiler ignored SIGTERM, killing"
                );
                child.kill().await
            }
        }
    }
}

fn open_log(dir: &Path) -> std::io::Result<(Stdio, Stdio)> {
    let log = File::create(dir.join(DRIVER_LOG))?;
    let err = log.try_clone()?;
    Ok((Stdio::from(log), Stdio::from(err)))
}

impl Profiler for CommandProfiler {
    async fn profile(&self, request: &ProfileRequest) -> std::io::Result<ProfileExit> {
        let (stdout, stderr) = open_log(&request.output_dir)?;
        let args = self.command_line(request);

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.output_dir)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!(
            pid = child.id(),
            program = %self.program,
            args = ?args,
            "Spawned profiler"
        );

        let start = Instant::now();
        let Some(timeout) = request.timeout else {
            return child.wait().await.map(ProfileExit::from_status);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map(ProfileExit::from_status),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Run timed out, terminating"
                );
                // The Run timed out even if the profiler could not be reaped
                if let Err(e) = self.terminate(&mut child).await {
                    tracing::warn!(error = %e, "Failed to terminate timed-out profiler");
                }
                Ok(ProfileExit::TimedOut { after: timeout })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// `sh -c <script> <trace> <driver> <args...>` stands in for the profiler.
    fn sh_profiler(script: &str, grace: Duration) -> CommandProfiler {
        CommandProfiler::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "{output}".to_string()],
            grace,
        )
    }

    fn request(dir: &Path, timeout: Option<Duration>) -> ProfileRequest {
        ProfileRequest {
            driver: PathBuf::from("/bin/echo"),
            args: vec!["s2n-tls".to_string(), "pair".to_string()],
            output_dir: dir.to_path_buf(),
            trace_path: dir.join("massif.out"),
            env: vec![(ENV_MODE.to_string(), "pair".to_string())],
            timeout,
        }
    }

    #[test]
    fn test_command_line_substitutes_output() {
        let profiler = CommandProfiler::new(
            "valgrind",
            vec!["--tool=massif".to_string(), "--massif-out-file={output}".to_string()],
            Duration::from_secs(1),
        );
        let req = request(Path::new("/runs/s2n-tls/pair"), None);
        assert_eq!(
            profiler.command_line(&req),
            vec![
                "--tool=massif",
                "--massif-out-file=/runs/s2n-tls/pair/massif.out",
                "/bin/echo",
                "s2n-tls",
                "pair",
            ]
        );
    }

    #[tokio::test]
    async fn test_exit_code_and_environment() {
        let dir = TempDir::new().unwrap();
        let profiler = sh_profiler(
            r#"echo "$TLSMEM_MODE" > "$0"; "$@"; exit 3"#,
            Duration::from_secs(1),
        );

        let exit = profiler.profile(&request(dir.path(), None)).await.unwrap();
        assert_eq!(exit, ProfileExit::Exited { code: 3 });
        assert!(!exit.success());

        let trace = std::fs::read_to_string(dir.path().join("massif.out")).unwrap();
        assert_eq!(trace.trim(), "pair");
        let log = std::fs::read_to_string(dir.path().join(DRIVER_LOG)).unwrap();
        assert_eq!(log.trim(), "s2n-tls pair");
    }

    #[tokio::test]
    async fn test_timeout_terminates() {
        let dir = TempDir::new().unwrap();
        let profiler = sh_profiler("sleep 30", Duration::from_millis(200));

        let start = Instant::now();
        let exit = profiler
            .profile(&request(dir.path(), Some(Duration::from_millis(200))))
            .await
            .unwrap();

        assert_eq!(
            exit,
            ProfileExit::TimedOut {
                after: Duration::from_millis(200)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_then_killed() {
        let dir = TempDir::new().unwrap();
        let profiler = sh_profiler(
            "trap '' TERM; while true; do sleep 1; done",
            Duration::from_millis(200),
        );

        let exit = profiler
            .profile(&request(dir.path(), Some(Duration::from_millis(200))))
            .await
            .unwrap();
        assert!(matches!(exit, ProfileExit::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let profiler =
            CommandProfiler::new("/nonexistent/valgrind", vec![], Duration::from_secs(1));
        assert!(profiler.profile(&request(dir.path(), None)).await.is_err());
    }
}
