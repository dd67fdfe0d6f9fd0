//! External process execution with hard wall-clock limits.
//!
//! Every renderer ends up shelling out to a browser or converter binary.
//! Those binaries hang on broken pages, stall on full pipes, and leave
//! children behind when their parent dies, so all process handling goes
//! through this module:
//!
//! * stdout and stderr are drained concurrently with `wait()`, so a chatty
//!   process can never block on a full pipe;
//! * every child leads its own process group, and the whole group is
//!   SIGKILLed on timeout, on [`SpawnedProcess::terminate`] and whenever the
//!   owning future is dropped (the global timeout does exactly that), so
//!   helpers forked by a browser or a wrapper script die with it;
//! * on timeout the child is killed **and reaped** before the error returns.
//!
//! The [`ProcessRunner`] trait is the seam tests use to replace real
//! binaries with scripted outcomes.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, warn};

/// How much of stderr is kept in error messages.
const STDERR_TAIL_BYTES: usize = 600;

/// Failure to run a process to completion.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {}ms and was killed", .limit.as_millis())]
    TimedOut { program: String, limit: Duration },

    #[error("I/O error while talking to '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("this runner cannot spawn long-lived processes")]
    Unsupported,
}

/// A fully described invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub current_dir: Option<PathBuf>,
    /// Hard wall-clock limit for [`ProcessRunner::run`].
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    /// Program name for logs and error messages.
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// `true` if any argument equals `arg` or starts with `arg=`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| {
            let a = a.to_string_lossy();
            a == arg || a.starts_with(&format!("{arg}="))
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last few hundred bytes of stderr, lossily decoded and trimmed.
    pub fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        String::from_utf8_lossy(&self.stderr[start..])
            .trim()
            .to_string()
    }
}

/// Runs external programs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr, killing the process
    /// if it outlives `spec.timeout`.
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError>;

    /// Start a long-lived process with stderr piped. The caller owns its
    /// lifetime through the returned guard.
    async fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError> {
        let _ = spec;
        Err(ProcessError::Unsupported)
    }
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let program = spec.display_name();
        let mut cmd = spec.command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!("Running {} with {} args", program, spec.args.len());
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::of(&child);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::time::timeout(spec.timeout, async {
            let (out, err, status) = tokio::join!(read_all(stdout), read_all(stderr), child.wait());
            Ok::<_, std::io::Error>((out?, err?, status?))
        })
        .await;

        match finished {
            Ok(Ok((stdout, stderr, status))) => Ok(ProcessOutput {
                status,
                stdout,
                stderr,
            }),
            Ok(Err(source)) => Err(ProcessError::Io { program, source }),
            Err(_) => {
                warn!(
                    "{} exceeded {}ms, killing pid {:?}",
                    program,
                    spec.timeout.as_millis(),
                    child.id()
                );
                group.kill();
                // kill() also reaps, so no zombie is left behind.
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                Err(ProcessError::TimedOut {
                    program,
                    limit: spec.timeout,
                })
            }
        }
    }

    async fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError> {
        let program = spec.display_name();
        let mut cmd = spec.command();
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!("Spawned {} (pid {:?})", program, child.id());
        let group = ProcessGroup::of(&child);
        Ok(SpawnedProcess {
            child,
            group,
            program,
        })
    }
}

/// Kills a child's whole process group, at the latest when dropped.
///
/// Children are spawned with `process_group(0)`, so the group id is the
/// child's pid. Anything the child forked stays in that group unless it
/// calls `setsid` itself.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            let Ok(pgid) = libc::pid_t::try_from(pgid) else {
                return;
            };
            // SAFETY: killpg has no memory-safety preconditions; an empty
            // group just yields ESRCH.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc == 0 {
                debug!("Killed process group {}", pgid);
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut r) = reader {
        r.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Owner of a long-lived child process.
///
/// Dropping the guard kills the process and its process group;
/// [`SpawnedProcess::terminate`] additionally waits for the child so the
/// exit is observed before the caller moves on.
#[derive(Debug)]
pub struct SpawnedProcess {
    child: Child,
    group: ProcessGroup,
    program: String,
}

impl SpawnedProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the piped stderr handle (only the first call returns it).
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Exit status if the process already exited.
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Kill the process group, then kill and reap the process.
    pub async fn terminate(mut self) {
        self.group.kill();
        if self.try_status().is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {}: {}", self.program, e);
        } else {
            debug!("Terminated {}", self.program);
        }
    }
}
