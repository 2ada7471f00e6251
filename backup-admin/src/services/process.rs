//! External command execution.
//!
//! Every tool the service drives (`pg_dump`, `psql`, the migration tool) runs
//! through a [`CommandRunner`]. Captured output is bounded; exceeding the bound
//! kills the child.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout};

/// Default capture limit per stream.
pub const DEFAULT_MAX_OUTPUT: usize = 1024 * 1024;

/// Capture limit for restores, which echo a line per replayed statement.
pub const RESTORE_MAX_OUTPUT: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// When set, stdout is written to this file instead of being captured.
    pub stdout_path: Option<PathBuf>,
    pub max_output: usize,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            stdout_path: None,
            max_output: DEFAULT_MAX_OUTPUT,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdout_to(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Program and arguments only. Environment values are never rendered.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(path) = &self.stdout_path {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("{program}: command not found")]
    NotFound { program: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("{program} produced more than {limit} bytes of output")]
    OutputLimit { program: String, limit: usize },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError>;
}

/// Runs commands as child processes of this service.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

enum CollectError {
    Io(std::io::Error),
    Limit,
    TimedOut(Duration),
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
        let program = spec.program.clone();
        let resolved = which::which(&spec.program).map_err(|_| ProcessError::NotFound {
            program: program.clone(),
        })?;

        let mut cmd = tokio::process::Command::new(resolved);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        match &spec.stdout_path {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(|source| ProcessError::Io {
                    program: program.clone(),
                    source,
                })?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }

        tracing::debug!(command = %spec, "Running external command");

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: program.clone(),
                }
            } else {
                ProcessError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = {
            let collect = collect_output(&mut child, stdout, stderr, spec.max_output);
            match spec.timeout {
                Some(after) => tokio::time::timeout(after, collect)
                    .await
                    .unwrap_or(Err(CollectError::TimedOut(after))),
                None => collect.await,
            }
        };

        let (status, out, err) = match outcome {
            Ok(collected) => collected,
            Err(e) => {
                let _ = child.kill().await;
                return Err(match e {
                    CollectError::Io(source) => ProcessError::Io { program, source },
                    CollectError::Limit => ProcessError::OutputLimit {
                        program,
                        limit: spec.max_output,
                    },
                    CollectError::TimedOut(after) => ProcessError::Timeout { program, after },
                });
            }
        };

        let stdout = String::from_utf8_lossy(&out).into_owned();
        let stderr = String::from_utf8_lossy(&err).into_owned();

        if !status.success() {
            return Err(ProcessError::Failed {
                program,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

async fn collect_output(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    limit: usize,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), CollectError> {
    let (out, err) = tokio::try_join!(read_limited(stdout, limit), read_limited(stderr, limit))?;
    let status = child.wait().await.map_err(CollectError::Io)?;
    Ok((status, out, err))
}

async fn read_limited<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> Result<Vec<u8>, CollectError> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut limited = reader.take(limit as u64 + 1);
    limited
        .read_to_end(&mut buf)
        .await
        .map_err(CollectError::Io)?;
    if buf.len() > limit {
        return Err(CollectError::Limit);
    }
    Ok(buf)
}
