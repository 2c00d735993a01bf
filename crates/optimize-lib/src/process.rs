//! External process execution
//!
//! Every interaction with helm, kubectl and the cloud CLI goes through the
//! [`CommandRunner`] trait so the pipeline can be exercised without the real
//! binaries installed.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// A program and its argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured standard streams of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion, capturing stdout and stderr
    ///
    /// Fails with [`Error::Exec`] only when the child exits non-zero.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Pipe `producer`'s stdout into `consumer`'s stdin and return the consumer's stdout
    async fn pipe(&self, producer: &CommandSpec, consumer: &CommandSpec) -> Result<String>;

    /// Run a program attached to the terminal and return its exit code
    async fn run_attached(&self, command: &CommandSpec) -> Result<i32>;
}

/// Runs real child processes with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %command, "Executing command");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()
            .await?;

        finish(&command.program, output)
    }

    async fn pipe(&self, producer: &CommandSpec, consumer: &CommandSpec) -> Result<String> {
        debug!(producer = %producer, consumer = %consumer, "Executing piped commands");

        let mut upstream = Command::new(&producer.program)
            .args(&producer.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let upstream_stdout: Stdio = upstream
            .stdout
            .take()
            .ok_or_else(|| Error::Transport(format!("no stdout attached to {}", producer.program)))?
            .try_into()?;
        let mut upstream_stderr = upstream
            .stderr
            .take()
            .ok_or_else(|| Error::Transport(format!("no stderr attached to {}", producer.program)))?;

        let downstream = Command::new(&consumer.program)
            .args(&consumer.args)
            .stdin(upstream_stdout)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut errors = Vec::new();
        let (downstream, drained) = tokio::join!(
            downstream.wait_with_output(),
            upstream_stderr.read_to_end(&mut errors),
        );
        let downstream = downstream?;
        drained?;

        let status = upstream.wait().await?;
        finish(
            &producer.program,
            std::process::Output {
                status,
                stdout: Vec::new(),
                stderr: errors,
            },
        )?;

        Ok(finish(&consumer.program, downstream)?.stdout)
    }

    async fn run_attached(&self, command: &CommandSpec) -> Result<i32> {
        debug!(command = %command, "Executing attached command");

        let status = Command::new(&command.program)
            .args(&command.args)
            .status()
            .await?;

        Ok(status.code().unwrap_or(1))
    }
}

fn finish(program: &str, output: std::process::Output) -> Result<CommandOutput> {
    let stdout = trim_trailing_newline(String::from_utf8_lossy(&output.stdout).into_owned());
    let stderr = trim_trailing_newline(String::from_utf8_lossy(&output.stderr).into_owned());

    if !output.status.success() {
        return Err(Error::Exec {
            program: program.to_string(),
            status: output.status.code(),
            stderr,
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        status: output.status.code().unwrap_or(0),
    })
}

fn trim_trailing_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    s
}
