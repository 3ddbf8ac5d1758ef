//! Process-runner seam.
//!
//! The supervisor never spawns processes itself: it describes each
//! invocation as a [`CommandSpec`] and hands it to a [`ProcessRunner`].
//! [`SystemRunner`] is the real implementation; tests substitute a fake.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Result;

#[cfg(unix)]
use nix::sys::signal::kill as nix_kill;
#[cfg(unix)]
use nix::unistd::Pid;

/// What the child reads on standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    /// Immediate end-of-file.
    Null,
    /// This text, then end-of-file.
    Inline(String),
}

/// A fully-built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable.
    pub program: String,
    /// Arguments, not including the program.
    pub args: Vec<String>,
    /// Standard input.
    pub stdin: StdinSource,
    /// Discard stdout and stderr.
    pub quiet: bool,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinSource::Null,
            quiet: false,
        }
    }

    /// Builds `helper... program`, or just `program` if `helper` is empty.
    #[must_use]
    pub fn privileged(helper: &[String], program: impl Into<String>) -> Self {
        match helper.split_first() {
            Some((first, rest)) => {
                let mut spec = Self::new(first.clone());
                spec.args.extend(rest.iter().cloned());
                spec.args.push(program.into());
                spec
            }
            None => Self::new(program),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feeds `input` on standard input.
    #[must_use]
    pub fn stdin_text(mut self, input: impl Into<String>) -> Self {
        self.stdin = StdinSource::Inline(input.into());
        self
    }

    /// Discards the child's output.
    #[must_use]
    pub const fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Returns true if any argument equals `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs commands and probes process liveness.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` to completion and returns its exit code.
    ///
    /// A child killed by a signal reports `128 + signal`.
    async fn run(&self, command: &CommandSpec) -> Result<i32>;

    /// Returns true if a process with this PID exists.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Runs commands as real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Creates a system runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<i32> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        cmd.stdin(match command.stdin {
            StdinSource::Null => Stdio::null(),
            StdinSource::Inline(_) => Stdio::piped(),
        });
        if command.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        tracing::debug!(command = %command, "running command");
        let mut child = cmd.spawn()?;

        if let StdinSource::Inline(ref input) = command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let status = child.wait().await?;
        Ok(exit_code(status))
    }

    fn is_alive(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            // Signal 0 probes existence. EPERM means the process exists but
            // belongs to another user, which is the normal case for a
            // daemon started through the privilege helper.
            #[allow(clippy::cast_possible_wrap)] // PID from u32 fits in i32 range
            match nix_kill(Pid::from_raw(pid as i32), None) {
                Ok(()) | Err(nix::errno::Errno::EPERM) => true,
                Err(_) => false,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(-1)
    }

    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}
