//! Scripted process runner.
//!
//! [`FakeRunner`] records every command and emulates the handful of tools
//! the supervisor invokes: the daemon itself (dry run and launch),
//! `mkdir`, `chown`/`chgrp` and `kill`. A launched daemon writes its PID
//! file like dnsmasq does and then counts as alive until killed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use dhcpwatch_core::{CommandSpec, ProcessRunner, Result, Signal};

/// PID the fake daemon reports by default.
pub const FAKE_DAEMON_PID: u32 = 4242;

/// In-memory process table with scripted exit codes.
#[derive(Debug)]
pub struct FakeRunner {
    helper: Vec<String>,
    commands: Mutex<Vec<CommandSpec>>,
    dry_run_code: AtomicI32,
    launch_code: AtomicI32,
    ownership_code: AtomicI32,
    daemon_pid: AtomicU32,
    empty_pid_file: Mutex<bool>,
    alive: Mutex<HashSet<u32>>,
    /// PIDs that survive SIGINT.
    ignore_interrupt: Mutex<HashSet<u32>>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            helper: vec!["sudo".to_string()],
            commands: Mutex::new(Vec::new()),
            dry_run_code: AtomicI32::new(0),
            launch_code: AtomicI32::new(0),
            ownership_code: AtomicI32::new(0),
            daemon_pid: AtomicU32::new(FAKE_DAEMON_PID),
            empty_pid_file: Mutex::new(false),
            alive: Mutex::new(HashSet::new()),
            ignore_interrupt: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeRunner {
    /// Creates a runner expecting commands prefixed with `sudo`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the privilege helper prefix stripped from each command.
    #[must_use]
    pub fn with_helper<I, S>(mut self, helper: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.helper = helper.into_iter().map(Into::into).collect();
        self
    }

    /// Exit code of the `--test` dry run.
    pub fn set_dry_run_code(&self, code: i32) {
        self.dry_run_code.store(code, Ordering::SeqCst);
    }

    /// Exit code of the real launch.
    pub fn set_launch_code(&self, code: i32) {
        self.launch_code.store(code, Ordering::SeqCst);
    }

    /// Exit code of `chown` and `chgrp`.
    pub fn set_ownership_code(&self, code: i32) {
        self.ownership_code.store(code, Ordering::SeqCst);
    }

    /// PID the next launch writes to the PID file.
    pub fn set_daemon_pid(&self, pid: u32) {
        self.daemon_pid.store(pid, Ordering::SeqCst);
    }

    /// Makes the next launches write an empty PID file.
    pub fn set_empty_pid_file(&self, empty: bool) {
        *self.empty_pid_file.lock() = empty;
    }

    /// Marks `pid` as a live process.
    pub fn spawn_process(&self, pid: u32) {
        self.alive.lock().insert(pid);
    }

    /// Makes `pid` survive SIGINT.
    pub fn ignore_interrupt(&self, pid: u32) {
        self.ignore_interrupt.lock().insert(pid);
    }

    /// Returns true if `pid` was launched or spawned and not yet killed.
    pub fn is_alive_pid(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }

    /// Every command run so far.
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().clone()
    }

    /// Signals sent with `kill`, as `(signal, pid)` in order.
    pub fn signals_sent(&self) -> Vec<(Signal, u32)> {
        self.commands
            .lock()
            .iter()
            .filter_map(|cmd| {
                let argv = self.strip_helper(cmd);
                match argv.as_slice() {
                    [tool, sig, pid] if tool == "kill" => Some((
                        sig.trim_start_matches('-').parse::<Signal>().ok()?,
                        pid.parse::<u32>().ok()?,
                    )),
                    _ => None,
                }
            })
            .collect()
    }

    fn strip_helper(&self, cmd: &CommandSpec) -> Vec<String> {
        let argv: Vec<String> = std::iter::once(cmd.program.clone())
            .chain(cmd.args.iter().cloned())
            .collect();
        if argv.starts_with(&self.helper) {
            argv[self.helper.len()..].to_vec()
        } else {
            argv
        }
    }

    fn launch(&self, argv: &[String]) -> Result<i32> {
        let code = self.launch_code.load(Ordering::SeqCst);
        if code != 0 {
            return Ok(code);
        }
        let pid = self.daemon_pid.load(Ordering::SeqCst);
        if let Some(pid_file) = argv
            .iter()
            .position(|a| a == "-x")
            .and_then(|i| argv.get(i + 1))
        {
            let content = if *self.empty_pid_file.lock() {
                "\n".to_string()
            } else {
                format!("{pid}\n")
            };
            std::fs::write(Path::new(pid_file), content)?;
        }
        self.spawn_process(pid);
        Ok(0)
    }

    fn kill(&self, sig: &str, pid: &str) -> i32 {
        let (Ok(signal), Ok(pid)) = (
            sig.trim_start_matches('-').parse::<Signal>(),
            pid.parse::<u32>(),
        ) else {
            return 1;
        };
        let mut alive = self.alive.lock();
        if !alive.contains(&pid) {
            return 1;
        }
        match signal {
            Signal::Kill => {
                alive.remove(&pid);
            }
            Signal::Int | Signal::Term if !self.ignore_interrupt.lock().contains(&pid) => {
                alive.remove(&pid);
            }
            _ => {}
        }
        0
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, command: &CommandSpec) -> Result<i32> {
        self.commands.lock().push(command.clone());
        let argv = self.strip_helper(command);
        let Some(tool) = argv.first() else {
            return Ok(127);
        };

        let code = if tool.ends_with("dnsmasq") {
            if command.has_arg("--test") {
                self.dry_run_code.load(Ordering::SeqCst)
            } else {
                self.launch(&argv)?
            }
        } else {
            match (tool.as_str(), &argv[1..]) {
                ("mkdir", _) => 0,
                ("chown" | "chgrp", _) => self.ownership_code.load(Ordering::SeqCst),
                ("kill", [sig, pid]) => self.kill(sig, pid),
                _ => 127,
            }
        };
        tracing::trace!(command = %command, code, "fake command");
        Ok(code)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.is_alive_pid(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_removes_process() {
        let runner = FakeRunner::new();
        runner.spawn_process(7);
        let cmd = CommandSpec::privileged(&["sudo".to_string()], "kill").args(["-SIGINT", "7"]);
        assert_eq!(runner.run(&cmd).await.unwrap(), 0);
        assert!(!runner.is_alive(7));
        assert_eq!(runner.signals_sent(), vec![(Signal::Int, 7)]);
    }

    #[tokio::test]
    async fn test_ignored_interrupt() {
        let runner = FakeRunner::new();
        runner.spawn_process(7);
        runner.ignore_interrupt(7);
        let int = CommandSpec::privileged(&["sudo".to_string()], "kill").args(["-SIGINT", "7"]);
        runner.run(&int).await.unwrap();
        assert!(runner.is_alive(7));
        let kill = CommandSpec::privileged(&["sudo".to_string()], "kill").args(["-SIGKILL", "7"]);
        runner.run(&kill).await.unwrap();
        assert!(!runner.is_alive(7));
    }

    #[tokio::test]
    async fn test_kill_unknown_pid_fails() {
        let runner = FakeRunner::new();
        let cmd = CommandSpec::privileged(&["sudo".to_string()], "kill").args(["-SIGHUP", "99"]);
        assert_eq!(runner.run(&cmd).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_launch_writes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("dnsmasq.pid");
        let runner = FakeRunner::new();
        let cmd = CommandSpec::privileged(&["sudo".to_string()], "/usr/sbin/dnsmasq")
            .args(["-i", "eth1", "-x"])
            .arg(pid_file.display().to_string());
        assert_eq!(runner.run(&cmd).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), "4242\n");
        assert!(runner.is_alive(FAKE_DAEMON_PID));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let runner = FakeRunner::new().with_helper(Vec::<String>::new());
        assert_eq!(runner.run(&CommandSpec::new("ip")).await.unwrap(), 127);
    }
}
