//! Host access layer.
//! Every external command, file read and process lookup goes through the
//! [`Host`] trait so collectors and remediation can run against a scripted
//! host in tests.

use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::System;
use thiserror::Error;
use tracing::{debug, warn};

// Some monitoring tools (smartctl, fuser) live in sbin, which is not on
// every unprivileged user's PATH.
const SBIN_DIRS: &[&str] = &["/usr/local/sbin", "/usr/sbin", "/sbin"];
const BOUNDED_POLL: Duration = Duration::from_millis(20);
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// True when the tool complained about permissions rather than data.
    pub fn denied(&self) -> bool {
        let lower = format!("{}\n{}", self.stdout, self.stderr).to_ascii_lowercase();
        lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("must be root")
            || lower.contains("superuser")
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0} is not installed")]
    Missing(String),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
}

pub trait Host {
    fn has_tool(&self, program: &str) -> bool;
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError>;
    /// Runs for at most `limit`, then kills the child and returns whatever
    /// stdout arrived.
    fn run_bounded(
        &self,
        program: &str,
        args: &[&str],
        limit: Duration,
    ) -> Result<CommandOutput, ProbeError>;
    /// Runs an interactive command: stdin and stderr stay on the terminal,
    /// stdout is echoed line by line and also captured.
    fn run_streamed(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, ProbeError>;
    fn read_file(&self, path: &str) -> Option<String>;
    fn path_exists(&self, path: &str) -> bool;
    fn list_dir(&self, path: &str) -> Vec<String>;
    fn pause(&self, duration: Duration);
    fn running_process(&self, names: &[&str]) -> Option<RunningProcess>;
    fn is_root(&self) -> bool;
    fn reachable(&self, url: &str, timeout: Duration) -> bool;
}

/// The real machine.
#[derive(Debug, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        LocalHost
    }

    fn resolve(&self, program: &str) -> Option<PathBuf> {
        // Only bare tool names are looked up, never paths
        if !is_valid_tool_name(program) {
            return None;
        }
        let mut dirs: Vec<PathBuf> = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).collect())
            .unwrap_or_default();
        dirs.extend(SBIN_DIRS.iter().map(PathBuf::from));
        dirs.into_iter()
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }

    fn command(&self, program: &str, args: &[&str]) -> Result<Command, ProbeError> {
        let path = self
            .resolve(program)
            .ok_or_else(|| ProbeError::Missing(program.to_string()))?;
        let mut command = Command::new(path);
        command
            .args(args)
            .env("LC_ALL", "C") // Force C locale for consistent number format
            .env("LANG", "C");
        Ok(command)
    }
}

impl Host for LocalHost {
    fn has_tool(&self, program: &str) -> bool {
        self.resolve(program).is_some()
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
        debug!(program, ?args, "running probe");
        let output = self
            .command(program, args)?
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        })
    }

    fn run_bounded(
        &self,
        program: &str,
        args: &[&str],
        limit: Duration,
    ) -> Result<CommandOutput, ProbeError> {
        debug!(program, ?args, limit_ms = limit.as_millis() as u64, "running bounded probe");
        let mut child = self
            .command(program, args)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let pipe = child.stdout.take();
        thread::spawn(move || {
            let Some(mut pipe) = pipe else { return };
            let mut buf = [0u8; 4096];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let start = Instant::now();
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if start.elapsed() >= limit => {
                    let _ = child.kill();
                    timed_out = true;
                    break child.wait().ok();
                }
                Ok(None) => thread::sleep(BOUNDED_POLL),
                Err(err) => {
                    warn!(program, error = %err, "lost track of bounded probe");
                    let _ = child.kill();
                    break None;
                }
            }
        };

        // The reader thread is left detached: a grandchild holding the pipe
        // open must not stall the run.
        let mut bytes = Vec::new();
        let drain_until = Instant::now() + DRAIN_GRACE;
        while let Ok(chunk) =
            rx.recv_timeout(drain_until.saturating_duration_since(Instant::now()))
        {
            bytes.extend(chunk);
        }

        Ok(CommandOutput {
            code: if timed_out {
                None
            } else {
                status.and_then(|s| s.code())
            },
            stdout: String::from_utf8_lossy(&bytes).into_owned(),
            stderr: String::new(),
            timed_out,
        })
    }

    fn run_streamed(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, ProbeError> {
        debug!(program, ?args, ?env, "running interactive command");
        let mut child = self
            .command(program, args)?
            .envs(env.iter().copied())
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let mut captured = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            let mut reader = BufReader::new(pipe);
            let mut terminal = io::stdout();
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let _ = terminal.write_all(&line);
                        let _ = terminal.flush();
                        captured.extend_from_slice(&line);
                    }
                    Err(err) => {
                        warn!(program, error = %err, "lost the output of a running command");
                        break;
                    }
                }
            }
        }

        let status = child.wait().map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?;
        Ok(CommandOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&captured).into_owned(),
            stderr: String::new(),
            timed_out: false,
        })
    }

    fn read_file(&self, path: &str) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn list_dir(&self, path: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn running_process(&self, names: &[&str]) -> Option<RunningProcess> {
        let mut sys = System::new();
        sys.refresh_processes();
        sys.processes()
            .iter()
            .find(|(_, process)| names.iter().any(|name| process.name() == *name))
            .map(|(pid, process)| RunningProcess {
                pid: pid.as_u32(),
                name: process.name().to_string(),
            })
    }

    #[cfg(target_os = "linux")]
    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(target_os = "linux"))]
    fn is_root(&self) -> bool {
        false
    }

    fn reachable(&self, url: &str, timeout: Duration) -> bool {
        let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "failed to create HTTP client");
                return false;
            }
        };
        // Any HTTP answer at all proves the route works
        match client.head(url).send() {
            Ok(response) => {
                debug!(url, status = %response.status(), "connectivity probe answered");
                true
            }
            Err(err) => {
                debug!(url, error = %err, "connectivity probe failed");
                false
            }
        }
    }
}

pub fn is_valid_tool_name(cmd: &str) -> bool {
    !cmd.is_empty()
        && cmd
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !cmd.starts_with('.')
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
pub mod fake {
    //! Scripted host for collector and remediation tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet, VecDeque};

    #[derive(Default)]
    pub struct FakeHost {
        tools: HashSet<String>,
        responses: RefCell<HashMap<String, VecDeque<CommandOutput>>>,
        files: HashMap<String, String>,
        dirs: HashMap<String, Vec<String>>,
        processes: Vec<String>,
        unprivileged: bool,
        offline: bool,
        calls: RefCell<Vec<String>>,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tool(mut self, name: &str) -> Self {
            self.tools.insert(name.to_string());
            self
        }

        /// Queue a response for an exact command line. The last queued
        /// response repeats once the queue is drained.
        pub fn respond(mut self, command_line: &str, code: i32, stdout: &str) -> Self {
            let program = command_line
                .split_whitespace()
                .find(|token| !token.contains('='))
                .unwrap_or_default();
            self.tools.insert(program.to_string());
            self.responses
                .get_mut()
                .entry(command_line.to_string())
                .or_default()
                .push_back(CommandOutput {
                    code: Some(code),
                    stdout: stdout.to_string(),
                    ..Default::default()
                });
            self
        }

        pub fn with_file(mut self, path: &str, contents: &str) -> Self {
            self.files.insert(path.to_string(), contents.to_string());
            self
        }

        pub fn with_dir(mut self, path: &str, entries: &[&str]) -> Self {
            self.dirs.insert(
                path.to_string(),
                entries.iter().map(|e| e.to_string()).collect(),
            );
            self
        }

        pub fn with_process(mut self, name: &str) -> Self {
            self.processes.push(name.to_string());
            self
        }

        pub fn unprivileged(mut self) -> Self {
            self.unprivileged = true;
            self
        }

        pub fn offline(mut self) -> Self {
            self.offline = true;
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn answer(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
            self.answer_with_env(program, args, &[])
        }

        /// Environment assignments prefix the recorded command line.
        fn answer_with_env(
            &self,
            program: &str,
            args: &[&str],
            env: &[(&str, &str)],
        ) -> Result<CommandOutput, ProbeError> {
            let assignments: Vec<String> =
                env.iter().map(|(name, value)| format!("{name}={value}")).collect();
            let line = assignments
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(program))
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.borrow_mut().push(line.clone());
            if !self.tools.contains(program) {
                return Err(ProbeError::Missing(program.to_string()));
            }
            let mut responses = self.responses.borrow_mut();
            let output = match responses.get_mut(&line) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            Ok(output.unwrap_or(CommandOutput {
                code: Some(0),
                ..Default::default()
            }))
        }
    }

    impl Host for FakeHost {
        fn has_tool(&self, program: &str) -> bool {
            self.tools.contains(program)
        }

        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
            self.answer(program, args)
        }

        fn run_bounded(
            &self,
            program: &str,
            args: &[&str],
            _limit: Duration,
        ) -> Result<CommandOutput, ProbeError> {
            self.answer(program, args)
        }

        fn run_streamed(
            &self,
            program: &str,
            args: &[&str],
            env: &[(&str, &str)],
        ) -> Result<CommandOutput, ProbeError> {
            self.answer_with_env(program, args, env)
        }

        fn read_file(&self, path: &str) -> Option<String> {
            self.files.get(path).cloned()
        }

        fn path_exists(&self, path: &str) -> bool {
            self.files.contains_key(path) || self.dirs.contains_key(path)
        }

        fn list_dir(&self, path: &str) -> Vec<String> {
            self.dirs.get(path).cloned().unwrap_or_default()
        }

        fn pause(&self, _duration: Duration) {}

        fn running_process(&self, names: &[&str]) -> Option<RunningProcess> {
            self.processes
                .iter()
                .enumerate()
                .find(|(_, running)| names.contains(&running.as_str()))
                .map(|(idx, running)| RunningProcess {
                    pid: 1000 + idx as u32,
                    name: running.clone(),
                })
        }

        fn is_root(&self) -> bool {
            !self.unprivileged
        }

        fn reachable(&self, _url: &str, _timeout: Duration) -> bool {
            !self.offline
        }
    }
}
