//! Finds the running Discord client and makes sure it exposes DevTools,
//! restarting it with `--remote-debugging-port` when it does not.
//!
//! Restarting is visible to the user: their client window closes and comes
//! back. That only happens when the debugging flag is missing.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ScrapeConfig;
use crate::endpoint::DebugEndpoint;
use crate::error::ScrapeError;

/// An OS process that looks like the Discord client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
    /// Full command line, `args[0]` included.
    pub args: Vec<String>,
}

impl TargetProcess {
    /// Chromium renderer/GPU/utility processes share the executable name but
    /// carry a `--type=` switch.
    pub fn is_helper(&self) -> bool {
        self.args.iter().any(|arg| arg.starts_with("--type="))
    }

    pub fn has_debug_port(&self, port: u16) -> bool {
        let flag = debug_flag(port);
        self.args.iter().any(|arg| *arg == flag)
    }
}

/// What [`classify`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    NotFound,
    AlreadyDebuggable(TargetProcess),
    /// `main` must be restarted; `all` also lists its helpers, which go down
    /// with it.
    NeedsRelaunch {
        main: TargetProcess,
        all: Vec<TargetProcess>,
    },
}

pub fn debug_flag(port: u16) -> String {
    format!("--remote-debugging-port={port}")
}

/// Arguments for restarting `process` with DevTools on `port`: its previous
/// arguments without `argv[0]` or any earlier debugging port, plus the flag.
pub fn relaunch_args(process: &TargetProcess, port: u16) -> Vec<String> {
    let mut args: Vec<String> = process
        .args
        .iter()
        .skip(1)
        .filter(|arg| !arg.starts_with("--remote-debugging-port="))
        .cloned()
        .collect();
    args.push(debug_flag(port));
    args
}

/// Decide what to do given a process listing.
pub fn classify(processes: Vec<TargetProcess>, executable_names: &[String], port: u16) -> Discovery {
    let matching: Vec<TargetProcess> = processes
        .into_iter()
        .filter(|p| executable_names.iter().any(|name| name.eq_ignore_ascii_case(&p.name)))
        .collect();

    if let Some(debuggable) = matching.iter().find(|p| !p.is_helper() && p.has_debug_port(port)) {
        return Discovery::AlreadyDebuggable(debuggable.clone());
    }

    match matching.iter().find(|p| !p.is_helper()).cloned() {
        Some(main) => Discovery::NeedsRelaunch { main, all: matching },
        None => Discovery::NotFound,
    }
}

/// Regex for the line Chromium prints once DevTools is listening on `port`.
pub fn banner_regex(port: u16) -> Result<Regex, ScrapeError> {
    Regex::new(&format!(
        r"DevTools listening on ws://127\.0\.0\.1:{port}/devtools/browser/(\S+)"
    ))
    .map_err(|e| ScrapeError::LaunchFailed(format!("banner pattern: {e}")))
}

/// Browser id from a DevTools banner line, if the line is one.
pub fn parse_devtools_banner(line: &str, port: u16) -> Option<String> {
    banner_regex(port)
        .ok()?
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Read launch output until the DevTools banner appears. Ends with
/// [`ScrapeError::LaunchFailed`] when output stops first or `timeout` runs out.
pub async fn scan_launch_output<R>(lines: &mut Lines<R>, port: u16, timeout: Duration) -> Result<String, ScrapeError>
where
    R: AsyncBufRead + Unpin,
{
    let banner = banner_regex(port)?;
    let scan = async {
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ScrapeError::LaunchFailed(format!("reading client output: {e}")))?
        {
            trace!(line = %line, "client output");
            if let Some(id) = banner.captures(line.trim()).and_then(|caps| caps.get(1)) {
                return Ok(id.as_str().to_string());
            }
        }
        Err(ScrapeError::LaunchFailed(
            "client exited before announcing a DevTools endpoint".into(),
        ))
    };

    tokio::time::timeout(timeout, scan).await.map_err(|_| {
        ScrapeError::LaunchFailed(format!("no DevTools banner within {timeout:?}"))
    })?
}

pub struct ProcessSupervisor {
    executable_names: Vec<String>,
    port: u16,
    launch_timeout: Duration,
    exit_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(executable_names: Vec<String>, port: u16) -> Self {
        let defaults = ScrapeConfig::default();
        Self {
            executable_names,
            port,
            launch_timeout: defaults.launch_timeout,
            exit_grace: defaults.exit_grace,
        }
    }

    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            executable_names: config.executable_names.clone(),
            port: config.debug_port,
            launch_timeout: config.launch_timeout,
            exit_grace: config.exit_grace,
        }
    }

    pub fn with_timeouts(mut self, launch_timeout: Duration, exit_grace: Duration) -> Self {
        self.launch_timeout = launch_timeout;
        self.exit_grace = exit_grace;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current process table as [`TargetProcess`] values.
    pub fn snapshot_processes(&self) -> Vec<TargetProcess> {
        let mut system = System::new();
        // Command lines are not loaded by a plain refresh.
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_exe(UpdateKind::OnlyIfNotSet),
        );
        system
            .processes()
            .values()
            .filter(|process| process.status() != ProcessStatus::Zombie)
            .map(|process| TargetProcess {
                pid: process.pid().as_u32(),
                name: process.name().to_string_lossy().to_string(),
                exe: process.exe().map(|p| p.to_path_buf()),
                args: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .collect(),
            })
            .collect()
    }

    #[instrument(skip(self), fields(port = self.port))]
    pub async fn ensure_debug_mode(&self) -> Result<DebugEndpoint, ScrapeError> {
        match classify(self.snapshot_processes(), &self.executable_names, self.port) {
            Discovery::NotFound => Err(ScrapeError::ProcessNotFound(self.executable_names.join(", "))),
            Discovery::AlreadyDebuggable(process) => {
                info!(pid = process.pid, "Client already exposes DevTools");
                Ok(DebugEndpoint::new(self.port))
            }
            Discovery::NeedsRelaunch { main, all } => self.relaunch(main, all).await,
        }
    }

    async fn relaunch(&self, main: TargetProcess, all: Vec<TargetProcess>) -> Result<DebugEndpoint, ScrapeError> {
        let exe = main
            .exe
            .clone()
            .ok_or_else(|| ScrapeError::LaunchFailed(format!("no executable path for pid {}", main.pid)))?;

        info!(pid = main.pid, exe = %exe.display(), "Restarting client with remote debugging");
        self.terminate(&all).await;

        let args = relaunch_args(&main, self.port);

        let mut child = tokio::process::Command::new(&exe)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScrapeError::LaunchFailed(format!("spawning {}: {e}", exe.display())))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScrapeError::LaunchFailed("client stderr was not captured".into()))?;
        let mut lines = BufReader::new(stderr).lines();

        let browser_id = scan_launch_output(&mut lines, self.port, self.launch_timeout).await?;
        info!(pid = child.id(), browser_id = %browser_id, "Client is listening for DevTools");

        // Keep the pipe drained so the client never blocks writing to it.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(line = %line, "client output");
            }
            match child.wait().await {
                Ok(status) => debug!(%status, "Relaunched client exited"),
                Err(e) => debug!(error = %e, "Lost track of relaunched client"),
            }
        });

        Ok(DebugEndpoint::with_browser_id(self.port, &browser_id))
    }

    /// Kill every listed process and wait, bounded, for them to disappear.
    async fn terminate(&self, processes: &[TargetProcess]) {
        let pids: Vec<Pid> = processes.iter().map(|p| Pid::from_u32(p.pid)).collect();
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, ProcessRefreshKind::nothing());

        for pid in &pids {
            if let Some(process) = system.process(*pid) {
                if !process.kill() {
                    warn!(pid = pid.as_u32(), "Kill signal was not delivered");
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.exit_grace;
        loop {
            system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, ProcessRefreshKind::nothing());
            let alive = pids
                .iter()
                .filter_map(|pid| system.process(*pid))
                .filter(|process| process.status() != ProcessStatus::Zombie)
                .count();
            if alive == 0 {
                debug!(killed = pids.len(), "Client processes exited");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(alive, "Client processes still running after grace period, relaunching anyway");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
