//! Launching, inspecting and stopping server processes.

use crate::core::domain::{
    error::{DevbaoError, DevbaoResult},
    model::{exec_environment::ExecEnvironment, settings::ReadinessSettings},
    value_object::{ProductType, is_server_binary},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use std::fs::OpenOptions;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const PROCESS_TARGET: &str = "devbao::process";
const LOG_TAIL_BYTES: u64 = 16 * 1024;
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signals used to stop a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Terminate,
    Kill,
}

/// Read-only view of the host's process table plus signal delivery.
///
/// Implementations report a vanished process as `ErrorKind::NotFound`.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessInspector: Send + Sync {
    /// Resolves the executable backing `pid`.
    fn executable(&self, pid: u32) -> std::io::Result<PathBuf>;

    fn signal(&self, pid: u32, signal: ProcessSignal) -> std::io::Result<()>;

    /// Whether spawned servers may lock memory.
    fn is_privileged(&self) -> bool;
}

/// Inspector backed by the running operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl ProcessInspector for SystemInspector {
    #[cfg(target_os = "linux")]
    fn executable(&self, pid: u32) -> std::io::Result<PathBuf> {
        let link = std::fs::read_link(format!("/proc/{pid}/exe"))?;
        // A replaced binary is reported as "<path> (deleted)".
        let text = link.to_string_lossy();
        match text.strip_suffix(" (deleted)") {
            Some(stripped) => Ok(PathBuf::from(stripped)),
            None => Ok(link),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn executable(&self, _pid: u32) -> std::io::Result<PathBuf> {
        Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "process executable lookup is only implemented for linux",
        ))
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: ProcessSignal) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "pid out of range"))?;
        let sig = match signal {
            ProcessSignal::Terminate => Signal::SIGTERM,
            ProcessSignal::Kill => Signal::SIGKILL,
        };
        match kill(Pid::from_raw(raw), sig) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(std::io::Error::new(ErrorKind::NotFound, "no such process")),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _pid: u32, _signal: ProcessSignal) -> std::io::Result<()> {
        Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "signals are only supported on unix",
        ))
    }

    #[cfg(unix)]
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    fn is_privileged(&self) -> bool {
        false
    }
}

/// Checks that the tracked pid still belongs to the expected server binary.
pub fn validate_running(
    inspector: &dyn ProcessInspector,
    exec: &ExecEnvironment,
) -> DevbaoResult<()> {
    if exec.pid == 0 {
        return Err(DevbaoError::NotRunning {
            pid: 0,
            reason: "no process id recorded".into(),
        });
    }

    let actual = inspector
        .executable(exec.pid)
        .map_err(|e| DevbaoError::NotRunning {
            pid: exec.pid,
            reason: format!("unable to resolve executable: {e}"),
        })?;
    let actual_name = actual
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let matches = match exec.binary_name() {
        Some(expected) if !expected.is_empty() => expected == actual_name,
        _ => is_server_binary(actual_name),
    };
    if !matches {
        return Err(DevbaoError::NotRunning {
            pid: exec.pid,
            reason: format!(
                "pid now belongs to {} instead of {}",
                actual.display(),
                exec.binary.display()
            ),
        });
    }
    Ok(())
}

/// Stops the tracked process: graceful first, forceful after `grace`.
///
/// A process that is already gone, or whose pid was reused by another
/// program, counts as stopped.
pub async fn kill(
    inspector: &dyn ProcessInspector,
    exec: &ExecEnvironment,
    grace: Duration,
) -> DevbaoResult<()> {
    if exec.pid == 0 {
        return Ok(());
    }
    if let Err(e) = validate_running(inspector, exec) {
        debug!(target: PROCESS_TARGET, pid = exec.pid, error = %e, "process already stopped");
        return Ok(());
    }

    info!(target: PROCESS_TARGET, pid = exec.pid, "terminating server");
    if !deliver(inspector, exec.pid, ProcessSignal::Terminate)? {
        return Ok(());
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if validate_running(inspector, exec).is_err() {
            return Ok(());
        }
        sleep(KILL_POLL_INTERVAL).await;
    }

    if validate_running(inspector, exec).is_ok() {
        warn!(target: PROCESS_TARGET, pid = exec.pid, "server ignored termination, killing");
        deliver(inspector, exec.pid, ProcessSignal::Kill)?;
    }
    Ok(())
}

/// Returns `false` when the process vanished before the signal arrived.
fn deliver(inspector: &dyn ProcessInspector, pid: u32, signal: ProcessSignal) -> DevbaoResult<bool> {
    match inspector.signal(pid, signal) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(DevbaoError::Signal { pid, source }),
    }
}

/// Resolves which server executable to launch for a product.
///
/// Each candidate binary name `<name>` may be overridden by the environment
/// variable `<NAME>_BINARY`; otherwise it is looked up on the search path.
#[derive(Debug, Clone, Default)]
pub struct BinaryResolver {
    overrides: HashMap<String, PathBuf>,
    search_path: Vec<PathBuf>,
}

impl BinaryResolver {
    pub fn new(overrides: HashMap<String, PathBuf>, search_path: Vec<PathBuf>) -> Self {
        Self {
            overrides,
            search_path,
        }
    }

    /// Snapshot of the current process environment.
    pub fn from_env() -> Self {
        let overrides = ProductType::Auto
            .binary_candidates()
            .iter()
            .filter_map(|name| {
                env::var_os(override_variable(name))
                    .filter(|v| !v.is_empty())
                    .map(|v| (name.to_string(), PathBuf::from(v)))
            })
            .collect();
        let search_path = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::new(overrides, search_path)
    }

    pub fn resolve(&self, product: ProductType) -> DevbaoResult<PathBuf> {
        let candidates = product.binary_candidates();
        for name in candidates {
            if let Some(path) = self.overrides.get(*name) {
                debug!(target: PROCESS_TARGET, binary = %path.display(), variable = %override_variable(name), "using binary override");
                return Ok(path.clone());
            }
            if let Some(path) = self
                .search_path
                .iter()
                .map(|dir| dir.join(name))
                .find(|path| is_executable(path))
            {
                return Ok(path);
            }
        }
        Err(DevbaoError::BinaryNotFound {
            candidates: candidates
                .iter()
                .map(|name| format!("{} or ${}", name, override_variable(name)))
                .collect(),
        })
    }
}

/// `openbao` -> `OPENBAO_BINARY`.
pub fn override_variable(binary: &str) -> String {
    format!("{}_BINARY", binary.to_ascii_uppercase())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Spawns a server and waits until it is reachable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launches `exec`, appending its output to `log_path`, and returns the pid
    /// once `exec.connection_address` accepts TCP connections.
    async fn launch(&self, exec: &ExecEnvironment, log_path: &Path) -> DevbaoResult<u32>;
}

/// Launcher that starts real operating system processes.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    readiness: ReadinessSettings,
}

impl SystemLauncher {
    pub fn new(readiness: ReadinessSettings) -> Self {
        Self { readiness }
    }
}

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, exec: &ExecEnvironment, log_path: &Path) -> DevbaoResult<u32> {
        let log = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_path)
            .map_err(|e| DevbaoError::io(log_path, e))?;
        let stderr = log.try_clone().map_err(|e| DevbaoError::io(log_path, e))?;

        let mut command = Command::new(&exec.binary);
        command
            .args(&exec.args)
            .current_dir(&exec.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr));
        // Keep the server out of the terminal's process group so that
        // interrupting a later command does not take it down.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| DevbaoError::Spawn {
            binary: exec.binary.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        info!(target: PROCESS_TARGET, pid, binary = %exec.binary.display(), address = %exec.connection_address, "spawned server");

        sleep(self.readiness.grace).await;
        let deadline = Instant::now() + self.readiness.timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| DevbaoError::io(&exec.binary, e))?
            {
                return Err(DevbaoError::ProcessExited {
                    status: status.to_string(),
                    logs: read_log_tail(log_path).await,
                });
            }
            if TcpStream::connect(&exec.connection_address).await.is_ok() {
                // The address may belong to another process; ours must outlive one interval.
                sleep(self.readiness.interval).await;
                if let Some(status) = child
                    .try_wait()
                    .map_err(|e| DevbaoError::io(&exec.binary, e))?
                {
                    warn!(target: PROCESS_TARGET, pid, address = %exec.connection_address, "address answered but the spawned server exited");
                    return Err(DevbaoError::ProcessExited {
                        status: format!(
                            "{status}; {} is served by a process this launch did not start",
                            exec.connection_address
                        ),
                        logs: read_log_tail(log_path).await,
                    });
                }
                debug!(target: PROCESS_TARGET, pid, "server accepting connections");
                return Ok(pid);
            }
            if Instant::now() >= deadline {
                let logs = read_log_tail(log_path).await;
                abandon(&mut child, pid).await;
                return Err(DevbaoError::ReadinessTimeout {
                    address: exec.connection_address.clone(),
                    timeout_ms: self.readiness.timeout.as_millis(),
                    logs,
                });
            }
            sleep(self.readiness.interval).await;
        }
    }
}

/// Kills a server that never became ready, along with anything it forked.
async fn abandon(child: &mut Child, pid: u32) {
    warn!(target: PROCESS_TARGET, pid, "killing server that never became ready");
    if pid != 0 {
        kill_process_group(pid);
    }
    if let Err(e) = child.start_kill() {
        debug!(target: PROCESS_TARGET, pid, error = %e, "server already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(target: PROCESS_TARGET, pid, error = %e, "unable to reap server");
    }
}

/// Servers are spawned as process group leaders, so their pid names the group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(errno) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(target: PROCESS_TARGET, pid, error = %errno, "unable to signal process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Last part of a log file, marked when truncated or empty.
pub async fn read_log_tail(path: &Path) -> String {
    match tail(path, LOG_TAIL_BYTES).await {
        Ok((text, _)) if text.trim().is_empty() => "(no logs)".to_string(),
        Ok((text, true)) => format!("(logs truncated)\n{text}"),
        Ok((text, false)) => text,
        Err(e) => format!("(unable to read logs from {}: {e})", path.display()),
    }
}

/// Last `lines` lines of a log file.
pub async fn read_log_lines(path: &Path, lines: usize) -> DevbaoResult<String> {
    let (text, _) = match tail(path, LOG_TAIL_BYTES * 4).await {
        Ok(found) => found,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(DevbaoError::io(path, e)),
    };
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}

async fn tail(path: &Path, limit: u64) -> std::io::Result<(String, bool)> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let truncated = len > limit;
    if truncated {
        file.seek(SeekFrom::Start(len - limit)).await?;
    }
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok((String::from_utf8_lossy(&bytes).into_owned(), truncated))
}
