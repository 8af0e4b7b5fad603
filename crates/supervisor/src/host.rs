//! Launching, watching and stopping one child server process.

use crate::config::{config_file_name, render_config};
use crate::paths::{binary_name, SimPaths};
use geosim_types::{ServerKind, SharedServer};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// How long `start` waits for the readiness marker on stdout.
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `start` waits for the LOC registration round-trip after
/// readiness.
const LOC_INIT_TIMEOUT: Duration = Duration::from_secs(45);

/// How long `stop` waits for a clean exit after the newline nudge.
const STOP_TIMEOUT: Duration = Duration::from_secs(20);

/// Readiness marker printed by profile servers.
const PROFILE_READY_MARKER: &str = "ENTER";

/// Readiness marker printed by proximity servers; the same line arms the
/// deferred network-id assignment.
const PROXIMITY_READY_MARKER: &str = "Location initialization completed";

/// Log lines containing any of these are not counted as failures.
const LOG_ALLOWLIST: &[&str] = &["Connection reset by peer", "Broken pipe"];

/// Errors from supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Filesystem or process I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Child never printed its readiness marker.
    #[error("server {name} failed to print '{marker}' within {timeout:?}")]
    ReadyTimeout {
        name: String,
        marker: &'static str,
        timeout: Duration,
    },

    /// Child never completed the LOC registration round-trip.
    #[error("server {name} did not complete LOC initialization within {timeout:?}")]
    LocInitTimeout { name: String, timeout: Duration },

    /// Child exited before becoming ready.
    #[error("server {name} exited before readiness ({status})")]
    EarlyExit {
        name: String,
        status: std::process::ExitStatus,
    },

    /// TLS material could not be generated.
    #[error("certificate generation failed: {0}")]
    Certificate(String),
}

/// Result alias for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Error/warning counts from an instance's log files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub errors: usize,
    pub warnings: usize,
}

struct RunningChild {
    child: Child,
    stdin: ChildStdin,
}

/// Supervises one managed server's child process.
pub struct ServerHost {
    server: SharedServer,
    instance_dir: PathBuf,
    executable: PathBuf,
    marker_tx: watch::Sender<bool>,
    running: Option<RunningChild>,
}

impl ServerHost {
    /// Create a host for `server`, rooted in the simulator paths.
    pub fn new(server: SharedServer, paths: &SimPaths) -> Self {
        let (kind, name) = {
            let inner = server.lock();
            (inner.kind, inner.name.clone())
        };
        let instance_dir = paths.instance_dir(kind, &name);
        let executable = instance_dir.join(binary_name(kind));
        let (marker_tx, _) = watch::channel(false);
        Self {
            server,
            instance_dir,
            executable,
            marker_tx,
            running: None,
        }
    }

    /// Watch that fires when a proximity child prints its location-init
    /// marker; handed to the server's LOC endpoint.
    pub fn marker_receiver(&self) -> watch::Receiver<bool> {
        self.marker_tx.subscribe()
    }

    /// The instance directory of this server.
    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    /// Whether a child process is currently attached.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Populate the instance directory: binary template copy, generated
    /// configuration, TLS material and the runtime subdirectories.
    pub fn init_instance(&self, paths: &SimPaths) -> SupervisorResult<()> {
        let (kind, name) = {
            let inner = self.server.lock();
            (inner.kind, inner.name.clone())
        };

        if self.instance_dir.exists() {
            std::fs::remove_dir_all(&self.instance_dir)?;
        }
        std::fs::create_dir_all(&self.instance_dir)?;

        let template = paths.template_dir(kind);
        if template.exists() {
            copy_dir_recursive(&template, &self.instance_dir)?;
        } else {
            debug!(server = %name, template = %template.display(), "no binary template");
        }

        for sub in ["Logs", "tmp", "images"] {
            std::fs::create_dir_all(self.instance_dir.join(sub))?;
        }

        let config = render_config(&self.server.lock());
        std::fs::write(self.instance_dir.join(config_file_name(kind)), config)?;

        self.write_tls_material(&name)?;

        info!(server = %name, dir = %self.instance_dir.display(), "instance initialized");
        Ok(())
    }

    /// Launch the child and wait for readiness plus LOC initialization.
    pub async fn start(&mut self) -> SupervisorResult<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let (kind, name) = {
            let inner = self.server.lock();
            (inner.kind, inner.name.clone())
        };
        let ready_marker = match kind {
            ServerKind::Profile => PROFILE_READY_MARKER,
            ServerKind::Proximity => PROXIMITY_READY_MARKER,
        };

        // A restarted child must re-arm the location marker.
        self.marker_tx.send_replace(false);

        info!(server = %name, executable = %self.executable.display(), "starting child");
        let mut child = Command::new(&self.executable)
            .current_dir(&self.instance_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SupervisorError::Io(std::io::Error::other("child stdin not piped"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SupervisorError::Io(std::io::Error::other("child stdout not piped"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SupervisorError::Io(std::io::Error::other("child stderr not piped"))
        })?;

        let (ready_tx, mut ready_rx) = watch::channel(false);
        tokio::spawn(pump_stdout(
            name.clone(),
            stdout,
            ready_marker,
            ready_tx,
            match kind {
                ServerKind::Proximity => Some(self.marker_tx.clone()),
                ServerKind::Profile => None,
            },
        ));
        tokio::spawn(pump_stderr(name.clone(), stderr));

        // Readiness: marker on stdout, bounded; an early exit is reported
        // with its status instead of a timeout.
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                return Err(SupervisorError::EarlyExit { name, status });
            }
            ready = timeout(READY_TIMEOUT, wait_true(&mut ready_rx)) => {
                if ready.is_err() {
                    let _ = child.kill().await;
                    return Err(SupervisorError::ReadyTimeout {
                        name,
                        marker: ready_marker,
                        timeout: READY_TIMEOUT,
                    });
                }
            }
        }

        // LOC initialization: the RegisterService round-trip has completed
        // once the shared state flips to initialized.
        let deadline = tokio::time::Instant::now() + LOC_INIT_TIMEOUT;
        while !self.server.lock().is_initialized() {
            if tokio::time::Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(SupervisorError::LocInitTimeout {
                    name,
                    timeout: LOC_INIT_TIMEOUT,
                });
            }
            sleep(Duration::from_millis(100)).await;
        }

        info!(server = %name, "child ready and LOC-initialized");
        self.running = Some(RunningChild { child, stdin });
        Ok(())
    }

    /// Stop the child: newline on stdin, bounded wait, then kill.
    pub async fn stop(&mut self) -> SupervisorResult<()> {
        let name = self.server.name();
        let Some(mut running) = self.running.take() else {
            warn!(server = %name, "stop requested but child not running");
            return Ok(());
        };

        // The child treats a line on stdin as the shutdown request.
        if let Err(e) = running.stdin.write_all(b"\n").await {
            debug!(server = %name, error = %e, "stdin nudge failed");
        }
        let _ = running.stdin.flush().await;

        match timeout(STOP_TIMEOUT, running.child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(server = %name, status = %status, "child exited");
            }
            Err(_) => {
                warn!(server = %name, "child ignored shutdown request, killing");
                let _ = running.child.kill().await;
            }
        }

        self.marker_tx.send_replace(false);
        self.server.lock().uninitialize();
        Ok(())
    }

    /// Count `] ERROR:` and `] WARN:` lines across the instance's log
    /// files, modulo the allowlist.
    pub fn scan_logs(&self) -> SupervisorResult<LogStats> {
        let logs_dir = self.instance_dir.join("Logs");
        let mut stats = LogStats::default();
        if !logs_dir.exists() {
            return Ok(stats);
        }
        for entry in std::fs::read_dir(&logs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            let text = String::from_utf8_lossy(&bytes);
            for line in text.lines() {
                if LOG_ALLOWLIST.iter().any(|allowed| line.contains(allowed)) {
                    continue;
                }
                if line.contains("] ERROR:") {
                    stats.errors += 1;
                } else if line.contains("] WARN:") {
                    stats.warnings += 1;
                }
            }
        }
        Ok(stats)
    }

    fn write_tls_material(&self, name: &str) -> SupervisorResult<()> {
        let cert = rcgen::generate_simple_self_signed(vec![name.to_string()])
            .map_err(|e| SupervisorError::Certificate(e.to_string()))?;
        let pem = format!("{}{}", cert.cert.pem(), cert.key_pair.serialize_pem());
        std::fs::write(self.instance_dir.join("server.pem"), pem)?;
        Ok(())
    }
}

async fn pump_stdout(
    name: String,
    stdout: tokio::process::ChildStdout,
    ready_marker: &'static str,
    ready_tx: watch::Sender<bool>,
    marker_tx: Option<watch::Sender<bool>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(server = %name, "stdout: {line}");
                if line.contains(ready_marker) {
                    let _ = ready_tx.send(true);
                    if let Some(marker_tx) = &marker_tx {
                        marker_tx.send_replace(true);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(server = %name, error = %e, "stdout pump failed");
                break;
            }
        }
    }
}

async fn pump_stderr(name: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %name, "stderr: {line}");
    }
}

async fn wait_true(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosim_types::{GpsLocation, NetworkId, ServerInner};
    use tempfile::TempDir;

    fn make_host(tmp: &TempDir, name: &str, base_port: u16) -> ServerHost {
        let location = GpsLocation::new(10.0, 20.0).unwrap();
        let server = SharedServer::new(ServerInner::new(
            name,
            ServerKind::Profile,
            location,
            base_port,
        ));
        ServerHost::new(server, &SimPaths::new(tmp.path()))
    }

    fn install_script(host: &ServerHost, script: &str) {
        std::fs::create_dir_all(host.instance_dir()).unwrap();
        let path = host.instance_dir().join("ProfileServer");
        std::fs::write(&path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
    }

    #[test]
    fn init_instance_writes_config_and_tls() {
        let tmp = TempDir::new().unwrap();
        let host = make_host(&tmp, "A001", 10000);
        host.init_instance(&SimPaths::new(tmp.path())).unwrap();

        let config =
            std::fs::read_to_string(host.instance_dir().join("ProfileServer.conf")).unwrap();
        assert!(config.contains("loc_port = 10000"));
        let pem = std::fs::read_to_string(host.instance_dir().join("server.pem")).unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
        assert!(pem.contains("PRIVATE KEY"));
        assert!(host.instance_dir().join("Logs").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_waits_for_marker_and_stop_nudges_stdin() {
        let tmp = TempDir::new().unwrap();
        let mut host = make_host(&tmp, "A001", 10100);
        // Pre-initialize so the LOC wait passes immediately.
        host.server.complete_initialization(NetworkId([1u8; 32]));
        install_script(&mut host, "#!/bin/sh\necho ENTER\nread _line\nexit 0\n");

        host.start().await.unwrap();
        assert!(host.is_running());

        host.stop().await.unwrap();
        assert!(!host.is_running());
        assert!(!host.server.lock().is_initialized());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_reported_with_status() {
        let tmp = TempDir::new().unwrap();
        let mut host = make_host(&tmp, "A001", 10200);
        install_script(&mut host, "#!/bin/sh\nexit 3\n");

        match host.start().await {
            Err(SupervisorError::EarlyExit { name, .. }) => assert_eq!(name, "A001"),
            other => panic!("expected EarlyExit, got {other:?}"),
        }
    }

    #[test]
    fn log_scan_counts_modulo_allowlist() {
        let tmp = TempDir::new().unwrap();
        let host = make_host(&tmp, "A001", 10300);
        let logs = host.instance_dir().join("Logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(
            logs.join("server.log"),
            "\
[1] INFO: fine\n\
[2] ERROR: broke\n\
[3] WARN: odd\n\
[4] ERROR: socket Connection reset by peer\n\
[5] WARN: pipe Broken pipe\n",
        )
        .unwrap();

        let stats = host.scan_logs().unwrap();
        assert_eq!(stats, LogStats { errors: 1, warnings: 1 });
    }
}
