//! Process bootstrap: PID-file single-instance enforcement, config resolution, data-dir layout,
//! dual stderr/rotating-file logging, and the startup/shutdown sequencing that wires the store,
//! index, controller, tick loop, and HTTP façade together into one running process.
//!
//! Runs foreground-only. The platform config this codebase was grown from also ships a
//! background-service mode (Windows service registration, a launchd/systemd unit) driven through
//! its own CLI subcommands; this deployment has no install/uninstall operation in its façade, so
//! that machinery has no counterpart here and was not carried over.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use crate::bus::{Bus, BroadcastBus};
use crate::controller::Controller;
use crate::models::SchedulerConfig;
use crate::scheduler::{Clock, SchedulerIndex, SystemClock, Ticker};
use crate::server::{self, AppState};
use crate::storage::sqlite::SqliteAlarmStore;
use crate::storage::AlarmStore;

// ---------------------------------------------------------------------------
// PidFile — exclusive PID file acquisition
// ---------------------------------------------------------------------------

/// Ensures only one daemon instance runs against a given data directory at a time, via exclusive
/// file creation (`O_EXCL`/`CREATE_NEW`). A stale PID file — one whose recorded process no longer
/// exists — is removed and the slot reacquired rather than treated as a hard conflict.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Acquire the PID file, waiting up to 10s for a still-alive previous owner to exit (covers
    /// the restart window where the old process is mid-shutdown).
    pub fn acquire(&self) -> Result<()> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path).context("failed to read existing PID file")?;
            let existing_pid: u32 = content
                .trim()
                .parse()
                .context("failed to parse PID from PID file")?;

            if is_process_alive(existing_pid) {
                let mut acquired = false;
                for attempt in 0..20 {
                    tracing::info!(
                        "PID {} is still alive, waiting for it to exit (attempt {}/20)...",
                        existing_pid,
                        attempt + 1
                    );
                    std::thread::sleep(std::time::Duration::from_millis(500));
                    if !is_process_alive(existing_pid) {
                        acquired = true;
                        break;
                    }
                }
                if !acquired {
                    return Err(anyhow::anyhow!(
                        "alarmd is already running (PID {existing_pid}). PID file: {}",
                        self.path.display()
                    ));
                }
            }

            tracing::warn!("removing stale PID file (PID {} is no longer running)", existing_pid);
            std::fs::remove_file(&self.path).context("failed to remove stale PID file")?;
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .context("failed to create PID file (exclusive create)")?;

        let pid = std::process::id();
        write!(file, "{pid}").context("failed to write PID to PID file")?;
        file.flush().context("failed to flush PID file")?;

        tracing::info!("PID file acquired: {} (PID {})", self.path.display(), pid);
        Ok(())
    }

    pub fn release(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("failed to remove PID file")?;
            tracing::info!("PID file released: {}", self.path.display());
        }
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) => is_process_alive(pid),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Unix: `kill(pid, 0)` tests existence without signaling. Non-unix targets have no liveness
/// syscall wired up here, so a PID file's mere existence is treated as liveness (a platform gap,
/// not an oversight — noted rather than silently papered over).
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Resolve `SchedulerConfig` in order:
///   1. `--config` path, if given
///   2. `ALARMD_CONFIG_DIR` environment variable
///   3. Platform config dir (`dirs::config_dir()/alarmd/config.json`)
///   4. `SchedulerConfig::default()`
/// Each step applies `apply_env_overrides()` afterward so individual recognized env vars always
/// win regardless of which file (if any) supplied the base.
pub fn load_config(config_path: Option<&Path>) -> Result<SchedulerConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            let config: SchedulerConfig =
                serde_json::from_str(&content).context("failed to parse config file")?;
            tracing::info!("loaded config from: {}", path.display());
            return Ok(config.apply_env_overrides());
        }
        return Err(anyhow::anyhow!("config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("ALARMD_CONFIG_DIR") {
        let path = PathBuf::from(&config_dir).join("config.json");
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("failed to read config from ALARMD_CONFIG_DIR")?;
            let config: SchedulerConfig =
                serde_json::from_str(&content).context("failed to parse config from ALARMD_CONFIG_DIR")?;
            tracing::info!("loaded config from ALARMD_CONFIG_DIR: {}", path.display());
            return Ok(config.apply_env_overrides());
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("alarmd").join("config.json");
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("failed to read config from platform config dir")?;
            let config: SchedulerConfig =
                serde_json::from_str(&content).context("failed to parse config from platform config dir")?;
            tracing::info!("loaded config from: {}", path.display());
            return Ok(config.apply_env_overrides());
        }
    }

    tracing::info!("no config file found, using defaults");
    Ok(SchedulerConfig::default().apply_env_overrides())
}

/// Platform data directory, overridable by `--data-dir` then `ALARMD_DATA_DIR`.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    if let Ok(d) = std::env::var("ALARMD_DATA_DIR") {
        return PathBuf::from(d);
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .expect("LOCALAPPDATA environment variable must be set on Windows")
            .join("alarmd")
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("alarmd")
    }
}

pub async fn create_data_dirs(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("failed to create data directory")?;
    tracing::info!("data directory ensured at: {}", data_dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// SizeManagedWriter — alarmd.log writer with automatic size management
// ---------------------------------------------------------------------------

const DAEMON_LOG_MAX_BYTES: u64 = 1_073_741_824;

/// Backing writer for `tracing_appender::non_blocking`'s file layer: tracks cumulative bytes and
/// drops the oldest 25% of the file (at the next newline boundary) once it crosses `max_size`, so
/// `alarmd.log` never grows unbounded under a long-running daemon.
struct SizeManagedWriter {
    file: std::fs::File,
    path: PathBuf,
    bytes_written: u64,
    max_size: u64,
}

impl SizeManagedWriter {
    fn new(path: PathBuf, max_size: u64) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            file,
            path,
            bytes_written,
            max_size,
        })
    }

    fn truncate_oldest_quarter(&mut self) -> std::io::Result<()> {
        let content = std::fs::read(&self.path)?;
        if content.is_empty() {
            self.bytes_written = 0;
            return Ok(());
        }

        let quarter = content.len() / 4;
        let cut_point = match content[quarter..].iter().position(|&b| b == b'\n') {
            Some(offset) => quarter + offset + 1,
            None => {
                self.bytes_written = content.len() as u64;
                return Ok(());
            }
        };

        if cut_point >= content.len() {
            self.file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.bytes_written = 0;
            return Ok(());
        }

        let retained = &content[cut_point..];
        let tmp_path = self.path.with_extension("log.tmp");
        std::fs::write(&tmp_path, retained)?;
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.bytes_written = retained.len() as u64;
        Ok(())
    }
}

impl Write for SizeManagedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.bytes_written += n as u64;
        if self.bytes_written >= self.max_size {
            if let Err(e) = self.truncate_oldest_quarter() {
                eprintln!("WARNING: alarmd.log truncation failed: {e}. Log file may grow beyond {}.", self.max_size);
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Initializes tracing: always stderr, and a size-managed `alarmd.log` file layer when the data
/// directory is writable. Falls back to stderr-only if the log file can't be opened.
fn init_tracing(data_dir: &Path) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let log_path = data_dir.join("alarmd.log");

    match SizeManagedWriter::new(log_path.clone(), DAEMON_LOG_MAX_BYTES) {
        Ok(writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            if result.is_ok() {
                tracing::info!("logging to stderr and {}", log_path.display());
            }
            std::mem::forget(guard);
        }
        Err(e) => {
            let result = tracing_subscriber::registry().with(env_filter).with(stderr_layer).try_init();
            if result.is_ok() {
                tracing::warn!("could not open log file {}: {e}. Logging to stderr only.", log_path.display());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon bootstrap
// ---------------------------------------------------------------------------

pub struct StartOptions<'a> {
    pub config_path: Option<&'a Path>,
    pub data_dir_override: Option<&'a Path>,
    pub host_override: Option<&'a str>,
    pub port_override: Option<u16>,
}

/// Start the daemon: load config, create data directories, bring up storage, cold-start the
/// scheduler index, wire the controller and tick loop, bind the HTTP façade, then block until a
/// shutdown signal arrives and tear everything down in reverse order.
pub async fn start_daemon(opts: StartOptions<'_>) -> Result<()> {
    let mut config = load_config(opts.config_path)?;
    if let Some(h) = opts.host_override {
        config.host = h.to_string();
    }
    if let Some(p) = opts.port_override {
        config.port = p;
    }
    let config = Arc::new(config);

    let data_dir = resolve_data_dir(opts.data_dir_override);
    create_data_dirs(&data_dir).await?;
    init_tracing(&data_dir);

    let pid_file = PidFile::new(data_dir.join("alarmd.pid"));
    pid_file.acquire()?;

    let store: Arc<dyn AlarmStore> = Arc::new(
        SqliteAlarmStore::connect(&config.database_url, config.min_db_connections, config.max_db_connections)
            .await
            .context("failed to connect to alarm store")?,
    );
    let bus: Arc<dyn Bus> = Arc::new(BroadcastBus::new(1024));
    let index = Arc::new(SchedulerIndex::new());
    let controller = Arc::new(Controller::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&index),
        config.worker_threads,
    ));

    let indexed = controller
        .cold_start()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("cold start failed")?;
    tracing::info!("cold start indexed {indexed} scheduled alarms");

    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<Vec<String>>(64);
    let (last_tick_tx, last_tick_rx) = watch::channel(chrono::Utc::now());
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let tick_clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ticker = Ticker::new(Arc::clone(&index), tick_clock);
    let tick_handle = tokio::spawn(crate::scheduler::run_tick_loop(
        ticker,
        dispatch_tx,
        last_tick_tx,
        shutdown_rx.clone(),
    ));

    let dispatch_controller = Arc::clone(&controller);
    let dispatch_handle = tokio::spawn(async move {
        while let Some(code_ids) = dispatch_rx.recv().await {
            dispatch_controller.handle_tick_batch(code_ids, chrono::Utc::now()).await;
        }
    });

    let reconcile_controller = Arc::clone(&controller);
    let reconcile_interval = config.reconcile_interval_sec;
    let mut reconcile_shutdown = shutdown_rx.clone();
    let reconcile_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(reconcile_interval.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match reconcile_controller.reconcile().await {
                        Ok(report) if report.added_to_index > 0 => {
                            tracing::info!(added = report.added_to_index, "reconcile repaired index drift");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "reconcile failed"),
                    }
                }
                _ = reconcile_shutdown.changed() => return,
            }
        }
    });

    let cleanup_controller = Arc::clone(&controller);
    let cleanup_interval = config.cleanup_interval_sec;
    let mut cleanup_shutdown = shutdown_rx.clone();
    let cleanup_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(cleanup_interval.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match cleanup_controller.cleanup(chrono::Duration::hours(24)).await {
                        Ok(n) if n > 0 => tracing::info!(deleted = n, "cleanup removed expired alarms"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "cleanup failed"),
                    }
                }
                _ = cleanup_shutdown.changed() => return,
            }
        }
    });

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        bus: Arc::clone(&bus),
        index: Arc::clone(&index),
        config: Arc::clone(&config),
        start_time: Instant::now(),
        last_tick: last_tick_rx,
    });
    let router = server::create_router(Arc::clone(&state));
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!("alarmd listening on http://{bind_addr}");

    let mut server_shutdown_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_shutdown_rx.changed().await.ok();
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .ok();
    });

    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(());

    tick_handle.abort();
    dispatch_handle.abort();
    reconcile_handle.abort();
    cleanup_handle.abort();

    graceful_shutdown(&pid_file).await;
    let _ = server_handle.await;

    tracing::info!("alarmd exited cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler, Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl+C signal"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM signal"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received Ctrl+C signal");
}

/// Per-process teardown: releases the PID file. Stopping new HTTP connections and the tick loop
/// happens in `start_daemon` itself (the caller aborts those tasks before reaching here); there is
/// no child-process tree to kill and no per-run status records to update, unlike a job-execution
/// daemon's shutdown sequence — alarms have no in-flight subprocess state to reconcile.
async fn graceful_shutdown(pid_file: &PidFile) {
    tracing::info!("beginning graceful shutdown sequence...");
    if let Err(e) = pid_file.release() {
        tracing::error!(error = %e, "failed to release PID file");
    }
    tracing::info!("graceful shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_file_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("alarmd.pid"));
        pid_file.acquire().unwrap();
        assert!(pid_file.is_alive());
        pid_file.release().unwrap();
        assert!(!pid_file.is_alive());
    }

    #[test]
    fn test_pid_file_removes_stale_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alarmd.pid");
        std::fs::write(&path, "999999999").unwrap();
        let pid_file = PidFile::new(path);
        pid_file.acquire().unwrap();
        assert!(pid_file.is_alive());
    }

    #[test]
    fn test_load_config_defaults_when_no_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.port, 8177);
    }

    #[test]
    fn test_load_config_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9191}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.port, 9191);
    }

    #[test]
    fn test_load_config_missing_explicit_path_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_resolve_data_dir_override_wins() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_data_dir(Some(dir.path()));
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn test_size_managed_writer_truncates_oldest_quarter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alarmd.log");
        let mut writer = SizeManagedWriter::new(path.clone(), 100).unwrap();
        for i in 0..30 {
            writeln!(writer, "line {i} padding padding padding").unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.len() < 30 * 30);
        assert!(content.contains("line 29"));
    }
}
