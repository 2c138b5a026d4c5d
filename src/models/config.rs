use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub bus_url: Option<String>,
    #[serde(default = "default_min_db_connections")]
    pub min_db_connections: u32,
    #[serde(default = "default_max_db_connections")]
    pub max_db_connections: u32,
    #[serde(default = "default_scheduler_timezone")]
    pub scheduler_timezone_default: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_cleanup_interval_sec")]
    pub cleanup_interval_sec: u64,
    #[serde(default = "default_reconcile_interval_sec")]
    pub reconcile_interval_sec: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8177
}

fn default_database_url() -> String {
    "sqlite://alarms.db".to_string()
}

fn default_min_db_connections() -> u32 {
    5
}

fn default_max_db_connections() -> u32 {
    20
}

fn default_scheduler_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_worker_threads() -> usize {
    8
}

fn default_cleanup_interval_sec() -> u64 {
    600
}

fn default_reconcile_interval_sec() -> u64 {
    600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: default_database_url(),
            bus_url: None,
            min_db_connections: default_min_db_connections(),
            max_db_connections: default_max_db_connections(),
            scheduler_timezone_default: default_scheduler_timezone(),
            worker_threads: default_worker_threads(),
            cleanup_interval_sec: default_cleanup_interval_sec(),
            reconcile_interval_sec: default_reconcile_interval_sec(),
        }
    }
}

impl SchedulerConfig {
    /// Overlays recognized environment variables onto an existing config, matching the precedence
    /// documented for deployments: file config first, environment last.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("BUS_URL") {
            self.bus_url = Some(v);
        }
        if let Ok(v) = std::env::var("MIN_DB_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.min_db_connections = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_DB_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.max_db_connections = n;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_TIMEZONE_DEFAULT") {
            self.scheduler_timezone_default = v;
        }
        if let Ok(v) = std::env::var("WORKER_THREADS") {
            if let Ok(n) = v.parse() {
                self.worker_threads = n;
            }
        }
        if let Ok(v) = std::env::var("CLEANUP_INTERVAL_SEC") {
            if let Ok(n) = v.parse() {
                self.cleanup_interval_sec = n;
            }
        }
        if let Ok(v) = std::env::var("RECONCILE_INTERVAL_SEC") {
            if let Ok(n) = v.parse() {
                self.reconcile_interval_sec = n;
            }
        }
        self
    }
}
