use std::path::PathBuf;
use std::time::Duration;

/// Process-level settings for one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    /// How often the worker takes one task off its queue.
    pub run_interval: Duration,
    pub stats_interval: Duration,
    /// Bound on each container-engine call (pull, create, start, stop, remove).
    pub runtime_timeout: Duration,
    /// How long container output keeps being copied after a start.
    pub log_stream_timeout: Duration,
    pub proc_root: PathBuf,
    pub disk_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "default_worker".to_string(),
            address: "127.0.0.1".to_string(),
            port: 4000,
            run_interval: Duration::from_secs(10),
            stats_interval: Duration::from_secs(15),
            runtime_timeout: Duration::from_secs(30),
            log_stream_timeout: Duration::from_secs(60),
            proc_root: PathBuf::from("/proc"),
            disk_path: PathBuf::from("/"),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: &str, address: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port,
            ..Default::default()
        }
    }
}
