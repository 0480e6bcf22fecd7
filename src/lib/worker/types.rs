use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::tasks::types::{ContainerRuntime, RuntimeError, State, Task};
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::Arc,
};

pub struct Worker {
    pub name: String,
    pub(crate) queue: Mutex<VecDeque<Task>>,
    pub(crate) db: RwLock<HashMap<Uuid, Task>>,
    pub(crate) stats: RwLock<Stats>,
    /// Held for the whole of one `run_task` so transitions are applied one at a time.
    pub(crate) dispatch: Mutex<()>,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
}

/// Contents of `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Usage of the filesystem holding the configured disk path, in bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskInfo {
    pub all: u64,
    pub used: u64,
    pub free: u64,
}

/// Aggregate `cpu` line of `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadAvg {
    pub last1: f64,
    pub last5: f64,
    pub last15: f64,
    pub process_running: u64,
    pub process_total: u64,
    pub last_pid: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub mem_stats: MemInfo,
    pub disk_stats: DiskInfo,
    pub cpu_stats: CpuStat,
    pub load_stats: LoadAvg,
    pub task_count: usize,
    pub errors: Vec<StatsError>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("error reading from {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("error parsing {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("no disk mounted at or above {0}")]
    DiskNotFound(PathBuf),
}

pub trait StatsProvider: Send + Sync {
    fn memory(&self) -> Result<MemInfo, StatsError>;
    fn disk(&self) -> Result<DiskInfo, StatsError>;
    fn cpu(&self) -> Result<CpuStat, StatsError>;
    fn load(&self) -> Result<LoadAvg, StatsError>;
}

pub struct ProcfsProvider {
    pub proc_root: PathBuf,
    pub disk_path: PathBuf,
}

pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: State, to: State },

    /// The table allows the move but the worker has nothing to run for it.
    #[error("no handler for transition from {from} to {to}")]
    UnhandledTransition { from: State, to: State },

    #[error("no task with ID {0} found")]
    TaskNotFound(Uuid),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
