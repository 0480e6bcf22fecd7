use std::{error::Error, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use cube_worker::{
    config::WorkerConfig,
    tasks::types::DockerClient,
    worker::{
        types::{ProcfsProvider, TaskServer, Worker},
        worker::{collect_stats, run_tasks},
    },
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cube-worker")]
#[command(version)]
#[command(about = "Runs container tasks on this host and reports its resource usage")]
struct Args {
    /// Worker name
    #[arg(long, default_value = "default_worker")]
    name: String,

    /// Address the task API listens on
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Port the task API listens on
    #[arg(long, default_value = "4000")]
    port: u16,

    /// Seconds between queue checks
    #[arg(long, default_value = "10")]
    run_interval: u64,

    /// Seconds between stats collections
    #[arg(long, default_value = "15")]
    stats_interval: u64,

    /// Seconds allowed for each container engine call
    #[arg(long, default_value = "30")]
    runtime_timeout: u64,

    /// Seconds to keep copying a started container's logs
    #[arg(long, default_value = "60")]
    log_stream_timeout: u64,

    /// Where the proc filesystem is mounted
    #[arg(long, default_value = "/proc")]
    proc_root: PathBuf,

    /// Path whose filesystem is reported as disk usage
    #[arg(long, default_value = "/")]
    disk_path: PathBuf,
}

impl From<Args> for WorkerConfig {
    fn from(args: Args) -> Self {
        WorkerConfig {
            run_interval: Duration::from_secs(args.run_interval),
            stats_interval: Duration::from_secs(args.stats_interval),
            runtime_timeout: Duration::from_secs(args.runtime_timeout),
            log_stream_timeout: Duration::from_secs(args.log_stream_timeout),
            proc_root: args.proc_root,
            disk_path: args.disk_path,
            ..WorkerConfig::new(&args.name, &args.address, args.port)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from(Args::parse());
    tracing::info!(worker = %config.name, "Starting cube worker");

    let runtime = DockerClient::new(config.runtime_timeout, config.log_stream_timeout)?;
    let worker = Arc::new(Worker::new(&config.name, Arc::new(runtime)));
    let provider = Arc::new(ProcfsProvider::new(&config.proc_root, &config.disk_path));

    tokio::spawn(run_tasks(worker.clone(), config.run_interval));
    tokio::spawn(collect_stats(worker.clone(), provider, config.stats_interval));

    TaskServer::new(worker, &config.address, config.port)
        .start_server()
        .await?;

    Ok(())
}
