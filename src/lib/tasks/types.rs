use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bollard::{Docker, models::RestartPolicyNameEnum};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Pending,
        State::Scheduled,
        State::Running,
        State::Completed,
        State::Failed,
    ];
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A container workload and the last state the worker recorded for it.
///
/// Every field is optional on the wire; anything the caller leaves out takes
/// its default, and unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    /// Set once the runtime reports a successful start, cleared by a successful stop.
    pub container_id: Option<String>,
    pub name: String,
    pub state: State,
    pub image: String,
    pub cpu: f64,
    pub memory: u64,
    pub disk: u64,
    pub env: Vec<String>,
    pub exposed_ports: HashSet<String>,
    #[serde(rename = "port_binding")]
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
    pub start_time: Option<SystemTime>,
    pub finish_time: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub timestamp: Option<SystemTime>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state: task.state,
            timestamp: Some(SystemTime::now()),
            task,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartPolicy(pub String);

impl RestartPolicy {
    pub fn to_engine_policy(&self) -> RestartPolicyNameEnum {
        // TODO: map "no", "on-failure" and "unless-stopped" once the accepted
        // policy strings are agreed.
        RestartPolicyNameEnum::ALWAYS
    }
}

/// What the runtime needs to create a container, projected from a [`Task`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub name: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub exposed_ports: HashSet<String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: RestartPolicy,
}

impl From<&Task> for Config {
    fn from(task: &Task) -> Self {
        Config {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: i64::try_from(task.memory).unwrap_or(i64::MAX),
            disk: i64::try_from(task.disk).unwrap_or(i64::MAX),
            env: task.env.clone(),
            exposed_ports: task
                .exposed_ports
                .iter()
                .map(|port| {
                    if port.contains('/') {
                        port.clone()
                    } else {
                        format!("{}/tcp", port)
                    }
                })
                .collect(),
            restart_policy: RestartPolicy(task.restart_policy.clone()),
            ..Default::default()
        }
    }
}

pub fn new_config(task: &Task) -> Config {
    Config::from(task)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("error pulling image {image}: {message}")]
    Pull { image: String, message: String },

    #[error("error creating container from image {image}: {message}")]
    Create { image: String, message: String },

    #[error("error starting container {container_id}: {message}")]
    Start { container_id: String, message: String },

    #[error("error stopping container {container_id}: {message}")]
    Stop { container_id: String, message: String },

    #[error("error removing container {container_id}: {message}")]
    Remove { container_id: String, message: String },

    #[error("{action} timed out after {after:?}")]
    Timeout { action: &'static str, after: Duration },

    #[error("task {0} has no container recorded")]
    MissingContainer(Uuid),
}

/// Outcome of one runtime call. When `error` is set the other fields are best effort.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeResult {
    pub error: Option<RuntimeError>,
    pub action: Option<String>,
    pub container_id: Option<String>,
    pub result: Option<String>,
}

impl RuntimeResult {
    pub fn with_error(err: RuntimeError) -> Self {
        RuntimeResult {
            container_id: None,
            action: None,
            result: None,
            error: Some(err),
        }
    }

    pub fn success(container_id: String, action: &str, result: &str) -> Self {
        RuntimeResult {
            container_id: Some(container_id),
            action: Some(action.to_string()),
            result: Some(result.to_string()),
            error: None,
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull, create and start a container for `config`.
    async fn start(&self, config: &Config) -> RuntimeResult;

    /// Stop and then remove the container.
    async fn stop(&self, container_id: &str) -> RuntimeResult;
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
    pub timeout: Duration,
    pub log_timeout: Duration,
}
