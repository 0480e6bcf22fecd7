#![allow(dead_code)]

use async_trait::async_trait;
use cube_worker::tasks::types::{Config, ContainerRuntime, RuntimeError, RuntimeResult, State, Task};
use cube_worker::worker::types::Worker;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-memory runtime that records calls and fails on demand.
#[derive(Default)]
pub struct FakeRuntime {
    pub start_error: Option<RuntimeError>,
    pub stop_error: Option<RuntimeError>,
    pub started: Mutex<Vec<Config>>,
    pub stopped: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn failing_pull() -> Self {
        FakeRuntime {
            start_error: Some(RuntimeError::Pull {
                image: "missing:latest".to_string(),
                message: "manifest unknown".to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn failing_stop() -> Self {
        FakeRuntime {
            stop_error: Some(RuntimeError::Stop {
                container_id: "container-1".to_string(),
                message: "no such container".to_string(),
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, config: &Config) -> RuntimeResult {
        if let Some(err) = &self.start_error {
            return RuntimeResult::with_error(err.clone());
        }
        let mut started = self.started.lock().unwrap();
        started.push(config.clone());
        RuntimeResult::success(format!("container-{}", started.len()), "start", "success")
    }

    async fn stop(&self, container_id: &str) -> RuntimeResult {
        self.stopped.lock().unwrap().push(container_id.to_string());
        match &self.stop_error {
            Some(err) => RuntimeResult::with_error(err.clone()),
            None => RuntimeResult::success(container_id.to_string(), "stop", "success"),
        }
    }
}

pub fn worker_with(runtime: FakeRuntime) -> (Arc<Worker>, Arc<FakeRuntime>) {
    let runtime = Arc::new(runtime);
    let worker = Arc::new(Worker::new("test_worker", runtime.clone()));
    (worker, runtime)
}

pub fn task(state: State) -> Task {
    Task {
        id: Uuid::new_v4(),
        name: "test-container".to_string(),
        state,
        image: "strm/helloworld-http".to_string(),
        cpu: 0.5,
        memory: 64 * 1024 * 1024,
        ..Default::default()
    }
}
