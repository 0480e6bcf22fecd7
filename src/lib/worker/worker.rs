use super::types::{Stats, StatsProvider, Worker, WorkerError, WorkerResult};
use crate::tasks::{
    state::valid_state_transition,
    types::{ContainerRuntime, RuntimeError, RuntimeResult, State, Task, new_config},
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// The runtime operation a target state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Start,
    Stop,
}

impl Dispatch {
    /// `None` for every state the worker cannot act on, even when the
    /// transition table allows moving into it.
    pub fn for_target(state: State) -> Option<Dispatch> {
        match state {
            State::Scheduled => Some(Dispatch::Start),
            State::Completed => Some(Dispatch::Stop),
            State::Pending | State::Running | State::Failed => None,
        }
    }
}

impl Worker {
    pub fn new(name: &str, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Worker {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            db: RwLock::new(HashMap::new()),
            stats: RwLock::new(Stats::default()),
            dispatch: Mutex::new(()),
            runtime,
        }
    }

    pub async fn add_task(&self, task: Task) {
        self.queue.lock().await.push_back(task);
    }

    /// Applies the task at the head of the queue. `Ok(None)` means the queue was empty.
    pub async fn run_task(&self) -> WorkerResult<Option<RuntimeResult>> {
        let _dispatch = self.dispatch.lock().await;

        let Some(task_queued) = self.queue.lock().await.pop_front() else {
            tracing::debug!(worker = %self.name, "No tasks in queue");
            return Ok(None);
        };

        let task_persisted = self
            .db
            .write()
            .await
            .entry(task_queued.id)
            .or_insert_with(|| task_queued.clone())
            .clone();

        let (from, to) = (task_persisted.state, task_queued.state);
        if !valid_state_transition(from, to) {
            tracing::warn!(task_id = %task_queued.id, %from, %to, "Invalid state transition");
            return Err(WorkerError::InvalidTransition { from, to });
        }

        match Dispatch::for_target(to) {
            Some(Dispatch::Start) => self.start_task(task_queued).await.map(Some),
            Some(Dispatch::Stop) => {
                self.stop_task(task_queued, &task_persisted).await.map(Some)
            }
            None => {
                tracing::error!(
                    task_id = %task_queued.id,
                    %from,
                    %to,
                    unhandled_transition = true,
                    "Valid transition has no handler"
                );
                Err(WorkerError::UnhandledTransition { from, to })
            }
        }
    }

    async fn start_task(&self, mut task: Task) -> WorkerResult<RuntimeResult> {
        task.start_time = Some(SystemTime::now());
        let config = new_config(&task);

        let result = self.runtime.start(&config).await;
        if let Some(err) = &result.error {
            tracing::error!(task_id = %task.id, error = %err, "Error running task");
            task.state = State::Failed;
            task.container_id = None;
            self.db.write().await.insert(task.id, task);
            return Err(WorkerError::Runtime(err.clone()));
        }

        task.state = State::Running;
        task.container_id = result.container_id.clone();
        tracing::info!(task_id = %task.id, container_id = ?task.container_id, "Task started");
        self.db.write().await.insert(task.id, task);

        Ok(result)
    }

    /// The task ends up `Completed` whether or not the runtime managed to stop it.
    async fn stop_task(&self, mut task: Task, persisted: &Task) -> WorkerResult<RuntimeResult> {
        if task.container_id.is_none() {
            task.container_id = persisted.container_id.clone();
        }

        let result = match &task.container_id {
            Some(container_id) => self.runtime.stop(container_id).await,
            None => RuntimeResult::with_error(RuntimeError::MissingContainer(task.id)),
        };

        task.finish_time = Some(SystemTime::now());
        task.state = State::Completed;

        match &result.error {
            Some(err) => {
                tracing::error!(
                    task_id = %task.id,
                    container_id = ?task.container_id,
                    error = %err,
                    "Error stopping container"
                );
                let err = err.clone();
                self.db.write().await.insert(task.id, task);
                Err(WorkerError::Runtime(err))
            }
            None => {
                tracing::info!(
                    task_id = %task.id,
                    container_id = ?task.container_id,
                    "Stopped and removed container"
                );
                task.container_id = None;
                self.db.write().await.insert(task.id, task);
                Ok(result)
            }
        }
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.db.read().await.get(&id).cloned()
    }

    /// Queues a copy of the persisted task with `Completed` as its desired state.
    pub async fn request_stop(&self, id: Uuid) -> WorkerResult<Task> {
        let mut task = self.get_task(id).await.ok_or(WorkerError::TaskNotFound(id))?;
        task.state = State::Completed;
        self.add_task(task.clone()).await;
        Ok(task)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn task_count(&self) -> usize {
        self.db.read().await.len()
    }

    pub async fn stats(&self) -> Stats {
        self.stats.read().await.clone()
    }

    /// Replaces the current snapshot wholesale.
    pub async fn update_stats(&self, stats: Stats) {
        *self.stats.write().await = stats;
    }
}

/// Processes at most one queued task per tick, forever.
pub async fn run_tasks(worker: Arc<Worker>, interval: Duration) {
    loop {
        match worker.run_task().await {
            Ok(Some(result)) => {
                tracing::info!(
                    action = ?result.action,
                    container_id = ?result.container_id,
                    "Task processed"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error running task");
            }
        }

        tracing::debug!(?interval, "Sleeping");
        tokio::time::sleep(interval).await;
    }
}

pub async fn collect_stats(
    worker: Arc<Worker>,
    provider: Arc<dyn StatsProvider>,
    interval: Duration,
) {
    loop {
        tracing::debug!("Collecting stats");
        let task_count = worker.task_count().await;
        let provider = provider.clone();

        let collected =
            tokio::task::spawn_blocking(move || Stats::collect(provider.as_ref(), task_count));
        match collected.await {
            Ok(stats) => {
                for err in &stats.errors {
                    tracing::warn!(error = %err, "Stats provider failed");
                }
                worker.update_stats(stats).await;
            }
            Err(e) => tracing::error!(error = %e, "Stats collection panicked"),
        }

        tokio::time::sleep(interval).await;
    }
}
