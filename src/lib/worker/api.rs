use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde_json::json;
use uuid::Uuid;

use super::types::{Stats, TaskServer, Worker};
use crate::tasks::types::{Task, TaskEvent};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl TaskServer {
    pub fn new(worker: Arc<Worker>, address: &str, port: u16) -> Self {
        Self {
            worker,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(worker: Arc<Worker>) -> Router {
        Router::new()
            .route("/tasks", get(TaskServer::get_tasks).post(TaskServer::start_task))
            .route("/tasks/{id}", delete(TaskServer::stop_task))
            .route("/stats", get(TaskServer::get_stats))
            .with_state(worker)
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
        Json(worker.get_tasks().await)
    }

    /// Decodes the body by hand so every malformed payload, unknown fields
    /// included, is a 400.
    async fn start_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        body: Bytes,
    ) -> Result<(StatusCode, Json<Task>), ApiError> {
        let task_event: TaskEvent = serde_json::from_slice(&body).map_err(|e| {
            tracing::error!(error = %e, "Error unmarshalling body");
            ApiError::BadRequest(format!("error unmarshalling body: {}", e))
        })?;

        worker.add_task(task_event.task.clone()).await;
        tracing::info!(task_id = %task_event.task.id, event_id = %task_event.id, "Added task");

        Ok((StatusCode::CREATED, Json(task_event.task)))
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Path(id): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        let task_id = Uuid::parse_str(&id).map_err(|e| {
            tracing::error!(id = %id, error = %e, "Unable to parse task ID");
            ApiError::BadRequest(format!("unable to parse request as uuid: {}", e))
        })?;

        // The only way a stop request fails is an id the worker has never seen.
        let task = worker.request_stop(task_id).await.map_err(|e| {
            tracing::error!(%task_id, error = %e, "Stop requested for unknown task");
            ApiError::NotFound(e.to_string())
        })?;
        tracing::info!(
            %task_id,
            container_id = ?task.container_id,
            "Added task to stop container"
        );

        Ok(StatusCode::NO_CONTENT)
    }

    async fn get_stats(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Stats> {
        Json(worker.stats().await)
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        tracing::info!(
            address = %self.address,
            port = self.port,
            worker = %self.worker.name,
            "Starting TaskServer"
        );

        axum::serve(listener, TaskServer::router(self.worker)).await
    }
}
