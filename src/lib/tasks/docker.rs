use super::types::{Config, ContainerRuntime, DockerClient, RuntimeError, RuntimeResult};
use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions,
    },
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy},
};
use futures_util::stream::StreamExt;
use std::{collections::HashMap, time::Duration};
use tokio::io::AsyncWriteExt;

const NANO_CPUS_PER_CORE: f64 = 1_000_000_000.0;

impl DockerClient {
    /// Connection settings come from the environment (`DOCKER_HOST`), falling
    /// back to the local socket.
    pub fn new(timeout: Duration, log_timeout: Duration) -> Result<Self, bollard::errors::Error> {
        let client = Docker::connect_with_local_defaults()?;

        Ok(DockerClient {
            client,
            timeout,
            log_timeout,
        })
    }

    async fn bounded<T, F>(&self, action: &'static str, call: F) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RuntimeError::Timeout {
                action,
                after: self.timeout,
            })?
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let pull = async {
            let mut stream = std::pin::pin!(self.client.create_image(
                Some(CreateImageOptions {
                    from_image: image.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            ));

            while let Some(msg) = stream.next().await {
                let info = msg.map_err(|e| RuntimeError::Pull {
                    image: image.to_string(),
                    message: e.to_string(),
                })?;
                if let Some(status) = info.status {
                    tracing::debug!(image, status = %status, "Pull progress");
                }
            }
            Ok::<(), RuntimeError>(())
        };

        self.bounded("pull", pull).await
    }

    fn container_config(config: &Config) -> ContainerConfig<String> {
        let restart_policy = RestartPolicy {
            name: Some(config.restart_policy.to_engine_policy()),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            memory: Some(config.memory),
            nano_cpus: Some((config.cpu * NANO_CPUS_PER_CORE) as i64),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        ContainerConfig {
            image: Some(config.image.clone()),
            tty: Some(false),
            env: Some(config.env.clone()),
            exposed_ports: Some(
                config
                    .exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    pub async fn run(&self, config: &Config) -> Result<String, RuntimeError> {
        tracing::info!(image = %config.image, "Pulling image");
        self.pull_image(&config.image).await?;

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });
        let create = async {
            self.client
                .create_container(options, Self::container_config(config))
                .await
                .map_err(|e| RuntimeError::Create {
                    image: config.image.clone(),
                    message: e.to_string(),
                })
        };
        let container_id = self.bounded("create", create).await?.id;
        tracing::info!(container_id = %container_id, name = %config.name, "Container created");

        let start = async {
            self.client
                .start_container(&container_id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| RuntimeError::Start {
                    container_id: container_id.clone(),
                    message: e.to_string(),
                })
        };
        self.bounded("start", start).await?;
        tracing::info!(container_id = %container_id, "Container started");

        self.stream_logs(container_id.clone());

        Ok(container_id)
    }

    /// Copies the container's output to this process's stdout/stderr on a
    /// detached task, for at most `log_timeout`.
    fn stream_logs(&self, container_id: String) {
        let client = self.client.clone();
        let bound = self.log_timeout;

        tokio::spawn(async move {
            let copy = async {
                let options = LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                };
                let mut logs = std::pin::pin!(client.logs(&container_id, Some(options)));
                let mut stdout = tokio::io::stdout();
                let mut stderr = tokio::io::stderr();

                while let Some(chunk) = logs.next().await {
                    match chunk {
                        Ok(LogOutput::StdErr { message }) => stderr.write_all(&message).await?,
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdIn { message })
                        | Ok(LogOutput::Console { message }) => {
                            stdout.write_all(&message).await?
                        }
                        Err(e) => {
                            tracing::warn!(
                                container_id = %container_id,
                                error = %e,
                                "Log stream closed"
                            );
                            break;
                        }
                    }
                }
                stdout.flush().await?;
                Ok::<(), std::io::Error>(())
            };

            match tokio::time::timeout(bound, copy).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        container_id = %container_id,
                        error = %e,
                        "Failed to copy container logs"
                    )
                }
                Err(_) => {
                    tracing::debug!(
                        container_id = %container_id,
                        after = ?bound,
                        "Stopped following container logs"
                    )
                }
            }
        });
    }

    pub async fn stop_and_remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        tracing::info!(container_id, "Stopping container");
        let stop = async {
            self.client
                .stop_container(container_id, None)
                .await
                .map_err(|e| RuntimeError::Stop {
                    container_id: container_id.to_string(),
                    message: e.to_string(),
                })
        };
        self.bounded("stop", stop).await?;

        let options = RemoveContainerOptions {
            v: true,
            link: false,
            force: false,
        };
        let remove = async {
            self.client
                .remove_container(container_id, Some(options))
                .await
                .map_err(|e| RuntimeError::Remove {
                    container_id: container_id.to_string(),
                    message: e.to_string(),
                })
        };
        self.bounded("remove", remove).await?;
        tracing::info!(container_id, "Container stopped and removed");

        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn start(&self, config: &Config) -> RuntimeResult {
        match self.run(config).await {
            Ok(container_id) => RuntimeResult::success(container_id, "start", "success"),
            Err(e) => {
                tracing::error!(image = %config.image, error = %e, "Failed to start container");
                RuntimeResult::with_error(e)
            }
        }
    }

    async fn stop(&self, container_id: &str) -> RuntimeResult {
        match self.stop_and_remove(container_id).await {
            Ok(()) => RuntimeResult::success(container_id.to_string(), "stop", "success"),
            Err(e) => {
                tracing::error!(container_id, error = %e, "Failed to stop container");
                RuntimeResult::with_error(e)
            }
        }
    }
}
