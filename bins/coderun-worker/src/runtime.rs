/// Container Runtime - where a task's command actually runs
///
/// The executor prepares a self-contained shell script plus environment; a
/// runtime only has to start a container from an image, run that script under
/// the given limits, and report what came out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything needed to run one task in one container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Passed to `sh -c`
    pub script: String,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub working_dir: String,
    pub nano_cpus: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub timeout: Duration,
}

/// Raw result of a container run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput>;
}

/// Docker-based runtime
///
/// Containers run with networking disabled and the task's CPU/memory caps,
/// are killed when the task timeout elapses, and are always removed.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon socket, pinning `api_version` when given
    pub fn connect(socket: &str, api_version: Option<(usize, usize)>) -> Result<Self> {
        let pinned;
        let version = match api_version {
            Some((major_version, minor_version)) => {
                pinned = ClientVersion {
                    major_version,
                    minor_version,
                };
                &pinned
            }
            None => API_DEFAULT_VERSION,
        };

        let docker = Docker::connect_with_socket(socket, 120, version)
            .with_context(|| format!("Failed to connect to Docker daemon at {}", socket))?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.context("Docker daemon did not answer ping")?;
        Ok(())
    }

    /// Pull the image unless it is already present
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        debug!(image, "Pulling image");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.with_context(|| format!("Failed to pull image {}", image))?;
        }
        Ok(())
    }

    async fn run_started(&self, container_id: &str, timeout: Duration) -> Result<ContainerOutput> {
        let mut output = ContainerOutput::default();

        let collect = async {
            let options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });
            let mut logs = self.docker.logs(container_id, options);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Log stream for container {} ended: {}", container_id, e);
                        break;
                    }
                }
            }
        };

        if tokio::time::timeout(timeout, collect).await.is_err() {
            output.timed_out = true;
            let _ = self
                .docker
                .kill_container(container_id, None::<KillContainerOptions<String>>)
                .await;
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(container_id, Some(options));
        output.exit_code = match wait.next().await {
            Some(Ok(response)) => response.status_code,
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(e).context("Failed to wait for container"),
            None => -1,
        };

        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput> {
        self.ensure_image(&spec.image).await?;

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), spec.script.clone()]),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: spec.memory_bytes,
                nano_cpus: spec.nano_cpus,
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .context("Failed to create container")?;

        let result = match self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => self.run_started(&container.id, spec.timeout).await,
            Err(e) => Err(e).context("Failed to start container"),
        };

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&container.id, Some(remove)).await {
            warn!("Failed to remove container {}: {}", container.id, e);
        }

        result
    }
}
