//! Containerised runner execution over the container engine socket.
//!
//! The engine endpoint is resolved through a priority-based fallback chain:
//!
//! 1. Configuration (`engine_socket` from CLI, file, or environment)
//! 2. `DOCKER_HOST` environment variable
//! 3. `CONTAINER_HOST` environment variable
//! 4. `PODMAN_HOST` environment variable
//! 5. Platform default (`/var/run/docker.sock` on Unix)
//!
//! Container operations sit behind the [`ContainerRunClient`] trait so the
//! run sequencing can be unit-tested without a live daemon. The runner
//! container uses host networking so the suite inside it reaches the
//! application server on localhost, exactly like a locally-executed runner.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerCreateResponse, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions,
};
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use crate::error::{ContainerError, Result};

/// Environment variable names checked in fallback order after configuration.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Default socket path for Unix platforms.
#[cfg(unix)]
const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

/// Default socket path for Windows platforms.
#[cfg(windows)]
const DEFAULT_SOCKET: &str = "npipe:////./pipe/docker_engine";

/// Engine client timeout in seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Boxed future type returned by [`ContainerRunClient::create_container`].
pub type CreateContainerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<ContainerCreateResponse, BollardError>> + Send + 'a>>;

/// Boxed future type returned by start/remove operations.
pub type ContainerOpFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), BollardError>> + Send + 'a>>;

/// Boxed future type returned by [`ContainerRunClient::wait_container`].
pub type WaitContainerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<i64, BollardError>> + Send + 'a>>;

/// Boxed log stream returned by [`ContainerRunClient::container_logs`].
pub type ContainerLogStream<'a> =
    Pin<Box<dyn Stream<Item = std::result::Result<LogOutput, BollardError>> + Send + 'a>>;

/// Behaviour required to run a one-shot container to completion.
///
/// This abstraction keeps the run sequencing testable without a live daemon.
pub trait ContainerRunClient {
    /// Create a container from a create payload.
    fn create_container(&self, body: ContainerCreateBody) -> CreateContainerFuture<'_>;

    /// Start a created container.
    fn start_container(&self, container_id: &str) -> ContainerOpFuture<'_>;

    /// Follow the container's log output until it exits.
    fn container_logs(&self, container_id: &str) -> ContainerLogStream<'_>;

    /// Wait for the container to exit, returning its exit code.
    fn wait_container(&self, container_id: &str) -> WaitContainerFuture<'_>;

    /// Remove the container.
    fn remove_container(&self, container_id: &str) -> ContainerOpFuture<'_>;
}

impl ContainerRunClient for Docker {
    fn create_container(&self, body: ContainerCreateBody) -> CreateContainerFuture<'_> {
        Box::pin(async move {
            Self::create_container(self, None::<CreateContainerOptions>, body).await
        })
    }

    fn start_container(&self, container_id: &str) -> ContainerOpFuture<'_> {
        let id = String::from(container_id);
        Box::pin(async move { Self::start_container(self, &id, None::<StartContainerOptions>).await })
    }

    fn container_logs(&self, container_id: &str) -> ContainerLogStream<'_> {
        let options = LogsOptionsBuilder::new()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .build();
        Box::pin(Self::logs(self, container_id, Some(options)))
    }

    fn wait_container(&self, container_id: &str) -> WaitContainerFuture<'_> {
        let id = String::from(container_id);
        Box::pin(async move {
            let mut wait_stream = std::pin::pin!(Self::wait_container(
                self,
                &id,
                None::<bollard::query_parameters::WaitContainerOptions>
            ));
            match wait_stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // The daemon reports a non-zero exit as a wait "error"
                // carrying the code.
                Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(error)) => Err(error),
                None => Err(BollardError::IOError {
                    err: std::io::Error::other("wait stream ended without a status"),
                }),
            }
        })
    }

    fn remove_container(&self, container_id: &str) -> ContainerOpFuture<'_> {
        let id = String::from(container_id);
        Box::pin(async move {
            let options = RemoveContainerOptionsBuilder::new().force(true).build();
            Self::remove_container(self, &id, Some(options)).await
        })
    }
}

/// Resolve the engine socket endpoint without connecting.
///
/// Resolution order: explicit configuration, then the fallback environment
/// variables, then the platform default.
#[must_use]
pub fn resolve_socket<E: mockable::Env>(configured: Option<&str>, env: &E) -> String {
    configured
        .map(String::from)
        .or_else(|| {
            FALLBACK_ENV_VARS
                .iter()
                .filter_map(|var_name| env.string(var_name))
                .find(|value| !value.is_empty())
        })
        .unwrap_or_else(|| String::from(DEFAULT_SOCKET))
}

/// Resolve the engine socket and connect to it.
///
/// Supports Unix sockets (`unix://`), Windows named pipes (`npipe://`),
/// HTTP/HTTPS endpoints, and bare paths (treated as Unix sockets).
///
/// # Errors
///
/// Returns a classified [`ContainerError`] (`SocketNotFound`,
/// `PermissionDenied`, or `ConnectionFailed`) when the connection cannot
/// be established.
pub fn connect_engine<E: mockable::Env>(configured: Option<&str>, env: &E) -> Result<Docker> {
    let socket = resolve_socket(configured, env);
    connect(&socket)
}

fn connect(socket: &str) -> Result<Docker> {
    let result = if socket.starts_with("unix://") || socket.starts_with("npipe://") {
        Docker::connect_with_socket(socket, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    } else if socket.starts_with("http://") || socket.starts_with("https://") {
        Docker::connect_with_http(socket, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    } else {
        // Treat bare paths as Unix sockets.
        let socket_uri = format!("unix://{socket}");
        Docker::connect_with_socket(&socket_uri, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    };

    result.map_err(|e| classify_connection_error(&e, socket).into())
}

/// Extract the filesystem path from a socket URI.
///
/// Strips the scheme prefix (`unix://`, `npipe://`) to get the raw path.
/// HTTP endpoints have no filesystem path and yield `None`.
fn extract_socket_path(socket_uri: &str) -> Option<&Path> {
    socket_uri
        .strip_prefix("unix://")
        .or_else(|| socket_uri.strip_prefix("npipe://"))
        .map(Path::new)
}

/// Classify a `Bollard` connection error into a semantic `ContainerError`.
fn classify_connection_error(bollard_error: &BollardError, socket_uri: &str) -> ContainerError {
    let socket_path = extract_socket_path(socket_uri);
    let error_msg = bollard_error.to_string();

    if let BollardError::SocketNotFoundError(_) = bollard_error
        && let Some(path) = socket_path
    {
        return ContainerError::SocketNotFound {
            path: path.to_path_buf(),
        };
    }

    match io_error_kind_in_chain(bollard_error) {
        Some(std::io::ErrorKind::PermissionDenied) => socket_path.map_or_else(
            || ContainerError::ConnectionFailed {
                message: error_msg.clone(),
            },
            |path| ContainerError::PermissionDenied {
                path: path.to_path_buf(),
            },
        ),
        Some(std::io::ErrorKind::NotFound) => socket_path.map_or_else(
            || ContainerError::ConnectionFailed {
                message: error_msg.clone(),
            },
            |path| ContainerError::SocketNotFound {
                path: path.to_path_buf(),
            },
        ),
        _ => ContainerError::ConnectionFailed { message: error_msg },
    }
}

/// Walk the error source chain looking for an `io::Error` kind.
fn io_error_kind_in_chain(error: &(dyn std::error::Error + 'static)) -> Option<std::io::ErrorKind> {
    if let Some(io_err) = error.downcast_ref::<std::io::Error>() {
        return Some(io_err.kind());
    }
    let mut current: Option<&(dyn std::error::Error + 'static)> = error.source();
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}

/// Run the given command in a fresh container and return its exit code.
///
/// Sequencing: create, start, follow logs until the container exits, wait
/// for the exit code, then remove the container (best effort). Log output
/// is forwarded to the controlling terminal so the runner's report is
/// visible exactly as in local execution.
///
/// # Errors
///
/// Returns the matching [`ContainerError`] variant when any engine
/// operation fails; removal failures are ignored.
pub async fn run_in_container<C: ContainerRunClient>(
    client: &C,
    image: &str,
    cmd: Vec<String>,
) -> Result<i64> {
    let body = ContainerCreateBody {
        image: Some(String::from(image)),
        cmd: Some(cmd),
        host_config: Some(HostConfig {
            // Host networking so the suite reaches the application server on
            // localhost, like a locally-executed runner.
            network_mode: Some(String::from("host")),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    };

    let created = client
        .create_container(body)
        .await
        .map_err(|e| ContainerError::CreateFailed {
            message: e.to_string(),
        })?;
    let container_id = created.id;

    client
        .start_container(&container_id)
        .await
        .map_err(|e| ContainerError::StartFailed {
            container_id: container_id.clone(),
            message: e.to_string(),
        })?;

    let logs_result = forward_container_logs(client, &container_id).await;
    let wait_result = client.wait_container(&container_id).await;

    // Best-effort cleanup; the exit code matters more than a stale container.
    drop(client.remove_container(&container_id).await);

    logs_result?;
    wait_result.map_err(|e| {
        ContainerError::WaitFailed {
            container_id,
            message: e.to_string(),
        }
        .into()
    })
}

async fn forward_container_logs<C: ContainerRunClient>(
    client: &C,
    container_id: &str,
) -> Result<()> {
    let mut stream = client.container_logs(container_id);
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| ContainerError::LogsFailed {
            container_id: String::from(container_id),
            message: e.to_string(),
        })?;

        let write_result = match chunk {
            LogOutput::StdErr { message } => {
                let result = stderr.write_all(message.as_ref()).await;
                if result.is_ok() {
                    stderr.flush().await
                } else {
                    result
                }
            }
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => {
                let result = stdout.write_all(message.as_ref()).await;
                if result.is_ok() {
                    stdout.flush().await
                } else {
                    result
                }
            }
        };

        write_result.map_err(|e| ContainerError::LogsFailed {
            container_id: String::from(container_id),
            message: format!("failed writing runner output: {e}"),
        })?;
    }

    Ok(())
}
