//! Semantic error types for the checkride application.
//!
//! This module defines the error hierarchy for checkride, following the
//! principle of using semantic error enums (via `thiserror`) for conditions
//! the caller might inspect or map to an exit code, while reserving opaque
//! errors (`eyre::Report`) for the application boundary.
//!
//! Note that two failure modes are deliberately NOT errors: a server that
//! fails to come up within its startup window (a soft boolean on
//! [`crate::server::ServerController::start`]) and a test runner that exits
//! non-zero (an outcome, [`crate::session::CommandOutcome::CommandExit`]).
//! The session controller converts the former into
//! [`ServerError::StartupFailed`] after teardown has run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// A boolean flag or variable had a value outside the accepted forms.
    #[error("invalid boolean value '{value}' (accepted: true/false, 1/0, yes/no, y/n, on/off)")]
    InvalidBool {
        /// The rejected textual value.
        value: String,
    },

    /// The `OrthoConfig` library returned an error during layer merging.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(std::sync::Arc<ortho_config::OrthoError>),
}

/// Errors that can occur while provisioning or releasing the test database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connecting to the maintenance database failed.
    #[error("failed to connect to maintenance database: {message}")]
    AdminConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// Creating (or inspecting) the test database failed.
    #[error("failed to provision test database '{name}': {message}")]
    ProvisioningFailed {
        /// The test database name.
        name: String,
        /// A description of the provisioning failure.
        message: String,
    },

    /// Dropping the test database at teardown failed.
    #[error("failed to tear down test database '{name}': {message}")]
    TeardownFailed {
        /// The test database name.
        name: String,
        /// A description of the teardown failure.
        message: String,
    },

    /// The configured database name is not a safe SQL identifier.
    #[error("invalid test database name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// The reason the name is invalid.
        reason: String,
    },
}

/// Errors produced by the server lifecycle.
///
/// [`crate::server::ServerController::start`] reports startup failure as a
/// soft boolean, never as an error; this variant exists so the session
/// controller can surface that failure as the command's failure after the
/// database has been torn down.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The application server did not come up within its startup window.
    #[error("test server failed to start: {message}")]
    StartupFailed {
        /// The retained failure detail from the server controller.
        message: String,
    },
}

/// Errors that can occur while resolving or launching the test runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configured runner name matches no registered runner.
    #[error("unknown test runner '{name}' (registered: {available})")]
    UnknownRunner {
        /// The requested runner name.
        name: String,
        /// Comma-separated list of registered runner names.
        available: String,
    },

    /// The runner process could not be launched.
    #[error("failed to launch test runner: {message}")]
    LaunchFailed {
        /// A description of the launch failure.
        message: String,
    },

    /// The runner process was terminated by a signal before reporting an
    /// exit code.
    #[error("test runner terminated by signal: {message}")]
    TerminatedBySignal {
        /// A description of the termination.
        message: String,
    },

    /// Containerised execution was requested but no image is configured.
    #[error("runner '{runner}' has no docker image (set --docker-image or runner.docker_image)")]
    MissingDockerImage {
        /// The runner that was asked to run in a container.
        runner: String,
    },
}

/// Errors that can occur during container engine operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// The container engine socket was not found.
    #[error("container engine socket not found: {path}")]
    SocketNotFound {
        /// The path where the socket was expected.
        path: PathBuf,
    },

    /// Permission denied when accessing the container engine socket.
    #[error("permission denied accessing container socket: {path}")]
    PermissionDenied {
        /// The path to the socket.
        path: PathBuf,
    },

    /// Failed to create the runner container.
    #[error("failed to create runner container: {message}")]
    CreateFailed {
        /// A description of the creation failure.
        message: String,
    },

    /// Failed to start the runner container.
    #[error("failed to start runner container '{container_id}': {message}")]
    StartFailed {
        /// The ID of the container that failed to start.
        container_id: String,
        /// A description of the start failure.
        message: String,
    },

    /// Failed to stream log output from the runner container.
    #[error("failed to stream logs from container '{container_id}': {message}")]
    LogsFailed {
        /// The ID of the container.
        container_id: String,
        /// A description of the streaming failure.
        message: String,
    },

    /// Failed to wait for the runner container to exit.
    #[error("failed to wait for container '{container_id}': {message}")]
    WaitFailed {
        /// The ID of the container.
        container_id: String,
        /// A description of the wait failure.
        message: String,
    },
}

/// Errors raised by the session controller itself.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A tokio runtime could not be created for the synchronous entry point.
    #[error("failed to create async runtime: {message}")]
    RuntimeCreationFailed {
        /// A description of the runtime creation failure.
        message: String,
    },

    /// The test runner panicked; teardown has already run.
    #[error("test runner panicked: {message}")]
    RunnerPanicked {
        /// The panic payload rendered as text.
        message: String,
    },
}

/// Top-level error type for the checkride application.
///
/// This enum aggregates all domain-specific errors into a single type that
/// can be used throughout the application. At the application boundary
/// (main.rs), these errors are converted to `eyre::Report` for
/// human-readable error reporting.
#[derive(Debug, Error)]
pub enum CheckrideError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred while provisioning or releasing the database.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// An error occurred in the server lifecycle.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// An error occurred while resolving or launching the runner.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// An error occurred during container engine operations.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// An error was raised by the session controller.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A specialised `Result` type for checkride operations.
pub type Result<T> = std::result::Result<T, CheckrideError>;
