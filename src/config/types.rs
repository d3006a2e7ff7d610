//! Configuration data types for checkride.

use ortho_config::{OrthoConfig, OrthoError, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::db::validate_database_name;

/// Test runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct RunnerConfig {
    /// Registry key of the runner to invoke (`cypress`, `testcafe`,
    /// `process`, or a name registered by an embedder).
    #[default(String::from("cypress"))]
    pub kind: String,

    /// Command line for the generic `process` runner. Ignored by the
    /// built-in cypress/testcafe runners, which carry their own commands.
    pub command: Vec<String>,

    /// Default container image when `--docker-runner` is set. Built-in
    /// runners fall back to their own image when this is unset.
    pub docker_image: Option<String>,
}

/// Application server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct ServerConfig {
    /// Command used to launch the application server under test.
    pub command: Vec<String>,

    /// Host the readiness probe connects to.
    #[default(String::from("127.0.0.1"))]
    pub host: String,

    /// Port the readiness probe connects to.
    #[default(8000)]
    pub port: u16,

    /// Bounded startup window in seconds before `start` reports failure.
    #[default(30)]
    pub startup_timeout_secs: u64,
}

/// Test database configuration.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maintenance connection URL used to create and drop the test
    /// database. Must not point at the test database itself.
    #[default(String::from("postgres://postgres@localhost:5432/postgres"))]
    pub admin_url: String,

    /// Name of the ephemeral test database.
    #[default(String::from("checkride_test"))]
    pub name: String,
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment
/// variables, command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `CHECKRIDE_CONFIG_PATH` environment variable
/// 2. `.checkride.toml` in the current working directory
/// 3. `.checkride.toml` in the home directory
/// 4. `~/.config/checkride/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(
    prefix = "CHECKRIDE",
    post_merge_hook,
    discovery(
        app_name = "checkride",
        env_var = "CHECKRIDE_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".checkride.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// Default for `--keepdb`: preserve the test database between runs.
    pub keep_database: bool,

    /// The container engine socket path or URL for the dockerised runner.
    pub engine_socket: Option<String>,

    /// Test runner configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub runner: RunnerConfig,

    /// Application server configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub server: ServerConfig,

    /// Test database configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub database: DatabaseConfig,
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        if self.runner.kind.trim().is_empty() {
            return Err(std::sync::Arc::new(OrthoError::Validation {
                key: String::from("runner.kind"),
                message: String::from("runner kind must not be empty"),
            }));
        }
        if let Err(error) = validate_database_name(&self.database.name) {
            return Err(std::sync::Arc::new(OrthoError::Validation {
                key: String::from("database.name"),
                message: error.to_string(),
            }));
        }
        Ok(())
    }
}
