//! Configuration system for checkride.
//!
//! This module provides the configuration structures and CLI definitions for
//! the checkride application. Configuration loading and precedence merging is
//! handled by the `ortho_config` crate. Intended precedence: CLI flags
//! override environment variables, which override configuration files, which
//! override defaults.
//!
//! The configuration file is expected at `~/.config/checkride/config.toml`
//! by default.
//!
//! # Example Configuration
//!
//! ```toml
//! keep_database = false
//! engine_socket = "unix:///run/user/1000/podman/podman.sock"
//!
//! [runner]
//! kind = "cypress"
//! docker_image = "cypress/included:13.6.0"
//!
//! [server]
//! command = ["cargo", "run", "--release", "--", "--port", "8000"]
//! host = "127.0.0.1"
//! port = 8000
//! startup_timeout_secs = 30
//!
//! [database]
//! admin_url = "postgres://postgres@localhost:5432/postgres"
//! name = "app_test"
//! ```

mod bool_arg;
mod cli;
mod loader;
mod types;


pub use bool_arg::parse_bool_arg;
pub use cli::Cli;
pub use loader::{env_var_names, load_config};
pub use types::{AppConfig, DatabaseConfig, RunnerConfig, ServerConfig};
