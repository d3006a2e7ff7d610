//! Command-line argument definitions for checkride.

use camino::Utf8PathBuf;
use clap::Parser;

use super::parse_bool_arg;

/// Command-line interface for checkride.
///
/// A single command: run the end-to-end suite. The boolean flags accept an
/// optional lenient value (`--keepdb`, `--keepdb yes`, `--keepdb 0`, …) via
/// the canonical [`parse_bool_arg`] routine. Everything after `--` is
/// forwarded verbatim to the test runner.
#[derive(Debug, Parser)]
#[command(name = "checkride")]
#[command(
    author,
    version,
    about = "Run the e2e suite: provision the test database, start the \
             application server and invoke the configured test runner"
)]
pub struct Cli {
    /// Preserve the test database between runs.
    #[arg(
        short = 'k',
        long = "keepdb",
        value_name = "BOOL",
        value_parser = parse_bool_arg,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub keepdb: Option<bool>,

    /// Stream application server output to the console.
    #[arg(
        short = 'o',
        long = "server-output",
        value_name = "BOOL",
        value_parser = parse_bool_arg,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub server_output: Option<bool>,

    /// Run the test runner inside a container.
    #[arg(
        long = "docker-runner",
        value_name = "BOOL",
        value_parser = parse_bool_arg,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub docker_runner: Option<bool>,

    /// Container image to use for the test runner.
    #[arg(long = "docker-image", value_name = "IMAGE")]
    pub docker_image: Option<String>,

    /// Container engine socket path or URL.
    #[arg(long)]
    pub engine_socket: Option<String>,

    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<Utf8PathBuf>,

    /// Arguments forwarded verbatim to the test runner (after `--`).
    #[arg(last = true, value_name = "RUNNER_ARGS")]
    pub runner_args: Vec<String>,
}
