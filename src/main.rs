//! `checkride` application entry point.
//!
//! This binary runs one end-to-end test session: provision the test
//! database, start the application server, invoke the configured test
//! runner, tear everything down. It uses `eyre` for opaque error handling
//! at the application boundary, converting domain-specific errors into
//! human-readable reports.
//!
//! Configuration is loaded with layered precedence:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/checkride/config.toml` or path from
//!    `CHECKRIDE_CONFIG_PATH`)
//! 3. Environment variables (`CHECKRIDE_*`)
//! 4. Command-line arguments

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use eyre::{Report, Result as EyreResult};

use checkride::config::{AppConfig, Cli, load_config};
use checkride::db::{PgProvisioner, SqlxAdmin};
use checkride::error::Result as CheckrideResult;
use checkride::runner::RunnerRegistry;
use checkride::server::AppServer;
use checkride::session::{
    CommandOutcome, Narrator, SessionConfig, SessionParams, run_session,
};

/// Application entry point.
///
/// Loads configuration with layered precedence, runs the session, and maps
/// the outcome to the process exit code: 0 when the runner succeeded, the
/// runner's own code when it failed, 1 (via error report) for
/// provisioning, server-start, or internal failures.
fn main() -> EyreResult<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).map_err(Report::from)?;

    match run(&cli, &config).map_err(Report::from)? {
        CommandOutcome::Success => Ok(()),
        CommandOutcome::CommandExit { code } => std::process::exit(runner_exit_code(code)),
    }
}

/// Wire the concrete components and run the session.
///
/// Keeps semantic errors inside the run path so the CLI boundary owns
/// conversion to `eyre::Report`.
fn run(cli: &Cli, config: &AppConfig) -> CheckrideResult<CommandOutcome> {
    let session_config = SessionConfig {
        keep_database: config.keep_database,
        print_server_output: cli.server_output.unwrap_or(false),
        runner_args: cli.runner_args.clone(),
        runner_in_docker: cli.docker_runner.unwrap_or(false),
        docker_image: config.runner.docker_image.clone(),
    };

    let registry = RunnerRegistry::with_builtins();
    let runner = registry.resolve(&config.runner.kind, config)?;

    let admin = Arc::new(SqlxAdmin::new(config.database.admin_url.clone()));
    let provisioner = PgProvisioner::new(admin, config.database.name.clone());
    let mut server = AppServer::new(&config.server, session_config.print_server_output);
    let mut narrator = ConsoleNarrator;

    run_session(SessionParams {
        config: &session_config,
        provisioner: &provisioner,
        server: &mut server,
        runner: runner.as_ref(),
        narrator: &mut narrator,
    })
}

/// Clamp a runner exit code into the non-zero process exit-code range.
fn runner_exit_code(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(1).max(1)
}

/// Narrator writing step progress to the controlling terminal.
///
/// Write failures are ignored: narration must never fail the session.
struct ConsoleNarrator;

impl Narrator for ConsoleNarrator {
    fn begin(&mut self, step: &str) {
        let mut out = std::io::stdout().lock();
        drop(write!(out, "{step}... "));
        drop(out.flush());
    }

    fn succeeded(&mut self) {
        let mut out = std::io::stdout().lock();
        drop(writeln!(out, "DONE"));
    }

    fn failed(&mut self) {
        let mut out = std::io::stdout().lock();
        drop(writeln!(out, "FAILED"));
    }

    fn announce(&mut self, line: &str) {
        let mut out = std::io::stdout().lock();
        drop(writeln!(out, "{line}"));
    }

    fn note(&mut self, line: &str) {
        let mut out = std::io::stdout().lock();
        drop(writeln!(out, "{line}"));
    }
}
