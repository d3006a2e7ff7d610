//! Test-session lifecycle control.
//!
//! One session is: provision the test database, start the application
//! server, hand control to the test runner, then tear everything down. The
//! teardown half of that sentence is the contract worth stating precisely:
//!
//! - if provisioning fails, nothing was acquired and nothing is released;
//! - if the server fails to start, the database is released and the runner
//!   is never invoked;
//! - once the server is up, the server is terminated and the database is
//!   released on every exit path (runner success, non-zero exit, error,
//!   or panic), in that fixed order, because the server may hold open
//!   database connections.
//!
//! The controller narrates each step through the [`Narrator`] seam and
//! never prints directly; outcome-to-exit-code mapping belongs to the CLI
//! adapter.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::db::DatabaseProvisioner;
use crate::error::{Result, ServerError, SessionError};
use crate::runner::{RunnerInvocation, TestRunner};
use crate::server::ServerController;

/// Exit code the platform treats as success.
pub const SUCCESS_EXIT_CODE: i64 = 0;

/// Immutable per-invocation session inputs.
///
/// Built once at process entry from the CLI and merged configuration;
/// read-only thereafter.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Preserve the test database at teardown.
    pub keep_database: bool,
    /// Stream application server output to the console.
    pub print_server_output: bool,
    /// Arguments forwarded verbatim to the test runner.
    pub runner_args: Vec<String>,
    /// Execute the test runner inside a container.
    pub runner_in_docker: bool,
    /// Container image for the runner, when containerised.
    pub docker_image: Option<String>,
}

/// Step-by-step progress reporting.
///
/// The session narrates which phase it is in so a human watching the
/// console can see where a failure happened. The binary installs a console
/// narrator; tests install a recording one.
pub trait Narrator {
    /// Open a step: "Starting test server... " (no newline yet).
    fn begin(&mut self, step: &str);

    /// Close the open step with DONE.
    fn succeeded(&mut self);

    /// Close the open step with FAILED.
    fn failed(&mut self);

    /// Emit a full standalone line.
    fn announce(&mut self, line: &str);

    /// Emit a secondary detail line.
    fn note(&mut self, line: &str);
}

/// Outcome of a session.
///
/// The session returns either outright success or the runner's own exit
/// code; the CLI adapter maps that to a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The runner reported success (exit code 0).
    Success,
    /// The runner completed with a non-zero exit code.
    CommandExit {
        /// The exit code reported by the runner.
        code: i64,
    },
}

/// Collaborators and inputs for one session.
///
/// Groups the arguments required by [`run_session`] into a single struct
/// to satisfy the "no more than four parameters" convention.
pub struct SessionParams<'a> {
    /// Immutable session inputs.
    pub config: &'a SessionConfig,
    /// Database provisioner.
    pub provisioner: &'a dyn DatabaseProvisioner,
    /// Server controller.
    pub server: &'a mut dyn ServerController,
    /// Resolved test runner.
    pub runner: &'a dyn TestRunner,
    /// Progress reporting sink.
    pub narrator: &'a mut dyn Narrator,
}

/// Run one complete test session (async version).
///
/// # Errors
///
/// Returns the provisioning error when database setup fails (nothing to
/// tear down), [`ServerError::StartupFailed`] when the server does not come
/// up (database torn down first), the runner's error when it faults, or
/// [`SessionError::RunnerPanicked`] when it panics; in the latter two
/// cases teardown has already completed. A database teardown failure
/// becomes the session's error only when the run was otherwise successful.
pub async fn run_session_async(params: SessionParams<'_>) -> Result<CommandOutcome> {
    let SessionParams {
        config,
        provisioner,
        server,
        runner,
        narrator,
    } = params;

    narrator.begin("Provisioning test database");
    let database = match provisioner.setup(config.keep_database).await {
        Ok(handle) => {
            narrator.succeeded();
            handle
        }
        Err(error) => {
            // Nothing acquired yet: report and bail.
            narrator.failed();
            return Err(error);
        }
    };

    narrator.begin("Starting test server");
    if !server.start().await {
        narrator.failed();
        let detail = server
            .failure()
            .map_or_else(|| String::from("unknown startup failure"), String::from);

        // Only the database was acquired; release it before reporting.
        narrator.begin("Tearing down test database");
        if let Err(teardown_error) = database.teardown(config.keep_database).await {
            narrator.failed();
            narrator.note(&format!("cleanup warning: {teardown_error}"));
        } else {
            narrator.succeeded();
        }
        return Err(ServerError::StartupFailed { message: detail }.into());
    }
    narrator.succeeded();

    narrator.announce("Starting test runner...");
    let invocation = RunnerInvocation::new(
        config.runner_args.clone(),
        config.runner_in_docker,
        config.docker_image.clone(),
    );
    // catch_unwind so a panicking runner cannot skip teardown.
    let runner_result = AssertUnwindSafe(runner.start(&invocation))
        .catch_unwind()
        .await;

    narrator.begin("Shutting down test server");
    server.terminate().await;
    narrator.succeeded();

    narrator.begin("Tearing down test database");
    let teardown_result = database.teardown(config.keep_database).await;
    if teardown_result.is_ok() {
        narrator.succeeded();
    } else {
        narrator.failed();
    }

    let outcome = match runner_result {
        Ok(Ok(SUCCESS_EXIT_CODE)) => Ok(CommandOutcome::Success),
        Ok(Ok(code)) => Ok(CommandOutcome::CommandExit { code }),
        Ok(Err(error)) => Err(error),
        Err(payload) => Err(SessionError::RunnerPanicked {
            message: panic_message(payload.as_ref()),
        }
        .into()),
    };

    match teardown_result {
        Ok(()) => outcome,
        Err(teardown_error) => match outcome {
            // A clean run spoiled only by cleanup: surface the cleanup error.
            Ok(CommandOutcome::Success) => Err(teardown_error),
            // The runner's verdict matters more than cleanup noise.
            other => {
                narrator.note(&format!("cleanup warning: {teardown_error}"));
                other
            }
        },
    }
}

/// Run one complete test session.
///
/// This is the synchronous version that creates a dedicated tokio runtime.
/// Use [`run_session_async`] when already in an async context.
///
/// # Errors
///
/// Returns [`SessionError::RuntimeCreationFailed`] if the tokio runtime
/// cannot be created, plus everything [`run_session_async`] returns.
pub fn run_session(params: SessionParams<'_>) -> Result<CommandOutcome> {
    let runtime =
        tokio::runtime::Runtime::new().map_err(|e| SessionError::RuntimeCreationFailed {
            message: e.to_string(),
        })?;
    runtime.block_on(run_session_async(params))
}

/// Render a panic payload as text.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| String::from(*s))
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("opaque panic payload"))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rstest::{fixture, rstest};

    use super::*;
    use crate::db::{DatabaseHandle, SetupFuture, TeardownFuture};
    use crate::error::{CheckrideError, DatabaseError, RunnerError};
    use crate::runner::RunFuture;
    use crate::server::{StartFuture, TerminateFuture};

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn push(log: &EventLog, event: impl Into<String>) {
        log.lock().expect("event log lock should succeed").push(event.into());
    }

    fn events(log: &EventLog) -> Vec<String> {
        log.lock().expect("event log lock should succeed").clone()
    }

    struct FakeProvisioner {
        log: EventLog,
        fail_setup: bool,
        fail_teardown: bool,
    }

    impl DatabaseProvisioner for FakeProvisioner {
        fn setup(&self, keepdb: bool) -> SetupFuture<'_> {
            let log = Arc::clone(&self.log);
            let fail_setup = self.fail_setup;
            let fail_teardown = self.fail_teardown;
            Box::pin(async move {
                push(&log, format!("setup(keepdb={keepdb})"));
                if fail_setup {
                    return Err(DatabaseError::ProvisioningFailed {
                        name: String::from("app_test"),
                        message: String::from("connection refused"),
                    }
                    .into());
                }
                Ok(Box::new(FakeHandle {
                    log,
                    fail_teardown,
                }) as Box<dyn DatabaseHandle>)
            })
        }
    }

    struct FakeHandle {
        log: EventLog,
        fail_teardown: bool,
    }

    impl DatabaseHandle for FakeHandle {
        fn name(&self) -> &str {
            "app_test"
        }

        fn teardown(self: Box<Self>, keepdb: bool) -> TeardownFuture {
            Box::pin(async move {
                push(&self.log, format!("teardown(keepdb={keepdb})"));
                if self.fail_teardown {
                    return Err(DatabaseError::TeardownFailed {
                        name: String::from("app_test"),
                        message: String::from("still in use"),
                    }
                    .into());
                }
                Ok(())
            })
        }
    }

    struct FakeServer {
        log: EventLog,
        start_ok: bool,
        failure: Option<String>,
    }

    impl crate::server::ServerController for FakeServer {
        fn start(&mut self) -> StartFuture<'_> {
            Box::pin(async move {
                push(&self.log, "server.start");
                if !self.start_ok {
                    self.failure = Some(String::from("did not accept connections"));
                }
                self.start_ok
            })
        }

        fn terminate(&mut self) -> TerminateFuture<'_> {
            Box::pin(async move {
                push(&self.log, "server.terminate");
            })
        }

        fn failure(&self) -> Option<&str> {
            self.failure.as_deref()
        }
    }

    enum RunnerBehaviour {
        Exit(i64),
        Fault,
        Panic,
    }

    struct FakeRunner {
        log: EventLog,
        behaviour: RunnerBehaviour,
    }

    impl TestRunner for FakeRunner {
        fn start<'a>(&'a self, invocation: &'a RunnerInvocation) -> RunFuture<'a> {
            Box::pin(async move {
                push(
                    &self.log,
                    format!(
                        "runner.start(args={:?}, docker={})",
                        invocation.args, invocation.in_docker
                    ),
                );
                match self.behaviour {
                    RunnerBehaviour::Exit(code) => Ok(code),
                    RunnerBehaviour::Fault => Err(RunnerError::LaunchFailed {
                        message: String::from("npx not found"),
                    }
                    .into()),
                    RunnerBehaviour::Panic => panic!("runner exploded"),
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingNarrator {
        lines: Vec<String>,
    }

    impl Narrator for RecordingNarrator {
        fn begin(&mut self, step: &str) {
            self.lines.push(format!("begin:{step}"));
        }

        fn succeeded(&mut self) {
            self.lines.push(String::from("DONE"));
        }

        fn failed(&mut self) {
            self.lines.push(String::from("FAILED"));
        }

        fn announce(&mut self, line: &str) {
            self.lines.push(String::from(line));
        }

        fn note(&mut self, line: &str) {
            self.lines.push(format!("note:{line}"));
        }
    }

    struct Harness {
        log: EventLog,
        config: SessionConfig,
        provisioner: FakeProvisioner,
        server: FakeServer,
        runner: FakeRunner,
        narrator: RecordingNarrator,
    }

    impl Harness {
        fn new() -> Self {
            let log: EventLog = Arc::default();
            Self {
                config: SessionConfig {
                    keep_database: false,
                    print_server_output: false,
                    runner_args: vec![String::from("--spec"), String::from("login.cy.ts")],
                    runner_in_docker: false,
                    docker_image: None,
                },
                provisioner: FakeProvisioner {
                    log: Arc::clone(&log),
                    fail_setup: false,
                    fail_teardown: false,
                },
                server: FakeServer {
                    log: Arc::clone(&log),
                    start_ok: true,
                    failure: None,
                },
                runner: FakeRunner {
                    log: Arc::clone(&log),
                    behaviour: RunnerBehaviour::Exit(0),
                },
                narrator: RecordingNarrator::default(),
                log,
            }
        }

        fn run(&mut self, rt: &tokio::runtime::Runtime) -> Result<CommandOutcome> {
            rt.block_on(run_session_async(SessionParams {
                config: &self.config,
                provisioner: &self.provisioner,
                server: &mut self.server,
                runner: &self.runner,
                narrator: &mut self.narrator,
            }))
        }
    }

    #[fixture]
    fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Runtime::new()
    }

    fn runner_was_invoked(log: &EventLog) -> bool {
        events(log).iter().any(|e| e.starts_with("runner.start"))
    }

    #[rstest]
    fn successful_run_sequences_all_steps_and_reports_success(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();

        let outcome = harness.run(&rt).expect("session should succeed");
        assert_eq!(outcome, CommandOutcome::Success);
        assert_eq!(
            events(&harness.log),
            vec![
                "setup(keepdb=false)",
                "server.start",
                "runner.start(args=[\"--spec\", \"login.cy.ts\"], docker=false)",
                "server.terminate",
                "teardown(keepdb=false)",
            ]
        );
        Ok(())
    }

    #[rstest]
    fn provisioning_failure_acquires_nothing(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.provisioner.fail_setup = true;

        let result = harness.run(&rt);
        assert!(matches!(
            result,
            Err(CheckrideError::Database(
                DatabaseError::ProvisioningFailed { .. }
            ))
        ));
        // No server start, no runner, no teardown: nothing was acquired.
        assert_eq!(events(&harness.log), vec!["setup(keepdb=false)"]);
        Ok(())
    }

    #[rstest]
    fn server_start_failure_skips_runner_and_releases_database(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.server.start_ok = false;

        let result = harness.run(&rt);
        assert!(matches!(
            result,
            Err(CheckrideError::Server(ServerError::StartupFailed { .. }))
        ));
        assert!(!runner_was_invoked(&harness.log));
        assert_eq!(
            events(&harness.log),
            vec!["setup(keepdb=false)", "server.start", "teardown(keepdb=false)"]
        );
        Ok(())
    }

    #[rstest]
    fn runner_failure_still_terminates_server_before_teardown(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.runner.behaviour = RunnerBehaviour::Exit(1);

        let outcome = harness.run(&rt).expect("runner exit is an outcome");
        assert_eq!(outcome, CommandOutcome::CommandExit { code: 1 });
        let recorded = events(&harness.log);
        assert_eq!(
            recorded.last().map(String::as_str),
            Some("teardown(keepdb=false)")
        );
        assert_eq!(
            recorded.get(recorded.len().saturating_sub(2)).map(String::as_str),
            Some("server.terminate")
        );
        Ok(())
    }

    #[rstest]
    fn runner_fault_still_runs_full_teardown(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.runner.behaviour = RunnerBehaviour::Fault;

        let result = harness.run(&rt);
        assert!(matches!(
            result,
            Err(CheckrideError::Runner(RunnerError::LaunchFailed { .. }))
        ));
        let recorded = events(&harness.log);
        assert!(recorded.contains(&String::from("server.terminate")));
        assert!(recorded.contains(&String::from("teardown(keepdb=false)")));
        Ok(())
    }

    #[rstest]
    fn runner_panic_is_contained_and_teardown_runs(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.runner.behaviour = RunnerBehaviour::Panic;

        let result = harness.run(&rt);
        let Err(CheckrideError::Session(SessionError::RunnerPanicked { message })) = result else {
            panic!("expected RunnerPanicked");
        };
        assert_eq!(message, "runner exploded");
        let recorded = events(&harness.log);
        assert!(recorded.contains(&String::from("server.terminate")));
        assert!(recorded.contains(&String::from("teardown(keepdb=false)")));
        Ok(())
    }

    #[rstest]
    fn keepdb_flag_reaches_setup_and_teardown(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.config.keep_database = true;

        harness.run(&rt).expect("session should succeed");
        let recorded = events(&harness.log);
        assert!(recorded.contains(&String::from("setup(keepdb=true)")));
        assert!(recorded.contains(&String::from("teardown(keepdb=true)")));
        Ok(())
    }

    #[rstest]
    fn teardown_failure_spoils_an_otherwise_clean_run(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.provisioner.fail_teardown = true;

        let result = harness.run(&rt);
        assert!(matches!(
            result,
            Err(CheckrideError::Database(DatabaseError::TeardownFailed { .. }))
        ));
        Ok(())
    }

    #[rstest]
    fn runner_verdict_outranks_teardown_failure(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.provisioner.fail_teardown = true;
        harness.runner.behaviour = RunnerBehaviour::Exit(2);

        let outcome = harness.run(&rt).expect("runner exit is an outcome");
        assert_eq!(outcome, CommandOutcome::CommandExit { code: 2 });
        // The cleanup problem is narrated rather than masking the verdict.
        assert!(
            harness
                .narrator
                .lines
                .iter()
                .any(|line| line.starts_with("note:cleanup warning"))
        );
        Ok(())
    }

    #[rstest]
    fn narration_tells_the_story_of_a_successful_run(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();

        harness.run(&rt).expect("session should succeed");
        assert_eq!(
            harness.narrator.lines,
            vec![
                "begin:Provisioning test database",
                "DONE",
                "begin:Starting test server",
                "DONE",
                "Starting test runner...",
                "begin:Shutting down test server",
                "DONE",
                "begin:Tearing down test database",
                "DONE",
            ]
        );
        Ok(())
    }

    #[rstest]
    fn narration_marks_the_failing_step(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let mut harness = Harness::new();
        harness.server.start_ok = false;

        drop(harness.run(&rt));
        assert!(
            harness
                .narrator
                .lines
                .contains(&String::from("FAILED"))
        );
        Ok(())
    }
}
