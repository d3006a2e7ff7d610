//! Application server lifecycle control.
//!
//! The server under test runs as a subprocess. Startup failure is a soft
//! condition: [`ServerController::start`] returns `false` rather than an
//! error, so the session controller can abort cleanly and tear down the
//! database without unwinding. The failure detail is retained on the
//! controller for reporting.
//!
//! Readiness is a TCP connect probe against the configured host and port,
//! polled on a fixed interval within a bounded startup window. The probe
//! deliberately checks the socket rather than any HTTP route: the contract
//! is "accepting connections", which is all the runner needs to begin.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};

use crate::config::ServerConfig;

/// Interval between readiness probes during startup.
const READINESS_POLL_INTERVAL_MS: u64 = 100;

/// Boxed future type returned by [`ServerController::start`].
pub type StartFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Boxed future type returned by [`ServerController::terminate`].
pub type TerminateFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Lifecycle operations on the application server under test.
///
/// This abstraction keeps the session controller testable without spawning
/// real processes.
pub trait ServerController: Send {
    /// Launch the server and wait for it to accept connections.
    ///
    /// Returns `false` (never an error) when the server fails to come up
    /// within its bounded startup window; the detail is available from
    /// [`ServerController::failure`] afterwards.
    fn start(&mut self) -> StartFuture<'_>;

    /// Stop the server if it is running.
    ///
    /// Idempotent: safe to call when never started or already stopped, and
    /// does not raise on a server that exited on its own.
    fn terminate(&mut self) -> TerminateFuture<'_>;

    /// The retained detail of the most recent startup failure, if any.
    fn failure(&self) -> Option<&str>;
}

/// Server process states. `Stopped` is reachable from every state.
enum ServerState {
    NotStarted,
    Running(Child),
    Stopped,
}

/// Subprocess-backed [`ServerController`].
pub struct AppServer {
    command: Vec<String>,
    host: String,
    port: u16,
    startup_timeout: Duration,
    print_output: bool,
    state: ServerState,
    failure: Option<String>,
}

impl AppServer {
    /// Build a controller from configuration.
    ///
    /// `print_output` streams the server's stdout/stderr to the controlling
    /// terminal; otherwise output is discarded.
    #[must_use]
    pub fn new(config: &ServerConfig, print_output: bool) -> Self {
        Self {
            command: config.command.clone(),
            host: config.host.clone(),
            port: config.port,
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            print_output,
            state: ServerState::NotStarted,
            failure: None,
        }
    }

    fn spawn(&self) -> Result<Child, String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(String::from("server.command is empty"));
        };

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if self.print_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        // Last-resort cleanup if the controller is dropped without terminate.
        command.kill_on_drop(true);

        command
            .spawn()
            .map_err(|e| format!("failed to spawn '{program}': {e}"))
    }

    async fn wait_until_ready(&mut self, mut child: Child) -> bool {
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.failure = Some(format!("server process exited during startup: {status}"));
                    self.state = ServerState::Stopped;
                    return false;
                }
                Ok(None) => {}
                Err(e) => {
                    drop(child.kill().await);
                    self.failure = Some(format!("failed to poll server process: {e}"));
                    self.state = ServerState::Stopped;
                    return false;
                }
            }

            if TcpStream::connect((self.host.as_str(), self.port))
                .await
                .is_ok()
            {
                self.state = ServerState::Running(child);
                return true;
            }

            if Instant::now() >= deadline {
                drop(child.kill().await);
                self.failure = Some(format!(
                    "did not accept connections on {}:{} within {:?}",
                    self.host, self.port, self.startup_timeout
                ));
                self.state = ServerState::Stopped;
                return false;
            }

            sleep(Duration::from_millis(READINESS_POLL_INTERVAL_MS)).await;
        }
    }
}

impl ServerController for AppServer {
    fn start(&mut self) -> StartFuture<'_> {
        Box::pin(async move {
            if !matches!(self.state, ServerState::NotStarted) {
                self.failure = Some(String::from("server already started or stopped"));
                return false;
            }

            match self.spawn() {
                Ok(child) => self.wait_until_ready(child).await,
                Err(message) => {
                    self.failure = Some(message);
                    self.state = ServerState::Stopped;
                    false
                }
            }
        })
    }

    fn terminate(&mut self) -> TerminateFuture<'_> {
        Box::pin(async move {
            let state = std::mem::replace(&mut self.state, ServerState::Stopped);
            if let ServerState::Running(mut child) = state {
                // kill() reaps the child; a process that already exited on
                // its own yields an ignorable error.
                drop(child.kill().await);
            }
        })
    }

    fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}
