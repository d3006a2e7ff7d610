//! Subprocess-backed test runner with optional containerised execution.

use std::process::Stdio;

use tokio::process::Command;

use super::{RunFuture, RunnerInvocation, TestRunner, docker};
use crate::config::AppConfig;
use crate::error::{Result, RunnerError};

/// A test runner launched as a subprocess, or inside a container when the
/// invocation asks for it.
///
/// The built-in cypress/testcafe constructors carry their framework's
/// conventional command line and default image; the generic `process`
/// constructor takes its command verbatim from `runner.command`
/// configuration.
pub struct ProcessRunner {
    name: String,
    program: String,
    base_args: Vec<String>,
    default_image: Option<String>,
    engine_socket: Option<String>,
}

impl ProcessRunner {
    /// The Cypress runner: `npx cypress run`, image `cypress/included`.
    #[must_use]
    pub fn cypress(config: &AppConfig) -> Self {
        Self {
            name: String::from("cypress"),
            program: String::from("npx"),
            base_args: vec![String::from("cypress"), String::from("run")],
            default_image: Some(String::from("cypress/included")),
            engine_socket: config.engine_socket.clone(),
        }
    }

    /// The TestCafe runner: `npx testcafe`, image `testcafe/testcafe`.
    #[must_use]
    pub fn testcafe(config: &AppConfig) -> Self {
        Self {
            name: String::from("testcafe"),
            program: String::from("npx"),
            base_args: vec![String::from("testcafe")],
            default_image: Some(String::from("testcafe/testcafe")),
            engine_socket: config.engine_socket.clone(),
        }
    }

    /// A runner driven entirely by `runner.command` configuration.
    #[must_use]
    pub fn from_command(config: &AppConfig) -> Self {
        let mut command = config.runner.command.clone();
        let program = if command.is_empty() {
            String::new()
        } else {
            command.remove(0)
        };
        Self {
            name: String::from("process"),
            program,
            base_args: command,
            default_image: None,
            engine_socket: config.engine_socket.clone(),
        }
    }

    /// Registry factory for [`ProcessRunner::cypress`].
    #[must_use]
    pub fn cypress_factory(config: &AppConfig) -> Box<dyn TestRunner> {
        Box::new(Self::cypress(config))
    }

    /// Registry factory for [`ProcessRunner::testcafe`].
    #[must_use]
    pub fn testcafe_factory(config: &AppConfig) -> Box<dyn TestRunner> {
        Box::new(Self::testcafe(config))
    }

    /// Registry factory for [`ProcessRunner::from_command`].
    #[must_use]
    pub fn command_factory(config: &AppConfig) -> Box<dyn TestRunner> {
        Box::new(Self::from_command(config))
    }

    /// The full command line for this invocation, forwarded args included.
    fn command_line(&self, forwarded: &[String]) -> Vec<String> {
        let mut cmd = Vec::with_capacity(1 + self.base_args.len() + forwarded.len());
        cmd.push(self.program.clone());
        cmd.extend(self.base_args.iter().cloned());
        cmd.extend(forwarded.iter().cloned());
        cmd
    }

    async fn start_local(&self, invocation: &RunnerInvocation) -> Result<i64> {
        if self.program.trim().is_empty() {
            return Err(RunnerError::LaunchFailed {
                message: String::from("runner command is empty (set runner.command)"),
            }
            .into());
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = command
            .status()
            .await
            .map_err(|e| RunnerError::LaunchFailed {
                message: format!("failed to run '{}': {e}", self.program),
            })?;

        status.code().map(i64::from).ok_or_else(|| {
            RunnerError::TerminatedBySignal {
                message: format!("'{}' exited without a code", self.program),
            }
            .into()
        })
    }

    async fn start_in_container(&self, invocation: &RunnerInvocation) -> Result<i64> {
        let image = invocation
            .docker_image
            .clone()
            .or_else(|| self.default_image.clone())
            .ok_or_else(|| RunnerError::MissingDockerImage {
                runner: self.name.clone(),
            })?;

        let env = mockable::DefaultEnv::new();
        let docker = docker::connect_engine(self.engine_socket.as_deref(), &env)?;
        docker::run_in_container(&docker, &image, self.command_line(&invocation.args)).await
    }
}

impl TestRunner for ProcessRunner {
    fn start<'a>(&'a self, invocation: &'a RunnerInvocation) -> RunFuture<'a> {
        Box::pin(async move {
            if invocation.in_docker {
                self.start_in_container(invocation).await
            } else {
                self.start_local(invocation).await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::config::RunnerConfig;
    use crate::error::CheckrideError;

    #[fixture]
    fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Runtime::new()
    }

    fn local_invocation(args: &[&str]) -> RunnerInvocation {
        RunnerInvocation::new(
            args.iter().map(|s| String::from(*s)).collect(),
            false,
            None,
        )
    }

    fn command_config(command: &[&str]) -> AppConfig {
        AppConfig {
            runner: RunnerConfig {
                kind: String::from("process"),
                command: command.iter().map(|s| String::from(*s)).collect(),
                docker_image: None,
            },
            ..AppConfig::default()
        }
    }

    #[rstest]
    fn cypress_command_line_appends_forwarded_args() {
        let runner = ProcessRunner::cypress(&AppConfig::default());
        assert_eq!(
            runner.command_line(&[String::from("--spec"), String::from("login.cy.ts")]),
            vec!["npx", "cypress", "run", "--spec", "login.cy.ts"]
        );
    }

    #[rstest]
    fn from_command_splits_program_and_args() {
        let runner = ProcessRunner::from_command(&command_config(&["pnpm", "exec", "playwright"]));
        assert_eq!(runner.program, "pnpm");
        assert_eq!(runner.base_args, vec!["exec", "playwright"]);
        assert!(runner.default_image.is_none());
    }

    #[rstest]
    fn local_run_returns_process_exit_code(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let runner = ProcessRunner::from_command(&command_config(&["sh", "-c"]));

        let code = rt
            .block_on(runner.start(&local_invocation(&["exit 3"])))
            .expect("runner should launch");
        assert_eq!(code, 3);
        Ok(())
    }

    #[rstest]
    fn local_run_returns_zero_on_success(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let runner = ProcessRunner::from_command(&command_config(&["true"]));

        let code = rt
            .block_on(runner.start(&local_invocation(&[])))
            .expect("runner should launch");
        assert_eq!(code, 0);
        Ok(())
    }

    #[rstest]
    fn empty_command_fails_to_launch(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let runner = ProcessRunner::from_command(&command_config(&[]));

        let result = rt.block_on(runner.start(&local_invocation(&[])));
        assert!(matches!(
            result,
            Err(CheckrideError::Runner(RunnerError::LaunchFailed { .. }))
        ));
        Ok(())
    }

    #[rstest]
    fn missing_binary_fails_to_launch(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        let runner =
            ProcessRunner::from_command(&command_config(&["checkride-no-such-binary-a1b2c3"]));

        let result = rt.block_on(runner.start(&local_invocation(&[])));
        assert!(matches!(
            result,
            Err(CheckrideError::Runner(RunnerError::LaunchFailed { .. }))
        ));
        Ok(())
    }

    #[rstest]
    fn docker_invocation_without_image_reports_missing_image(
        runtime: std::io::Result<tokio::runtime::Runtime>,
    ) -> std::io::Result<()> {
        let rt = runtime?;
        // The generic process runner has no default image, so a containerised
        // invocation without an override fails before touching the engine.
        let runner = ProcessRunner::from_command(&command_config(&["true"]));
        let invocation = RunnerInvocation::new(Vec::new(), true, None);

        let result = rt.block_on(runner.start(&invocation));
        assert!(matches!(
            result,
            Err(CheckrideError::Runner(RunnerError::MissingDockerImage { .. }))
        ));
        Ok(())
    }
}
