//! Pluggable end-to-end test runners.
//!
//! The session controller drives the runner through the [`TestRunner`]
//! trait; the concrete implementation is resolved once at startup from the
//! configured `runner.kind` via the [`RunnerRegistry`]. Built-ins cover
//! Cypress, TestCafe, and a generic subprocess runner; embedders can
//! register additional factories.

mod docker;
mod process;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::config::AppConfig;
use crate::error::{Result, RunnerError};

pub use docker::{
    ContainerLogStream, ContainerOpFuture, ContainerRunClient, CreateContainerFuture,
    WaitContainerFuture, resolve_socket, run_in_container,
};
pub use process::ProcessRunner;

/// Boxed future type returned by [`TestRunner::start`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<i64>> + Send + 'a>>;

/// One invocation of the test runner.
///
/// Carries everything the session hands to the runner: the forwarded
/// arguments, whether to execute inside a container, and the image to use
/// when doing so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInvocation {
    /// Arguments forwarded verbatim to the runner.
    pub args: Vec<String>,
    /// Execute the runner inside a container.
    pub in_docker: bool,
    /// Container image override; runners fall back to their own default.
    pub docker_image: Option<String>,
}

impl RunnerInvocation {
    /// Bundle the runner inputs for one session.
    #[must_use]
    pub const fn new(args: Vec<String>, in_docker: bool, docker_image: Option<String>) -> Self {
        Self {
            args,
            in_docker,
            docker_image,
        }
    }
}

/// An end-to-end test runner.
///
/// Implementations block until the suite completes and return the runner's
/// process exit code; the session treats any code other than zero as a
/// failed run. The core neither knows nor cares which concrete test
/// framework sits behind this trait.
pub trait TestRunner: Send + Sync {
    /// Run the suite, returning its exit code.
    fn start<'a>(&'a self, invocation: &'a RunnerInvocation) -> RunFuture<'a>;
}

/// Factory producing a runner from the merged application configuration.
pub type RunnerFactory = fn(&AppConfig) -> Box<dyn TestRunner>;

/// Maps configured runner names to factories.
///
/// Resolution happens once at startup; an unknown name reports the
/// registered alternatives.
pub struct RunnerRegistry {
    factories: BTreeMap<String, RunnerFactory>,
}

impl RunnerRegistry {
    /// An empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in runners registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("cypress", ProcessRunner::cypress_factory);
        registry.register("testcafe", ProcessRunner::testcafe_factory);
        registry.register("process", ProcessRunner::command_factory);
        registry
    }

    /// Register (or replace) a runner factory under the given name.
    pub fn register(&mut self, name: impl Into<String>, factory: RunnerFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Resolve a configured runner name to a concrete runner.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::UnknownRunner`] with the list of registered
    /// names when no factory matches.
    pub fn resolve(&self, name: &str, config: &AppConfig) -> Result<Box<dyn TestRunner>> {
        self.factories
            .get(name)
            .map(|factory| factory(config))
            .ok_or_else(|| {
                RunnerError::UnknownRunner {
                    name: String::from(name),
                    available: self
                        .factories
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", "),
                }
                .into()
            })
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
