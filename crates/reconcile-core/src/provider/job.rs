//! JobRunner trait and the BoxJobRunner wrapper.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use reconcile_types::error::ProviderError;

/// A job ready to run: resolved attributes plus the runner that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub node_id: String,
    pub runner: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Result of one job execution. A non-zero `exit_code` fails the node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub exit_code: i32,
    pub logs: String,
    /// Values downstream nodes may reference.
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl JobOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Backend that executes pipeline jobs (shell commands, container builds).
///
/// Implementations live in reconcile-infra (e.g. `CommandJobRunner`).
pub trait JobRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a running job may be abandoned when its timeout expires.
    fn interruptible(&self) -> bool {
        true
    }

    fn run(
        &self,
        spec: &JobSpec,
        environment: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<JobOutput, ProviderError>> + Send;
}

/// Object-safe version of [`JobRunner`].
pub trait JobRunnerDyn: Send + Sync {
    fn name(&self) -> &str;
    fn interruptible(&self) -> bool;
    fn run_boxed<'a>(
        &'a self,
        spec: &'a JobSpec,
        environment: &'a BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<JobOutput, ProviderError>> + Send + 'a>>;
}

impl<T: JobRunner> JobRunnerDyn for T {
    fn name(&self) -> &str {
        JobRunner::name(self)
    }

    fn interruptible(&self) -> bool {
        JobRunner::interruptible(self)
    }

    fn run_boxed<'a>(
        &'a self,
        spec: &'a JobSpec,
        environment: &'a BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<JobOutput, ProviderError>> + Send + 'a>> {
        Box::pin(self.run(spec, environment))
    }
}

/// Type-erased job runner.
pub struct BoxJobRunner {
    inner: Box<dyn JobRunnerDyn>,
}

impl BoxJobRunner {
    pub fn new<T: JobRunner + 'static>(runner: T) -> Self {
        Self {
            inner: Box::new(runner),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn interruptible(&self) -> bool {
        self.inner.interruptible()
    }

    pub async fn run(
        &self,
        spec: &JobSpec,
        environment: &BTreeMap<String, String>,
    ) -> Result<JobOutput, ProviderError> {
        self.inner.run_boxed(spec, environment).await
    }
}
