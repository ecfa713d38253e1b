//! Plan executor: wave-based parallel apply with per-node failure isolation.
//!
//! The executor walks the plan's waves (see `scheduler::schedule_plan`).
//! Every node of a wave runs as its own task in a `tokio::JoinSet`, bounded
//! by a semaphore. A node is complete only once its state change is
//! committed.
//!
//! # Node flow
//!
//! 1. Skip if a dependency failed or was skipped, or if the run is cancelled.
//! 2. Resolve `${node.output}` references from this run's outputs, falling
//!    back to the state store.
//! 3. Record a pending intent, call the provider with retry and timeout.
//! 4. Commit: save (or delete) the state record, which clears the intent.
//!
//! A NoOp flagged `refresh_dependencies` only rewrites the stored
//! dependency list; no provider is called.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use reconcile_types::config::EngineConfig;
use reconcile_types::error::{ProviderError, StateError};
use reconcile_types::node::{Declaration, NodeKind, Reference};
use reconcile_types::plan::{Operation, Plan, PlannedChange};
use reconcile_types::run::{NodeOutcome, NodeReport, SkipReason};
use reconcile_types::state::{IDENTITY_OUTPUT, PendingIntent, StateRecord};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::graph::Graph;
use super::retry::{RetryPolicy, call_with_timeout};
use super::scheduler::{SchedulerError, schedule_plan};
use crate::provider::{Applied, BoxResourceProvider, JobSpec, ProviderRegistry, ResourceRequest};
use crate::repository::StateStore;

/// Outputs produced during the current run, keyed by node ID.
type RunOutputs = DashMap<String, BTreeMap<String, Value>>;

// ---------------------------------------------------------------------------
// Options / errors
// ---------------------------------------------------------------------------

/// Knobs for one apply.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum nodes running at once.
    pub concurrency: usize,
    /// Per-call timeout when a declaration sets none.
    pub default_timeout: Duration,
    pub retry: RetryPolicy,
    /// Environment passed to every job runner.
    pub environment: BTreeMap<String, String>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ExecuteOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            default_timeout: config.default_timeout(),
            retry: RetryPolicy::from(&config.retry),
            environment: config.env.clone(),
        }
    }
}

/// Errors that abort the whole apply. Per-node failures never surface here;
/// they are reported in the node's [`NodeReport`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// State integrity violation. In-flight nodes were allowed to finish and
    /// nothing new was dispatched; `reports` holds every plan step's outcome.
    #[error("state store corrupted during apply: {source}")]
    StateCorrupted {
        #[source]
        source: StateError,
        reports: Vec<NodeReport>,
    },
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Applies plans against a state store through registered providers.
pub struct Executor<S: StateStore> {
    store: Arc<S>,
    registry: Arc<ProviderRegistry>,
    options: Arc<ExecuteOptions>,
}

impl<S: StateStore + 'static> Executor<S> {
    pub fn new(store: Arc<S>, registry: Arc<ProviderRegistry>, options: ExecuteOptions) -> Self {
        Self {
            store,
            registry,
            options: Arc::new(options),
        }
    }

    /// Apply `plan`. `graph` supplies the declarations of non-delete steps.
    ///
    /// Returns one report per plan step, in plan order.
    pub async fn apply(
        &self,
        plan: &Plan,
        graph: &Arc<Graph>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeReport>, ExecutorError> {
        let waves = schedule_plan(plan)?;
        let changes: HashMap<&str, &PlannedChange> = plan
            .changes
            .iter()
            .map(|c| (c.node_id.as_str(), c))
            .collect();

        let outputs: Arc<RunOutputs> = Arc::new(DashMap::new());
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut reports: HashMap<String, NodeReport> = HashMap::with_capacity(plan.len());
        // Node -> the failed node that blocks it.
        let mut blocked: HashMap<String, String> = HashMap::new();
        let mut fatal: Option<StateError> = None;

        for (wave_idx, wave) in waves.iter().enumerate() {
            tracing::debug!(wave = wave_idx, nodes = wave.len(), "processing wave");

            let mut join_set = JoinSet::new();

            for node_id in wave {
                let Some(change) = changes.get(node_id.as_str()).copied() else {
                    continue;
                };

                if let Some(root) = change.depends_on.iter().find_map(|d| blocked.get(d)) {
                    let root = root.clone();
                    tracing::info!(node = node_id.as_str(), upstream = root.as_str(), "skipping node");
                    blocked.insert(node_id.clone(), root.clone());
                    reports.insert(
                        node_id.clone(),
                        NodeReport::without_attempts(
                            node_id.clone(),
                            change.operation,
                            NodeOutcome::Skipped {
                                reason: SkipReason::UpstreamFailed { node: root },
                            },
                        ),
                    );
                    continue;
                }

                if cancel.is_cancelled() {
                    reports.insert(node_id.clone(), cancelled_report(change));
                    continue;
                }

                if change.operation == Operation::NoOp && !change.refresh_dependencies {
                    reports.insert(
                        node_id.clone(),
                        NodeReport::without_attempts(node_id.clone(), Operation::NoOp, NodeOutcome::NoOp),
                    );
                    continue;
                }

                let task = NodeTask {
                    change: change.clone(),
                    declaration: graph.get(node_id).cloned(),
                    store: Arc::clone(&self.store),
                    registry: Arc::clone(&self.registry),
                    options: Arc::clone(&self.options),
                    outputs: Arc::clone(&outputs),
                    cancel: cancel.clone(),
                };
                let semaphore = Arc::clone(&semaphore);

                join_set.spawn(async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = task.cancel.cancelled() => None,
                    };
                    let Some(_permit) = permit else {
                        return (cancelled_report(&task.change), None);
                    };
                    task.execute().await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (report, error) = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(wave = wave_idx, error = %e, "node task did not complete");
                        continue;
                    }
                };

                if report.outcome.is_failed() {
                    blocked.insert(report.node_id.clone(), report.node_id.clone());
                }

                if let Some(err) = error {
                    tracing::error!(node = report.node_id.as_str(), error = %err, "state corruption, stopping dispatch");
                    cancel.cancel();
                    fatal.get_or_insert(err);
                }
                reports.insert(report.node_id.clone(), report);
            }

            // A task that panicked left no report.
            for node_id in wave {
                if !reports.contains_key(node_id) {
                    let operation = changes
                        .get(node_id.as_str())
                        .map(|c| c.operation)
                        .unwrap_or(Operation::NoOp);
                    blocked.insert(node_id.clone(), node_id.clone());
                    reports.insert(
                        node_id.clone(),
                        NodeReport::without_attempts(
                            node_id.clone(),
                            operation,
                            NodeOutcome::Failed {
                                reason: "node task panicked".to_string(),
                            },
                        ),
                    );
                }
            }
        }

        let reports: Vec<NodeReport> = plan
            .changes
            .iter()
            .filter_map(|c| reports.remove(&c.node_id))
            .collect();

        match fatal {
            Some(source) => Err(ExecutorError::StateCorrupted { source, reports }),
            None => Ok(reports),
        }
    }
}

fn cancelled_report(change: &PlannedChange) -> NodeReport {
    NodeReport::without_attempts(
        change.node_id.clone(),
        change.operation,
        NodeOutcome::Skipped {
            reason: SkipReason::Cancelled,
        },
    )
}

// ---------------------------------------------------------------------------
// NodeTask
// ---------------------------------------------------------------------------

/// Why a node failed. `fatal` carries a state corruption that must stop the run.
struct NodeFailure {
    reason: String,
    fatal: Option<StateError>,
}

impl NodeFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: None,
        }
    }

    fn provider(err: ProviderError) -> Self {
        Self::new(err.message)
    }

    fn state(err: StateError) -> Self {
        let reason = format!("state commit failed: {err}");
        Self {
            reason,
            fatal: err.is_corruption().then_some(err),
        }
    }
}

/// Everything one node needs, owned so it can move into a spawned task.
struct NodeTask<S: StateStore> {
    change: PlannedChange,
    declaration: Option<Declaration>,
    store: Arc<S>,
    registry: Arc<ProviderRegistry>,
    options: Arc<ExecuteOptions>,
    outputs: Arc<RunOutputs>,
    cancel: CancellationToken,
}

impl<S: StateStore + 'static> NodeTask<S> {
    async fn execute(self) -> (NodeReport, Option<StateError>) {
        let started = Instant::now();
        let mut attempts = 0;
        let node_id = self.change.node_id.clone();
        let operation = self.change.operation;

        tracing::info!(node = node_id.as_str(), operation = %operation, "applying node");

        let result = match (operation, self.change.kind) {
            (Operation::Run, _) | (_, NodeKind::Job) => self.run_job(&mut attempts).await,
            (Operation::Create, _) => self.create(&mut attempts).await,
            (Operation::Update, _) => self.update(&mut attempts).await,
            (Operation::Replace, _) => self.replace(&mut attempts).await,
            (Operation::Delete, _) => self.delete(&mut attempts).await,
            (Operation::NoOp, _) => self.refresh_dependencies().await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (outcome, fatal) = match result {
            Ok(()) if operation == Operation::NoOp => (NodeOutcome::NoOp, None),
            Ok(()) => {
                tracing::info!(node = node_id.as_str(), attempts, elapsed_ms, "node applied");
                (NodeOutcome::Success, None)
            }
            Err(failure) => {
                tracing::warn!(
                    node = node_id.as_str(),
                    attempts,
                    elapsed_ms,
                    reason = failure.reason.as_str(),
                    "node failed"
                );
                (
                    NodeOutcome::Failed {
                        reason: failure.reason,
                    },
                    failure.fatal,
                )
            }
        };

        let report = NodeReport {
            node_id,
            operation,
            outcome,
            attempts,
            elapsed_ms,
        };
        (report, fatal)
    }

    // -----------------------------------------------------------------------
    // Resource operations
    // -----------------------------------------------------------------------

    async fn create(&self, attempts: &mut u32) -> Result<(), NodeFailure> {
        let decl = self.declaration()?;
        let provider = self.provider(&decl.node_type)?;
        let request = self.resolve(decl).await?;

        self.store
            .record_intent(&self.intent(decl, Operation::Create, None, &request, 0))
            .await
            .map_err(NodeFailure::state)?;

        let applied = self
            .call(attempts, &provider, Operation::Create, || provider.create(&request))
            .await?;
        self.commit(decl, applied, 1).await
    }

    async fn update(&self, attempts: &mut u32) -> Result<(), NodeFailure> {
        let decl = self.declaration()?;
        let provider = self.provider(&decl.node_type)?;
        let previous = self.existing_record().await?;
        let request = self.resolve(decl).await?;

        self.store
            .record_intent(&self.intent(
                decl,
                Operation::Update,
                Some(previous.identity.clone()),
                &request,
                previous.serial,
            ))
            .await
            .map_err(NodeFailure::state)?;

        let identity = previous.identity.as_str();
        let applied = self
            .call(attempts, &provider, Operation::Update, || {
                provider.update(identity, &request)
            })
            .await?;
        self.commit(decl, applied, previous.serial + 1).await
    }

    /// Delete the old resource, then create the new one. Once the old
    /// resource is gone its record is dropped, so a failed create leaves the
    /// node plain absent and the next plan creates it.
    async fn replace(&self, attempts: &mut u32) -> Result<(), NodeFailure> {
        let decl = self.declaration()?;
        let previous = self.existing_record().await?;
        let old_provider = self.provider(&previous.resource_type)?;
        let provider = self.provider(&decl.node_type)?;
        let request = self.resolve(decl).await?;

        let mut intent = self.intent(
            decl,
            Operation::Replace,
            Some(previous.identity.clone()),
            &request,
            previous.serial,
        );
        intent.resource_type = previous.resource_type.clone();
        self.store
            .record_intent(&intent)
            .await
            .map_err(NodeFailure::state)?;

        let identity = previous.identity.as_str();
        self.call(attempts, &old_provider, Operation::Delete, || {
            old_provider.delete(identity)
        })
        .await?;
        self.store
            .delete(&previous.node_id)
            .await
            .map_err(NodeFailure::state)?;

        tracing::debug!(node = decl.id.as_str(), old = identity, "old resource removed, creating replacement");

        self.store
            .record_intent(&self.intent(decl, Operation::Create, None, &request, previous.serial))
            .await
            .map_err(NodeFailure::state)?;
        let applied = self
            .call(attempts, &provider, Operation::Create, || provider.create(&request))
            .await?;
        self.commit(decl, applied, previous.serial + 1).await
    }

    async fn delete(&self, attempts: &mut u32) -> Result<(), NodeFailure> {
        let Some(previous) = self
            .store
            .load(&self.change.node_id)
            .await
            .map_err(NodeFailure::state)?
        else {
            return Ok(());
        };
        let provider = self.provider(&previous.resource_type)?;

        self.store
            .record_intent(&PendingIntent {
                node_id: previous.node_id.clone(),
                resource_type: previous.resource_type.clone(),
                operation: Operation::Delete,
                identity: Some(previous.identity.clone()),
                attributes: previous.attributes.clone(),
                resolved: BTreeMap::new(),
                dependencies: previous.dependencies.clone(),
                previous_serial: previous.serial,
                started_at: Utc::now(),
            })
            .await
            .map_err(NodeFailure::state)?;

        let identity = previous.identity.as_str();
        self.call(attempts, &provider, Operation::Delete, || provider.delete(identity))
            .await?;
        self.store
            .delete(&previous.node_id)
            .await
            .map_err(NodeFailure::state)
    }

    async fn refresh_dependencies(&self) -> Result<(), NodeFailure> {
        let Some(mut record) = self
            .store
            .load(&self.change.node_id)
            .await
            .map_err(NodeFailure::state)?
        else {
            return Ok(());
        };
        tracing::debug!(
            node = record.node_id.as_str(),
            old = ?record.dependencies,
            new = ?self.change.depends_on,
            "refreshing stored dependencies"
        );
        record.dependencies = self.change.depends_on.clone();
        self.store.save(&record).await.map_err(NodeFailure::state)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    async fn run_job(&self, attempts: &mut u32) -> Result<(), NodeFailure> {
        let decl = self.declaration()?;
        let runner = self.registry.runner(&decl.node_type).ok_or_else(|| {
            NodeFailure::new(format!("no job runner registered for '{}'", decl.node_type))
        })?;
        let request = self.resolve(decl).await?;
        let spec = JobSpec {
            node_id: decl.id.clone(),
            runner: decl.node_type.clone(),
            attributes: request.attributes,
        };

        let timeout = self.timeout(decl);
        let interruptible = runner.interruptible();
        let environment = &self.options.environment;
        let (result, used) = self
            .options
            .retry
            .run(&decl.id, &self.cancel, || {
                call_with_timeout(timeout, interruptible, runner.run(&spec, environment))
            })
            .await;
        *attempts += used;

        let output = result.map_err(NodeFailure::provider)?;
        if !output.logs.is_empty() {
            tracing::debug!(node = decl.id.as_str(), logs = output.logs.as_str(), "job output");
        }
        if !output.is_success() {
            return Err(NodeFailure::new(format!(
                "job exited with code {}",
                output.exit_code
            )));
        }
        self.outputs.insert(decl.id.clone(), output.outputs);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn declaration(&self) -> Result<&Declaration, NodeFailure> {
        self.declaration.as_ref().ok_or_else(|| {
            NodeFailure::new(format!(
                "node '{}' is not in the graph",
                self.change.node_id
            ))
        })
    }

    fn provider(&self, resource_type: &str) -> Result<Arc<BoxResourceProvider>, NodeFailure> {
        self.registry.provider(resource_type).ok_or_else(|| {
            NodeFailure::new(format!("no provider registered for '{resource_type}'"))
        })
    }

    async fn existing_record(&self) -> Result<StateRecord, NodeFailure> {
        self.store
            .load(&self.change.node_id)
            .await
            .map_err(NodeFailure::state)?
            .ok_or_else(|| {
                NodeFailure::new(format!(
                    "no state record for '{}' to {}",
                    self.change.node_id, self.change.operation
                ))
            })
    }

    fn timeout(&self, decl: &Declaration) -> Duration {
        decl.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.options.default_timeout)
    }

    /// Provider call with timeout and retry; adds the attempts used.
    async fn call<T, F, Fut>(
        &self,
        attempts: &mut u32,
        provider: &BoxResourceProvider,
        operation: Operation,
        mut call: F,
    ) -> Result<T, NodeFailure>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self
            .declaration
            .as_ref()
            .map(|d| self.timeout(d))
            .unwrap_or(self.options.default_timeout);
        let interruptible = provider.interruptible(operation);
        let (result, used) = self
            .options
            .retry
            .run(&self.change.node_id, &self.cancel, || {
                call_with_timeout(timeout, interruptible, call())
            })
            .await;
        *attempts += used;
        result.map_err(NodeFailure::provider)
    }

    /// Resolve every reference in the declaration's attributes.
    ///
    /// Outputs produced earlier in this run win over stored records.
    async fn resolve(&self, decl: &Declaration) -> Result<ResourceRequest, NodeFailure> {
        let mut stored: HashMap<String, StateRecord> = HashMap::new();
        for reference in decl.references() {
            if self.outputs.contains_key(&reference.node) || stored.contains_key(&reference.node) {
                continue;
            }
            if let Some(record) = self
                .store
                .load(&reference.node)
                .await
                .map_err(NodeFailure::state)?
            {
                stored.insert(reference.node.clone(), record);
            }
        }

        let mut lookup = |r: &Reference| -> Option<Value> {
            if let Some(outputs) = self.outputs.get(&r.node) {
                return outputs.get(&r.output).cloned();
            }
            stored.get(&r.node).and_then(|record| record.output(&r.output))
        };

        let mut attributes = BTreeMap::new();
        for (key, value) in &decl.attributes {
            let resolved = value.resolve(&mut lookup).map_err(|missing| {
                NodeFailure::new(format!("unresolved reference {missing} in attribute '{key}'"))
            })?;
            attributes.insert(key.clone(), resolved);
        }
        Ok(ResourceRequest::new(decl.id.clone(), attributes))
    }

    fn intent(
        &self,
        decl: &Declaration,
        operation: Operation,
        identity: Option<String>,
        request: &ResourceRequest,
        previous_serial: u64,
    ) -> PendingIntent {
        PendingIntent {
            node_id: decl.id.clone(),
            resource_type: decl.node_type.clone(),
            operation,
            identity,
            attributes: decl.attributes.clone(),
            resolved: request.attributes.clone(),
            dependencies: self.change.depends_on.clone(),
            previous_serial,
            started_at: Utc::now(),
        }
    }

    /// Save the applied state and publish outputs to downstream nodes.
    async fn commit(&self, decl: &Declaration, applied: Applied, serial: u64) -> Result<(), NodeFailure> {
        let record = StateRecord {
            node_id: decl.id.clone(),
            resource_type: decl.node_type.clone(),
            attributes: decl.attributes.clone(),
            identity: applied.identity,
            outputs: applied.outputs,
            dependencies: self.change.depends_on.clone(),
            serial,
            updated_at: Utc::now(),
        };
        self.store.save(&record).await.map_err(NodeFailure::state)?;

        let mut published = record.outputs.clone();
        published.insert(IDENTITY_OUTPUT.to_string(), Value::String(record.identity.clone()));
        self.outputs.insert(decl.id.clone(), published);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::engine::planner::plan;
    use crate::provider::{JobOutput, JobRunner, NoSchemas, ResourceProvider};
    use crate::repository::MemoryStateStore;
    use reconcile_types::node::AttrValue;
    use serde_json::json;

    /// Records every call; fails creates for node IDs in `fail_on`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Vec<String>,
        flaky: AtomicU32,
    }

    impl ResourceProvider for Arc<Recorder> {
        fn name(&self) -> &str {
            "rec"
        }

        async fn create(&self, request: &ResourceRequest) -> Result<Applied, ProviderError> {
            self.calls.lock().unwrap().push(format!("create {}", request.node_id));
            if self.fail_on.contains(&request.node_id) {
                return Err(ProviderError::terminal("quota exceeded"));
            }
            if request.node_id == "flaky" && self.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(ProviderError::retryable("throttled"));
            }
            Ok(Applied::new(format!("{}-1", request.node_id))
                .with_output("echo", Value::Object(request.attributes.clone().into_iter().collect())))
        }

        async fn update(
            &self,
            identity: &str,
            request: &ResourceRequest,
        ) -> Result<Applied, ProviderError> {
            self.calls.lock().unwrap().push(format!("update {}", request.node_id));
            Ok(Applied::new(identity))
        }

        async fn delete(&self, identity: &str) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push(format!("delete {identity}"));
            Ok(())
        }

        async fn exists(&self, _identity: &str) -> Result<bool, ProviderError> {
            Ok(true)
        }
    }

    struct ExitCode(i32);

    impl JobRunner for ExitCode {
        fn name(&self) -> &str {
            "exit"
        }

        async fn run(
            &self,
            spec: &JobSpec,
            environment: &BTreeMap<String, String>,
        ) -> Result<JobOutput, ProviderError> {
            let mut output = JobOutput {
                exit_code: self.0,
                ..JobOutput::default()
            };
            output.outputs.insert("node".to_string(), json!(spec.node_id));
            if let Some(region) = environment.get("REGION") {
                output.outputs.insert("region".to_string(), json!(region));
            }
            Ok(output)
        }
    }

    fn fast_options() -> ExecuteOptions {
        ExecuteOptions {
            concurrency: 2,
            default_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 2.0,
                max_delay: Duration::from_millis(4),
            },
            environment: BTreeMap::from([("REGION".to_string(), "eu".to_string())]),
        }
    }

    fn setup(recorder: &Arc<Recorder>, exit_code: i32) -> (Arc<MemoryStateStore>, Executor<MemoryStateStore>) {
        let mut registry = ProviderRegistry::new();
        registry.register_provider(Arc::clone(recorder));
        registry.register_runner(ExitCode(exit_code));
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(Arc::clone(&store), Arc::new(registry), fast_options());
        (store, executor)
    }

    async fn apply(
        executor: &Executor<MemoryStateStore>,
        store: &MemoryStateStore,
        decls: Vec<Declaration>,
    ) -> Vec<NodeReport> {
        let graph = Arc::new(Graph::build(decls).unwrap());
        let plan = plan(&graph, store, &NoSchemas).await.unwrap();
        executor
            .apply(&plan, &graph, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn res(id: &str) -> Declaration {
        Declaration::resource(id, "rec")
    }

    #[tokio::test]
    async fn test_create_commits_record_and_resolves_references() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        let reports = apply(
            &executor,
            &store,
            vec![
                res("network").with_attribute("name", AttrValue::literal("default")),
                res("instance").with_attribute("net", AttrValue::reference("network", "id")),
            ],
        )
        .await;

        assert!(reports.iter().all(|r| r.outcome == NodeOutcome::Success));
        let instance = store.load("instance").await.unwrap().unwrap();
        assert_eq!(instance.identity, "instance-1");
        assert_eq!(instance.dependencies, vec!["network"]);
        assert_eq!(instance.outputs["echo"], json!({"net": "network-1"}));
        assert_eq!(instance.attributes["net"], AttrValue::reference("network", "id"));
        assert!(store.pending_intents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_references_fall_back_to_stored_outputs() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        apply(&executor, &store, vec![res("network")]).await;

        let reports = apply(
            &executor,
            &store,
            vec![
                res("network"),
                res("instance").with_attribute("net", AttrValue::reference("network", "id")),
            ],
        )
        .await;
        assert_eq!(reports[0].outcome, NodeOutcome::NoOp);
        assert_eq!(reports[1].outcome, NodeOutcome::Success);
        let instance = store.load("instance").await.unwrap().unwrap();
        assert_eq!(instance.outputs["echo"], json!({"net": "network-1"}));
    }

    #[tokio::test]
    async fn test_missing_output_fails_node() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        let reports = apply(
            &executor,
            &store,
            vec![
                res("network"),
                res("instance").with_attribute("net", AttrValue::reference("network", "nope")),
            ],
        )
        .await;
        let NodeOutcome::Failed { reason } = &reports[1].outcome else {
            panic!("expected failure, got {:?}", reports[1].outcome);
        };
        assert!(reason.contains("${network.nope}"));
        assert_eq!(reports[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_failure_skips_transitive_dependents_only() {
        let recorder = Arc::new(Recorder {
            fail_on: vec!["b".to_string()],
            ..Recorder::default()
        });
        let (store, executor) = setup(&recorder, 0);
        let reports = apply(
            &executor,
            &store,
            vec![
                res("b"),
                res("a").with_needs(["b"]),
                res("c").with_needs(["a"]),
                res("independent"),
            ],
        )
        .await;

        let outcome = |id: &str| reports.iter().find(|r| r.node_id == id).unwrap().outcome.clone();
        assert!(outcome("b").is_failed());
        let upstream_b = NodeOutcome::Skipped {
            reason: SkipReason::UpstreamFailed {
                node: "b".to_string(),
            },
        };
        assert_eq!(outcome("a"), upstream_b);
        assert_eq!(outcome("c"), upstream_b);
        assert_eq!(outcome("independent"), NodeOutcome::Success);
        assert_eq!(reports.len(), 4);
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        let reports = apply(&executor, &store, vec![res("flaky")]).await;
        assert_eq!(reports[0].outcome, NodeOutcome::Success);
        assert_eq!(reports[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_keeps_intent_for_reconciliation() {
        let recorder = Arc::new(Recorder {
            fail_on: vec!["web".to_string()],
            ..Recorder::default()
        });
        let (store, executor) = setup(&recorder, 0);
        let reports = apply(&executor, &store, vec![res("web")]).await;
        assert_eq!(reports[0].attempts, 1);
        let intents = store.pending_intents().await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].operation, Operation::Create);
    }

    #[tokio::test]
    async fn test_update_bumps_serial() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        apply(&executor, &store, vec![res("web").with_attribute("size", AttrValue::literal(1))]).await;
        let reports = apply(
            &executor,
            &store,
            vec![res("web").with_attribute("size", AttrValue::literal(2))],
        )
        .await;
        assert_eq!(reports[0].operation, Operation::Update);
        let record = store.load("web").await.unwrap().unwrap();
        assert_eq!(record.serial, 2);
        assert_eq!(record.attributes["size"], AttrValue::literal(2));
    }

    #[tokio::test]
    async fn test_stale_dependencies_rewritten_without_provider_call() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        apply(&executor, &store, vec![res("r"), res("s")]).await;
        let calls = recorder.calls.lock().unwrap().len();

        let reports = apply(&executor, &store, vec![res("r"), res("s").with_needs(["r"])]).await;
        assert!(reports.iter().all(|r| r.outcome == NodeOutcome::NoOp));
        assert_eq!(recorder.calls.lock().unwrap().len(), calls);

        let record = store.load("s").await.unwrap().unwrap();
        assert_eq!(record.dependencies, vec!["r"]);
        assert_eq!(record.serial, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        apply(&executor, &store, vec![res("web")]).await;
        let reports = apply(&executor, &store, vec![]).await;
        assert_eq!(reports[0].operation, Operation::Delete);
        assert!(store.load("web").await.unwrap().is_none());
        assert!(recorder.calls.lock().unwrap().contains(&"delete web-1".to_string()));
    }

    #[tokio::test]
    async fn test_job_outputs_and_environment() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        let reports = apply(
            &executor,
            &store,
            vec![
                Declaration::job("build", "exit"),
                res("deploy").with_attribute("region", AttrValue::reference("build", "region")),
            ],
        )
        .await;
        assert!(reports.iter().all(|r| r.outcome == NodeOutcome::Success));
        let deploy = store.load("deploy").await.unwrap().unwrap();
        assert_eq!(deploy.outputs["echo"], json!({"region": "eu"}));
        assert!(store.load("build").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_job_and_skips_dependents() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 2);
        let reports = apply(
            &executor,
            &store,
            vec![
                Declaration::job("test", "exit"),
                Declaration::job("publish", "exit").with_needs(["test"]),
            ],
        )
        .await;
        assert_eq!(
            reports[0].outcome,
            NodeOutcome::Failed {
                reason: "job exited with code 2".to_string()
            }
        );
        assert!(reports[1].outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let recorder = Arc::new(Recorder::default());
        let (store, executor) = setup(&recorder, 0);
        let graph = Arc::new(Graph::build(vec![res("a"), res("b").with_needs(["a"])]).unwrap());
        let plan = plan(&graph, store.as_ref(), &NoSchemas).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let reports = executor.apply(&plan, &graph, &cancel).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome.is_skipped()));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }
}
