//! Orchestrator: drives build -> plan -> apply and aggregates the result.
//!
//! Phases move `Idle -> Building -> Planning -> Applying -> Done`, or to
//! `Failed` when building, planning, or the state store fails outright.
//! Node failures do not fail the run: a `Done` report can still carry failed
//! and skipped nodes, and every node appears in it.

use std::sync::Arc;

use chrono::Utc;
use reconcile_types::error::StateError;
use reconcile_types::node::Declaration;
use reconcile_types::plan::Plan;
use reconcile_types::run::{RunPhase, RunReport, RunSummary};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::executor::{ExecuteOptions, Executor, ExecutorError};
use super::graph::{Graph, GraphError};
use super::planner::{self, PlanError};
use super::reconcile::reconcile_intents;
use crate::provider::ProviderRegistry;
use crate::repository::StateStore;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    State(#[from] StateError),

    /// State corruption stopped the apply. `report` is in the `Failed` phase
    /// and lists every node, including those that finished before the stop.
    #[error("run aborted: {source}")]
    Aborted {
        #[source]
        source: StateError,
        report: Box<RunReport>,
    },
}

impl OrchestratorError {
    /// The partial run report, when the failure happened mid-apply.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            OrchestratorError::Aborted { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

/// End-to-end driver for one state store and provider registry.
///
/// [`Orchestrator::cancel`] applies to every run of this orchestrator; once
/// cancelled, later runs dispatch nothing. Each run applies under a child
/// token, so an abort inside one run never leaks into the next.
pub struct Orchestrator<S: StateStore> {
    store: Arc<S>,
    registry: Arc<ProviderRegistry>,
    executor: Executor<S>,
    phase: watch::Sender<RunPhase>,
    cancel: CancellationToken,
}

impl<S: StateStore + 'static> Orchestrator<S> {
    pub fn new(store: Arc<S>, registry: Arc<ProviderRegistry>, options: ExecuteOptions) -> Self {
        let executor = Executor::new(Arc::clone(&store), Arc::clone(&registry), options);
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            store,
            registry,
            executor,
            phase,
            cancel: CancellationToken::new(),
        }
    }

    /// Reconcile interrupted operations, plan and apply `declarations`.
    pub async fn run(&self, declarations: Vec<Declaration>) -> Result<RunReport, OrchestratorError> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        tracing::info!(run_id = %run_id, nodes = declarations.len(), "starting run");

        self.set_phase(RunPhase::Building);
        let graph = Arc::new(Graph::build(declarations).map_err(|e| self.fail(run_id, e))?);

        self.set_phase(RunPhase::Planning);
        let reconciled = reconcile_intents(self.store.as_ref(), &self.registry)
            .await
            .map_err(|e| self.fail(run_id, e))?;
        if reconciled.total() > 0 {
            tracing::info!(
                run_id = %run_id,
                adopted = reconciled.adopted,
                removed = reconciled.removed,
                discarded = reconciled.discarded,
                kept = reconciled.kept,
                "reconciled pending intents"
            );
        }
        let plan = planner::plan(&graph, self.store.as_ref(), self.registry.as_ref())
            .await
            .map_err(|e| self.fail(run_id, e))?;
        tracing::info!(run_id = %run_id, summary = %plan.summary(), "plan ready");

        self.set_phase(RunPhase::Applying);
        let run_cancel = self.cancel.child_token();
        let nodes = match self.executor.apply(&plan, &graph, &run_cancel).await {
            Ok(nodes) => nodes,
            Err(ExecutorError::StateCorrupted { source, reports }) => {
                let summary = RunSummary::from_reports(&reports);
                let report = RunReport {
                    run_id,
                    phase: RunPhase::Failed,
                    plan,
                    nodes: reports,
                    summary,
                    started_at,
                    finished_at: Utc::now(),
                };
                return Err(self.fail(
                    run_id,
                    OrchestratorError::Aborted {
                        source,
                        report: Box::new(report),
                    },
                ));
            }
            Err(e) => return Err(self.fail(run_id, e)),
        };

        let summary = RunSummary::from_reports(&nodes);
        self.set_phase(RunPhase::Done);
        tracing::info!(
            run_id = %run_id,
            succeeded = summary.succeeded,
            no_op = summary.no_op,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );

        Ok(RunReport {
            run_id,
            phase: RunPhase::Done,
            plan,
            nodes,
            summary,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Dry run: build and plan without reconciling or applying anything.
    pub async fn plan(&self, declarations: Vec<Declaration>) -> Result<Plan, OrchestratorError> {
        let graph = Graph::build(declarations)?;
        Ok(planner::plan(&graph, self.store.as_ref(), self.registry.as_ref()).await?)
    }

    /// Delete every resource in state, dependents first.
    pub async fn destroy(&self) -> Result<RunReport, OrchestratorError> {
        self.run(Vec::new()).await
    }

    /// Stop dispatching new nodes. In-flight provider calls finish.
    pub fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.cancel.cancel();
    }

    /// Handle for cancelling from another task (e.g. a Ctrl-C handler).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: RunPhase) {
        tracing::debug!(phase = %phase, "phase change");
        self.phase.send_replace(phase);
    }

    fn fail(&self, run_id: Uuid, err: impl Into<OrchestratorError>) -> OrchestratorError {
        let err = err.into();
        tracing::error!(run_id = %run_id, error = %err, "run failed");
        self.set_phase(RunPhase::Failed);
        err
    }
}
