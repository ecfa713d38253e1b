//! Crash reconciliation of interrupted provider mutations.
//!
//! The executor journals a [`PendingIntent`] before every provider mutation
//! and the commit clears it. An intent still present at the start of a run
//! means the process stopped between the provider call and the commit. Each
//! leftover is resolved against the provider before planning, so the plan
//! sees state that matches reality.

use chrono::Utc;
use reconcile_types::error::{ProviderError, StateError};
use reconcile_types::plan::Operation;
use reconcile_types::state::{PendingIntent, StateRecord};

use crate::provider::{ProviderRegistry, ResourceRequest};
use crate::repository::StateStore;

/// What reconciliation did, by intent count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Resources found at the provider and recorded in state.
    pub adopted: usize,
    /// Intents dropped because the state record is already correct.
    pub discarded: usize,
    /// Records removed because the resource no longer exists.
    pub removed: usize,
    /// Intents left in place (unknown provider or provider error).
    pub kept: usize,
}

impl ReconcileSummary {
    pub fn total(&self) -> usize {
        self.adopted + self.discarded + self.removed + self.kept
    }
}

enum Resolution {
    Adopted,
    Discarded,
    Removed,
}

/// Resolve every pending intent in `store`.
///
/// Only state errors abort; a provider that is missing or failing leaves its
/// intent for the next run.
pub async fn reconcile_intents<S: StateStore>(
    store: &S,
    registry: &ProviderRegistry,
) -> Result<ReconcileSummary, StateError> {
    let mut summary = ReconcileSummary::default();

    for intent in store.pending_intents().await? {
        let Some(provider) = registry.provider(&intent.resource_type) else {
            tracing::warn!(
                node = intent.node_id.as_str(),
                resource_type = intent.resource_type.as_str(),
                "pending intent for unregistered provider, keeping it"
            );
            summary.kept += 1;
            continue;
        };

        let resolution = match resolve(store, &intent, &provider).await {
            Ok(resolution) => resolution,
            Err(ResolveError::State(e)) => return Err(e),
            Err(ResolveError::Provider(e)) => {
                tracing::warn!(
                    node = intent.node_id.as_str(),
                    operation = %intent.operation,
                    error = %e,
                    "could not reconcile pending intent, keeping it"
                );
                summary.kept += 1;
                continue;
            }
        };

        match resolution {
            Resolution::Adopted => summary.adopted += 1,
            Resolution::Discarded => summary.discarded += 1,
            Resolution::Removed => summary.removed += 1,
        }
        tracing::info!(
            node = intent.node_id.as_str(),
            operation = %intent.operation,
            "reconciled interrupted operation"
        );
    }

    Ok(summary)
}

enum ResolveError {
    State(StateError),
    Provider(ProviderError),
}

impl From<StateError> for ResolveError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<ProviderError> for ResolveError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

async fn resolve<S: StateStore>(
    store: &S,
    intent: &PendingIntent,
    provider: &crate::provider::BoxResourceProvider,
) -> Result<Resolution, ResolveError> {
    match intent.operation {
        Operation::Create => {
            let request = ResourceRequest::new(intent.node_id.clone(), intent.resolved.clone());
            match provider.lookup(&request).await? {
                Some(applied) => {
                    let record = StateRecord {
                        node_id: intent.node_id.clone(),
                        resource_type: intent.resource_type.clone(),
                        attributes: intent.attributes.clone(),
                        identity: applied.identity,
                        outputs: applied.outputs,
                        dependencies: intent.dependencies.clone(),
                        serial: intent.previous_serial + 1,
                        updated_at: Utc::now(),
                    };
                    store.save(&record).await?;
                    Ok(Resolution::Adopted)
                }
                None => {
                    store.clear_intent(&intent.node_id).await?;
                    Ok(Resolution::Discarded)
                }
            }
        }
        Operation::Replace | Operation::Delete => {
            let still_exists = match &intent.identity {
                Some(identity) => provider.exists(identity).await?,
                None => false,
            };
            if still_exists {
                store.clear_intent(&intent.node_id).await?;
                Ok(Resolution::Discarded)
            } else {
                store.delete(&intent.node_id).await?;
                Ok(Resolution::Removed)
            }
        }
        // The old record stays; the planner re-issues the idempotent update.
        Operation::Update | Operation::NoOp | Operation::Run => {
            store.clear_intent(&intent.node_id).await?;
            Ok(Resolution::Discarded)
        }
    }
}
