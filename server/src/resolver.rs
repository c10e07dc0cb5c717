//! Out-of-line resolver steps
//!
//! A handler may declare resolvers that must finish before its item is
//! allowed into the pending queue. Each resolver runs on its own tokio task
//! and its typed output is captured as a [`RecordedResolverOutput`] so that
//! replay can inject the value instead of running the resolver again.
//!
//! Items without resolvers never reach this module.

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::{ActorIdentity, RecordedResolverOutput, ResolverOutputs};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::LandError;
use crate::pending::Submission;
use crate::registry::TypeIdentified;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("{0}")]
    Failed(String),
    #[error("output could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Inputs available to a resolver
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub land_id: String,
    pub type_identifier: String,
    pub payload: Value,
    pub actor: ActorIdentity,
}

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Name the output is captured under
    fn name(&self) -> &str;

    async fn resolve(&self, ctx: &ResolverContext)
        -> Result<RecordedResolverOutput, ResolverError>;
}

/// Captures a typed value together with its type identifier
pub fn capture<T>(value: &T) -> Result<RecordedResolverOutput, ResolverError>
where
    T: TypeIdentified + Serialize,
{
    Ok(RecordedResolverOutput {
        type_identifier: T::TYPE_IDENTIFIER.to_string(),
        value: serde_json::to_value(value)?,
    })
}

/// Decodes a captured output, refusing values recorded under another type
pub fn decode_output<T>(name: &str, output: &RecordedResolverOutput) -> Result<T, LandError>
where
    T: TypeIdentified + DeserializeOwned,
{
    if output.type_identifier != T::TYPE_IDENTIFIER {
        return Err(LandError::TypeMismatch {
            name: name.to_string(),
            expected: T::TYPE_IDENTIFIER.to_string(),
            found: output.type_identifier.clone(),
        });
    }
    T::deserialize(&output.value).map_err(|source| LandError::Decode {
        type_identifier: output.type_identifier.clone(),
        source,
    })
}

/// Runs every resolver concurrently and collects their outputs by name.
/// Results are taken as they finish; the first failure cancels the
/// resolvers still running.
pub async fn resolve_all(
    resolvers: &[Arc<dyn Resolver>],
    ctx: Arc<ResolverContext>,
) -> Result<ResolverOutputs, LandError> {
    let mut set = JoinSet::new();
    let mut names = HashMap::new();
    for resolver in resolvers {
        let resolver = Arc::clone(resolver);
        let ctx = Arc::clone(&ctx);
        let name = resolver.name().to_string();
        let task = set.spawn(async move { resolver.resolve(&ctx).await });
        names.insert(task.id(), name);
    }

    let mut outputs = ResolverOutputs::new();
    while let Some(joined) = set.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, Ok(output))) => (id, Ok(output)),
            Ok((id, Err(e))) => (id, Err(e.to_string())),
            Err(join_error) => (join_error.id(), Err(join_error.to_string())),
        };
        let name = names.remove(&id).unwrap_or_default();
        match result {
            Ok(output) => {
                outputs.insert(name, output);
            }
            Err(reason) => {
                set.abort_all();
                return Err(LandError::ResolverFailure {
                    resolver: name,
                    reason,
                });
            }
        }
    }
    Ok(outputs)
}

/// Result of an item's resolution, handed back to the owning land
pub struct ResolverCompletion {
    pub submission: Submission,
    pub result: Result<ResolverOutputs, LandError>,
}

/// Spawns resolution work for a land and routes completions back to it
pub struct ResolverRunner {
    land_id: String,
    completions: mpsc::UnboundedSender<ResolverCompletion>,
    tasks_spawned: u64,
}

impl ResolverRunner {
    pub fn new(
        land_id: impl Into<String>,
        completions: mpsc::UnboundedSender<ResolverCompletion>,
    ) -> Self {
        Self {
            land_id: land_id.into(),
            completions,
            tasks_spawned: 0,
        }
    }

    pub fn spawn(&mut self, submission: Submission, resolvers: Vec<Arc<dyn Resolver>>) {
        self.tasks_spawned += 1;
        let ctx = Arc::new(ResolverContext {
            land_id: self.land_id.clone(),
            type_identifier: submission.type_identifier.clone(),
            payload: submission.payload.clone(),
            actor: submission.actor.clone(),
        });
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let result = resolve_all(&resolvers, ctx).await;
            let sequence = submission.sequence;
            if completions
                .send(ResolverCompletion { submission, result })
                .is_err()
            {
                debug!("Land closed before item {} finished resolving", sequence);
            }
        });
    }

    /// Number of resolution tasks started so far
    pub fn tasks_spawned(&self) -> u64 {
        self.tasks_spawned
    }
}
