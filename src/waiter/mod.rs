//! Poll-until-terminal-state primitive driven by declarative acceptors.
//!
//! A [`Waiter`] is an immutable value built from a [`WaiterConfig`]. Each call
//! to [`Waiter::wait`] polls a caller-supplied function, evaluates the
//! acceptors in declared order against the returned document and stops on the
//! first success or failure match, or when the attempt budget is spent.

mod model;
mod path;

use std::{future::Future, time::Duration};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SnapshotError;

pub use model::{
    Acceptor, AcceptorState, EBS_SNAPSHOTS_COMPLETED, Matcher, SSM_COMMAND_INVOCATIONS,
    WAITER_MODEL_VERSION, WaiterConfig, WaiterModel, ebs_snapshots_completed,
    ssm_command_invocations,
};
pub use path::FieldPath;

#[derive(Debug, Clone)]
struct CompiledAcceptor {
    acceptor: Acceptor,
    path: FieldPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Success,
    Failure {
        expected: String,
        resource_ids: Vec<String>,
    },
    Retry,
    Pending,
}

#[derive(Debug, Clone)]
pub struct Waiter {
    name: String,
    config: WaiterConfig,
    acceptors: Vec<CompiledAcceptor>,
    resource_id_path: Option<FieldPath>,
}

impl Waiter {
    pub fn new(name: impl Into<String>, config: WaiterConfig) -> Result<Self, SnapshotError> {
        let name = name.into();
        if config.acceptors.is_empty() {
            return Err(SnapshotError::configuration(format!(
                "waiter {name} has no acceptors"
            )));
        }
        let acceptors = config
            .acceptors
            .iter()
            .map(|acceptor| {
                FieldPath::parse(&acceptor.argument)
                    .map(|path| CompiledAcceptor {
                        acceptor: acceptor.clone(),
                        path,
                    })
                    .map_err(|e| SnapshotError::configuration(format!("waiter {name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name,
            config,
            acceptors,
            resource_id_path: None,
        })
    }

    pub fn from_model(model: &WaiterModel, name: &str) -> Result<Self, SnapshotError> {
        Self::new(name, model.get(name)?.clone())
    }

    /// Path to each element's resource id, e.g. `Snapshots[].SnapshotId`.
    /// Names the resources that tripped a failure acceptor projecting over
    /// the same collection.
    pub fn with_resource_ids(mut self, path: &str) -> Result<Self, SnapshotError> {
        let path = FieldPath::parse(path)
            .map_err(|e| SnapshotError::configuration(format!("waiter {}: {e}", self.name)))?;
        self.resource_id_path = Some(path);
        Ok(self)
    }

    pub fn with_delay(mut self, delay_secs: u64) -> Self {
        self.config.delay = delay_secs;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.config.delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Polls until an acceptor resolves the wait. Errors returned by `poll`
    /// abort the wait unchanged. Returns the document that matched success.
    pub async fn wait<F, Fut>(&self, mut poll: F) -> Result<Value, SnapshotError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, SnapshotError>>,
    {
        let max_attempts = self.max_attempts();
        for attempt in 1..=max_attempts {
            let doc = poll().await?;
            match self.evaluate(&doc) {
                Decision::Success => {
                    debug!(waiter = %self.name, attempt, "waiter reached success state");
                    return Ok(doc);
                }
                Decision::Failure {
                    expected,
                    resource_ids,
                } => {
                    warn!(
                        waiter = %self.name,
                        attempt,
                        expected = %expected,
                        resources = ?resource_ids,
                        "waiter reached failure state"
                    );
                    return Err(SnapshotError::WaiterFailure {
                        waiter: self.name.clone(),
                        expected,
                        resource_ids,
                    });
                }
                Decision::Retry => {
                    debug!(waiter = %self.name, attempt, max_attempts, "waiter retry acceptor matched");
                }
                Decision::Pending => {
                    debug!(waiter = %self.name, attempt, max_attempts, "waiter still pending");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.delay()).await;
            }
        }

        warn!(waiter = %self.name, max_attempts, "waiter exhausted its attempts");
        Err(SnapshotError::WaiterTimeout {
            waiter: self.name.clone(),
            attempts: max_attempts,
            delay: self.delay(),
        })
    }

    fn evaluate(&self, doc: &Value) -> Decision {
        for compiled in &self.acceptors {
            let acceptor = &compiled.acceptor;
            let values = compiled.path.search(doc);
            let hits = values
                .iter()
                .filter(|v| path::value_matches(v, &acceptor.expected))
                .count();

            let matched = match acceptor.matcher {
                Matcher::Path => values.len() == 1 && hits == 1,
                Matcher::PathAll => !values.is_empty() && hits == values.len(),
                Matcher::PathAny => hits > 0,
            };
            if !matched {
                continue;
            }

            return match acceptor.state {
                AcceptorState::Success => Decision::Success,
                AcceptorState::Retry => Decision::Retry,
                AcceptorState::Failure => Decision::Failure {
                    expected: acceptor.expected.clone(),
                    resource_ids: self.failed_resource_ids(doc, compiled),
                },
            };
        }
        Decision::Pending
    }

    /// Ids of the elements whose acceptor value matched. Both paths are
    /// evaluated on each element of their shared projection, so an element
    /// missing one field cannot shift the pairing.
    fn failed_resource_ids(&self, doc: &Value, compiled: &CompiledAcceptor) -> Vec<String> {
        let Some(id_path) = &self.resource_id_path else {
            return Vec::new();
        };
        let (Some((parent, value_path)), Some((id_parent, id_field))) = (
            compiled.path.split_projection(),
            id_path.split_projection(),
        ) else {
            return Vec::new();
        };
        if parent != id_parent {
            return Vec::new();
        }

        let expected = &compiled.acceptor.expected;
        parent
            .search(doc)
            .into_iter()
            .filter(|item| {
                value_path
                    .search(item)
                    .iter()
                    .any(|v| path::value_matches(v, expected))
            })
            .filter_map(|item| {
                id_field
                    .search(item)
                    .first()
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect()
    }
}
