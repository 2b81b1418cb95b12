use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

pub const WAITER_MODEL_VERSION: u32 = 2;

pub const SSM_COMMAND_INVOCATIONS: &str = "ssmCommandInvocations";
pub const EBS_SNAPSHOTS_COMPLETED: &str = "ebsSnapshotsCompleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Matcher {
    /// The value at the path equals the expected value.
    #[serde(rename = "path")]
    Path,
    /// Every projected value equals the expected value (and there is at least one).
    #[serde(rename = "pathAll")]
    PathAll,
    /// At least one projected value equals the expected value.
    #[serde(rename = "pathAny")]
    PathAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptorState {
    Success,
    Failure,
    Retry,
}

impl AcceptorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptor {
    pub expected: String,
    pub matcher: Matcher,
    pub state: AcceptorState,
    pub argument: String,
}

impl Acceptor {
    pub fn new(
        expected: impl Into<String>,
        matcher: Matcher,
        state: AcceptorState,
        argument: impl Into<String>,
    ) -> Self {
        Self {
            expected: expected.into(),
            matcher,
            state,
            argument: argument.into(),
        }
    }
}

/// One waiter definition, serialized exactly the way waiter tooling reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaiterConfig {
    pub delay: u64,
    pub operation: String,
    pub max_attempts: u32,
    pub acceptors: Vec<Acceptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterModel {
    pub version: u32,
    pub waiters: BTreeMap<String, WaiterConfig>,
}

impl WaiterModel {
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        let model: Self = serde_json::from_str(raw)
            .map_err(|e| SnapshotError::configuration(format!("invalid waiter model: {e}")))?;
        if model.version != WAITER_MODEL_VERSION {
            return Err(SnapshotError::configuration(format!(
                "unsupported waiter model version: expected {WAITER_MODEL_VERSION}, got {}",
                model.version
            )));
        }
        Ok(model)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn get(&self, name: &str) -> Result<&WaiterConfig, SnapshotError> {
        self.waiters
            .get(name)
            .ok_or_else(|| SnapshotError::configuration(format!("unknown waiter: {name}")))
    }

    /// The waiters this crate polls with out of the box.
    pub fn builtin() -> Self {
        let mut waiters = BTreeMap::new();
        waiters.insert(
            SSM_COMMAND_INVOCATIONS.to_string(),
            ssm_command_invocations(),
        );
        waiters.insert(
            EBS_SNAPSHOTS_COMPLETED.to_string(),
            ebs_snapshots_completed(),
        );
        Self {
            version: WAITER_MODEL_VERSION,
            waiters,
        }
    }
}

/// Remote shell commands: every invocation `Success`, or any `Failed`.
pub fn ssm_command_invocations() -> WaiterConfig {
    WaiterConfig {
        delay: 15,
        operation: "ListCommandInvocations".to_string(),
        max_attempts: 40,
        acceptors: vec![
            Acceptor::new(
                "Success",
                Matcher::PathAll,
                AcceptorState::Success,
                "CommandInvocations[].Status",
            ),
            Acceptor::new(
                "Failed",
                Matcher::PathAny,
                AcceptorState::Failure,
                "CommandInvocations[].Status",
            ),
        ],
    }
}

/// Block snapshots: every snapshot `completed`, or any in `error`.
pub fn ebs_snapshots_completed() -> WaiterConfig {
    WaiterConfig {
        delay: 5,
        operation: "DescribeSnapshots".to_string(),
        max_attempts: 120,
        acceptors: vec![
            Acceptor::new(
                "completed",
                Matcher::PathAll,
                AcceptorState::Success,
                "Snapshots[].State",
            ),
            Acceptor::new(
                "error",
                Matcher::PathAny,
                AcceptorState::Failure,
                "Snapshots[].State",
            ),
        ],
    }
}
