use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::SnapshotError, process::BoxFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Success,
    Failed,
}

impl CommandStatus {
    /// Collapses the provider's detailed status strings into three states.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "Success" => Self::Success,
            "Failed" | "Cancelled" | "TimedOut" | "Undeliverable" | "Terminated" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One dispatched shell command as reported back by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandInvocation {
    pub command_id: String,
    pub instance_id: String,
    pub status: String,
}

impl CommandInvocation {
    pub fn status(&self) -> CommandStatus {
        CommandStatus::from_provider(&self.status)
    }
}

/// Document shape the command waiter's acceptors project over.
pub fn invocations_document(invocations: &[CommandInvocation]) -> Value {
    serde_json::json!({ "CommandInvocations": invocations })
}

pub trait RemoteCommandService: Send + Sync {
    /// Issues `script` (one shell command per line) on `host_id`.
    fn dispatch<'a>(
        &'a self,
        host_id: &'a str,
        script: &'a [String],
    ) -> BoxFuture<'a, Result<String, SnapshotError>>;

    fn poll_status<'a>(
        &'a self,
        command_id: &'a str,
        host_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CommandInvocation>, SnapshotError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn invocation_document_matches_waiter_argument() {
        let doc = invocations_document(&[CommandInvocation {
            command_id: "c-1".to_string(),
            instance_id: "i-1".to_string(),
            status: "InProgress".to_string(),
        }]);
        assert_eq!(
            doc,
            json!({
                "CommandInvocations": [
                    { "CommandId": "c-1", "InstanceId": "i-1", "Status": "InProgress" }
                ]
            })
        );
    }

    #[test]
    fn provider_statuses_collapse() {
        assert_eq!(CommandStatus::from_provider("Success"), CommandStatus::Success);
        assert_eq!(CommandStatus::from_provider("TimedOut"), CommandStatus::Failed);
        assert_eq!(CommandStatus::from_provider("InProgress"), CommandStatus::Pending);
        assert_eq!(CommandStatus::from_provider("Delayed"), CommandStatus::Pending);
    }
}
