use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::AwsCli;
use crate::{
    error::SnapshotError,
    process::BoxFuture,
    remote::{CommandInvocation, RemoteCommandService},
};

pub const RUN_SHELL_SCRIPT_DOCUMENT: &str = "AWS-RunShellScript";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendCommandOutput {
    command: SentCommand,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SentCommand {
    command_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListCommandInvocationsOutput {
    #[serde(default)]
    command_invocations: Vec<CommandInvocation>,
}

/// Shell commands on EC2 hosts through `aws ssm`.
#[derive(Clone)]
pub struct SsmCommands {
    cli: AwsCli,
    comment: String,
}

impl SsmCommands {
    pub fn new(cli: AwsCli) -> Self {
        Self {
            cli,
            comment: "hdbsnap".to_string(),
        }
    }

    async fn dispatch_inner(
        &self,
        host_id: &str,
        script: &[String],
    ) -> Result<String, SnapshotError> {
        let parameters = json!({ "commands": script });
        let out = self
            .cli
            .call(
                "ssm",
                "send-command",
                vec![
                    "--instance-ids".to_string(),
                    host_id.to_string(),
                    "--document-name".to_string(),
                    RUN_SHELL_SCRIPT_DOCUMENT.to_string(),
                    "--comment".to_string(),
                    self.comment.clone(),
                    "--parameters".to_string(),
                    parameters.to_string(),
                ],
            )
            .await
            .map_err(|e| SnapshotError::dispatch(host_id, format!("{e:#}")))?;
        let parsed: SendCommandOutput = serde_json::from_value(out)
            .map_err(|e| SnapshotError::dispatch(host_id, format!("send-command: {e}")))?;
        debug!(host_id, command_id = %parsed.command.command_id, "command sent");
        Ok(parsed.command.command_id)
    }

    async fn poll_status_inner(
        &self,
        command_id: &str,
        host_id: &str,
    ) -> Result<Vec<CommandInvocation>, SnapshotError> {
        let out = self
            .cli
            .call(
                "ssm",
                "list-command-invocations",
                vec![
                    "--command-id".to_string(),
                    command_id.to_string(),
                    "--instance-id".to_string(),
                    host_id.to_string(),
                ],
            )
            .await
            .map_err(|e| SnapshotError::connection("ssm", format!("{e:#}")))?;
        let parsed: ListCommandInvocationsOutput = serde_json::from_value(out).map_err(|e| {
            SnapshotError::connection("ssm", format!("list-command-invocations: {e}"))
        })?;
        Ok(parsed.command_invocations)
    }
}

impl RemoteCommandService for SsmCommands {
    fn dispatch<'a>(
        &'a self,
        host_id: &'a str,
        script: &'a [String],
    ) -> BoxFuture<'a, Result<String, SnapshotError>> {
        Box::pin(self.dispatch_inner(host_id, script))
    }

    fn poll_status<'a>(
        &'a self,
        command_id: &'a str,
        host_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CommandInvocation>, SnapshotError>> {
        Box::pin(self.poll_status_inner(command_id, host_id))
    }
}
