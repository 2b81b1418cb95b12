use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    error::SnapshotError,
    process::shell_quote,
    remote::{RemoteCommandService, invocations_document},
    waiter::Waiter,
};

pub const DEFAULT_MOUNT: &str = "/hana/data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeAction {
    Freeze,
    Thaw,
}

impl FreezeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Freeze => "freeze",
            Self::Thaw => "thaw",
        }
    }
}

pub fn freeze_script(mount: &str) -> Vec<String> {
    vec![format!("fsfreeze --freeze {}", shell_quote(mount))]
}

/// `fsfreeze --unfreeze` answers `Invalid argument` when the filesystem is not
/// frozen; that counts as thawed.
pub fn thaw_script(mount: &str) -> Vec<String> {
    let mount = shell_quote(mount);
    vec![format!(
        "out=$(fsfreeze --unfreeze {mount} 2>&1) || echo \"$out\" | grep -q 'Invalid argument' || {{ echo \"$out\" >&2; exit 1; }}"
    )]
}

/// Freezes and thaws a filesystem on a remote host. Callers own the thaw:
/// every freeze attempt, even one whose dispatch failed, must be followed
/// by one.
#[derive(Clone)]
pub struct FreezeController {
    commands: Arc<dyn RemoteCommandService>,
    waiter: Waiter,
}

impl FreezeController {
    pub fn new(commands: Arc<dyn RemoteCommandService>, waiter: Waiter) -> Self {
        Self { commands, waiter }
    }

    pub async fn freeze(&self, host_id: &str, mount: &str) -> Result<(), SnapshotError> {
        self.run(host_id, mount, FreezeAction::Freeze, freeze_script(mount))
            .await
    }

    /// Safe to call when the filesystem is already thawed.
    pub async fn thaw(&self, host_id: &str, mount: &str) -> Result<(), SnapshotError> {
        self.run(host_id, mount, FreezeAction::Thaw, thaw_script(mount))
            .await
    }

    async fn run(
        &self,
        host_id: &str,
        mount: &str,
        action: FreezeAction,
        script: Vec<String>,
    ) -> Result<(), SnapshotError> {
        let command_id = self.commands.dispatch(host_id, &script).await?;
        info!(
            host_id,
            mount,
            action = action.as_str(),
            command_id = %command_id,
            "filesystem command issued"
        );

        let commands = &self.commands;
        let command_id = command_id.as_str();
        let result = self
            .waiter
            .wait(|| async move {
                let invocations = commands.poll_status(command_id, host_id).await?;
                Ok::<_, SnapshotError>(invocations_document(&invocations))
            })
            .await;

        match result {
            Ok(_) => {
                info!(host_id, mount, action = action.as_str(), "filesystem command completed");
                Ok(())
            }
            Err(err) => {
                // No retry here; the caller owns the retry/compensation policy.
                warn!(
                    host_id,
                    mount,
                    action = action.as_str(),
                    command_id,
                    error = %err,
                    "filesystem command did not complete"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use crate::{
        error::ErrorKind,
        process::BoxFuture,
        remote::CommandInvocation,
        waiter::{SSM_COMMAND_INVOCATIONS, ssm_command_invocations},
    };

    #[derive(Default)]
    struct FakeCommands {
        dispatched: Mutex<Vec<(String, Vec<String>)>>,
        status: Mutex<Vec<&'static str>>,
        polls: Mutex<u32>,
    }

    impl RemoteCommandService for FakeCommands {
        fn dispatch<'a>(
            &'a self,
            host_id: &'a str,
            script: &'a [String],
        ) -> BoxFuture<'a, Result<String, SnapshotError>> {
            Box::pin(async move {
                let mut dispatched = self.dispatched.lock().unwrap();
                dispatched.push((host_id.to_string(), script.to_vec()));
                Ok(format!("cmd-{}", dispatched.len()))
            })
        }

        fn poll_status<'a>(
            &'a self,
            command_id: &'a str,
            host_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<CommandInvocation>, SnapshotError>> {
            Box::pin(async move {
                let mut polls = self.polls.lock().unwrap();
                let statuses = self.status.lock().unwrap();
                let status = statuses[(*polls as usize).min(statuses.len() - 1)];
                *polls += 1;
                Ok(vec![CommandInvocation {
                    command_id: command_id.to_string(),
                    instance_id: host_id.to_string(),
                    status: status.to_string(),
                }])
            })
        }
    }

    fn controller(statuses: Vec<&'static str>) -> (Arc<FakeCommands>, FreezeController) {
        let commands = Arc::new(FakeCommands {
            status: Mutex::new(statuses),
            ..FakeCommands::default()
        });
        let waiter = Waiter::new(SSM_COMMAND_INVOCATIONS, ssm_command_invocations())
            .unwrap()
            .with_delay(1)
            .with_max_attempts(3);
        (commands.clone(), FreezeController::new(commands, waiter))
    }

    #[test]
    fn scripts_quote_the_mount() {
        assert_eq!(freeze_script("/hana/data"), vec!["fsfreeze --freeze /hana/data"]);
        assert!(
            thaw_script("/mnt/my data")[0]
                .starts_with("out=$(fsfreeze --unfreeze '/mnt/my data' 2>&1)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn freeze_waits_for_command_success() {
        let (commands, controller) = controller(vec!["Pending", "InProgress", "Success"]);
        controller.freeze("i-0abc", "/hana/data").await.unwrap();

        assert_eq!(*commands.polls.lock().unwrap(), 3);
        let dispatched = commands.dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0, "i-0abc");
        assert_eq!(dispatched[0].1, freeze_script("/hana/data"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_is_reported_without_retry() {
        let (commands, controller) = controller(vec!["Failed"]);
        let err = controller.thaw("i-0abc", "/hana/data").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WaiterFailure);
        assert_eq!(commands.dispatched.lock().unwrap().len(), 1);
        assert_eq!(*commands.polls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_command_times_out() {
        let (commands, controller) = controller(vec!["InProgress"]);
        let err = controller.freeze("i-0abc", "/hana/data").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WaiterTimeout);
        assert_eq!(commands.dispatched.lock().unwrap().len(), 1);
        assert_eq!(*commands.polls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn thaw_twice_is_fine() {
        let (commands, controller) = controller(vec!["Success"]);
        controller.thaw("i-0abc", "/hana/data").await.unwrap();
        controller.thaw("i-0abc", "/hana/data").await.unwrap();
        assert_eq!(commands.dispatched.lock().unwrap().len(), 2);
    }
}
