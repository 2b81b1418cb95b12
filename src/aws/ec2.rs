use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::AwsCli;
use crate::{
    error::SnapshotError,
    process::BoxFuture,
    volumes::{SnapshotStatus, Tag, TagFilter, Volume, VolumeSnapshotService},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumesOutput {
    #[serde(default)]
    volumes: Vec<VolumeItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeItem {
    volume_id: String,
    #[serde(default)]
    attachments: Vec<AttachmentItem>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttachmentItem {
    device: Option<String>,
    state: Option<String>,
    instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSnapshotOutput {
    snapshot_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSnapshotsOutput {
    #[serde(default)]
    snapshots: Vec<SnapshotStatus>,
}

impl VolumeItem {
    fn into_volume(self, host_id: &str) -> Volume {
        let attachment = self
            .attachments
            .iter()
            .find(|a| a.instance_id.as_deref() == Some(host_id))
            .or_else(|| self.attachments.first());
        Volume {
            volume_id: self.volume_id.clone(),
            device: attachment.and_then(|a| a.device.clone()),
            attachment_state: attachment.and_then(|a| a.state.clone()),
            tags: self
                .tags
                .iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

/// EBS volumes and snapshots through `aws ec2`.
#[derive(Clone)]
pub struct Ec2Volumes {
    cli: AwsCli,
}

impl Ec2Volumes {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    async fn list_volumes_inner(
        &self,
        host_id: &str,
        filter: &TagFilter,
    ) -> Result<Vec<Volume>, SnapshotError> {
        let filters = json!([
            { "Name": "attachment.instance-id", "Values": [host_id] },
            { "Name": format!("tag:{}", filter.key), "Values": filter.values },
        ]);
        let out = self
            .cli
            .call(
                "ec2",
                "describe-volumes",
                vec!["--filters".to_string(), filters.to_string()],
            )
            .await
            .map_err(|e| SnapshotError::connection("ec2", format!("{e:#}")))?;
        let parsed: DescribeVolumesOutput = serde_json::from_value(out)
            .map_err(|e| SnapshotError::connection("ec2", format!("describe-volumes: {e}")))?;

        let volumes: Vec<Volume> = parsed
            .volumes
            .into_iter()
            .map(|v| v.into_volume(host_id))
            .collect();
        debug!(host_id, count = volumes.len(), "volumes matched tag filter");
        Ok(volumes)
    }

    async fn create_snapshot_inner(
        &self,
        volume: &Volume,
        description: &str,
        tags: &[Tag],
    ) -> Result<String, SnapshotError> {
        let spec = json!([{ "ResourceType": "snapshot", "Tags": tags }]);
        let out = self
            .cli
            .call(
                "ec2",
                "create-snapshot",
                vec![
                    "--volume-id".to_string(),
                    volume.volume_id.clone(),
                    "--description".to_string(),
                    description.to_string(),
                    "--tag-specifications".to_string(),
                    spec.to_string(),
                ],
            )
            .await
            .map_err(|e| SnapshotError::connection("ec2", format!("{e:#}")))?;
        let parsed: CreateSnapshotOutput = serde_json::from_value(out)
            .map_err(|e| SnapshotError::connection("ec2", format!("create-snapshot: {e}")))?;
        Ok(parsed.snapshot_id)
    }

    async fn describe_snapshots_inner(
        &self,
        snapshot_ids: &[String],
    ) -> Result<Vec<SnapshotStatus>, SnapshotError> {
        let mut params = vec!["--snapshot-ids".to_string()];
        params.extend(snapshot_ids.iter().cloned());
        let out = self
            .cli
            .call("ec2", "describe-snapshots", params)
            .await
            .map_err(|e| SnapshotError::connection("ec2", format!("{e:#}")))?;
        let parsed: DescribeSnapshotsOutput = serde_json::from_value(out)
            .map_err(|e| SnapshotError::connection("ec2", format!("describe-snapshots: {e}")))?;
        Ok(parsed.snapshots)
    }
}

impl VolumeSnapshotService for Ec2Volumes {
    fn list_volumes<'a>(
        &'a self,
        host_id: &'a str,
        filter: &'a TagFilter,
    ) -> BoxFuture<'a, Result<Vec<Volume>, SnapshotError>> {
        Box::pin(self.list_volumes_inner(host_id, filter))
    }

    fn create_snapshot<'a>(
        &'a self,
        volume: &'a Volume,
        description: &'a str,
        tags: &'a [Tag],
    ) -> BoxFuture<'a, Result<String, SnapshotError>> {
        Box::pin(self.create_snapshot_inner(volume, description, tags))
    }

    fn describe_snapshots<'a>(
        &'a self,
        snapshot_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<SnapshotStatus>, SnapshotError>> {
        Box::pin(self.describe_snapshots_inner(snapshot_ids))
    }
}
