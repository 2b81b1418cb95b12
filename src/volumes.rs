use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::SnapshotError, process::BoxFuture, session::BackupId};

pub const DEFAULT_TAG_KEY: &str = "Name";
pub const DEFAULT_TAG_VALUE: &str = "HANA-Data";
pub const BACKUP_ID_TAG: &str = "HANA-SnapshotId";
pub const DEVICE_TAG: &str = "HANA-Device";

/// A block volume attached to the target host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub volume_id: String,
    pub device: Option<String>,
    pub attachment_state: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Selects volumes by the value of one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub values: Vec<String>,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: vec![value.into()],
        }
    }

    pub fn matches(&self, volume: &Volume) -> bool {
        volume
            .tags
            .get(&self.key)
            .is_some_and(|v| self.values.iter().any(|want| want == v))
    }

    pub fn primary_value(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or_default()
    }
}

impl Default for TagFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_KEY, DEFAULT_TAG_VALUE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStatus {
    #[serde(rename = "SnapshotId")]
    pub snapshot_id: String,
    /// `pending`, `completed` or `error`.
    #[serde(rename = "State")]
    pub state: String,
}

pub const PENDING_STATE: &str = "pending";

/// Document the snapshot waiter's acceptors project over: one entry per
/// tracked id, in tracked order. Ids the provider did not report count as
/// `pending`, so a partial answer can never complete the batch.
pub fn tracked_snapshots_document(tracked: &[String], statuses: &[SnapshotStatus]) -> Value {
    let snapshots: Vec<SnapshotStatus> = tracked
        .iter()
        .map(|id| {
            statuses
                .iter()
                .find(|s| &s.snapshot_id == id)
                .cloned()
                .unwrap_or_else(|| SnapshotStatus {
                    snapshot_id: id.clone(),
                    state: PENDING_STATE.to_string(),
                })
        })
        .collect();
    serde_json::json!({ "Snapshots": snapshots })
}

pub fn snapshot_description(backup_id: &BackupId) -> String {
    format!("HANA on AWS Snapshot - {backup_id}")
}

/// Tags written on every block snapshot: the filter tag, the correlation tag
/// linking back to the database backup id, the device, then caller tags.
pub fn snapshot_tags(
    filter: &TagFilter,
    backup_id: &BackupId,
    volume: &Volume,
    extra: &[Tag],
) -> Vec<Tag> {
    let mut tags = vec![
        Tag::new(filter.key.clone(), filter.primary_value()),
        Tag::new(BACKUP_ID_TAG, backup_id.as_str()),
    ];
    if let Some(device) = &volume.device {
        tags.push(Tag::new(DEVICE_TAG, device.clone()));
    }
    for tag in extra {
        if tags.iter().any(|t| t.key == tag.key) {
            continue;
        }
        tags.push(tag.clone());
    }
    tags
}

pub trait VolumeSnapshotService: Send + Sync {
    /// Volumes attached to `host_id` matching `filter`, in provider order.
    fn list_volumes<'a>(
        &'a self,
        host_id: &'a str,
        filter: &'a TagFilter,
    ) -> BoxFuture<'a, Result<Vec<Volume>, SnapshotError>>;

    /// Starts an asynchronous block snapshot and returns its id.
    fn create_snapshot<'a>(
        &'a self,
        volume: &'a Volume,
        description: &'a str,
        tags: &'a [Tag],
    ) -> BoxFuture<'a, Result<String, SnapshotError>>;

    fn describe_snapshots<'a>(
        &'a self,
        snapshot_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<SnapshotStatus>, SnapshotError>>;
}
