//! Sequences the database snapshot, the filesystem freeze and the block
//! snapshots of one host, and decides between confirm and abandon.
//!
//! Ordering on every path: freeze, create, thaw, then confirm or abandon.
//! Once a freeze has been attempted the filesystem is thawed exactly once
//! before the session resolves.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::join_all;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    error::{SessionError, SnapshotError},
    freeze::{DEFAULT_MOUNT, FreezeController},
    hdb::{DEFAULT_ABANDON_COMMENT, DatabaseSnapshotClient},
    session::{BackupId, SessionState, SnapshotSession},
    volumes::{
        Tag, TagFilter, VolumeSnapshotService, snapshot_description, snapshot_tags,
        tracked_snapshots_document,
    },
    waiter::{EBS_SNAPSHOTS_COMPLETED, Waiter, ebs_snapshots_completed},
};

/// Field the snapshot waiter reports offending resources by.
pub const SNAPSHOT_ID_PATH: &str = "Snapshots[].SnapshotId";

pub fn default_comment(now: DateTime<Utc>) -> String {
    format!("hdbsnap {}", now.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub host_id: String,
    pub comment: String,
    pub mount: String,
    pub tag_filter: TagFilter,
    /// Extra tags written on every block snapshot.
    pub tags: Vec<Tag>,
    /// Correlation id stored with the confirmed database snapshot. Defaults
    /// to the comma-joined block snapshot ids.
    pub external_id: Option<String>,
    pub abandon_comment: String,
}

impl SnapshotRequest {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            comment: default_comment(Utc::now()),
            mount: DEFAULT_MOUNT.to_string(),
            tag_filter: TagFilter::default(),
            tags: Vec::new(),
            external_id: None,
            abandon_comment: DEFAULT_ABANDON_COMMENT.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SnapshotCoordinator {
    database: Arc<dyn DatabaseSnapshotClient>,
    freeze: FreezeController,
    volumes: Arc<dyn VolumeSnapshotService>,
    snapshot_waiter: Waiter,
}

impl SnapshotCoordinator {
    pub fn new(
        database: Arc<dyn DatabaseSnapshotClient>,
        freeze: FreezeController,
        volumes: Arc<dyn VolumeSnapshotService>,
        snapshot_waiter: Waiter,
    ) -> Self {
        Self {
            database,
            freeze,
            volumes,
            snapshot_waiter,
        }
    }

    pub async fn run(&self, request: &SnapshotRequest) -> Result<SnapshotSession, SessionError> {
        let mut session = SnapshotSession::new(&request.host_id);
        session.external_id = request.external_id.clone();
        let span = info_span!(
            "snapshot_session",
            session_id = %session.session_id,
            host_id = %request.host_id
        );
        self.drive(request, session).instrument(span).await
    }

    async fn drive(
        &self,
        request: &SnapshotRequest,
        mut session: SnapshotSession,
    ) -> Result<SnapshotSession, SessionError> {
        info!(
            mount = %request.mount,
            comment = %request.comment,
            "snapshot session started"
        );

        match self.database.current_snapshot_id().await {
            Ok(None) => {}
            Ok(Some(existing)) => {
                let err = SnapshotError::database(format!(
                    "data snapshot {existing} is already prepared"
                ));
                return Err(abandoned(session, err, Vec::new()));
            }
            Err(err) => return Err(abandoned(session, err, Vec::new())),
        }

        session.transition(SessionState::Preparing);
        let backup_id = match self.database.start_snapshot(&request.comment).await {
            Ok(id) => id,
            // Nothing was prepared, so there is nothing to roll back.
            Err(err) => return Err(abandoned(session, err, Vec::new())),
        };
        session.database_backup_id = Some(backup_id.clone());

        if let Err(err) = self.freeze.freeze(&request.host_id, &request.mount).await {
            // A failed dispatch may still have reached the host.
            let mut compensation = Vec::new();
            if let Err(thaw_err) = self.freeze.thaw(&request.host_id, &request.mount).await {
                compensation.push(thaw_err);
            }
            let comment = format!("{} (freeze failed: {err})", request.abandon_comment);
            return Err(self
                .abandon(session, &backup_id, &comment, err, compensation)
                .await);
        }
        session.transition(SessionState::Frozen);

        let outcome = self
            .snapshot_volumes(request, &backup_id, &mut session)
            .await;

        let mut compensation = Vec::new();
        let mut failure = outcome.err();
        match self.freeze.thaw(&request.host_id, &request.mount).await {
            Ok(()) => session.transition(SessionState::Thawed),
            Err(thaw_err) if failure.is_none() => failure = Some(thaw_err),
            Err(thaw_err) => compensation.push(thaw_err),
        }

        if let Some(err) = failure {
            let comment = failure_comment(&request.abandon_comment, &err);
            return Err(self
                .abandon(session, &backup_id, &comment, err, compensation)
                .await);
        }

        let external_id = request
            .external_id
            .clone()
            .unwrap_or_else(|| session.volume_snapshot_ids.join(","));
        session.external_id = Some(external_id.clone());
        if let Err(err) = self
            .database
            .confirm_snapshot(&backup_id, &external_id)
            .await
        {
            let comment = failure_comment(&request.abandon_comment, &err);
            return Err(self
                .abandon(session, &backup_id, &comment, err, compensation)
                .await);
        }

        session.transition(SessionState::Confirmed);
        session.transition(SessionState::Done);
        info!(
            backup_id = %backup_id,
            snapshots = session.volume_snapshot_ids.len(),
            "snapshot session confirmed"
        );
        Ok(session)
    }

    /// Lists the tagged volumes, starts one block snapshot per volume and
    /// waits for the batch. Created ids land on the session even when part
    /// of the batch fails.
    async fn snapshot_volumes(
        &self,
        request: &SnapshotRequest,
        backup_id: &BackupId,
        session: &mut SnapshotSession,
    ) -> Result<(), SnapshotError> {
        let mut volumes = self
            .volumes
            .list_volumes(&request.host_id, &request.tag_filter)
            .await?;
        volumes.retain(|v| request.tag_filter.matches(v));
        if volumes.is_empty() {
            return Err(SnapshotError::configuration(format!(
                "no volumes tagged {}={} attached to {}",
                request.tag_filter.key,
                request.tag_filter.values.join(","),
                request.host_id
            )));
        }

        let description = snapshot_description(backup_id);
        let tag_sets: Vec<Vec<Tag>> = volumes
            .iter()
            .map(|v| snapshot_tags(&request.tag_filter, backup_id, v, &request.tags))
            .collect();
        let results = join_all(
            volumes
                .iter()
                .zip(&tag_sets)
                .map(|(volume, tags)| self.volumes.create_snapshot(volume, &description, tags)),
        )
        .await;

        let mut first_err = None;
        for (volume, result) in volumes.iter().zip(results) {
            match result {
                Ok(snapshot_id) => {
                    info!(
                        volume_id = %volume.volume_id,
                        snapshot_id = %snapshot_id,
                        "block snapshot started"
                    );
                    session.volume_snapshot_ids.push(snapshot_id);
                }
                Err(err) => {
                    warn!(
                        volume_id = %volume.volume_id,
                        error = %err,
                        "block snapshot not started"
                    );
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        if !session.volume_snapshot_ids.is_empty() {
            session.transition(SessionState::SnapshotsInFlight);
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        let ids = session.volume_snapshot_ids.as_slice();
        let service = &self.volumes;
        self.snapshot_waiter
            .wait(|| async move {
                let statuses = service.describe_snapshots(ids).await?;
                Ok::<_, SnapshotError>(tracked_snapshots_document(ids, &statuses))
            })
            .await?;
        Ok(())
    }

    async fn abandon(
        &self,
        session: SnapshotSession,
        backup_id: &BackupId,
        comment: &str,
        err: SnapshotError,
        mut compensation: Vec<SnapshotError>,
    ) -> SessionError {
        if let Err(abandon_err) = self.database.abandon_snapshot(backup_id, comment).await
        {
            compensation.push(abandon_err);
        }
        abandoned(session, err, compensation)
    }
}

pub fn default_snapshot_waiter() -> Result<Waiter, SnapshotError> {
    Waiter::new(EBS_SNAPSHOTS_COMPLETED, ebs_snapshots_completed())?
        .with_resource_ids(SNAPSHOT_ID_PATH)
}

/// Abandon comment naming what went wrong, e.g.
/// `Snapshot Failed: Do not use (waiter_timeout: ...)`.
pub fn failure_comment(base: &str, err: &SnapshotError) -> String {
    format!("{base} ({}: {err})", err.kind())
}

fn abandoned(
    mut session: SnapshotSession,
    err: SnapshotError,
    compensation: Vec<SnapshotError>,
) -> SessionError {
    session.transition(SessionState::Abandoned);
    session.transition(SessionState::Done);
    error!(
        kind = err.kind().as_str(),
        error = %err,
        compensation_failures = compensation.len(),
        "snapshot session abandoned"
    );
    SessionError {
        error: err,
        compensation,
        session,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_comment_is_rfc3339_utc() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(default_comment(now), "hdbsnap 2024-03-01T12:30:05Z");
    }

    #[test]
    fn request_defaults() {
        let request = SnapshotRequest::new("i-0abc");
        assert_eq!(request.mount, "/hana/data");
        assert_eq!(request.tag_filter, TagFilter::default());
        assert_eq!(request.abandon_comment, "Snapshot Failed: Do not use");
        assert!(request.comment.starts_with("hdbsnap "));
        assert_eq!(request.external_id, None);
    }

    #[test]
    fn failure_comment_names_kind_and_error() {
        let err = SnapshotError::WaiterTimeout {
            waiter: EBS_SNAPSHOTS_COMPLETED.to_string(),
            attempts: 3,
            delay: std::time::Duration::from_secs(1),
        };
        assert_eq!(
            failure_comment(DEFAULT_ABANDON_COMMENT, &err),
            "Snapshot Failed: Do not use (waiter_timeout: waiter ebsSnapshotsCompleted gave up after 3 attempts (1s delay))"
        );
    }

    #[test]
    fn default_snapshot_waiter_uses_builtin_budget() {
        let waiter = default_snapshot_waiter().unwrap();
        assert_eq!(waiter.name(), EBS_SNAPSHOTS_COMPLETED);
        assert_eq!(waiter.delay().as_secs(), 5);
        assert_eq!(waiter.max_attempts(), 120);
    }
}
