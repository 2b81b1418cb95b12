use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

/// Identifier the database engine assigns to a prepared data snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Preparing,
    Frozen,
    SnapshotsInFlight,
    Thawed,
    Confirmed,
    Abandoned,
    Done,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Frozen => "frozen",
            Self::SnapshotsInFlight => "snapshots_in_flight",
            Self::Thawed => "thawed",
            Self::Confirmed => "confirmed",
            Self::Abandoned => "abandoned",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Done
    }
}

/// One orchestration run. Owned by the coordinator until it reaches `Done`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSession {
    pub session_id: String,
    pub database_backup_id: Option<BackupId>,
    pub external_id: Option<String>,
    pub target_host_id: String,
    pub volume_snapshot_ids: Vec<String>,
    pub state: SessionState,
    pub history: Vec<SessionState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SnapshotSession {
    pub fn new(target_host_id: impl Into<String>) -> Self {
        Self {
            session_id: Ulid::new().to_string(),
            database_backup_id: None,
            external_id: None,
            target_host_id: target_host_id.into(),
            volume_snapshot_ids: Vec::new(),
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        info!(
            session_id = %self.session_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "snapshot session transition"
        );
        self.state = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// `Confirmed` or `Abandoned`, once the session has been resolved.
    pub fn resolution(&self) -> Option<SessionState> {
        self.history
            .iter()
            .rev()
            .copied()
            .find(|s| matches!(s, SessionState::Confirmed | SessionState::Abandoned))
    }

    pub fn is_confirmed(&self) -> bool {
        self.resolution() == Some(SessionState::Confirmed)
    }

    /// Last state reached before the session was abandoned.
    pub fn failed_at(&self) -> Option<SessionState> {
        let idx = self
            .history
            .iter()
            .position(|s| *s == SessionState::Abandoned)?;
        idx.checked_sub(1).map(|i| self.history[i])
    }

    pub fn visited(&self, state: SessionState) -> bool {
        self.history.contains(&state)
    }
}
