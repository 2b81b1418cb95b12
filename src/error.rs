use std::time::Duration;

use crate::session::SnapshotSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    DatabaseSnapshot,
    Dispatch,
    WaiterTimeout,
    WaiterFailure,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection_error",
            Self::DatabaseSnapshot => "database_snapshot_error",
            Self::Dispatch => "dispatch_error",
            Self::WaiterTimeout => "waiter_timeout",
            Self::WaiterFailure => "waiter_failure",
            Self::Configuration => "configuration_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The database or the cloud API could not be reached at all.
    Connection { target: String, details: String },
    /// The engine rejected or did not acknowledge a snapshot statement.
    DatabaseSnapshot { details: String },
    /// A remote command could not be issued.
    Dispatch { host_id: String, details: String },
    WaiterTimeout {
        waiter: String,
        attempts: u32,
        delay: Duration,
    },
    WaiterFailure {
        waiter: String,
        expected: String,
        resource_ids: Vec<String>,
    },
    Configuration { details: String },
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::DatabaseSnapshot { .. } => ErrorKind::DatabaseSnapshot,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::WaiterTimeout { .. } => ErrorKind::WaiterTimeout,
            Self::WaiterFailure { .. } => ErrorKind::WaiterFailure,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    pub fn connection(target: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            details: details.into(),
        }
    }

    pub fn database(details: impl Into<String>) -> Self {
        Self::DatabaseSnapshot {
            details: details.into(),
        }
    }

    pub fn dispatch(host_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Dispatch {
            host_id: host_id.into(),
            details: details.into(),
        }
    }

    pub fn configuration(details: impl Into<String>) -> Self {
        Self::Configuration {
            details: details.into(),
        }
    }
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection { target, details } => {
                write!(f, "cannot reach {target}: {details}")
            }
            Self::DatabaseSnapshot { details } => {
                write!(f, "database snapshot error: {details}")
            }
            Self::Dispatch { host_id, details } => {
                write!(f, "command dispatch to {host_id} failed: {details}")
            }
            Self::WaiterTimeout {
                waiter,
                attempts,
                delay,
            } => write!(
                f,
                "waiter {waiter} gave up after {attempts} attempts ({}s delay)",
                delay.as_secs()
            ),
            Self::WaiterFailure {
                waiter,
                expected,
                resource_ids,
            } => {
                if resource_ids.is_empty() {
                    write!(f, "waiter {waiter} hit failure state {expected}")
                } else {
                    write!(
                        f,
                        "waiter {waiter} hit failure state {expected}: {}",
                        resource_ids.join(", ")
                    )
                }
            }
            Self::Configuration { details } => write!(f, "configuration error: {details}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// A session that failed after it started. Carries the triggering error,
/// any errors raised while compensating (thaw, abandon), and the session as
/// far as it got.
#[derive(Debug, Clone)]
pub struct SessionError {
    pub error: SnapshotError,
    pub compensation: Vec<SnapshotError>,
    pub session: SnapshotSession,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) [session {} reached {}]",
            self.error,
            self.error.kind(),
            self.session.session_id,
            self.session.failed_at().unwrap_or(self.session.state).as_str()
        )?;
        for err in &self.compensation {
            write!(f, "; compensation failed: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
