//! Database side of the snapshot: prepare, confirm and abandon an
//! engine-internal data snapshot.
//!
//! Every operation acquires its own [`SqlSession`] from a [`SqlConnector`]
//! and lets it drop at the end of the call, so a session is released on every
//! exit path, errors included.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    error::SnapshotError,
    process::{BoxFuture, CommandRunner},
    session::BackupId,
};

pub const DEFAULT_ABANDON_COMMENT: &str = "Snapshot Failed: Do not use";

const PREPARED_SNAPSHOT_SQL: &str = "SELECT BACKUP_ID FROM M_BACKUP_CATALOG \
     WHERE ENTRY_TYPE_NAME = 'data snapshot' AND STATE_NAME = 'prepared'";
const SYSTEM_OVERVIEW_SQL: &str = "SELECT SECTION, NAME, STATUS FROM M_SYSTEM_OVERVIEW";

pub type Row = Vec<String>;

pub trait DatabaseSnapshotClient: Send + Sync {
    /// Status of the `All Started` services row, `Error` when absent.
    fn status(&self) -> BoxFuture<'_, Result<String, SnapshotError>>;

    fn current_snapshot_id(&self) -> BoxFuture<'_, Result<Option<BackupId>, SnapshotError>>;

    fn start_snapshot<'a>(
        &'a self,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<BackupId, SnapshotError>>;

    fn confirm_snapshot<'a>(
        &'a self,
        backup_id: &'a BackupId,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<(), SnapshotError>>;

    fn abandon_snapshot<'a>(
        &'a self,
        backup_id: &'a BackupId,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<(), SnapshotError>>;
}

/// An open database session. Implementations release the underlying
/// connection when dropped.
pub trait SqlSession: Send {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, SnapshotError>>;
}

pub trait SqlConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn SqlSession>, SnapshotError>>;
}

/// Escapes a value for use inside a single-quoted SQL literal.
pub fn sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn checked_backup_id(backup_id: &BackupId) -> Result<&str, SnapshotError> {
    let raw = backup_id.as_str();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(SnapshotError::database(format!(
            "invalid backup id: {raw:?}"
        )));
    }
    Ok(raw)
}

fn first_backup_id(rows: &[Row]) -> Option<BackupId> {
    rows.iter()
        .filter_map(|row| row.first())
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(BackupId::new)
}

/// SAP HANA snapshot statements over any [`SqlConnector`].
pub struct HanaSnapshotClient<C> {
    connector: C,
}

impl<C: SqlConnector> HanaSnapshotClient<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    async fn status_inner(&self) -> Result<String, SnapshotError> {
        let mut session = self.connector.connect().await?;
        let rows = session.execute(SYSTEM_OVERVIEW_SQL).await?;
        let status = rows
            .iter()
            .find(|row| {
                row.first().map(String::as_str) == Some("Services")
                    && row.get(1).map(String::as_str) == Some("All Started")
            })
            .and_then(|row| row.get(2).cloned())
            .unwrap_or_else(|| "Error".to_string());
        Ok(status)
    }

    async fn current_snapshot_id_inner(&self) -> Result<Option<BackupId>, SnapshotError> {
        let mut session = self.connector.connect().await?;
        let rows = session.execute(PREPARED_SNAPSHOT_SQL).await?;
        Ok(first_backup_id(&rows))
    }

    async fn start_snapshot_inner(&self, comment: &str) -> Result<BackupId, SnapshotError> {
        let mut session = self.connector.connect().await?;
        let create = format!(
            "BACKUP DATA FOR FULL SYSTEM CREATE SNAPSHOT COMMENT '{}'",
            sql_literal(comment)
        );
        session.execute(&create).await?;

        let rows = session.execute(PREPARED_SNAPSHOT_SQL).await?;
        let backup_id = first_backup_id(&rows).ok_or_else(|| {
            SnapshotError::database("snapshot statement completed but no prepared backup id found")
        })?;
        info!(backup_id = %backup_id, "database snapshot prepared");
        Ok(backup_id)
    }

    async fn close_snapshot(
        &self,
        backup_id: &BackupId,
        successful: bool,
        text: &str,
    ) -> Result<(), SnapshotError> {
        let id = checked_backup_id(backup_id)?;
        let verdict = if successful {
            "SUCCESSFUL"
        } else {
            "UNSUCCESSFUL"
        };
        let sql = format!(
            "BACKUP DATA FOR FULL SYSTEM CLOSE SNAPSHOT BACKUP_ID {id} {verdict} '{}'",
            sql_literal(text)
        );
        let mut session = self.connector.connect().await?;
        session.execute(&sql).await?;
        info!(backup_id = %backup_id, successful, "database snapshot closed");
        Ok(())
    }
}

impl<C: SqlConnector> DatabaseSnapshotClient for HanaSnapshotClient<C> {
    fn status(&self) -> BoxFuture<'_, Result<String, SnapshotError>> {
        Box::pin(self.status_inner())
    }

    fn current_snapshot_id(&self) -> BoxFuture<'_, Result<Option<BackupId>, SnapshotError>> {
        Box::pin(self.current_snapshot_id_inner())
    }

    fn start_snapshot<'a>(
        &'a self,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<BackupId, SnapshotError>> {
        Box::pin(self.start_snapshot_inner(comment))
    }

    fn confirm_snapshot<'a>(
        &'a self,
        backup_id: &'a BackupId,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<(), SnapshotError>> {
        Box::pin(self.close_snapshot(backup_id, true, external_id))
    }

    fn abandon_snapshot<'a>(
        &'a self,
        backup_id: &'a BackupId,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<(), SnapshotError>> {
        Box::pin(self.close_snapshot(backup_id, false, comment))
    }
}

#[derive(Debug, Clone)]
pub struct HdbsqlOptions {
    pub program: String,
    /// Secure user store key holding host, port and credentials.
    pub user_key: String,
    pub database: Option<String>,
    pub timeout: Duration,
}

/// Runs statements through SAP's `hdbsql` client, one process per statement.
#[derive(Clone)]
pub struct HdbsqlConnector {
    opts: HdbsqlOptions,
    runner: Arc<dyn CommandRunner>,
}

impl HdbsqlConnector {
    pub fn new(opts: HdbsqlOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self { opts, runner }
    }
}

impl SqlConnector for HdbsqlConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn SqlSession>, SnapshotError>> {
        Box::pin(async move {
            if self.opts.user_key.trim().is_empty() {
                return Err(SnapshotError::configuration(
                    "hdbsql user store key is empty",
                ));
            }
            debug!(user_key = %self.opts.user_key, "hdbsql session opened");
            let session: Box<dyn SqlSession> = Box::new(HdbsqlSession {
                opts: self.opts.clone(),
                runner: self.runner.clone(),
                statements: 0,
            });
            Ok(session)
        })
    }
}

struct HdbsqlSession {
    opts: HdbsqlOptions,
    runner: Arc<dyn CommandRunner>,
    statements: u32,
}

impl HdbsqlSession {
    fn args(&self, sql: &str) -> Vec<String> {
        let mut args = vec!["-U".to_string(), self.opts.user_key.clone()];
        if let Some(db) = &self.opts.database {
            args.push("-d".to_string());
            args.push(db.clone());
        }
        // No headers, no row counts, no paging, tab separated.
        for flag in ["-a", "-x", "-j", "-C"] {
            args.push(flag.to_string());
        }
        args.push("-F".to_string());
        args.push("\t".to_string());
        args.push(sql.to_string());
        args
    }
}

impl SqlSession for HdbsqlSession {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, SnapshotError>> {
        Box::pin(async move {
            self.statements += 1;
            let args = self.args(sql);
            let output = self
                .runner
                .run(&self.opts.program, &args, self.opts.timeout)
                .await
                .map_err(|err| SnapshotError::connection("hdbsql", err.to_string()))?;

            if !output.success() {
                let details = output.details();
                if is_connection_failure(&details) {
                    return Err(SnapshotError::connection("database", details));
                }
                return Err(SnapshotError::database(details));
            }
            Ok(parse_rows(&output.stdout))
        })
    }
}

impl Drop for HdbsqlSession {
    fn drop(&mut self) {
        debug!(statements = self.statements, "hdbsql session released");
    }
}

fn is_connection_failure(details: &str) -> bool {
    details.contains("-10709")
        || details.contains("Connection failed")
        || details.contains("-10104")
        || details.contains("authentication failed")
}

/// Parses `hdbsql -a -x -F '\t'` output into rows of trimmed cells.
pub fn parse_rows(stdout: &str) -> Vec<Row> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split('\t')
                .map(|cell| {
                    let cell = cell.trim();
                    cell.strip_prefix('"')
                        .and_then(|c| c.strip_suffix('"'))
                        .unwrap_or(cell)
                        .to_string()
                })
                .collect()
        })
        .collect()
}
