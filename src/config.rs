use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    aws::{AwsCliOptions, DEFAULT_IMDS_BASE_URL},
    coordinator::SNAPSHOT_ID_PATH,
    error::SnapshotError,
    freeze::DEFAULT_MOUNT,
    hdb::{DEFAULT_ABANDON_COMMENT, HdbsqlOptions},
    volumes::{DEFAULT_TAG_KEY, DEFAULT_TAG_VALUE, Tag, TagFilter},
    waiter::{EBS_SNAPSHOTS_COMPLETED, SSM_COMMAND_INVOCATIONS, Waiter, WaiterModel},
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hdbsnap",
    about = "Crash-consistent SAP HANA data snapshots on EBS",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Take a coordinated database and volume snapshot (default).
    Run(RunArgs),

    /// Print the database service status.
    Status,

    /// Print the backup id of the prepared data snapshot, if any.
    Prepared,

    /// List the tagged volumes attached to the host.
    Volumes,

    /// Close a prepared data snapshot as unsuccessful.
    Abandon(AbandonArgs),

    /// Print the waiter model in effect as JSON.
    Waiters,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Database snapshot comment [default: "hdbsnap <UTC timestamp>"].
    #[arg(long, value_name = "TEXT")]
    pub comment: Option<String>,

    /// Id stored with the confirmed snapshot [default: block snapshot ids].
    #[arg(long, value_name = "ID")]
    pub external_id: Option<String>,

    /// Extra tag for every block snapshot; repeatable.
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub tags: Vec<Tag>,

    #[arg(long, value_name = "TEXT")]
    pub abandon_comment: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AbandonArgs {
    #[arg(long, value_name = "ID")]
    pub backup_id: String,

    #[arg(long, value_name = "TEXT", default_value = DEFAULT_ABANDON_COMMENT)]
    pub comment: String,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Target instance [default: this instance, from the metadata service].
    #[arg(long, global = true, env = "HDBSNAP_HOST_ID", value_name = "INSTANCE_ID")]
    pub host_id: Option<String>,

    #[arg(
        long,
        global = true,
        env = "HDBSNAP_IMDS_URL",
        value_name = "URL",
        default_value = DEFAULT_IMDS_BASE_URL
    )]
    pub imds_url: String,

    #[arg(
        long,
        global = true,
        env = "HDBSNAP_MOUNT",
        value_name = "PATH",
        default_value = DEFAULT_MOUNT
    )]
    pub mount: String,

    #[arg(
        long,
        global = true,
        env = "HDBSNAP_TAG_KEY",
        value_name = "KEY",
        default_value = DEFAULT_TAG_KEY
    )]
    pub tag_key: String,

    #[arg(
        long,
        global = true,
        env = "HDBSNAP_TAG_VALUE",
        value_name = "VALUE",
        default_value = DEFAULT_TAG_VALUE
    )]
    pub tag_value: String,

    #[arg(
        long = "hdbsql-bin",
        global = true,
        env = "HDBSNAP_HDBSQL_BIN",
        value_name = "PATH",
        default_value = "hdbsql"
    )]
    pub hdbsql_bin: String,

    /// hdbuserstore key with host, port and credentials.
    #[arg(long, global = true, env = "HDBSNAP_HDB_USER_KEY", value_name = "KEY")]
    pub hdb_user_key: Option<String>,

    #[arg(long, global = true, env = "HDBSNAP_HDB_DATABASE", value_name = "NAME")]
    pub hdb_database: Option<String>,

    #[arg(
        long = "hdbsql-timeout-secs",
        global = true,
        env = "HDBSNAP_HDBSQL_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..=3600)
    )]
    pub hdbsql_timeout_secs: u64,

    #[arg(
        long = "aws-bin",
        global = true,
        env = "HDBSNAP_AWS_BIN",
        value_name = "PATH",
        default_value = "aws"
    )]
    pub aws_bin: String,

    #[arg(long, global = true, env = "HDBSNAP_AWS_REGION", value_name = "REGION")]
    pub aws_region: Option<String>,

    #[arg(long, global = true, env = "HDBSNAP_AWS_PROFILE", value_name = "PROFILE")]
    pub aws_profile: Option<String>,

    #[arg(
        long = "aws-timeout-secs",
        global = true,
        env = "HDBSNAP_AWS_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..=600)
    )]
    pub aws_timeout_secs: u64,

    /// Waiter model JSON replacing the built-in one.
    #[arg(long, global = true, env = "HDBSNAP_WAITER_MODEL", value_name = "PATH")]
    pub waiter_model: Option<PathBuf>,

    #[arg(
        long = "command-delay-secs",
        global = true,
        env = "HDBSNAP_COMMAND_DELAY_SECS",
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub command_delay_secs: Option<u64>,

    #[arg(
        long = "command-max-attempts",
        global = true,
        env = "HDBSNAP_COMMAND_MAX_ATTEMPTS",
        value_name = "N",
        value_parser = clap::value_parser!(u32).range(1..=1000)
    )]
    pub command_max_attempts: Option<u32>,

    #[arg(
        long = "snapshot-delay-secs",
        global = true,
        env = "HDBSNAP_SNAPSHOT_DELAY_SECS",
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub snapshot_delay_secs: Option<u64>,

    #[arg(
        long = "snapshot-max-attempts",
        global = true,
        env = "HDBSNAP_SNAPSHOT_MAX_ATTEMPTS",
        value_name = "N",
        value_parser = clap::value_parser!(u32).range(1..=10000)
    )]
    pub snapshot_max_attempts: Option<u32>,
}

fn parse_tag(raw: &str) -> Result<Tag, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("tag key must not be empty".to_string());
    }
    Ok(Tag::new(key, value))
}

impl Config {
    pub fn tag_filter(&self) -> TagFilter {
        TagFilter::new(self.tag_key.clone(), self.tag_value.clone())
    }

    pub fn hdbsql_options(&self) -> HdbsqlOptions {
        HdbsqlOptions {
            program: self.hdbsql_bin.clone(),
            user_key: self.hdb_user_key.clone().unwrap_or_default(),
            database: self.hdb_database.clone(),
            timeout: Duration::from_secs(self.hdbsql_timeout_secs),
        }
    }

    pub fn aws_cli_options(&self) -> AwsCliOptions {
        AwsCliOptions {
            program: self.aws_bin.clone(),
            region: self.aws_region.clone(),
            profile: self.aws_profile.clone(),
            timeout: Duration::from_secs(self.aws_timeout_secs),
        }
    }

    /// The built-in model, or the one read from `--waiter-model`.
    pub fn waiter_model(&self) -> Result<WaiterModel, SnapshotError> {
        match &self.waiter_model {
            None => Ok(WaiterModel::builtin()),
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    SnapshotError::configuration(format!("read {}: {e}", path.display()))
                })?;
                WaiterModel::from_json(&raw)
            }
        }
    }

    pub fn command_waiter(&self, model: &WaiterModel) -> Result<Waiter, SnapshotError> {
        let mut waiter = Waiter::from_model(model, SSM_COMMAND_INVOCATIONS)?;
        if let Some(delay) = self.command_delay_secs {
            waiter = waiter.with_delay(delay);
        }
        if let Some(attempts) = self.command_max_attempts {
            waiter = waiter.with_max_attempts(attempts);
        }
        Ok(waiter)
    }

    pub fn snapshot_waiter(&self, model: &WaiterModel) -> Result<Waiter, SnapshotError> {
        let mut waiter =
            Waiter::from_model(model, EBS_SNAPSHOTS_COMPLETED)?.with_resource_ids(SNAPSHOT_ID_PATH)?;
        if let Some(delay) = self.snapshot_delay_secs {
            waiter = waiter.with_delay(delay);
        }
        if let Some(attempts) = self.snapshot_max_attempts {
            waiter = waiter.with_max_attempts(attempts);
        }
        Ok(waiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_when_flags_absent() {
        let cli = Cli::try_parse_from(["hdbsnap"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.host_id, None);
        assert_eq!(cli.config.imds_url, "http://169.254.169.254");
        assert_eq!(cli.config.mount, "/hana/data");
        assert_eq!(cli.config.tag_filter(), TagFilter::new("Name", "HANA-Data"));
        assert_eq!(cli.config.hdbsql_bin, "hdbsql");
        assert_eq!(cli.config.hdbsql_timeout_secs, 300);
        assert_eq!(cli.config.aws_bin, "aws");
        assert_eq!(cli.config.aws_timeout_secs, 60);
        assert_eq!(cli.config.waiter_model, None);
        assert_eq!(cli.config.command_delay_secs, None);
        assert_eq!(cli.config.snapshot_max_attempts, None);
    }

    #[test]
    fn run_collects_repeated_tags() {
        let cli = Cli::try_parse_from([
            "hdbsnap",
            "run",
            "--tag",
            "Env=prod",
            "--tag",
            "Owner=basis=team",
            "--external-id",
            "change-42",
        ])
        .unwrap();
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(
            args.tags,
            vec![Tag::new("Env", "prod"), Tag::new("Owner", "basis=team")]
        );
        assert_eq!(args.external_id.as_deref(), Some("change-42"));
        assert_eq!(args.comment, None);
    }

    #[test]
    fn rejects_tag_without_value_separator() {
        let err = Cli::try_parse_from(["hdbsnap", "run", "--tag", "Env"]).unwrap_err();
        assert!(err.to_string().contains("expected KEY=VALUE"));
    }

    #[test]
    fn abandon_requires_backup_id() {
        assert!(Cli::try_parse_from(["hdbsnap", "abandon"]).is_err());

        let cli = Cli::try_parse_from(["hdbsnap", "abandon", "--backup-id", "1650000000001"])
            .unwrap();
        let Some(Command::Abandon(args)) = cli.command else {
            panic!("expected abandon command");
        };
        assert_eq!(args.backup_id, "1650000000001");
        assert_eq!(args.comment, "Snapshot Failed: Do not use");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hdbsnap", "volumes", "--host-id", "i-0abc"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Volumes)));
        assert_eq!(cli.config.host_id.as_deref(), Some("i-0abc"));
    }

    #[test]
    fn rejects_invalid_hdbsql_timeout_secs() {
        let err = Cli::try_parse_from(["hdbsnap", "--hdbsql-timeout-secs", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--hdbsql-timeout-secs"));
        assert!(msg.contains("1..=3600"));
    }

    #[test]
    fn rejects_invalid_snapshot_delay_secs() {
        let err = Cli::try_parse_from(["hdbsnap", "--snapshot-delay-secs", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--snapshot-delay-secs"));
        assert!(msg.contains("1..=300"));
    }

    #[test]
    fn rejects_invalid_command_max_attempts() {
        let err = Cli::try_parse_from(["hdbsnap", "--command-max-attempts", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--command-max-attempts"));
        assert!(msg.contains("1..=1000"));
    }

    #[test]
    fn waiter_overrides_apply_on_top_of_model() {
        let cli = Cli::try_parse_from([
            "hdbsnap",
            "--command-delay-secs",
            "2",
            "--snapshot-max-attempts",
            "7",
        ])
        .unwrap();
        let model = cli.config.waiter_model().unwrap();

        let command = cli.config.command_waiter(&model).unwrap();
        assert_eq!(command.delay(), Duration::from_secs(2));
        assert_eq!(command.max_attempts(), 40);

        let snapshot = cli.config.snapshot_waiter(&model).unwrap();
        assert_eq!(snapshot.delay(), Duration::from_secs(5));
        assert_eq!(snapshot.max_attempts(), 7);
    }

    #[test]
    fn missing_waiter_model_file_is_a_configuration_error() {
        let cli = Cli::try_parse_from([
            "hdbsnap",
            "--waiter-model",
            "/nonexistent/hdbsnap-waiters.json",
        ])
        .unwrap();
        let err = cli.config.waiter_model().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
