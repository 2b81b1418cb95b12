use anyhow::{Context, Result};
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use hdbsnap::{
    aws::{AwsCli, Ec2Volumes, InstanceMetadata, SsmCommands},
    config::{AbandonArgs, Cli, Command, Config, RunArgs},
    coordinator::{SnapshotCoordinator, SnapshotRequest},
    freeze::FreezeController,
    hdb::{DatabaseSnapshotClient, HanaSnapshotClient, HdbsqlConnector},
    process::{CommandRunner, ProcessRunner},
    session::BackupId,
    volumes::VolumeSnapshotService,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli
        .command
        .clone()
        .unwrap_or_else(|| Command::Run(RunArgs::default()));

    match cmd {
        Command::Run(args) => run_snapshot(&cli.config, args).await,
        Command::Status => print_status(&cli.config).await,
        Command::Prepared => print_prepared(&cli.config).await,
        Command::Volumes => print_volumes(&cli.config).await,
        Command::Abandon(args) => abandon_snapshot(&cli.config, args).await,
        Command::Waiters => print_waiters(&cli.config),
    }
}

fn database(config: &Config, runner: Arc<dyn CommandRunner>) -> Arc<dyn DatabaseSnapshotClient> {
    Arc::new(HanaSnapshotClient::new(HdbsqlConnector::new(
        config.hdbsql_options(),
        runner,
    )))
}

async fn resolve_host_id(config: &Config) -> Result<String> {
    if let Some(host_id) = &config.host_id {
        return Ok(host_id.clone());
    }
    let metadata = InstanceMetadata::new(config.imds_url.clone())?;
    let host_id = metadata
        .instance_id()
        .await
        .context("resolve host id from instance metadata (pass --host-id off EC2)")?;
    info!(host_id = %host_id, "host id from instance metadata");
    Ok(host_id)
}

async fn run_snapshot(config: &Config, args: RunArgs) -> Result<()> {
    let host_id = resolve_host_id(config).await?;
    let model = config.waiter_model()?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let aws = AwsCli::new(config.aws_cli_options(), runner.clone());

    let freeze = FreezeController::new(
        Arc::new(SsmCommands::new(aws.clone())),
        config.command_waiter(&model)?,
    );
    let coordinator = SnapshotCoordinator::new(
        database(config, runner),
        freeze,
        Arc::new(Ec2Volumes::new(aws)),
        config.snapshot_waiter(&model)?,
    );

    let mut request = SnapshotRequest::new(host_id);
    request.mount = config.mount.clone();
    request.tag_filter = config.tag_filter();
    request.tags = args.tags;
    request.external_id = args.external_id;
    if let Some(comment) = args.comment {
        request.comment = comment;
    }
    if let Some(comment) = args.abandon_comment {
        request.abandon_comment = comment;
    }

    match coordinator.run(&request).await {
        Ok(session) => {
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.session)?);
            Err(err.into())
        }
    }
}

async fn print_status(config: &Config) -> Result<()> {
    let db = database(config, Arc::new(ProcessRunner));
    println!("{}", db.status().await?);
    Ok(())
}

async fn print_prepared(config: &Config) -> Result<()> {
    let db = database(config, Arc::new(ProcessRunner));
    match db.current_snapshot_id().await? {
        Some(backup_id) => println!("{backup_id}"),
        None => info!("no prepared data snapshot"),
    }
    Ok(())
}

async fn print_volumes(config: &Config) -> Result<()> {
    let host_id = resolve_host_id(config).await?;
    let aws = AwsCli::new(config.aws_cli_options(), Arc::new(ProcessRunner));
    let volumes = Ec2Volumes::new(aws)
        .list_volumes(&host_id, &config.tag_filter())
        .await?;
    println!("{}", serde_json::to_string_pretty(&volumes)?);
    Ok(())
}

async fn abandon_snapshot(config: &Config, args: AbandonArgs) -> Result<()> {
    let db = database(config, Arc::new(ProcessRunner));
    let backup_id = BackupId::new(args.backup_id);
    db.abandon_snapshot(&backup_id, &args.comment).await?;
    info!(backup_id = %backup_id, "data snapshot abandoned");
    Ok(())
}

fn print_waiters(config: &Config) -> Result<()> {
    let model = config.waiter_model()?;
    println!("{}", model.to_json_pretty()?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
