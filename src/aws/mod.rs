//! AWS collaborators. EC2 and SSM calls go through the `aws` command line
//! client so credentials, regions and retries follow the host's normal AWS
//! configuration; the instance id lookup talks to the metadata service
//! directly.

mod ec2;
mod imds;
mod ssm;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use serde_json::Value;

use crate::process::CommandRunner;

pub use ec2::Ec2Volumes;
pub use imds::{DEFAULT_IMDS_BASE_URL, InstanceMetadata};
pub use ssm::{RUN_SHELL_SCRIPT_DOCUMENT, SsmCommands};

#[derive(Debug, Clone)]
pub struct AwsCliOptions {
    pub program: String,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub timeout: Duration,
}

impl Default for AwsCliOptions {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            region: None,
            profile: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct AwsCli {
    opts: AwsCliOptions,
    runner: Arc<dyn CommandRunner>,
}

impl AwsCli {
    pub fn new(opts: AwsCliOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self { opts, runner }
    }

    fn args(&self, service: &str, operation: &str, params: Vec<String>) -> Vec<String> {
        let mut args = Vec::with_capacity(params.len() + 8);
        if let Some(region) = &self.opts.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.opts.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args.push("--output".to_string());
        args.push("json".to_string());
        args.push(service.to_string());
        args.push(operation.to_string());
        args.extend(params);
        args
    }

    /// Runs `aws <service> <operation> <params>` and parses its JSON output.
    pub async fn call(
        &self,
        service: &str,
        operation: &str,
        params: Vec<String>,
    ) -> anyhow::Result<Value> {
        let args = self.args(service, operation, params);
        let output = self
            .runner
            .run(&self.opts.program, &args, self.opts.timeout)
            .await
            .with_context(|| format!("aws {service} {operation}"))?;
        if !output.success() {
            anyhow::bail!(
                "aws {service} {operation} exited with {}: {}",
                output
                    .status
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                output.details()
            );
        }
        if output.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&output.stdout)
            .with_context(|| format!("aws {service} {operation}: invalid json output"))
    }
}
