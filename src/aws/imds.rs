use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_IMDS_BASE_URL: &str = "http://169.254.169.254";

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: u32 = 60;

/// Instance metadata service (IMDSv2) client, used to default the target
/// host to the instance this process runs on.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    base: String,
    client: reqwest::Client,
}

impl InstanceMetadata {
    pub fn new(base: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .context("build metadata http client")?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn token(&self) -> anyhow::Result<String> {
        let token = self
            .client
            .put(format!("{}/latest/api/token", self.base))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS.to_string())
            .send()
            .await
            .context("request metadata token")?
            .error_for_status()
            .context("request metadata token")?
            .text()
            .await?;
        Ok(token)
    }

    pub async fn instance_id(&self) -> anyhow::Result<String> {
        let token = self.token().await?;
        let id = self
            .client
            .get(format!("{}/latest/meta-data/instance-id", self.base))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .context("query instance id")?
            .error_for_status()
            .context("query instance id")?
            .text()
            .await?;
        let id = id.trim();
        if id.is_empty() {
            anyhow::bail!("metadata service returned an empty instance id");
        }
        Ok(id.to_string())
    }
}
