//! AWS credential resolution and tool-provider environment preparation.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info};

use super::AgentConfig;
use crate::error::{FinOpsError, Result};

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";

const ROLE_SESSION_NAME: &str = "finops-agent-session";

/// Static or temporary AWS credentials handed to tool providers.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"..")
            .field("session_token", &self.session_token.as_ref().map(|_| ".."))
            .finish()
    }
}

impl AwsCredentials {
    /// Read static keys from an environment map, if both are present.
    pub fn from_env_map(env: &BTreeMap<String, String>) -> Option<Self> {
        let access_key_id = env.get(ACCESS_KEY_VAR).filter(|v| !v.is_empty())?;
        let secret_access_key = env.get(SECRET_KEY_VAR).filter(|v| !v.is_empty())?;
        Some(Self {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: env.get(SESSION_TOKEN_VAR).filter(|v| !v.is_empty()).cloned(),
        })
    }
}

/// Cross-account role assumption, supplied by the hosting environment.
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<AwsCredentials>;
}

/// Assumes roles through the STS `AssumeRole` API.
#[cfg(feature = "sts")]
#[derive(Debug, Clone)]
pub struct StsRoleAssumer {
    client: aws_sdk_sts::Client,
}

#[cfg(feature = "sts")]
impl StsRoleAssumer {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential chain, pinned to `region`.
    pub async fn from_region(region: impl Into<String>) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.into()))
            .load()
            .await;
        Self::new(aws_sdk_sts::Client::new(&sdk_config))
    }
}

#[cfg(feature = "sts")]
#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<AwsCredentials> {
        debug!(role_arn, session_name, "assuming role via sts");
        let output = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(|e| {
                FinOpsError::Config(format!(
                    "assume-role for {role_arn} failed: {}",
                    aws_sdk_sts::error::DisplayErrorContext(&e)
                ))
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            FinOpsError::Config(format!("assume-role for {role_arn} returned no credentials"))
        })?;
        Ok(AwsCredentials::from(credentials))
    }
}

#[cfg(feature = "sts")]
impl From<&aws_sdk_sts::types::Credentials> for AwsCredentials {
    fn from(creds: &aws_sdk_sts::types::Credentials) -> Self {
        Self {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: Some(creds.session_token().to_string()),
        }
    }
}

/// Resolve the credentials tool providers should run with.
///
/// A configured target role always wins and requires an assumer. Without
/// one, static keys already in `env` are used; `None` means the providers
/// fall back to whatever credential chain their environment offers.
pub async fn resolve_credentials(
    config: &AgentConfig,
    env: &BTreeMap<String, String>,
    assumer: Option<&dyn RoleAssumer>,
) -> Result<Option<AwsCredentials>> {
    if let Some(role_arn) = config.target_role_arn.as_deref() {
        let assumer = assumer.ok_or_else(|| {
            FinOpsError::Config(format!(
                "TARGET_ROLE_ARN is set to {role_arn} but no role assumer is available"
            ))
        })?;
        let credentials = assumer.assume_role(role_arn, ROLE_SESSION_NAME).await?;
        info!(role_arn, "using assumed-role credentials for tool providers");
        return Ok(Some(credentials));
    }

    Ok(AwsCredentials::from_env_map(env))
}

/// Snapshot of the current process environment.
pub fn process_environment() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

/// Build the environment a tool provider subprocess is launched with.
pub fn provider_environment(
    base: &BTreeMap<String, String>,
    region: &str,
    credentials: Option<&AwsCredentials>,
) -> BTreeMap<String, String> {
    let mut env = base.clone();
    env.insert("FASTMCP_LOG_LEVEL".to_string(), "ERROR".to_string());
    env.insert("AWS_REGION".to_string(), region.to_string());

    if let Some(creds) = credentials {
        env.insert(ACCESS_KEY_VAR.to_string(), creds.access_key_id.clone());
        env.insert(SECRET_KEY_VAR.to_string(), creds.secret_access_key.clone());
        match &creds.session_token {
            Some(token) => {
                env.insert(SESSION_TOKEN_VAR.to_string(), token.clone());
            }
            None => {
                env.remove(SESSION_TOKEN_VAR);
            }
        }
    }

    env
}
