//! Configuration system (layered: defaults < TOML file < `.env` / process env).

pub mod credentials;
pub mod rates;

pub use credentials::{AwsCredentials, RoleAssumer};
#[cfg(feature = "sts")]
pub use credentials::StsRoleAssumer;
pub use rates::{ModelRate, RateTable};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FinOpsError, Result};

pub const DEFAULT_MODEL_ID: &str = "claude-3-7-sonnet-20250219";
pub const BILLING_PROVIDER_ID: &str = "billing";
pub const AWS_API_PROVIDER_ID: &str = "aws-api";

/// How to launch one tool provider subprocess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSpec {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment applied on top of the prepared provider environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderSpec {
    pub fn python_module(id: &str, module: &str) -> Self {
        Self {
            id: id.to_string(),
            command: "python".to_string(),
            args: vec!["-m".to_string(), module.to_string()],
            env: BTreeMap::new(),
            enabled: true,
        }
    }
}

/// Deployment identifiers consumed by the hosting collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeploymentConfig {
    pub stack_name: String,
    pub region: String,
    pub secrets_manager_id: Option<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            stack_name: "FinOps-AI-Chatbot".to_string(),
            region: "us-east-1".to_string(),
            secrets_manager_id: None,
        }
    }
}

/// Agent configuration.
///
/// Resolution order (later wins):
/// 1. Built-in defaults
/// 2. TOML file (explicit path, `FINOPS_AGENT_CONFIG`, or the user config dir)
/// 3. `.env` and the process environment
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model_id: String,
    pub max_output_tokens: u32,
    pub context_window: u64,
    pub summarize_threshold: f64,
    pub summary_ratio: f64,
    pub preserve_recent_messages: usize,
    pub max_tool_iterations: usize,
    pub aws_region: String,
    pub target_role_arn: Option<String>,
    pub enable_aws_api_server: bool,
    pub handshake_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub anthropic_base_url: Option<String>,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub anthropic_api_key: Option<String>,
    pub deployment: DeploymentConfig,
    pub providers: Vec<ProviderSpec>,
    pub rates: RateTable,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("model_id", &self.model_id)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("context_window", &self.context_window)
            .field("summarize_threshold", &self.summarize_threshold)
            .field("preserve_recent_messages", &self.preserve_recent_messages)
            .field("aws_region", &self.aws_region)
            .field("target_role_arn", &self.target_role_arn)
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| ".."))
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_output_tokens: 8192,
            context_window: 200_000,
            summarize_threshold: 0.7,
            summary_ratio: 0.3,
            preserve_recent_messages: 15,
            max_tool_iterations: 25,
            aws_region: "us-east-1".to_string(),
            target_role_arn: None,
            enable_aws_api_server: true,
            handshake_timeout_secs: 30,
            tool_timeout_secs: 120,
            shutdown_grace_secs: 5,
            anthropic_base_url: None,
            anthropic_api_key: None,
            deployment: DeploymentConfig::default(),
            providers: vec![
                ProviderSpec::python_module(
                    BILLING_PROVIDER_ID,
                    "awslabs.billing_cost_management_mcp_server.server",
                ),
                ProviderSpec::python_module(AWS_API_PROVIDER_ID, "awslabs.aws_api_mcp_server.server"),
            ],
            rates: RateTable::builtin(),
        }
    }
}

impl AgentConfig {
    /// Load, layer, and validate configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FINOPS_AGENT_CONFIG").ok().map(PathBuf::from))
            .or_else(|| default_config_path().filter(|p| p.exists()));

        let mut config = match file {
            Some(file) => {
                debug!(path = %file.display(), "loading config file");
                let raw = std::fs::read_to_string(&file).map_err(|e| {
                    FinOpsError::Config(format!("cannot read {}: {e}", file.display()))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document over the defaults. File rates extend the built-in table.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut parsed: Self =
            toml::from_str(raw).map_err(|e| FinOpsError::Config(format!("invalid config file: {e}")))?;
        let mut rates = RateTable::builtin();
        rates.extend(std::mem::take(&mut parsed.rates));
        parsed.rates = rates;
        Ok(parsed)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("FINOPS_MODEL_ID").or_else(|| get("BEDROCK_MODEL_ID")) {
            self.model_id = model;
        }
        if let Some(raw) = get("FINOPS_MAX_TOKENS") {
            self.max_output_tokens = parse_setting("FINOPS_MAX_TOKENS", &raw)?;
        }
        if let Some(raw) = get("FINOPS_CONTEXT_WINDOW") {
            self.context_window = parse_setting("FINOPS_CONTEXT_WINDOW", &raw)?;
        }
        if let Some(region) = get("AWS_DEFAULT_REGION") {
            self.aws_region = region;
        }
        if let Some(arn) = get("TARGET_ROLE_ARN") {
            self.target_role_arn = Some(arn);
        }
        if let Some(raw) = get("ENABLE_AWS_API_SERVER") {
            self.enable_aws_api_server = parse_flag(&raw);
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(key);
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self.anthropic_base_url = Some(url);
        }
        if let Some(stack) = get("STACK_NAME") {
            self.deployment.stack_name = stack;
        }
        if let Some(region) = get("DEPLOYMENT_REGION") {
            self.deployment.region = region;
        }
        if let Some(id) = get("SECRETS_MANAGER_ID") {
            self.deployment.secrets_manager_id = Some(id);
        }
        Ok(())
    }

    /// Startup checks; a failure here means the session must not start.
    pub fn validate(&self) -> Result<()> {
        self.rates.rate(&self.model_id)?;
        check_summarization_bounds(self.context_window, self.summarize_threshold, self.summary_ratio)?;
        if self.enabled_providers().next().is_none() {
            return Err(FinOpsError::Config("no tool provider is enabled".into()));
        }
        Ok(())
    }

    /// Providers to launch, in priority order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers
            .iter()
            .filter(|spec| spec.enabled)
            .filter(|spec| spec.id != AWS_API_PROVIDER_ID || self.enable_aws_api_server)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Range checks shared by file configuration and directly built sessions.
pub fn check_summarization_bounds(context_window: u64, threshold: f64, summary_ratio: f64) -> Result<()> {
    if context_window == 0 {
        return Err(FinOpsError::Config("context_window must be positive".into()));
    }
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(FinOpsError::Config(format!(
            "summarize_threshold must be in (0, 1], got {threshold}"
        )));
    }
    if !(summary_ratio > 0.0 && summary_ratio <= 1.0) {
        return Err(FinOpsError::Config(format!(
            "summary_ratio must be in (0, 1], got {summary_ratio}"
        )));
    }
    Ok(())
}

/// `<config dir>/finops-agent/config.toml` for the current user.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "finops-agent")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn parse_setting<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| FinOpsError::Config(format!("{key}={raw:?} is invalid: {e}")))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
