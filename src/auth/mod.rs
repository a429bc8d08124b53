//! Interfaces to the identity and secrets collaborators.
//!
//! The login flow itself lives outside this crate. The agent core only ever
//! sees an opaque [`CallerIdentity`] after login, and [`AuthSecrets`] is
//! resolved here purely so the hosting layer can configure its login flow.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{FinOpsError, Result};

/// Who is chatting, as reported by the identity provider after login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerIdentity {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

impl CallerIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            given_name: None,
            family_name: None,
        }
    }

    /// Full name when known, otherwise the username.
    pub fn display_name(&self) -> String {
        match (&self.given_name, &self.family_name) {
            (Some(given), Some(family)) => format!("{given} {family}"),
            (Some(given), None) => given.clone(),
            _ => self.username.clone(),
        }
    }
}

/// Login configuration stored in the secrets store.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSecrets {
    pub pool_id: String,
    pub app_client_id: String,
    pub app_client_secret: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub saml_enabled: bool,
    #[serde(default)]
    pub saml_provider_name: Option<String>,
}

impl std::fmt::Debug for AuthSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSecrets")
            .field("pool_id", &self.pool_id)
            .field("app_client_id", &self.app_client_id)
            .field("app_client_secret", &"..")
            .field("region", &self.region)
            .field("domain", &self.domain)
            .field("saml_enabled", &self.saml_enabled)
            .field("saml_provider_name", &self.saml_provider_name)
            .finish()
    }
}

impl AuthSecrets {
    /// Parse a secret's JSON string. The region is filled in when absent.
    pub fn from_secret_string(raw: &str, region: &str) -> Result<Self> {
        let mut secrets: AuthSecrets = serde_json::from_str(raw)
            .map_err(|e| FinOpsError::Config(format!("malformed auth secret: {e}")))?;
        if secrets.region.is_empty() {
            secrets.region = region.to_string();
        }
        Ok(secrets)
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => text.trim().eq_ignore_ascii_case("true"),
    })
}

/// Resolves a secret identifier and region into [`AuthSecrets`].
#[async_trait]
pub trait SecretsLookup: Send + Sync {
    async fn lookup(&self, secret_id: &str, region: &str) -> Result<AuthSecrets>;
}

/// Reads secrets from JSON files named `<secret_id>.json` in a directory,
/// for local runs without a secrets service.
pub struct FileSecretsLookup {
    dir: PathBuf,
}

impl FileSecretsLookup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretsLookup for FileSecretsLookup {
    async fn lookup(&self, secret_id: &str, region: &str) -> Result<AuthSecrets> {
        let path = self.dir.join(format!("{secret_id}.json"));
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            FinOpsError::Config(format!("secret {secret_id} unavailable at {}: {e}", path.display()))
        })?;
        AuthSecrets::from_secret_string(&raw, region)
    }
}
