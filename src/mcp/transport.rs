//! Launch description for a stdio tool provider.

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::ProviderSpec;

/// Command, arguments, and the environment snapshot a provider runs with.
///
/// The environment is captured once when the launch is built; later changes
/// to the process environment never reach the subprocess.
#[derive(Clone, PartialEq)]
pub struct ProviderLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl std::fmt::Debug for ProviderLaunch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLaunch")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env_vars", &self.env.len())
            .finish()
    }
}

impl ProviderLaunch {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// Build a launch from a provider spec over a prepared environment.
    /// Spec-level variables are applied last.
    pub fn from_spec(spec: &ProviderSpec, prepared_env: &BTreeMap<String, String>) -> Self {
        let mut env = prepared_env.clone();
        env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            command: spec.command.clone(),
            args: spec.args.clone(),
            env,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// A command that sees only the snapshot and dies with its handle.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}
