//! Applies parsed commands to a sandbox, best-effort and strictly in order.

use std::sync::Arc;

use dec_core::ids::EnvironmentId;
use dec_core::sandbox::{validate_relative_path, Sandbox, SandboxError};
use dec_protocol::Command;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Parsed and attempted, but there is no sandbox operation behind it.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Clone, Debug, Serialize)]
pub struct CommandOutcome {
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub errors: Vec<String>,
    pub outcomes: Vec<CommandOutcome>,
}

impl ExecutionReport {
    pub fn empty() -> Self {
        Self::from_outcomes(Vec::new())
    }

    fn from_outcomes(outcomes: Vec<CommandOutcome>) -> Self {
        let errors: Vec<String> = outcomes
            .iter()
            .filter_map(|o| {
                o.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", o.command.summary()))
            })
            .collect();
        Self {
            success: errors.is_empty(),
            errors,
            outcomes,
        }
    }
}

impl Default for ExecutionReport {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Clone)]
pub struct CommandExecutor {
    sandbox: Arc<dyn Sandbox>,
}

impl CommandExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    pub async fn execute(&self, env: &EnvironmentId, command: &Command) -> Result<(), ExecutionError> {
        match command {
            Command::Write { path, content, .. } => {
                validate_relative_path(path)?;
                self.sandbox.write_file(env, path, content).await?;
                Ok(())
            }
            Command::Rename { .. } => Err(ExecutionError::NotImplemented("rename")),
            Command::Delete { .. } => Err(ExecutionError::NotImplemented("delete")),
            Command::AddDependency { .. } => Err(ExecutionError::NotImplemented("add dependency")),
        }
    }

    /// Run every command in order. A failure is recorded and the next
    /// command still runs.
    pub async fn execute_all(&self, env: &EnvironmentId, commands: &[Command]) -> ExecutionReport {
        let mut outcomes = Vec::with_capacity(commands.len());
        for command in commands {
            let error = match self.execute(env, command).await {
                Ok(()) => {
                    info!(env_id = %env, command = %command.summary(), "command applied");
                    None
                }
                Err(e) => {
                    warn!(env_id = %env, command = %command.summary(), error = %e, "command failed");
                    Some(e.to_string())
                }
            };
            outcomes.push(CommandOutcome {
                command: command.clone(),
                error,
            });
        }
        ExecutionReport::from_outcomes(outcomes)
    }
}
