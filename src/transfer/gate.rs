//! Credential gate checked before any transfer

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::process::format_command;

/// Precondition that must hold before files are transferred
#[async_trait]
pub trait CredentialGate: Send + Sync {
    /// Whether the precondition holds; never fails
    async fn check(&self) -> bool;

    fn describe(&self) -> String;
}

/// Gate satisfied when a command exits with status 0
#[derive(Debug, Clone)]
pub struct CommandGate {
    program: String,
    args: Vec<String>,
}

impl CommandGate {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `ssh-add -l`: succeeds when the agent holds at least one key
    pub fn ssh_agent(program: &str) -> Self {
        Self::new(program, &["-l"])
    }
}

#[async_trait]
impl CredentialGate for CommandGate {
    async fn check(&self) -> bool {
        let result = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!("{} exited with {}", self.describe(), status);
                false
            }
            Err(e) => {
                warn!("Could not run {}: {}", self.describe(), e);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format_command(&self.program, &self.args)
    }
}
