//! File transfer to the device
//!
//! Files go over rsync/ssh; the ssh agent is checked first so a run never
//! stalls on a password prompt.

mod gate;
mod process;
mod rsync;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncReporter;

pub use gate::{CommandGate, CredentialGate};
pub use rsync::RsyncTransfer;

/// Errors from running the transfer tool
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with {}", exit_description(.code))]
    Failed { command: String, code: Option<i32> },
}

impl TransferError {
    /// Command line that failed
    pub fn command(&self) -> &str {
        match self {
            TransferError::Spawn { command, .. } | TransferError::Failed { command, .. } => command,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// One unit of transfer work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferJob {
    /// Mirror the whole downloads tree, deleting what is gone locally
    Mirror { source: PathBuf },
    /// Copy a single episode into its show folder on the device
    Copy { file: PathBuf, show_folder: String },
}

/// What a finished transfer did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub command: String,
    pub files_sent: usize,
    pub files_deleted: usize,
}

/// Something that can move files to the device
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Command line the job would run, for logging
    fn describe(&self, job: &TransferJob) -> String;

    /// Run the job, streaming its output through the reporter
    async fn run(
        &self,
        job: &TransferJob,
        reporter: &SyncReporter,
    ) -> Result<TransferReport, TransferError>;
}
