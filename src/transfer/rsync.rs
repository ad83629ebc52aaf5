//! rsync-backed transfers

use async_trait::async_trait;
use tracing::debug;

use super::process::{format_command, run_streaming};
use super::{Transfer, TransferError, TransferJob, TransferReport};
use crate::sync::SyncReporter;

/// Runs rsync against `user@host:/root/`
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    program: String,
    /// Remote root, always ending in `/`
    destination: String,
}

/// Kind of change an itemized output line reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemChange {
    Sent,
    Deleted,
}

impl RsyncTransfer {
    pub fn new(program: &str, destination: &str) -> Self {
        let destination = if destination.ends_with('/') {
            destination.to_string()
        } else {
            format!("{}/", destination)
        };
        Self {
            program: program.to_string(),
            destination,
        }
    }

    /// Arguments for a job
    pub fn arguments(&self, job: &TransferJob) -> Vec<String> {
        match job {
            TransferJob::Mirror { source } => {
                let mut source = source.to_string_lossy().into_owned();
                // Trailing slash: copy the directory's contents, not the directory
                if !source.ends_with('/') {
                    source.push('/');
                }
                vec![
                    "-rPvtus".to_string(),
                    "--delete".to_string(),
                    "--itemize-changes".to_string(),
                    source,
                    self.destination.clone(),
                ]
            }
            TransferJob::Copy { file, show_folder } => vec![
                "-vtus".to_string(),
                "--progress".to_string(),
                "--partial".to_string(),
                "--itemize-changes".to_string(),
                file.to_string_lossy().into_owned(),
                format!("{}{}/", self.destination, show_folder),
            ],
        }
    }
}

/// Classify a line of `--itemize-changes` output
fn classify(line: &str) -> Option<ItemChange> {
    if line.starts_with("*deleting") {
        return Some(ItemChange::Deleted);
    }
    let mut chars = line.chars();
    match (chars.next(), chars.next()) {
        (Some('<' | '>'), Some('f')) => Some(ItemChange::Sent),
        _ => None,
    }
}

#[async_trait]
impl Transfer for RsyncTransfer {
    fn describe(&self, job: &TransferJob) -> String {
        format_command(&self.program, &self.arguments(job))
    }

    async fn run(
        &self,
        job: &TransferJob,
        reporter: &SyncReporter,
    ) -> Result<TransferReport, TransferError> {
        let args = self.arguments(job);
        let command = self.describe(job);
        reporter.info(format!("Running {}", command));

        let mut report = TransferReport {
            command: command.clone(),
            ..TransferReport::default()
        };

        let status = run_streaming(&self.program, &args, |line| {
            match classify(line) {
                Some(ItemChange::Sent) => report.files_sent += 1,
                Some(ItemChange::Deleted) => report.files_deleted += 1,
                None => {}
            }
            reporter.output(line);
        })
        .await?;

        if !status.success() {
            return Err(TransferError::Failed {
                command,
                code: status.code(),
            });
        }

        debug!(
            "{} finished: {} sent, {} deleted",
            self.program, report.files_sent, report.files_deleted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn transfer() -> RsyncTransfer {
        RsyncTransfer::new("rsync", "pi@192.168.1.15:/var/lib/mpd/music/Podcasts")
    }

    #[test]
    fn test_mirror_arguments() {
        let job = TransferJob::Mirror {
            source: PathBuf::from("/home/me/podcasts"),
        };
        assert_eq!(
            transfer().arguments(&job),
            vec![
                "-rPvtus",
                "--delete",
                "--itemize-changes",
                "/home/me/podcasts/",
                "pi@192.168.1.15:/var/lib/mpd/music/Podcasts/",
            ]
        );
    }

    #[test]
    fn test_copy_arguments_target_show_folder() {
        let job = TransferJob::Copy {
            file: PathBuf::from("/home/me/podcasts/ShowA/ep1.mp3"),
            show_folder: "ShowA".into(),
        };
        let args = transfer().arguments(&job);
        assert_eq!(&args[..4], &["-vtus", "--progress", "--partial", "--itemize-changes"]);
        assert_eq!(args[4], "/home/me/podcasts/ShowA/ep1.mp3");
        assert_eq!(args[5], "pi@192.168.1.15:/var/lib/mpd/music/Podcasts/ShowA/");
    }

    #[test]
    fn test_classify_itemized_lines() {
        assert_eq!(classify("<f+++++++++ ShowA/ep1.mp3"), Some(ItemChange::Sent));
        assert_eq!(classify("<f.st...... ShowA/ep2.mp3"), Some(ItemChange::Sent));
        assert_eq!(classify("*deleting   ShowB/old.mp3"), Some(ItemChange::Deleted));
        assert_eq!(classify("cd+++++++++ ShowC/"), None);
        assert_eq!(classify("sent 1,234 bytes  received 56 bytes"), None);
        assert_eq!(classify("     32,768 100%   1.23MB/s    0:00:00"), None);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_command() {
        // `false` ignores its arguments and exits 1
        let transfer = RsyncTransfer::new("false", "pi@host:/music");
        let job = TransferJob::Mirror {
            source: PathBuf::from("/tmp"),
        };
        let err = transfer
            .run(&job, &SyncReporter::detached())
            .await
            .unwrap_err();
        match err {
            TransferError::Failed { command, code } => {
                assert!(command.starts_with("false -rPvtus --delete"));
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_counts_itemized_output() {
        // Stand-in for rsync that prints itemized lines
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-rsync");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '<f+++++++++ ShowA/ep1.mp3'\necho '*deleting   ShowB/old.mp3'\necho 'sent 10 bytes'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let transfer = RsyncTransfer::new(script.to_str().unwrap(), "pi@host:/music/");
        let job = TransferJob::Mirror {
            source: dir.path().to_path_buf(),
        };
        let report = transfer.run(&job, &SyncReporter::detached()).await.unwrap();
        assert_eq!(report.files_sent, 1);
        assert_eq!(report.files_deleted, 1);
    }
}
