//! Subprocess execution with live output

use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::process::Command;
use tracing::{debug, warn};

use super::TransferError;

/// Render a command line for logs and error messages
pub fn format_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg)
            } else {
                arg.clone()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a program, passing each stdout and stderr line to `on_line` as it arrives
///
/// Progress output that rewrites itself with `\r` is reduced to its latest
/// segment. Returns the exit status; a program that cannot be started is
/// [`TransferError::Spawn`].
pub async fn run_streaming<F>(
    program: &str,
    args: &[String],
    mut on_line: F,
) -> Result<ExitStatus, TransferError>
where
    F: FnMut(&str) + Send,
{
    let command = format_command(program, args);
    debug!("Running: {}", command);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TransferError::Spawn {
            command: command.clone(),
            source,
        })?;

    // Split on raw bytes: file names in rsync output need not be UTF-8
    let mut stdout = child.stdout.take().map(|out| BufReader::new(out).split(b'\n'));
    let mut stderr = child.stderr.take().map(|err| BufReader::new(err).split(b'\n'));

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = async { next_line(stdout.as_mut()?, "stdout").await }, if stdout.is_some() => {
                match line {
                    Some(line) => emit(&line, &mut on_line),
                    None => stdout = None,
                }
            }
            line = async { next_line(stderr.as_mut()?, "stderr").await }, if stderr.is_some() => {
                match line {
                    Some(line) => emit(&line, &mut on_line),
                    None => stderr = None,
                }
            }
        }
    }

    child.wait().await.map_err(|source| TransferError::Spawn { command, source })
}

/// Next raw line of a child stream; a read error ends the stream
async fn next_line<R>(lines: &mut Split<R>, stream: &str) -> Option<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    match lines.next_segment().await {
        Ok(segment) => segment,
        Err(e) => {
            warn!("Stopped reading child {}: {}", stream, e);
            None
        }
    }
}

fn emit<F: FnMut(&str)>(segment: &[u8], on_line: &mut F) {
    let line = String::from_utf8_lossy(segment);
    let latest = line.rsplit('\r').find(|s| !s.trim().is_empty()).unwrap_or("");
    let latest = latest.trim_end();
    if !latest.is_empty() {
        on_line(latest);
    }
}
