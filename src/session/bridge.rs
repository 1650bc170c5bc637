//! Child process supervision.
//!
//! Spawns the bridged command with captured stdin/stdout (stderr stays
//! on the caller's terminal) and pumps both directions through the
//! session. Three tasks coordinate through the cancellation token: the
//! stdout pump, the stdin pump, and the exit watcher.

use std::process::Stdio;

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::error::SessionError;
use super::Session;

/// Read size for child stdout. Stays under the SCTP default max message
/// size, so every read maps onto one channel message.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Spawn `program` and wire its stdio to the session.
///
/// Returns once the child is running; termination is reported through
/// the session's cancellation cause (`Done` for an orderly child exit).
pub(super) fn attach(
    session: &Session,
    program: &str,
    args: &[String],
) -> Result<(), SessionError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| SessionError::Child(err.to_string()))?;

    let mut stdout = child.stdout.take().expect("child stdout is piped");
    let mut stdin = child.stdin.take().expect("child stdin is piped");

    // stdout -> channel
    let reader = session.clone();
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match stdout.read(&mut buffer).await {
                // EOF: the child is finished talking.
                Ok(0) => {
                    reader.cancel(SessionError::Done);
                    break;
                }
                Ok(n) => {
                    if reader.write(Bytes::copy_from_slice(&buffer[..n])).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    reader.cancel(SessionError::Child(err.to_string()));
                    break;
                }
            }
        }
    });

    // channel -> stdin
    let writer = session.clone();
    tokio::spawn(async move {
        loop {
            match writer.read().await {
                Ok(data) => {
                    if let Err(err) = stdin.write_all(&data).await {
                        writer.cancel(SessionError::Child(err.to_string()));
                        break;
                    }
                }
                // Session over; dropping stdin hands the child its EOF.
                Err(_) => break,
            }
        }
    });

    let watcher = session.clone();
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => {
                    watcher.cancel(SessionError::Done);
                }
                Ok(status) => {
                    watcher.cancel(SessionError::Child(status.to_string()));
                }
                Err(err) => {
                    watcher.cancel(SessionError::Child(err.to_string()));
                }
            },
            cause = watcher.cancelled() => {
                // kill_on_drop reaps the child on the way out.
                debug!("stopping child: {cause}");
            }
        }
    });

    Ok(())
}
