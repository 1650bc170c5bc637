//! Signal transport: moving descriptions between peers.
//!
//! Signaling is explicitly not WebRTC's problem, and not this crate's
//! either: the built-in transport hands the serialized description to
//! an external helper program and lets it figure out delivery.

use std::path::PathBuf;
use std::process::Stdio;

use log::debug;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::codec::{self, CodecError};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The helper exited with a failure status.
    #[error("signaling helper failed: {0}")]
    Helper(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("signaling I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Moves one signal at a time to and from the remote peer.
#[allow(async_fn_in_trait)]
pub trait Transport<S> {
    /// Deliver `signal` to the peer; resolves once delivery succeeded.
    async fn send(&self, signal: &S) -> Result<(), TransportError>;

    /// Block until the peer's signal arrives.
    async fn receive(&self) -> Result<S, TransportError>;
}

/// Built-in transport delegating to an external helper program.
///
/// `helper send` receives the payload on stdin, `helper recv` prints
/// the received payload on stdout; exit status 0 reports success. What
/// the helper does in between - editor buffer, shared file, chat
/// message - is entirely its own concern.
pub struct CommandTransport {
    path: PathBuf,
}

impl CommandTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Transport<RTCSessionDescription> for CommandTransport {
    async fn send(&self, signal: &RTCSessionDescription) -> Result<(), TransportError> {
        let payload = codec::encode(signal)?;
        debug!("handing {} bytes to {:?} send", payload.len(), self.path);

        let mut child = Command::new(&self.path)
            .arg("send")
            .stdin(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("helper stdin is piped");
        let written = stdin.write_all(&payload).await;
        // The helper reads until EOF.
        drop(stdin);

        // A failure status beats whatever broke the pipe on the way.
        let status = child.wait().await?;
        if !status.success() {
            return Err(TransportError::Helper(format!(
                "{:?} send: {status}",
                self.path
            )));
        }
        written?;
        Ok(())
    }

    async fn receive(&self) -> Result<RTCSessionDescription, TransportError> {
        let output = Command::new(&self.path)
            .arg("recv")
            .stderr(Stdio::inherit())
            .output()
            .await?;

        if !output.status.success() {
            return Err(TransportError::Helper(format!(
                "{:?} recv: {}",
                self.path, output.status
            )));
        }

        debug!("received {} bytes from {:?} recv", output.stdout.len(), self.path);
        Ok(codec::decode(&output.stdout)?)
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    /// A helper that "delivers" by parking the payload in a file.
    fn stub_helper(dir: &std::path::Path) -> PathBuf {
        let mailbox = dir.join("mailbox");
        let helper = dir.join("helper");
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  send) cat > {mailbox:?} ;;\n  recv) cat {mailbox:?} ;;\n  *) exit 64 ;;\nesac\n"
        );
        std::fs::write(&helper, script).unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
        helper
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rtc-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn helper_round_trip() {
        let dir = scratch_dir("transport");
        let transport = CommandTransport::new(stub_helper(&dir));

        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = RTCSdpType::Offer;
        desc.sdp = "v=0\r\ns=-\r\n".to_string();

        transport.send(&desc).await.expect("send");
        let received = transport.receive().await.expect("receive");

        assert_eq!(received.sdp_type, desc.sdp_type);
        assert_eq!(received.sdp, desc.sdp);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failing_helper_is_reported() {
        let dir = scratch_dir("transport-fail");
        let helper = dir.join("helper");
        std::fs::write(&helper, "#!/bin/sh\nexit 3\n").unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transport = CommandTransport::new(&helper);
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Helper(_))
        ));

        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = RTCSdpType::Answer;
        desc.sdp = "v=0\r\n".to_string();
        assert!(matches!(
            transport.send(&desc).await,
            Err(TransportError::Helper(_))
        ));

        let _ = std::fs::remove_dir_all(dir);
    }
}
