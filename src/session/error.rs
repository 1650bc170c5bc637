//! Session error taxonomy.
//!
//! Every way a session can end funnels through one of these causes,
//! including the two orderly sentinels.

use thiserror::Error;

/// Terminal cause of a session.
///
/// The first cause latched into the session's cancellation token is
/// authoritative; later ones are dropped. `Closed` and `Done` are
/// orderly sentinels, mapped to success at the `run`/`close` boundary.
///
/// Causes are clonable so every waiter observes the same value; inner
/// errors from the stack are carried as their rendered messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Local description contained no ICE candidate after gathering.
    #[error("no ICE candidate in local description")]
    NoIceCandidate,

    /// Peer connection reached the failed state.
    #[error("peer connection failed")]
    ConnectionFailed,

    /// Data channel closed from the remote side.
    #[error("data channel closed")]
    ChannelClosed,

    /// Data channel reported an error.
    #[error("data channel: {0}")]
    Channel(String),

    /// Signaling helper exited non-zero or produced malformed data.
    #[error("signaling transport: {0}")]
    SignalTransport(String),

    /// Child process could not be spawned or exited with failure.
    #[error("child process: {0}")]
    Child(String),

    /// WebRTC stack error during construction or negotiation.
    #[error("webrtc: {0}")]
    Rtc(String),

    /// Orderly user-requested close.
    #[error("session closed")]
    Closed,

    /// Orderly termination after the child finished.
    #[error("session done")]
    Done,
}

impl SessionError {
    /// Whether the cause is an orderly ending rather than a failure.
    pub fn is_orderly(&self) -> bool {
        matches!(self, SessionError::Closed | SessionError::Done)
    }
}

impl From<webrtc::Error> for SessionError {
    fn from(err: webrtc::Error) -> Self {
        SessionError::Rtc(err.to_string())
    }
}
