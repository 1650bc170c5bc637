//! rtc - pipe a process's stdio to a remote peer.
//!
//! One ordered, reliable WebRTC data channel between two hosts, bridged
//! to the stdin and stdout of a locally spawned command. Exchanging the
//! session descriptions is delegated to an external signaling helper;
//! everything else lives in the session engine.

pub mod cli;
pub mod session;
pub mod signal;
