//! Events consumed by the session loop.

use std::sync::Arc;

use bytes::Bytes;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Everything the session loop reacts to.
///
/// Produced by transport callbacks and by `close`, consumed by the
/// single loop task. The union is closed: the loop matches every
/// variant.
pub enum SessionEvent {
    /// Peer connection state moved.
    ConnectionStateChange(RTCPeerConnectionState),
    /// A remote-initiated data channel arrived (join side).
    ConnectionDataChannel(Arc<RTCDataChannel>),
    /// The bound channel finished its SCTP handshake.
    ChannelOpen,
    /// The bound channel closed.
    ChannelClose,
    /// The bound channel's send buffer drained below the threshold.
    /// Reserved for flow control; nothing arms the threshold yet.
    ChannelBufferedAmountLow,
    /// The bound channel reported an error.
    ChannelError(String),
    /// One SCTP message from the peer.
    ChannelMessage(Bytes),
    /// `close` was requested locally.
    UserClose,
}
