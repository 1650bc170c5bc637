//! Thin adapter over the WebRTC stack.
//!
//! The session owns exactly one peer connection; everything the core
//! needs from the stack goes through here. Registered callbacks do one
//! thing only: forward into the session's event channel. They run on
//! transport tasks, so every forward races cancellation and a late
//! callback can never block on a loop that already exited.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use super::cancel::CancelToken;
use super::error::SessionError;
use super::event::SessionEvent;
use super::DATA_CHANNEL_LABEL;

/// Build a peer connection for the given ICE server URLs.
pub(super) async fn connect(
    ice_server_urls: &[String],
) -> Result<Arc<RTCPeerConnection>, SessionError> {
    // The API requires a media engine even for data-only connections.
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers = if ice_server_urls.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: ice_server_urls.to_vec(),
            ..Default::default()
        }]
    };

    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    Ok(Arc::new(api.new_peer_connection(config).await?))
}

/// Forward one event into the session loop, giving up on cancellation.
async fn forward(events: &mpsc::Sender<SessionEvent>, cancel: &CancelToken, event: SessionEvent) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = events.send(event) => {}
    }
}

/// Register connection-level callbacks feeding the session loop.
pub(super) fn subscribe_connection(
    pc: &RTCPeerConnection,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancelToken,
) {
    let tx = events.clone();
    let token = cancel.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let tx = tx.clone();
        let token = token.clone();
        Box::pin(async move {
            forward(&tx, &token, SessionEvent::ConnectionStateChange(state)).await;
        })
    }));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = events.clone();
        let token = cancel.clone();
        Box::pin(async move {
            debug!("incoming data channel {:?}", dc.label());
            if dc.label() != DATA_CHANNEL_LABEL {
                return;
            }
            // The arrival event must enter the queue before any channel
            // event can, and handlers must be installed before this
            // callback returns - the stack delivers messages right
            // after it.
            forward(&tx, &token, SessionEvent::ConnectionDataChannel(dc.clone())).await;
            subscribe_channel(&dc, &tx, &token);
        })
    }));
}

/// Register channel-level callbacks feeding the session loop.
///
/// Panics if the channel is not ordered and reliable. The session only
/// ever negotiates default channel settings, so anything else is a
/// programming error, not a runtime condition.
pub(super) fn subscribe_channel(
    dc: &RTCDataChannel,
    events: &mpsc::Sender<SessionEvent>,
    cancel: &CancelToken,
) {
    assert!(
        dc.ordered() && dc.max_packet_lifetime() == 0 && dc.max_retransmits() == 0,
        "data channel must be ordered and reliable"
    );

    let tx = events.clone();
    let token = cancel.clone();
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        let token = token.clone();
        Box::pin(async move {
            forward(&tx, &token, SessionEvent::ChannelOpen).await;
        })
    }));

    let tx = events.clone();
    let token = cancel.clone();
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        let token = token.clone();
        Box::pin(async move {
            forward(&tx, &token, SessionEvent::ChannelClose).await;
        })
    }));

    let tx = events.clone();
    let token = cancel.clone();
    dc.on_error(Box::new(move |err| {
        let tx = tx.clone();
        let token = token.clone();
        Box::pin(async move {
            forward(&tx, &token, SessionEvent::ChannelError(err.to_string())).await;
        })
    }));

    let tx = events.clone();
    let token = cancel.clone();
    dc.on_message(Box::new(move |msg| {
        let tx = tx.clone();
        let token = token.clone();
        Box::pin(async move {
            forward(&tx, &token, SessionEvent::ChannelMessage(msg.data)).await;
        })
    }));
}

/// Replace connection callbacks with no-ops so late transport events
/// observe nothing.
pub(super) fn detach_connection(pc: &RTCPeerConnection) {
    pc.on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
    pc.on_data_channel(Box::new(|_| Box::pin(async {})));
}

/// Replace channel callbacks with no-ops.
pub(super) fn detach_channel(dc: &RTCDataChannel) {
    dc.on_open(Box::new(|| Box::pin(async {})));
    dc.on_close(Box::new(|| Box::pin(async {})));
    dc.on_error(Box::new(|_| Box::pin(async {})));
    dc.on_message(Box::new(|_| Box::pin(async {})));
}
