//! Session engine: one peer connection, one data channel, one loop.
//!
//! The WebRTC stack calls back on its own tasks. Every callback is
//! converted into a [`SessionEvent`] on a single bounded channel whose
//! only consumer is [`Session::run_loop`]; all session state after
//! setup is mutated from that loop. Inbound and outbound bytes move
//! through capacity-one queues, so a stalled reader or an unopened
//! channel stalls the loop and, through the event queue, the transport
//! itself. That rendezvous is the whole backpressure story.

mod bridge;
mod cancel;
mod error;
mod event;
mod peer;

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub use cancel::CancelToken;
pub use error::SessionError;
pub use event::SessionEvent;

/// Label of the single negotiated data channel.
pub const DATA_CHANNEL_LABEL: &str = "data";

/// Default STUN server used when the caller configures nothing.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

const EVENT_BUFFER: usize = 8;

/// Session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// ICE server URLs used for candidate gathering. An empty list
    /// restricts gathering to host candidates.
    pub ice_servers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

/// One peer-to-peer byte-stream session.
///
/// Clones share the same underlying session. The usual shape, as driven
/// by the CLI front end:
///
/// 1. spawn [`Session::run_loop`],
/// 2. pair via [`Session::initiate`] + [`Session::accept`] (offerer) or
///    [`Session::join`] (answerer),
/// 3. pump bytes with [`Session::run`] / [`Session::read`] /
///    [`Session::write`],
/// 4. tear down with [`Session::close`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    cancel: CancelToken,

    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::Receiver<SessionEvent>>>,

    incoming_tx: mpsc::Sender<Bytes>,
    incoming_rx: AsyncMutex<mpsc::Receiver<Bytes>>,

    outgoing_tx: mpsc::Sender<Bytes>,
    outgoing_rx: parking_lot::Mutex<Option<mpsc::Receiver<Bytes>>>,

    // Channel-open latch; the loop flips it, `run` and the outbound
    // drain wait on it.
    open_tx: watch::Sender<bool>,

    pc: parking_lot::Mutex<Option<Arc<RTCPeerConnection>>>,
    dc: parking_lot::Mutex<Option<Arc<RTCDataChannel>>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (incoming_tx, incoming_rx) = mpsc::channel(1);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(1);
        let (open_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                cancel: CancelToken::new(),
                events_tx,
                events_rx: parking_lot::Mutex::new(Some(events_rx)),
                incoming_tx,
                incoming_rx: AsyncMutex::new(incoming_rx),
                outgoing_tx,
                outgoing_rx: parking_lot::Mutex::new(Some(outgoing_rx)),
                open_tx,
                pc: parking_lot::Mutex::new(None),
                dc: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Produce the local offer, with all ICE candidates inlined.
    ///
    /// Creates the peer connection and the `"data"` channel, then waits
    /// for ICE gathering to finish so a single signaling message can
    /// carry the complete description.
    pub async fn initiate(&self) -> Result<RTCSessionDescription, SessionError> {
        let pc = peer::connect(&self.inner.config.ice_servers).await?;
        *self.inner.pc.lock() = Some(pc.clone());
        peer::subscribe_connection(&pc, self.inner.events_tx.clone(), self.inner.cancel.clone());

        // Default init: ordered, reliable.
        let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
        self.bind_channel(dc);

        let offer = pc.create_offer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;

        // Setting the local description starts candidate gathering.
        pc.set_local_description(offer).await?;

        tokio::select! {
            _ = gathered.recv() => {}
            cause = self.inner.cancel.cancelled() => return Err(cause),
        }

        // Read the description back; it now carries the candidates.
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| SessionError::Rtc("local description missing".into()))?;
        check_candidates(&local)?;
        Ok(local)
    }

    /// Answer a remote offer, with all ICE candidates inlined.
    ///
    /// The remote peer creates the channel; it is subscribed the moment
    /// it arrives and handed to the loop, so `run_loop` must already be
    /// spawned.
    pub async fn join(
        &self,
        remote: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, SessionError> {
        let pc = peer::connect(&self.inner.config.ice_servers).await?;
        *self.inner.pc.lock() = Some(pc.clone());
        peer::subscribe_connection(&pc, self.inner.events_tx.clone(), self.inner.cancel.clone());

        pc.set_remote_description(remote).await?;

        let answer = pc.create_answer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;

        tokio::select! {
            _ = gathered.recv() => {}
            cause = self.inner.cancel.cancelled() => return Err(cause),
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| SessionError::Rtc("local description missing".into()))?;
        check_candidates(&local)?;
        Ok(local)
    }

    /// Install the peer's answer. Valid only after [`Session::initiate`].
    pub async fn accept(&self, remote: RTCSessionDescription) -> Result<(), SessionError> {
        let pc = self
            .inner
            .pc
            .lock()
            .clone()
            .ok_or_else(|| SessionError::Rtc("accept before initiate".into()))?;
        pc.set_remote_description(remote).await?;
        Ok(())
    }

    /// Spawn `program` bridged to the channel and block until the
    /// session ends. Orderly causes (`Closed`, `Done`) map to `Ok`.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<(), SessionError> {
        // The child starts once bytes can actually flow.
        let mut open = self.inner.open_tx.subscribe();
        let opened = tokio::select! {
            result = open.wait_for(|open| *open) => result.is_ok(),
            _ = self.inner.cancel.cancelled() => false,
        };
        if !opened {
            return self.finished().await;
        }

        if let Err(err) = bridge::attach(self, program, args) {
            self.inner.cancel.cancel(err.clone());
            return Err(err);
        }
        self.finished().await
    }

    /// One message from the peer. Fails with the latched cause once the
    /// session is over.
    pub async fn read(&self) -> Result<Bytes, SessionError> {
        let mut incoming = self.inner.incoming_rx.lock().await;
        tokio::select! {
            biased;
            cause = self.inner.cancel.cancelled() => Err(cause),
            msg = incoming.recv() => msg.ok_or_else(|| self.latched()),
        }
    }

    /// Queue bytes for the peer; each call becomes one SCTP message.
    /// Blocks until the loop takes the payload or the session ends.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        tokio::select! {
            biased;
            cause = self.inner.cancel.cancelled() => Err(cause),
            sent = self.inner.outgoing_tx.send(data) => sent.map_err(|_| self.latched()),
        }
    }

    /// Request an orderly close and wait for the loop to finish.
    /// Idempotent: later calls observe the already-latched cause.
    pub async fn close(&self) -> Result<(), SessionError> {
        if !self.inner.cancel.is_cancelled() {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {}
                _ = self.inner.events_tx.send(SessionEvent::UserClose) => {}
            }
        }
        self.finished().await
    }

    /// Drive the session until a terminal cause is latched, then tear
    /// everything down. Spawn exactly once, before pairing.
    pub async fn run_loop(&self) {
        let mut events = self
            .inner
            .events_rx
            .lock()
            .take()
            .expect("session loop already started");
        let mut outgoing = self
            .inner
            .outgoing_rx
            .lock()
            .take()
            .expect("session loop already started");

        let open = self.inner.open_tx.subscribe();

        loop {
            let channel_open = *open.borrow();
            tokio::select! {
                cause = self.inner.cancel.cancelled() => {
                    debug!("session over: {cause}");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    // The session holds its own sender, so the queue
                    // cannot close while the loop runs.
                    None => break,
                },
                data = outgoing.recv(), if channel_open => {
                    if let Some(data) = data {
                        self.transmit(data).await;
                    }
                }
            }
        }

        self.shutdown(&mut events, &mut outgoing).await;
    }

    async fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::UserClose => {
                self.inner.cancel.cancel(SessionError::Closed);
            }
            SessionEvent::ConnectionStateChange(state) => {
                debug!("connection state {state}");
                if state == RTCPeerConnectionState::Failed {
                    self.inner.cancel.cancel(SessionError::ConnectionFailed);
                }
            }
            SessionEvent::ConnectionDataChannel(dc) => {
                // Already subscribed by the arrival callback; the loop
                // just takes ownership of the handle.
                let mut slot = self.inner.dc.lock();
                if slot.is_some() {
                    warn!("data channel already bound, ignoring another");
                } else {
                    *slot = Some(dc);
                }
            }
            SessionEvent::ChannelOpen => {
                let _ = self.inner.open_tx.send(true);
            }
            SessionEvent::ChannelClose => {
                self.inner.cancel.cancel(SessionError::ChannelClosed);
            }
            SessionEvent::ChannelError(err) => {
                self.inner.cancel.cancel(SessionError::Channel(err));
            }
            SessionEvent::ChannelMessage(data) => {
                // Rendezvous with the reader; a slow reader stalls the
                // loop, the event queue and, eventually, the transport.
                tokio::select! {
                    _ = self.inner.cancel.cancelled() => {}
                    _ = self.inner.incoming_tx.send(data) => {}
                }
            }
            SessionEvent::ChannelBufferedAmountLow => {}
        }
    }

    async fn transmit(&self, data: Bytes) {
        let dc = self.inner.dc.lock().clone();
        match dc {
            Some(dc) => {
                if let Err(err) = dc.send(&data).await {
                    self.inner.cancel.cancel(SessionError::Channel(err.to_string()));
                }
            }
            None => {
                self.inner
                    .cancel
                    .cancel(SessionError::Channel("no data channel bound".into()));
            }
        }
    }

    /// Invoked exactly once, when the loop exits.
    async fn shutdown(
        &self,
        events: &mut mpsc::Receiver<SessionEvent>,
        outgoing: &mut mpsc::Receiver<Bytes>,
    ) {
        let dc = self.inner.dc.lock().take();
        let pc = self.inner.pc.lock().take();

        // Detach callbacks first so nothing re-enters a dying session,
        // then close the channel before the connection that carries it.
        if let Some(dc) = &dc {
            peer::detach_channel(dc);
        }
        if let Some(pc) = &pc {
            peer::detach_connection(pc);
        }
        if let Some(dc) = dc {
            if let Err(err) = dc.close().await {
                debug!("data channel close: {err}");
            }
        }
        if let Some(pc) = pc {
            if let Err(err) = pc.close().await {
                debug!("peer connection close: {err}");
            }
        }

        // Release any producer still parked on a bounded queue; they
        // observe cancellation on their own.
        while events.try_recv().is_ok() {}
        while outgoing.try_recv().is_ok() {}
        if let Ok(mut incoming) = self.inner.incoming_rx.try_lock() {
            while incoming.try_recv().is_ok() {}
        }
    }

    /// Own and subscribe the locally created channel (offerer side).
    fn bind_channel(&self, dc: Arc<RTCDataChannel>) {
        *self.inner.dc.lock() = Some(dc.clone());
        peer::subscribe_channel(&dc, &self.inner.events_tx, &self.inner.cancel);
    }

    pub(crate) fn cancel(&self, cause: SessionError) -> bool {
        self.inner.cancel.cancel(cause)
    }

    pub(crate) async fn cancelled(&self) -> SessionError {
        self.inner.cancel.cancelled().await
    }

    /// Wait for the terminal cause and map the orderly ones to `Ok`.
    async fn finished(&self) -> Result<(), SessionError> {
        let cause = self.inner.cancel.cancelled().await;
        if cause.is_orderly() {
            Ok(())
        } else {
            Err(cause)
        }
    }

    fn latched(&self) -> SessionError {
        self.inner.cancel.cause().unwrap_or(SessionError::Closed)
    }
}

/// Non-trickle invariant: a usable local description names at least one
/// ICE candidate.
fn check_candidates(desc: &RTCSessionDescription) -> Result<(), SessionError> {
    if desc.sdp.contains("\na=candidate:") {
        Ok(())
    } else {
        Err(SessionError::NoIceCandidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_with_sdp(sdp: &str) -> RTCSessionDescription {
        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Offer;
        desc.sdp = sdp.to_string();
        desc
    }

    #[test]
    fn candidate_check_requires_a_candidate_line() {
        let bare = offer_with_sdp("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
        assert_eq!(
            check_candidates(&bare),
            Err(SessionError::NoIceCandidate)
        );

        let gathered = offer_with_sdp(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             a=candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host\r\n",
        );
        assert_eq!(check_candidates(&gathered), Ok(()));
    }

    #[tokio::test]
    async fn close_before_pairing_latches_closed() {
        let session = Session::new(SessionConfig::default());
        let looper = tokio::spawn({
            let session = session.clone();
            async move { session.run_loop().await }
        });

        session.close().await.expect("close");
        session.close().await.expect("close twice");

        assert_eq!(session.read().await.unwrap_err(), SessionError::Closed);
        assert_eq!(
            session.write(Bytes::from_static(b"late")).await.unwrap_err(),
            SessionError::Closed
        );

        looper.await.expect("loop exits");
    }

    #[tokio::test]
    async fn accept_before_initiate_is_an_error() {
        let session = Session::new(SessionConfig::default());
        let desc = offer_with_sdp("v=0\r\n");
        assert!(matches!(
            session.accept(desc).await,
            Err(SessionError::Rtc(_))
        ));
    }
}
