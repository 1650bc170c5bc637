//! End-to-end pairing of two in-process sessions.
//!
//! Signaling happens by handing descriptions across directly; ICE is
//! restricted to host candidates so nothing leaves the machine.

use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use rtc::session::{Session, SessionConfig, SessionError};

const PAIR_TIMEOUT: Duration = Duration::from_secs(30);

fn local_config() -> SessionConfig {
    // Host candidates only; no STUN round-trips in tests.
    SessionConfig {
        ice_servers: Vec::new(),
    }
}

struct Pair {
    initiator: Session,
    joiner: Session,
    loops: Vec<JoinHandle<()>>,
}

async fn pair() -> Pair {
    let initiator = Session::new(local_config());
    let joiner = Session::new(local_config());

    let loops: Vec<JoinHandle<()>> = [&initiator, &joiner]
        .map(|session| {
            let session = session.clone();
            tokio::spawn(async move { session.run_loop().await })
        })
        .into();

    let offer = timeout(PAIR_TIMEOUT, initiator.initiate())
        .await
        .expect("initiate in time")
        .expect("initiate");
    assert!(offer.sdp.contains("\na=candidate:"));

    let answer = timeout(PAIR_TIMEOUT, joiner.join(offer))
        .await
        .expect("join in time")
        .expect("join");
    assert!(answer.sdp.contains("\na=candidate:"));

    initiator.accept(answer).await.expect("accept");

    Pair {
        initiator,
        joiner,
        loops,
    }
}

impl Pair {
    async fn teardown(self) {
        let _ = self.initiator.close().await;
        let _ = self.joiner.close().await;
        for task in self.loops {
            timeout(PAIR_TIMEOUT, task)
                .await
                .expect("loop exits in time")
                .expect("loop task");
        }
    }
}

#[tokio::test]
async fn hello_round_trip() {
    let pair = pair().await;

    pair.initiator
        .write(Bytes::from_static(b"hello"))
        .await
        .expect("write");
    let msg = timeout(PAIR_TIMEOUT, pair.joiner.read())
        .await
        .expect("read in time")
        .expect("read");
    assert_eq!(&msg[..], b"hello");

    pair.initiator.close().await.expect("close initiator");
    pair.joiner.close().await.expect("close joiner");
    pair.teardown().await;
}

#[tokio::test]
async fn bridges_child_stdio() {
    let pair = pair().await;

    // The joiner wires `cat` to the channel, echoing everything back.
    let echo = tokio::spawn({
        let joiner = pair.joiner.clone();
        async move { joiner.run("cat", &[]).await }
    });

    let block = vec![0x5au8; 4096];
    for _ in 0..3 {
        pair.initiator
            .write(Bytes::copy_from_slice(&block))
            .await
            .expect("write block");
    }

    let mut echoed = Vec::new();
    while echoed.len() < 3 * 4096 {
        let msg = timeout(PAIR_TIMEOUT, pair.initiator.read())
            .await
            .expect("echo in time")
            .expect("echo");
        echoed.extend_from_slice(&msg);
    }
    assert_eq!(echoed.len(), 3 * 4096);
    assert!(echoed.iter().all(|&b| b == 0x5a));

    pair.joiner.close().await.expect("close joiner");
    let run_result = timeout(PAIR_TIMEOUT, echo)
        .await
        .expect("run returns in time")
        .expect("run task");
    assert!(run_result.is_ok(), "orderly close maps to success: {run_result:?}");

    pair.teardown().await;
}

#[tokio::test]
async fn child_exit_ends_the_session() {
    let pair = pair().await;

    // `true` exits immediately; its stdout EOF ends this side orderly.
    let result = timeout(PAIR_TIMEOUT, pair.initiator.run("true", &[]))
        .await
        .expect("run returns in time");
    assert!(result.is_ok(), "child exit maps to success: {result:?}");

    // The remote side observes the channel going away.
    let err = timeout(PAIR_TIMEOUT, pair.joiner.read())
        .await
        .expect("remote notices in time")
        .unwrap_err();
    assert_eq!(err, SessionError::ChannelClosed);

    pair.teardown().await;
}

#[tokio::test]
async fn close_is_idempotent_and_fails_later_io() {
    let pair = pair().await;

    pair.initiator.close().await.expect("close");
    pair.initiator.close().await.expect("close again");

    assert_eq!(
        pair.initiator.read().await.unwrap_err(),
        SessionError::Closed
    );
    assert_eq!(
        pair.initiator
            .write(Bytes::from_static(b"late"))
            .await
            .unwrap_err(),
        SessionError::Closed
    );

    pair.teardown().await;
}
