//! Scenario 4 from the remote-transport core's testable properties:
//! a heartbeat over a connected pair does not report failure before
//! `HEARTBEAT_TIMEOUT`, and does report it shortly after the peer
//! stops sending.

use std::time::Duration;

use tokio::io::duplex;
use tokio_util::sync::CancellationToken;
use transport::heartbeat::{heartbeat, HEARTBEAT_TIMEOUT};
use transport::TransportError;

#[tokio::test(start_paused = true)]
async fn survives_until_timeout_then_reports_it() {
    let (a, _b) = duplex(8192);
    let cancel = CancellationToken::new();

    // Only the `a` side runs the full protocol; `_b` is held open but
    // never answered, modeling a peer that has gone silent without
    // tearing down the connection.
    let task = tokio::spawn(heartbeat(a, cancel, 1, 0));

    tokio::time::advance(HEARTBEAT_TIMEOUT - Duration::from_millis(500)).await;
    assert!(!task.is_finished());

    tokio::time::advance(Duration::from_secs(2)).await;
    let cause = task.await.unwrap();
    assert!(matches!(cause, TransportError::HeartbeatTimeout));
}
