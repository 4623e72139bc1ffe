//! Bidirectional liveness keepalive run over an already-established
//! connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use framing::{Decoder, Encoder};

/// Magic value stamped on every heartbeat message, used to reject
/// stray framed messages that happen to arrive on the heartbeat
/// channel.
pub const MAGIC: u32 = 0x2357_1113;

/// Interval between sent heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long the receiver waits for a valid heartbeat before declaring
/// the peer unresponsive. Bounds one-way lateness to
/// `HEARTBEAT_TIMEOUT - HEARTBEAT_INTERVAL`.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct HeartbeatMessage {
    magic: u32,
    version_major: u32,
    version_minor: u32,
}

impl HeartbeatMessage {
    fn new(version_major: u32, version_minor: u32) -> Self {
        Self {
            magic: MAGIC,
            version_major,
            version_minor,
        }
    }

    fn validate(self) -> Result<(), TransportError> {
        if self.magic != MAGIC {
            return Err(TransportError::InvalidHeartbeat(format!(
                "unexpected magic {:#x}, want {MAGIC:#x}",
                self.magic
            )));
        }
        Ok(())
    }
}

/// Runs the heartbeat protocol over `channel` until `cancel` fires, the
/// peer's heartbeats stop arriving for [`HEARTBEAT_TIMEOUT`], or an I/O
/// error occurs. Returns the terminating cause; a clean cancellation
/// returns [`TransportError::Cancelled`].
pub async fn heartbeat<C>(
    channel: C,
    cancel: CancellationToken,
    version_major: u32,
    version_minor: u32,
) -> TransportError
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(channel);

    let send_cancel = cancel.clone();
    let sender = async move {
        let mut encoder = Encoder::new();
        let mut ticker = time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = send_cancel.cancelled() => return TransportError::Cancelled,
                _ = ticker.tick() => {
                    let message = HeartbeatMessage::new(version_major, version_minor);
                    if let Err(err) = encoder.encode(&mut writer, &message).await {
                        return TransportError::from(err);
                    }
                }
            }
        }
    };

    let recv_cancel = cancel.clone();
    let receiver = async move {
        let mut decoder = Decoder::new();
        loop {
            let deadline = Instant::now() + HEARTBEAT_TIMEOUT;
            tokio::select! {
                _ = recv_cancel.cancelled() => return TransportError::Cancelled,
                _ = time::sleep_until(deadline) => return TransportError::HeartbeatTimeout,
                decoded = decoder.decode::<_, HeartbeatMessage>(&mut reader) => {
                    match decoded {
                        Ok(Some(message)) => {
                            if let Err(err) = message.validate() {
                                return err;
                            }
                            // A valid heartbeat resets the watchdog by
                            // looping back to recompute `deadline`.
                        }
                        Ok(None) => return TransportError::DataChannelClosed,
                        Err(err) => return TransportError::from(err),
                    }
                }
            }
        }
    };

    tokio::select! {
        cause = sender => cause,
        cause = receiver => cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn heartbeats_keep_the_link_alive_past_one_interval() {
        let (a, b) = duplex(4096);
        let cancel_a = CancellationToken::new();
        let cancel_b = CancellationToken::new();

        let task_a = tokio::spawn(heartbeat(a, cancel_a.clone(), 1, 0));
        let task_b = tokio::spawn(heartbeat(b, cancel_b.clone(), 1, 0));

        tokio::time::sleep(HEARTBEAT_INTERVAL + Duration::from_millis(500)).await;
        assert!(!task_a.is_finished());
        assert!(!task_b.is_finished());

        cancel_a.cancel();
        cancel_b.cancel();
        let cause_a = task_a.await.unwrap();
        let cause_b = task_b.await.unwrap();
        assert!(matches!(cause_a, TransportError::Cancelled));
        assert!(matches!(cause_b, TransportError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_timeout_is_detected() {
        let (a, _b) = duplex(4096);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat(a, cancel, 1, 0));

        tokio::time::advance(HEARTBEAT_TIMEOUT + Duration::from_secs(1)).await;
        let cause = task.await.unwrap();
        assert!(matches!(cause, TransportError::HeartbeatTimeout));
    }

    #[test]
    fn rejects_wrong_magic() {
        let message = HeartbeatMessage {
            magic: 0xdead_beef,
            version_major: 1,
            version_minor: 0,
        };
        assert!(message.validate().is_err());
    }
}
