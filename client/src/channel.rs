use std::time::Duration;

use countrymap_shared::{LiveMessage, ReconcileError, join_frame};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::{RECONNECT_BASE_MS, RECONNECT_MAX_MS};

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle and payload events surfaced to the session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Joined the server's stream. `reconnect` is set for every connection
    /// after the first; anything sent in between was lost.
    Connected { reconnect: bool },
    Message(LiveMessage),
    /// A frame that could not be turned into a live message.
    Rejected(ReconcileError),
    Disconnected { reason: String },
    Error(String),
}

pub fn reconnect_backoff(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    let factor = 1u64 << exponent;
    Duration::from_millis((RECONNECT_BASE_MS * factor).min(RECONNECT_MAX_MS))
}

/// Duplex connection to the live endpoint for one server id.
#[derive(Debug, Clone)]
pub struct LiveChannel {
    url: String,
    server_id: String,
    connect_timeout: Duration,
}

/// Owner side of a running channel task.
pub struct ChannelHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ChannelHandle {
    /// Send a close frame and stop reconnecting. Falls back to aborting the
    /// task if it does not wind down promptly.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Stop {
    Shutdown,
    Disconnected(String),
}

impl LiveChannel {
    pub fn new(url: impl Into<String>, server_id: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            server_id: server_id.into(),
            connect_timeout,
        }
    }

    pub fn spawn(self, events: mpsc::Sender<ChannelEvent>) -> ChannelHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(events, shutdown_rx));
        ChannelHandle { shutdown, task }
    }

    async fn run(self, events: mpsc::Sender<ChannelEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut has_connected = false;
        let mut consecutive_failures: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = shutdown.changed() => return,
                result = self.connect() => result,
            };

            match connected {
                Ok(mut socket) => {
                    consecutive_failures = 0;
                    let reconnect = has_connected;
                    has_connected = true;
                    info!(server_id = %self.server_id, reconnect, "live channel joined");
                    if events
                        .send(ChannelEvent::Connected { reconnect })
                        .await
                        .is_err()
                    {
                        let _ = socket.close(None).await;
                        return;
                    }

                    match self.pump(&mut socket, &events, &mut shutdown).await {
                        Stop::Shutdown => {
                            let _ = socket.close(None).await;
                            return;
                        }
                        Stop::Disconnected(reason) => {
                            warn!(server_id = %self.server_id, %reason, "live channel disconnected");
                            if events
                                .send(ChannelEvent::Disconnected { reason })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(
                        server_id = %self.server_id,
                        attempt = consecutive_failures,
                        error = %e,
                        "live channel connect failed"
                    );
                    if events.send(ChannelEvent::Error(e)).await.is_err() {
                        return;
                    }
                }
            }

            let delay = reconnect_backoff(consecutive_failures.max(1));
            debug!(delay_ms = delay.as_millis() as u64, "live channel reconnecting");
            tokio::select! {
                _ = shutdown.changed() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self) -> Result<LiveSocket, String> {
        let (mut socket, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| format!("connect to {} timed out", self.url))?
                .map_err(|e| format!("connect to {} failed: {e}", self.url))?;

        socket
            .send(Message::Text(join_frame(&self.server_id)))
            .await
            .map_err(|e| format!("join failed: {e}"))?;
        Ok(socket)
    }

    async fn pump(
        &self,
        socket: &mut LiveSocket,
        events: &mpsc::Sender<ChannelEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Stop {
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => return Stop::Shutdown,
                frame = socket.next() => frame,
            };

            let event = match frame {
                Some(Ok(Message::Text(text))) => match LiveMessage::decode(&text) {
                    Ok(message) => ChannelEvent::Message(message),
                    Err(e) => ChannelEvent::Rejected(e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Stop::Disconnected(reason);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Stop::Disconnected(format!("read failed: {e}")),
                None => return Stop::Disconnected("stream ended".to_string()),
            };

            if events.send(event).await.is_err() {
                return Stop::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::MockBackend;

    async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(reconnect_backoff(1), Duration::from_millis(500));
        assert_eq!(reconnect_backoff(2), Duration::from_millis(1_000));
        assert_eq!(reconnect_backoff(4), Duration::from_millis(4_000));
        assert_eq!(reconnect_backoff(6), Duration::from_millis(10_000));
        assert_eq!(reconnect_backoff(u32::MAX), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn joins_then_delivers_frames_in_order() {
        let mut backend = MockBackend::start().await;
        let (tx, mut rx) = mpsc::channel(16);
        let handle =
            LiveChannel::new(backend.live_url(), "srv-1", Duration::from_secs(2)).spawn(tx);

        assert_eq!(backend.next_join().await, "srv-1");
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Connected { reconnect: false }
        );

        let state = json!({"countries": [], "players": [], "wars": []});
        let update = json!({"type": "player_leave", "data": {"player": "Alice"}});
        backend.push(LiveMessage::State(state.clone()).encode());
        backend.push(LiveMessage::Update(update.clone()).encode());
        backend.push(r#"{"event":"chat","data":"hello"}"#);

        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Message(LiveMessage::State(state))
        );
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Message(LiveMessage::Update(update))
        );
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Rejected(ReconcileError::UnknownEvent("chat".into()))
        );

        handle.close().await;
    }

    #[tokio::test]
    async fn reconnects_and_rejoins_after_drop() {
        let mut backend = MockBackend::start().await;
        let (tx, mut rx) = mpsc::channel(16);
        let handle =
            LiveChannel::new(backend.live_url(), "srv-2", Duration::from_secs(2)).spawn(tx);

        assert_eq!(backend.next_join().await, "srv-2");
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Connected { reconnect: false }
        );

        backend.kick();
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Disconnected { .. }
        ));
        assert_eq!(backend.next_join().await, "srv-2");
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Connected { reconnect: true }
        );

        handle.close().await;
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind unused port");
        let addr = listener.local_addr().expect("unused port address");
        drop(listener);

        let (tx, mut rx) = mpsc::channel(16);
        let handle =
            LiveChannel::new(format!("ws://{addr}/ws"), "srv-3", Duration::from_secs(1)).spawn(tx);
        assert!(matches!(next_event(&mut rx).await, ChannelEvent::Error(_)));
        handle.close().await;
    }

    #[tokio::test]
    async fn close_stops_delivery() {
        let mut backend = MockBackend::start().await;
        let (tx, mut rx) = mpsc::channel(16);
        let handle =
            LiveChannel::new(backend.live_url(), "srv-4", Duration::from_secs(2)).spawn(tx);
        backend.next_join().await;
        next_event(&mut rx).await;

        handle.close().await;
        backend.push(LiveMessage::Update(json!({"type": "player_leave"})).encode());

        let after = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(matches!(after, Ok(None)), "no events after close: {after:?}");
    }
}
