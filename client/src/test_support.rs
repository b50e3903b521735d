use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use countrymap_shared::decode_join;
use tokio::sync::{broadcast, mpsc};

/// In-process backend: serves `/api/servers/{id}/data` from a programmable
/// response and streams test-pushed frames to every joined WebSocket.
pub(crate) struct MockBackend {
    pub addr: SocketAddr,
    shared: MockShared,
    joins: mpsc::UnboundedReceiver<String>,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Clone)]
struct MockShared {
    document: Arc<Mutex<(u16, String)>>,
    fetches: Arc<AtomicUsize>,
    fetched_ids: Arc<Mutex<Vec<String>>>,
    frames: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    joins: mpsc::UnboundedSender<String>,
}

impl MockBackend {
    pub(crate) async fn start() -> Self {
        let (frames, _) = broadcast::channel(64);
        let (kick, _) = broadcast::channel(4);
        let (joins_tx, joins) = mpsc::unbounded_channel();
        let shared = MockShared {
            document: Arc::new(Mutex::new((404, String::new()))),
            fetches: Arc::new(AtomicUsize::new(0)),
            fetched_ids: Arc::default(),
            frames,
            kick,
            joins: joins_tx,
        };

        let app = Router::new()
            .route("/api/servers/{id}/data", get(server_data))
            .route("/ws", get(live_socket))
            .with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });

        Self {
            addr,
            shared,
            joins,
            handle,
        }
    }

    pub(crate) fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn live_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub(crate) fn set_document(&self, status: u16, body: impl Into<String>) {
        *self.shared.document.lock().expect("document lock") = (status, body.into());
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    /// Server ids as they arrived in snapshot request paths.
    pub(crate) fn fetched_ids(&self) -> Vec<String> {
        self.shared.fetched_ids.lock().expect("fetched ids lock").clone()
    }

    pub(crate) fn push(&self, frame: impl Into<String>) {
        let _ = self.shared.frames.send(frame.into());
    }

    /// Drop every open socket without a close handshake.
    pub(crate) fn kick(&self) {
        let _ = self.shared.kick.send(());
    }

    pub(crate) async fn next_join(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.joins.recv())
            .await
            .expect("join within timeout")
            .expect("join channel open")
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn server_data(Path(id): Path<String>, State(shared): State<MockShared>) -> Response {
    shared.fetches.fetch_add(1, Ordering::SeqCst);
    shared.fetched_ids.lock().expect("fetched ids lock").push(id);
    let (status, body) = shared.document.lock().expect("document lock").clone();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

async fn live_socket(ws: WebSocketUpgrade, State(shared): State<MockShared>) -> Response {
    ws.on_upgrade(move |socket| relay(socket, shared))
}

async fn relay(mut socket: WebSocket, shared: MockShared) {
    let mut frames = shared.frames.subscribe();
    let mut kick = shared.kick.subscribe();

    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        return;
    };
    let Some(server_id) = decode_join(text.as_str()) else {
        return;
    };
    let _ = shared.joins.send(server_id);

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Ok(frame) = frame else {
                    return;
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            _ = kick.recv() => return,
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
