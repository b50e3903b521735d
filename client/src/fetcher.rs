use countrymap_shared::{ServerState, ServerStatus};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::warn;

use crate::config::ClientConfig;

const BODY_PREVIEW_CHARS: usize = 200;

/// A document the backend returned. An offline server still answers with its
/// last cached document; that is a flagged result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Online(ServerState),
    Offline(ServerState),
}

impl FetchOutcome {
    fn from_state(state: ServerState) -> Self {
        match state.server_info.status {
            ServerStatus::Online => Self::Online(state),
            ServerStatus::Offline => Self::Offline(state),
        }
    }

    pub fn status(&self) -> ServerStatus {
        match self {
            Self::Online(_) => ServerStatus::Online,
            Self::Offline(_) => ServerStatus::Offline,
        }
    }

    pub fn into_state(self) -> ServerState {
        match self {
            Self::Online(state) | Self::Offline(state) => state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("server `{0}` was not found")]
    NotFound(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed server document: {0}")]
    Malformed(String),
    #[error("invalid server id `{0}`")]
    InvalidServerId(String),
}

impl FetchError {
    /// Errors after which retrying the same server id is pointless.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidServerId(_))
    }
}

/// Request/response reader for `GET {api}/api/servers/{id}/data`.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    http: reqwest::Client,
    api_url: String,
}

impl SnapshotFetcher {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("countrymap-client/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .or_else(|e| {
                warn!(
                    error = %e,
                    "failed to build configured HTTP client, retrying without custom user-agent"
                );
                reqwest::Client::builder()
                    .timeout(config.http_timeout)
                    .connect_timeout(config.connect_timeout)
                    .build()
            })
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::new(http, config.api_url.clone()))
    }

    pub fn snapshot_url(&self, server_id: &str) -> Result<reqwest::Url, FetchError> {
        let server_id = server_id.trim();
        if server_id.is_empty() {
            return Err(FetchError::InvalidServerId(server_id.to_string()));
        }
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| FetchError::Transport(format!("invalid API url: {e}")))?;
        let Ok(mut path_segments) = url.path_segments_mut() else {
            return Err(FetchError::Transport(format!(
                "API url cannot be a base: {}",
                self.api_url
            )));
        };
        path_segments
            .pop_if_empty()
            .extend(["api", "servers", server_id, "data"]);
        drop(path_segments);
        Ok(url)
    }

    pub async fn fetch(&self, server_id: &str) -> Result<FetchOutcome, FetchError> {
        let url = self.snapshot_url(server_id)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("request failed: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response body: {e}")))?;

        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(server_id.trim().to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!(
                "upstream status {status}; body preview: {}",
                body_preview(&bytes)
            )));
        }

        let state: ServerState = serde_json::from_slice(&bytes).map_err(|e| {
            FetchError::Malformed(format!("{e}; body preview: {}", body_preview(&bytes)))
        })?;
        Ok(FetchOutcome::from_state(state))
    }
}

fn body_preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(BODY_PREVIEW_CHARS)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use serde_json::json;

    use super::*;

    pub(crate) fn document(server_id: &str, status: &str) -> serde_json::Value {
        json!({
            "serverInfo": {"serverId": server_id, "serverName": "Survival", "status": status},
            "countries": [{
                "name": "Avalon",
                "president": "Alice",
                "members": ["Alice"],
                "territory": {"minX": 0, "minZ": 0, "maxX": 64, "maxZ": 64},
                "atWar": [],
                "color": "#336699"
            }],
            "players": [{"name": "Alice", "online": true, "location": {"x": 8.0, "z": 8.0}, "country": "Avalon", "isPresident": true}],
            "wars": []
        })
    }

    async fn server_data(Path(id): Path<String>) -> Response {
        match id.as_str() {
            "up" => axum::Json(document("up", "online")).into_response(),
            "down" => axum::Json(document("down", "offline")).into_response(),
            "broken" => (AxumStatus::OK, "{\"serverInfo\":").into_response(),
            "flaky" => (AxumStatus::BAD_GATEWAY, "upstream unavailable").into_response(),
            _ => (AxumStatus::NOT_FOUND, "unknown server").into_response(),
        }
    }

    async fn spawn_test_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (addr, handle)
    }

    async fn fetcher() -> (SnapshotFetcher, tokio::task::JoinHandle<()>) {
        let app = Router::new().route("/api/servers/{id}/data", get(server_data));
        let (addr, handle) = spawn_test_server(app).await;
        (
            SnapshotFetcher::new(reqwest::Client::new(), format!("http://{addr}")),
            handle,
        )
    }

    #[test]
    fn snapshot_url_percent_encodes_server_id() {
        let fetcher = SnapshotFetcher::new(reqwest::Client::new(), "https://example.com/");
        let url = fetcher
            .snapshot_url("my server/1")
            .expect("url should build");
        assert_eq!(
            url.as_str(),
            "https://example.com/api/servers/my%20server%2F1/data"
        );
        assert_eq!(
            fetcher.snapshot_url("   "),
            Err(FetchError::InvalidServerId(String::new()))
        );
    }

    #[tokio::test]
    async fn online_and_offline_documents_are_both_results() {
        let (fetcher, handle) = fetcher().await;

        let online = fetcher.fetch("up").await.expect("online document");
        assert_eq!(online.status(), ServerStatus::Online);
        assert_eq!(online.into_state().countries.len(), 1);

        let offline = fetcher.fetch("down").await.expect("offline document");
        assert!(matches!(offline, FetchOutcome::Offline(_)));
        assert_eq!(offline.into_state().players[0].name, "Alice");

        handle.abort();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let (fetcher, handle) = fetcher().await;

        let not_found = fetcher.fetch("missing").await.expect_err("404");
        assert_eq!(not_found, FetchError::NotFound("missing".into()));
        assert!(not_found.is_terminal());

        let flaky = fetcher.fetch("flaky").await.expect_err("502");
        assert!(matches!(flaky, FetchError::Transport(ref msg) if msg.contains("502")));
        assert!(!flaky.is_terminal());

        let broken = fetcher.fetch("broken").await.expect_err("bad body");
        assert!(matches!(broken, FetchError::Malformed(_)));

        handle.abort();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind unused port");
        let addr = listener.local_addr().expect("unused port address");
        drop(listener);

        let fetcher = SnapshotFetcher::new(reqwest::Client::new(), format!("http://{addr}"));
        let err = fetcher.fetch("up").await.expect_err("nothing listens");
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
