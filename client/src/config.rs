use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://countrymap-backend-fixed-production.up.railway.app";
pub const DEFAULT_LIVE_URL: &str = "wss://countrymap-backend-fixed-production.up.railway.app/ws";

pub const DEFAULT_STATUS_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_SESSION_EVENT_BUFFER: usize = 256;
pub const DEFAULT_PREFS_FILE: &str = "countrymap-prefs.json";

pub const RECONNECT_BASE_MS: u64 = 500;
pub const RECONNECT_MAX_MS: u64 = 10_000;

/// Everything the session needs from the environment, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub live_url: String,
    pub status_check_interval: Duration,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub event_buffer: usize,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: api_url(),
            live_url: live_url(),
            status_check_interval: status_check_interval(),
            http_timeout: http_timeout(),
            connect_timeout: connect_timeout(),
            event_buffer: session_event_buffer(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn server_id() -> Option<String> {
    non_empty_var("COUNTRYMAP_SERVER_ID")
}

pub fn api_url() -> String {
    non_empty_var("COUNTRYMAP_API_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

pub fn live_url() -> String {
    non_empty_var("COUNTRYMAP_LIVE_URL").unwrap_or_else(|| DEFAULT_LIVE_URL.to_string())
}

/// Positive number from `name`; anything else means "use the default".
fn positive_var<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    non_empty_var(name)?
        .parse::<T>()
        .ok()
        .filter(|value| *value > T::default())
}

fn env_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(positive_var(name).unwrap_or(default_secs))
}

pub fn status_check_interval() -> Duration {
    env_secs("STATUS_CHECK_INTERVAL_SECS", DEFAULT_STATUS_CHECK_INTERVAL_SECS)
}

/// Whole-request timeout for snapshot fetches.
pub fn http_timeout() -> Duration {
    env_secs("UPSTREAM_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)
}

/// Bounds both the TCP connect of a fetch and the WebSocket handshake.
pub fn connect_timeout() -> Duration {
    env_secs("UPSTREAM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)
}

pub fn session_event_buffer() -> usize {
    positive_var("SESSION_EVENT_BUFFER").unwrap_or(DEFAULT_SESSION_EVENT_BUFFER)
}

pub fn prefs_path() -> PathBuf {
    non_empty_var("COUNTRYMAP_PREFS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        temp_env::with_vars_unset(
            [
                "COUNTRYMAP_API_URL",
                "COUNTRYMAP_LIVE_URL",
                "STATUS_CHECK_INTERVAL_SECS",
                "SESSION_EVENT_BUFFER",
                "COUNTRYMAP_PREFS_PATH",
            ],
            || {
                let config = ClientConfig::from_env();
                assert_eq!(config.api_url, DEFAULT_API_URL);
                assert_eq!(config.live_url, DEFAULT_LIVE_URL);
                assert_eq!(config.status_check_interval, Duration::from_secs(30));
                assert_eq!(config.event_buffer, DEFAULT_SESSION_EVENT_BUFFER);
                assert_eq!(prefs_path(), PathBuf::from(DEFAULT_PREFS_FILE));
            },
        );
    }

    #[test]
    fn env_overrides_are_trimmed_and_validated() {
        temp_env::with_vars(
            [
                ("COUNTRYMAP_API_URL", Some(" http://localhost:8080/ ")),
                ("STATUS_CHECK_INTERVAL_SECS", Some("5")),
                ("SESSION_EVENT_BUFFER", Some("0")),
            ],
            || {
                assert_eq!(api_url(), "http://localhost:8080");
                assert_eq!(status_check_interval(), Duration::from_secs(5));
                assert_eq!(session_event_buffer(), DEFAULT_SESSION_EVENT_BUFFER);
            },
        );
    }

    #[test]
    fn invalid_interval_falls_back_to_default() {
        temp_env::with_var("STATUS_CHECK_INTERVAL_SECS", Some("soon"), || {
            assert_eq!(status_check_interval(), Duration::from_secs(30));
        });
    }

    #[test]
    fn timeouts_share_the_seconds_parser() {
        temp_env::with_vars(
            [
                ("UPSTREAM_HTTP_TIMEOUT_SECS", Some(" 4 ")),
                ("UPSTREAM_CONNECT_TIMEOUT_SECS", Some("0")),
            ],
            || {
                assert_eq!(http_timeout(), Duration::from_secs(4));
                assert_eq!(
                    connect_timeout(),
                    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
                );
            },
        );
    }
}
