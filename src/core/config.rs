//! Connection configuration snapshot, validation and patch merging.
//!
//! A `ConnectionConfig` is immutable once handed to the lifecycle manager; edits
//! go through [`ConfigPatch`], are merged into a candidate, and only replace the
//! active snapshot when the candidate validates.

use std::collections::BTreeMap;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use super::types::{WebSocketError, WebSocketResult, WsTlsConfig};

pub const DEFAULT_URL: &str = "ws://localhost:8080";
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_KEEP_ALIVE_MESSAGE: &str = "ping";
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_BACKOFF: f64 = 1.5;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const MIN_KEEP_ALIVE_INTERVAL_MS: u64 = 1_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// How the keep-alive timer probes the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeepAliveMode {
    /// Send the configured payload as an ordinary data frame.
    #[default]
    Message,
    /// Send a protocol-level ping control frame.
    #[serde(alias = "ping")]
    ProtocolPing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl QueryParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub url: String,
    /// Appended to `url` in order; duplicate keys are kept.
    pub query_params: Vec<QueryParam>,
    pub headers: BTreeMap<String, String>,
    pub keep_alive_interval: u64,
    pub keep_alive_mode: KeepAliveMode,
    pub keep_alive_message: String,
    /// Milliseconds without traffic before the connection is dropped; 0 disables.
    pub inactivity_timeout: u64,
    pub reconnect_delay: u64,
    pub max_reconnect_delay: u64,
    pub reconnect_backoff: f64,
    pub max_payload_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            query_params: Vec::new(),
            headers: BTreeMap::new(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            keep_alive_mode: KeepAliveMode::Message,
            keep_alive_message: DEFAULT_KEEP_ALIVE_MESSAGE.to_string(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT_MS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY_MS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Fully resolved connection target handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub tls: WsTlsConfig,
}

impl ConnectionConfig {
    pub fn keep_alive_period(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval)
    }

    pub fn inactivity_limit(&self) -> Option<Duration> {
        (self.inactivity_timeout > 0).then(|| Duration::from_millis(self.inactivity_timeout))
    }

    /// Check every invariant, reporting all violations together.
    pub fn validate(&self) -> WebSocketResult<()> {
        let mut errors = Vec::new();

        if self.url.trim().is_empty() {
            errors.push("url must not be empty".to_string());
        } else {
            match Url::parse(self.url.trim()) {
                Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
                Ok(url) => errors.push(format!(
                    "url scheme must be ws or wss (got {})",
                    url.scheme()
                )),
                Err(err) => errors.push(format!("url is invalid: {err}")),
            }
        }

        if self.query_params.iter().any(|p| p.key.is_empty()) {
            errors.push("query parameter keys must not be empty".to_string());
        }

        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(format!("invalid header name: {name}"));
            }
            if HeaderValue::from_str(value).is_err() {
                errors.push(format!("invalid value for header {name}"));
            }
        }

        if self.keep_alive_interval < MIN_KEEP_ALIVE_INTERVAL_MS {
            errors.push(format!(
                "keepAliveInterval must be at least {MIN_KEEP_ALIVE_INTERVAL_MS}ms"
            ));
        }

        if self.reconnect_delay < MIN_RECONNECT_DELAY_MS {
            errors.push(format!(
                "reconnectDelay must be at least {MIN_RECONNECT_DELAY_MS}ms"
            ));
        }

        if self.max_reconnect_delay < self.reconnect_delay {
            errors.push("maxReconnectDelay must be greater than or equal to reconnectDelay".to_string());
        }

        if !self.reconnect_backoff.is_finite() || self.reconnect_backoff < 1.0 {
            errors.push("reconnectBackoff must be a finite number >= 1.0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WebSocketError::ConfigInvalid { errors })
        }
    }

    /// Resolve the final URL (query parameters appended in order) and header list.
    pub fn connect_request(&self, tls: WsTlsConfig) -> WebSocketResult<WsConnectRequest> {
        let mut url = Url::parse(self.url.trim()).map_err(|err| WebSocketError::ConfigInvalid {
            errors: vec![format!("url is invalid: {err}")],
        })?;

        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for param in &self.query_params {
                pairs.append_pair(&param.key, &param.value);
            }
        }

        Ok(WsConnectRequest {
            url: url.into(),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            tls,
        })
    }

    /// Merge a patch into a copy of this config. The result is not validated.
    pub fn merged(&self, patch: &ConfigPatch) -> ConnectionConfig {
        let mut next = self.clone();
        if let Some(url) = &patch.url {
            next.url = url.clone();
        }
        if let Some(params) = &patch.query_params {
            next.query_params = params.clone();
        }
        match &patch.headers {
            Some(HeadersPatch::Map(map)) => {
                next.headers.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(HeadersPatch::Rows(rows)) => {
                next.headers = rows
                    .iter()
                    .filter(|row| !row.key.is_empty())
                    .map(|row| (row.key.clone(), row.value.clone()))
                    .collect();
            }
            None => {}
        }
        if let Some(v) = patch.keep_alive_interval {
            next.keep_alive_interval = v;
        }
        if let Some(v) = patch.keep_alive_mode {
            next.keep_alive_mode = v;
        }
        if let Some(v) = &patch.keep_alive_message {
            next.keep_alive_message = v.clone();
        }
        if let Some(v) = patch.inactivity_timeout {
            next.inactivity_timeout = v;
        }
        if let Some(v) = patch.reconnect_delay {
            next.reconnect_delay = v;
        }
        if let Some(v) = patch.max_reconnect_delay {
            next.max_reconnect_delay = v;
        }
        if let Some(v) = patch.reconnect_backoff {
            next.reconnect_backoff = v;
        }
        if let Some(v) = patch.max_payload_bytes {
            next.max_payload_bytes = v;
        }
        next
    }

    /// The operator-settable subset written to the config file.
    pub fn persisted(&self) -> PersistedConfig {
        PersistedConfig {
            url: self.url.clone(),
            query_params: self.query_params.clone(),
            headers: self.headers.clone(),
            keep_alive_interval: self.keep_alive_interval,
            keep_alive_mode: self.keep_alive_mode,
            keep_alive_message: self.keep_alive_message.clone(),
            inactivity_timeout: self.inactivity_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderRow {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Headers may be patched as an object (merged) or as rows (replacing).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HeadersPatch {
    Map(BTreeMap<String, String>),
    Rows(Vec<HeaderRow>),
}

/// Partial update of a [`ConnectionConfig`]; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub url: Option<String>,
    pub query_params: Option<Vec<QueryParam>>,
    pub headers: Option<HeadersPatch>,
    pub keep_alive_interval: Option<u64>,
    pub keep_alive_mode: Option<KeepAliveMode>,
    pub keep_alive_message: Option<String>,
    pub inactivity_timeout: Option<u64>,
    pub reconnect_delay: Option<u64>,
    pub max_reconnect_delay: Option<u64>,
    pub reconnect_backoff: Option<f64>,
    pub max_payload_bytes: Option<usize>,
}

impl ConfigPatch {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// On-disk shape of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfig {
    pub url: String,
    #[serde(default)]
    pub query_params: Vec<QueryParam>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub keep_alive_interval: u64,
    #[serde(default)]
    pub keep_alive_mode: KeepAliveMode,
    pub keep_alive_message: String,
    pub inactivity_timeout: u64,
}

impl From<PersistedConfig> for ConfigPatch {
    fn from(saved: PersistedConfig) -> Self {
        ConfigPatch {
            url: Some(saved.url),
            query_params: Some(saved.query_params),
            headers: Some(HeadersPatch::Map(saved.headers)),
            keep_alive_interval: Some(saved.keep_alive_interval),
            keep_alive_mode: Some(saved.keep_alive_mode),
            keep_alive_message: Some(saved.keep_alive_message),
            inactivity_timeout: Some(saved.inactivity_timeout),
            ..ConfigPatch::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_errors(config: &ConnectionConfig) -> Vec<String> {
        match config.validate() {
            Err(WebSocketError::ConfigInvalid { errors }) => errors,
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        ConnectionConfig::default().validate().unwrap();
    }

    #[test]
    fn validation_reports_every_violation() {
        let config = ConnectionConfig {
            url: "http://example.com".into(),
            keep_alive_interval: 500,
            reconnect_delay: 5_000,
            max_reconnect_delay: 1_000,
            reconnect_backoff: 0.5,
            ..ConnectionConfig::default()
        };
        let errors = invalid_errors(&config);
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors[0].contains("scheme"));
        assert!(errors.iter().any(|e| e.contains("keepAliveInterval")));
        assert!(errors.iter().any(|e| e.contains("maxReconnectDelay")));
        assert!(errors.iter().any(|e| e.contains("reconnectBackoff")));
    }

    #[test]
    fn empty_url_and_bad_headers_are_rejected() {
        let mut config = ConnectionConfig {
            url: "  ".into(),
            ..ConnectionConfig::default()
        };
        config.headers.insert("bad header".into(), "x".into());
        let errors = invalid_errors(&config);
        assert!(errors.iter().any(|e| e.contains("url must not be empty")));
        assert!(errors.iter().any(|e| e.contains("invalid header name")));
    }

    #[test]
    fn nan_backoff_is_rejected() {
        let config = ConnectionConfig {
            reconnect_backoff: f64::NAN,
            ..ConnectionConfig::default()
        };
        assert_eq!(invalid_errors(&config).len(), 1);
    }

    #[test]
    fn connect_request_appends_params_in_order_with_duplicates() {
        let mut config = ConnectionConfig {
            url: "wss://example.com/feed?fixed=1".into(),
            query_params: vec![
                QueryParam::new("topic", "a"),
                QueryParam::new("topic", "b"),
                QueryParam::new("token", "x y"),
            ],
            ..ConnectionConfig::default()
        };
        config.headers.insert("Authorization".into(), "Bearer t".into());

        let request = config.connect_request(WsTlsConfig::default()).unwrap();
        assert_eq!(
            request.url,
            "wss://example.com/feed?fixed=1&topic=a&topic=b&token=x+y"
        );
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer t".to_string())]
        );
    }

    #[test]
    fn connect_request_without_params_keeps_url() {
        let config = ConnectionConfig {
            url: "ws://127.0.0.1:9001/".into(),
            ..ConnectionConfig::default()
        };
        let request = config.connect_request(WsTlsConfig::default()).unwrap();
        assert_eq!(request.url, "ws://127.0.0.1:9001/");
    }

    #[test]
    fn header_patch_object_merges_and_rows_replace() {
        let mut base = ConnectionConfig::default();
        base.headers.insert("A".into(), "1".into());

        let merged: ConfigPatch = sonic_rs::from_str(r#"{"headers":{"B":"2"}}"#).unwrap();
        let next = base.merged(&merged);
        assert_eq!(next.headers.len(), 2);

        let rows: ConfigPatch = sonic_rs::from_str(
            r#"{"headers":[{"key":"C","value":"3"},{"key":"","value":"skip"}]}"#,
        )
        .unwrap();
        let next = base.merged(&rows);
        assert_eq!(next.headers.len(), 1);
        assert_eq!(next.headers.get("C").map(String::as_str), Some("3"));
    }

    #[test]
    fn patch_parses_camel_case_and_mode_aliases() {
        let patch: ConfigPatch = sonic_rs::from_str(
            r#"{"keepAliveInterval":5000,"keepAliveMode":"ping","inactivityTimeout":0}"#,
        )
        .unwrap();
        let next = ConnectionConfig::default().merged(&patch);
        assert_eq!(next.keep_alive_interval, 5000);
        assert_eq!(next.keep_alive_mode, KeepAliveMode::ProtocolPing);
        assert_eq!(next.inactivity_limit(), None);
    }

    #[test]
    fn persisted_round_trips_user_settable_subset() {
        let config = ConnectionConfig {
            url: "ws://saved".into(),
            keep_alive_interval: 4_000,
            reconnect_delay: 9_000,
            max_reconnect_delay: 9_000,
            ..ConnectionConfig::default()
        };
        let restored = ConnectionConfig::default().merged(&config.persisted().into());
        assert_eq!(restored.url, "ws://saved");
        assert_eq!(restored.keep_alive_interval, 4_000);
        // Reconnect tuning is not part of the persisted subset.
        assert_eq!(restored.reconnect_delay, DEFAULT_RECONNECT_DELAY_MS);
    }
}
