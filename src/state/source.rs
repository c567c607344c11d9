//! Session sources.
//!
//! A session can arrive through three channels, in decreasing priority:
//!
//! 1. A configuration object the host injects into the page
//! 2. Query-string parameters on the game URL
//! 3. A cross-context message posted by the host at any time
//!
//! Each channel is normalized into [`SessionFields`], a partial record whose
//! empty values have already been dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};

/// Message type the host uses to push session parameters.
pub const PARAMS_MESSAGE_TYPE: &str = "flutterParams";

/// A partial set of session fields. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFields {
    pub pool_id: Option<String>,
    pub session_id: Option<String>,
    pub auth_token: Option<String>,
    pub timer_seconds: Option<u32>,
    pub api_base_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionFields {
    /// Whether both identity fields are present.
    pub fn has_identity(&self) -> bool {
        self.session_id.is_some() && self.auth_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn base_url(value: Option<String>) -> Option<String> {
    non_empty(value).map(|v| v.trim_end_matches('/').to_string())
}

fn positive_seconds(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u32>() {
        return (n > 0).then_some(n);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 1.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
}

/// Accepts `15`, `15.0` or `"15"`; anything else is treated as absent.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => positive_seconds(&n.to_string()),
        Some(serde_json::Value::String(s)) => positive_seconds(&s),
        _ => None,
    })
}

/// Accepts an RFC 3339 string or epoch milliseconds.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = match &value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    };
    if parsed.is_none() && value.as_ref().is_some_and(|v| !v.is_null()) {
        tracing::warn!(?value, "ignoring unparseable expiresAt");
    }
    Ok(parsed)
}

/// Configuration object injected by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedConfig {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub pool_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub timer_duration: Option<u32>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub timer: Option<u32>,
    #[serde(default)]
    pub api_server_url: Option<String>,
    #[serde(default)]
    pub api_server: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl InjectedConfig {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Whether the object carries an expiry that has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn fields(&self) -> SessionFields {
        SessionFields {
            pool_id: non_empty(self.pool_id.clone()),
            session_id: non_empty(self.session_id.clone()),
            auth_token: non_empty(self.token.clone()),
            timer_seconds: self.timer_duration.or(self.timer),
            api_base_url: base_url(self.api_server_url.clone().or(self.api_server.clone())),
            expires_at: self.expires_at,
        }
    }
}

/// Parameters read from the game URL's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub fields: SessionFields,
    /// Set only by the literal `debug=true`
    pub debug: bool,
}

impl QueryParams {
    /// Parse a full URL, a `?`-prefixed query, or a bare query string.
    pub fn parse(input: &str) -> Self {
        let query = match url::Url::parse(input) {
            Ok(url) => url.query().unwrap_or_default().to_string(),
            Err(_) => input
                .split_once('?')
                .map(|(_, q)| q)
                .unwrap_or(input)
                .to_string(),
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut params = Self::default();
        let mut api_server_url = None;
        let mut api_server = None;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "poolId" => params.fields.pool_id = non_empty(Some(value)),
                "sessionId" => params.fields.session_id = non_empty(Some(value)),
                "authToken" => params.fields.auth_token = non_empty(Some(value)),
                "timer" => params.fields.timer_seconds = positive_seconds(&value),
                "apiServerUrl" => api_server_url = Some(value),
                "apiServer" => api_server = Some(value),
                "debug" => params.debug = value == "true",
                _ => {}
            }
        }

        params.fields.api_base_url = base_url(non_empty(api_server_url).or(api_server));
        params
    }
}

/// Session parameters pushed by the host as a cross-context message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub pool_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub timer_duration: Option<u32>,
    #[serde(default)]
    pub api_server_url: Option<String>,
    #[serde(default)]
    pub api_server: Option<String>,
}

impl InboundMessage {
    /// Decode a raw message. Returns `None` for malformed JSON or for any
    /// message that is not a session-parameter message.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(raw) {
            Ok(msg) if msg.kind == PARAMS_MESSAGE_TYPE => Some(msg),
            Ok(msg) => {
                tracing::debug!(kind = %msg.kind, "ignoring unrelated host message");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed host message");
                None
            }
        }
    }

    pub fn fields(&self) -> SessionFields {
        SessionFields {
            pool_id: non_empty(self.pool_id.clone()),
            session_id: non_empty(self.session_id.clone()),
            auth_token: non_empty(self.auth_token.clone()),
            timer_seconds: self.timer_duration,
            api_base_url: base_url(
                non_empty(self.api_server_url.clone()).or(self.api_server.clone()),
            ),
            expires_at: None,
        }
    }
}

/// Where the session manager reads the synchronous channels from.
pub trait SessionSource: Send + Sync {
    /// The injected configuration object, if the host has provided one.
    fn injected(&self) -> Option<InjectedConfig>;

    /// The query-string parameters.
    fn query(&self) -> QueryParams;
}

/// A source backed by a fixed query string and an injection slot the host
/// can fill at any time.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSource {
    injected: Arc<Mutex<Option<InjectedConfig>>>,
    query: QueryParams,
}

impl EnvironmentSource {
    pub fn new(query: QueryParams) -> Self {
        Self {
            injected: Arc::new(Mutex::new(None)),
            query,
        }
    }

    pub fn from_url(url: &str) -> Self {
        Self::new(QueryParams::parse(url))
    }

    /// Handle the host side uses to inject configuration later.
    pub fn injection_handle(&self) -> InjectionHandle {
        InjectionHandle {
            slot: Arc::clone(&self.injected),
        }
    }
}

impl SessionSource for EnvironmentSource {
    fn injected(&self) -> Option<InjectedConfig> {
        self.injected.lock().clone()
    }

    fn query(&self) -> QueryParams {
        self.query.clone()
    }
}

/// Writes into an [`EnvironmentSource`]'s injection slot.
#[derive(Debug, Clone)]
pub struct InjectionHandle {
    slot: Arc<Mutex<Option<InjectedConfig>>>,
}

impl InjectionHandle {
    pub fn inject(&self, config: InjectedConfig) {
        *self.slot.lock() = Some(config);
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
