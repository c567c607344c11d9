//! Session identity and acquisition.
//!
//! The host may provide session parameters before the page loads, after it
//! loads, or not at all. [`SessionManager`] keeps polling the
//! [`SessionSource`] until a usable session shows up, and merges inbound
//! host messages whenever they arrive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::clock::Clock;
use super::config::RuntimeConfig;
use super::error::SessionError;
use super::host::{send_logged, HostTransport, OutboundMessage};
use super::source::{InboundMessage, SessionFields, SessionSource};

/// Placeholder identity used by the debug escape path.
pub const DEBUG_POOL_ID: &str = "debug-pool";
pub const DEBUG_SESSION_ID: &str = "debug-session";
pub const DEBUG_AUTH_TOKEN: &str = "debug-token";

/// Identity and configuration of one play attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub pool_id: String,
    pub session_id: String,
    pub auth_token: String,

    /// Countdown length in whole seconds
    pub timer_duration: u32,

    /// Base URL for the score API, without a trailing slash
    pub api_base_url: String,

    pub expires_at: Option<DateTime<Utc>>,

    /// Whether the identity is the debug placeholder
    pub debug: bool,
}

impl Session {
    /// An empty session carrying configured defaults.
    pub fn empty(config: &RuntimeConfig) -> Self {
        Self {
            pool_id: String::new(),
            session_id: String::new(),
            auth_token: String::new(),
            timer_duration: config.default_timer_seconds,
            api_base_url: config.default_api_base_url.trim_end_matches('/').to_string(),
            expires_at: None,
            debug: false,
        }
    }

    pub fn has_identity(&self) -> bool {
        !self.session_id.is_empty() && !self.auth_token.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Both identity fields present and not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.has_identity() && !self.is_expired(now)
    }

    /// Overwrite with every supplied field. Absent fields never clear
    /// existing values.
    pub fn merge(&mut self, fields: &SessionFields) {
        if let Some(v) = &fields.pool_id {
            self.pool_id = v.clone();
        }
        if let Some(v) = &fields.session_id {
            self.session_id = v.clone();
        }
        if let Some(v) = &fields.auth_token {
            self.auth_token = v.clone();
        }
        if let Some(v) = fields.timer_seconds {
            self.timer_duration = v;
        }
        if let Some(v) = &fields.api_base_url {
            self.api_base_url = v.clone();
        }
        if fields.expires_at.is_some() {
            self.expires_at = fields.expires_at;
        }
    }

    /// Endpoint for submitting this session's score.
    pub fn submit_url(&self) -> String {
        format!(
            "{}/api/v1/game-pools/{}/sessions/{}/submit-score",
            self.api_base_url,
            url_segment(&self.pool_id),
            url_segment(&self.session_id)
        )
    }

    fn readiness(&self, now: DateTime<Utc>) -> Readiness {
        if self.is_expired(now) {
            if let Some(expired_at) = self.expires_at {
                return Readiness::NotReady(SessionError::Expired { expired_at });
            }
        }
        match (self.session_id.is_empty(), self.auth_token.is_empty()) {
            (false, false) => Readiness::Ready,
            (true, true) => Readiness::NotReady(SessionError::Unavailable {
                missing: "sessionId and authToken",
            }),
            (true, false) => Readiness::NotReady(SessionError::Unavailable {
                missing: "sessionId",
            }),
            (false, true) => Readiness::NotReady(SessionError::Unavailable {
                missing: "authToken",
            }),
        }
    }
}

fn url_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(SessionError),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Events from the host page that may make a session available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Raw cross-context message
    Message(String),
    /// The page became visible again
    VisibilityRestored,
    /// The window regained focus
    FocusGained,
}

/// Owns the session and resolves it from the source.
pub struct SessionManager {
    session: Session,
    source: Box<dyn SessionSource>,
    host: Arc<dyn HostTransport>,
    config: RuntimeConfig,
    /// Real identity fields seen on any channel, kept while the debug
    /// placeholder is active
    real_identity: SessionFields,
    /// Expiry of an injected object that was ignored for being stale
    injected_expired_at: Option<DateTime<Utc>>,
    ready: bool,
    polls: u64,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_id", &self.session.session_id)
            .field("ready", &self.ready)
            .field("polls", &self.polls)
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        source: Box<dyn SessionSource>,
        host: Arc<dyn HostTransport>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            session: Session::empty(&config),
            source,
            host,
            config,
            real_identity: SessionFields::default(),
            injected_expired_at: None,
            ready: false,
            polls: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Owned copy for work that must not observe later changes.
    pub fn snapshot(&self) -> Session {
        self.session.clone()
    }

    /// Whether the last poll or message produced a usable session.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Number of polls run so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Resolve the session from the synchronous channels.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Readiness {
        self.polls += 1;

        let query = self.source.query();
        let injected = self.source.injected();

        let mut resolved = query.fields.clone();
        self.injected_expired_at = None;
        if let Some(config) = &injected {
            if config.is_expired(now) {
                tracing::warn!(expires_at = ?config.expires_at, "injected session expired");
                self.injected_expired_at = config.expires_at;
            } else {
                overlay(&mut resolved, config.fields());
            }
        }

        self.absorb(&resolved);
        // Expiry always reflects the current resolution.
        self.session.expires_at = resolved.expires_at;

        if !resolved.has_identity() && injected.is_none() && !self.session.is_usable(now) {
            tracing::debug!(poll = self.polls, "requesting session parameters from host");
            send_logged(self.host.as_ref(), &OutboundMessage::RequestSessionParams);
        }

        if query.debug && !self.session.is_usable(now) {
            self.apply_debug_identity();
        }

        self.update_readiness(now)
    }

    /// Merge a decoded inbound message.
    pub fn apply_message(&mut self, message: &InboundMessage, now: DateTime<Utc>) -> Readiness {
        let fields = message.fields();
        tracing::debug!(
            has_session_id = fields.session_id.is_some(),
            has_auth_token = fields.auth_token.is_some(),
            "merging host session message"
        );
        self.absorb(&fields);
        self.update_readiness(now)
    }

    /// Decode and merge a raw inbound message; unrelated messages are ignored.
    pub fn apply_raw_message(&mut self, raw: &str, now: DateTime<Utc>) -> Readiness {
        match InboundMessage::parse(raw) {
            Some(message) => self.apply_message(&message, now),
            None => self.update_readiness(now),
        }
    }

    /// Poll on a fixed interval, and immediately on visibility, focus and
    /// inbound messages, until a usable session is present. Dropping the
    /// future stops polling.
    pub async fn run_until_ready(
        &mut self,
        clock: &dyn Clock,
        events: &mut mpsc::UnboundedReceiver<HostEvent>,
    ) -> Readiness {
        let first = self.poll(clock.now());
        if first.is_ready() {
            return first;
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and we just polled.
        interval.tick().await;

        let mut events_open = true;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                event = events.recv(), if events_open => match event {
                    Some(HostEvent::Message(raw)) => {
                        if self.apply_raw_message(&raw, clock.now()).is_ready() {
                            return Readiness::Ready;
                        }
                    }
                    Some(HostEvent::VisibilityRestored) | Some(HostEvent::FocusGained) => {
                        tracing::debug!(?event, "re-polling after page event");
                    }
                    None => events_open = false,
                },
            }

            let readiness = self.poll(clock.now());
            if readiness.is_ready() {
                return readiness;
            }
        }
    }

    fn apply_debug_identity(&mut self) {
        tracing::warn!("debug flag set without a usable session; using placeholder identity");
        self.session.pool_id = DEBUG_POOL_ID.to_string();
        self.session.session_id = DEBUG_SESSION_ID.to_string();
        self.session.auth_token = DEBUG_AUTH_TOKEN.to_string();
        self.session.expires_at = None;
        self.session.debug = true;
    }

    /// Merge fields into the session. While the debug placeholder is
    /// active, real identity is collected aside and only replaces the
    /// placeholder once it is complete.
    fn absorb(&mut self, fields: &SessionFields) {
        remember_identity(&mut self.real_identity, fields);

        if !self.session.debug {
            self.session.merge(fields);
            return;
        }

        if self.real_identity.has_identity() {
            tracing::info!("real identity replaces debug placeholder");
            self.session.pool_id.clear();
            self.session.debug = false;
            let real = self.real_identity.clone();
            self.session.merge(&real);
            self.session.merge(fields);
        } else {
            self.session.merge(&SessionFields {
                pool_id: None,
                session_id: None,
                auth_token: None,
                ..fields.clone()
            });
        }
    }

    fn update_readiness(&mut self, now: DateTime<Utc>) -> Readiness {
        let mut readiness = self.session.readiness(now);
        if let Some(expired_at) = self.injected_expired_at {
            let unavailable = matches!(
                readiness,
                Readiness::NotReady(SessionError::Unavailable { .. })
            );
            if unavailable && !self.session.has_identity() {
                readiness = Readiness::NotReady(SessionError::Expired { expired_at });
            }
        }
        let ready = readiness.is_ready();
        if ready && !self.ready {
            tracing::info!(
                session_id = %self.session.session_id,
                pool_id = %self.session.pool_id,
                timer = self.session.timer_duration,
                debug = self.session.debug,
                "session ready"
            );
        } else if !ready && self.ready {
            tracing::warn!(?readiness, "session no longer usable");
        }
        self.ready = ready;
        readiness
    }
}

fn remember_identity(real: &mut SessionFields, fields: &SessionFields) {
    if fields.pool_id.is_some() {
        real.pool_id = fields.pool_id.clone();
    }
    if fields.session_id.is_some() {
        real.session_id = fields.session_id.clone();
    }
    if fields.auth_token.is_some() {
        real.auth_token = fields.auth_token.clone();
    }
}

/// Layer `top` over `base`, field by field.
fn overlay(base: &mut SessionFields, top: SessionFields) {
    base.pool_id = top.pool_id.or(base.pool_id.take());
    base.session_id = top.session_id.or(base.session_id.take());
    base.auth_token = top.auth_token.or(base.auth_token.take());
    base.timer_seconds = top.timer_seconds.or(base.timer_seconds);
    base.api_base_url = top.api_base_url.or(base.api_base_url.take());
    base.expires_at = top.expires_at.or(base.expires_at);
}
