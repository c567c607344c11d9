//! Host transport.
//!
//! The game talks to its embedding application through one of two channels:
//! `postMessage` to a parent frame, or a named handler on a native webview
//! bridge. The rest of the runtime only sees [`HostTransport`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::HostError;

/// Messages sent from the game to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Ask the host to inject session parameters
    RequestSessionParams,
    /// The player chose to leave after the final screen
    CloseGame,
    /// A typed notification wrapped for the host's message handler
    OnMessage { data: Notification },
}

impl OutboundMessage {
    /// Handler name used on the native bridge.
    pub fn handler_name(&self) -> &'static str {
        match self {
            Self::RequestSessionParams => "requestSessionParams",
            Self::CloseGame => "closeGame",
            Self::OnMessage { .. } => "onMessage",
        }
    }
}

/// Score submission outcomes reported to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Notification {
    ScoreSubmitSuccess(SubmitSuccess),
    ScoreSubmitError(SubmitFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitSuccess {
    pub score: u64,
    pub time: u32,
    /// Parsed response body (`null` when empty)
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitFailure {
    /// HTTP status, or 0 when no response arrived
    pub status: u16,
    /// Parsed error body, or a synthesized `{"message": ...}` object
    pub error: serde_json::Value,
    pub score: u64,
    pub time: u32,
}

/// Outbound channel to the host.
pub trait HostTransport: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), HostError>;
}

/// Send and log on failure. Host delivery problems never stop the game.
pub fn send_logged(host: &dyn HostTransport, message: &OutboundMessage) -> bool {
    match host.send(message) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(handler = message.handler_name(), error = %e, "host message not delivered");
            false
        }
    }
}

/// Embedded-frame transport. Each message is serialized to JSON and handed
/// to the page shim that calls `postMessage` on the parent window.
#[derive(Debug, Clone)]
pub struct FrameTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl FrameTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Create a transport plus the receiving end for the page shim.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl HostTransport for FrameTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), HostError> {
        let encoded = serde_json::to_string(message)?;
        self.tx.send(encoded).map_err(|_| HostError::Closed)
    }
}

type BridgeHandler = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Native webview bridge. Messages are dispatched to handlers by name;
/// `onMessage` handlers receive the inner notification only.
#[derive(Default)]
pub struct NativeBridgeTransport {
    handlers: HashMap<String, BridgeHandler>,
}

impl NativeBridgeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }
}

impl std::fmt::Debug for NativeBridgeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBridgeTransport")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HostTransport for NativeBridgeTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), HostError> {
        let name = message.handler_name();
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| HostError::NoHandler(name.to_string()))?;

        let payload = match message {
            OutboundMessage::OnMessage { data } => serde_json::to_value(data)?,
            other => serde_json::to_value(other)?,
        };
        handler(payload);
        Ok(())
    }
}

/// Pick the transport once at startup: the native bridge when the webview
/// exposes one, otherwise the parent frame.
pub fn select_transport(
    frame: FrameTransport,
    native: Option<NativeBridgeTransport>,
) -> Arc<dyn HostTransport> {
    match native {
        Some(bridge) => {
            tracing::info!("using native bridge host transport");
            Arc::new(bridge)
        }
        None => {
            tracing::info!("using embedded frame host transport");
            Arc::new(frame)
        }
    }
}

/// Transport that records every message. Useful for hosts' own tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn count(&self, handler: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.handler_name() == handler)
            .count()
    }
}

impl HostTransport for RecordingTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), HostError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}
