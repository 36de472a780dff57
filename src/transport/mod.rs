//! Message channel to the remote assistant
//!
//! A [`Transport`] owns one bidirectional channel. Replies and status changes
//! are published on [`EventBus`]es so any number of components can observe
//! them.

mod websocket;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use websocket::WsTransport;

use crate::Result;
use crate::events::EventBus;
use crate::protocol::AssistantReply;

/// State of the channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Opening the channel
    Connecting,
    /// Open and ready to send
    Connected,
    /// Closed
    #[default]
    Disconnected,
    /// Unreachable, or reconnect attempts exhausted
    Error,
}

impl ConnectionStatus {
    /// Lowercase label, as used on the wire and in status displays
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bidirectional channel to the assistant
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel
    ///
    /// Resolves once the channel is ready.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the endpoint cannot be reached
    async fn connect(&self) -> Result<()>;

    /// Close the channel and cancel pending reconnect attempts
    ///
    /// Idempotent.
    fn disconnect(&self);

    /// Enqueue a user query
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the channel is not open
    fn send(&self, message: &str, session_id: Option<&str>) -> Result<()>;

    /// Current channel state
    fn status(&self) -> ConnectionStatus;

    /// Assistant replies, one per inbound `response` frame
    fn replies(&self) -> &EventBus<AssistantReply>;

    /// Channel state changes
    fn status_changes(&self) -> &EventBus<ConnectionStatus>;
}

/// Reconnect policy for unexpected closes
///
/// Attempts are numbered from 1. The delay before attempt `n` is
/// `base_delay * n`; no attempt is made past `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnect attempts
    pub max_attempts: u32,
    /// Delay unit, multiplied by the attempt number
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Whether attempt number `attempt` is within budget
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay to wait before attempt number `attempt`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}
