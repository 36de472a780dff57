//! Barista Call - voice call client for a coffee-recommendation assistant
//!
//! This library provides the pieces of a hands-free voice conversation:
//! - A websocket transport to the assistant with bounded reconnects
//! - Gateable speech input and single-utterance speech output
//! - A response coordinator that speaks replies and tracks the session
//! - A call session state machine tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    CallSession                       │
//! │  connecting → greeting → listening ⇄ processing     │
//! └──────┬──────────────────┬───────────────────┬───────┘
//!        │                  │                   │
//! ┌──────▼──────┐  ┌────────▼─────────┐  ┌──────▼──────┐
//! │ SpeechInput │  │ResponseCoordinator│  │SpeechOutput │
//! │  mic + STT  │  │ replies, session  │──▶ TTS + audio │
//! └─────────────┘  └────────┬─────────┘  └─────────────┘
//!                           │
//!                  ┌────────▼─────────┐
//!                  │    Transport     │
//!                  │ websocket + JSON │
//!                  └──────────────────┘
//! ```

pub mod call;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;
pub mod voice;

pub use call::{CallConfig, CallControl, CallSession, CallState, ConversationMessage, Role};
pub use config::Config;
pub use coordinator::ResponseCoordinator;
pub use error::{Error, Result};
pub use events::{EventBus, SubscriptionId};
pub use protocol::{AssistantReply, Product};
pub use transport::{ConnectionStatus, ReconnectPolicy, Transport, WsTransport};
pub use voice::{SpeechInput, SpeechOutput, SpeechStatus};
