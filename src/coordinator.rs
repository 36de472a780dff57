//! Response coordinator
//!
//! Sits between the transport and speech output. Every assistant reply is
//! remembered, its session id is kept for the next query, its message is
//! spoken, and the reply is republished to response subscribers. Speaking
//! is best-effort: playback failures are logged and never reach
//! subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::{EventBus, SubscriptionId};
use crate::protocol::{AssistantReply, Product};
use crate::transport::Transport;
use crate::voice::{PendingUtterance, SpeakOptions, SpeechOutput, SpeechStatus};
use crate::{Error, Result};

#[derive(Default)]
struct Conversation {
    current: Option<AssistantReply>,
    session_id: Option<String>,
}

/// Routes assistant replies to speech output and to subscribers
pub struct ResponseCoordinator {
    transport: Arc<dyn Transport>,
    output: Arc<SpeechOutput>,
    conversation: Mutex<Conversation>,
    responses: EventBus<AssistantReply>,
    reply_subscription: SubscriptionId,
}

impl ResponseCoordinator {
    /// Create a coordinator and start listening for replies on `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, output: Arc<SpeechOutput>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let weak = weak.clone();
            let reply_subscription = transport.replies().subscribe(move |reply| {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.handle_reply(reply);
                }
            });

            Self {
                transport,
                output,
                conversation: Mutex::new(Conversation::default()),
                responses: EventBus::new(),
                reply_subscription,
            }
        })
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_reply(&self, reply: &AssistantReply) {
        {
            let mut conversation = self.conversation();
            conversation.current = Some(reply.clone());
            conversation.session_id = Some(reply.session_id.clone());
        }

        tracing::info!(
            session_id = %reply.session_id,
            products = reply.products.len(),
            "assistant replied"
        );

        match self.start_speaking(&reply.message) {
            Ok(Some(pending)) => {
                tokio::spawn(async move {
                    if let Err(e) = pending.finished().await {
                        tracing::warn!(error = %e, "reply playback did not complete");
                    }
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to speak reply"),
        }

        self.responses.emit(reply);
    }

    /// Open the transport
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the endpoint cannot be reached
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to connect to assistant");
        })
    }

    /// Stop speech, forget the conversation and close the transport
    pub fn disconnect(&self) {
        self.clear_response();
        self.transport.disconnect();
    }

    /// Send a user query, echoing the last known session id
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyQuery` for blank text and `Error::NotConnected`
    /// if the transport is closed
    pub fn send_query(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }

        let session_id = self.session_id();
        self.transport
            .send(text, session_id.as_deref())
            .inspect_err(|e| tracing::warn!(error = %e, "failed to send query"))
    }

    /// Start speaking `text` with the reply voice
    ///
    /// Returns `None` for blank text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` if speech output is unavailable
    pub fn start_speaking(&self, text: &str) -> Result<Option<PendingUtterance>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let options = SpeakOptions::reply().with_voice(self.output.best_english_voice());
        self.output.start(text, &options).map(Some)
    }

    /// Speak `text` with the reply voice and wait for it to finish
    ///
    /// Failures are logged, not returned.
    pub async fn speak_message(&self, text: &str) {
        let result = match self.start_speaking(text) {
            Ok(Some(pending)) => pending.finished().await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to speak message");
        }
    }

    /// Forget the current reply and session, stopping any speech
    pub fn clear_response(&self) {
        *self.conversation() = Conversation::default();
        if matches!(
            self.output.status(),
            SpeechStatus::Speaking | SpeechStatus::Paused
        ) {
            self.output.stop();
        }
    }

    /// Most recent reply
    #[must_use]
    pub fn current_response(&self) -> Option<AssistantReply> {
        self.conversation().current.clone()
    }

    /// Products of the most recent reply
    #[must_use]
    pub fn products(&self) -> Vec<Product> {
        self.conversation()
            .current
            .as_ref()
            .map(|reply| reply.products.clone())
            .unwrap_or_default()
    }

    /// Message of the most recent reply, empty if none
    #[must_use]
    pub fn message(&self) -> String {
        self.conversation()
            .current
            .as_ref()
            .map(|reply| reply.message.clone())
            .unwrap_or_default()
    }

    /// Session id to echo on the next query
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.conversation().session_id.clone()
    }

    pub fn pause_speech(&self) {
        self.output.pause();
    }

    pub fn resume_speech(&self) {
        self.output.resume();
    }

    pub fn stop_speech(&self) {
        self.output.stop();
    }

    #[must_use]
    pub fn speech_status(&self) -> SpeechStatus {
        self.output.status()
    }

    /// Subscribe to assistant replies
    pub fn on_response<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&AssistantReply) + Send + Sync + 'static,
    {
        self.responses.subscribe(listener)
    }

    /// Reply stream
    #[must_use]
    pub const fn responses(&self) -> &EventBus<AssistantReply> {
        &self.responses
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[must_use]
    pub const fn output(&self) -> &Arc<SpeechOutput> {
        &self.output
    }
}

impl Drop for ResponseCoordinator {
    fn drop(&mut self) {
        self.transport.replies().unsubscribe(self.reply_subscription);
    }
}
