//! Voice call session
//!
//! A [`CallSession`] drives one voice conversation. All of its decisions are
//! made by a single actor task that consumes [`CallEvent`]s in arrival
//! order: transport and speech-output status changes, transcript updates,
//! silence-timer expiry, and user controls.
//!
//! The session keeps listening and assistant speech mutually exclusive.
//! Speech output announcing `speaking` blocks speech input synchronously,
//! inside the status broadcast, before the actor even sees the event; the
//! actor then cancels the silence timer and stops recognition. Input is
//! unblocked and re-armed on `idle` or `stopped` only if the output is still
//! quiet when the actor handles the event; a queued `stopped` from a replaced
//! utterance is ignored while the replacement plays.
//!
//! State flow:
//!
//! ```text
//! connecting → greeting → listening ⇄ processing
//!                             ⇅          ↓
//!                          speaking ←────┘
//! any state → ended (hang-up)
//! ```

mod controls;
mod conversation;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use controls::CallControl;
pub use conversation::{ConversationMessage, Role};

use crate::coordinator::ResponseCoordinator;
use crate::events::{EventBus, SubscriptionId};
use crate::transport::ConnectionStatus;
use crate::voice::{SpeechInput, SpeechStatus, TranscriptEvent};
use crate::{Error, Result};

/// Quiet period after the last transcript update that ends an utterance
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default assistant name
pub const DEFAULT_ASSISTANT_NAME: &str = "Rebecca";

/// Phase of a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Waiting for the transport
    #[default]
    Connecting,
    /// Assistant greeting is playing
    Greeting,
    /// Capturing the caller's speech
    Listening,
    /// Query sent, waiting for the reply
    Processing,
    /// Assistant reply is playing
    Speaking,
    /// Hung up; terminal
    Ended,
}

impl CallState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Greeting => "greeting",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Ended => "ended",
        }
    }

    /// Status line for display
    #[must_use]
    pub fn status_message(self, assistant: &str, listening: bool) -> String {
        match self {
            Self::Connecting => format!("Connecting to {assistant}..."),
            Self::Greeting => format!("{assistant} is greeting you..."),
            Self::Listening if listening => "AI is listening...".to_string(),
            Self::Listening => "Ready to listen".to_string(),
            Self::Processing => "Processing your message...".to_string(),
            Self::Speaking => format!("{assistant} is responding..."),
            Self::Ended => "Call ended".to_string(),
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallConfig {
    pub caller_name: String,
    pub assistant_name: String,
    pub silence_timeout: Duration,
    /// Greeting override; `None` uses the standard greeting
    pub greeting: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            caller_name: "there".to_string(),
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            greeting: None,
        }
    }
}

impl CallConfig {
    /// Text spoken once the call connects
    #[must_use]
    pub fn greeting_text(&self) -> String {
        self.greeting.clone().unwrap_or_else(|| {
            format!(
                "Hello {}! I'm {}, your AI assistant. I'm ready to help you find the perfect \
                 coffee. Please tell me what you're looking for.",
                self.caller_name, self.assistant_name
            )
        })
    }
}

/// Input to the session actor
#[derive(Debug)]
enum CallEvent {
    Transport(ConnectionStatus),
    Output(SpeechStatus),
    GreetingFinished,
    Transcript(TranscriptEvent),
    RecognitionFailed(Error),
    SilenceElapsed(u64),
    ToggleMute(oneshot::Sender<bool>),
    HangUp(oneshot::Sender<()>),
}

/// State visible to the handle
struct Shared {
    state: Mutex<CallState>,
    muted: AtomicBool,
    transcript: Mutex<String>,
    log: Mutex<Vec<ConversationMessage>>,
    states: EventBus<CallState>,
    messages: EventBus<ConversationMessage>,
    transcripts: EventBus<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Connecting),
            muted: AtomicBool::new(false),
            transcript: Mutex::new(String::new()),
            log: Mutex::new(Vec::new()),
            states: EventBus::new(),
            messages: EventBus::new(),
            transcripts: EventBus::new(),
        }
    }

    fn state(&self) -> CallState {
        *lock(&self.state)
    }

    fn set_state(&self, next: CallState) {
        let previous = {
            let mut state = lock(&self.state);
            if *state == next {
                return;
            }
            std::mem::replace(&mut *state, next)
        };
        tracing::info!(from = %previous, to = %next, "call state changed");
        self.states.emit(&next);
    }

    fn set_transcript(&self, text: &str) {
        {
            let mut transcript = lock(&self.transcript);
            if *transcript == text {
                return;
            }
            text.clone_into(&mut transcript);
        }
        self.transcripts.emit(&text.to_string());
    }

    fn append(&self, role: Role, text: &str) {
        let message = ConversationMessage::new(role, text);
        lock(&self.log).push(message.clone());
        self.messages.emit(&message);
    }
}

/// Handle to a running call
///
/// Dropping the handle hangs up.
pub struct CallSession {
    events: mpsc::UnboundedSender<CallEvent>,
    shared: Arc<Shared>,
    coordinator: Arc<ResponseCoordinator>,
    input: Arc<SpeechInput>,
    assistant_name: String,
}

impl CallSession {
    /// Start a call: connect the transport, greet, then listen
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` if speech input or output is unavailable
    pub fn start(
        coordinator: Arc<ResponseCoordinator>,
        input: Arc<SpeechInput>,
        config: CallConfig,
    ) -> Result<Self> {
        if !input.is_available() {
            return Err(Error::Unsupported(
                "speech recognition is not available".to_string(),
            ));
        }
        if !coordinator.output().is_available() {
            return Err(Error::Unsupported(
                "speech synthesis is not available".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        let transport_subscription = {
            let tx = tx.clone();
            coordinator.transport().status_changes().subscribe(move |status| {
                let _ = tx.send(CallEvent::Transport(*status));
            })
        };

        let output_subscription = {
            let tx = tx.clone();
            let input = Arc::clone(&input);
            coordinator.output().statuses().subscribe(move |status| {
                // Close the gate before any queued transcript can be handled
                if *status == SpeechStatus::Speaking {
                    input.block();
                }
                let _ = tx.send(CallEvent::Output(*status));
            })
        };

        tracing::info!(
            caller = %config.caller_name,
            assistant = %config.assistant_name,
            silence_ms = u64::try_from(config.silence_timeout.as_millis()).unwrap_or(u64::MAX),
            "starting call"
        );

        let assistant_name = config.assistant_name.clone();
        let actor = Actor {
            coordinator: Arc::clone(&coordinator),
            input: Arc::clone(&input),
            config,
            shared: Arc::clone(&shared),
            events: tx.clone(),
            transcript: String::new(),
            muted: false,
            timer: None,
            timer_generation: 0,
            greeting: None,
            transport_subscription,
            output_subscription,
        };
        tokio::spawn(actor.run(rx));

        Ok(Self {
            events: tx,
            shared,
            coordinator,
            input,
            assistant_name,
        })
    }

    /// Current phase
    #[must_use]
    pub fn state(&self) -> CallState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Whether speech input is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.input.is_listening()
    }

    /// Status line for display
    #[must_use]
    pub fn status_message(&self) -> String {
        self.state()
            .status_message(&self.assistant_name, self.is_listening())
    }

    /// Conversation so far
    #[must_use]
    pub fn conversation(&self) -> Vec<ConversationMessage> {
        lock(&self.shared.log).clone()
    }

    /// Latest transcript of the caller's speech, empty between utterances
    #[must_use]
    pub fn current_transcript(&self) -> String {
        lock(&self.shared.transcript).clone()
    }

    /// Every state transition
    #[must_use]
    pub fn state_changes(&self) -> &EventBus<CallState> {
        &self.shared.states
    }

    /// Conversation appends
    #[must_use]
    pub fn conversation_updates(&self) -> &EventBus<ConversationMessage> {
        &self.shared.messages
    }

    /// Transcript updates
    #[must_use]
    pub fn transcript_updates(&self) -> &EventBus<String> {
        &self.shared.transcripts
    }

    /// Subscribe to conversation appends
    pub fn on_conversation<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ConversationMessage) + Send + Sync + 'static,
    {
        self.shared.messages.subscribe(listener)
    }

    /// Coordinator for this call, for replies and products
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<ResponseCoordinator> {
        &self.coordinator
    }

    /// Flip mute; returns the new mute state
    ///
    /// Muting stops speech input without changing the call state.
    pub async fn toggle_mute(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.events.send(CallEvent::ToggleMute(tx)).is_err() {
            return self.is_muted();
        }
        rx.await.unwrap_or_else(|_| self.is_muted())
    }

    /// Cut the assistant off mid-sentence
    pub fn stop_speaking(&self) {
        if matches!(
            self.coordinator.speech_status(),
            SpeechStatus::Speaking | SpeechStatus::Paused
        ) {
            self.coordinator.stop_speech();
        }
    }

    /// Apply an in-call control
    pub async fn control(&self, control: CallControl) {
        match control {
            CallControl::ToggleMute => {
                self.toggle_mute().await;
            }
            CallControl::StopSpeaking => self.stop_speaking(),
            CallControl::PauseSpeech => self.coordinator.pause_speech(),
            CallControl::ResumeSpeech => self.coordinator.resume_speech(),
            CallControl::HangUp => self.end_call().await,
        }
    }

    /// Hang up; idempotent
    pub async fn end_call(&self) {
        if self.state() == CallState::Ended {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.events.send(CallEvent::HangUp(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let (tx, _rx) = oneshot::channel();
        let _ = self.events.send(CallEvent::HangUp(tx));
    }
}

struct Actor {
    coordinator: Arc<ResponseCoordinator>,
    input: Arc<SpeechInput>,
    config: CallConfig,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<CallEvent>,
    /// Latest non-blank transcript since the last forward
    transcript: String,
    muted: bool,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    greeting: Option<String>,
    transport_subscription: SubscriptionId,
    output_subscription: SubscriptionId,
}

impl Actor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<CallEvent>) {
        if self.coordinator.transport().status() == ConnectionStatus::Connected {
            self.begin_greeting();
        } else {
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                // Failure surfaces as a transport status change
                let _ = coordinator.connect().await;
            });
        }

        while let Some(event) = events.recv().await {
            let last = matches!(event, CallEvent::HangUp(_));
            self.handle(event);
            if last {
                break;
            }
        }

        tracing::debug!("call actor finished");
    }

    fn state(&self) -> CallState {
        self.shared.state()
    }

    fn handle(&mut self, event: CallEvent) {
        match event {
            CallEvent::Transport(status) => self.on_transport(status),
            CallEvent::Output(status) => self.on_output(status),
            CallEvent::GreetingFinished => self.on_greeting_finished(),
            CallEvent::Transcript(transcript) => self.on_transcript(transcript),
            CallEvent::RecognitionFailed(e) => {
                tracing::warn!(error = %e, "speech recognition failed");
                self.input.stop_listening();
            }
            CallEvent::SilenceElapsed(generation) => self.on_silence(generation),
            CallEvent::ToggleMute(reply) => {
                self.toggle_mute();
                let _ = reply.send(self.muted);
            }
            CallEvent::HangUp(reply) => {
                self.hang_up();
                let _ = reply.send(());
            }
        }
    }

    fn on_transport(&mut self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected if self.state() == CallState::Connecting => {
                self.begin_greeting();
            }
            ConnectionStatus::Error => {
                tracing::error!("assistant connection failed");
            }
            ConnectionStatus::Disconnected => {
                tracing::warn!("assistant connection lost");
            }
            _ => {}
        }
    }

    fn begin_greeting(&mut self) {
        self.shared.set_state(CallState::Greeting);

        let greeting = self.config.greeting_text();
        let pending = self
            .coordinator
            .start_speaking(&greeting)
            .inspect_err(|e| tracing::warn!(error = %e, "failed to speak greeting"))
            .ok()
            .flatten();
        self.greeting = Some(greeting);

        let events = self.events.clone();
        tokio::spawn(async move {
            if let Some(pending) = pending {
                if let Err(e) = pending.finished().await {
                    tracing::warn!(error = %e, "greeting playback did not complete");
                }
            }
            let _ = events.send(CallEvent::GreetingFinished);
        });
    }

    fn on_greeting_finished(&mut self) {
        if self.state() != CallState::Greeting {
            return;
        }
        if let Some(greeting) = self.greeting.take() {
            self.shared.append(Role::Assistant, &greeting);
        }
        self.shared.set_state(CallState::Listening);
        self.arm();
    }

    fn on_output(&mut self, status: SpeechStatus) {
        match status {
            SpeechStatus::Speaking => {
                self.input.block();
                self.cancel_timer();
                self.transcript.clear();
                self.shared.set_transcript("");
                self.input.stop_listening();
                if matches!(self.state(), CallState::Listening | CallState::Processing) {
                    self.shared.set_state(CallState::Speaking);
                }
            }
            SpeechStatus::Idle | SpeechStatus::Stopped => {
                // A replaced utterance queues `stopped` ahead of the new
                // `speaking`; only the live status may reopen the gate
                if matches!(
                    self.coordinator.speech_status(),
                    SpeechStatus::Speaking | SpeechStatus::Paused
                ) {
                    tracing::debug!(?status, "stale output status, keeping input blocked");
                    return;
                }
                self.input.unblock();
                if matches!(self.state(), CallState::Speaking | CallState::Listening) {
                    self.shared.set_state(CallState::Listening);
                    self.arm();
                }
            }
            SpeechStatus::Paused => {}
        }
    }

    fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if self.state() != CallState::Listening || self.muted || self.input.is_blocked() {
            tracing::debug!("transcript outside listening window, dropping");
            return;
        }

        self.shared.set_transcript(&transcript.text);
        if transcript.text.trim().is_empty() {
            return;
        }

        tracing::debug!(
            text = %transcript.text,
            confidence = transcript.confidence,
            is_final = transcript.is_final,
            "caller speaking"
        );
        self.transcript = transcript.text;
        self.restart_timer();
    }

    fn on_silence(&mut self, generation: u64) {
        if generation != self.timer_generation {
            return;
        }
        self.timer = None;

        if self.state() != CallState::Listening || self.input.is_blocked() {
            return;
        }
        let utterance = std::mem::take(&mut self.transcript);
        if utterance.trim().is_empty() {
            return;
        }

        self.shared.set_state(CallState::Processing);
        self.input.stop_listening();
        self.shared.set_transcript("");
        self.shared.append(Role::User, &utterance);

        match self.coordinator.send_query(&utterance) {
            Ok(()) => tracing::info!(text = %utterance, "query sent"),
            Err(e) => {
                tracing::warn!(error = %e, "query not sent, listening again");
                self.shared.set_state(CallState::Listening);
                self.arm();
            }
        }
    }

    fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        self.shared.muted.store(self.muted, Ordering::SeqCst);

        if self.muted {
            tracing::info!("microphone muted");
            self.input.stop_listening();
            self.cancel_timer();
            self.transcript.clear();
        } else {
            tracing::info!("microphone unmuted");
            if self.state() == CallState::Listening {
                self.arm();
            }
        }
    }

    /// Start speech input unless muted, gated or already running
    fn arm(&self) {
        if self.muted || self.input.is_blocked() || self.input.is_listening() {
            return;
        }

        let results = self.events.clone();
        let failures = self.events.clone();
        self.input.start_listening(
            move |transcript| {
                let _ = results.send(CallEvent::Transcript(transcript));
            },
            move |e| {
                let _ = failures.send(CallEvent::RecognitionFailed(e));
            },
        );
    }

    fn restart_timer(&mut self) {
        self.cancel_timer();

        let generation = self.timer_generation;
        let timeout = self.config.silence_timeout;
        let events = self.events.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(CallEvent::SilenceElapsed(generation));
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
    }

    fn hang_up(&mut self) {
        if self.state() == CallState::Ended {
            return;
        }

        let transport = self.coordinator.transport();
        transport.status_changes().unsubscribe(self.transport_subscription);
        self.coordinator
            .output()
            .statuses()
            .unsubscribe(self.output_subscription);

        self.cancel_timer();
        self.coordinator.stop_speech();
        self.input.stop_listening();
        self.input.unblock();
        self.coordinator.disconnect();

        self.shared.set_transcript("");
        self.shared.set_state(CallState::Ended);
        tracing::info!("call ended");
    }
}
