//! Gated continuous speech input
//!
//! [`SpeechInput`] drives a [`Recognizer`] and turns its raw result batches
//! into [`TranscriptEvent`]s. A block flag, independent of start/stop, keeps
//! input deaf while the assistant talks: it is re-checked for every batch at
//! the moment the batch is delivered, so audio that was already in flight
//! when the block landed is still discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Segments below this confidence are treated as noise or echo
pub const MIN_CONFIDENCE: f32 = 0.3;

/// One hypothesis from a recognition engine
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSegment {
    pub text: String,
    /// Engine confidence in `[0, 1]`
    pub confidence: f32,
    pub is_final: bool,
}

impl RecognitionSegment {
    /// A final segment
    #[must_use]
    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: true,
        }
    }

    /// An interim segment
    #[must_use]
    pub fn interim(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: false,
        }
    }
}

/// Raw output of a recognition engine
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    /// A batch of segments
    Results(Vec<RecognitionSegment>),
    /// Engine failure; the engine has stopped
    Error(String),
    /// The engine ended its session on its own
    End,
}

/// A speech recognition engine
///
/// Engines push [`RecognizerEvent`]s into the sink handed to
/// [`Recognizer::start`] until stopped or until they end on their own.
pub trait Recognizer: Send + Sync {
    /// Begin a recognition session
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start
    fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<()>;

    /// End the current session, if any
    fn stop(&self);
}

/// A transcript update delivered to the listener
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
}

/// Merge one result batch into a transcript event
///
/// Segments below `min_confidence` are dropped. Final segments win over
/// interim ones; confidence and finality are those of the batch's last
/// segment. Returns `None` if nothing meaningful remains.
#[must_use]
pub fn merge_segments(segments: &[RecognitionSegment], min_confidence: f32) -> Option<TranscriptEvent> {
    let mut finals = String::new();
    let mut interims = String::new();

    for segment in segments.iter().filter(|s| s.confidence >= min_confidence) {
        if segment.is_final {
            finals.push_str(&segment.text);
        } else {
            interims.push_str(&segment.text);
        }
    }

    let text = if finals.is_empty() { interims } else { finals };
    if text.trim().is_empty() {
        return None;
    }

    let last = segments.last()?;
    Some(TranscriptEvent {
        text,
        confidence: last.confidence,
        is_final: last.is_final,
    })
}

/// Continuous, gateable speech input
pub struct SpeechInput {
    recognizer: Option<Arc<dyn Recognizer>>,
    min_confidence: f32,
    blocked: Arc<AtomicBool>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechInput {
    /// Speech input backed by `recognizer`
    #[must_use]
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self::build(Some(recognizer))
    }

    /// Speech input for an environment without recognition
    #[must_use]
    pub fn unsupported() -> Self {
        Self::build(None)
    }

    fn build(recognizer: Option<Arc<dyn Recognizer>>) -> Self {
        Self {
            recognizer,
            min_confidence: MIN_CONFIDENCE,
            blocked: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    /// Override the confidence floor
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn session(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a recognition engine exists
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Close the gate: suppress results and refuse to start
    pub fn block(&self) {
        if !self.blocked.swap(true, Ordering::SeqCst) {
            tracing::debug!("speech input blocked");
        }
    }

    /// Open the gate
    pub fn unblock(&self) {
        if self.blocked.swap(false, Ordering::SeqCst) {
            tracing::debug!("speech input unblocked");
        }
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Whether a recognition session is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.session()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Begin continuous recognition
    ///
    /// `on_result` receives every merged transcript update while the gate is
    /// open. `on_error` receives `Error::Unsupported` when no engine exists,
    /// and `Error::Recognition` on engine failure, after which recognition
    /// stays stopped. When the engine ends on its own it is restarted unless
    /// the gate is closed. A no-op while blocked.
    pub fn start_listening<R, E>(&self, on_result: R, on_error: E)
    where
        R: Fn(TranscriptEvent) + Send + Sync + 'static,
        E: Fn(Error) + Send + Sync + 'static,
    {
        let Some(recognizer) = self.recognizer.clone() else {
            on_error(Error::Unsupported(
                "speech recognition is not supported".to_string(),
            ));
            return;
        };

        if self.is_blocked() {
            tracing::debug!("speech input blocked, not starting");
            return;
        }

        self.stop_listening();

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Err(e) = recognizer.start(tx.clone()) {
            tracing::warn!(error = %e, "failed to start recognition");
            on_error(Error::Recognition(e.to_string()));
            return;
        }
        tracing::debug!("listening");

        let blocked = Arc::clone(&self.blocked);
        let min_confidence = self.min_confidence;

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    RecognizerEvent::Results(segments) => {
                        if blocked.load(Ordering::SeqCst) {
                            tracing::debug!("result arrived while blocked, dropping");
                            continue;
                        }
                        if let Some(transcript) = merge_segments(&segments, min_confidence) {
                            on_result(transcript);
                        }
                    }
                    RecognizerEvent::Error(message) => {
                        tracing::warn!(error = %message, "recognition engine failed");
                        recognizer.stop();
                        on_error(Error::Recognition(message));
                        break;
                    }
                    RecognizerEvent::End => {
                        if blocked.load(Ordering::SeqCst) {
                            tracing::debug!("recognition ended while blocked");
                            break;
                        }
                        tracing::debug!("recognition ended, restarting");
                        if let Err(e) = recognizer.start(tx.clone()) {
                            tracing::warn!(error = %e, "failed to restart recognition");
                            on_error(Error::Recognition(e.to_string()));
                            break;
                        }
                    }
                }
            }
        });

        *self.session() = Some(task);
    }

    /// Halt recognition; safe when already stopped
    pub fn stop_listening(&self) {
        let task = self.session().take();
        if let Some(task) = task {
            task.abort();
            if let Some(recognizer) = &self.recognizer {
                recognizer.stop();
            }
            tracing::debug!("stopped listening");
        }
    }
}

impl Drop for SpeechInput {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
