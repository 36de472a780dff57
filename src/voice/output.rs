//! Single-utterance speech output
//!
//! [`SpeechOutput`] speaks one utterance at a time through a [`Synthesizer`].
//! Starting a new utterance cancels the current one; nothing is queued.
//! Every status transition is pushed to subscribers of
//! [`SpeechOutput::statuses`], which is what gates speech input during a call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::events::EventBus;
use crate::{Error, Result};

/// Playback state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechStatus {
    #[default]
    Idle,
    Speaking,
    Paused,
    /// Cancelled before the end
    Stopped,
}

/// A voice offered by a synthesizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Engine-specific identifier
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// BCP 47 language tag
    pub lang: String,
}

/// Per-utterance voice settings
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOptions {
    /// Speaking rate multiplier
    pub rate: f32,
    pub pitch: f32,
    /// Volume in `[0, 1]`
    pub volume: f32,
    /// `None` selects the engine default
    pub voice: Option<Voice>,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
        }
    }
}

impl SpeakOptions {
    /// Settings used for assistant replies
    #[must_use]
    pub const fn reply() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.0,
            volume: 0.8,
            voice: None,
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice: Option<Voice>) -> Self {
        self.voice = voice;
        self
    }
}

/// A speech synthesis engine
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Voices the engine can speak with
    fn voices(&self) -> Vec<Voice>;

    /// Speak `text`, resolving when playback ends
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    /// Abandon the current utterance
    fn cancel(&self);
}

/// Pick a voice: a female English voice, else any English voice
#[must_use]
pub fn select_voice(voices: &[Voice]) -> Option<Voice> {
    let english: Vec<&Voice> = voices
        .iter()
        .filter(|v| v.lang.to_ascii_lowercase().starts_with("en"))
        .collect();

    english
        .iter()
        .find(|v| {
            let name = v.name.to_ascii_lowercase();
            name.contains("female") || name.contains("woman")
        })
        .or_else(|| english.first())
        .map(|v| (*v).clone())
}

#[derive(Default)]
struct Playback {
    status: SpeechStatus,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Completion handle for an utterance started with [`SpeechOutput::start`]
#[derive(Debug)]
pub struct PendingUtterance {
    done: oneshot::Receiver<Result<()>>,
}

impl PendingUtterance {
    /// Wait for playback to end
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the engine failed or the utterance was
    /// cancelled
    pub async fn finished(self) -> Result<()> {
        match self.done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ Error::Synthesis(_))) => Err(e),
            Ok(Err(e)) => Err(Error::Synthesis(e.to_string())),
            Err(_) => Err(Error::Synthesis("utterance interrupted".to_string())),
        }
    }
}

/// Speaks one utterance at a time and broadcasts its status
pub struct SpeechOutput {
    engine: Option<Arc<dyn Synthesizer>>,
    playback: Arc<Mutex<Playback>>,
    statuses: EventBus<SpeechStatus>,
}

impl SpeechOutput {
    /// Speech output backed by `engine`
    #[must_use]
    pub fn new(engine: Arc<dyn Synthesizer>) -> Self {
        Self::build(Some(engine))
    }

    /// Speech output for an environment without synthesis
    #[must_use]
    pub fn unsupported() -> Self {
        Self::build(None)
    }

    fn build(engine: Option<Arc<dyn Synthesizer>>) -> Self {
        Self {
            engine,
            playback: Arc::new(Mutex::new(Playback::default())),
            statuses: EventBus::new(),
        }
    }

    fn playback(&self) -> MutexGuard<'_, Playback> {
        lock(&self.playback)
    }

    /// Whether a synthesis engine exists
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    #[must_use]
    pub fn status(&self) -> SpeechStatus {
        self.playback().status
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.status() == SpeechStatus::Speaking
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status() == SpeechStatus::Paused
    }

    /// Status transitions
    #[must_use]
    pub const fn statuses(&self) -> &EventBus<SpeechStatus> {
        &self.statuses
    }

    /// Voices offered by the engine
    #[must_use]
    pub fn voices(&self) -> Vec<Voice> {
        self.engine
            .as_ref()
            .map(|engine| engine.voices())
            .unwrap_or_default()
    }

    /// Voice preferred for assistant replies
    #[must_use]
    pub fn best_english_voice(&self) -> Option<Voice> {
        select_voice(&self.voices())
    }

    /// Begin speaking `text`, replacing any current utterance
    ///
    /// `speaking` has been broadcast by the time this returns. Replacing an
    /// utterance that is still playing broadcasts `stopped` first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` if no engine exists
    pub fn start(&self, text: &str, options: &SpeakOptions) -> Result<PendingUtterance> {
        let Some(engine) = self.engine.clone() else {
            return Err(Error::Unsupported(
                "speech synthesis is not supported".to_string(),
            ));
        };

        let (generation, replaced) = {
            let mut playback = self.playback();
            if let Some(task) = playback.task.take() {
                task.abort();
            }
            playback.generation += 1;
            let replaced = matches!(
                playback.status,
                SpeechStatus::Speaking | SpeechStatus::Paused
            );
            (playback.generation, replaced)
        };

        if replaced {
            engine.cancel();
            self.transition(SpeechStatus::Stopped);
        }
        self.transition(SpeechStatus::Speaking);
        tracing::debug!(chars = text.len(), "utterance started");

        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn({
            let playback = Arc::clone(&self.playback);
            let statuses = self.statuses.clone();
            let text = text.to_string();
            let options = options.clone();
            async move {
                let result = engine.speak(&text, &options).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "speech synthesis failed");
                }
                finish(&playback, &statuses, generation);
                let _ = done_tx.send(result);
            }
        });

        let mut playback = self.playback();
        if playback.generation == generation {
            playback.task = Some(task);
        } else {
            task.abort();
        }

        Ok(PendingUtterance { done: done_rx })
    }

    /// Speak `text` and wait for playback to end
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` without an engine, `Error::Synthesis` if
    /// playback fails or is cancelled
    pub async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<()> {
        self.start(text, options)?.finished().await
    }

    /// Pause; only while speaking
    pub fn pause(&self) {
        if self.swap_status(SpeechStatus::Speaking, SpeechStatus::Paused) {
            if let Some(engine) = &self.engine {
                engine.pause();
            }
            self.statuses.emit(&SpeechStatus::Paused);
        }
    }

    /// Resume; only while paused
    pub fn resume(&self) {
        if self.swap_status(SpeechStatus::Paused, SpeechStatus::Speaking) {
            if let Some(engine) = &self.engine {
                engine.resume();
            }
            self.statuses.emit(&SpeechStatus::Speaking);
        }
    }

    /// Cancel playback unconditionally
    pub fn stop(&self) {
        {
            let mut playback = self.playback();
            if let Some(task) = playback.task.take() {
                task.abort();
            }
            playback.generation += 1;
        }

        if let Some(engine) = &self.engine {
            engine.cancel();
        }
        self.transition(SpeechStatus::Stopped);
    }

    fn swap_status(&self, from: SpeechStatus, to: SpeechStatus) -> bool {
        let mut playback = self.playback();
        if playback.status != from {
            return false;
        }
        playback.status = to;
        true
    }

    fn transition(&self, status: SpeechStatus) {
        {
            let mut playback = self.playback();
            if playback.status == status {
                return;
            }
            playback.status = status;
        }
        tracing::debug!(?status, "speech status changed");
        self.statuses.emit(&status);
    }
}

impl Drop for SpeechOutput {
    fn drop(&mut self) {
        if let Some(task) = self.playback().task.take() {
            task.abort();
            if let Some(engine) = &self.engine {
                engine.cancel();
            }
        }
    }
}

fn lock(playback: &Mutex<Playback>) -> MutexGuard<'_, Playback> {
    playback.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Return to idle after the utterance of `generation` ends
fn finish(playback: &Mutex<Playback>, statuses: &EventBus<SpeechStatus>, generation: u64) {
    {
        let mut playback = lock(playback);
        if playback.generation != generation || playback.status == SpeechStatus::Idle {
            return;
        }
        playback.status = SpeechStatus::Idle;
        playback.task = None;
    }
    tracing::debug!("utterance finished");
    statuses.emit(&SpeechStatus::Idle);
}
