//! Cloud synthesis engine

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::output::{SpeakOptions, Synthesizer, Voice};
use super::playback::{PlaybackControl, decode_mp3, play_blocking};
use super::tts::{TextToSpeech, TtsProvider};
use crate::{Error, Result};

const OPENAI_VOICES: &[(&str, &str)] = &[
    ("alloy", "Alloy (English, neutral)"),
    ("ash", "Ash (English, male)"),
    ("coral", "Coral (English, female)"),
    ("echo", "Echo (English, male)"),
    ("fable", "Fable (English, male)"),
    ("nova", "Nova (English, female)"),
    ("onyx", "Onyx (English, male)"),
    ("sage", "Sage (English, female)"),
    ("shimmer", "Shimmer (English, female)"),
];

/// Synthesizer over cloud TTS and the default speaker
///
/// `rate` maps to provider speed and `volume` scales samples. Pitch is not
/// supported by the providers and is ignored.
pub struct CloudSynthesizer {
    tts: TextToSpeech,
    current: Mutex<Option<Arc<PlaybackControl>>>,
}

impl CloudSynthesizer {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<PlaybackControl>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, control: &Arc<PlaybackControl>) {
        let mut current = self.current();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, control)) {
            *current = None;
        }
    }

    async fn render(&self, text: &str, options: &SpeakOptions, control: &Arc<PlaybackControl>) -> Result<()> {
        let voice = options.voice.as_ref().map(|v| v.id.as_str());
        let mp3 = self
            .tts
            .synthesize(text, voice, options.rate)
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if control.is_cancelled() {
            return Err(Error::Synthesis("cancelled".to_string()));
        }

        let clip = decode_mp3(&mp3).map_err(|e| Error::Synthesis(e.to_string()))?;
        tracing::debug!(
            duration_ms = u64::try_from(clip.duration().as_millis()).unwrap_or(u64::MAX),
            "playing synthesized speech"
        );

        let playback = Arc::clone(control);
        tokio::task::spawn_blocking(move || play_blocking(&clip, &playback))
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if control.is_cancelled() {
            return Err(Error::Synthesis("cancelled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Synthesizer for CloudSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        match self.tts.provider() {
            TtsProvider::OpenAi => OPENAI_VOICES
                .iter()
                .map(|(id, name)| Voice {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                    lang: "en-US".to_string(),
                })
                .collect(),
            TtsProvider::ElevenLabs => vec![Voice {
                id: self.tts.default_voice().to_string(),
                name: "ElevenLabs voice".to_string(),
                lang: "en".to_string(),
            }],
        }
    }

    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<()> {
        let control = Arc::new(PlaybackControl::new(options.volume));
        if let Some(previous) = self.current().replace(Arc::clone(&control)) {
            previous.cancel();
        }

        let result = self.render(text, options, &control).await;
        self.release(&control);
        result
    }

    fn pause(&self) {
        if let Some(control) = self.current().as_ref() {
            control.pause();
        }
    }

    fn resume(&self) {
        if let Some(control) = self.current().as_ref() {
            control.resume();
        }
    }

    fn cancel(&self) {
        if let Some(control) = self.current().take() {
            control.cancel();
        }
    }
}
