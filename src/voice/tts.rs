//! Cloud text-to-speech

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// TTS backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// `OpenAI` speech endpoint
    #[default]
    OpenAi,
    /// `ElevenLabs`
    ElevenLabs,
}

impl TtsProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }

    /// Voice used when none is configured
    #[must_use]
    pub const fn default_voice(self) -> &'static str {
        match self {
            Self::OpenAi => "nova",
            // "Rachel"
            Self::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        }
    }
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesizes MP3 audio over HTTP
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    default_voice: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a synthesizer client for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(
        provider: TtsProvider,
        api_key: String,
        model: Option<String>,
        voice: Option<String>,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            let key = match provider {
                TtsProvider::OpenAi => "OPENAI_API_KEY",
                TtsProvider::ElevenLabs => "ELEVENLABS_API_KEY",
            };
            return Err(Error::Config(format!("{key} required for speech synthesis")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            default_voice: voice.unwrap_or_else(|| provider.default_voice().to_string()),
            provider,
        })
    }

    /// Provider in use
    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Configured voice id
    #[must_use]
    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    /// Synthesize `text` to MP3 bytes
    ///
    /// `voice` overrides the configured voice; `speed` is clamped to the
    /// provider's range and ignored where unsupported.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the provider rejects it
    pub async fn synthesize(&self, text: &str, voice: Option<&str>, speed: f32) -> Result<Vec<u8>> {
        let voice = voice.unwrap_or(&self.default_voice);
        tracing::debug!(chars = text.len(), voice, speed, "synthesizing speech");

        match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text, voice, speed).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
        }
    }

    async fn synthesize_openai(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            speed: openai_speed(speed),
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Clamp a speaking rate to the range `OpenAI` accepts
fn openai_speed(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(0.25, 4.0)
    } else {
        1.0
    }
}
