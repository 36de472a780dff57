//! Configuration management for the barista call client
//!
//! Sources, highest priority first: command-line overrides, environment
//! variables, the TOML config file, built-in defaults.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::call::{CallConfig, DEFAULT_ASSISTANT_NAME, DEFAULT_SILENCE_TIMEOUT};
use crate::transport::ReconnectPolicy;
use crate::voice::{
    DEFAULT_TRANSCRIPTION_TIMEOUT, MIN_CONFIDENCE, SpeechToText, SttProvider, TextToSpeech,
    TtsProvider,
};
use crate::{Error, Result};

/// Default assistant endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws";

/// Barista call client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Assistant endpoint
    pub server: ServerConfig,

    /// Call behaviour
    pub call: CallConfig,

    /// Speech engines
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Assistant endpoint configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Validated websocket URL
    pub url: String,

    /// Reconnect policy after unexpected closes
    pub reconnect: ReconnectPolicy,
}

/// Speech engine configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,

    /// STT model; `None` uses the provider default
    pub stt_model: Option<String>,

    pub tts_provider: TtsProvider,

    /// TTS model; `None` uses the provider default
    pub tts_model: Option<String>,

    /// TTS voice; `None` uses the provider default
    pub tts_voice: Option<String>,

    /// Recognition segments below this confidence are discarded
    pub min_confidence: f32,

    /// Upper bound on one transcription round trip
    pub transcription_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: SttProvider::default(),
            stt_model: None,
            tts_provider: TtsProvider::default(),
            tts_model: None,
            tts_voice: None,
            min_confidence: MIN_CONFIDENCE,
            transcription_timeout: DEFAULT_TRANSCRIPTION_TIMEOUT,
        }
    }
}

/// API keys for speech providers
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("openai", &redact(&self.openai))
            .field("deepgram", &redact(&self.deepgram))
            .field("elevenlabs", &redact(&self.elevenlabs))
            .finish()
    }
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn resolve<F>(fc: file::BaristaConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // Server (env > toml > default)
        let url = env("BARISTA_SERVER_URL")
            .or(fc.server.url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let defaults = ReconnectPolicy::default();
        let server = ServerConfig {
            url: validate_server_url(&url)?,
            reconnect: ReconnectPolicy {
                max_attempts: fc.server.reconnect_attempts.unwrap_or(defaults.max_attempts),
                base_delay: fc
                    .server
                    .reconnect_delay_ms
                    .map_or(defaults.base_delay, Duration::from_millis),
            },
        };

        // Call (env > toml > default)
        let silence_ms = match env("BARISTA_SILENCE_TIMEOUT_MS") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("BARISTA_SILENCE_TIMEOUT_MS is not a number: {raw}"))
            })?),
            None => fc.call.silence_timeout_ms,
        };
        let call = CallConfig {
            caller_name: env("BARISTA_CALLER_NAME")
                .or(fc.call.caller_name)
                .unwrap_or_else(|| CallConfig::default().caller_name),
            assistant_name: env("BARISTA_ASSISTANT_NAME")
                .or(fc.call.assistant_name)
                .unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string()),
            silence_timeout: silence_ms.map_or(DEFAULT_SILENCE_TIMEOUT, Duration::from_millis),
            greeting: fc.call.greeting,
        };
        if call.silence_timeout.is_zero() {
            return Err(Error::Config("silence timeout must be positive".to_string()));
        }

        // Voice (env > toml > default)
        let stt_provider = env("BARISTA_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();
        let tts_provider = env("BARISTA_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();
        let min_confidence = fc.voice.min_confidence.unwrap_or(MIN_CONFIDENCE);
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be within 0..=1, got {min_confidence}"
            )));
        }
        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("BARISTA_STT_MODEL").or(fc.voice.stt_model),
            tts_provider,
            tts_model: env("BARISTA_TTS_MODEL").or(fc.voice.tts_model),
            tts_voice: env("BARISTA_TTS_VOICE").or(fc.voice.tts_voice),
            min_confidence,
            transcription_timeout: fc
                .voice
                .transcription_timeout_secs
                .map_or(DEFAULT_TRANSCRIPTION_TIMEOUT, Duration::from_secs),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        Ok(Self {
            server,
            call,
            voice,
            api_keys,
        })
    }

    /// Replace the server URL
    ///
    /// # Errors
    ///
    /// Returns error if the URL is not a websocket URL
    pub fn with_server_url(mut self, url: &str) -> Result<Self> {
        self.server.url = validate_server_url(url)?;
        Ok(self)
    }

    /// Replace the caller name
    #[must_use]
    pub fn with_caller_name(mut self, name: impl Into<String>) -> Self {
        self.call.caller_name = name.into();
        self
    }

    /// Key for the configured STT provider
    #[must_use]
    pub fn stt_api_key(&self) -> Option<&str> {
        match self.voice.stt_provider {
            SttProvider::Whisper => self.api_keys.openai.as_deref(),
            SttProvider::Deepgram => self.api_keys.deepgram.as_deref(),
        }
    }

    /// Key for the configured TTS provider
    #[must_use]
    pub fn tts_api_key(&self) -> Option<&str> {
        match self.voice.tts_provider {
            TtsProvider::OpenAi => self.api_keys.openai.as_deref(),
            TtsProvider::ElevenLabs => self.api_keys.elevenlabs.as_deref(),
        }
    }

    /// Build the configured speech-to-text client
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn speech_to_text(&self) -> Result<SpeechToText> {
        SpeechToText::new(
            self.voice.stt_provider,
            self.stt_api_key().unwrap_or_default().to_string(),
            self.voice.stt_model.clone(),
        )
    }

    /// Build the configured text-to-speech client
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn text_to_speech(&self) -> Result<TextToSpeech> {
        TextToSpeech::new(
            self.voice.tts_provider,
            self.tts_api_key().unwrap_or_default().to_string(),
            self.voice.tts_model.clone(),
            self.voice.tts_voice.clone(),
        )
    }
}

/// Check that `raw` is a websocket URL and normalize it
///
/// # Errors
///
/// Returns `Error::Config` if the URL is malformed or not `ws`/`wss`
pub fn validate_server_url(raw: &str) -> Result<String> {
    let url = url::Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("invalid server URL {raw:?}: {e}")))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url.to_string()),
        other => Err(Error::Config(format!(
            "server URL must use ws or wss, got {other}"
        ))),
    }
}
