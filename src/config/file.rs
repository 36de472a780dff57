//! TOML configuration file loading
//!
//! Supports `~/.config/barista/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaristaConfigFile {
    /// Assistant endpoint
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Call behaviour
    #[serde(default)]
    pub call: CallFileConfig,

    /// Speech engines
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for speech providers
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Websocket URL (`ws://` or `wss://`)
    pub url: Option<String>,
    pub reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallFileConfig {
    pub caller_name: Option<String>,
    pub assistant_name: Option<String>,
    pub silence_timeout_ms: Option<u64>,
    pub greeting: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub min_confidence: Option<f32>,
    pub transcription_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the config file from `path`, or from the standard path
///
/// Returns `BaristaConfigFile::default()` if the file doesn't exist or
/// can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> BaristaConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return BaristaConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return BaristaConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                BaristaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            BaristaConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unknown sections
pub fn parse_config(content: &str) -> Result<BaristaConfigFile, toml::de::Error> {
    toml::from_str(content)
}

/// Return the config file path: `~/.config/barista/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("barista").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_file_parses() {
        let config = parse_config(
            r#"
            [server]
            url = "wss://coffee.example/ws"

            [call]
            caller_name = "Ada"
            silence_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.server.url.as_deref(), Some("wss://coffee.example/ws"));
        assert_eq!(config.call.caller_name.as_deref(), Some("Ada"));
        assert_eq!(config.call.silence_timeout_ms, Some(1500));
        assert!(config.voice.stt_provider.is_none());
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(parse_config("[menu]\nroast = \"dark\"").is_err());
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not toml = = =").unwrap();

        let config = load_config_file(Some(file.path()));
        assert!(config.server.url.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_file(Some(&dir.path().join("absent.toml")));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn file_on_disk_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api_keys]\ndeepgram = \"dg-key\"").unwrap();

        let config = load_config_file(Some(file.path()));
        assert_eq!(config.api_keys.deepgram.as_deref(), Some("dg-key"));
    }
}
