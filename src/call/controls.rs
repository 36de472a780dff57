//! In-call controls

use std::fmt;

/// Something the caller can do during a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallControl {
    /// Flip the microphone mute
    ToggleMute,
    /// Cut the assistant off
    StopSpeaking,
    PauseSpeech,
    ResumeSpeech,
    HangUp,
}

impl CallControl {
    /// Every control, in help order
    pub const ALL: [Self; 5] = [
        Self::ToggleMute,
        Self::StopSpeaking,
        Self::PauseSpeech,
        Self::ResumeSpeech,
        Self::HangUp,
    ];

    /// Parse a typed command: a single key or the full word
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "m" | "mute" | "unmute" => Some(Self::ToggleMute),
            "s" | "stop" => Some(Self::StopSpeaking),
            "p" | "pause" => Some(Self::PauseSpeech),
            "r" | "resume" => Some(Self::ResumeSpeech),
            "q" | "quit" | "hangup" => Some(Self::HangUp),
            _ => None,
        }
    }

    #[must_use]
    pub const fn key(self) -> char {
        match self {
            Self::ToggleMute => 'm',
            Self::StopSpeaking => 's',
            Self::PauseSpeech => 'p',
            Self::ResumeSpeech => 'r',
            Self::HangUp => 'q',
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ToggleMute => "mute or unmute the microphone",
            Self::StopSpeaking => "stop the assistant speaking",
            Self::PauseSpeech => "pause the assistant",
            Self::ResumeSpeech => "resume the assistant",
            Self::HangUp => "hang up",
        }
    }
}

impl fmt::Display for CallControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.key(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_words_parse() {
        assert_eq!(CallControl::parse("m"), Some(CallControl::ToggleMute));
        assert_eq!(CallControl::parse(" Mute\n"), Some(CallControl::ToggleMute));
        assert_eq!(CallControl::parse("s"), Some(CallControl::StopSpeaking));
        assert_eq!(CallControl::parse("PAUSE"), Some(CallControl::PauseSpeech));
        assert_eq!(CallControl::parse("r"), Some(CallControl::ResumeSpeech));
        assert_eq!(CallControl::parse("quit"), Some(CallControl::HangUp));
    }

    #[test]
    fn unknown_input_is_rejected() {
        assert_eq!(CallControl::parse(""), None);
        assert_eq!(CallControl::parse("latte"), None);
    }

    #[test]
    fn every_key_parses_back() {
        for control in CallControl::ALL {
            assert_eq!(
                CallControl::parse(&control.key().to_string()),
                Some(control)
            );
        }
        assert_eq!(CallControl::HangUp.to_string(), "q  hang up");
    }
}
