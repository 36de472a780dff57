//! Voice processing
//!
//! [`SpeechInput`] and [`SpeechOutput`] wrap opaque engines behind the
//! [`Recognizer`] and [`Synthesizer`] traits. The concrete engines capture
//! from the microphone and play to the speaker, with speech-to-text and
//! text-to-speech done by cloud providers.

mod capture;
mod input;
mod output;
mod playback;
mod recognizer;
mod segmenter;
mod stt;
mod synthesizer;
mod tts;

pub use capture::{Microphone, SAMPLE_RATE, samples_to_wav};
pub use input::{
    MIN_CONFIDENCE, RecognitionSegment, Recognizer, RecognizerEvent, SpeechInput,
    TranscriptEvent, merge_segments,
};
pub use output::{
    PendingUtterance, SpeakOptions, SpeechOutput, SpeechStatus, Synthesizer, Voice, select_voice,
};
pub use playback::{Clip, PlaybackControl, decode_mp3, play_blocking, resample, tone};
pub use recognizer::{DEFAULT_TRANSCRIPTION_TIMEOUT, MicrophoneRecognizer, transcribe_utterance};
pub use segmenter::{ENERGY_THRESHOLD, SegmentState, UtteranceSegmenter, rms_energy};
pub use stt::{SpeechToText, SttProvider, Transcription};
pub use synthesizer::CloudSynthesizer;
pub use tts::{TextToSpeech, TtsProvider};
