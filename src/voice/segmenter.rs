//! Energy-based utterance segmentation
//!
//! Splits a microphone stream into utterances: speech starts when a chunk's
//! RMS energy crosses the threshold and ends after a run of quiet samples.
//! Utterances that grow past the maximum length are flushed as-is.

use std::time::Duration;

/// RMS energy above which a chunk counts as speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

const MIN_SPEECH: Duration = Duration::from_millis(300);
const TRAILING_SILENCE: Duration = Duration::from_millis(700);
const MAX_UTTERANCE: Duration = Duration::from_secs(15);

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Waiting for speech
    Idle,
    /// Accumulating an utterance
    Speaking,
}

/// Accumulates samples into complete utterances
#[derive(Debug)]
pub struct UtteranceSegmenter {
    threshold: f32,
    min_samples: usize,
    silence_samples: usize,
    max_samples: usize,
    state: SegmentState,
    buffer: Vec<f32>,
    quiet_run: usize,
}

impl UtteranceSegmenter {
    /// Segmenter for a stream at `sample_rate` Hz with default thresholds
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self::with_threshold(sample_rate, ENERGY_THRESHOLD)
    }

    /// Segmenter with a custom energy threshold
    #[must_use]
    pub fn with_threshold(sample_rate: u32, threshold: f32) -> Self {
        Self {
            threshold,
            min_samples: samples_for(sample_rate, MIN_SPEECH),
            silence_samples: samples_for(sample_rate, TRAILING_SILENCE),
            max_samples: samples_for(sample_rate, MAX_UTTERANCE),
            state: SegmentState::Idle,
            buffer: Vec::new(),
            quiet_run: 0,
        }
    }

    /// Feed a chunk; returns a finished utterance, if one just ended
    pub fn push(&mut self, chunk: &[f32]) -> Option<Vec<f32>> {
        if chunk.is_empty() {
            return None;
        }

        let energy = rms_energy(chunk);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmentState::Idle => {
                if is_speech {
                    tracing::trace!(energy, "speech started");
                    self.state = SegmentState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(chunk);
                    self.quiet_run = 0;
                }
                None
            }
            SegmentState::Speaking => {
                self.buffer.extend_from_slice(chunk);
                if is_speech {
                    self.quiet_run = 0;
                } else {
                    self.quiet_run += chunk.len();
                }

                if self.buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance hit max length");
                    return Some(self.finish());
                }

                if self.quiet_run >= self.silence_samples {
                    let voiced = self.buffer.len().saturating_sub(self.quiet_run);
                    if voiced >= self.min_samples {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        return Some(self.finish());
                    }
                    // Too short to be speech: a click or a cough
                    self.reset();
                }
                None
            }
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer.clear();
        self.quiet_run = 0;
    }

    fn finish(&mut self) -> Vec<f32> {
        self.state = SegmentState::Idle;
        self.quiet_run = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// RMS energy of a chunk
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn samples_for(sample_rate: u32, duration: Duration) -> usize {
    (f64::from(sample_rate) * duration.as_secs_f64()) as usize
}
