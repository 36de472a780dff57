//! Speaker playback with pause and cancel

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared flags steering one playback
#[derive(Debug)]
pub struct PlaybackControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    volume: f32,
}

impl PlaybackControl {
    /// Control for a playback at `volume` (clamped to `[0, 1]`)
    #[must_use]
    pub fn new(volume: f32) -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Play a clip on the default output device, blocking until it ends
///
/// Returns early, without error, once `control` is cancelled. While paused
/// the device plays silence and the position does not advance.
///
/// # Errors
///
/// Returns error if the output device cannot be opened
pub fn play_blocking(clip: &Clip, control: &Arc<PlaybackControl>) -> Result<()> {
    if clip.samples.is_empty() || control.is_cancelled() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
    let config: cpal::StreamConfig = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .into();

    let channels = usize::from(config.channels);
    let samples = Arc::new(resample(&clip.samples, clip.sample_rate, config.sample_rate.0));
    let total = samples.len();
    let position = Arc::new(AtomicUsize::new(0));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let control = Arc::clone(control);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let hold = control.is_paused() || control.is_cancelled();
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = if hold {
                            0.0
                        } else {
                            let s = samples.get(pos).copied().unwrap_or(0.0);
                            pos = (pos + 1).min(total);
                            s * control.volume
                        };
                        frame.fill(sample);
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    while position.load(Ordering::Relaxed) < total && !control.is_cancelled() {
        std::thread::sleep(POLL_INTERVAL);
    }

    // Let the device drain its last buffer
    if !control.is_cancelled() {
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(
        samples = total,
        cancelled = control.is_cancelled(),
        "playback finished"
    );

    Ok(())
}

/// Decode MP3 bytes to mono samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
#[allow(clippy::cast_precision_loss)]
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Clip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    let sum: f32 = chunk.iter().map(|&s| f32::from(s) / 32768.0).sum();
                    sum / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(Clip {
        samples,
        sample_rate,
    })
}

/// Linear-interpolation resample
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || to == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from) / f64::from(to);
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = (src.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (src - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

/// A sine tone, for speaker checks
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn tone(frequency: f32, duration: Duration, sample_rate: u32) -> Clip {
    let count = (duration.as_secs_f64() * f64::from(sample_rate)) as usize;
    let samples = (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();
    Clip {
        samples,
        sample_rate,
    }
}
