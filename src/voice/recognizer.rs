//! Microphone recognition engine
//!
//! Captures from the default microphone on a dedicated thread, cuts the
//! stream into utterances by energy, and transcribes each utterance in the
//! cloud. Each utterance arrives as a single final segment.
//!
//! Only one capture thread holds the device at a time: a restarted session's
//! thread joins the previous one before opening the microphone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc as std_mpsc};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::capture::{Microphone, samples_to_wav};
use super::input::{RecognitionSegment, Recognizer, RecognizerEvent};
use super::segmenter::UtteranceSegmenter;
use super::stt::{SpeechToText, Transcription};
use crate::{Error, Result};

/// Upper bound on one transcription round trip
pub const DEFAULT_TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(15);

const CHUNK_WAIT: Duration = Duration::from_millis(100);

struct Session {
    stop: Arc<AtomicBool>,
    capture: thread::JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Recognizer over microphone capture and cloud speech-to-text
pub struct MicrophoneRecognizer {
    stt: Arc<SpeechToText>,
    timeout: Duration,
    session: Mutex<Option<Session>>,
    /// Capture thread of the last stopped session, possibly still closing the device
    releasing: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MicrophoneRecognizer {
    #[must_use]
    pub fn new(stt: SpeechToText) -> Self {
        Self::with_timeout(stt, DEFAULT_TRANSCRIPTION_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(stt: SpeechToText, timeout: Duration) -> Self {
        Self {
            stt: Arc::new(stt),
            timeout,
            session: Mutex::new(None),
            releasing: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn releasing(&self) -> MutexGuard<'_, Option<thread::JoinHandle<()>>> {
        self.releasing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Recognizer for MicrophoneRecognizer {
    fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<()> {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();

        let previous = self.releasing().take();
        let capture = spawn_capture(previous, {
            let stop = Arc::clone(&stop);
            let events = events.clone();
            move || capture_loop(&stop, &utterance_tx, &events)
        })?;

        let worker = runtime.spawn(transcribe_loop(
            Arc::clone(&self.stt),
            self.timeout,
            utterance_rx,
            events,
        ));

        *self.session() = Some(Session {
            stop,
            capture,
            worker,
        });
        tracing::debug!("microphone recognizer started");
        Ok(())
    }

    fn stop(&self) {
        let Some(session) = self.session().take() else {
            return;
        };
        session.stop.store(true, Ordering::SeqCst);
        session.worker.abort();
        *self.releasing() = Some(session.capture);
        tracing::debug!("microphone recognizer stopped");
    }
}

impl Drop for MicrophoneRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Transcribe one utterance, bounded by `timeout`
///
/// # Errors
///
/// Returns `Error::Recognition` on encoding, API or timeout failure
pub async fn transcribe_utterance(
    stt: &SpeechToText,
    timeout: Duration,
    samples: &[f32],
    sample_rate: u32,
) -> Result<Transcription> {
    let wav =
        samples_to_wav(samples, sample_rate).map_err(|e| Error::Recognition(e.to_string()))?;
    match tokio::time::timeout(timeout, stt.transcribe(&wav)).await {
        Ok(Ok(transcription)) => Ok(transcription),
        Ok(Err(e)) => Err(Error::Recognition(e.to_string())),
        Err(_) => Err(Error::Recognition(format!(
            "transcription timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Spawn a capture thread that starts `capture` once `previous` has exited
fn spawn_capture<F>(
    previous: Option<thread::JoinHandle<()>>,
    capture: F,
) -> std::io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name("barista-mic".to_string())
        .spawn(move || {
            if previous.is_some_and(|previous| previous.join().is_err()) {
                tracing::warn!("previous capture thread panicked");
            }
            capture();
        })
}

/// Runs on the capture thread; the microphone never leaves it
fn capture_loop(
    stop: &AtomicBool,
    utterances: &mpsc::UnboundedSender<(Vec<f32>, u32)>,
    events: &mpsc::UnboundedSender<RecognizerEvent>,
) {
    // Stopped while waiting for the previous session to let go
    if stop.load(Ordering::SeqCst) {
        return;
    }

    let (microphone, chunks) = match Microphone::open() {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!(error = %e, "failed to open microphone");
            let _ = events.send(RecognizerEvent::Error(e.to_string()));
            return;
        }
    };

    let sample_rate = microphone.sample_rate();
    let mut segmenter = UtteranceSegmenter::new(sample_rate);

    while !stop.load(Ordering::SeqCst) {
        match chunks.recv_timeout(CHUNK_WAIT) {
            Ok(chunk) => {
                if let Some(utterance) = segmenter.push(&chunk) {
                    if utterances.send((utterance, sample_rate)).is_err() {
                        break;
                    }
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = events.send(RecognizerEvent::Error(
                    "microphone stream closed".to_string(),
                ));
                break;
            }
        }
    }

    drop(microphone);
}

async fn transcribe_loop(
    stt: Arc<SpeechToText>,
    timeout: Duration,
    mut utterances: mpsc::UnboundedReceiver<(Vec<f32>, u32)>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
) {
    while let Some((samples, sample_rate)) = utterances.recv().await {
        let event = match transcribe_utterance(&stt, timeout, &samples, sample_rate).await {
            Ok(transcription) => match to_segment(transcription) {
                Some(segment) => RecognizerEvent::Results(vec![segment]),
                None => continue,
            },
            Err(e) => RecognizerEvent::Error(e.to_string()),
        };

        let failed = matches!(event, RecognizerEvent::Error(_));
        if events.send(event).is_err() || failed {
            break;
        }
    }
}

fn to_segment(transcription: Transcription) -> Option<RecognitionSegment> {
    if transcription.text.trim().is_empty() {
        return None;
    }
    // Whisper reports no confidence; an answer at all counts as certain
    let confidence = transcription.confidence.unwrap_or(1.0);
    Some(RecognitionSegment::final_text(transcription.text, confidence))
}
