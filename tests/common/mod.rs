//! Shared test utilities
//!
//! In-memory stand-ins for the transport and the speech engines, so call
//! flows can be driven without sockets, microphones or speakers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use barista_call::voice::{
    RecognitionSegment, Recognizer, RecognizerEvent, SpeakOptions, Synthesizer, Voice,
};
use barista_call::{
    AssistantReply, ConnectionStatus, Error, EventBus, Product, ResponseCoordinator, Result,
    SpeechInput, SpeechOutput, Transport,
};
use tokio::sync::mpsc;

/// Transport that records sends and lets tests push replies
pub struct MockTransport {
    status: Mutex<ConnectionStatus>,
    reachable: AtomicBool,
    sent: Mutex<Vec<(String, Option<String>)>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    replies: EventBus<AssistantReply>,
    statuses: EventBus<ConnectionStatus>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(ConnectionStatus::Disconnected),
            reachable: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            replies: EventBus::new(),
            statuses: EventBus::new(),
        })
    }

    /// Make subsequent `connect` calls fail
    pub fn set_unreachable(&self) {
        self.reachable.store(false, Ordering::SeqCst);
    }

    /// Force a status, as an unexpected close would
    pub fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.lock().unwrap();
            if *current == status {
                return;
            }
            *current = status;
        }
        self.statuses.emit(&status);
    }

    /// Deliver an inbound reply
    pub fn deliver(&self, reply: &AssistantReply) {
        self.replies.emit(reply);
    }

    pub fn sent(&self) -> Vec<(String, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Connecting);
        if !self.reachable.load(Ordering::SeqCst) {
            self.set_status(ConnectionStatus::Error);
            return Err(Error::Connection("unreachable".to_string()));
        }
        self.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn send(&self, message: &str, session_id: Option<&str>) -> Result<()> {
        if self.status() != ConnectionStatus::Connected {
            return Err(Error::NotConnected);
        }
        self.sent
            .lock()
            .unwrap()
            .push((message.to_string(), session_id.map(ToString::to_string)));
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    fn replies(&self) -> &EventBus<AssistantReply> {
        &self.replies
    }

    fn status_changes(&self) -> &EventBus<ConnectionStatus> {
        &self.statuses
    }
}

/// Recognizer whose results are pushed by the test
#[derive(Default)]
pub struct MockRecognizer {
    sink: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: RecognizerEvent) -> bool {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    /// Emit an interim result; returns whether a session received it
    pub fn hear(&self, text: &str) -> bool {
        self.push(RecognizerEvent::Results(vec![RecognitionSegment::interim(
            text, 0.9,
        )]))
    }

    /// Emit a raw result batch
    pub fn results(&self, segments: Vec<RecognitionSegment>) -> bool {
        self.push(RecognizerEvent::Results(segments))
    }

    pub fn fail(&self, message: &str) -> bool {
        self.push(RecognizerEvent::Error(message.to_string()))
    }

    pub fn end(&self) -> bool {
        self.push(RecognizerEvent::End)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Recognizer for MockRecognizer {
    fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = None;
    }
}

/// Synthesizer that "plays" each utterance by sleeping
pub struct MockSynthesizer {
    duration: Duration,
    failing: AtomicBool,
    spoken: Mutex<Vec<String>>,
    options: Mutex<Vec<SpeakOptions>>,
    cancels: AtomicUsize,
    voices: Vec<Voice>,
}

impl MockSynthesizer {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            failing: AtomicBool::new(false),
            spoken: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            voices: vec![
                voice("fr", "Amélie", "fr-CA"),
                voice("en-m", "Daniel", "en-GB"),
                voice("en-f", "Samantha (female)", "en-US"),
            ],
        })
    }

    /// Make subsequent utterances fail halfway through
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn last_options(&self) -> Option<SpeakOptions> {
        self.options.lock().unwrap().last().cloned()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        self.options.lock().unwrap().push(options.clone());

        if self.failing.load(Ordering::SeqCst) {
            tokio::time::sleep(self.duration / 2).await;
            return Err(Error::Synthesis("device lost".to_string()));
        }
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn voice(id: &str, name: &str, lang: &str) -> Voice {
    Voice {
        id: id.to_string(),
        name: name.to_string(),
        lang: lang.to_string(),
    }
}

/// Everything a call needs, wired to mocks
pub struct Rig {
    pub transport: Arc<MockTransport>,
    pub recognizer: Arc<MockRecognizer>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub input: Arc<SpeechInput>,
    pub output: Arc<SpeechOutput>,
    pub coordinator: Arc<ResponseCoordinator>,
}

/// Utterance length used by [`Rig::new`]
pub const UTTERANCE: Duration = Duration::from_millis(500);

impl Rig {
    pub fn new() -> Self {
        let transport = MockTransport::new();
        let recognizer = MockRecognizer::new();
        let synthesizer = MockSynthesizer::new(UTTERANCE);

        let input = Arc::new(SpeechInput::new(recognizer.clone()));
        let output = Arc::new(SpeechOutput::new(synthesizer.clone()));
        let coordinator = ResponseCoordinator::new(transport.clone(), Arc::clone(&output));

        Self {
            transport,
            recognizer,
            synthesizer,
            input,
            output,
            coordinator,
        }
    }
}

/// Collect every event emitted on `bus`
pub fn record<T: Clone + Send + 'static>(bus: &EventBus<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(move |event: &T| sink.lock().unwrap().push(event.clone()));
    seen
}

/// Poll `condition` every 10ms of (usually paused) time, up to 5 seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let spawned tasks run without advancing time
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn product(id: &str, name: &str) -> Product {
    Product {
        id: id.to_string(),
        name: name.to_string(),
        price: 18.5,
        description: "Test coffee".to_string(),
        flavor_notes: vec!["cocoa".to_string()],
        category: "single origin".to_string(),
        roast_level: "dark".to_string(),
        url: format!("https://shop.example/{id}"),
        image_url: format!("https://shop.example/{id}.jpg"),
        relevance_score: 0.9,
        reason: "bold".to_string(),
    }
}

pub fn reply(message: &str, session_id: &str, products: Vec<Product>) -> AssistantReply {
    AssistantReply {
        message: message.to_string(),
        products,
        session_id: session_id.to_string(),
    }
}
