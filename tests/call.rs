//! Call session integration tests
//!
//! Drives whole calls against in-memory transport and speech engines, on a
//! paused clock so silence timeouts and playback lengths are exact.

use std::time::Duration;

use barista_call::call::{CallConfig, CallControl, CallSession, CallState, Role};
use barista_call::{ConnectionStatus, Error, SpeechInput, SpeechStatus, Transport};

mod common;
use common::{Rig, UTTERANCE, product, record, reply, settle, wait_for};

const SILENCE: Duration = Duration::from_millis(2000);

fn config() -> CallConfig {
    CallConfig {
        caller_name: "Ada".to_string(),
        ..CallConfig::default()
    }
}

/// Start a call and wait until the greeting is done
async fn listening_call(rig: &Rig) -> CallSession {
    let session = CallSession::start(rig.coordinator.clone(), rig.input.clone(), config()).unwrap();
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    assert!(wait_for(|| session.is_listening()).await);
    session
}

/// Speak `text` and let the silence timer forward it
async fn say(rig: &Rig, session: &CallSession, text: &str) {
    assert!(rig.recognizer.hear(text));
    assert!(wait_for(|| session.state() != CallState::Listening).await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_greet_then_listen() {
    let rig = Rig::new();
    let session = CallSession::start(rig.coordinator.clone(), rig.input.clone(), config()).unwrap();
    let states = record(session.state_changes());

    assert_eq!(session.state(), CallState::Connecting);
    assert!(wait_for(|| session.state() == CallState::Listening).await);

    assert_eq!(
        *states.lock().unwrap(),
        vec![CallState::Greeting, CallState::Listening]
    );
    assert_eq!(rig.transport.connects(), 1);

    let spoken = rig.synthesizer.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].starts_with("Hello Ada! I'm Rebecca"));

    let conversation = session.conversation();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].role, Role::Assistant);
    assert_eq!(conversation[0].text, spoken[0]);

    assert!(wait_for(|| session.is_listening()).await);
    assert_eq!(rig.recognizer.starts(), 1);
    assert_eq!(session.status_message(), "AI is listening...");
}

#[tokio::test(start_paused = true)]
async fn test_greeting_uses_reply_voice() {
    let rig = Rig::new();
    let _session = listening_call(&rig).await;

    let options = rig.synthesizer.last_options().unwrap();
    assert_eq!(options.voice.unwrap().id, "en-f");
    assert!((options.rate - 0.9).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_already_connected_transport_greets_immediately() {
    let rig = Rig::new();
    rig.coordinator.connect().await.unwrap();

    let session = CallSession::start(rig.coordinator.clone(), rig.input.clone(), config()).unwrap();
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    assert_eq!(rig.transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_transcripts_forward_once_after_silence() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    let transcripts = record(session.transcript_updates());

    assert!(rig.recognizer.hear("find"));
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(rig.recognizer.hear("find me"));
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(rig.recognizer.hear("find me coffee"));

    // Just short of the timeout after the last update
    tokio::time::sleep(SILENCE - Duration::from_millis(100)).await;
    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(session.current_transcript(), "find me coffee");
    assert!(rig.transport.sent().is_empty());

    assert!(wait_for(|| session.state() == CallState::Processing).await);
    assert_eq!(
        rig.transport.sent(),
        vec![("find me coffee".to_string(), None)]
    );
    assert!(!session.is_listening());
    assert_eq!(session.current_transcript(), "");

    let last = session.conversation().pop().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.text, "find me coffee");

    assert_eq!(
        *transcripts.lock().unwrap(),
        vec!["find", "find me", "find me coffee", ""]
    );

    // Nothing else goes out
    tokio::time::sleep(SILENCE * 3).await;
    assert_eq!(rig.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reply_is_spoken_and_products_update() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    say(&rig, &session, "something bold").await;
    assert_eq!(session.state(), CallState::Processing);

    rig.transport.deliver(&reply(
        "Here are two bold picks",
        "s-1",
        vec![product("p1", "Sumatra"), product("p2", "Monsoon Malabar")],
    ));

    assert_eq!(rig.output.status(), SpeechStatus::Speaking);
    assert!(rig.input.is_blocked());
    let ids: Vec<String> = rig
        .coordinator
        .products()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec!["p1", "p2"]);

    assert!(wait_for(|| session.state() == CallState::Speaking).await);
    assert_eq!(
        rig.synthesizer.spoken().last().map(String::as_str),
        Some("Here are two bold picks")
    );
    assert_eq!(session.status_message(), "Rebecca is responding...");

    // Playback ends, listening resumes
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    assert!(wait_for(|| session.is_listening()).await);
    assert!(!rig.input.is_blocked());
    assert_eq!(rig.recognizer.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_results_during_speech_are_never_forwarded() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    let transcripts = record(session.transcript_updates());

    // A reply starts playing while the caller's recognizer is still live
    rig.transport
        .deliver(&reply("Let me tell you about our espresso", "s-1", vec![]));

    // Already in flight from the recognizer when the block lands
    assert!(rig.recognizer.hear("let me tell you about"));
    settle().await;

    assert_eq!(session.state(), CallState::Speaking);
    assert!(!session.is_listening());
    assert!(!rig.recognizer.hear("our espresso"));
    assert!(transcripts.lock().unwrap().is_empty());

    // Through playback and well past the silence timeout
    tokio::time::sleep(UTTERANCE + SILENCE * 2).await;
    assert!(rig.transport.sent().is_empty());
    assert_eq!(session.state(), CallState::Listening);
    assert!(session.conversation().iter().all(|m| m.role != Role::User));
}

#[tokio::test(start_paused = true)]
async fn test_replacing_reply_keeps_recognizer_off() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    say(&rig, &session, "what's new").await;

    rig.transport.deliver(&reply("First, our seasonal blend", "s-1", vec![]));
    assert!(wait_for(|| session.state() == CallState::Speaking).await);
    let starts = rig.recognizer.starts();
    let states = record(session.state_changes());

    // Second reply cuts into the first one
    rig.transport.deliver(&reply("Actually, try the cold brew", "s-1", vec![]));
    settle().await;

    assert_eq!(rig.output.status(), SpeechStatus::Speaking);
    assert_eq!(rig.recognizer.starts(), starts);
    assert!(rig.input.is_blocked());
    assert!(!session.is_listening());
    assert_eq!(session.state(), CallState::Speaking);
    assert!(states.lock().unwrap().is_empty());
    assert_eq!(rig.synthesizer.cancels(), 1);

    // Only the end of the replacement reopens the microphone
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    assert!(wait_for(|| session.is_listening()).await);
    assert_eq!(rig.recognizer.starts(), starts + 1);
    assert_eq!(*states.lock().unwrap(), vec![CallState::Listening]);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_error_falls_back_to_listening() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    say(&rig, &session, "decaf please").await;

    rig.synthesizer.set_failing(true);
    rig.transport.deliver(&reply("Our decaf is", "s-1", vec![]));

    assert!(wait_for(|| session.state() == CallState::Speaking).await);
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    assert_eq!(rig.output.status(), SpeechStatus::Idle);
    assert!(wait_for(|| session.is_listening()).await);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_returns_to_listening() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    let states = record(session.state_changes());

    rig.transport.set_status(ConnectionStatus::Disconnected);
    assert!(rig.recognizer.hear("hello?"));

    assert!(wait_for(|| states.lock().unwrap().len() >= 2).await);
    assert_eq!(
        *states.lock().unwrap(),
        vec![CallState::Processing, CallState::Listening]
    );
    assert!(rig.transport.sent().is_empty());
    assert!(wait_for(|| session.is_listening()).await);
    assert_eq!(rig.recognizer.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_id_round_trip() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;

    say(&rig, &session, "first").await;
    rig.transport.deliver(&reply("one", "s-1", vec![]));
    assert!(wait_for(|| session.state() == CallState::Listening && session.is_listening()).await);

    say(&rig, &session, "second").await;
    rig.transport.deliver(&reply("two", "s-2", vec![]));
    assert!(wait_for(|| session.state() == CallState::Listening && session.is_listening()).await);

    say(&rig, &session, "third").await;

    assert_eq!(
        rig.transport.sent(),
        vec![
            ("first".to_string(), None),
            ("second".to_string(), Some("s-1".to_string())),
            ("third".to_string(), Some("s-2".to_string())),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_whitespace_transcript_is_never_forwarded() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;

    assert!(rig.recognizer.hear("   "));
    assert!(rig.recognizer.hear("\t\n"));
    tokio::time::sleep(SILENCE * 2).await;

    assert!(rig.transport.sent().is_empty());
    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(session.conversation().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_low_confidence_results_are_ignored() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;

    assert!(rig.recognizer.results(vec![
        barista_call::voice::RecognitionSegment::final_text("mumble", 0.1),
    ]));
    tokio::time::sleep(SILENCE * 2).await;

    assert!(rig.transport.sent().is_empty());
    assert_eq!(session.current_transcript(), "");
}

#[tokio::test(start_paused = true)]
async fn test_mute_stops_listening_without_state_change() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;

    assert!(rig.recognizer.hear("half a sen"));
    assert!(session.toggle_mute().await);
    assert!(session.is_muted());
    assert_eq!(session.state(), CallState::Listening);
    assert!(!session.is_listening());
    assert!(!rig.recognizer.hear("tence"));

    // The pending utterance was dropped with the timer
    tokio::time::sleep(SILENCE * 2).await;
    assert!(rig.transport.sent().is_empty());

    assert!(!session.toggle_mute().await);
    assert!(wait_for(|| session.is_listening()).await);

    say(&rig, &session, "a latte").await;
    assert_eq!(rig.transport.sent(), vec![("a latte".to_string(), None)]);
}

#[tokio::test(start_paused = true)]
async fn test_recognition_error_stops_listening() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;

    assert!(rig.recognizer.fail("microphone unplugged"));
    assert!(wait_for(|| !session.is_listening()).await);

    tokio::time::sleep(SILENCE).await;
    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(rig.recognizer.starts(), 1);
    assert_eq!(session.status_message(), "Ready to listen");
}

#[tokio::test(start_paused = true)]
async fn test_engine_end_restarts_recognition() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;

    assert!(rig.recognizer.end());
    assert!(wait_for(|| rig.recognizer.starts() == 2).await);
    assert!(session.is_listening());

    say(&rig, &session, "still here").await;
    assert_eq!(rig.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_speaking_returns_to_listening() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    say(&rig, &session, "tell me everything").await;

    rig.transport
        .deliver(&reply("This is a very long answer", "s-1", vec![]));
    assert!(wait_for(|| session.state() == CallState::Speaking).await);

    session.stop_speaking();
    assert_eq!(rig.output.status(), SpeechStatus::Stopped);
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    assert!(wait_for(|| session.is_listening()).await);
}

#[tokio::test(start_paused = true)]
async fn test_in_call_controls() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    say(&rig, &session, "surprise me").await;

    rig.transport
        .deliver(&reply("Have you tried a Gibraltar?", "s-1", vec![]));
    assert!(wait_for(|| session.state() == CallState::Speaking).await);

    session.control(CallControl::PauseSpeech).await;
    assert_eq!(rig.output.status(), SpeechStatus::Paused);
    assert_eq!(session.state(), CallState::Speaking);
    assert!(!session.is_listening());

    session.control(CallControl::ResumeSpeech).await;
    assert_eq!(rig.output.status(), SpeechStatus::Speaking);

    session.control(CallControl::ToggleMute).await;
    assert!(session.is_muted());

    session.control(CallControl::StopSpeaking).await;
    assert!(wait_for(|| session.state() == CallState::Listening).await);
    settle().await;
    assert!(!session.is_listening());
    assert_eq!(session.status_message(), "Ready to listen");

    session.control(CallControl::ToggleMute).await;
    assert!(!session.is_muted());
    assert!(wait_for(|| session.is_listening()).await);
    assert_eq!(session.status_message(), "AI is listening...");

    session.control(CallControl::HangUp).await;
    assert_eq!(session.state(), CallState::Ended);
    assert_eq!(rig.transport.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_call_is_idempotent() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    let states = record(session.state_changes());

    session.end_call().await;
    session.end_call().await;

    assert_eq!(session.state(), CallState::Ended);
    assert_eq!(*states.lock().unwrap(), vec![CallState::Ended]);
    assert_eq!(rig.transport.disconnects(), 1);
    assert_eq!(rig.transport.status(), ConnectionStatus::Disconnected);
    assert!(!session.is_listening());
    assert!(!rig.input.is_blocked());
    assert_eq!(session.status_message(), "Call ended");
    assert!(rig.coordinator.session_id().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_end_call_during_greeting() {
    let rig = Rig::new();
    let session = CallSession::start(rig.coordinator.clone(), rig.input.clone(), config()).unwrap();
    assert!(wait_for(|| session.state() == CallState::Greeting).await);

    session.end_call().await;
    tokio::time::sleep(UTTERANCE * 4).await;

    assert_eq!(session.state(), CallState::Ended);
    assert_eq!(rig.recognizer.starts(), 0);
    assert!(session.conversation().is_empty());
    assert!(!rig.output.is_speaking());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_hangs_up() {
    let rig = Rig::new();
    let session = listening_call(&rig).await;
    drop(session);

    assert!(wait_for(|| rig.transport.disconnects() == 1).await);
    assert!(!rig.input.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_assistant_stays_connecting() {
    let rig = Rig::new();
    rig.transport.set_unreachable();

    let session = CallSession::start(rig.coordinator.clone(), rig.input.clone(), config()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(session.state(), CallState::Connecting);
    assert_eq!(rig.transport.status(), ConnectionStatus::Error);
    assert!(rig.synthesizer.spoken().is_empty());
    assert_eq!(session.status_message(), "Connecting to Rebecca...");
}

#[tokio::test]
async fn test_missing_speech_capability_refuses_to_start() {
    let rig = Rig::new();
    let deaf = std::sync::Arc::new(SpeechInput::unsupported());

    let result = CallSession::start(rig.coordinator.clone(), deaf, config());
    assert!(matches!(result, Err(Error::Unsupported(_))));
    assert_eq!(rig.transport.connects(), 0);
}
