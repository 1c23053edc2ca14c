//! Fallback workers behave like real ones from the outside.

use crate::helpers::{builtin_report, collect_until, fallback_config, names};
use image::{Rgb, RgbImage};
use updogo::capability::{CapabilityId, GENERIC_EVENTS};
use updogo::orchestrator::Handler;
use updogo::supervisor::WorkerSupervisor;
use updogo::worker::{Command, CommandEnvelope, Event, EventEnvelope, Frame};
use std::time::Duration;
use tokio::sync::mpsc;

fn started_supervisor(
    dir: &std::path::Path,
    include_camera: bool,
) -> (WorkerSupervisor, mpsc::UnboundedReceiver<EventEnvelope>) {
    let config = fallback_config(dir);
    let report = builtin_report(&config);
    let (mut supervisor, rx) = WorkerSupervisor::new();
    assert!(supervisor.setup_all(&report, &config).is_empty());
    for wiring in supervisor.wire_all(&Handler::NAMES) {
        assert!(wiring.is_complete(), "{:?}", wiring.errors);
    }
    assert!(supervisor.start_all(include_camera).is_empty());
    (supervisor, rx)
}

fn send(supervisor: &WorkerSupervisor, target: CapabilityId, command: Command) {
    assert!(supervisor.send(CommandEnvelope::new(target, command)));
}

#[tokio::test]
async fn fallback_speak_emits_started_then_finished() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut supervisor, mut rx) = started_supervisor(dir.path(), false);
    send(&supervisor, CapabilityId::Tts, Command::Speak { text: "hello".into() });

    let events = collect_until(&mut rx, |e| e.name() == "speech_finished").await;
    let tts: Vec<_> = events
        .iter()
        .filter(|e| e.source == CapabilityId::Tts)
        .collect();
    assert!(matches!(&tts[0].event, Event::SpeechStarted { text } if text == "hello"));
    assert!(matches!(&tts[tts.len() - 1].event, Event::SpeechFinished { text } if text == "hello"));
    assert_eq!(
        tts.iter().filter(|e| e.name() == "speech_finished").count(),
        1
    );

    supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
}

#[tokio::test]
async fn every_fallback_stays_inside_its_contract() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut supervisor, mut rx) = started_supervisor(dir.path(), true);

    send(&supervisor, CapabilityId::Tts, Command::InitializeEngine);
    send(&supervisor, CapabilityId::Tts, Command::Speak { text: "hi there".into() });
    send(&supervisor, CapabilityId::Stt, Command::StartListening);
    send(
        &supervisor,
        CapabilityId::Emotion,
        Command::AnalyzeText {
            text: "what a great day".into(),
        },
    );
    send(
        &supervisor,
        CapabilityId::Nlp,
        Command::ProcessInput {
            text: "who are you".into(),
        },
    );
    send(
        &supervisor,
        CapabilityId::ImageSave,
        Command::SaveImage {
            frame: Frame::new(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])), 0),
            path: dir.path().join("never.png"),
        },
    );

    let mut pending = vec![
        (CapabilityId::Tts, "speech_finished"),
        (CapabilityId::Tts, "available_voices"),
        (CapabilityId::Stt, "text_recognized"),
        (CapabilityId::Emotion, "emotion_detected"),
        (CapabilityId::Nlp, "processing_complete"),
        (CapabilityId::ImageSave, "error"),
        (CapabilityId::Camera, "frame_ready"),
    ];
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pending.is_empty() {
            let envelope = rx.recv().await.expect("channel open");
            pending.retain(|(source, name)| !(envelope.source == *source && envelope.name() == *name));
            seen.push(envelope);
        }
    })
    .await
    .expect("every capability answered");

    for envelope in &seen {
        let contract = envelope.source.contract();
        assert!(
            contract.declares_event(envelope.name()) || GENERIC_EVENTS.contains(&envelope.name()),
            "{} emitted {}",
            envelope.source,
            envelope.name()
        );
    }
    assert!(seen.iter().any(|e| matches!(
        &e.event,
        Event::EmotionDetected { emotion, .. } if emotion == "happy"
    )));
    assert!(!dir.path().join("never.png").exists());

    let report = supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn fallback_listening_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut supervisor, mut rx) = started_supervisor(dir.path(), false);
    send(&supervisor, CapabilityId::Stt, Command::StartListening);
    let events = collect_until(&mut rx, |e| e.name() == "text_recognized").await;
    assert_eq!(
        names(&events),
        vec!["listening_started", "vad_status", "text_recognized"]
    );

    send(&supervisor, CapabilityId::Stt, Command::StopListening);
    let events = collect_until(&mut rx, |e| e.name() == "listening_stopped").await;
    assert!(names(&events).ends_with(&["vad_status", "listening_stopped"]));

    supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
}

#[tokio::test]
async fn test_pattern_camera_streams_until_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut supervisor, mut rx) = started_supervisor(dir.path(), true);

    let mut frames = 0;
    let events = collect_until(&mut rx, |e| {
        if e.name() == "frame_ready" {
            frames += 1;
        }
        frames >= 3
    })
    .await;
    assert_eq!(events[0].name(), "status");

    send(&supervisor, CapabilityId::Camera, Command::Stop);
    let tail = collect_until(&mut rx, |e| e.source == CapabilityId::Camera && e.name() == "completed").await;
    let camera: Vec<_> = tail
        .iter()
        .filter(|e| e.source == CapabilityId::Camera && e.name() != "frame_ready")
        .map(EventEnvelope::name)
        .collect();
    assert_eq!(camera, vec!["status", "completed"]);

    let report = supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
    assert!(report.is_clean());
}
