//! End-to-end routing through the orchestrator on fallback workers.

use crate::helpers::{RecordingPresenter, Shown, builtin_report, fallback_config};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use updogo::capability::CapabilityId;
use updogo::config::RobotConfig;
use updogo::orchestrator::{Flow, NoticeLevel, Orchestrator, Speaker, UiAction};
use updogo::supervisor::ShutdownOutcome;

fn orchestrator(config: RobotConfig) -> Orchestrator<RecordingPresenter> {
    let report = builtin_report(&config);
    Orchestrator::new(config, report, RecordingPresenter::default())
}

/// Handle events until the presenter shows `item`.
async fn pump_until(orchestrator: &mut Orchestrator<RecordingPresenter>, item: Shown) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !orchestrator.presenter().contains(&item) {
            assert!(orchestrator.process_next_event().await, "event channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{item:?} never shown: {:?}", orchestrator.presenter().shown));
}

/// Handle whatever arrives within `window`.
async fn pump_for(orchestrator: &mut Orchestrator<RecordingPresenter>, window: Duration) {
    let _ = tokio::time::timeout(window, async {
        while orchestrator.process_next_event().await {}
    })
    .await;
}

#[tokio::test]
async fn startup_reports_degraded_capabilities_and_lists_voices() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));

    let warnings = orchestrator.presenter().notices(NoticeLevel::Warning);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("tts, stt, emotion, nlp, camera, image_save"));

    pump_until(
        &mut orchestrator,
        Shown::Voices(1, Some("dummy_voice_en".into())),
    )
    .await;
    assert!(!orchestrator.toggles().camera);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn typed_question_is_answered_and_spoken() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));

    assert_eq!(
        orchestrator.handle_action(UiAction::Say("what is your name".into())),
        Flow::Continue
    );
    pump_until(&mut orchestrator, Shown::Speaking(false)).await;

    let shown = &orchestrator.presenter().shown;
    let position = |item: &Shown| shown.iter().position(|s| s == item).expect("shown");
    let asked = position(&Shown::Message(Speaker::User, "what is your name".into()));
    let answered = position(&Shown::Response("My name is Updog.".into()));
    let started = position(&Shown::Speaking(true));
    let finished = position(&Shown::Speaking(false));
    assert!(asked < answered && answered < started && started < finished);
    assert!(shown.iter().any(|s| matches!(s, Shown::Emotion(_))));
    assert!(!orchestrator.toggles().speaking);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn muted_answers_are_not_spoken() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));

    orchestrator.handle_action(UiAction::Mute);
    orchestrator.handle_action(UiAction::Say("who is your creator".into()));
    pump_until(
        &mut orchestrator,
        Shown::Response("I was created by Umar Ibrahim.".into()),
    )
    .await;
    pump_for(&mut orchestrator, Duration::from_millis(300)).await;
    assert!(!orchestrator.presenter().contains(&Shown::Speaking(true)));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn recognized_speech_follows_the_same_route() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));

    orchestrator.handle_action(UiAction::Listen(true));
    pump_until(&mut orchestrator, Shown::Listening(true)).await;
    pump_until(
        &mut orchestrator,
        Shown::Message(
            Speaker::User,
            "(Voice Input) Fallback voice input: This is a test.".into(),
        ),
    )
    .await;
    pump_until(&mut orchestrator, Shown::Speaking(true)).await;
    assert!(
        orchestrator
            .presenter()
            .shown
            .iter()
            .any(|s| matches!(s, Shown::Response(text) if text.contains("Fallback voice input")))
    );

    orchestrator.handle_action(UiAction::Listen(false));
    pump_until(&mut orchestrator, Shown::Listening(false)).await;
    assert!(!orchestrator.toggles().listening);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn camera_toggle_capture_and_unavailable_saving() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));

    orchestrator.handle_action(UiAction::Capture(None));
    assert_eq!(
        orchestrator.presenter().notices(NoticeLevel::Warning).last(),
        Some(&"Camera is off or no frame available.")
    );

    orchestrator.handle_action(UiAction::Camera(true));
    assert!(orchestrator.toggles().camera);
    pump_until(&mut orchestrator, Shown::Frame(2)).await;
    assert!(orchestrator.last_frame().is_some());

    orchestrator.handle_action(UiAction::Filter("sepia".into()));
    orchestrator.handle_action(UiAction::Capture(Some(dir.path().join("shot.png"))));
    tokio::time::timeout(Duration::from_secs(5), async {
        while !orchestrator
            .presenter()
            .notices(NoticeLevel::Error)
            .iter()
            .any(|n| n.starts_with("Error in image_save"))
        {
            assert!(orchestrator.process_next_event().await);
        }
    })
    .await
    .expect("image_save fallback reported");
    assert!(!dir.path().join("shot.png").exists());

    orchestrator.handle_action(UiAction::Camera(false));
    assert!(!orchestrator.toggles().camera);
    assert!(orchestrator.last_frame().is_none());

    // Turning it back on rebuilds the finished worker.
    pump_for(&mut orchestrator, Duration::from_millis(200)).await;
    orchestrator.handle_action(UiAction::Camera(true));
    assert!(orchestrator.toggles().camera);
    assert!(
        orchestrator
            .supervisor()
            .handle(CapabilityId::Camera)
            .is_some_and(|h| h.is_running())
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn camera_switched_off_and_straight_back_on_stays_on() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));

    orchestrator.handle_action(UiAction::Camera(true));
    pump_for(&mut orchestrator, Duration::from_millis(200)).await;
    orchestrator.handle_action(UiAction::Camera(false));
    orchestrator.handle_action(UiAction::Camera(true));
    pump_for(&mut orchestrator, Duration::from_millis(500)).await;

    assert!(orchestrator.toggles().camera);
    let camera = orchestrator
        .supervisor()
        .handle(CapabilityId::Camera)
        .expect("camera handle");
    assert!(camera.is_running());
    assert_eq!(camera.generation(), 1);
    assert!(orchestrator.last_frame().is_some());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn unknown_filter_is_reported_not_sent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(fallback_config(dir.path()));
    orchestrator.handle_action(UiAction::Filter("vaporwave".into()));
    assert!(
        orchestrator.presenter().notices(NoticeLevel::Warning)
            .iter()
            .any(|n| n.starts_with("Unknown filter: vaporwave"))
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn run_quits_and_shuts_everything_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = orchestrator(fallback_config(dir.path()));
    let (tx, rx) = mpsc::channel(8);
    tx.send(UiAction::Status).await.expect("send");
    tx.send(UiAction::Quit).await.expect("send");

    let (report, presenter) = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.run(rx, CancellationToken::new()),
    )
    .await
    .expect("run returns");

    assert!(presenter.contains(&Shown::Status(0, 6)));
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(
        report.outcome(CapabilityId::Camera),
        Some(ShutdownOutcome::NotRunning)
    );
    assert!(report.is_clean());
}

#[tokio::test]
async fn cancellation_ends_the_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = orchestrator(fallback_config(dir.path()));
    let (_tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (report, _) = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(rx, cancel))
        .await
        .expect("run returns");
    assert!(report.is_clean());
}
