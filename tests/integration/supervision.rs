//! Worker lifecycle under the supervisor: isolation, ordering, bounded shutdown.

use crate::helpers::{
    Misbehaviour, MisbehavingProvider, builtin_report, collect_until, fallback_config, names,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use updogo::capability::CapabilityId;
use updogo::config::RobotConfig;
use updogo::orchestrator::Handler;
use updogo::resolver::{ProviderKind, Resolution, ResolutionReport, WorkerProvider};
use updogo::supervisor::{ShutdownOutcome, WiringError, WorkerSupervisor};
use updogo::worker::{Command, CommandEnvelope, Event, Worker, WorkerState};
use updogo::{Result, RobotError};

/// Fallback-kind provider whose constructor always fails.
struct BrokenProvider(CapabilityId);

impl WorkerProvider for BrokenProvider {
    fn name(&self) -> &str {
        "broken"
    }

    fn capability(&self) -> CapabilityId {
        self.0
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        self.0.contract().commands
    }

    fn events(&self) -> &'static [&'static str] {
        self.0.contract().events
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, _config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Err(RobotError::Setup("model file missing".into()))
    }
}

fn single(provider: Arc<dyn WorkerProvider>) -> ResolutionReport {
    ResolutionReport::from_resolutions([(
        provider.capability(),
        Resolution::Fallback {
            provider,
            reason: "test".into(),
        },
    )])
}

async fn wait_for_state(supervisor: &WorkerSupervisor, capability: CapabilityId, state: WorkerState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while supervisor.states().get(&capability) != Some(&state) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker reached expected state");
}

#[tokio::test]
async fn one_broken_constructor_does_not_stop_the_rest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fallback_config(dir.path());
    let mut resolutions: Vec<_> = builtin_report(&config)
        .iter()
        .map(|(capability, resolution)| (capability, resolution.clone()))
        .collect();
    for (capability, resolution) in &mut resolutions {
        if *capability == CapabilityId::Nlp {
            *resolution = Resolution::Fallback {
                provider: Arc::new(BrokenProvider(CapabilityId::Nlp)),
                reason: "forced by configuration".into(),
            };
        }
    }
    let report = ResolutionReport::from_resolutions(resolutions);

    let (mut supervisor, mut rx) = WorkerSupervisor::new();
    assert_eq!(supervisor.setup_all(&report, &config), vec![CapabilityId::Nlp]);
    let wiring = supervisor.wire_all(&Handler::NAMES);
    let nlp = wiring
        .iter()
        .find(|w| w.capability == CapabilityId::Nlp)
        .expect("nlp wiring");
    assert_eq!(nlp.errors, vec![WiringError::NotSetUp]);
    assert_eq!(wiring.iter().filter(|w| w.is_complete()).count(), 5);

    assert!(supervisor.start_all(false).is_empty());
    assert!(!supervisor.send(CommandEnvelope::new(
        CapabilityId::Nlp,
        Command::ProcessInput { text: "hi".into() }
    )));
    assert!(supervisor.send(CommandEnvelope::new(
        CapabilityId::Tts,
        Command::Speak { text: "still here".into() }
    )));
    collect_until(&mut rx, |e| e.name() == "speech_finished").await;

    let states = supervisor.states();
    assert_eq!(states[&CapabilityId::Nlp], WorkerState::Failed);
    assert_eq!(states[&CapabilityId::Camera], WorkerState::Constructed);
    assert!(states[&CapabilityId::Tts].is_active());

    let report = supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
    assert_eq!(report.outcome(CapabilityId::Nlp), Some(ShutdownOutcome::NotRunning));
    assert!(report.is_clean());
}

#[tokio::test]
async fn stop_is_idempotent_and_completes_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fallback_config(dir.path());
    let (mut supervisor, mut rx) = WorkerSupervisor::new();
    supervisor.setup_all(&builtin_report(&config), &config);
    supervisor.wire_all(&Handler::NAMES);
    supervisor.start_all(false);

    assert!(supervisor.stop(CapabilityId::Emotion));
    assert!(supervisor.stop(CapabilityId::Emotion));
    let events = collect_until(&mut rx, |e| e.source == CapabilityId::Emotion && e.name() == "completed").await;
    assert_eq!(names(&events), vec!["completed"]);
    wait_for_state(&supervisor, CapabilityId::Emotion, WorkerState::Stopped).await;
    assert!(supervisor.stop(CapabilityId::Emotion));

    assert!(!supervisor.send(CommandEnvelope::new(
        CapabilityId::Emotion,
        Command::AnalyzeText { text: "late".into() }
    )));
    let report = supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
    assert_eq!(
        report.outcome(CapabilityId::Emotion),
        Some(ShutdownOutcome::NotRunning)
    );
    assert!(rx.try_recv().map_or(true, |e| e.source != CapabilityId::Emotion));
}

#[tokio::test]
async fn events_arrive_in_emission_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fallback_config(dir.path());
    let (mut supervisor, mut rx) = WorkerSupervisor::new();
    supervisor.setup_all(&builtin_report(&config), &config);
    supervisor.wire_all(&Handler::NAMES);
    supervisor.start_all(true);
    assert!(supervisor.send(CommandEnvelope::new(
        CapabilityId::Tts,
        Command::Speak {
            text: "one two three".into()
        }
    )));

    let events = collect_until(&mut rx, |e| e.name() == "speech_finished").await;
    let words: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.event {
            Event::SpeechWordBoundary { word, .. } => Some(word.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(words, vec!["one", "two", "three"]);

    let sequences: Vec<u64> = events
        .iter()
        .filter_map(|e| match &e.event {
            Event::FrameReady(frame) => Some(frame.sequence),
            _ => None,
        })
        .collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{sequences:?}");

    supervisor
        .shutdown_all(Duration::from_secs(1), Duration::from_millis(200))
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_ignoring_stop_is_force_terminated_within_bound() {
    let provider: Arc<dyn WorkerProvider> = Arc::new(MisbehavingProvider {
        capability: CapabilityId::Camera,
        misbehaviour: Misbehaviour::IgnoresStop,
    });
    let (mut supervisor, mut rx) = WorkerSupervisor::new();
    supervisor.setup_all(&single(provider), &RobotConfig::default());
    supervisor.wire_all(&Handler::NAMES);
    supervisor.start(CapabilityId::Camera).expect("start");
    wait_for_state(&supervisor, CapabilityId::Camera, WorkerState::Running).await;

    let timeout = Duration::from_millis(200);
    let grace = Duration::from_millis(200);
    let started = Instant::now();
    let report = supervisor.shutdown_all(timeout, grace).await;

    assert!(started.elapsed() < timeout + grace + Duration::from_millis(500));
    assert_eq!(
        report.outcome(CapabilityId::Camera),
        Some(ShutdownOutcome::ForcedTermination)
    );
    assert!(!report.is_clean());
    assert_eq!(supervisor.states()[&CapabilityId::Camera], WorkerState::Stopped);
    // An aborted worker never reaches its completion path.
    assert!(rx.try_recv().map_or(true, |e| e.name() != "completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_blocking_its_thread_is_abandoned() {
    let provider: Arc<dyn WorkerProvider> = Arc::new(MisbehavingProvider {
        capability: CapabilityId::Camera,
        misbehaviour: Misbehaviour::Blocks(Duration::from_millis(800)),
    });
    let (mut supervisor, _rx) = WorkerSupervisor::new();
    supervisor.setup_all(&single(provider), &RobotConfig::default());
    supervisor.wire_all(&Handler::NAMES);
    supervisor.start(CapabilityId::Camera).expect("start");
    wait_for_state(&supervisor, CapabilityId::Camera, WorkerState::Running).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let report = supervisor
        .shutdown_all(Duration::from_millis(100), Duration::from_millis(100))
        .await;

    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(
        report.outcome(CapabilityId::Camera),
        Some(ShutdownOutcome::TerminationFailed)
    );
    assert_eq!(supervisor.states()[&CapabilityId::Camera], WorkerState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_of_many_workers_is_bounded_per_worker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fallback_config(dir.path());
    let mut resolutions: Vec<_> = builtin_report(&config)
        .iter()
        .map(|(capability, resolution)| (capability, resolution.clone()))
        .collect();
    for (capability, resolution) in &mut resolutions {
        if *capability == CapabilityId::Camera {
            *resolution = Resolution::Fallback {
                provider: Arc::new(MisbehavingProvider {
                    capability: CapabilityId::Camera,
                    misbehaviour: Misbehaviour::IgnoresStop,
                }),
                reason: "test".into(),
            };
        }
    }
    let (mut supervisor, _rx) = WorkerSupervisor::new();
    supervisor.setup_all(&ResolutionReport::from_resolutions(resolutions), &config);
    supervisor.wire_all(&Handler::NAMES);
    assert!(supervisor.start_all(true).is_empty());
    wait_for_state(&supervisor, CapabilityId::Camera, WorkerState::Running).await;

    let timeout = Duration::from_millis(150);
    let grace = Duration::from_millis(100);
    let report = supervisor.shutdown_all(timeout, grace).await;

    assert!(report.elapsed < (timeout + grace) * 6 + Duration::from_millis(500));
    for (capability, outcome) in &report.outcomes {
        let expected = if *capability == CapabilityId::Camera {
            ShutdownOutcome::ForcedTermination
        } else {
            ShutdownOutcome::Graceful
        };
        assert_eq!(*outcome, expected, "{capability}");
    }
}
