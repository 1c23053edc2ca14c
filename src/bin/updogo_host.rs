//! Console host for updogo.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use updogo::orchestrator::{NoticeLevel, Speaker};
use updogo::worker::{Frame, NlpResponse, Voice};
use updogo::{
    CapabilityId, ModuleResolver, ModuleStatus, Orchestrator, Presenter, Registry, RobotConfig,
    UiAction, WorkerState,
};

/// Updogo: a chat-driven companion robot on whatever hardware is present.
#[derive(Parser)]
#[command(name = "updogo-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the robot, reading chat input and /commands from stdin.
    Run,

    /// Resolve every capability and print the module status as JSON.
    Status,

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(RobotConfig::default_config_path);
    let config = RobotConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config),
        Command::Status => print_status(&config),
        Command::Config => {
            let rendered = toml::to_string_pretty(&config).context("rendering configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn print_status(config: &RobotConfig) -> anyhow::Result<()> {
    let registry = Registry::builtin().context("building provider registry")?;
    let report = ModuleResolver::new(&registry, config).resolve_all();
    let status = report.get_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn run(config: RobotConfig) -> anyhow::Result<()> {
    let _log_guard = updogo::diagnostics::init_logging(&config.logging).context("initialising logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "updogo starting");

    let grace = config.supervisor.terminate_grace();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("updogo-rt")
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(serve(config));
    // Blocking threads still held by abandoned workers must not keep the process alive.
    runtime.shutdown_timeout(grace);
    result
}

async fn serve(config: RobotConfig) -> anyhow::Result<()> {
    let registry = Registry::builtin().context("building provider registry")?;
    let report = ModuleResolver::new(&registry, &config).resolve_all();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (actions_tx, actions_rx) = mpsc::channel(32);
    // A pending stdin read cannot be cancelled, so it lives outside the runtime.
    std::thread::Builder::new()
        .name("updogo-stdin".to_owned())
        .spawn(move || read_actions(&actions_tx))
        .context("spawning stdin reader")?;

    println!("Updogo v{}. Type /help for commands.", env!("CARGO_PKG_VERSION"));
    let orchestrator = Orchestrator::new(config, report, ConsolePresenter::default());
    let (shutdown, _presenter) = orchestrator.run(actions_rx, cancel).await;

    for (capability, outcome) in &shutdown.outcomes {
        if !matches!(
            outcome,
            updogo::ShutdownOutcome::Graceful | updogo::ShutdownOutcome::NotRunning
        ) {
            warn!(%capability, %outcome, "unclean worker shutdown");
        }
    }
    info!(elapsed_ms = shutdown.elapsed.as_millis() as u64, "updogo stopped");
    Ok(())
}

/// Forward parsed stdin lines to the orchestrator until EOF or until the
/// orchestrator stops listening.
fn read_actions(tx: &mpsc::Sender<UiAction>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        match UiAction::parse_line(&line) {
            Ok(Some(action)) => {
                if tx.blocking_send(action).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("{e}"),
        }
    }
}

#[derive(Default)]
struct ConsolePresenter {
    frames: u64,
}

impl Presenter for ConsolePresenter {
    fn show_message(&mut self, speaker: Speaker, text: &str) {
        match speaker {
            Speaker::User => println!("you> {text}"),
            Speaker::Robot => println!("updogo> {text}"),
        }
    }

    fn show_response(&mut self, response: &NlpResponse) {
        let text: String = response
            .display
            .iter()
            .map(|(_, segment)| segment.as_str())
            .collect();
        let text = if text.is_empty() {
            response.text_to_speak.as_str()
        } else {
            text.as_str()
        };
        println!("updogo> {text}");
    }

    fn show_notice(&mut self, level: NoticeLevel, message: &str, _duration: Option<Duration>) {
        match level {
            NoticeLevel::Info => println!("[info] {message}"),
            NoticeLevel::Warning => println!("[warn] {message}"),
            NoticeLevel::Error => println!("[error] {message}"),
        }
    }

    fn set_listening(&mut self, listening: bool) {
        println!("[mic {}]", if listening { "on" } else { "off" });
    }

    fn set_expression(&mut self, emotion: &str) {
        println!("[expression: {emotion}]");
    }

    fn show_frame(&mut self, frame: &Frame) {
        self.frames += 1;
        if self.frames % 100 == 1 {
            tracing::debug!(sequence = frame.sequence, width = frame.width(), height = frame.height(), "frame");
        }
    }

    fn set_camera_active(&mut self, active: bool) {
        if !active {
            self.frames = 0;
        }
        println!("[camera {}]", if active { "on" } else { "off" });
    }

    fn show_voices(&mut self, voices: &[Voice], selected: Option<&str>) {
        println!("[{} voices, using {}]", voices.len(), selected.unwrap_or("none"));
    }

    fn show_status(&mut self, status: &ModuleStatus, states: &BTreeMap<CapabilityId, WorkerState>) {
        for capability in CapabilityId::ALL {
            let backend = if status.fallback.contains(&capability) {
                "fallback"
            } else {
                "real"
            };
            let state = states
                .get(&capability)
                .map_or_else(|| "absent".to_owned(), |s| format!("{s:?}"));
            println!("  {:<10} {backend:<8} {state}", capability.as_str());
        }
        for failure in &status.failures {
            println!("  ! {failure}");
        }
    }

    fn clear(&mut self) {
        print!("\x1b[2J\x1b[H");
    }
}
