//! Updogo: capability resolution and worker supervision for a chat-driven
//! companion robot.
//!
//! The robot is built from six capabilities (speech synthesis, speech
//! recognition, emotion analysis, language processing, camera and image
//! saving), each of which may be backed by a real device or service or by an
//! inert fallback with the same observable behaviour.
//!
//! # Architecture
//!
//! - **Resolver**: picks a real provider or the fallback for every capability, once, at startup
//! - **Workers**: one task per capability, driven by commands and reporting only through events
//! - **Supervisor**: sets workers up, wires them, starts them and shuts them down within a bound
//! - **Orchestrator**: the single consumer of events and producer of commands, chaining
//!   recognized speech into language processing and answers into speech

pub mod camera;
pub mod capability;
pub mod config;
pub mod diagnostics;
pub mod emotion;
pub mod error;
pub mod image_save;
pub mod nlp;
pub mod orchestrator;
pub mod resolver;
pub mod stt;
pub mod supervisor;
pub mod tts;
pub mod worker;

pub use capability::{CapabilityContract, CapabilityId};
pub use config::RobotConfig;
pub use error::{Result, RobotError};
pub use orchestrator::{Orchestrator, Presenter, UiAction};
pub use resolver::{ModuleResolver, ModuleStatus, Registry, Resolution, ResolutionReport};
pub use supervisor::{ShutdownOutcome, ShutdownReport, WorkerSupervisor};
pub use worker::{Command, CommandEnvelope, Event, EventEnvelope, Worker, WorkerState};
