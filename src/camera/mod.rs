//! Camera capture.
//!
//! The camera worker is the only looping worker. Each iteration drains
//! pending commands, reads one frame on a blocking thread, applies the
//! selected [`CameraFilter`] and emits `frame_ready`. The device is dropped
//! before the worker reports `completed`, on every exit path.

pub mod device;
pub mod filters;

pub use device::{FrameDevice, ReplayDevice, TestPatternDevice};
pub use filters::CameraFilter;

use crate::capability::CapabilityId;
use crate::config::{CameraConfig, RobotConfig};
use crate::error::{Result, RobotError};
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, CommandInbox, Event, Frame, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) const CAMERA_COMMANDS: &[&str] = &["set_filter", "stop"];
pub(crate) const CAMERA_EVENTS: &[&str] = &["frame_ready", "error"];

const STATUS_DURATION: Duration = Duration::from_secs(2);

/// Opens the capture device. Called on a blocking thread each time the
/// worker starts.
pub type DeviceOpener = Arc<dyn Fn() -> Result<Box<dyn FrameDevice>> + Send + Sync>;

pub struct CameraWorker {
    opener: DeviceOpener,
    filter: CameraFilter,
    frame_interval: Duration,
}

impl CameraWorker {
    pub fn new(opener: DeviceOpener, config: &CameraConfig) -> Self {
        let filter = CameraFilter::parse(&config.filter).unwrap_or_else(|| {
            warn!(filter = config.filter.as_str(), "unknown camera filter, using None");
            CameraFilter::None
        });
        Self {
            opener,
            filter,
            frame_interval: Duration::from_millis(config.frame_interval_ms.max(1)),
        }
    }

    pub fn filter(&self) -> CameraFilter {
        self.filter
    }

    fn apply_command(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        match command {
            Command::SetFilter { key } => match CameraFilter::parse(&key) {
                Some(filter) => {
                    info!(%filter, "camera filter set");
                    self.filter = filter;
                }
                None => warn!(filter = key.as_str(), "unknown camera filter ignored"),
            },
            Command::Stop => ctx.request_stop(),
            other => return Err(unsupported(CapabilityId::Camera, &other)),
        }
        Ok(())
    }

    async fn open(&self) -> Result<Box<dyn FrameDevice>> {
        let opener = Arc::clone(&self.opener);
        tokio::task::spawn_blocking(move || opener())
            .await
            .map_err(|e| RobotError::Device(format!("camera open aborted: {e}")))?
    }

    /// Read and filter one frame off the executor. The device comes back
    /// unless the blocking thread panicked, in which case it is gone.
    async fn capture(
        &self,
        mut device: Box<dyn FrameDevice>,
    ) -> Result<(Box<dyn FrameDevice>, Option<image::RgbImage>)> {
        let filter = self.filter;
        let (device, read) = tokio::task::spawn_blocking(move || {
            let read = device.read_frame().map(|frame| frame.map(|f| filter.apply(f)));
            (device, read)
        })
        .await
        .map_err(|e| RobotError::Device(format!("capture thread failed: {e}")))?;
        match read {
            Ok(frame) => Ok((device, frame)),
            Err(e) => {
                drop(device);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Worker for CameraWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Camera
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        self.apply_command(command, ctx)
    }

    async fn run_loop(&mut self, inbox: &mut CommandInbox, ctx: &WorkerContext) -> Result<()> {
        let mut device = Some(self.open().await?);
        ctx.mark_running();
        info!(filter = %self.filter, "camera stream started");
        ctx.status("Camera stream started.", STATUS_DURATION);

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0_u64;

        let outcome = loop {
            while let Some(command) = inbox.try_recv() {
                if let Err(e) = self.apply_command(command, ctx) {
                    ctx.error(e.to_string());
                }
            }
            if ctx.is_stopping() {
                break Ok(());
            }
            let Some(current) = device.take() else {
                break Ok(());
            };
            match self.capture(current).await {
                Ok((returned, Some(image))) => {
                    device = Some(returned);
                    sequence += 1;
                    ctx.emit(Event::FrameReady(Frame::new(image, sequence)));
                }
                Ok((returned, None)) => {
                    device = Some(returned);
                    warn!("camera stream ended");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
            tokio::select! {
                _ = ticker.tick() => {}
                () = ctx.stopped() => {}
            }
        };

        drop(device);
        debug!(frames = sequence, "camera released");
        ctx.status("Camera stream stopped.", STATUS_DURATION);
        outcome
    }
}

fn replay_source(config: &CameraConfig) -> Result<&std::path::Path> {
    let source = config
        .source
        .as_deref()
        .ok_or_else(|| RobotError::Device("no camera source configured".to_owned()))?;
    if !source.is_dir() {
        return Err(RobotError::Device(format!(
            "camera source {} is not a directory",
            source.display()
        )));
    }
    Ok(source)
}

/// Camera replaying the images under `camera.source`.
pub struct ReplayCameraProvider;

impl WorkerProvider for ReplayCameraProvider {
    fn name(&self) -> &str {
        "replay-camera"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Camera
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        CAMERA_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        CAMERA_EVENTS
    }

    fn probe(&self, config: &RobotConfig) -> Result<()> {
        replay_source(&config.camera).map(|_| ())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        let source = replay_source(&config.camera)?.to_path_buf();
        let (width, height) = (config.camera.width, config.camera.height);
        let opener: DeviceOpener = Arc::new(move || {
            ReplayDevice::open(&source, width, height).map(|d| Box::new(d) as Box<dyn FrameDevice>)
        });
        Ok(Box::new(CameraWorker::new(opener, &config.camera)))
    }
}

/// Camera rendering a synthetic test pattern.
pub struct TestPatternCameraProvider;

impl WorkerProvider for TestPatternCameraProvider {
    fn name(&self) -> &str {
        "test-pattern-camera"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Camera
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        CAMERA_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        CAMERA_EVENTS
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        let (width, height) = (config.camera.width, config.camera.height);
        let opener: DeviceOpener =
            Arc::new(move || Ok(Box::new(TestPatternDevice::new(width, height)) as Box<dyn FrameDevice>));
        Ok(Box::new(CameraWorker::new(opener, &config.camera)))
    }
}
