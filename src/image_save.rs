//! Snapshot persistence.

use crate::capability::CapabilityId;
use crate::config::RobotConfig;
use crate::error::{Result, RobotError};
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, Frame, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub(crate) const IMAGE_SAVE_COMMANDS: &[&str] = &["save_image"];
pub(crate) const IMAGE_SAVE_EVENTS: &[&str] = &["image_saved", "error"];

const SAVED_STATUS_DURATION: Duration = Duration::from_secs(3);

/// Write `frame` to `path`; the format follows the extension.
///
/// # Errors
///
/// Returns an error if the directory cannot be created, the extension is
/// not a supported image format, or encoding fails.
pub fn write_frame(frame: &Frame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    frame.image.save(path)?;
    Ok(())
}

/// Saves frames to disk on a blocking thread.
#[derive(Default)]
pub struct DiskImageSaveWorker;

#[async_trait]
impl Worker for DiskImageSaveWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::ImageSave
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        let (frame, path) = match command {
            Command::SaveImage { frame, path } => (frame, path),
            other => return Err(unsupported(CapabilityId::ImageSave, &other)),
        };
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_frame(&frame, &target))
            .await
            .map_err(|e| RobotError::Image(format!("save task failed: {e}")))??;

        info!(path = %path.display(), "image saved");
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        ctx.emit(Event::ImageSaved { path });
        ctx.status(format!("Saved: {name}"), SAVED_STATUS_DURATION);
        Ok(())
    }
}

/// Reports every save request as unavailable.
#[derive(Default)]
pub struct UnavailableImageSaveWorker;

#[async_trait]
impl Worker for UnavailableImageSaveWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::ImageSave
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        let path: PathBuf = match command {
            Command::SaveImage { path, .. } => path,
            other => return Err(unsupported(CapabilityId::ImageSave, &other)),
        };
        debug!(path = %path.display(), "fallback call: save_image");
        ctx.error(format!(
            "Image saving is unavailable; {} was not written.",
            path.display()
        ));
        Ok(())
    }
}

pub struct DiskImageSaveProvider;

impl WorkerProvider for DiskImageSaveProvider {
    fn name(&self) -> &str {
        "disk-image-save"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::ImageSave
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        IMAGE_SAVE_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        IMAGE_SAVE_EVENTS
    }

    fn probe(&self, config: &RobotConfig) -> Result<()> {
        let dir = &config.image_save.directory;
        std::fs::create_dir_all(dir).map_err(|e| {
            RobotError::Image(format!("snapshot directory {} unusable: {e}", dir.display()))
        })
    }

    fn build(&self, _config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(DiskImageSaveWorker))
    }
}

pub struct UnavailableImageSaveProvider;

impl WorkerProvider for UnavailableImageSaveProvider {
    fn name(&self) -> &str {
        "unavailable-image-save"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::ImageSave
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        IMAGE_SAVE_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        IMAGE_SAVE_EVENTS
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, _config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(UnavailableImageSaveWorker))
    }
}
