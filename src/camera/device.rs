//! Frame sources for the camera worker.

use crate::error::{Result, RobotError};
use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A capture device owned by exactly one camera worker.
///
/// `read_frame` may block; it is always called off the async executor.
/// Dropping the device releases it.
pub trait FrameDevice: Send {
    /// Next frame, or `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to produce a frame.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;
}

const REPLAY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Replays the still images of a directory as a looping stream.
#[derive(Debug)]
pub struct ReplayDevice {
    frames: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl ReplayDevice {
    /// Open `dir`, collecting its images in file-name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or holds no images.
    pub fn open(dir: &Path, width: u32, height: u32) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| RobotError::Device(format!("cannot open camera source {}: {e}", dir.display())))?;
        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_replay_image(path))
            .collect();
        if frames.is_empty() {
            return Err(RobotError::Device(format!(
                "camera source {} contains no images",
                dir.display()
            )));
        }
        frames.sort();
        debug!(source = %dir.display(), frames = frames.len(), "replay device opened");
        Ok(Self {
            frames,
            next: 0,
            width,
            height,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn is_replay_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| REPLAY_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

impl FrameDevice for ReplayDevice {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        let image = image::open(path)?.to_rgb8();
        self.next = (self.next + 1) % self.frames.len();
        if image.dimensions() == (self.width, self.height) {
            Ok(Some(image))
        } else {
            Ok(Some(imageops::resize(
                &image,
                self.width,
                self.height,
                FilterType::Triangle,
            )))
        }
    }
}

const PATTERN_PERIOD: u32 = 1024;

/// Synthetic moving gradient with a little sensor noise.
#[derive(Debug)]
pub struct TestPatternDevice {
    width: u32,
    height: u32,
    tick: u32,
}

impl TestPatternDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }
}

impl FrameDevice for TestPatternDevice {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let (width, height, tick) = (self.width, self.height, self.tick);
        let mut rng = rand::thread_rng();
        let frame = RgbImage::from_fn(width, height, |x, y| {
            let noise: u8 = rng.gen_range(0..12);
            let r = ((x + tick * 4) % width * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            let b = (tick * 3 % 256) as u8;
            image::Rgb([r.saturating_add(noise), g.saturating_add(noise), b])
        });
        self.tick = (self.tick + 1) % PATTERN_PERIOD;
        Ok(Some(frame))
    }
}
