//! Per-frame image filters selected with `set_filter`.

use image::{DynamicImage, GrayImage, Luma, RgbImage, imageops};
use std::fmt;

/// Visual filter applied to every captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFilter {
    #[default]
    None,
    Grayscale,
    Blur,
    Edges,
    Sepia,
    Invert,
    Cartoon,
}

impl CameraFilter {
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Grayscale,
        Self::Blur,
        Self::Edges,
        Self::Sepia,
        Self::Invert,
        Self::Cartoon,
    ];

    /// User-facing key, as accepted by [`CameraFilter::parse`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Grayscale => "Grayscale",
            Self::Blur => "Blur",
            Self::Edges => "Edges",
            Self::Sepia => "Sepia",
            Self::Invert => "Invert",
            Self::Cartoon => "Cartoon",
        }
    }

    /// Parse a filter key, ignoring ASCII case.
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|filter| filter.as_str().eq_ignore_ascii_case(key))
    }

    /// Apply the filter. Output dimensions always match the input.
    pub fn apply(self, frame: RgbImage) -> RgbImage {
        match self {
            Self::None => frame,
            Self::Grayscale => gray_to_rgb(imageops::grayscale(&frame)),
            Self::Blur => imageops::blur(&frame, 4.0),
            Self::Edges => gray_to_rgb(edges(&frame)),
            Self::Sepia => sepia(frame),
            Self::Invert => {
                let mut frame = frame;
                imageops::invert(&mut frame);
                frame
            }
            Self::Cartoon => cartoon(&frame),
        }
    }
}

impl fmt::Display for CameraFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn gray_to_rgb(gray: GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(gray).to_rgb8()
}

const LAPLACIAN: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];
const EDGE_THRESHOLD: u8 = 40;

/// Binary edge map: white where the Laplacian exceeds the threshold.
fn edges(frame: &RgbImage) -> GrayImage {
    let gray = imageops::grayscale(frame);
    let response = imageops::filter3x3(&gray, &LAPLACIAN);
    GrayImage::from_fn(response.width(), response.height(), |x, y| {
        if response.get_pixel(x, y)[0] > EDGE_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn sepia(mut frame: RgbImage) -> RgbImage {
    for pixel in frame.pixels_mut() {
        let [r, g, b] = pixel.0.map(f32::from);
        let tone = |cr: f32, cg: f32, cb: f32| (cr * r + cg * g + cb * b).min(255.0) as u8;
        pixel.0 = [
            tone(0.393, 0.769, 0.189),
            tone(0.349, 0.686, 0.168),
            tone(0.272, 0.534, 0.131),
        ];
    }
    frame
}

/// Posterized, smoothed colors with dark outlines.
fn cartoon(frame: &RgbImage) -> RgbImage {
    let outline = edges(&imageops::blur(frame, 1.0));
    let mut smooth = imageops::blur(frame, 2.0);
    for (x, y, pixel) in smooth.enumerate_pixels_mut() {
        if outline.get_pixel(x, y)[0] > 0 {
            pixel.0 = [0, 0, 0];
        } else {
            pixel.0 = pixel.0.map(|c| (c / 64) * 64 + 32);
        }
    }
    smooth
}
