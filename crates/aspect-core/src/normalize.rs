//! Frame normalization — decode a captured frame and rotate it upright.

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed image data: {0}")]
    Malformed(#[from] image::ImageError),
}

/// Sensor rotation of a captured frame, clockwise degrees needed to bring
/// the buffer upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Parse from degrees. Only the four cardinal rotations are valid.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// A captured still frame: encoded image bytes plus the sensor rotation
/// recorded at capture time. Immutable once captured.
pub struct RawFrame {
    pub data: Vec<u8>,
    pub rotation: Rotation,
}

/// An upright, classifier-ready RGB image. Ephemeral — lives only for the
/// duration of one detection request.
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Decode a raw frame and rotate the pixel buffer so that "up" in the buffer
/// matches "up" as perceived by the viewer.
///
/// 90° and 270° rotations swap the reported width and height. Malformed
/// bytes fail with [`DecodeError`]; this is non-retryable and must surface
/// to the user rather than being swallowed.
pub fn normalize(frame: RawFrame) -> Result<NormalizedImage, DecodeError> {
    let decoded = image::load_from_memory(&frame.data)?.to_rgb8();

    let upright = match frame.rotation {
        Rotation::Deg0 => decoded,
        Rotation::Deg90 => image::imageops::rotate90(&decoded),
        Rotation::Deg180 => image::imageops::rotate180(&decoded),
        Rotation::Deg270 => image::imageops::rotate270(&decoded),
    };

    tracing::debug!(
        rotation = frame.rotation.degrees(),
        width = upright.width(),
        height = upright.height(),
        "normalized captured frame"
    );

    Ok(NormalizedImage::new(upright))
}
