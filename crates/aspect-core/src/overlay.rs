//! Overlay coordinate mapping — image pixel space to preview view space.
//!
//! The preview fits the captured image into the view with a uniform scale
//! and centering offsets (letterbox fit — the image is never cropped, so the
//! whole bounding rectangle stays visible). Overlay rectangles go through
//! the same transform so they land on the rendered face.

use crate::types::{DetectedFace, FaceRect};
use serde::{Deserialize, Serialize};

/// A rectangle in preview-view coordinate space, ready to draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayShape {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Uniform scale + centering offsets fitting an image into a view.
#[derive(Debug, Clone, Copy)]
pub struct ViewMapping {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl ViewMapping {
    /// Compute the letterbox fit of an `image_w × image_h` image into a
    /// `view_w × view_h` view. The scale binds on the axis where the image
    /// is proportionally larger; the other axis is centered.
    pub fn letterbox(image_w: u32, image_h: u32, view_w: u32, view_h: u32) -> Self {
        let scale_w = view_w as f32 / image_w as f32;
        let scale_h = view_h as f32 / image_h as f32;
        let scale = scale_w.min(scale_h);

        let offset_x = (view_w as f32 - image_w as f32 * scale) / 2.0;
        let offset_y = (view_h as f32 - image_h as f32 * scale) / 2.0;

        Self {
            scale,
            offset_x,
            offset_y,
        }
    }

    /// Map a bounding rectangle from image pixel space into view space.
    ///
    /// The uniform positive scale preserves `left < right` and
    /// `top < bottom`.
    pub fn map_rect(&self, rect: &FaceRect) -> OverlayShape {
        OverlayShape {
            left: rect.left as f32 * self.scale + self.offset_x,
            top: rect.top as f32 * self.scale + self.offset_y,
            right: rect.right as f32 * self.scale + self.offset_x,
            bottom: rect.bottom as f32 * self.scale + self.offset_y,
        }
    }
}

/// Map every detected face's bounds into view space. An empty face list
/// yields an empty shape list.
pub fn map_faces(
    faces: &[DetectedFace],
    image_w: u32,
    image_h: u32,
    view_w: u32,
    view_h: u32,
) -> Vec<OverlayShape> {
    let mapping = ViewMapping::letterbox(image_w, image_h, view_w, view_h);
    faces.iter().map(|f| mapping.map_rect(&f.bounds)).collect()
}
