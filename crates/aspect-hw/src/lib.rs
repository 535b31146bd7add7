//! aspect-hw — Hardware abstraction for still-frame capture.
//!
//! Provides V4L2-based MJPEG capture behind the [`FrameSource`] trait.

pub mod camera;

pub use camera::{Camera, CaptureError, CapturedFrame, DeviceInfo, FrameSource};
