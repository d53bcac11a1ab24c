//! lookout-hw: hardware abstraction for camera capture.
//!
//! Provides a V4L2-backed [`Camera`] implementing
//! [`lookout_core::CaptureDevice`], delivering RGB24 frames.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, CaptureBackend, DeviceInfo, PixelFormat};
