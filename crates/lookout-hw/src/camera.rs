//! V4L2 camera capture via the `v4l` crate.

use crate::convert;
use lookout_core::{CaptureDevice, CaptureError, Frame};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::capability::Capabilities;
use v4l::FourCC;

const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera closed")]
    Closed,
}

impl From<CameraError> for CaptureError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::Closed => CaptureError::Closed,
            other => CaptureError::Failed(other.to_string()),
        }
    }
}

/// Capture API used to talk to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Video4Linux2 with memory-mapped streaming buffers.
    #[default]
    V4l2,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale (common on IR cameras).
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"RGB3") {
            Some(Self::Rgb3)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    /// `None` once closed.
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `/dev/video{index}` and start streaming in its current resolution.
    pub fn open(device_index: u32, backend: CaptureBackend) -> Result<Self, CameraError> {
        tracing::debug!(device_index, backend = ?backend, "opening camera");
        let device_path = format!("/dev/video{device_index}");
        let (device, caps) = probe(&device_path)?;
        if !is_capture_device(&caps) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = %device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let current = device.format().map_err(format_err)?;
        let mut camera = Self {
            device: Some(device),
            stream: None,
            width: current.width,
            height: current.height,
            device_path,
            fourcc: current.fourcc,
            pixel_format: PixelFormat::Yuyv,
        };
        camera.configure(current.width, current.height)?;
        Ok(camera)
    }

    /// Request a resolution and restart streaming.
    ///
    /// Tries YUYV first, then RGB3, then GREY; the driver may adjust the
    /// size, and the negotiated values are stored on the handle.
    pub fn configure(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
        // Formats cannot change while buffers are queued.
        self.stream = None;
        let device = self.device.as_ref().ok_or(CameraError::Closed)?;

        let mut negotiated = None;
        for code in [b"YUYV", b"RGB3", b"GREY"] {
            let mut fmt = device.format().map_err(format_err)?;
            fmt.fourcc = FourCC::new(code);
            fmt.width = width;
            fmt.height = height;

            match device.set_format(&fmt) {
                Ok(got) => {
                    if let Some(pf) = PixelFormat::from_fourcc(got.fourcc) {
                        negotiated = Some((got, pf));
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(fourcc = ?fmt.fourcc, error = %e, "format rejected");
                }
            }
        }

        let Some((fmt, pixel_format)) = negotiated else {
            return Err(CameraError::FormatNegotiationFailed(
                "no supported pixel format (need YUYV, RGB3, or GREY)".into(),
            ));
        };

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            "negotiated format"
        );

        self.width = fmt.width;
        self.height = fmt.height;
        self.fourcc = fmt.fourcc;
        self.pixel_format = pixel_format;

        let stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Dequeue the next frame, converted to RGB24.
    pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let stream = self.stream.as_mut().ok_or(CameraError::Closed)?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let data = match pixel_format {
            PixelFormat::Yuyv => convert::yuyv_to_rgb(buf, width, height),
            PixelFormat::Rgb3 => convert::rgb_passthrough(buf, width, height),
            PixelFormat::Grey => convert::grey_to_rgb(buf, width, height),
        }
        .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        Ok(Frame::new(data, width, height, meta.sequence))
    }

    /// Stop streaming, then release the buffers and the device handle.
    pub fn close(&mut self) {
        // Buffers are unmapped before the device fd is closed.
        self.stream = None;
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Capture-capable V4L2 devices among `/dev/video0..15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_PROBED_DEVICES)
            .map(|i| format!("/dev/video{i}"))
            .filter_map(|path| {
                let (_, caps) = probe(&path).ok()?;
                is_capture_device(&caps).then(|| DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

const MAX_PROBED_DEVICES: u32 = 16;

/// Open a device node and read its capabilities.
fn probe(path: &str) -> Result<(Device, Capabilities), CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }
    let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
        Some(EBUSY) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
    })?;
    let caps = device
        .query_caps()
        .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
    Ok((device, caps))
}

fn is_capture_device(caps: &Capabilities) -> bool {
    caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE)
}

fn format_err(e: std::io::Error) -> CameraError {
    CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
}

impl CaptureDevice for Camera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        Camera::read_frame(self).map_err(CaptureError::from)
    }

    fn close(&mut self) {
        Camera::close(self);
    }
}
