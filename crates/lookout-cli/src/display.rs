//! Console renderer: colour status band, logged overlay changes, optional
//! PNG snapshots of the annotated stream.

use image::RgbImage;
use lookout_core::{Frame, Overlay, OverlayStyle, Renderer};
use std::path::PathBuf;

const BAND_HEIGHT: u32 = 12;
const IDENTIFIED_RGB: [u8; 3] = [0, 255, 0];
const NO_MATCH_RGB: [u8; 3] = [255, 0, 0];

pub struct ConsoleRenderer {
    last_text: Option<String>,
    pending_text: Option<String>,
    shown: u64,
    snapshot_path: Option<PathBuf>,
    snapshot_every: u64,
}

impl ConsoleRenderer {
    pub fn new(snapshot_path: Option<PathBuf>, snapshot_every: u64) -> Self {
        Self {
            last_text: None,
            pending_text: None,
            shown: 0,
            snapshot_path,
            snapshot_every: snapshot_every.max(1),
        }
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    fn write_snapshot(&self, frame: &Frame) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let Some(image) = RgbImage::from_raw(frame.width, frame.height, frame.data.clone()) else {
            tracing::warn!("frame buffer does not match its dimensions; snapshot skipped");
            return;
        };
        if let Err(err) = image.save(path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to write snapshot");
        }
    }
}

/// Fill a horizontal band ending at the overlay origin with the style colour.
fn draw_band(frame: &mut Frame, overlay: &Overlay) {
    let colour = match overlay.style {
        OverlayStyle::Identified => IDENTIFIED_RGB,
        OverlayStyle::NoMatch => NO_MATCH_RGB,
    };
    if !frame.is_complete() {
        return;
    }
    let (x0, y_end) = overlay.position;
    let y_end = y_end.min(frame.height);
    let y0 = y_end.saturating_sub(BAND_HEIGHT);
    let x_end = frame.width.saturating_sub(x0);

    for y in y0..y_end {
        for x in x0.min(x_end)..x_end {
            let idx = (y as usize * frame.width as usize + x as usize) * 3;
            frame.data[idx..idx + 3].copy_from_slice(&colour);
        }
    }
}

impl Renderer for ConsoleRenderer {
    fn annotate(&mut self, frame: &mut Frame, overlay: &Overlay) {
        draw_band(frame, overlay);
        self.pending_text = Some(overlay.text.clone());
    }

    fn show(&mut self, window: &str, frame: &Frame) {
        self.shown += 1;

        let text = self.pending_text.take();
        if text.is_some() && text != self.last_text {
            if let Some(t) = &text {
                tracing::info!(window, overlay = %t, "overlay changed");
            }
            self.last_text = text;
        }

        if self.shown % self.snapshot_every == 0 {
            self.write_snapshot(frame);
        }
    }
}
