//! Capture → schedule → render driver and its collaborator seams.

use crate::frame::Frame;
use crate::gallery::Identity;
use crate::match_state::MatchState;
use crate::scheduler::SamplingScheduler;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("capture device closed")]
    Closed,
}

/// Source of live frames. Called synchronously once per loop iteration.
pub trait CaptureDevice {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
    /// Release the device. Later reads fail with [`CaptureError::Closed`].
    fn close(&mut self);
}

/// Draws overlays onto frames and presents them.
pub trait Renderer {
    fn annotate(&mut self, frame: &mut Frame, overlay: &Overlay);
    fn show(&mut self, window: &str, frame: &Frame);
}

/// Keyboard (or equivalent) input polled once per iteration.
pub trait KeyInput {
    fn poll_key(&mut self, timeout: Duration) -> Option<char>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayStyle {
    Identified,
    NoMatch,
}

/// Render command derived from the current match state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub text: String,
    /// Text origin in pixels (x, y).
    pub position: (u32, u32),
    pub style: OverlayStyle,
}

impl Overlay {
    pub fn for_match(identity: Option<&Identity>, position: (u32, u32)) -> Self {
        match identity {
            Some(identity) => Self {
                text: format!("User: {identity}"),
                position,
                style: OverlayStyle::Identified,
            },
            None => Self {
                text: "No User Found".to_string(),
                position,
                style: OverlayStyle::NoMatch,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Presentation and input settings for [`FrameLoop`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub window: String,
    pub quit_key: char,
    pub overlay_position: (u32, u32),
    pub key_poll: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            window: "video".to_string(),
            quit_key: 'q',
            overlay_position: (20, 450),
            key_poll: Duration::from_millis(1),
        }
    }
}

pub struct FrameLoop<C, R, I> {
    capture: C,
    renderer: R,
    input: I,
    scheduler: SamplingScheduler,
    state: Arc<MatchState>,
    settings: LoopSettings,
    loop_state: LoopState,
}

impl<C: CaptureDevice, R: Renderer, I: KeyInput> FrameLoop<C, R, I> {
    pub fn new(
        capture: C,
        renderer: R,
        input: I,
        scheduler: SamplingScheduler,
        settings: LoopSettings,
    ) -> Self {
        let state = scheduler.worker().state().clone();
        Self {
            capture,
            renderer,
            input,
            scheduler,
            state,
            settings,
            loop_state: LoopState::Running,
        }
    }

    /// Run one iteration: capture, schedule, render, then check for quit.
    pub fn step(&mut self) -> LoopState {
        if self.loop_state == LoopState::Stopped {
            return LoopState::Stopped;
        }

        match self.capture.read_frame() {
            Ok(mut frame) => {
                self.scheduler.on_frame(&frame);
                let overlay = Overlay::for_match(self.state.current(), self.settings.overlay_position);
                self.renderer.annotate(&mut frame, &overlay);
                self.renderer.show(&self.settings.window, &frame);
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame capture failed; skipping frame");
            }
        }

        if self.input.poll_key(self.settings.key_poll) == Some(self.settings.quit_key) {
            self.stop();
        }

        self.loop_state
    }

    /// Iterate until stopped. Returns the number of frames captured.
    pub fn run(&mut self) -> u64 {
        tracing::info!(
            period = self.scheduler.period(),
            policy = ?self.scheduler.policy(),
            "frame loop started"
        );
        while self.step() == LoopState::Running {}
        self.scheduler.frames_seen()
    }

    /// Transition to `Stopped` and release the capture device.
    ///
    /// In-flight verification attempts are not cancelled; they finish on
    /// their own and their writes are no longer read.
    pub fn stop(&mut self) {
        if self.loop_state == LoopState::Stopped {
            return;
        }
        self.loop_state = LoopState::Stopped;
        self.capture.close();
        tracing::info!(
            frames = self.scheduler.frames_seen(),
            in_flight = self.scheduler.in_flight(),
            "frame loop stopped"
        );
    }

    pub fn state(&self) -> LoopState {
        self.loop_state
    }

    pub fn scheduler(&self) -> &SamplingScheduler {
        &self.scheduler
    }

    pub fn match_state(&self) -> &Arc<MatchState> {
        &self.state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }
}
