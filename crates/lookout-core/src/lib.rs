//! lookout-core: sampled face identification over a live frame stream.
//!
//! A [`FrameLoop`] pulls frames from a capture device, a
//! [`SamplingScheduler`] forks a [`VerificationWorker`] every N frames, and
//! workers publish the first matching gallery identity into a shared
//! [`MatchState`] that the loop reads back for its overlay.

pub mod frame;
pub mod frame_loop;
pub mod gallery;
pub mod match_state;
pub mod matcher;
pub mod preprocess;
pub mod provision;
pub mod recognizer;
pub mod scheduler;
pub mod worker;

pub use frame::Frame;
pub use frame_loop::{
    CaptureDevice, CaptureError, FrameLoop, KeyInput, LoopSettings, LoopState, Overlay,
    OverlayStyle, Renderer,
};
pub use gallery::{GalleryLoadError, Identity, IdentityConfig, ReferenceGallery, ReferenceImage};
pub use match_state::MatchState;
pub use matcher::{ComparisonError, DistanceMetric, Matcher, RecognitionModel, Verification};
pub use preprocess::Snapshot;
pub use provision::{default_model_dir, ModelAsset};
pub use recognizer::OnnxMatcher;
pub use scheduler::{Dispatch, DispatchPolicy, SamplingScheduler};
pub use worker::{AttemptOutcome, VerificationLock, VerificationWorker};
