//! ONNX embedding matcher.
//!
//! Embeds the candidate and reference with a face recognition model via
//! ONNX Runtime, then thresholds their distance. The session is loaded on
//! first use so a missing model surfaces as comparison failures rather than
//! blocking startup.

use crate::gallery::ReferenceImage;
use crate::matcher::{
    ComparisonError, DistanceMetric, Embedding, Matcher, RecognitionModel, Verification,
};
use crate::preprocess::Snapshot;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const PIXEL_SCALE: f32 = 255.0;

/// [`Matcher`] backed by an ONNX face recognition model.
pub struct OnnxMatcher {
    model: RecognitionModel,
    metric: DistanceMetric,
    threshold: f32,
    model_path: PathBuf,
    session: Mutex<Option<Session>>,
    reference_cache: Mutex<HashMap<PathBuf, Embedding>>,
}

impl OnnxMatcher {
    /// Create a matcher for `model` stored at `model_path`.
    ///
    /// `threshold` overrides the model's default verification threshold.
    pub fn new(
        model: RecognitionModel,
        metric: DistanceMetric,
        model_path: impl Into<PathBuf>,
        threshold: Option<f32>,
    ) -> Self {
        Self {
            model,
            metric,
            threshold: threshold.unwrap_or_else(|| model.threshold(metric)),
            model_path: model_path.into(),
            session: Mutex::new(None),
            reference_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> RecognitionModel {
        self.model
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn load_session(path: &Path) -> Result<Session, ComparisonError> {
        if !path.exists() {
            return Err(ComparisonError::ModelUnavailable(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let session = Self::build_session(path)
            .map_err(|e| ComparisonError::ModelUnavailable(format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(session)
    }

    fn build_session(path: &Path) -> ort::Result<Session> {
        Ok(Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)?)
    }

    fn embed(&self, image: &RgbImage) -> Result<Embedding, ComparisonError> {
        let input = Self::preprocess(image, self.model.input_size())?;

        let mut guard = self
            .session
            .lock()
            .map_err(|_| ComparisonError::Inference("session lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(Self::load_session(&self.model_path)?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ComparisonError::ModelUnavailable(self.model.name().into()));
        };

        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ComparisonError::Inference(format!("input tensor: {e}")))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ComparisonError::Inference(e.to_string()))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ComparisonError::Inference(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(ComparisonError::Inference("model produced an empty embedding".into()));
        }

        Ok(Embedding { values: raw.to_vec() })
    }

    fn reference_embedding(&self, reference: &ReferenceImage) -> Result<Embedding, ComparisonError> {
        if let Ok(cache) = self.reference_cache.lock() {
            if let Some(hit) = cache.get(&reference.source) {
                return Ok(hit.clone());
            }
        }
        let embedding = self.embed(&reference.image)?;
        if let Ok(mut cache) = self.reference_cache.lock() {
            cache.insert(reference.source.clone(), embedding.clone());
        }
        Ok(embedding)
    }

    /// Resize an RGB image to the model input and lay it out as a NCHW float tensor.
    fn preprocess(image: &RgbImage, size: usize) -> Result<Array4<f32>, ComparisonError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ComparisonError::InvalidImage("image has no pixels".into()));
        }
        let resized = image::imageops::resize(image, size as u32, size as u32, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel.0[c] as f32 / PIXEL_SCALE;
            }
        }

        Ok(tensor)
    }
}

impl Matcher for OnnxMatcher {
    fn verify(
        &self,
        candidate: &Snapshot,
        reference: &ReferenceImage,
    ) -> Result<Verification, ComparisonError> {
        let live = self.embed(&candidate.image)?;
        let stored = self.reference_embedding(reference)?;
        let distance = live.distance(&stored, self.metric);
        Ok(Verification {
            verified: distance <= self.threshold,
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let image = RgbImage::new(160, 160);
        let tensor = OnnxMatcher::preprocess(&image, 224).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_preprocess_channel_order_and_scale() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 51]));
        let tensor = OnnxMatcher::preprocess(&image, 4).unwrap();
        assert!((tensor[[0, 0, 1, 1]] - 1.0).abs() < 1e-2);
        assert!(tensor[[0, 1, 1, 1]].abs() < 1e-2);
        assert!((tensor[[0, 2, 1, 1]] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn test_preprocess_rejects_empty_image() {
        let image = RgbImage::new(0, 0);
        assert!(matches!(
            OnnxMatcher::preprocess(&image, 96),
            Err(ComparisonError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_default_threshold_follows_model_and_metric() {
        let m = OnnxMatcher::new(
            RecognitionModel::Facenet,
            DistanceMetric::Cosine,
            "/nonexistent/facenet.onnx",
            None,
        );
        assert_eq!(m.threshold(), 0.40);

        let m = OnnxMatcher::new(
            RecognitionModel::Facenet,
            DistanceMetric::Cosine,
            "/nonexistent/facenet.onnx",
            Some(0.25),
        );
        assert_eq!(m.threshold(), 0.25);
    }

    #[test]
    fn test_missing_model_is_a_comparison_error() {
        let m = OnnxMatcher::new(
            RecognitionModel::OpenFace,
            DistanceMetric::Cosine,
            "/nonexistent/openface.onnx",
            None,
        );
        let candidate = Snapshot {
            sequence: 0,
            image: RgbImage::new(160, 160),
        };
        let reference = ReferenceImage {
            source: PathBuf::from("ref.png"),
            image: RgbImage::new(160, 160),
        };
        assert!(matches!(
            m.verify(&candidate, &reference),
            Err(ComparisonError::ModelUnavailable(_))
        ));
    }
}
