//! ONNX Runtime hand landmark detector
//!
//! Runs a MediaPipe-compatible hand landmark model (PINTO Model Zoo export)
//! against the full camera frame. The model takes a 224x224 RGB float input
//! and produces 21 screen landmarks plus presence and handedness scores for
//! the most prominent hand, so this detector reports at most one hand per
//! cycle.

use std::path::{Path, PathBuf};

use ndarray::Array4;

use super::{
    DetectorError, Hand, HandDetectionResult, HandDetector, Handedness, LandmarkPoint,
    LANDMARKS_PER_HAND,
};
use crate::camera::CameraFrame;

/// Model input edge length
const INPUT_SIZE: u32 = 224;

/// Hands below this presence score are treated as not detected
const PRESENCE_THRESHOLD: f32 = 0.5;

/// Model file expected in the models directory
const MODEL_FILE: &str = "hand_landmark_full.onnx";

/// Hand landmark detector backed by ONNX Runtime
pub struct OnnxHandDetector {
    session: ort::session::Session,
}

impl OnnxHandDetector {
    /// One-time initialization: locate the model and build the session.
    ///
    /// Fails with a descriptive error when the model file or the runtime is
    /// unavailable; the caller decides whether to run without tracking.
    pub fn load() -> Result<Self, DetectorError> {
        let model_dir = Self::find_model_dir()
            .ok_or_else(|| DetectorError::ModelNotFound(MODEL_FILE.to_string()))?;
        let model_path = model_dir.join(MODEL_FILE);
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        ort::init().with_name("gesture-effects").commit()?;

        let session = ort::session::Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        log::info!("Loaded hand landmark model from {:?}", model_path);
        Ok(Self { session })
    }

    /// Find the models directory, searching next to the executable and the
    /// working directory.
    fn find_model_dir() -> Option<PathBuf> {
        if let Ok(exe_path) = std::env::current_exe() {
            let mut dir: Option<&Path> = exe_path.parent();
            // Walk up a few levels to cover target/debug and target/release
            for _ in 0..3 {
                if let Some(d) = dir {
                    let model_dir = d.join("models");
                    if model_dir.exists() {
                        return Some(model_dir);
                    }
                    dir = d.parent();
                }
            }
        }

        let cwd = std::env::current_dir().ok()?;
        let model_dir = cwd.join("models");
        if model_dir.exists() {
            return Some(model_dir);
        }
        None
    }

    /// Resize the RGBA frame to the model input and convert to RGB float
    /// NHWC in `[0, 1]`.
    fn preprocess_frame_nhwc(frame: &CameraFrame, target: u32) -> Vec<f32> {
        let mut output = vec![0.0f32; (target * target * 3) as usize];

        let x_ratio = frame.width as f32 / target as f32;
        let y_ratio = frame.height as f32 / target as f32;

        for y in 0..target {
            for x in 0..target {
                let src_x = (x as f32 * x_ratio) as u32;
                let src_y = (y as f32 * y_ratio) as u32;
                let src_idx = ((src_y * frame.width + src_x) * 4) as usize;

                if src_idx + 2 < frame.data.len() {
                    let out_idx = ((y * target + x) * 3) as usize;
                    output[out_idx] = frame.data[src_idx] as f32 / 255.0;
                    output[out_idx + 1] = frame.data[src_idx + 1] as f32 / 255.0;
                    output[out_idx + 2] = frame.data[src_idx + 2] as f32 / 255.0;
                }
            }
        }

        output
    }

    /// Decode the model outputs into a detection result.
    ///
    /// The model emits the screen landmarks (63 floats, pixel coordinates of
    /// the input crop), then scalar presence and handedness scores; a world
    /// landmark tensor may follow and is ignored.
    fn decode_outputs(tensors: &[Vec<f32>]) -> Result<HandDetectionResult, DetectorError> {
        let landmarks = tensors
            .iter()
            .find(|t| t.len() >= LANDMARKS_PER_HAND * 3)
            .ok_or_else(|| DetectorError::Output("no landmark tensor".to_string()))?;

        let mut scalars = tensors.iter().filter(|t| t.len() == 1);
        let presence = scalars.next().map(|t| t[0]).unwrap_or(1.0);
        let handedness_score = scalars.next().map(|t| t[0]).unwrap_or(0.5);

        if presence < PRESENCE_THRESHOLD {
            return Ok(HandDetectionResult::default());
        }

        let mut hand = Hand {
            // Score above 0.5 means the model saw a right hand
            handedness: if handedness_score >= 0.5 {
                Handedness::Right
            } else {
                Handedness::Left
            },
            confidence: presence,
            ..Hand::default()
        };

        let scale = INPUT_SIZE as f32;
        for (i, point) in hand.landmarks.iter_mut().enumerate() {
            *point = LandmarkPoint {
                x: landmarks[i * 3] / scale,
                y: landmarks[i * 3 + 1] / scale,
                z: landmarks[i * 3 + 2] / scale,
            };
        }

        Ok(HandDetectionResult { hands: vec![hand] })
    }
}

impl HandDetector for OnnxHandDetector {
    fn detect(
        &mut self,
        frame: &CameraFrame,
        _timestamp_ms: f64,
    ) -> Result<HandDetectionResult, DetectorError> {
        let input = Self::preprocess_frame_nhwc(frame, INPUT_SIZE);

        let input_array = Array4::from_shape_vec(
            (1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3),
            input,
        )
        .map_err(|e| DetectorError::Output(e.to_string()))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let mut tensors: Vec<Vec<f32>> = Vec::new();
        for (_name, value) in outputs.iter() {
            if let Ok((_shape, data)) = value.try_extract_tensor::<f32>() {
                tensors.push(data.to_vec());
            }
        }

        Self::decode_outputs(&tensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reports_one_hand_above_threshold() {
        // landmarks in input-crop pixels, presence, handedness
        let landmarks: Vec<f32> = (0..63).map(|i| (i % 3) as f32 * 112.0).collect();
        let tensors = vec![landmarks, vec![0.9], vec![0.8]];

        let result = OnnxHandDetector::decode_outputs(&tensors).unwrap();
        assert_eq!(result.hands.len(), 1);
        let hand = &result.hands[0];
        assert_eq!(hand.handedness, Handedness::Right);
        assert!((hand.confidence - 0.9).abs() < 1e-6);
        // Pixel coordinates normalized by the input size
        assert!((hand.landmarks[0].y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_low_presence_is_empty() {
        let tensors = vec![vec![0.0f32; 63], vec![0.1], vec![0.8]];
        let result = OnnxHandDetector::decode_outputs(&tensors).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_decode_without_landmark_tensor_errors() {
        let tensors = vec![vec![0.9f32], vec![0.8]];
        assert!(OnnxHandDetector::decode_outputs(&tensors).is_err());
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let frame = CameraFrame {
            data: vec![255; 8 * 8 * 4],
            width: 8,
            height: 8,
            frame_number: 0,
            timestamp: std::time::Instant::now(),
        };
        let input = OnnxHandDetector::preprocess_frame_nhwc(&frame, 4);
        assert_eq!(input.len(), 4 * 4 * 3);
        assert!(input.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(input.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
