//! Gesture-to-parameter mapping
//!
//! Pure functions from a detection result to the normalized hand position
//! and the bounded effect intensity. Deterministic, no side effects, and no
//! rendering, camera, or detector dependencies, so everything here is
//! testable in isolation.

use super::{HandDetectionResult, WRIST};

/// Hard ceiling on the intensity scalar. Matches the documented intensity
/// range of every effect in the catalog.
pub const MAX_INTENSITY: f32 = 2.0;

/// Normalized hand position `(u, v)` of the first detected hand's wrist.
///
/// Returns the frame center `(0.5, 0.5)` when no hands are present. The
/// horizontal axis is mirrored (`u = 1 - x`) to compensate for the mirrored
/// camera preview; both components are clamped to `[0, 1]`.
pub fn hand_position(result: &HandDetectionResult) -> (f32, f32) {
    let Some(hand) = result.hands.first() else {
        return (0.5, 0.5);
    };
    let wrist = hand.landmarks[WRIST];

    let u = (1.0 - wrist.x).clamp(0.0, 1.0);
    let v = wrist.y.clamp(0.0, 1.0);
    (u, v)
}

/// Effect intensity from the hand's vertical position.
///
/// No hand means no control signal, so the effect is fully off: `0`.
/// Otherwise the vertical position maps linearly to an amplification factor
/// in `[0, 2]` (top of frame = 0, bottom = max), applied to `base_intensity`
/// and capped at [`MAX_INTENSITY`] regardless of inputs.
pub fn effect_intensity(result: &HandDetectionResult, base_intensity: f32) -> f32 {
    if result.hands.is_empty() {
        return 0.0;
    }

    let (_, v) = hand_position(result);
    let position_factor = v * 2.0;
    (position_factor * base_intensity).min(MAX_INTENSITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{Hand, LandmarkPoint};

    fn result_with_wrist(x: f32, y: f32) -> HandDetectionResult {
        let mut hand = Hand::default();
        hand.landmarks[WRIST] = LandmarkPoint { x, y, z: 0.0 };
        hand.confidence = 0.9;
        HandDetectionResult { hands: vec![hand] }
    }

    fn empty_result() -> HandDetectionResult {
        HandDetectionResult::default()
    }

    #[test]
    fn test_no_hands_returns_center_and_zero_intensity() {
        let result = empty_result();
        assert_eq!(hand_position(&result), (0.5, 0.5));
        for base in [0.0, 0.5, 1.0, 1.5, 2.0] {
            assert_eq!(effect_intensity(&result, base), 0.0);
        }
    }

    #[test]
    fn test_wrist_scenario() {
        // Hand at wrist (0.3, 0.8), base 1.0:
        // mirrored u = 0.7, v = 0.8, intensity = min(0.8 * 2 * 1.0, 2.0) = 1.6
        let result = result_with_wrist(0.3, 0.8);
        let (u, v) = hand_position(&result);
        assert!((u - 0.7).abs() < 1e-6);
        assert!((v - 0.8).abs() < 1e-6);
        assert!((effect_intensity(&result, 1.0) - 1.6).abs() < 1e-6);
    }

    #[test]
    fn test_position_clamps_out_of_range_landmarks() {
        let result = result_with_wrist(-0.5, 1.7);
        let (u, v) = hand_position(&result);
        assert_eq!(u, 1.0);
        assert_eq!(v, 1.0);

        let result = result_with_wrist(1.4, -0.2);
        let (u, v) = hand_position(&result);
        assert_eq!(u, 0.0);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_intensity_ceiling_never_exceeded() {
        let result = result_with_wrist(0.5, 1.0);
        assert_eq!(effect_intensity(&result, 2.0), MAX_INTENSITY);

        // Even absurd landmark input stays capped
        let result = result_with_wrist(0.5, 99.0);
        assert_eq!(effect_intensity(&result, 2.0), MAX_INTENSITY);
    }

    #[test]
    fn test_intensity_bounds_over_domain() {
        for v_step in 0..=10 {
            for base_step in 0..=10 {
                let v = v_step as f32 / 10.0;
                let base = base_step as f32 / 5.0;
                let intensity = effect_intensity(&result_with_wrist(0.5, v), base);
                assert!((0.0..=MAX_INTENSITY).contains(&intensity));
            }
        }
    }

    #[test]
    fn test_intensity_monotonic_in_v_and_base() {
        let base = 1.0;
        let mut last = 0.0;
        for v_step in 0..=20 {
            let v = v_step as f32 / 20.0;
            let intensity = effect_intensity(&result_with_wrist(0.5, v), base);
            assert!(intensity >= last);
            last = intensity;
        }

        let v = 0.6;
        let mut last = 0.0;
        for base_step in 0..=20 {
            let base = base_step as f32 / 10.0;
            let intensity = effect_intensity(&result_with_wrist(0.5, v), base);
            assert!(intensity >= last);
            last = intensity;
        }
    }

    #[test]
    fn test_deterministic() {
        let result = result_with_wrist(0.25, 0.4);
        assert_eq!(hand_position(&result), hand_position(&result));
        assert_eq!(
            effect_intensity(&result, 1.3),
            effect_intensity(&result, 1.3)
        );
    }

    #[test]
    fn test_first_hand_wins() {
        let mut first = Hand::default();
        first.landmarks[WRIST] = LandmarkPoint { x: 0.2, y: 0.3, z: 0.0 };
        let mut second = Hand::default();
        second.landmarks[WRIST] = LandmarkPoint { x: 0.9, y: 0.9, z: 0.0 };
        let result = HandDetectionResult {
            hands: vec![first, second],
        };

        let (u, v) = hand_position(&result);
        assert!((u - 0.8).abs() < 1e-6);
        assert!((v - 0.3).abs() < 1e-6);
    }
}
