//! Pitch estimation seam.
//!
//! The gate hands each frame that clears the noise floor to a
//! [`PitchEstimator`]. The default implementation wraps the McLeod pitch
//! method from the `pitch-detection` crate and bounds its output to the
//! instrument's playable range.

use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector;

/// Lowest frequency reported by the default estimator.
pub const MIN_FREQUENCY_HZ: f32 = 70.0;
/// Highest frequency reported by the default estimator.
pub const MAX_FREQUENCY_HZ: f32 = 2100.0;

/// Frame in, fundamental frequency out. `None` means silence or noise.
///
/// `sample_rate` is the rate the frame was captured at, which can differ
/// between sources and between devices.
pub trait PitchEstimator {
    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> Option<f32>;
}

/// McLeod pitch method estimator for fixed-size frames.
pub struct McLeodEstimator {
    detector: McLeodDetector<f32>,
    frame_size: usize,
    min_hz: f32,
    max_hz: f32,
    clarity_threshold: f32,
}

impl McLeodEstimator {
    /// `frame_size` only presizes the detector buffers.
    pub fn new(frame_size: usize) -> Self {
        Self {
            detector: McLeodDetector::new(frame_size, frame_size / 2),
            frame_size,
            min_hz: MIN_FREQUENCY_HZ,
            max_hz: MAX_FREQUENCY_HZ,
            clarity_threshold: 0.6,
        }
    }

    /// Restrict reported pitches to `[min_hz, max_hz]`.
    pub fn with_bounds(mut self, min_hz: f32, max_hz: f32) -> Self {
        self.min_hz = min_hz;
        self.max_hz = max_hz;
        self
    }

    pub fn with_clarity_threshold(mut self, clarity: f32) -> Self {
        self.clarity_threshold = clarity;
        self
    }
}

impl PitchEstimator for McLeodEstimator {
    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> Option<f32> {
        if frame.is_empty() || sample_rate == 0 {
            return None;
        }
        if frame.len() != self.frame_size {
            // Detector buffers are sized per frame length.
            self.frame_size = frame.len();
            self.detector = McLeodDetector::new(self.frame_size, self.frame_size / 2);
        }
        // Energy gating happens upstream, so no power threshold here.
        let pitch = self.detector.get_pitch(
            frame,
            sample_rate as usize,
            0.0,
            self.clarity_threshold,
        )?;
        let hz = pitch.frequency;
        if hz.is_finite() && hz >= self.min_hz && hz <= self.max_hz {
            Some(hz)
        } else {
            None
        }
    }
}
