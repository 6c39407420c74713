//! Signal gate and onset detector.
//!
//! Each frame's RMS energy is compared with a noise floor chosen from a small
//! set of sensitivity levels. Frames at or below the floor never reach the
//! pitch estimator. Above the floor, a frame counts as a new onset only when
//! its energy exceeds the floor plus the previous frame's gated energy, so a
//! ringing note does not register as a fresh attempt.

use crate::dsp::compute_rms;
use crate::error::SettingsError;
use crate::note::Note;
use crate::pitch::PitchEstimator;
use crate::resolver::note_from_frequency;
use crate::types::AudioFrame;
use log::trace;

/// Noise floor RMS per microphone sensitivity level, least to most sensitive.
pub const MIN_PITCH_RMS: [f32; 9] = [0.04, 0.035, 0.03, 0.025, 0.02, 0.015, 0.01, 0.005, 0.0];

pub const DEFAULT_SENSITIVITY_INDEX: usize = 4;

/// Noise floor for a sensitivity index.
pub fn noise_floor(sensitivity_index: usize) -> Result<f32, SettingsError> {
    MIN_PITCH_RMS
        .get(sensitivity_index)
        .copied()
        .ok_or(SettingsError::SensitivityOutOfRange {
            index: sensitivity_index,
        })
}

/// What the gate saw in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateReading {
    pub rms: f32,
    /// Estimated fundamental, `None` when gated out or unpitched
    pub frequency: Option<f32>,
    pub note: Option<Note>,
    /// True only on the frame where a new onset began
    pub onset: bool,
    /// Timestamp of the most recent onset (unchanged unless `onset`)
    pub onset_us: Option<u64>,
}

pub struct SignalGate {
    threshold: f32,
    /// Gated energy of the previous frame
    prev_energy: f32,
    last_onset_us: Option<u64>,
}

impl SignalGate {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            prev_energy: threshold,
            last_onset_us: None,
        }
    }

    pub fn from_sensitivity(sensitivity_index: usize) -> Result<Self, SettingsError> {
        Ok(Self::new(noise_floor(sensitivity_index)?))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the noise floor. Energy state restarts from the new floor.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
        self.prev_energy = threshold;
    }

    /// Forget energy and onset history, as at the start of a session.
    pub fn reset(&mut self) {
        self.prev_energy = self.threshold;
        self.last_onset_us = None;
    }

    pub fn last_onset_us(&self) -> Option<u64> {
        self.last_onset_us
    }

    /// Gate one frame, running `estimator` only if the frame clears the floor.
    pub fn process(
        &mut self,
        frame: &AudioFrame,
        estimator: &mut dyn PitchEstimator,
    ) -> GateReading {
        let rms = compute_rms(&frame.samples);

        // Exactly at the floor is still gated.
        if rms <= self.threshold {
            self.prev_energy = self.threshold;
            return GateReading {
                rms,
                frequency: None,
                note: None,
                onset: false,
                onset_us: self.last_onset_us,
            };
        }

        let frequency = estimator.estimate(&frame.samples, frame.sample_rate);
        let note = frequency.and_then(|hz| note_from_frequency(hz as f64));

        let onset = rms > self.threshold + self.prev_energy;
        if onset {
            self.last_onset_us = Some(frame.timestamp_us);
        }
        self.prev_energy = rms;

        trace!(
            "gate: rms={:.4} floor={:.3} freq={:?} note={:?} onset={}",
            rms,
            self.threshold,
            frequency,
            note,
            onset
        );

        GateReading {
            rms,
            frequency,
            note,
            onset,
            onset_us: self.last_onset_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::{frame_with_rms, sine_frame};
    use crate::note::PitchClass;

    /// Records calls and returns a fixed pitch.
    struct SpyEstimator {
        calls: usize,
        pitch: Option<f32>,
    }

    impl PitchEstimator for SpyEstimator {
        fn estimate(&mut self, _frame: &[f32], _sample_rate: u32) -> Option<f32> {
            self.calls += 1;
            self.pitch
        }
    }

    fn frame(ts: u64, samples: Vec<f32>) -> AudioFrame {
        AudioFrame {
            timestamp_us: ts,
            samples,
            sample_rate: 44100,
        }
    }

    #[test]
    fn test_below_floor_skips_estimator() {
        let mut gate = SignalGate::new(0.02);
        let mut spy = SpyEstimator {
            calls: 0,
            pitch: Some(440.0),
        };
        let r = gate.process(&frame(0, frame_with_rms(0.01, 256)), &mut spy);
        assert_eq!(spy.calls, 0);
        assert_eq!(r.frequency, None);
        assert_eq!(r.note, None);
        assert!(!r.onset);
    }

    #[test]
    fn test_exactly_at_floor_is_gated() {
        let mut gate = SignalGate::new(0.25);
        let mut spy = SpyEstimator {
            calls: 0,
            pitch: Some(440.0),
        };
        let r = gate.process(&frame(0, frame_with_rms(0.25, 256)), &mut spy);
        assert_eq!(spy.calls, 0);
        assert!(!r.onset);
    }

    #[test]
    fn test_sustained_note_single_onset() {
        let mut gate = SignalGate::new(0.02);
        let mut spy = SpyEstimator {
            calls: 0,
            pitch: Some(440.0),
        };
        let first = gate.process(&frame(100, frame_with_rms(0.5, 256)), &mut spy);
        let second = gate.process(&frame(200, frame_with_rms(0.5, 256)), &mut spy);
        assert!(first.onset);
        assert!(!second.onset);
        assert_eq!(second.onset_us, Some(100));
        assert_eq!(spy.calls, 2);
        assert_eq!(second.note, Some(Note::new(PitchClass::A, 4)));
    }

    #[test]
    fn test_crescendo_onset_at_crossing_frame() {
        let mut gate = SignalGate::new(0.2);
        let mut spy = SpyEstimator {
            calls: 0,
            pitch: Some(220.0),
        };
        let quiet = gate.process(&frame(0, frame_with_rms(0.01, 256)), &mut spy);
        let loud = gate.process(&frame(1, frame_with_rms(0.5, 256)), &mut spy);
        assert!(!quiet.onset);
        assert!(loud.onset);
        assert_eq!(loud.onset_us, Some(1));
        assert_eq!(spy.calls, 1);
    }

    #[test]
    fn test_reattack_after_decay() {
        let mut gate = SignalGate::new(0.02);
        let mut spy = SpyEstimator {
            calls: 0,
            pitch: Some(330.0),
        };
        assert!(gate.process(&frame(0, frame_with_rms(0.3, 64)), &mut spy).onset);
        assert!(!gate.process(&frame(1, frame_with_rms(0.1, 64)), &mut spy).onset);
        // Jump well above floor + previous level
        let r = gate.process(&frame(2, frame_with_rms(0.4, 64)), &mut spy);
        assert!(r.onset);
        assert_eq!(r.onset_us, Some(2));
    }

    #[test]
    fn test_sensitivity_levels() {
        assert_eq!(noise_floor(DEFAULT_SENSITIVITY_INDEX), Ok(0.02));
        assert_eq!(noise_floor(8), Ok(0.0));
        assert!(SignalGate::from_sensitivity(9).is_err());
    }

    #[test]
    fn test_real_estimator_resolves_note() {
        let mut gate = SignalGate::from_sensitivity(DEFAULT_SENSITIVITY_INDEX).unwrap();
        let mut est = crate::pitch::McLeodEstimator::new(4096);
        let r = gate.process(&frame(0, sine_frame(261.63, 0.5, 44100, 4096)), &mut est);
        assert!(r.onset);
        assert_eq!(r.note, Some(Note::new(PitchClass::C, 4)));
    }

    #[test]
    fn test_frame_rate_reaches_estimator() {
        // Device fell back to 48 kHz; the estimator was sized for 44.1 kHz defaults.
        let mut gate = SignalGate::from_sensitivity(DEFAULT_SENSITIVITY_INDEX).unwrap();
        let mut est = crate::pitch::McLeodEstimator::new(4096);
        let at_48k = AudioFrame {
            timestamp_us: 0,
            samples: sine_frame(440.0, 0.5, 48000, 4096),
            sample_rate: 48000,
        };
        let r = gate.process(&at_48k, &mut est);
        assert!(r.onset);
        assert_eq!(r.note, Some(Note::new(PitchClass::A, 4)));
    }
}
