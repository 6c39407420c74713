use crate::config::Settings;
use crate::note::{Note, SpelledNote};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

// ─── Audio data ─────────────────────────────────────────────────────────────

/// A fixed-size frame of audio from the capture collaborator (or simulator).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Microseconds since session clock start, read when the frame arrived
    pub timestamp_us: u64,
    /// Mono f32 samples, normalized -1.0 to 1.0
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

// ─── Session state ──────────────────────────────────────────────────────────

/// Practice session states. Serialized with the display names the UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PracticeState {
    Idle,
    Countdown,
    #[serde(rename = "New Note")]
    NewNote,
    Listening,
    Feedback,
}

impl fmt::Display for PracticeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PracticeState::Idle => "Idle",
            PracticeState::Countdown => "Countdown",
            PracticeState::NewNote => "New Note",
            PracticeState::Listening => "Listening",
            PracticeState::Feedback => "Feedback",
        };
        f.write_str(s)
    }
}

/// Running score for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Score {
    pub correct: u32,
    pub incorrect: u32,
    /// Mean seconds from draw to correct answer, `None` before the first
    pub average_time_to_correct: Option<f64>,
}

impl Score {
    /// Rounded percentage of correct answers, 0 before any answer.
    pub fn accuracy_percent(&self) -> u32 {
        let total = self.correct + self.incorrect;
        if total == 0 {
            return 0;
        }
        (100.0 * self.correct as f64 / total as f64).round() as u32
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = match self.average_time_to_correct {
            Some(t) => format!("{:.2}s", t),
            None => "---".to_string(),
        };
        write!(
            f,
            "correct={} incorrect={} accuracy={}% time={}",
            self.correct,
            self.incorrect,
            self.accuracy_percent(),
            time
        )
    }
}

/// Outcome of one answered trial, as reported to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub timestamp_us: u64,
    pub target: Note,
    /// Target as displayed (possibly an enharmonic spelling)
    pub target_spelled: SpelledNote,
    pub detected: Note,
    pub correct: bool,
    /// Seconds from draw to this answer
    pub elapsed_secs: f64,
    /// Target's accuracy EMA after this answer
    pub target_accuracy: Option<f64>,
    /// Target's time-to-correct EMA after this answer
    pub target_time_to_correct: Option<f64>,
    pub score: Score,
}

impl fmt::Display for TrialReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>10}µs  target={:<4} played={:<4} {}  {:.2}s",
            self.timestamp_us,
            self.target_spelled.to_string(),
            self.detected.to_string(),
            if self.correct { "+1" } else { "-1" },
            self.elapsed_secs,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Stop command from the UI
    Requested,
    /// Session timer reached zero
    TimeUp,
    /// The session could not continue (e.g. no eligible notes)
    Failed,
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

/// Commands the UI issues into the session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Start,
    Stop,
    UpdateSettings(Box<Settings>),
}

/// Everything the coordinator consumes, serialized on one queue.
#[derive(Debug, Clone)]
pub enum InputEvent {
    Audio(AudioFrame),
    Command(SessionCommand),
    /// Timer tick at the given session-clock time (µs)
    Tick(u64),
}

/// Everything the session reports to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        state: PracticeState,
    },
    Countdown {
        remaining_secs: u32,
    },
    NewTarget {
        target: Note,
        spelled: SpelledNote,
        note_index: usize,
        image: String,
    },
    TrialResolved(TrialReport),
    Timer {
        remaining_secs: u64,
    },
    Stopped {
        reason: StopReason,
        score: Score,
    },
    Error {
        message: String,
    },
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the practice session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

/// Capture sample rate requested from the audio device.
pub const SAMPLE_RATE: u32 = 44100;

/// Samples per analysis frame.
pub const FRAME_SIZE: usize = 4096;

/// Shortest frame the pitch estimator can work with. Sources clamp to it.
pub const MIN_FRAME_SIZE: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_accuracy_percent() {
        assert_eq!(Score::default().accuracy_percent(), 0);
        let s = Score {
            correct: 2,
            incorrect: 1,
            average_time_to_correct: Some(1.5),
        };
        assert_eq!(s.accuracy_percent(), 67);
        assert!(s.to_string().contains("1.50s"));
    }

    #[test]
    fn test_event_json_shape() {
        let ev = SessionEvent::StateChanged {
            state: PracticeState::NewNote,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"state_changed","state":"New Note"}"#);
    }
}
