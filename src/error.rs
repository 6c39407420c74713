//! Error types for capture, note selection, settings, and the practice session.
//!
//! Silence or an unpitched frame is never an error: the pitch estimator
//! reports it as `None`.

use std::fmt;

/// Failures of the audio capture collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// No input device is present on the host.
    NoInputDevice,
    /// The OS refused microphone access.
    PermissionDenied,
    /// The device only offers a sample format we cannot convert.
    UnsupportedFormat { format: String },
    /// The stream could not be built or started.
    Stream { reason: String },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "no audio input device available"),
            CaptureError::PermissionDenied => write!(f, "microphone permission denied"),
            CaptureError::UnsupportedFormat { format } => {
                write!(f, "unsupported sample format {}", format)
            }
            CaptureError::Stream { reason } => write!(f, "audio stream failed: {}", reason),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Failures of the note selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// Every note in range is excluded, or the range is empty.
    NoEligibleNotes,
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectError::NoEligibleNotes => write!(f, "no eligible notes to draw from"),
        }
    }
}

impl std::error::Error for SelectError {}

/// Rejected settings values.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// Range bounds are reversed or fall outside the note table.
    RangeOutOfTable { min: usize, max: usize },
    /// Range spans fewer notes than the minimum practice range.
    RangeTooNarrow { min: usize, max: usize },
    /// Sensitivity index has no noise-floor level.
    SensitivityOutOfRange { index: usize },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::RangeOutOfTable { min, max } => {
                write!(f, "note range [{}, {}] is not inside the note table", min, max)
            }
            SettingsError::RangeTooNarrow { min, max } => {
                write!(f, "note range [{}, {}] is narrower than the minimum", min, max)
            }
            SettingsError::SensitivityOutOfRange { index } => {
                write!(f, "sensitivity index {} has no noise floor level", index)
            }
        }
    }
}

impl std::error::Error for SettingsError {}

/// Stats values outside the unit interval cannot be coloured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsError {
    ValueOutOfRange { value: f64 },
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::ValueOutOfRange { value } => {
                write!(f, "stat value {} must be between 0 and 1", value)
            }
        }
    }
}

impl std::error::Error for StatsError {}

/// Errors surfaced by practice session commands.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Capture(CaptureError),
    Select(SelectError),
    Settings(SettingsError),
    /// Start was issued while a session is already running.
    NotIdle,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Capture(e) => write!(f, "capture unavailable: {}", e),
            SessionError::Select(e) => write!(f, "note selection failed: {}", e),
            SessionError::Settings(e) => write!(f, "invalid settings: {}", e),
            SessionError::NotIdle => write!(f, "session already running"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Capture(e) => Some(e),
            SessionError::Select(e) => Some(e),
            SessionError::Settings(e) => Some(e),
            SessionError::NotIdle => None,
        }
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::Capture(err)
    }
}

impl From<SelectError> for SessionError {
    fn from(err: SelectError) -> Self {
        SessionError::Select(err)
    }
}

impl From<SettingsError> for SessionError {
    fn from(err: SettingsError) -> Self {
        SessionError::Settings(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_wraps_source() {
        let err: SessionError = SelectError::NoEligibleNotes.into();
        assert_eq!(err, SessionError::Select(SelectError::NoEligibleNotes));
        assert!(err.to_string().contains("no eligible notes"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_capture_error_message() {
        let err = SessionError::from(CaptureError::PermissionDenied);
        assert_eq!(
            err.to_string(),
            "capture unavailable: microphone permission denied"
        );
    }
}
