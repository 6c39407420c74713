//! Start/stop control over whatever is producing audio frames.

use crate::error::CaptureError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Audio capture collaborator as seen by the session.
///
/// `start` is where OS-level failures (no device, permission denied) surface.
/// After `stop` returns no further frames should be produced.
pub trait CaptureControl {
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self);
}

/// Shared open/closed flag for software frame sources (simulator, WAV file).
///
/// The session holds one clone as its capture control; the source holds
/// another and only emits frames while it is open.
#[derive(Debug, Clone, Default)]
pub struct ListenFlag {
    open: Arc<AtomicBool>,
}

impl ListenFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl CaptureControl for ListenFlag {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_shared_between_clones() {
        let mut control = ListenFlag::new();
        let source = control.clone();
        assert!(!source.is_open());
        control.start().unwrap();
        assert!(source.is_open());
        control.stop();
        assert!(!source.is_open());
    }
}
