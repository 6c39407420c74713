use crate::capture::ListenFlag;
use crate::note::Note;
use crate::resolver::note_frequency;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread;
use std::time::Duration;

/// A virtual player that answers the session's prompts with synthetic audio,
/// exercising the full pipeline without a microphone.
///
/// It watches the session's event stream: on each new target, and each
/// return to Listening, it waits a reaction time and then plays a note as
/// sine frames (preceded by a silent frame so the gate sees an onset). A
/// configurable fraction of answers are deliberately wrong.
pub struct Simulator {
    clock: SessionClock,
    tx: Sender<InputEvent>,
    events_rx: Receiver<SessionEvent>,
    listening: ListenFlag,
    sample_rate: u32,
    frame_size: usize,
    /// Probability of playing a wrong note
    mistake_rate: f64,
    reaction: Duration,
    /// Loud frames sent per answer
    sustain_frames: usize,
    amplitude: f64,
    rng: StdRng,
    /// Monotonic sample counter for phase-continuous tone generation.
    sample_counter: u64,
}

impl Simulator {
    pub fn new(
        clock: SessionClock,
        tx: Sender<InputEvent>,
        events_rx: Receiver<SessionEvent>,
        listening: ListenFlag,
    ) -> Self {
        Self {
            clock,
            tx,
            events_rx,
            listening,
            sample_rate: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            mistake_rate: 0.2,
            reaction: Duration::from_millis(400),
            sustain_frames: 3,
            amplitude: 0.3,
            rng: StdRng::from_entropy(),
            sample_counter: 0,
        }
    }

    pub fn with_mistake_rate(mut self, rate: f64) -> Self {
        self.mistake_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_reaction(mut self, reaction: Duration) -> Self {
        self.reaction = reaction;
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(MIN_FRAME_SIZE);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Answer prompts until the session event channel closes.
    /// Blocks the calling thread.
    pub fn run(&mut self) {
        info!(
            "Simulator ready (mistake rate {:.0}%, reaction {}ms)",
            self.mistake_rate * 100.0,
            self.reaction.as_millis()
        );
        let mut target: Option<Note> = None;

        while let Ok(event) = self.events_rx.recv() {
            match event {
                SessionEvent::NewTarget { target: t, .. } => target = Some(t),
                SessionEvent::StateChanged {
                    state: PracticeState::Listening,
                } => {
                    if let Some(t) = target {
                        if !self.answer(t) {
                            return;
                        }
                    }
                }
                SessionEvent::Stopped { score, .. } => {
                    info!("Simulator: session over ({})", score);
                    target = None;
                }
                _ => {}
            }
        }
        info!("Simulator finished.");
    }

    /// Play an answer to `target`. Returns false if the coordinator is gone.
    fn answer(&mut self, target: Note) -> bool {
        if !self.reaction.is_zero() {
            thread::sleep(self.reaction);
        }
        if !self.listening.is_open() {
            return true;
        }

        let played = if self.rng.gen_bool(self.mistake_rate) {
            let sign: i64 = if self.rng.gen_bool(0.5) { 1 } else { -1 };
            let offset: i64 = self.rng.gen_range(1..=2);
            Note::from_semitone(target.semitone() + sign * offset)
        } else {
            target
        };
        debug!("Simulator: target {} → playing {}", target, played);

        let hz = note_frequency(&played);
        if !self.send_frame(vec![0.0; self.frame_size]) {
            return false;
        }
        for _ in 0..self.sustain_frames {
            let frame = self.tone_frame(hz);
            if !self.send_frame(frame) {
                return false;
            }
        }
        self.send_frame(vec![0.0; self.frame_size])
    }

    fn tone_frame(&mut self, hz: f64) -> Vec<f32> {
        let sr = self.sample_rate as f64;
        let start = self.sample_counter;
        self.sample_counter += self.frame_size as u64;
        (0..self.frame_size as u64)
            .map(|i| (self.amplitude * (2.0 * PI * hz * (start + i) as f64 / sr).sin()) as f32)
            .collect()
    }

    fn send_frame(&mut self, samples: Vec<f32>) -> bool {
        let event = InputEvent::Audio(AudioFrame {
            timestamp_us: self.clock.now_us(),
            samples,
            sample_rate: self.sample_rate,
        });
        self.tx.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureControl;
    use crate::note::{PitchClass, SpelledNote};
    use crate::pitch::{McLeodEstimator, PitchEstimator};
    use crate::resolver::note_from_frequency;
    use crossbeam_channel::unbounded;

    fn prompt(target: Note) -> Vec<SessionEvent> {
        vec![
            SessionEvent::NewTarget {
                target,
                spelled: target.spelled(),
                note_index: 0,
                image: SpelledNote::image_path(None, 0),
            },
            SessionEvent::StateChanged {
                state: PracticeState::Listening,
            },
        ]
    }

    fn played_notes(rx: &Receiver<InputEvent>) -> Vec<Option<Note>> {
        let mut estimator = McLeodEstimator::new(FRAME_SIZE);
        rx.try_iter()
            .filter_map(|e| match e {
                InputEvent::Audio(f) if f.samples.iter().any(|&s| s != 0.0) => Some(f),
                _ => None,
            })
            .map(|f| {
                estimator
                    .estimate(&f.samples, f.sample_rate)
                    .and_then(|hz| note_from_frequency(hz as f64))
            })
            .collect()
    }

    #[test]
    fn test_plays_target_when_listening() {
        let (tx, rx) = unbounded();
        let (ev_tx, ev_rx) = unbounded();
        let mut flag = ListenFlag::new();
        flag.start().unwrap();

        let a3 = Note::new(PitchClass::A, 3);
        for e in prompt(a3) {
            ev_tx.send(e).unwrap();
        }
        drop(ev_tx);

        Simulator::new(SessionClock::new(), tx, ev_rx, flag)
            .with_mistake_rate(0.0)
            .with_reaction(Duration::ZERO)
            .run();

        let notes = played_notes(&rx);
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().all(|n| *n == Some(a3)), "{:?}", notes);
    }

    #[test]
    fn test_always_wrong_never_plays_target() {
        let (tx, rx) = unbounded();
        let (ev_tx, ev_rx) = unbounded();
        let mut flag = ListenFlag::new();
        flag.start().unwrap();

        let e3 = Note::new(PitchClass::E, 3);
        for e in prompt(e3) {
            ev_tx.send(e).unwrap();
        }
        drop(ev_tx);

        Simulator::new(SessionClock::new(), tx, ev_rx, flag)
            .with_mistake_rate(1.0)
            .with_reaction(Duration::ZERO)
            .with_rng(StdRng::seed_from_u64(5))
            .run();

        let notes = played_notes(&rx);
        assert!(!notes.is_empty());
        assert!(notes.iter().all(|n| *n != Some(e3)));
    }

    #[test]
    fn test_silent_when_capture_closed() {
        let (tx, rx) = unbounded();
        let (ev_tx, ev_rx) = unbounded();
        for e in prompt(Note::new(PitchClass::C, 4)) {
            ev_tx.send(e).unwrap();
        }
        drop(ev_tx);

        Simulator::new(SessionClock::new(), tx, ev_rx, ListenFlag::new())
            .with_reaction(Duration::ZERO)
            .run();
        assert!(rx.try_iter().next().is_none());
    }
}
