//! Practice session state machine.
//!
//! ```text
//! Idle ──start──▶ Countdown ──0──▶ New Note ──draw──▶ Listening
//!   ▲                                 ▲                  │ onset + note
//!   │ stop / time up                  │ correct, or      ▼
//!   └──────── any state               └─ change note ─ Feedback ─ retry ─▶ Listening
//! ```
//!
//! The session owns every piece of mutable practice state and is driven one
//! event at a time: audio frames, timer ticks, and UI commands. Pending
//! timers are plain deadlines held here, so stopping the session drops them
//! and no stale transition can fire afterwards.

use crate::capture::CaptureControl;
use crate::config::{Settings, Tuning};
use crate::error::{SelectError, SessionError, SettingsError};
use crate::gate::SignalGate;
use crate::note::{Note, SpelledNote, ENHARMONIC_NAMES};
use crate::pitch::PitchEstimator;
use crate::selector::{candidate_pool, draw_note, draw_spelling};
use crate::stats::{NoteStats, PerformanceModel, RecentNotes};
use crate::store::{self, KeyValueStore};
use crate::types::*;
use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

const US_PER_SEC: u64 = 1_000_000;

/// One Listening → Feedback cycle.
#[derive(Debug, Clone)]
struct Trial {
    target: Note,
    spelled: SpelledNote,
    drawn_at_us: u64,
    detected: Option<Note>,
    onset_us: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    CountdownTick,
    FeedbackDone { correct: bool },
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    due_us: u64,
    kind: TimerKind,
}

pub struct Session {
    settings: Settings,
    tuning: Tuning,
    gate: SignalGate,
    estimator: Box<dyn PitchEstimator + Send>,
    model: PerformanceModel,
    store: Box<dyn KeyValueStore + Send>,
    capture: Box<dyn CaptureControl + Send>,
    rng: StdRng,
    state: PracticeState,
    trial: Option<Trial>,
    pending: Option<Timer>,
    countdown_remaining: u32,
    deadline_us: Option<u64>,
    last_timer_secs: Option<u64>,
    correct: u32,
    incorrect: u32,
    total_correct_secs: f64,
}

impl Session {
    /// Build a session. Performance stats and the recent-note buffer are
    /// loaded from `store`; anything missing or malformed starts fresh.
    pub fn new(
        settings: Settings,
        tuning: Tuning,
        estimator: Box<dyn PitchEstimator + Send>,
        store: Box<dyn KeyValueStore + Send>,
        capture: Box<dyn CaptureControl + Send>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let gate = SignalGate::new(settings.noise_floor()?);
        let model = load_model(&*store, tuning.half_life);
        Ok(Self {
            settings,
            tuning,
            gate,
            estimator,
            model,
            store,
            capture,
            rng: StdRng::from_entropy(),
            state: PracticeState::Idle,
            trial: None,
            pending: None,
            countdown_remaining: 0,
            deadline_us: None,
            last_timer_secs: None,
            correct: 0,
            incorrect: 0,
            total_correct_secs: 0.0,
        })
    }

    /// Use a fixed random source (reproducible draws).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> PracticeState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn model(&self) -> &PerformanceModel {
        &self.model
    }

    /// Current target, while a trial is live.
    pub fn target(&self) -> Option<Note> {
        self.trial.as_ref().map(|t| t.target)
    }

    /// Note detected for the current trial, if it has been answered.
    pub fn detected(&self) -> Option<Note> {
        self.trial.as_ref().and_then(|t| t.detected)
    }

    pub fn score(&self) -> Score {
        Score {
            correct: self.correct,
            incorrect: self.incorrect,
            average_time_to_correct: if self.correct > 0 {
                Some(self.total_correct_secs / self.correct as f64)
            } else {
                None
            },
        }
    }

    /// Dispatch one event. `now_us` timestamps commands; frames and ticks
    /// carry their own time.
    pub fn handle(&mut self, event: InputEvent, now_us: u64) -> Vec<SessionEvent> {
        match event {
            InputEvent::Audio(frame) => self.on_frame(&frame),
            InputEvent::Tick(t) => self.on_tick(t),
            InputEvent::Command(SessionCommand::Start) => match self.start(now_us) {
                Ok(events) => events,
                Err(e) => {
                    error!("Session start failed: {}", e);
                    vec![SessionEvent::Error {
                        message: e.to_string(),
                    }]
                }
            },
            InputEvent::Command(SessionCommand::Stop) => {
                self.stop(now_us, StopReason::Requested)
            }
            InputEvent::Command(SessionCommand::UpdateSettings(settings)) => {
                match self.apply_settings(*settings) {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        warn!("Settings rejected: {}", e);
                        vec![SessionEvent::Error {
                            message: SessionError::from(e).to_string(),
                        }]
                    }
                }
            }
        }
    }

    /// Begin a session. If capture cannot start the session stays `Idle`.
    pub fn start(&mut self, now_us: u64) -> Result<Vec<SessionEvent>, SessionError> {
        if self.state != PracticeState::Idle {
            return Err(SessionError::NotIdle);
        }
        self.capture.start()?;

        info!(
            "Session started ({} notes {}..={}, method {})",
            self.settings.note_index_range.len(),
            self.settings.note_index_range.min(),
            self.settings.note_index_range.max(),
            self.settings.draw_method
        );

        self.correct = 0;
        self.incorrect = 0;
        self.total_correct_secs = 0.0;
        self.gate.reset();

        let mut events = Vec::new();
        if self.settings.countdown_secs > 0 {
            self.countdown_remaining = self.settings.countdown_secs;
            self.set_state(PracticeState::Countdown, &mut events);
            events.push(SessionEvent::Countdown {
                remaining_secs: self.countdown_remaining,
            });
            self.pending = Some(Timer {
                due_us: now_us + US_PER_SEC,
                kind: TimerKind::CountdownTick,
            });
        } else if let Err(e) = self.begin_practice(now_us, &mut events) {
            self.halt();
            return Err(e.into());
        }
        Ok(events)
    }

    /// Return to `Idle`, stopping capture and cancelling pending timers.
    pub fn stop(&mut self, now_us: u64, reason: StopReason) -> Vec<SessionEvent> {
        if self.state == PracticeState::Idle {
            return Vec::new();
        }
        self.halt();
        let score = self.score();
        info!("Session stopped at t={}µs ({:?}): {}", now_us, reason, score);
        vec![
            SessionEvent::StateChanged {
                state: PracticeState::Idle,
            },
            SessionEvent::Stopped { reason, score },
        ]
    }

    fn halt(&mut self) {
        self.capture.stop();
        self.pending = None;
        self.deadline_us = None;
        self.last_timer_secs = None;
        self.trial = None;
        self.state = PracticeState::Idle;
    }

    /// Replace settings. Takes effect from the next draw; a new sensitivity
    /// applies to the next frame.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        let floor = settings.noise_floor()?;
        if floor != self.gate.threshold() {
            self.gate.set_threshold(floor);
        }
        settings.save(&mut *self.store);
        self.settings = settings;
        Ok(())
    }

    /// Forget all per-note history and persist the empty stats.
    pub fn reset_stats(&mut self) {
        self.model.reset();
        self.persist_stats();
        self.persist_recent();
    }

    /// Gate one frame and, while listening, judge a new onset.
    pub fn on_frame(&mut self, frame: &AudioFrame) -> Vec<SessionEvent> {
        if self.state == PracticeState::Idle {
            trace!("Frame at t={}µs ignored while idle", frame.timestamp_us);
            return Vec::new();
        }
        // Gate runs in every active state so a note ringing through
        // feedback is not mistaken for a new attempt.
        let reading = self.gate.process(frame, &mut *self.estimator);
        if self.state != PracticeState::Listening || !reading.onset {
            return Vec::new();
        }
        match reading.note {
            Some(detected) => self.resolve_trial(detected, frame.timestamp_us, reading.onset_us),
            None => Vec::new(),
        }
    }

    /// Advance timers to `now_us`.
    pub fn on_tick(&mut self, now_us: u64) -> Vec<SessionEvent> {
        if self.state == PracticeState::Idle {
            return Vec::new();
        }
        let mut events = Vec::new();

        if let Some(deadline) = self.deadline_us {
            if now_us >= deadline {
                return self.stop(now_us, StopReason::TimeUp);
            }
            let remaining = (deadline - now_us).div_ceil(US_PER_SEC);
            if self.last_timer_secs != Some(remaining) {
                self.last_timer_secs = Some(remaining);
                events.push(SessionEvent::Timer {
                    remaining_secs: remaining,
                });
            }
        }

        let timer = match self.pending {
            Some(t) if now_us >= t.due_us => t,
            _ => return events,
        };
        self.pending = None;

        let advanced = match timer.kind {
            TimerKind::CountdownTick => {
                self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
                if self.countdown_remaining == 0 {
                    self.begin_practice(now_us, &mut events)
                } else {
                    events.push(SessionEvent::Countdown {
                        remaining_secs: self.countdown_remaining,
                    });
                    self.pending = Some(Timer {
                        due_us: timer.due_us + US_PER_SEC,
                        kind: TimerKind::CountdownTick,
                    });
                    Ok(())
                }
            }
            TimerKind::FeedbackDone { correct } => {
                if correct || self.settings.change_note_on_mistake {
                    self.next_note(now_us, &mut events)
                } else {
                    // Retry the same target.
                    if let Some(trial) = self.trial.as_mut() {
                        trial.detected = None;
                        trial.onset_us = None;
                    }
                    self.set_state(PracticeState::Listening, &mut events);
                    Ok(())
                }
            }
        };

        if let Err(e) = advanced {
            error!("Cannot continue session: {}", e);
            events.push(SessionEvent::Error {
                message: SessionError::from(e).to_string(),
            });
            events.extend(self.stop(now_us, StopReason::Failed));
        }
        events
    }

    /// Start the session timer (if any) and draw the first note.
    fn begin_practice(
        &mut self,
        now_us: u64,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SelectError> {
        if let Some(secs) = self.settings.timer_secs {
            let secs = secs as u64;
            self.deadline_us = Some(now_us + secs * US_PER_SEC);
            self.last_timer_secs = Some(secs);
            events.push(SessionEvent::Timer {
                remaining_secs: secs,
            });
        }
        self.next_note(now_us, events)
    }

    /// New Note → Listening: draw a target and open a trial.
    fn next_note(&mut self, now_us: u64, events: &mut Vec<SessionEvent>) -> Result<(), SelectError> {
        self.set_state(PracticeState::NewNote, events);

        let range = self.settings.note_index_range;
        let candidates = candidate_pool(range, self.model.recent());
        let params = self.tuning.selection(self.settings.draw_method);
        let (target, index) = draw_note(&candidates, &self.model, &params, &mut self.rng)?;
        self.model.push_recent(index, range.len());
        self.persist_recent();

        let spelled = if self.settings.enharmonic_spellings {
            let all: Vec<&str> = ENHARMONIC_NAMES
                .iter()
                .flat_map(|names| names.iter().copied())
                .collect();
            draw_spelling(target, &all, &mut self.rng)
        } else {
            target.spelled()
        };

        debug!(
            "New target {} (shown as {}, index {}, {} candidates)",
            target,
            spelled,
            index,
            candidates.len()
        );

        self.trial = Some(Trial {
            target,
            spelled,
            drawn_at_us: now_us,
            detected: None,
            onset_us: None,
        });
        events.push(SessionEvent::NewTarget {
            target,
            spelled,
            note_index: index,
            image: SpelledNote::image_path(Some(&spelled), self.settings.instrument.octave_shift()),
        });
        self.set_state(PracticeState::Listening, events);
        Ok(())
    }

    /// Listening → Feedback: score the detected note against the target.
    fn resolve_trial(
        &mut self,
        detected: Note,
        now_us: u64,
        onset_us: Option<u64>,
    ) -> Vec<SessionEvent> {
        let trial = match self.trial.as_mut() {
            Some(t) => t,
            None => return Vec::new(),
        };
        trial.detected = Some(detected);
        trial.onset_us = onset_us;

        // Canonical notes: spelling never affects correctness.
        let correct = detected == trial.target;
        let elapsed_secs = now_us.saturating_sub(trial.drawn_at_us) as f64 / US_PER_SEC as f64;
        let target = trial.target;
        let target_spelled = trial.spelled;

        self.model.record_answer(&target, correct, elapsed_secs);
        self.persist_stats();

        if correct {
            self.correct += 1;
            self.total_correct_secs += elapsed_secs;
        } else {
            self.incorrect += 1;
        }

        self.pending = Some(Timer {
            due_us: now_us + self.tuning.feedback_ms * 1000,
            kind: TimerKind::FeedbackDone { correct },
        });

        let report = TrialReport {
            timestamp_us: now_us,
            target,
            target_spelled,
            detected,
            correct,
            elapsed_secs,
            target_accuracy: self.model.accuracy(&target),
            target_time_to_correct: self.model.time_to_correct(&target),
            score: self.score(),
        };
        debug!("Trial: {}", report);

        let mut events = Vec::new();
        self.set_state(PracticeState::Feedback, &mut events);
        events.push(SessionEvent::TrialResolved(report));
        events
    }

    fn set_state(&mut self, state: PracticeState, events: &mut Vec<SessionEvent>) {
        if self.state != state {
            trace!("State {} → {}", self.state, state);
            self.state = state;
            events.push(SessionEvent::StateChanged { state });
        }
    }

    fn persist_stats(&mut self) {
        store::save(
            &mut *self.store,
            store::KEY_NOTE_ACCURACIES,
            self.model.accuracies(),
        );
        store::save(
            &mut *self.store,
            store::KEY_NOTE_TIMES,
            self.model.times_to_correct(),
        );
    }

    fn persist_recent(&mut self) {
        store::save(
            &mut *self.store,
            store::KEY_NOTE_INDEX_BUFFER,
            &self.model.recent().to_vec(),
        );
    }
}

/// Performance model from stored stats, defaulting whatever is missing.
pub fn load_model(store: &dyn KeyValueStore, half_life: f64) -> PerformanceModel {
    let accuracy: NoteStats = store::load_or(store, store::KEY_NOTE_ACCURACIES, NoteStats::new());
    let times: NoteStats = store::load_or(store, store::KEY_NOTE_TIMES, NoteStats::new());
    let buffer: Vec<usize> = store::load_or(store, store::KEY_NOTE_INDEX_BUFFER, Vec::new());
    PerformanceModel::from_parts(half_life, accuracy, times, RecentNotes::from_indexes(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ListenFlag;
    use crate::error::CaptureError;
    use crate::note::PitchClass;
    use crate::resolver::note_frequency;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Reports whatever pitch the test last set.
    #[derive(Clone, Default)]
    struct ScriptedEstimator {
        pitch: Arc<Mutex<Option<f32>>>,
    }

    impl ScriptedEstimator {
        fn set(&self, hz: Option<f32>) {
            *self.pitch.lock().unwrap() = hz;
        }
    }

    impl PitchEstimator for ScriptedEstimator {
        fn estimate(&mut self, _frame: &[f32], _sample_rate: u32) -> Option<f32> {
            *self.pitch.lock().unwrap()
        }
    }

    struct DeniedCapture;

    impl CaptureControl for DeniedCapture {
        fn start(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::PermissionDenied)
        }
        fn stop(&mut self) {}
    }

    fn quick_settings() -> Settings {
        let mut s = Settings::default();
        s.countdown_secs = 0;
        s.timer_secs = None;
        s
    }

    fn session_with(settings: Settings) -> (Session, ScriptedEstimator, ListenFlag) {
        let est = ScriptedEstimator::default();
        let flag = ListenFlag::new();
        let session = Session::new(
            settings,
            Tuning::default(),
            Box::new(est.clone()),
            Box::new(MemoryStore::new()),
            Box::new(flag.clone()),
        )
        .unwrap()
        .with_rng(StdRng::seed_from_u64(9));
        (session, est, flag)
    }

    fn loud(ts: u64) -> AudioFrame {
        AudioFrame {
            timestamp_us: ts,
            samples: vec![0.5; 512],
            sample_rate: 44100,
        }
    }

    fn silent(ts: u64) -> AudioFrame {
        AudioFrame {
            timestamp_us: ts,
            samples: vec![0.0; 512],
            sample_rate: 44100,
        }
    }

    /// Play `note` from silence at `ts`.
    fn play(session: &mut Session, est: &ScriptedEstimator, note: Note, ts: u64) -> Vec<SessionEvent> {
        est.set(None);
        session.on_frame(&silent(ts));
        est.set(Some(note_frequency(&note) as f32));
        session.on_frame(&loud(ts + 1))
    }

    fn resolved(events: &[SessionEvent]) -> Option<&TrialReport> {
        events.iter().find_map(|e| match e {
            SessionEvent::TrialResolved(r) => Some(r),
            _ => None,
        })
    }

    #[test]
    fn test_denied_capture_stays_idle() {
        let mut session = Session::new(
            quick_settings(),
            Tuning::default(),
            Box::new(ScriptedEstimator::default()),
            Box::new(MemoryStore::new()),
            Box::new(DeniedCapture),
        )
        .unwrap();
        let err = session.start(0).unwrap_err();
        assert_eq!(err, SessionError::Capture(CaptureError::PermissionDenied));
        assert_eq!(session.state(), PracticeState::Idle);
        assert!(session.on_tick(10 * US_PER_SEC).is_empty());

        let events = session.handle(InputEvent::Command(SessionCommand::Start), 0);
        assert!(matches!(events.as_slice(), [SessionEvent::Error { .. }]));
        assert_eq!(session.state(), PracticeState::Idle);
    }

    #[test]
    fn test_start_draws_target_in_range() {
        let (mut session, _, flag) = session_with(quick_settings());
        let events = session.start(0).unwrap();
        assert!(flag.is_open());
        assert_eq!(session.state(), PracticeState::Listening);
        let range = session.settings().note_index_range;
        let index = events
            .iter()
            .find_map(|e| match e {
                SessionEvent::NewTarget { note_index, .. } => Some(*note_index),
                _ => None,
            })
            .expect("new target");
        assert!(range.indexes().contains(&index));
        assert!(session.start(1).is_err());
    }

    #[test]
    fn test_countdown_then_listening() {
        let mut settings = quick_settings();
        settings.countdown_secs = 3;
        let (mut session, _, _) = session_with(settings);
        session.start(0).unwrap();
        assert_eq!(session.state(), PracticeState::Countdown);
        session.on_tick(US_PER_SEC);
        session.on_tick(2 * US_PER_SEC);
        assert_eq!(session.state(), PracticeState::Countdown);
        let events = session.on_tick(3 * US_PER_SEC);
        assert_eq!(session.state(), PracticeState::Listening);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::NewTarget { .. })));
    }

    #[test]
    fn test_correct_answer_updates_stats_and_advances() {
        let (mut session, est, _) = session_with(quick_settings());
        session.start(0).unwrap();
        let target = session.target().unwrap();

        let events = play(&mut session, &est, target, 1_500_000);
        let report = resolved(&events).expect("trial resolved");
        assert!(report.correct);
        assert_eq!(session.state(), PracticeState::Feedback);
        assert_eq!(session.model().accuracy(&target), Some(1.0));
        assert!((report.elapsed_secs - 1.500001).abs() < 1e-6);
        assert_eq!(session.score().correct, 1);

        // Feedback holds until the feedback duration passes.
        assert!(session.on_tick(1_600_000).is_empty());
        let events = session.on_tick(2_200_000);
        assert_eq!(session.state(), PracticeState::Listening);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::NewTarget { .. })));
    }

    #[test]
    fn test_ringing_note_not_judged_twice() {
        let (mut session, est, _) = session_with(quick_settings());
        session.start(0).unwrap();
        let target = session.target().unwrap();
        play(&mut session, &est, target, 100);
        session.on_tick(US_PER_SEC);
        assert_eq!(session.state(), PracticeState::Listening);
        // The same level keeps ringing into the next trial.
        for i in 0..5 {
            assert!(session.on_frame(&loud(US_PER_SEC + i)).is_empty());
        }
        assert_eq!(session.state(), PracticeState::Listening);
    }

    #[test]
    fn test_mistake_retries_same_target() {
        let (mut session, est, _) = session_with(quick_settings());
        session.start(0).unwrap();
        let target = session.target().unwrap();
        let wrong = Note::from_semitone(target.semitone() + 1);

        let events = play(&mut session, &est, wrong, 100);
        assert!(!resolved(&events).unwrap().correct);
        assert_eq!(session.model().accuracy(&target), Some(0.0));
        assert_eq!(session.model().time_to_correct(&target), None);

        let events = session.on_tick(US_PER_SEC);
        assert_eq!(session.state(), PracticeState::Listening);
        assert_eq!(session.target(), Some(target));
        assert_eq!(session.detected(), None);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::NewTarget { .. })));
    }

    #[test]
    fn test_mistake_changes_note_when_configured() {
        let mut settings = quick_settings();
        settings.change_note_on_mistake = true;
        let (mut session, est, _) = session_with(settings);
        session.start(0).unwrap();
        let target = session.target().unwrap();
        play(&mut session, &est, Note::from_semitone(target.semitone() + 2), 100);
        let events = session.on_tick(US_PER_SEC);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::NewTarget { .. })));
    }

    #[test]
    fn test_stop_cancels_pending_feedback() {
        let (mut session, est, flag) = session_with(quick_settings());
        session.start(0).unwrap();
        let target = session.target().unwrap();
        play(&mut session, &est, target, 100);
        let events = session.stop(200, StopReason::Requested);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Stopped {
                reason: StopReason::Requested,
                ..
            })
        ));
        assert!(!flag.is_open());
        assert!(session.on_tick(10 * US_PER_SEC).is_empty());
        assert_eq!(session.state(), PracticeState::Idle);
        assert_eq!(session.target(), None);
    }

    #[test]
    fn test_timer_expiry_stops_session() {
        let mut settings = quick_settings();
        settings.timer_secs = Some(60);
        let (mut session, _, _) = session_with(settings);
        let events = session.start(0).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Timer { remaining_secs: 60 })));
        let events = session.on_tick(30 * US_PER_SEC + 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Timer { remaining_secs: 30 })));
        let events = session.on_tick(60 * US_PER_SEC);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Stopped {
                reason: StopReason::TimeUp,
                ..
            }
        )));
        assert_eq!(session.state(), PracticeState::Idle);
    }

    #[test]
    fn test_enharmonic_targets_judged_canonically() {
        let mut settings = quick_settings();
        settings.enharmonic_spellings = true;
        let (mut session, est, _) = session_with(settings);
        session.start(0).unwrap();
        let mut respelled = 0;
        let mut t = 0;
        for _ in 0..20 {
            let target = session.target().unwrap();
            t += 100_000;
            let events = play(&mut session, &est, target, t);
            let report = resolved(&events).unwrap();
            assert!(report.correct);
            assert_eq!(report.target_spelled.to_note(), target);
            if report.target_spelled != target.spelled() {
                respelled += 1;
            }
            t += US_PER_SEC;
            session.on_tick(t);
        }
        assert!(respelled > 0);
    }

    #[test]
    fn test_stats_persist_and_reload() {
        let est = ScriptedEstimator::default();
        let mut session = Session::new(
            quick_settings(),
            Tuning::default(),
            Box::new(est.clone()),
            Box::new(MemoryStore::new()),
            Box::new(ListenFlag::new()),
        )
        .unwrap();
        session.start(0).unwrap();
        let target = session.target().unwrap();
        play(&mut session, &est, target, 2_000_000);
        let accuracies = session.model().accuracies().clone();

        let mut saved = MemoryStore::new();
        store::save(&mut saved, store::KEY_NOTE_ACCURACIES, &accuracies);
        saved.set_raw(store::KEY_NOTE_TIMES, json!({"c4": "fast"}));
        let model = load_model(&saved, 5.0);
        assert_eq!(model.accuracy(&target), Some(1.0));
        // Malformed times fall back to fresh stats
        assert_eq!(model.time_to_correct(&Note::new(PitchClass::C, 4)), None);
    }

    #[test]
    fn test_corrupt_stored_times_do_not_starve_draws() {
        use crate::selector::{SelectionMethod, SelectionParams};

        let mut saved = MemoryStore::new();
        saved.set_raw(store::KEY_NOTE_TIMES, json!({"c4": -30.0}));
        let model = load_model(&saved, 5.0);
        assert_eq!(model.time_to_correct(&Note::new(PitchClass::C, 4)), None);

        let pool: Vec<usize> = (48..=53).collect();
        let params = SelectionParams::new(SelectionMethod::TimeBased);
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0u32; 6];
        for _ in 0..6_000 {
            let (_, idx) = draw_note(&pool, &model, &params, &mut rng).unwrap();
            counts[idx - 48] += 1;
        }
        // All unattempted, so roughly uniform.
        assert!(counts.iter().all(|&c| c > 800), "counts={:?}", counts);
    }

    #[test]
    fn test_settings_update_changes_floor() {
        let (mut session, est, _) = session_with(quick_settings());
        let mut settings = quick_settings();
        settings.mic_sensitivity_index = 0; // floor 0.04
        session.apply_settings(settings).unwrap();
        session.start(0).unwrap();
        est.set(Some(440.0));
        let quiet = AudioFrame {
            timestamp_us: 10,
            samples: vec![0.03; 512],
            sample_rate: 44100,
        };
        assert!(session.on_frame(&quiet).is_empty());

        let mut bad = quick_settings();
        bad.mic_sensitivity_index = 20;
        assert!(session.apply_settings(bad).is_err());
    }
}
