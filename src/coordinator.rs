use crate::session::Session;
use crate::types::*;
use crossbeam_channel::{never, select, tick, Receiver, Sender};
use log::{debug, info, trace};
use std::time::{Duration, Instant};

/// The coordinator receives InputEvents (audio frames, UI commands, timer
/// ticks), drives the practice session with them one at a time, and fans
/// the resulting SessionEvents out to downstream consumers.
///
/// All session state lives on this one thread, so frames, commands and
/// timer expiry are totally ordered.
///
/// # Timers
///
/// With a tick interval set, the coordinator injects `InputEvent::Tick` at
/// that rate from its own clock. Without one, ticks must arrive on the
/// input channel (tests and offline replay do this to control time).
pub struct Coordinator {
    input_rx: Receiver<InputEvent>,
    event_txs: Vec<Sender<SessionEvent>>,
    session: Session,
    clock: SessionClock,
    tick_interval: Option<Duration>,
    /// Return from `run` once the session stops
    pub exit_on_stop: bool,
}

impl Coordinator {
    pub fn new(
        input_rx: Receiver<InputEvent>,
        event_txs: Vec<Sender<SessionEvent>>,
        session: Session,
        clock: SessionClock,
    ) -> Self {
        Self {
            input_rx,
            event_txs,
            session,
            clock,
            tick_interval: None,
            exit_on_stop: false,
        }
    }

    /// Generate timer ticks internally at `interval`.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn with_exit_on_stop(mut self, enabled: bool) -> Self {
        self.exit_on_stop = enabled;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until the input channel closes (or the session stops, with
    /// `exit_on_stop`). Returns the session for inspection.
    pub fn run(mut self) -> Session {
        info!(
            "Coordinator running (ticks: {})",
            match self.tick_interval {
                Some(d) => format!("every {}ms", d.as_millis()),
                None => "external".to_string(),
            }
        );

        let ticker: Receiver<Instant> = match self.tick_interval {
            Some(d) => tick(d),
            None => never(),
        };
        let mut frame_count: u64 = 0;

        loop {
            let event = select! {
                recv(self.input_rx) -> msg => match msg {
                    Ok(ev) => ev,
                    Err(_) => break,
                },
                recv(ticker) -> _ => InputEvent::Tick(self.clock.now_us()),
            };

            if let InputEvent::Audio(_) = event {
                frame_count += 1;
                if frame_count % 500 == 0 {
                    debug!("Coordinator: {} frames processed", frame_count);
                }
            }

            if self.dispatch(event) && self.exit_on_stop {
                break;
            }
        }

        info!("Coordinator shutting down after {} frames", frame_count);
        self.session
    }

    /// Feed one event to the session and broadcast what it produces.
    /// Returns true if the session stopped.
    fn dispatch(&mut self, event: InputEvent) -> bool {
        let now = self.clock.now_us();
        let mut stopped = false;
        for out in self.session.handle(event, now) {
            trace!("Session event: {:?}", out);
            stopped |= matches!(out, SessionEvent::Stopped { .. });
            for tx in &self.event_txs {
                let _ = tx.send(out.clone());
            }
        }
        stopped
    }
}
