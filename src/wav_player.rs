use crate::capture::ListenFlag;
use crate::dsp::mix_mono;
use crate::types::*;
use crossbeam_channel::Sender;
use hound::{SampleFormat, WavReader};
use log::{info, warn};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// A WAV file decoded to mono f32, ready to be played into a session.
#[derive(Debug, Clone)]
pub struct WavSource {
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self, hound::Error> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<_, _>>()?
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "WAV: {}  {} Hz  {} ch  {:?}  {} bit",
            name, spec.sample_rate, channels, spec.sample_format, spec.bits_per_sample,
        );
        if spec.sample_rate != SAMPLE_RATE {
            warn!(
                "WAV sample rate is {} Hz (capture default {} Hz); pitch analysis will use the file rate",
                spec.sample_rate, SAMPLE_RATE
            );
        }

        Ok(Self {
            name,
            samples: mix_mono(&interleaved, channels),
            sample_rate: spec.sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Streams a WAV file as audio frames at real-time pace, standing in for
/// the microphone.
///
/// Frames are only produced while the session's listen flag is open;
/// playback pauses (without advancing) while it is closed. When the file
/// runs out the player asks the session to stop.
pub struct WavPlayer {
    source: WavSource,
    tx: Sender<InputEvent>,
    clock: SessionClock,
    listening: ListenFlag,
    frame_size: usize,
}

const IDLE_POLL: Duration = Duration::from_millis(10);

impl WavPlayer {
    pub fn new(
        source: WavSource,
        tx: Sender<InputEvent>,
        clock: SessionClock,
        listening: ListenFlag,
        frame_size: usize,
    ) -> Self {
        Self {
            source,
            tx,
            clock,
            listening,
            frame_size: frame_size.max(MIN_FRAME_SIZE),
        }
    }

    /// Blocks until the file is exhausted or the coordinator goes away.
    pub fn run(&self) {
        let frame_dur =
            Duration::from_secs_f64(self.frame_size as f64 / self.source.sample_rate as f64);
        info!(
            "WAV: {:.2}s of {} → streaming at real-time pace",
            self.source.duration_secs(),
            self.source.name
        );

        // Trailing partial frame is dropped.
        let mut frames = self.source.samples.chunks_exact(self.frame_size);
        let mut next_due = Instant::now();

        loop {
            if !self.listening.is_open() {
                thread::sleep(IDLE_POLL);
                next_due = Instant::now();
                continue;
            }

            let Some(chunk) = frames.next() else { break };

            let now = Instant::now();
            if now < next_due {
                thread::sleep(next_due - now);
            }
            next_due += frame_dur;

            let event = InputEvent::Audio(AudioFrame {
                timestamp_us: self.clock.now_us(),
                samples: chunk.to_vec(),
                sample_rate: self.source.sample_rate,
            });
            if self.tx.send(event).is_err() {
                return; // Coordinator shut down
            }
        }

        info!("WAV playback complete.");
        let _ = self.tx.send(InputEvent::Command(SessionCommand::Stop));
    }
}
