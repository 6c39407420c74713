use pitch_drill::capture::{CaptureControl, ListenFlag};
use pitch_drill::config::{Settings, Tuning};
use pitch_drill::console_display;
use pitch_drill::coordinator;
use pitch_drill::data_logger;
use pitch_drill::note::{index_of, Instrument, Note};
use pitch_drill::pitch::McLeodEstimator;
use pitch_drill::selector::SelectionMethod;
use pitch_drill::session::Session;
use pitch_drill::simulator;
use pitch_drill::store::JsonFileStore;
use pitch_drill::types::*;
use pitch_drill::wav_player;
#[cfg(feature = "audio")]
use pitch_drill::audio_input;

use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pitch-drill")]
#[command(about = "Ear-training note drill: play the note shown, get scored")]
struct Cli {
    /// Answer prompts with a simulated player (default when no other input is given)
    #[arg(long)]
    simulate: bool,

    /// Use a WAV recording as the input instead of a microphone
    #[arg(long)]
    audio_file: Option<PathBuf>,

    /// Capture from the default microphone (requires the 'audio' feature)
    #[arg(long)]
    mic: bool,

    /// Settings and stats file
    #[arg(long, default_value = "./pitch-drill.json")]
    store: PathBuf,

    /// Instrument: guitar or piano (resets the note range to its default)
    #[arg(long)]
    instrument: Option<Instrument>,

    /// Lowest note to practise, e.g. E2
    #[arg(long)]
    lowest: Option<Note>,

    /// Highest note to practise, e.g. C6
    #[arg(long)]
    highest: Option<Note>,

    /// Microphone sensitivity level, 0 (least) to 8 (most)
    #[arg(long)]
    sensitivity: Option<usize>,

    /// Session length in seconds, 0 for untimed
    #[arg(long)]
    timer: Option<u32>,

    /// Countdown before the first note, in seconds
    #[arg(long)]
    countdown: Option<u32>,

    /// Note draw method: random, accuracy-based or time-based
    #[arg(long)]
    method: Option<SelectionMethod>,

    /// Draw a new note after a mistake instead of retrying
    #[arg(long)]
    change_note_on_mistake: Option<bool>,

    /// Show targets with random enharmonic spellings
    #[arg(long)]
    enharmonic: Option<bool>,

    /// Show the note name alongside its image
    #[arg(long)]
    show_note_name: Option<bool>,

    /// Forget all per-note stats before starting
    #[arg(long)]
    reset_stats: bool,

    /// Disable the console display
    #[arg(long)]
    no_console: bool,

    /// Enable trial logging
    #[arg(long)]
    log_data: bool,

    /// Output directory for logged sessions
    #[arg(long, default_value = "./sessions")]
    output_dir: PathBuf,

    /// Samples per analysis frame (at least 256)
    #[arg(long, default_value_t = FRAME_SIZE, value_parser = parse_frame_size)]
    frame_size: usize,

    /// Timer resolution (ms)
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Fraction of deliberately wrong answers from the simulated player
    #[arg(long, default_value_t = 0.2)]
    mistake_rate: f64,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let clock = SessionClock::new();

    let mut store = JsonFileStore::open(&cli.store);
    let settings = match apply_overrides(Settings::load(&store), &cli) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };
    settings.save(&mut store);

    let simulate = cli.simulate || (cli.audio_file.is_none() && !cli.mic);
    let mode = if simulate {
        "SIMULATOR"
    } else if cli.audio_file.is_some() {
        "WAV FILE"
    } else {
        "MICROPHONE"
    };

    info!("═══════════════════════════════════════════════");
    info!("  PITCH DRILL v{}", env!("CARGO_PKG_VERSION"));
    info!("  Instrument: {:?}", settings.instrument);
    info!(
        "  Range: {}..={} ({} notes), method {}",
        settings.note_index_range.min(),
        settings.note_index_range.max(),
        settings.note_index_range.len(),
        settings.draw_method
    );
    info!("  Mode: {}", mode);
    info!("  Store: {:?}", store.path());
    info!("═══════════════════════════════════════════════");

    // Channel: inputs → coordinator
    let (input_tx, input_rx) = bounded::<InputEvent>(4096);

    // Channels: coordinator → consumers
    let mut event_txs: Vec<Sender<SessionEvent>> = Vec::new();
    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if !cli.no_console {
        let (tx, rx) = bounded::<SessionEvent>(256);
        event_txs.push(tx);
        let show_name = settings.show_note_name;
        handles.push(spawn("display", move || {
            console_display::ConsoleDisplay::new(rx, show_name).run();
        }));
    }

    // ─── Data logger ────────────────────────────────────────────────
    if cli.log_data {
        let (tx, rx) = bounded::<SessionEvent>(1024);
        match data_logger::DataLogger::new(rx, &cli.output_dir, settings.clone()) {
            Ok(logger) => {
                event_txs.push(tx);
                handles.push(spawn("logger", move || logger.run()));
            }
            Err(e) => error!("Data logging disabled: {}", e),
        }
    }

    // ─── Input source ───────────────────────────────────────────────
    let listen = ListenFlag::new();
    let capture: Box<dyn CaptureControl + Send> = if simulate {
        spawn_simulator(&input_tx, &clock, cli.frame_size, &listen, &mut event_txs, &cli, &mut handles);
        Box::new(listen.clone())
    } else if let Some(path) = &cli.audio_file {
        let source = match wav_player::WavSource::open(path) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to open WAV file {:?}: {}", path, e);
                process::exit(1);
            }
        };
        info!("WAV: {} Hz", source.sample_rate());
        let player = wav_player::WavPlayer::new(
            source,
            input_tx.clone(),
            clock.clone(),
            listen.clone(),
            cli.frame_size,
        );
        // Detached: a player waiting on a closed flag never finishes on its own.
        let _ = spawn("wav-player", move || player.run());
        Box::new(listen.clone())
    } else {
        #[cfg(feature = "audio")]
        let capture = mic_capture(&input_tx, &clock, cli.frame_size);
        #[cfg(not(feature = "audio"))]
        let capture: Box<dyn CaptureControl + Send> = {
            warn!("Microphone capture requires the 'audio' feature. Falling back to simulator.");
            spawn_simulator(&input_tx, &clock, cli.frame_size, &listen, &mut event_txs, &cli, &mut handles);
            Box::new(listen.clone())
        };
        capture
    };

    // ─── Session ────────────────────────────────────────────────────
    let estimator = McLeodEstimator::new(cli.frame_size);
    let mut session = match Session::new(
        settings,
        Tuning::default(),
        Box::new(estimator),
        Box::new(store),
        capture,
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("Cannot build session: {}", e);
            process::exit(2);
        }
    };
    if cli.reset_stats {
        info!("Resetting per-note stats");
        session.reset_stats();
    }

    // ─── Coordinator ────────────────────────────────────────────────
    let tick = Duration::from_millis(cli.tick_ms.max(1));
    let coord_clock = clock.clone();
    let coordinator_handle = spawn("coordinator", move || {
        let session = coordinator::Coordinator::new(input_rx, event_txs, session, coord_clock)
            .with_tick_interval(tick)
            .with_exit_on_stop(true)
            .run();
        info!("Final score: {}", session.score());
    });

    if input_tx.send(InputEvent::Command(SessionCommand::Start)).is_err() {
        error!("Coordinator exited before the session could start");
    }
    drop(input_tx);

    info!("Running. Press Ctrl+C to stop.");
    let _ = coordinator_handle.join();
    for h in handles {
        let _ = h.join();
    }
}

/// Fold command-line overrides into the stored settings.
fn apply_overrides(mut settings: Settings, cli: &Cli) -> Result<Settings, String> {
    if let Some(instrument) = cli.instrument {
        if instrument != settings.instrument {
            let defaults = Settings::for_instrument(instrument);
            settings.instrument = instrument;
            settings.note_index_range = defaults.note_index_range;
        }
    }
    if cli.lowest.is_some() || cli.highest.is_some() {
        let min = match &cli.lowest {
            Some(n) => index_of(n).ok_or_else(|| format!("{} is outside the note table", n))?,
            None => settings.note_index_range.min(),
        };
        let max = match &cli.highest {
            Some(n) => index_of(n).ok_or_else(|| format!("{} is outside the note table", n))?,
            None => settings.note_index_range.max(),
        };
        settings.note_index_range = pitch_drill::config::NoteRange::practice(min, max)
            .map_err(|e| e.to_string())?;
    }
    if let Some(s) = cli.sensitivity {
        settings.mic_sensitivity_index = s;
    }
    if let Some(t) = cli.timer {
        settings.timer_secs = if t == 0 { None } else { Some(t) };
    }
    if let Some(c) = cli.countdown {
        settings.countdown_secs = c;
    }
    if let Some(m) = cli.method {
        settings.draw_method = m;
    }
    if let Some(v) = cli.change_note_on_mistake {
        settings.change_note_on_mistake = v;
    }
    if let Some(v) = cli.enharmonic {
        settings.enharmonic_spellings = v;
    }
    if let Some(v) = cli.show_note_name {
        settings.show_note_name = v;
    }
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

fn spawn_simulator(
    input_tx: &Sender<InputEvent>,
    clock: &SessionClock,
    frame_size: usize,
    listen: &ListenFlag,
    event_txs: &mut Vec<Sender<SessionEvent>>,
    cli: &Cli,
    handles: &mut Vec<thread::JoinHandle<()>>,
) {
    info!("Starting simulated player...");
    let (tx, rx) = bounded::<SessionEvent>(256);
    event_txs.push(tx);
    let mut sim = simulator::Simulator::new(clock.clone(), input_tx.clone(), rx, listen.clone())
        .with_frame_size(frame_size)
        .with_mistake_rate(cli.mistake_rate);
    handles.push(spawn("simulator", move || sim.run()));
}

#[cfg(feature = "audio")]
fn mic_capture(
    input_tx: &Sender<InputEvent>,
    clock: &SessionClock,
    frame_size: usize,
) -> Box<dyn CaptureControl + Send> {
    info!("Using default microphone");
    Box::new(audio_input::MicCapture::new(input_tx.clone(), clock.clone(), frame_size))
}

fn parse_frame_size(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("{}", e))?;
    if n < MIN_FRAME_SIZE {
        return Err(format!("frame size must be at least {} samples", MIN_FRAME_SIZE));
    }
    Ok(n)
}

fn spawn<F>(name: &str, f: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.into()).spawn(f) {
        Ok(h) => h,
        Err(e) => {
            error!("Failed to spawn {} thread: {}", name, e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_lower_bound() {
        assert!(parse_frame_size("0").is_err());
        assert!(parse_frame_size("255").is_err());
        assert_eq!(parse_frame_size("256"), Ok(256));
        assert_eq!(parse_frame_size("4096"), Ok(4096));
        assert!(parse_frame_size("abc").is_err());
    }

    #[test]
    fn test_cli_rejects_zero_frame_size() {
        assert!(Cli::try_parse_from(["pitch-drill", "--frame-size", "0"]).is_err());
        let cli = Cli::try_parse_from(["pitch-drill"]).unwrap();
        assert_eq!(cli.frame_size, FRAME_SIZE);
    }
}
