use crate::config::Settings;
use crate::types::*;
use crossbeam_channel::Receiver;
use log::{error, info};
use serde_json::json;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Records a practice run to disk: `manifest.json` (settings in force),
/// `trials.jsonl` (one `TrialReport` per line) and `summary.json` (final
/// score), all under a per-run directory.
pub struct DataLogger {
    rx: Receiver<SessionEvent>,
    session_dir: PathBuf,
    settings: Settings,
}

impl DataLogger {
    pub fn new(rx: Receiver<SessionEvent>, output_dir: &Path, settings: Settings) -> io::Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let session_dir = output_dir.join(format!("session_{}", timestamp));
        fs::create_dir_all(&session_dir)?;

        Ok(Self {
            rx,
            session_dir,
            settings,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Run the logger until the event channel closes. Blocks the calling thread.
    pub fn run(&self) {
        info!("Data logger → {:?}", self.session_dir);

        if let Err(e) = self.write_manifest() {
            error!("Failed to write manifest: {}", e);
        }

        let trials_path = self.session_dir.join("trials.jsonl");
        let mut trials_writer = match File::create(&trials_path) {
            Ok(f) => BufWriter::new(f),
            Err(e) => {
                error!("Failed to create {:?}: {}", trials_path, e);
                return;
            }
        };

        let mut trial_count: u64 = 0;
        let mut last_score = Score::default();
        let mut stop_reason: Option<StopReason> = None;

        for event in self.rx.iter() {
            match event {
                SessionEvent::TrialResolved(report) => {
                    match serde_json::to_string(&report) {
                        Ok(line) => {
                            let _ = writeln!(trials_writer, "{}", line);
                        }
                        Err(e) => error!("Failed to serialize trial: {}", e),
                    }
                    last_score = report.score;
                    trial_count += 1;
                    if trial_count % 20 == 0 {
                        let _ = trials_writer.flush();
                    }
                }
                SessionEvent::Stopped { reason, score } => {
                    last_score = score;
                    stop_reason = Some(reason);
                    let _ = trials_writer.flush();
                }
                _ => {}
            }
        }

        let _ = trials_writer.flush();

        let summary = json!({
            "trials": trial_count,
            "stop_reason": stop_reason,
            "score": last_score,
            "accuracy_percent": last_score.accuracy_percent(),
        });
        let written = serde_json::to_string_pretty(&summary)
            .map_err(io::Error::from)
            .and_then(|s| fs::write(self.session_dir.join("summary.json"), s));
        if let Err(e) = written {
            error!("Failed to write summary: {}", e);
        }

        info!(
            "Session saved: {} trials ({}) → {:?}",
            trial_count, last_score, self.session_dir
        );
    }

    fn write_manifest(&self) -> io::Result<()> {
        let manifest = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "system": "pitch-drill",
            "settings": self.settings,
            "audio_config": {
                "channels": 1,
                "sample_rate": SAMPLE_RATE,
                "frame_size": FRAME_SIZE,
            },
        });
        let path = self.session_dir.join("manifest.json");
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)
    }
}
