use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{error, info, warn};
use std::thread::{self, JoinHandle};

use crate::capture::CaptureControl;
use crate::dsp::mix_mono;
use crate::error::CaptureError;
use crate::types::{AudioFrame, InputEvent, SessionClock, MIN_FRAME_SIZE, SAMPLE_RATE};

/// Live microphone capture via cpal.
///
/// cpal streams cannot leave the thread that built them, so each `start`
/// spawns a capture thread that owns the stream, accumulates callback
/// buffers into fixed-size frames, and sends them as `InputEvent::Audio`.
/// `stop` signals that thread and joins it; the stream is dropped there.
pub struct MicCapture {
    tx: Sender<InputEvent>,
    clock: SessionClock,
    frame_size: usize,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl MicCapture {
    pub fn new(tx: Sender<InputEvent>, clock: SessionClock, frame_size: usize) -> Self {
        Self {
            tx,
            clock,
            frame_size: frame_size.max(MIN_FRAME_SIZE),
            worker: None,
        }
    }
}

impl CaptureControl for MicCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<u32, CaptureError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let tx = self.tx.clone();
        let clock = self.clock.clone();
        let frame_size = self.frame_size;

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || match open_stream() {
                Ok((stream, raw_rx, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    pump_frames(&raw_rx, &stop_rx, &tx, &clock, frame_size, sample_rate);
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CaptureError::Stream {
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!("Microphone open at {} Hz, {}-sample frames", sample_rate, frame_size);
                self.worker = Some((stop_tx, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Stream {
                    reason: "capture thread exited during startup".into(),
                })
            }
        }
    }

    fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                error!("Audio capture thread panicked");
            }
            info!("Microphone closed");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accumulate raw callback buffers into frames until told to stop.
fn pump_frames(
    raw_rx: &Receiver<Vec<f32>>,
    stop_rx: &Receiver<()>,
    tx: &Sender<InputEvent>,
    clock: &SessionClock,
    frame_size: usize,
    sample_rate: u32,
) {
    let mut accum: Vec<f32> = Vec::with_capacity(frame_size * 2);
    loop {
        select! {
            recv(stop_rx) -> _ => return,
            recv(raw_rx) -> chunk => {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(_) => return,
                };
                accum.extend_from_slice(&chunk);
                while accum.len() >= frame_size {
                    let samples: Vec<f32> = accum.drain(..frame_size).collect();
                    let event = InputEvent::Audio(AudioFrame {
                        timestamp_us: clock.now_us(),
                        samples,
                        sample_rate,
                    });
                    if tx.send(event).is_err() {
                        return; // Coordinator gone
                    }
                }
            }
        }
    }
}

/// Open the default input device and start a stream feeding mono buffers
/// into the returned channel.
fn open_stream() -> Result<(Stream, Receiver<Vec<f32>>, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    info!(
        "Audio input: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let supported = device
        .default_input_config()
        .map_err(|e| stream_error(e.to_string()))?;

    // Prefer the analysis rate when the device offers it.
    let preferred = cpal::SampleRate(SAMPLE_RATE);
    let matched = device.supported_input_configs().ok().and_then(|configs| {
        configs
            .filter(|c| {
                c.channels() == supported.channels()
                    && c.min_sample_rate() <= preferred
                    && c.max_sample_rate() >= preferred
            })
            .max_by_key(|c| c.max_sample_rate())
            .map(|c| c.with_sample_rate(preferred))
    });

    let (config, sample_rate, format): (StreamConfig, u32, SampleFormat) = match matched {
        Some(cfg) => {
            let sr = cfg.sample_rate().0;
            let fmt = cfg.sample_format();
            (cfg.into(), sr, fmt)
        }
        None => {
            let sr = supported.sample_rate().0;
            warn!("Device does not offer {} Hz, capturing at {} Hz", SAMPLE_RATE, sr);
            let fmt = supported.sample_format();
            (supported.into(), sr, fmt)
        }
    };
    let channels = config.channels as usize;
    info!("Capture config: {}Hz  {} ch  {:?}", sample_rate, channels, format);

    // Realtime callback → capture thread. try_send never blocks the callback.
    let (raw_tx, raw_rx) = bounded::<Vec<f32>>(64);
    let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                let _ = raw_tx.try_send(mix_mono(data, channels));
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let _ = raw_tx.try_send(mix_mono(&i16_to_f32(data), channels));
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| {
                let _ = raw_tx.try_send(mix_mono(&u16_to_f32(data), channels));
            },
            err_fn,
            None,
        ),
        fmt => {
            return Err(CaptureError::UnsupportedFormat {
                format: format!("{fmt:?}"),
            })
        }
    }
    .map_err(build_error)?;

    stream.play().map_err(|e| stream_error(e.to_string()))?;
    Ok((stream, raw_rx, sample_rate))
}

fn build_error(e: BuildStreamError) -> CaptureError {
    match e {
        BuildStreamError::DeviceNotAvailable => CaptureError::NoInputDevice,
        other => stream_error(other.to_string()),
    }
}

/// Backends report refused microphone access only as text.
fn stream_error(reason: String) -> CaptureError {
    if reason.to_lowercase().contains("permission") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Stream { reason }
    }
}

fn i16_to_f32(data: &[i16]) -> Vec<f32> {
    const SCALE: f32 = i16::MAX as f32;
    data.iter().map(|&s| s as f32 / SCALE).collect()
}

fn u16_to_f32(data: &[u16]) -> Vec<f32> {
    // 0 = -1.0, 32768 = 0.0, 65535 = +1.0
    const MID: f32 = 32768.0;
    data.iter().map(|&s| (s as f32 - MID) / MID).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_sample_scaling() {
        assert_eq!(i16_to_f32(&[0, i16::MAX]), vec![0.0, 1.0]);
        assert_eq!(u16_to_f32(&[0, 32768]), vec![-1.0, 0.0]);
    }

    #[test]
    fn test_permission_text_maps_to_denied() {
        assert_eq!(
            stream_error("Permission denied by the OS".into()),
            CaptureError::PermissionDenied
        );
        assert!(matches!(
            stream_error("device busy".into()),
            CaptureError::Stream { .. }
        ));
    }
}
