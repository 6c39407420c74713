pub mod capture;
pub mod config;
pub mod console_display;
pub mod coordinator;
pub mod data_logger;
pub mod dsp;
pub mod error;
pub mod gate;
pub mod note;
pub mod pitch;
pub mod resolver;
pub mod selector;
pub mod session;
pub mod simulator;
pub mod stats;
pub mod store;
pub mod types;
pub mod wav_player;

#[cfg(feature = "audio")]
pub mod audio_input;
