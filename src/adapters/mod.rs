pub mod audio_cpal;
pub mod config_store;
pub mod playback_cpal;

pub use audio_cpal::{CpalMediaDevices, CpalMediaStream};
pub use config_store::TomlConfigStore;
pub use playback_cpal::CpalAudioOutput;
