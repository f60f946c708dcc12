#[allow(clippy::module_inception)]
mod config;
mod recording_config;

pub(crate) use {
    config::Config,
    recording_config::{CodecSetting, RecordingConfig},
};

use aq_recorder_core::{DEFAULT_BUFFER_DURATION_SECS, DEFAULT_RECORD_BUFFERS};

use std::path::PathBuf;

pub(crate) const DEFAULT_OUTPUT_PATH: &str = "recording.caf";
pub(crate) const DEFAULT_CHANNELS: u32 = 2;
pub(crate) const MAX_CHANNELS: u32 = 8;

pub(crate) fn default_output_path() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_PATH)
}

pub(crate) fn default_channels() -> u32 {
    DEFAULT_CHANNELS
}

pub(crate) fn default_buffer_count() -> usize {
    DEFAULT_RECORD_BUFFERS
}

pub(crate) fn default_buffer_duration_secs() -> f64 {
    DEFAULT_BUFFER_DURATION_SECS
}
