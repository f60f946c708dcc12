use crate::config::{
    default_buffer_count, default_buffer_duration_secs, default_channels, default_output_path,
};

use aq_recorder_core::{CodecId, SessionConfig};

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Codec names accepted in `config.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecSetting {
    /// Interleaved 16-bit linear PCM.
    #[default]
    Lpcm,
    /// MPEG-4 AAC.
    Aac,
}

impl From<CodecSetting> for CodecId {
    fn from(codec: CodecSetting) -> Self {
        match codec {
            CodecSetting::Lpcm => CodecId::LinearPcm,
            CodecSetting::Aac => CodecId::Aac,
        }
    }
}

/// Recording session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Output file. Relative paths resolve against the working directory.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// Codec to record with.
    #[serde(default)]
    pub codec: CodecSetting,
    /// Channels per frame.
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Buffers kept in flight.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    /// Seconds of audio per buffer.
    #[serde(default = "default_buffer_duration_secs")]
    pub buffer_duration_secs: f64,
    /// Stop automatically after this many seconds (None = until stopped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<f64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            codec: CodecSetting::default(),
            channels: default_channels(),
            buffer_count: default_buffer_count(),
            buffer_duration_secs: default_buffer_duration_secs(),
            max_duration_secs: None,
        }
    }
}

impl RecordingConfig {
    /// Session settings for the core controller.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            output_path: self.output_path.clone(),
            codec: self.codec.into(),
            channels: self.channels,
            buffer_count: self.buffer_count,
            buffer_duration_secs: self.buffer_duration_secs,
        }
    }

    /// Automatic stop delay, if one is configured.
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}
