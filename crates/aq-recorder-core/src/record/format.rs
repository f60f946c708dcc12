use crate::{CoreResult, RecorderError};

use std::{fmt, str::FromStr};

/// Format flag bits stored in [`StreamFormat::format_flags`].
///
/// Values match the linear PCM flags of the CAF `desc` chunk, so the
/// container can write them through unchanged.
pub mod format_flags {
    /// Samples are IEEE floats rather than signed integers.
    pub const LINEAR_PCM_IS_FLOAT: u32 = 1 << 0;
    /// Samples are stored little-endian.
    pub const LINEAR_PCM_IS_LITTLE_ENDIAN: u32 = 1 << 1;
}

/// Codec identifier of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// Uncompressed interleaved linear PCM.
    LinearPcm,
    /// MPEG-4 AAC (variable-size packets, requires a cookie).
    Aac,
}

impl CodecId {
    /// The four-character code written into the container's description.
    pub fn four_cc(self) -> [u8; 4] {
        match self {
            Self::LinearPcm => *b"lpcm",
            Self::Aac => *b"aac ",
        }
    }

    /// Whether packets of this codec are encoder output rather than raw frames.
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Aac)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinearPcm => f.write_str("lpcm"),
            Self::Aac => f.write_str("aac"),
        }
    }
}

impl FromStr for CodecId {
    type Err = RecorderError;

    #[track_caller]
    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lpcm" | "pcm" => Ok(Self::LinearPcm),
            "aac" => Ok(Self::Aac),
            other => Err(RecorderError::configuration(
                "parse_codec",
                format!("unknown codec '{}' (expected 'lpcm' or 'aac')", other),
            )),
        }
    }
}

/// Description of the recorded stream.
///
/// Built in two steps: a partial description holding only the codec and
/// channel count, then a completed one from the backend and the engine. A
/// zero in any size field means "not fixed for this format".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    /// Codec of the packets.
    pub codec: CodecId,
    /// Frames per second.
    pub sample_rate: f64,
    /// Interleaved channels in each frame.
    pub channels_per_frame: u32,
    /// Codec specific flags, see [`format_flags`].
    pub format_flags: u32,
    /// Bytes in one packet, or 0 when packet sizes vary.
    pub bytes_per_packet: u32,
    /// Frames in one packet, or 0 when it varies.
    pub frames_per_packet: u32,
    /// Bytes in one frame, or 0 for compressed formats.
    pub bytes_per_frame: u32,
    /// Bits per sample in one channel, or 0 for compressed formats.
    pub bits_per_channel: u32,
}

impl StreamFormat {
    /// A format carrying only the codec and channel count.
    pub fn partial(codec: CodecId, channels_per_frame: u32) -> Self {
        Self {
            codec,
            sample_rate: 0.0,
            channels_per_frame,
            format_flags: 0,
            bytes_per_packet: 0,
            frames_per_packet: 0,
            bytes_per_frame: 0,
            bits_per_channel: 0,
        }
    }

    /// Interleaved little-endian signed integer PCM, one frame per packet.
    pub fn linear_pcm(sample_rate: f64, channels_per_frame: u32, bits_per_channel: u32) -> Self {
        let bytes_per_frame = channels_per_frame * bits_per_channel.div_ceil(8);

        Self {
            codec: CodecId::LinearPcm,
            sample_rate,
            channels_per_frame,
            format_flags: format_flags::LINEAR_PCM_IS_LITTLE_ENDIAN,
            bytes_per_packet: bytes_per_frame,
            frames_per_packet: 1,
            bytes_per_frame,
            bits_per_channel,
        }
    }

    /// Packets differ in size and must be described individually.
    pub fn has_variable_packets(&self) -> bool {
        self.bytes_per_packet == 0 || self.frames_per_packet == 0
    }

    /// Sample rate and channel count are usable.
    pub fn has_valid_rate_and_channels(&self) -> bool {
        self.sample_rate.is_finite() && self.sample_rate > 0.0 && self.channels_per_frame > 0
    }
}

/// Location and size of one packet inside a filled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketDescription {
    /// Byte offset of the packet from the start of the buffer.
    pub start_offset: u64,
    /// Frames in this packet when the format does not fix it, else 0.
    pub variable_frames: u32,
    /// Bytes in this packet.
    pub data_byte_size: u32,
}
