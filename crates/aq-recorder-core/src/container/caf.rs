//! Core Audio Format (CAF) file writer.

use crate::{
    ContainerFactory, CoreResult, OutputContainer, PacketDescription, RecorderError,
    StreamFormat,
};

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument};

// CAF layout constants. All multi-byte fields are big-endian.

const CAF_FILE_TYPE: &[u8; 4] = b"caff";
const CAF_FILE_VERSION: u16 = 1;
const CAF_FILE_FLAGS: u16 = 0;

const CHUNK_DESC: &[u8; 4] = b"desc";
const CHUNK_COOKIE: &[u8; 4] = b"kuki";
const CHUNK_DATA: &[u8; 4] = b"data";
const CHUNK_PACKET_TABLE: &[u8; 4] = b"pakt";
/// Readers skip chunks of this type; used to retire a stale cookie.
const CHUNK_FREE: &[u8; 4] = b"free";

/// Chunk type (4 bytes) plus chunk size (8 bytes).
const CHUNK_HEADER_SIZE: u64 = 12;

/// Size of the `desc` chunk body.
const DESC_CHUNK_SIZE: i64 = 32;

/// The `data` chunk body starts with a 4-byte edit count.
const DATA_EDIT_COUNT_SIZE: u64 = 4;

/// Data chunk size meaning "extends to the end of the file".
const UNKNOWN_DATA_SIZE: i64 = -1;

/// Packet count, valid frames, priming frames, remainder frames.
const PACKET_TABLE_HEADER_SIZE: usize = 24;

/// Creates [`CafContainer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CafFactory;

impl ContainerFactory for CafFactory {
    fn create(
        &self,
        path: &Path,
        format: &StreamFormat,
        truncate_existing: bool,
    ) -> CoreResult<Box<dyn OutputContainer>> {
        Ok(Box::new(CafContainer::create(path, format, truncate_existing)?))
    }
}

/// A CAF file being written packet by packet.
///
/// The header and `desc` chunk are written on creation. A cookie set before
/// the first packet lands in a `kuki` chunk ahead of `data`. The `data`
/// chunk is left with an unknown size while recording, so a file cut short
/// by a crash still parses, and its size is patched on close. Variable-size
/// packets get a `pakt` chunk after the data.
pub struct CafContainer {
    path: PathBuf,
    writer: BufWriter<File>,
    format: StreamFormat,
    /// Current file length; every append goes here.
    end: u64,
    cookie: Vec<u8>,
    /// Offset of the `kuki` chunk header once the cookie is on disk.
    cookie_chunk: Option<u64>,
    /// `cookie` has not been written yet.
    cookie_pending: bool,
    /// Offset of the `data` chunk header once packets have started.
    data_chunk: Option<u64>,
    data_bytes: u64,
    packets_written: u64,
    valid_frames: u64,
    packet_table: Vec<u8>,
}

impl CafContainer {
    /// Creates the file and writes the CAF header and stream description.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be created, or already exists
    /// and `truncate_existing` is not set.
    #[track_caller]
    #[instrument(skip(format), fields(codec = %format.codec))]
    pub fn create(
        path: &Path,
        format: &StreamFormat,
        truncate_existing: bool,
    ) -> CoreResult<Self> {
        let mut options = OpenOptions::new();
        options.write(true);
        if truncate_existing {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options
            .open(path)
            .map_err(|e| RecorderError::from_io("create_container", e))?;

        let mut container = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            format: *format,
            end: 0,
            cookie: Vec::new(),
            cookie_chunk: None,
            cookie_pending: false,
            data_chunk: None,
            data_bytes: 0,
            packets_written: 0,
            valid_frames: 0,
            packet_table: Vec::new(),
        };
        container.write_header()?;

        info!(path = ?container.path, "Container created");

        Ok(container)
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream description written into the header.
    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn write_header(&mut self) -> CoreResult<()> {
        let format = self.format;
        let mut header = Vec::with_capacity(8 + CHUNK_HEADER_SIZE as usize + DESC_CHUNK_SIZE as usize);

        header.extend_from_slice(CAF_FILE_TYPE);
        header.extend_from_slice(&CAF_FILE_VERSION.to_be_bytes());
        header.extend_from_slice(&CAF_FILE_FLAGS.to_be_bytes());

        push_chunk_header(&mut header, CHUNK_DESC, DESC_CHUNK_SIZE);
        header.extend_from_slice(&format.sample_rate.to_be_bytes());
        header.extend_from_slice(&format.codec.four_cc());
        header.extend_from_slice(&format.format_flags.to_be_bytes());
        header.extend_from_slice(&format.bytes_per_packet.to_be_bytes());
        header.extend_from_slice(&format.frames_per_packet.to_be_bytes());
        header.extend_from_slice(&format.channels_per_frame.to_be_bytes());
        header.extend_from_slice(&format.bits_per_channel.to_be_bytes());

        self.append("create_container", &header)
    }

    fn append(&mut self, operation: &'static str, bytes: &[u8]) -> CoreResult<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| RecorderError::from_io(operation, e))?;
        self.end += bytes.len() as u64;
        Ok(())
    }

    /// Overwrites bytes already on disk, then returns to the end of file.
    fn patch(&mut self, operation: &'static str, offset: u64, bytes: &[u8]) -> CoreResult<()> {
        self.writer
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.writer.write_all(bytes))
            .and_then(|_| self.writer.seek(SeekFrom::Start(self.end)))
            .map_err(|e| RecorderError::from_io(operation, e))?;
        Ok(())
    }

    fn flush_pending_cookie(&mut self, operation: &'static str) -> CoreResult<()> {
        if !self.cookie_pending {
            return Ok(());
        }

        let offset = self.end;
        let mut chunk = Vec::with_capacity(CHUNK_HEADER_SIZE as usize + self.cookie.len());
        push_chunk_header(&mut chunk, CHUNK_COOKIE, self.cookie.len() as i64);
        chunk.extend_from_slice(&self.cookie);
        self.append(operation, &chunk)?;

        self.cookie_chunk = Some(offset);
        self.cookie_pending = false;
        debug!(offset, cookie_bytes = self.cookie.len(), "Cookie chunk written");

        Ok(())
    }

    fn begin_data(&mut self, operation: &'static str) -> CoreResult<u64> {
        if let Some(offset) = self.data_chunk {
            return Ok(offset);
        }

        self.flush_pending_cookie(operation)?;

        let offset = self.end;
        let mut header = Vec::with_capacity(CHUNK_HEADER_SIZE as usize + DATA_EDIT_COUNT_SIZE as usize);
        push_chunk_header(&mut header, CHUNK_DATA, UNKNOWN_DATA_SIZE);
        header.extend_from_slice(&0u32.to_be_bytes());
        self.append(operation, &header)?;

        self.data_chunk = Some(offset);

        Ok(offset)
    }

    fn write_described(
        &mut self,
        descriptions: &[PacketDescription],
        data: &[u8],
    ) -> CoreResult<()> {
        const OPERATION: &str = "write_packets";

        for desc in descriptions {
            let bytes = usize::try_from(desc.start_offset)
                .ok()
                .and_then(|start| {
                    let end = start.checked_add(desc.data_byte_size as usize)?;
                    data.get(start..end)
                })
                .ok_or_else(|| {
                    RecorderError::io(
                        OPERATION,
                        format!(
                            "packet at offset {} with {} bytes exceeds the {} byte buffer",
                            desc.start_offset,
                            desc.data_byte_size,
                            data.len()
                        ),
                    )
                })?;
            self.append(OPERATION, bytes)?;

            let frames = if self.format.frames_per_packet > 0 {
                self.format.frames_per_packet
            } else {
                desc.variable_frames
            };
            self.data_bytes += u64::from(desc.data_byte_size);
            self.valid_frames += u64::from(frames);

            // Table entries carry only the fields the format leaves open.
            if self.format.bytes_per_packet == 0 {
                encode_varint(u64::from(desc.data_byte_size), &mut self.packet_table);
            }
            if self.format.frames_per_packet == 0 {
                encode_varint(u64::from(frames), &mut self.packet_table);
            }
        }

        Ok(())
    }

    fn write_contiguous(&mut self, packet_count: u32, data: &[u8]) -> CoreResult<()> {
        const OPERATION: &str = "write_packets";

        if self.format.has_variable_packets() {
            return Err(RecorderError::io(
                OPERATION,
                "variable-size packets require packet descriptions",
            ));
        }

        let byte_count = u64::from(packet_count) * u64::from(self.format.bytes_per_packet);
        let bytes = usize::try_from(byte_count)
            .ok()
            .and_then(|len| data.get(..len))
            .ok_or_else(|| {
                RecorderError::io(
                    OPERATION,
                    format!(
                        "{} packets need {} bytes but the buffer holds {}",
                        packet_count,
                        byte_count,
                        data.len()
                    ),
                )
            })?;
        self.append(OPERATION, bytes)?;

        self.data_bytes += byte_count;
        self.valid_frames += u64::from(packet_count) * u64::from(self.format.frames_per_packet);

        Ok(())
    }

    fn write_packet_table(&mut self, operation: &'static str) -> CoreResult<()> {
        let mut chunk =
            Vec::with_capacity(CHUNK_HEADER_SIZE as usize + PACKET_TABLE_HEADER_SIZE + self.packet_table.len());
        push_chunk_header(
            &mut chunk,
            CHUNK_PACKET_TABLE,
            (PACKET_TABLE_HEADER_SIZE + self.packet_table.len()) as i64,
        );
        chunk.extend_from_slice(&(self.packets_written as i64).to_be_bytes());
        chunk.extend_from_slice(&(self.valid_frames as i64).to_be_bytes());
        // Priming and remainder frames.
        chunk.extend_from_slice(&0i32.to_be_bytes());
        chunk.extend_from_slice(&0i32.to_be_bytes());
        chunk.extend_from_slice(&self.packet_table);

        self.append(operation, &chunk)
    }
}

impl OutputContainer for CafContainer {
    fn set_cookie(&mut self, cookie: &[u8]) -> CoreResult<()> {
        const OPERATION: &str = "set_cookie";

        if cookie.is_empty() || cookie == self.cookie.as_slice() {
            return Ok(());
        }

        if self.data_chunk.is_some() {
            if let Some(offset) = self.cookie_chunk {
                if cookie.len() == self.cookie.len() {
                    self.patch(OPERATION, offset + CHUNK_HEADER_SIZE, cookie)?;
                    self.cookie = cookie.to_vec();
                    debug!(offset, "Cookie chunk rewritten in place");
                    return Ok(());
                }

                // Size changed: retire the old chunk, append the new one on close.
                self.patch(OPERATION, offset, CHUNK_FREE)?;
                self.cookie_chunk = None;
            }
        }

        self.cookie = cookie.to_vec();
        self.cookie_pending = true;

        Ok(())
    }

    fn write_packets(
        &mut self,
        start_packet: u64,
        packet_count: u32,
        descriptions: Option<&[PacketDescription]>,
        data: &[u8],
    ) -> CoreResult<()> {
        const OPERATION: &str = "write_packets";

        if start_packet != self.packets_written {
            return Err(RecorderError::io(
                OPERATION,
                format!(
                    "packet {} written out of order, expected {}",
                    start_packet, self.packets_written
                ),
            ));
        }
        if packet_count == 0 {
            return Ok(());
        }

        self.begin_data(OPERATION)?;

        match descriptions {
            Some(descriptions) => {
                let described = descriptions.get(..packet_count as usize).ok_or_else(|| {
                    RecorderError::io(
                        OPERATION,
                        format!(
                            "{} packets but only {} descriptions",
                            packet_count,
                            descriptions.len()
                        ),
                    )
                })?;
                self.write_described(described, data)?;
            }
            None => self.write_contiguous(packet_count, data)?,
        }

        self.packets_written += u64::from(packet_count);

        Ok(())
    }

    fn packet_count(&self) -> u64 {
        self.packets_written
    }

    #[instrument(skip(self), fields(path = ?self.path))]
    fn close(self: Box<Self>) -> CoreResult<()> {
        const OPERATION: &str = "close_container";

        let mut this = *self;

        let data_offset = this.begin_data(OPERATION)?;
        if this.format.has_variable_packets() {
            this.write_packet_table(OPERATION)?;
        }
        this.flush_pending_cookie(OPERATION)?;

        let data_size = (DATA_EDIT_COUNT_SIZE + this.data_bytes) as i64;
        this.patch(OPERATION, data_offset + 4, &data_size.to_be_bytes())?;

        let file = this
            .writer
            .into_inner()
            .map_err(|e| RecorderError::from_io(OPERATION, e.into_error()))?;
        file.sync_all()
            .map_err(|e| RecorderError::from_io(OPERATION, e))?;

        info!(
            packets = this.packets_written,
            data_bytes = this.data_bytes,
            file_bytes = this.end,
            "Container closed"
        );

        Ok(())
    }
}

fn push_chunk_header(out: &mut Vec<u8>, chunk_type: &[u8; 4], size: i64) {
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(&size.to_be_bytes());
}

/// Appends `value` as a CAF variable-length integer: 7 bits per byte, most
/// significant group first, high bit set on every byte but the last.
fn encode_varint(value: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; 10];
    let mut count = 0;
    let mut rest = value;

    loop {
        groups[count] = (rest & 0x7f) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }

    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}
