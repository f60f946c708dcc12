mod caf;

pub use caf::{CafContainer, CafFactory};

use crate::{CoreResult, PacketDescription, StreamFormat};

use std::path::Path;

/// An open output file that receives packets in index order.
pub trait OutputContainer: Send {
    /// Stores codec side-information. An empty cookie is ignored.
    fn set_cookie(&mut self, cookie: &[u8]) -> CoreResult<()>;

    /// Writes `packet_count` packets taken from `data`, the first of which
    /// has index `start_packet`.
    ///
    /// With `descriptions`, packet `i` is `descriptions[i]` bytes at its
    /// start offset; without, packets are contiguous and fixed-size.
    fn write_packets(
        &mut self,
        start_packet: u64,
        packet_count: u32,
        descriptions: Option<&[PacketDescription]>,
        data: &[u8],
    ) -> CoreResult<()>;

    /// Packets written so far.
    fn packet_count(&self) -> u64;

    /// Finalizes and closes the file.
    fn close(self: Box<Self>) -> CoreResult<()>;
}

/// Creates output containers.
pub trait ContainerFactory {
    /// Creates a container at `path` for packets of `format`. An existing
    /// file is replaced when `truncate_existing` is set and is an error
    /// otherwise.
    fn create(
        &self,
        path: &Path,
        format: &StreamFormat,
        truncate_existing: bool,
    ) -> CoreResult<Box<dyn OutputContainer>>;
}
