//! Memory-mapped NEUNET capture files.
//!
//! A capture is the raw byte stream recorded from the board's TCP port,
//! possibly starting mid-packet.

use crate::stream::{PacketStreamSource, StreamConfig};
use crate::Result;
use memmap2::Mmap;
use neunet_proto::{sync_offset, PacketParser, ParsedStream, ParserConfig, PACKET_SIZE};
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared read-only view of a mapped capture.
#[derive(Clone)]
pub struct SharedMmap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMmap {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

/// A capture file opened with memory-mapped I/O.
pub struct CaptureFile {
    mmap: Arc<Mmap>,
    path: PathBuf,
}

impl CaptureFile {
    /// Opens a capture for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and is not expected to change
        // while mapped.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        log::debug!(
            "mapped capture {} ({} bytes)",
            path.as_ref().display(),
            mmap.len()
        );
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Path the capture was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Number of whole packets after the first start byte.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        sync_offset(self.as_bytes()).map_or(0, |offset| (self.len() - offset) / PACKET_SIZE)
    }

    /// Decodes every packet in the capture.
    #[must_use]
    pub fn parse(&self, config: &ParserConfig) -> ParsedStream {
        PacketParser::with_config(config.clone()).parse_bytes(self.as_bytes())
    }

    /// Replays the capture as an event source. The source owns a reference
    /// to the mapping and may outlive this handle.
    #[must_use]
    pub fn stream(&self, config: StreamConfig) -> PacketStreamSource<Cursor<SharedMmap>> {
        PacketStreamSource::new(Cursor::new(SharedMmap(Arc::clone(&self.mmap))), config)
    }
}
