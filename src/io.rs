// Turns a caller-supplied handle into the BlockIo trait the rest of the
// crate consumes. Two shapes ship: SeekableIo serializes access to a
// plain Read + Seek handle behind a mutex, while PositionedIo wraps a
// handle that already supports positioned reads and takes no lock at all.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use positioned_io::ReadAt;

use crate::error::{Error, Result};

/// The byte-IO contract every `StoreBlock`/`StoreDescriptor` read goes
/// through: an absolute-offset read with no assumed seek state, plus a
/// fixed volume size.
pub trait BlockIo: Send + Sync {
    /// Reads into `dst`, returning the number of bytes actually read.
    /// A short read is not itself an EOF signal; callers decide what it
    /// means relative to the declared volume size.
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize>;

    /// Total size of the underlying byte source, in bytes.
    fn size(&self) -> u64;
}

/// Adapts any `Read + Seek` handle (e.g. `std::fs::File`) into [`BlockIo`],
/// serializing every absolute read behind an internal mutex since a plain
/// seek-then-read handle cannot otherwise be shared across concurrent
/// readers.
pub struct SeekableIo<T: Read + Seek + Send> {
    inner: Mutex<T>,
    size: u64,
}

impl<T: Read + Seek + Send> SeekableIo<T> {
    pub fn new(mut inner: T) -> Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        Ok(SeekableIo {
            inner: Mutex::new(inner),
            size,
        })
    }
}

impl<T: Read + Seek + Send> BlockIo for SeekableIo<T> {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Internal("seekable io mutex poisoned".into()))?;
        guard.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < dst.len() {
            let n = guard.read(&mut dst[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Adapts a handle that already supports positioned reads
/// (`positioned_io::ReadAt`) into [`BlockIo`] without any internal
/// serialization; concurrent reads at distinct offsets proceed
/// independently.
pub struct PositionedIo<T: ReadAt + Send + Sync> {
    inner: T,
    size: u64,
}

impl<T: ReadAt + Send + Sync> PositionedIo<T> {
    /// `size` must be supplied by the caller: `ReadAt` alone does not expose
    /// the length of the underlying source.
    pub fn new(inner: T, size: u64) -> Self {
        PositionedIo { inner, size }
    }
}

impl<T: ReadAt + Send + Sync> BlockIo for PositionedIo<T> {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        let mut read = 0;
        while read < dst.len() {
            let n = self.inner.read_at(offset + read as u64, &mut dst[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
