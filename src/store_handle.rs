//! A thin stateful view over a [`StoreDescriptor`], holding only a
//! `current_offset` and exposing the public seek/read surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store_descriptor::StoreDescriptor;

/// Reference point for [`StoreHandle::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// A read-only view of one block descriptor, exposed by index.
#[derive(Debug, Clone, Copy)]
pub struct BlockView {
    pub original_offset: u64,
    pub relative_offset: u64,
    pub offset: u64,
    pub flags: u32,
    pub allocation_bitmap: u64,
}

/// A stateful, seekable view over one shadow store. Distinct handles
/// sharing the same [`StoreDescriptor`] are safe to use concurrently;
/// concurrent use of a single handle from multiple threads is not.
pub struct StoreHandle {
    descriptor: Arc<StoreDescriptor>,
    current_offset: u64,
}

impl StoreHandle {
    pub(crate) fn new(descriptor: Arc<StoreDescriptor>) -> Self {
        StoreHandle {
            descriptor,
            current_offset: 0,
        }
    }

    /// Moves `current_offset` relative to `whence`. Seeking past
    /// `volume_size` is allowed and simply yields EOF (a zero-length read)
    /// on the next `read`; a negative final offset is `OutOfBounds`.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        let base: i64 = match whence {
            Whence::Set => 0,
            Whence::Cur => self.current_offset as i64,
            Whence::End => self.descriptor.volume_size() as i64,
        };
        let new_offset = base
            .checked_add(offset)
            .ok_or(Error::OutOfBounds(offset))?;
        if new_offset < 0 {
            return Err(Error::OutOfBounds(new_offset));
        }
        self.current_offset = new_offset as u64;
        Ok(new_offset)
    }

    pub fn offset(&self) -> u64 {
        self.current_offset
    }

    /// Fills `buf` by looping block-level resolves against the store
    /// descriptor until `buf` is full or EOF is reached, advancing
    /// `current_offset` by the bytes actually delivered.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_from(self.current_offset, buf)?;
        self.current_offset += n as u64;
        Ok(n)
    }

    /// Equivalent to `seek(offset, Set)` followed by `read`, but leaves
    /// `current_offset` untouched.
    pub fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(Error::OutOfBounds(offset));
        }
        self.read_from(offset as u64, buf)
    }

    fn read_from(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        let mut delivered = 0;
        while delivered < buf.len() {
            let n = self
                .descriptor
                .read_block(start + delivered as u64, &mut buf[delivered..])?;
            if n == 0 {
                break;
            }
            delivered += n;
        }
        Ok(delivered)
    }

    pub fn identifier(&self) -> Uuid {
        self.descriptor.identifier()
    }

    pub fn copy_identifier(&self) -> Uuid {
        self.descriptor.copy_identifier()
    }

    pub fn copy_set_identifier(&self) -> Uuid {
        self.descriptor.copy_set_identifier()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.descriptor.creation_time()
    }

    pub fn creation_filetime(&self) -> u64 {
        self.descriptor.creation_filetime()
    }

    pub fn attribute_flags(&self) -> u32 {
        self.descriptor.attribute_flags()
    }

    pub fn volume_size(&self) -> u64 {
        self.descriptor.volume_size()
    }

    pub fn number_of_blocks(&self) -> Result<usize> {
        self.descriptor.number_of_blocks()
    }

    pub fn block_by_index(&self, index: usize) -> Result<BlockView> {
        let descriptor = self.descriptor.block_by_index(index)?;
        Ok(BlockView {
            original_offset: descriptor.original_offset,
            relative_offset: descriptor.relative_offset,
            offset: descriptor.offset,
            flags: descriptor.flags,
            allocation_bitmap: descriptor.allocation_bitmap,
        })
    }
}

impl std::io::Read for StoreHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        StoreHandle::read(self, buf).map_err(std::io::Error::other)
    }
}

impl std::io::Seek for StoreHandle {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let (offset, whence) = match pos {
            std::io::SeekFrom::Start(o) => (o as i64, Whence::Set),
            std::io::SeekFrom::Current(o) => (o, Whence::Cur),
            std::io::SeekFrom::End(o) => (o, Whence::End),
        };
        StoreHandle::seek(self, offset, whence)
            .map(|o| o as u64)
            .map_err(std::io::Error::other)
    }
}
