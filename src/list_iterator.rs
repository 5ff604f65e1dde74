// Walks a linked chain of store blocks, yielding successive decoded list
// entries of a caller-chosen shape. A plain value implementing
// Iterator<Item = Result<E>>; its scratch buffer (the current store block)
// is reclaimed by ordinary Drop when the caller drops it.

use crate::error::{Error, Result};
use crate::format::{RecordType, DEFAULT_CHAIN_CAP};
use crate::io::BlockIo;
use crate::store_block::{expect_record_type, read_store_block, StoreBlock};

/// A fixed-size, zero-terminated entry shape decodable out of a store
/// block's payload. Implemented for [`crate::format::BlockRangeDescriptor`]
/// and [`crate::format::BlockDescriptor`], and for the catalog's entry
/// shape in [`crate::volume`].
pub trait ListEntry: Sized {
    const SIZE: usize;

    /// Decodes one entry, returning `None` for the all-zero list
    /// terminator.
    fn decode(bytes: &[u8]) -> Option<Self>;
}

impl ListEntry for crate::format::BlockRangeDescriptor {
    const SIZE: usize = crate::format::BlockRangeDescriptor::SIZE;

    fn decode(bytes: &[u8]) -> Option<Self> {
        crate::format::BlockRangeDescriptor::decode(bytes)
    }
}

impl ListEntry for crate::format::BlockDescriptor {
    const SIZE: usize = crate::format::BlockDescriptor::SIZE;

    fn decode(bytes: &[u8]) -> Option<Self> {
        crate::format::BlockDescriptor::decode(bytes)
    }
}

/// Iterates the list entries of a store-block chain headed at
/// `head_offset`, validating the expected record type and enforcing the
/// chain-length safety cap.
pub struct StoreBlockListIterator<'a, E: ListEntry> {
    io: &'a dyn BlockIo,
    current: StoreBlock,
    current_offset: u64,
    position: usize,
    blocks_visited: usize,
    cap: usize,
    expected: RecordType,
    done: bool,
    _entry: std::marker::PhantomData<E>,
}

impl<'a, E: ListEntry> StoreBlockListIterator<'a, E> {
    pub fn new(io: &'a dyn BlockIo, head_offset: u64, expected: RecordType) -> Result<Self> {
        Self::with_cap(io, head_offset, expected, DEFAULT_CHAIN_CAP)
    }

    pub fn with_cap(
        io: &'a dyn BlockIo,
        head_offset: u64,
        expected: RecordType,
        cap: usize,
    ) -> Result<Self> {
        let block = read_store_block(io, head_offset)?;
        expect_record_type(&block, expected, head_offset)?;
        Ok(StoreBlockListIterator {
            io,
            current: block,
            current_offset: head_offset,
            position: 0,
            blocks_visited: 1,
            cap,
            expected,
            done: false,
            _entry: std::marker::PhantomData,
        })
    }

    /// Advances across the `next_offset` chain link. Returns `Ok(true)` if
    /// a new block was loaded, `Ok(false)` if the chain legitimately ended
    /// (`next_offset == 0`).
    fn advance(&mut self) -> Result<bool> {
        let next_offset = self.current.header.next_offset;
        if next_offset == 0 {
            return Ok(false);
        }
        self.blocks_visited += 1;
        if self.blocks_visited > self.cap {
            return Err(Error::ChainTooLong { cap: self.cap });
        }
        let block = read_store_block(self.io, next_offset)?;
        expect_record_type(&block, self.expected, next_offset)?;
        self.current = block;
        self.current_offset = next_offset;
        self.position = 0;
        Ok(true)
    }
}

impl<'a, E: ListEntry> Iterator for StoreBlockListIterator<'a, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Result<E>> {
        loop {
            if self.done {
                return None;
            }

            let payload_len = self.current.payload().len();
            if self.position + E::SIZE > payload_len {
                match self.advance() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.done = true;
                        return None;
                    }
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }

            let slice = &self.current.payload()[self.position..self.position + E::SIZE];
            match E::decode(slice) {
                Some(entry) => {
                    self.position += E::SIZE;
                    return Some(Ok(entry));
                }
                None => match self.advance() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.done = true;
                        return None;
                    }
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                },
            }
        }
    }
}
