//! The in-memory representation of one shadow store: its three
//! lazily-built tables and the read-resolution algorithm that is the core
//! of this crate.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::block_tree::{BlockSlot, BlockTree};
use crate::codec::filetime_to_utc;
use crate::error::{Error, Result};
use crate::format::{BlockDescriptor, BlockRangeDescriptor, RecordType, BLOCK_GRANULARITY, DEFAULT_CHAIN_CAP, OVERLAY_SUBBLOCK_SIZE};
use crate::io::BlockIo;
use crate::list_iterator::StoreBlockListIterator;
use crate::store_block::{expect_record_type, read_store_block};
use crate::volume::Volume;

/// A sparse bitmap of 16 KiB blocks present in a store, read from the
/// bitmap chain's concatenated raw payload bytes.
#[derive(Debug, Clone, Default)]
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    /// `true` when the bit for the 16 KiB block containing `aligned_offset`
    /// is set. A bit beyond the bitmap's recorded length is treated as
    /// clear, matching an all-absent trailing region.
    pub fn is_set(&self, aligned_offset: u64) -> bool {
        let block_index = aligned_offset / BLOCK_GRANULARITY;
        let byte_index = (block_index / 8) as usize;
        let bit = (block_index % 8) as u32;
        self.bytes
            .get(byte_index)
            .map(|byte| (byte >> bit) & 1 != 0)
            .unwrap_or(false)
    }
}

fn read_bitmap_chain(io: &dyn BlockIo, head_offset: u64, cap: usize) -> Result<Bitmap> {
    let mut bytes = Vec::new();
    let mut offset = head_offset;
    let mut visited = 0usize;
    loop {
        let block = read_store_block(io, offset)?;
        expect_record_type(&block, RecordType::StoreBitmap, offset)?;
        visited += 1;
        if visited > cap {
            return Err(Error::ChainTooLong { cap });
        }
        bytes.extend_from_slice(block.payload());
        let next = block.header.next_offset;
        if next == 0 {
            break;
        }
        offset = next;
    }
    Ok(Bitmap { bytes })
}

/// The three tables a store descriptor owns, built lazily and once.
pub struct Tables {
    pub forwarder_table: BTreeMap<u64, BlockRangeDescriptor>,
    pub block_table: BlockTree,
    pub bitmap: Bitmap,
}

/// One shadow store.
pub struct StoreDescriptor {
    pub index: usize,
    identifier: Uuid,
    copy_identifier: Uuid,
    copy_set_identifier: Uuid,
    creation_filetime: u64,
    attribute_flags: u32,
    volume_size: u64,
    store_block_list_offset: u64,
    store_bitmap_offset: u64,
    store_block_range_list_offset: u64,
    io: Arc<dyn BlockIo>,
    volume: Weak<Volume>,
    chain_cap: usize,
    tables: OnceLock<Result<Arc<Tables>>>,
}

impl StoreDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        identifier: Uuid,
        copy_identifier: Uuid,
        copy_set_identifier: Uuid,
        creation_filetime: u64,
        attribute_flags: u32,
        volume_size: u64,
        store_block_list_offset: u64,
        store_bitmap_offset: u64,
        store_block_range_list_offset: u64,
        io: Arc<dyn BlockIo>,
        volume: Weak<Volume>,
    ) -> Self {
        StoreDescriptor {
            index,
            identifier,
            copy_identifier,
            copy_set_identifier,
            creation_filetime,
            attribute_flags,
            volume_size,
            store_block_list_offset,
            store_bitmap_offset,
            store_block_range_list_offset,
            io,
            volume,
            chain_cap: DEFAULT_CHAIN_CAP,
            tables: OnceLock::new(),
        }
    }

    /// Overrides the chain safety cap. Used by tests to exercise
    /// `ChainTooLong` without walking a million-block chain.
    #[cfg(test)]
    pub(crate) fn with_chain_cap(mut self, cap: usize) -> Self {
        self.chain_cap = cap;
        self
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    pub fn copy_identifier(&self) -> Uuid {
        self.copy_identifier
    }

    pub fn copy_set_identifier(&self) -> Uuid {
        self.copy_set_identifier
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        filetime_to_utc(self.creation_filetime)
    }

    pub fn creation_filetime(&self) -> u64 {
        self.creation_filetime
    }

    pub fn attribute_flags(&self) -> u32 {
        self.attribute_flags
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    pub fn store_block_list_offset(&self) -> u64 {
        self.store_block_list_offset
    }

    pub fn number_of_blocks(&self) -> Result<usize> {
        Ok(self.tables()?.block_table.len())
    }

    pub fn block_by_index(&self, index: usize) -> Result<BlockDescriptor> {
        let tables = self.tables()?;
        tables
            .block_table
            .nth(index)
            .map(|(_, slot)| *slot.primary())
            .ok_or(Error::OutOfBounds(index as i64))
    }

    /// Builds (once, lazily) the three tables by walking the store's three
    /// chains. Concurrent first callers block in `OnceLock::get_or_init`;
    /// a build failure is cached and replayed to every caller.
    fn tables(&self) -> Result<Arc<Tables>> {
        self.tables
            .get_or_init(|| self.build_tables())
            .clone()
    }

    fn build_tables(&self) -> Result<Arc<Tables>> {
        let mut forwarder_table = BTreeMap::new();
        let range_iter: StoreBlockListIterator<BlockRangeDescriptor> = StoreBlockListIterator::with_cap(
            self.io.as_ref(),
            self.store_block_range_list_offset,
            RecordType::StoreRangeList,
            self.chain_cap,
        )?;
        for entry in range_iter {
            let entry = entry?;
            forwarder_table.insert(entry.original_offset, entry);
        }

        let mut block_table = BlockTree::new();
        let block_iter: StoreBlockListIterator<BlockDescriptor> = StoreBlockListIterator::with_cap(
            self.io.as_ref(),
            self.store_block_list_offset,
            RecordType::StoreBlockList,
            self.chain_cap,
        )?;
        for entry in block_iter {
            block_table.insert(entry?);
        }

        let bitmap = read_bitmap_chain(self.io.as_ref(), self.store_bitmap_offset, self.chain_cap)?;

        log::debug!(
            "store {}: tables built - {} forwarders, {} blocks, {} bitmap bytes",
            self.index,
            forwarder_table.len(),
            block_table.len(),
            bitmap.bytes.len()
        );

        Ok(Arc::new(Tables {
            forwarder_table,
            block_table,
            bitmap,
        }))
    }

    fn read_live(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        let read = self.io.read_at(offset, dst)?;
        if read != dst.len() {
            return Err(Error::Io(format!(
                "short read at offset {offset:#x}: expected {} bytes, got {read}",
                dst.len()
            )));
        }
        Ok(read)
    }

    /// Resolves one read bounded to a single 16 KiB-aligned block. Larger
    /// requests are composed by [`crate::store_handle::StoreHandle`].
    pub fn read_block(&self, logical_offset: u64, dst: &mut [u8]) -> Result<usize> {
        let mut visited = Vec::new();
        self.read_block_inner(logical_offset, dst, &mut visited)
    }

    fn read_block_inner(
        &self,
        logical_offset: u64,
        dst: &mut [u8],
        visited: &mut Vec<usize>,
    ) -> Result<usize> {
        let aligned = logical_offset & !(BLOCK_GRANULARITY - 1);
        let in_block = logical_offset - aligned;
        let n = dst.len().min((BLOCK_GRANULARITY - in_block) as usize);
        if n == 0 {
            return Ok(0);
        }
        let dst = &mut dst[..n];

        if aligned >= self.volume_size {
            return Ok(0);
        }

        let tables = self.tables()?;
        match tables.block_table.lookup(aligned) {
            None => {
                if tables.bitmap.is_set(aligned) {
                    dst.fill(0);
                    Ok(n)
                } else {
                    self.read_live(aligned + in_block, dst)
                }
            }
            Some(slot) => {
                if slot.primary().is_forwarder() {
                    self.follow_forwarder(slot.primary(), logical_offset, dst, visited)
                } else if slot.overlay.is_some() || slot.primary().is_overlay() {
                    self.read_overlaid(slot, aligned, in_block, dst, visited)
                } else {
                    self.read_live(slot.primary().offset + in_block, dst)
                }
            }
        }
    }

    fn follow_forwarder(
        &self,
        desc: &BlockDescriptor,
        logical_offset: u64,
        dst: &mut [u8],
        visited: &mut Vec<usize>,
    ) -> Result<usize> {
        let volume = self
            .volume
            .upgrade()
            .ok_or_else(|| Error::Internal("volume dropped while resolving forwarder".into()))?;
        if visited.len() >= volume.store_count() {
            return Err(Error::ForwarderCycle {
                hops: visited.len(),
            });
        }
        visited.push(self.index);
        log::trace!(
            "store {}: following forwarder for offset {logical_offset:#x}",
            self.index
        );
        let target_index = self.index.checked_sub(1).ok_or_else(|| {
            Error::Internal(format!(
                "store {} has a forwarder but no predecessor store",
                self.index
            ))
        })?;
        let target = volume.store_descriptor(target_index)?;
        if desc.relative_offset != target.store_block_list_offset() {
            return Err(Error::Internal(format!(
                "forwarder at store {} names relative_offset {:#x}, but its resolved target (store {}) has store_block_list_offset {:#x}",
                self.index,
                desc.relative_offset,
                target_index,
                target.store_block_list_offset()
            )));
        }
        target.read_block_inner(logical_offset, dst, visited)
    }

    fn read_overlaid(
        &self,
        slot: &BlockSlot,
        aligned: u64,
        in_block: u64,
        dst: &mut [u8],
        visited: &mut Vec<usize>,
    ) -> Result<usize> {
        let (base, overlay) = match &slot.overlay {
            Some(overlay) => (Some(&slot.base), overlay),
            None => (None, &slot.base),
        };

        let n = dst.len();
        let mut pos = 0usize;
        while pos < n {
            let global_pos = in_block as usize + pos;
            let sub_index = (global_pos as u64 / OVERLAY_SUBBLOCK_SIZE) as u32;
            let sub_block_end = ((sub_index as u64 + 1) * OVERLAY_SUBBLOCK_SIZE) as usize;
            let chunk_end = sub_block_end.min(in_block as usize + n);
            let chunk_len = chunk_end - global_pos;
            let bit_set = (overlay.allocation_bitmap >> sub_index) & 1 != 0;

            if bit_set {
                self.read_live(
                    overlay.offset + global_pos as u64,
                    &mut dst[pos..pos + chunk_len],
                )?;
            } else {
                match base {
                    Some(base_desc) => {
                        self.resolve_descriptor_chunk(
                            base_desc,
                            aligned,
                            global_pos as u64,
                            &mut dst[pos..pos + chunk_len],
                            visited,
                        )?;
                    }
                    None => {
                        return Err(Error::Internal(
                            "overlay descriptor has no base to fall back on".into(),
                        ))
                    }
                }
            }
            pos += chunk_len;
        }
        Ok(n)
    }

    fn resolve_descriptor_chunk(
        &self,
        desc: &BlockDescriptor,
        aligned: u64,
        offset_in_block: u64,
        dst: &mut [u8],
        visited: &mut Vec<usize>,
    ) -> Result<usize> {
        if desc.is_forwarder() {
            self.follow_forwarder(desc, aligned + offset_in_block, dst, visited)
        } else {
            self.read_live(desc.offset + offset_in_block, dst)
        }
    }
}
