// Parses the volume header and catalog chain to discover the ordered array
// of store descriptors forwarder resolution needs. The on-disk layout of
// the volume header and catalog entries isn't pinned down by any field
// this crate otherwise decodes, so this module commits to the minimal
// shape consistent with the constants it does specify: a GUID plus one
// absolute offset per catalog entry, no extra fields.

use std::sync::Arc;

use uuid::Uuid;

use crate::codec::{read_guid, read_u32_le, read_u64_le};
use crate::error::{Error, Result};
use crate::format::RecordType;
use crate::io::BlockIo;
use crate::list_iterator::{ListEntry, StoreBlockListIterator};
use crate::store_block::{expect_record_type, read_store_block};
use crate::store_descriptor::StoreDescriptor;
use crate::store_handle::StoreHandle;

/// One entry in the volume's catalog chain: which store it names, and
/// where that store's STORE_HEADER block lives.
#[derive(Debug, Clone, Copy)]
struct CatalogEntry {
    store_identifier: Uuid,
    store_header_offset: u64,
}

impl ListEntry for CatalogEntry {
    const SIZE: usize = 24;

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes[..Self::SIZE].iter().all(|&b| b == 0) {
            return None;
        }
        let store_identifier = read_guid(bytes, 0).ok()?;
        let store_header_offset = read_u64_le(bytes, 16).ok()?;
        Some(CatalogEntry {
            store_identifier,
            store_header_offset,
        })
    }
}

/// Byte layout this reader expects a STORE_HEADER block's payload to
/// follow.
struct StoreHeaderFields {
    identifier: Uuid,
    copy_identifier: Uuid,
    copy_set_identifier: Uuid,
    creation_filetime: u64,
    attribute_flags: u32,
    volume_size: u64,
    store_block_list_offset: u64,
    store_bitmap_offset: u64,
    store_block_range_list_offset: u64,
}

fn decode_store_header(payload: &[u8]) -> Result<StoreHeaderFields> {
    Ok(StoreHeaderFields {
        identifier: read_guid(payload, 0)?,
        copy_identifier: read_guid(payload, 16)?,
        copy_set_identifier: read_guid(payload, 32)?,
        creation_filetime: read_u64_le(payload, 48)?,
        attribute_flags: read_u32_le(payload, 56)?,
        volume_size: read_u64_le(payload, 64)?,
        store_block_list_offset: read_u64_le(payload, 72)?,
        store_bitmap_offset: read_u64_le(payload, 80)?,
        store_block_range_list_offset: read_u64_le(payload, 88)?,
    })
}

/// A parsed VSS volume: the shadowed volume's size and the ordered array
/// of store descriptors discovered via the catalog chain.
pub struct Volume {
    io: Arc<dyn BlockIo>,
    size: u64,
    stores: Vec<Arc<StoreDescriptor>>,
}

impl Volume {
    /// Opens `io` as a VSS volume: reads the VOLUME_HEADER block at offset
    /// 0, walks the catalog chain, and reads each store's STORE_HEADER
    /// block to populate scalar fields. Table construction stays lazy
    /// per-store; nothing here reads a block/bitmap/range chain.
    pub fn open(io: Arc<dyn BlockIo>) -> Result<Arc<Volume>> {
        let header_block = read_store_block(io.as_ref(), 0)?;
        expect_record_type(&header_block, RecordType::VolumeHeader, 0)?;
        let payload = header_block.payload();
        let size = read_u64_le(payload, 0)?;
        let catalog_offset = read_u64_le(payload, 8)?;

        let catalog_iter: StoreBlockListIterator<CatalogEntry> =
            StoreBlockListIterator::new(io.as_ref(), catalog_offset, RecordType::Catalog)?;
        let mut catalog_entries = Vec::new();
        for entry in catalog_iter {
            catalog_entries.push(entry?);
        }

        // Read and validate every store header up front, before
        // `Arc::new_cyclic`: its closure must be infallible, so all I/O and
        // validation that can fail happens here, and a malformed store
        // fails the whole open rather than leaving a partially populated
        // volume behind.
        let mut fields = Vec::with_capacity(catalog_entries.len());
        for entry in &catalog_entries {
            fields.push(read_store_header_fields(io.as_ref(), entry)?);
        }

        log::debug!("volume: catalog discovered {} stores", fields.len());

        Ok(Arc::new_cyclic(|weak_volume| {
            let stores = fields
                .into_iter()
                .enumerate()
                .map(|(index, f)| {
                    Arc::new(StoreDescriptor::new(
                        index,
                        f.identifier,
                        f.copy_identifier,
                        f.copy_set_identifier,
                        f.creation_filetime,
                        f.attribute_flags,
                        f.volume_size,
                        f.store_block_list_offset,
                        f.store_bitmap_offset,
                        f.store_block_range_list_offset,
                        io.clone(),
                        weak_volume.clone(),
                    ))
                })
                .collect();

            Volume { io, size, stores }
        }))
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The underlying byte-IO handle the volume was opened with, for
    /// callers that want to read the live volume directly alongside a
    /// shadow store's reconstructed view of it.
    pub fn io(&self) -> &Arc<dyn BlockIo> {
        &self.io
    }

    pub(crate) fn store_descriptor(&self, index: usize) -> Result<Arc<StoreDescriptor>> {
        self.stores
            .get(index)
            .cloned()
            .ok_or(Error::OutOfBounds(index as i64))
    }

    pub fn store(&self, index: usize) -> Result<StoreHandle> {
        Ok(StoreHandle::new(self.store_descriptor(index)?))
    }
}

fn read_store_header_fields(io: &dyn BlockIo, entry: &CatalogEntry) -> Result<StoreHeaderFields> {
    let header_block = read_store_block(io, entry.store_header_offset)?;
    expect_record_type(&header_block, RecordType::StoreHeader, entry.store_header_offset)?;
    let fields = decode_store_header(header_block.payload())?;

    if fields.identifier != entry.store_identifier {
        return Err(Error::BadHeader {
            offset: entry.store_header_offset,
            reason: "store header identifier does not match its catalog entry".into(),
        });
    }

    Ok(fields)
}
