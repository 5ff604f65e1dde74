#![doc = include_str!("../README.md")]

mod block_tree;
mod codec;
mod error;
mod format;
mod io;
mod list_iterator;
mod store_block;
mod store_descriptor;
mod store_handle;
mod volume;

pub use error::{Error, Result};
pub use io::{BlockIo, PositionedIo, SeekableIo};
pub use store_handle::{BlockView, StoreHandle, Whence};
pub use volume::Volume;

#[cfg(test)]
mod tests {
    // End-to-end scenarios exercising the public surface against an
    // in-memory volume, rather than a single store descriptor directly.

    use super::*;
    use crate::format::{
        RecordType, STORE_BLOCK_HEADER_SIZE, STORE_BLOCK_SIGNATURE, STORE_BLOCK_SIZE,
    };
    use std::io::Cursor;
    use std::sync::Arc;
    use uuid::Uuid;

    fn write_header(block: &mut [u8], record_type: u32, next_offset: u64, payload_size: u32) {
        block[..16].copy_from_slice(&STORE_BLOCK_SIGNATURE);
        block[16..20].copy_from_slice(&record_type.to_le_bytes());
        block[20..28].copy_from_slice(&0u64.to_le_bytes());
        block[28..36].copy_from_slice(&next_offset.to_le_bytes());
        block[36..40].copy_from_slice(&payload_size.to_le_bytes());
    }

    fn empty_list_block(record_type: RecordType) -> Vec<u8> {
        let mut block = vec![0u8; STORE_BLOCK_SIZE];
        write_header(&mut block, record_type.as_u32(), 0, 0);
        block
    }

    /// Lays out a minimal one-store volume: VOLUME_HEADER -> CATALOG (one
    /// entry) -> STORE_HEADER, with empty block/bitmap/range chains, on top
    /// of a live region filled with a recognizable byte pattern.
    struct VolumeBuilder {
        buffer: Vec<u8>,
    }

    impl VolumeBuilder {
        fn new(live_size: u64) -> Self {
            let mut buffer = vec![0u8; live_size as usize];
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (i % 251) as u8;
            }
            VolumeBuilder { buffer }
        }

        fn append(&mut self, block: Vec<u8>) -> u64 {
            let offset = self.buffer.len() as u64;
            self.buffer.extend_from_slice(&block);
            offset
        }

        fn build(self) -> Arc<dyn BlockIo> {
            let size = self.buffer.len() as u64;
            Arc::new(PositionedIo::new(Cursor::new(self.buffer), size))
        }
    }

    fn single_store_volume(live_size: u64, store_identifier: Uuid) -> Arc<dyn BlockIo> {
        let mut b = VolumeBuilder::new(live_size);

        // Reserve offsets for the chain heads that come after the catalog
        // and store header blocks, then backfill once known.
        let block_list_offset = live_size + STORE_BLOCK_SIZE as u64 * 3;
        let bitmap_offset = block_list_offset + STORE_BLOCK_SIZE as u64;
        let range_list_offset = bitmap_offset + STORE_BLOCK_SIZE as u64;

        let mut store_header_payload = vec![0u8; 96];
        store_header_payload[0..16].copy_from_slice(store_identifier.to_bytes_le().as_slice());
        store_header_payload[16..32].copy_from_slice(Uuid::nil().to_bytes_le().as_slice());
        store_header_payload[32..48].copy_from_slice(Uuid::nil().to_bytes_le().as_slice());
        store_header_payload[48..56].copy_from_slice(&0u64.to_le_bytes()); // creation_filetime
        store_header_payload[56..60].copy_from_slice(&0u32.to_le_bytes()); // attribute_flags
        store_header_payload[64..72].copy_from_slice(&live_size.to_le_bytes());
        store_header_payload[72..80].copy_from_slice(&block_list_offset.to_le_bytes());
        store_header_payload[80..88].copy_from_slice(&bitmap_offset.to_le_bytes());
        store_header_payload[88..96].copy_from_slice(&range_list_offset.to_le_bytes());

        let mut volume_header = vec![0u8; STORE_BLOCK_SIZE];
        write_header(&mut volume_header, RecordType::VolumeHeader.as_u32(), 0, 16);
        volume_header[STORE_BLOCK_HEADER_SIZE..STORE_BLOCK_HEADER_SIZE + 8]
            .copy_from_slice(&live_size.to_le_bytes());
        let catalog_offset_field_pos = STORE_BLOCK_HEADER_SIZE + 8;

        let volume_header_offset = b.append(volume_header);
        assert_eq!(volume_header_offset, live_size);
        let catalog_offset = volume_header_offset + STORE_BLOCK_SIZE as u64;
        // patch the volume header's catalog offset field now that it's known
        b.buffer[volume_header_offset as usize + catalog_offset_field_pos
            ..volume_header_offset as usize + catalog_offset_field_pos + 8]
            .copy_from_slice(&catalog_offset.to_le_bytes());

        let store_header_offset = catalog_offset + STORE_BLOCK_SIZE as u64;

        let mut catalog_entry = [0u8; 24];
        catalog_entry[0..16].copy_from_slice(store_identifier.to_bytes_le().as_slice());
        catalog_entry[16..24].copy_from_slice(&store_header_offset.to_le_bytes());
        let mut catalog_block = vec![0u8; STORE_BLOCK_SIZE];
        write_header(&mut catalog_block, RecordType::Catalog.as_u32(), 0, 24);
        catalog_block[STORE_BLOCK_HEADER_SIZE..STORE_BLOCK_HEADER_SIZE + 24]
            .copy_from_slice(&catalog_entry);
        let appended_catalog_offset = b.append(catalog_block);
        assert_eq!(appended_catalog_offset, catalog_offset);

        let mut store_header_block = vec![0u8; STORE_BLOCK_SIZE];
        write_header(
            &mut store_header_block,
            RecordType::StoreHeader.as_u32(),
            0,
            store_header_payload.len() as u32,
        );
        store_header_block[STORE_BLOCK_HEADER_SIZE..STORE_BLOCK_HEADER_SIZE + store_header_payload.len()]
            .copy_from_slice(&store_header_payload);
        let appended_store_header_offset = b.append(store_header_block);
        assert_eq!(appended_store_header_offset, store_header_offset);

        let appended_block_list_offset = b.append(empty_list_block(RecordType::StoreBlockList));
        assert_eq!(appended_block_list_offset, block_list_offset);
        let appended_bitmap_offset = b.append(empty_list_block(RecordType::StoreBitmap));
        assert_eq!(appended_bitmap_offset, bitmap_offset);
        let appended_range_list_offset = b.append(empty_list_block(RecordType::StoreRangeList));
        assert_eq!(appended_range_list_offset, range_list_offset);

        b.build()
    }

    #[test]
    fn opens_single_store_volume_and_reads_live_bytes() {
        let _ = env_logger::try_init();
        let live_size = 1024 * 1024;
        let store_identifier = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let io = single_store_volume(live_size, store_identifier);
        let volume = Volume::open(io).unwrap();

        assert_eq!(volume.store_count(), 1);
        assert_eq!(volume.size(), live_size);

        let mut store = volume.store(0).unwrap();
        assert_eq!(store.identifier(), store_identifier);
        assert_eq!(store.volume_size(), live_size);
        assert_eq!(store.number_of_blocks().unwrap(), 0);

        let mut buf = vec![0u8; 512];
        store.seek(1000, Whence::Set).unwrap();
        let n = store.read(&mut buf).unwrap();
        assert_eq!(n, 512);
        let expected: Vec<u8> = (1000..1512).map(|o| (o % 251) as u8).collect();
        assert_eq!(buf, expected);
    }

    #[test]
    fn unknown_store_index_is_out_of_bounds() {
        let io = single_store_volume(65536, Uuid::nil());
        let volume = Volume::open(io).unwrap();
        assert!(matches!(volume.store(5), Err(Error::OutOfBounds(_))));
    }

    #[test]
    fn contiguous_reads_round_trip_across_chunk_sizes() {
        let live_size = 256 * 1024;
        let io = single_store_volume(live_size, Uuid::nil());
        let volume = Volume::open(io).unwrap();

        for chunk in [1usize, 512, 16384, 65536] {
            let store = volume.store(0).unwrap();
            let mut collected = Vec::with_capacity(live_size as usize);
            let mut offset = 0u64;
            while offset < live_size {
                let mut buf = vec![0u8; chunk];
                let n = store.read_at(&mut buf, offset as i64).unwrap();
                collected.extend_from_slice(&buf[..n]);
                offset += chunk as u64;
            }
            let expected: Vec<u8> = (0..live_size).map(|o| (o % 251) as u8).collect();
            assert_eq!(collected, expected, "chunk size {chunk}");
        }
    }
}
