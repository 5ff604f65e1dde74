//! Reads one 16 KiB store block at an absolute volume offset and validates
//! its header.

use binrw::BinRead;

use crate::error::{Error, Result};
use crate::format::{RecordType, StoreBlockHeader, STORE_BLOCK_HEADER_SIZE, STORE_BLOCK_SIGNATURE, STORE_BLOCK_SIZE};
use crate::io::BlockIo;

/// One decoded 16 KiB store block: its validated header plus a view of its
/// payload bytes.
pub struct StoreBlock {
    pub header: StoreBlockHeader,
    buffer: Vec<u8>,
}

impl StoreBlock {
    /// The block's payload, i.e. everything after the 128-byte header, up
    /// to `header.payload_size` bytes.
    pub fn payload(&self) -> &[u8] {
        let end = STORE_BLOCK_HEADER_SIZE + self.header.payload_size as usize;
        &self.buffer[STORE_BLOCK_HEADER_SIZE..end]
    }

    pub fn record_type_raw(&self) -> u32 {
        self.header.record_type
    }
}

/// Reads exactly one 16 KiB store block from `io` at absolute `offset` and
/// validates its header.
pub fn read_store_block(io: &dyn BlockIo, offset: u64) -> Result<StoreBlock> {
    let mut buffer = vec![0u8; STORE_BLOCK_SIZE];
    let read = io.read_at(offset, &mut buffer)?;
    if read != STORE_BLOCK_SIZE {
        return Err(Error::Io(format!(
            "short read at offset {offset:#x}: expected {STORE_BLOCK_SIZE} bytes, got {read}"
        )));
    }

    if buffer[..16] != STORE_BLOCK_SIGNATURE {
        return Err(Error::BadSignature { offset });
    }

    let mut cursor = std::io::Cursor::new(&buffer[..STORE_BLOCK_HEADER_SIZE]);
    let header = StoreBlockHeader::read(&mut cursor)
        .map_err(|err| Error::BadHeader {
            offset,
            reason: err.to_string(),
        })?;

    if header.payload_size as usize + STORE_BLOCK_HEADER_SIZE > STORE_BLOCK_SIZE {
        return Err(Error::BadHeader {
            offset,
            reason: format!(
                "payload size {} overruns block of {STORE_BLOCK_SIZE} bytes",
                header.payload_size
            ),
        });
    }

    Ok(StoreBlock { header, buffer })
}

/// Validates that a block's record type matches `expected`, returning
/// `UnexpectedRecordType` otherwise.
pub fn expect_record_type(block: &StoreBlock, expected: RecordType, offset: u64) -> Result<()> {
    if block.record_type_raw() != expected.as_u32() {
        return Err(Error::UnexpectedRecordType {
            offset,
            expected: expected.as_u32(),
            actual: block.record_type_raw(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::PositionedIo;
    use std::io::Cursor;

    fn build_block(record_type: u32, next_offset: u64, payload: &[u8]) -> Vec<u8> {
        let mut block = vec![0u8; STORE_BLOCK_SIZE];
        block[..16].copy_from_slice(&STORE_BLOCK_SIGNATURE);
        block[16..20].copy_from_slice(&record_type.to_le_bytes());
        block[20..28].copy_from_slice(&0u64.to_le_bytes()); // relative_offset
        block[28..36].copy_from_slice(&next_offset.to_le_bytes());
        block[36..40].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        block[STORE_BLOCK_HEADER_SIZE..STORE_BLOCK_HEADER_SIZE + payload.len()]
            .copy_from_slice(payload);
        block
    }

    #[test]
    fn reads_valid_block() {
        let payload = vec![0xAB; 64];
        let block_bytes = build_block(5, 0, &payload);
        let io = PositionedIo::new(Cursor::new(block_bytes), STORE_BLOCK_SIZE as u64);
        let block = read_store_block(&io, 0).unwrap();
        assert_eq!(block.record_type_raw(), 5);
        assert_eq!(block.header.next_offset, 0);
        assert_eq!(block.payload(), payload.as_slice());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut block_bytes = build_block(5, 0, &[]);
        block_bytes[0] ^= 0xFF;
        let io = PositionedIo::new(Cursor::new(block_bytes), STORE_BLOCK_SIZE as u64);
        assert!(matches!(
            read_store_block(&io, 0),
            Err(Error::BadSignature { .. })
        ));
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut block_bytes = build_block(5, 0, &[]);
        block_bytes[36..40].copy_from_slice(&(STORE_BLOCK_SIZE as u32).to_le_bytes());
        let io = PositionedIo::new(Cursor::new(block_bytes), STORE_BLOCK_SIZE as u64);
        assert!(matches!(
            read_store_block(&io, 0),
            Err(Error::BadHeader { .. })
        ));
    }
}
