use binrw::BinRead;

// On-disk record layouts, one struct per fixed-size record, decoded with
// binrw the same way ext4_h.rs lays out ext4's structures.

pub const STORE_BLOCK_SIZE: usize = 16_384;
pub const STORE_BLOCK_HEADER_SIZE: usize = 128;
pub const BLOCK_GRANULARITY: u64 = 16_384;
pub const OVERLAY_SUBBLOCK_SIZE: u64 = 512;
pub const OVERLAY_SUBBLOCKS_PER_BLOCK: u64 = BLOCK_GRANULARITY / OVERLAY_SUBBLOCK_SIZE;

// Safety cap on the number of blocks a single chain walk may traverse
// before it's rejected as ChainTooLong.
pub const DEFAULT_CHAIN_CAP: usize = 1_048_576;

// Fixed 16-byte signature every store block header must carry.
pub const STORE_BLOCK_SIGNATURE: [u8; 16] = [
    0x6b, 0x87, 0x08, 0x20, 0x56, 0x2a, 0x41, 0x65, 0xb1, 0xa2, 0x3d, 0x57, 0x1d, 0xb4, 0xbf, 0xe3,
];

pub mod block_flags {
    pub const IS_FORWARDER: u32 = 0x0000_0001;
    pub const IS_OVERLAY: u32 = 0x0000_0002;
    pub const NOT_USED: u32 = 0x0000_0004;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RecordType {
    VolumeHeader = 1,
    Catalog = 2,
    StoreIndex = 3,
    StoreHeader = 4,
    StoreBlockList = 5,
    StoreBitmap = 6,
    StoreRangeList = 7,
}

impl RecordType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RecordType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            1 => Ok(RecordType::VolumeHeader),
            2 => Ok(RecordType::Catalog),
            3 => Ok(RecordType::StoreIndex),
            4 => Ok(RecordType::StoreHeader),
            5 => Ok(RecordType::StoreBlockList),
            6 => Ok(RecordType::StoreBitmap),
            7 => Ok(RecordType::StoreRangeList),
            other => Err(other),
        }
    }
}

/// The 128-byte header common to every store block.
#[derive(Debug, Clone, BinRead)]
#[br(little)]
pub struct StoreBlockHeader {
    pub signature: [u8; 16],
    pub record_type: u32,
    pub relative_offset: u64,
    pub next_offset: u64,
    pub payload_size: u32,
    #[br(count = STORE_BLOCK_HEADER_SIZE - 16 - 4 - 8 - 8 - 4)]
    pub reserved: Vec<u8>,
}

/// A 24-byte entry in a STORE_RANGE_LIST payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct BlockRangeDescriptor {
    pub original_offset: u64,
    pub relative_offset: u64,
    pub size: u64,
}

impl BlockRangeDescriptor {
    pub const SIZE: usize = 24;

    /// Returns `None` if `bytes` is the all-zero list terminator.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert!(bytes.len() >= Self::SIZE);
        if bytes[..Self::SIZE].iter().all(|&b| b == 0) {
            return None;
        }
        let mut cursor = std::io::Cursor::new(&bytes[..Self::SIZE]);
        BlockRangeDescriptor::read(&mut cursor).ok()
    }
}

/// An entry in a STORE_BLOCK_LIST payload: three `u64`s, a `u32` flags field,
/// a `u32` reserved field, and a `u64` allocation bitmap, 40 bytes total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct BlockDescriptor {
    pub original_offset: u64,
    pub relative_offset: u64,
    pub offset: u64,
    pub flags: u32,
    pub reserved: u32,
    pub allocation_bitmap: u64,
}

impl BlockDescriptor {
    pub const SIZE: usize = 40;

    /// Returns `None` if `bytes` is the all-zero list terminator.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert!(bytes.len() >= Self::SIZE);
        if bytes[..Self::SIZE].iter().all(|&b| b == 0) {
            return None;
        }
        let mut cursor = std::io::Cursor::new(&bytes[..Self::SIZE]);
        BlockDescriptor::read(&mut cursor).ok()
    }

    pub fn is_forwarder(&self) -> bool {
        self.flags & block_flags::IS_FORWARDER != 0
    }

    pub fn is_overlay(&self) -> bool {
        self.flags & block_flags::IS_OVERLAY != 0
    }

    pub fn is_not_used(&self) -> bool {
        self.flags & block_flags::NOT_USED != 0
    }
}
