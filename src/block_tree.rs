// An ordered index over a store's block descriptors, keyed by
// original_offset, encoding the overlay/base layering rule as a type
// rather than scan-and-compare logic.

use std::collections::BTreeMap;

use crate::format::{block_flags, BlockDescriptor, BLOCK_GRANULARITY};

/// One slot in the tree: a base descriptor plus an optional overlay that
/// supplies some of the base's 512-byte sub-blocks.
#[derive(Debug, Clone)]
pub struct BlockSlot {
    pub base: BlockDescriptor,
    pub overlay: Option<BlockDescriptor>,
}

impl BlockSlot {
    /// The descriptor callers should act on first: a forwarder or a plain
    /// base entry. Overlay resolution (picking per-sub-block source) is
    /// the store descriptor's job, not the tree's.
    pub fn primary(&self) -> &BlockDescriptor {
        &self.base
    }
}

/// Indexes all data-bearing and forwarder block descriptors of a store by
/// `original_offset`. Built once from a [`crate::list_iterator`] walk and
/// immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    slots: BTreeMap<u64, BlockSlot>,
}

impl BlockTree {
    pub fn new() -> Self {
        BlockTree {
            slots: BTreeMap::new(),
        }
    }

    /// Inserts one decoded block-list entry, applying the layering rule.
    /// NOT_USED entries are dropped and logged.
    pub fn insert(&mut self, descriptor: BlockDescriptor) {
        if descriptor.is_not_used() {
            log::warn!(
                "dropping NOT_USED block descriptor at original_offset {:#x}",
                descriptor.original_offset
            );
            return;
        }

        if descriptor.is_overlay() {
            self.slots
                .entry(descriptor.original_offset)
                .and_modify(|slot| slot.overlay = Some(descriptor))
                .or_insert(BlockSlot {
                    base: descriptor,
                    overlay: None,
                });
            return;
        }

        // A plain entry or forwarder replaces whatever was at this offset,
        // overlay included: rule 1 only carves out an exception for
        // IS_OVERLAY insertions, not for what they land on top of.
        self.slots.insert(
            descriptor.original_offset,
            BlockSlot {
                base: descriptor,
                overlay: None,
            },
        );
    }

    /// Returns the slot whose range `[original_offset, original_offset +
    /// 16 KiB)` contains `logical_offset`.
    pub fn lookup(&self, logical_offset: u64) -> Option<&BlockSlot> {
        let aligned = logical_offset & !(BLOCK_GRANULARITY - 1);
        self.slots.get(&aligned)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates slots in ascending `original_offset` order.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &BlockSlot)> {
        self.slots.iter()
    }

    /// The `index`-th slot in ascending `original_offset` order, matching
    /// `store_block_by_index`'s indexing contract.
    pub fn nth(&self, index: usize) -> Option<(&u64, &BlockSlot)> {
        self.slots.iter().nth(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(original_offset: u64, offset: u64, flags: u32, allocation_bitmap: u64) -> BlockDescriptor {
        BlockDescriptor {
            original_offset,
            relative_offset: 0,
            offset,
            flags,
            reserved: 0,
            allocation_bitmap,
        }
    }

    #[test]
    fn plain_insert_is_looked_up_by_aligned_offset() {
        let mut tree = BlockTree::new();
        tree.insert(descriptor(16384, 1_048_576, 0, 0));
        assert!(tree.lookup(16384).is_some());
        assert!(tree.lookup(16384 + 100).is_some());
        assert!(tree.lookup(0).is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn not_used_entries_are_dropped() {
        let mut tree = BlockTree::new();
        tree.insert(descriptor(16384, 0, block_flags::NOT_USED, 0));
        assert!(tree.is_empty());
    }

    #[test]
    fn later_plain_entry_replaces_earlier_one() {
        let mut tree = BlockTree::new();
        tree.insert(descriptor(0, 1_048_576, 0, 0));
        tree.insert(descriptor(0, 2_097_152, 0, 0));
        assert_eq!(tree.lookup(0).unwrap().base.offset, 2_097_152);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn overlay_stacks_on_top_of_base() {
        let mut tree = BlockTree::new();
        tree.insert(descriptor(0, 2_097_152, 0, 0));
        tree.insert(descriptor(0, 3_145_728, block_flags::IS_OVERLAY, 0x3));
        let slot = tree.lookup(0).unwrap();
        assert_eq!(slot.base.offset, 2_097_152);
        let overlay = slot.overlay.unwrap();
        assert_eq!(overlay.offset, 3_145_728);
        assert_eq!(overlay.allocation_bitmap, 0x3);
    }

    #[test]
    fn forwarder_is_retained_with_no_payload_semantics() {
        let mut tree = BlockTree::new();
        tree.insert(descriptor(16384, 0, block_flags::IS_FORWARDER, 0));
        let slot = tree.lookup(16384).unwrap();
        assert!(slot.primary().is_forwarder());
    }
}
