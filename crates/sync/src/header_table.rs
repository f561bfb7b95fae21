use cobalt_primitives::block::BlockHeader;
use cobalt_primitives::Hash256;

/// Append-only table of block headers between a fixed anchor and a fixed
/// stop hash. The anchor (`first_hash`) is the hash of the block at
/// `first_height - 1`; every stored header links to its predecessor, so
/// the table always describes one contiguous chain segment.
///
/// The table outlives individual sync attempts: a replacement peer picks
/// up from `previous_hash()` with whatever earlier peers contributed
/// still in place.
pub struct HeaderTable {
    first_height: i32,
    first_hash: Hash256,
    stop_hash: Hash256,
    capacity: usize,
    slots: Vec<BlockHeader>,
}

impl HeaderTable {
    pub fn new(first_height: i32, first_hash: Hash256, stop_hash: Hash256, capacity: usize) -> Self {
        Self {
            first_height,
            first_hash,
            stop_hash,
            capacity,
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn first_height(&self) -> i32 {
        self.first_height
    }

    pub fn stop_hash(&self) -> Hash256 {
        self.stop_hash
    }

    /// Height of the last stored header, or `first_height - 1` when the
    /// table is empty (the anchor height).
    pub fn previous_height(&self) -> i32 {
        self.first_height + self.slots.len() as i32 - 1
    }

    /// Hash the next merged batch must link to.
    pub fn previous_hash(&self) -> Hash256 {
        self.slots
            .last()
            .map(BlockHeader::hash)
            .unwrap_or(self.first_hash)
    }

    pub fn complete(&self) -> bool {
        self.slots
            .last()
            .map(|header| header.hash() == self.stop_hash)
            .unwrap_or(false)
    }

    /// Atomically appends the linking prefix of `batch`. Headers past the
    /// stop hash are ignored. Returns false, leaving the table untouched,
    /// when the batch does not link to `previous_hash()`, breaks linkage
    /// internally, or would overflow the capacity.
    pub fn merge(&mut self, batch: &[BlockHeader]) -> bool {
        let mut previous = self.previous_hash();
        let mut accepted = 0;
        for header in batch {
            if header.prev_block != previous {
                return false;
            }
            previous = header.hash();
            accepted += 1;
            if previous == self.stop_hash {
                break;
            }
        }
        if self.slots.len() + accepted > self.capacity {
            return false;
        }
        self.slots.extend_from_slice(&batch[..accepted]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked_headers(anchor: Hash256, count: usize) -> Vec<BlockHeader> {
        let mut headers = Vec::with_capacity(count);
        let mut previous = anchor;
        for index in 0..count {
            let header = BlockHeader {
                version: 4,
                prev_block: previous,
                merkle_root: [index as u8; 32],
                time: 1_700_000_000 + index as u32,
                bits: 0x1d00ffff,
                nonce: index as u32,
            };
            previous = header.hash();
            headers.push(header);
        }
        headers
    }

    fn table_for(anchor: Hash256, chain: &[BlockHeader]) -> HeaderTable {
        let stop = chain.last().expect("chain").hash();
        HeaderTable::new(0, anchor, stop, chain.len())
    }

    #[test]
    fn empty_table_reports_anchor() {
        let table = HeaderTable::new(100, [7; 32], [8; 32], 10);
        assert_eq!(table.previous_height(), 99);
        assert_eq!(table.previous_hash(), [7; 32]);
        assert!(!table.complete());
        assert!(table.is_empty());
    }

    #[test]
    fn merge_anchored_batch_fills_to_completion() {
        let anchor = [0xaa; 32];
        let chain = linked_headers(anchor, 3);
        let mut table = table_for(anchor, &chain);
        assert!(table.merge(&chain));
        assert_eq!(table.len(), 3);
        assert_eq!(table.previous_height(), 2);
        assert!(table.complete());
        // Linkage invariant across every stored pair.
        assert_eq!(table.slots[0].prev_block, anchor);
        for pair in table.slots.windows(2) {
            assert_eq!(pair[1].prev_block, pair[0].hash());
        }
    }

    #[test]
    fn merge_rejects_wrong_anchor() {
        let anchor = [0xaa; 32];
        let chain = linked_headers(anchor, 3);
        let mut table = HeaderTable::new(0, [0xab; 32], chain[2].hash(), 3);
        assert!(!table.merge(&chain));
        assert!(table.is_empty());
    }

    #[test]
    fn merge_rejects_broken_interior_linkage() {
        let anchor = [0xaa; 32];
        let mut chain = linked_headers(anchor, 4);
        chain[2].prev_block = [0xde; 32];
        let stop = chain[3].hash();
        let mut table = HeaderTable::new(0, anchor, stop, 4);
        assert!(!table.merge(&chain));
        // Atomic: the linking prefix was not kept either.
        assert!(table.is_empty());
    }

    #[test]
    fn merge_rejects_capacity_overflow() {
        let anchor = [0xaa; 32];
        let chain = linked_headers(anchor, 5);
        let mut table = HeaderTable::new(0, anchor, [0xff; 32], 3);
        assert!(!table.merge(&chain));
        assert!(table.is_empty());
    }

    #[test]
    fn merge_ignores_headers_past_stop() {
        let anchor = [0xaa; 32];
        let chain = linked_headers(anchor, 5);
        let stop = chain[2].hash();
        let mut table = HeaderTable::new(0, anchor, stop, 3);
        assert!(table.merge(&chain));
        assert_eq!(table.len(), 3);
        assert!(table.complete());
    }

    #[test]
    fn merging_same_batch_twice_appends_once() {
        let anchor = [0xaa; 32];
        let chain = linked_headers(anchor, 4);
        let stop = chain[3].hash();
        let mut table = HeaderTable::new(0, anchor, stop, 8);
        assert!(table.merge(&chain[..2]));
        assert_eq!(table.len(), 2);
        // The anchor has advanced, so the same batch no longer links.
        assert!(!table.merge(&chain[..2]));
        assert_eq!(table.len(), 2);
        assert!(table.merge(&chain[2..]));
        assert!(table.complete());
    }

    #[test]
    fn merge_of_empty_batch_is_vacuous() {
        let anchor = [0xaa; 32];
        let mut table = HeaderTable::new(0, anchor, [0xff; 32], 3);
        assert!(table.merge(&[]));
        assert!(table.is_empty());
    }

    #[test]
    fn partial_progress_survives_for_next_peer() {
        let anchor = [0xaa; 32];
        let chain = linked_headers(anchor, 6);
        let stop = chain[5].hash();
        let mut table = HeaderTable::new(0, anchor, stop, 6);
        assert!(table.merge(&chain[..4]));
        let resume_hash = table.previous_hash();
        assert_eq!(resume_hash, chain[3].hash());
        assert_eq!(table.previous_height(), 3);
        // A non-linking batch from a bad peer leaves the progress intact.
        assert!(!table.merge(&chain[..2]));
        assert_eq!(table.previous_hash(), resume_hash);
        assert!(table.merge(&chain[4..]));
        assert!(table.complete());
    }
}
