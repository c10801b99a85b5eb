use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::LeafPageRef;

/// Forward iterator over the leaf chain.
///
/// Holds a read latch (and pin) on the current leaf; stepping past the
/// end of a leaf latches `next_page_id` before the current guard drops.
/// The iterator is exhausted once the rightmost leaf runs out.
pub struct BPlusTreeIter {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl BPlusTreeIter {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            index,
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
        }
    }

    fn advance(&mut self) -> Result<Option<(i64, RecordId)>> {
        loop {
            let Some(guard) = self.leaf.as_ref() else {
                return Ok(None);
            };

            let next_page_id: PageId;
            {
                let view = LeafPageRef::new(guard.data());
                if self.index < view.size() {
                    let item = (view.key_at(self.index), view.rid_at(self.index));
                    self.index += 1;
                    return Ok(Some(item));
                }
                next_page_id = view.next_page_id();
            }

            if next_page_id == INVALID_PAGE_ID {
                self.leaf = None;
                return Ok(None);
            }
            // Latch the next leaf before the assignment drops the current
            // guard, keeping the chain crab intact
            let next = self.bpm.read_page(next_page_id)?;
            self.leaf = Some(next);
            self.index = 0;
        }
    }
}

impl Iterator for BPlusTreeIter {
    type Item = Result<(i64, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.leaf = None;
                Some(Err(e))
            }
        }
    }
}
