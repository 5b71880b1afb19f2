//! K-way merge of sorted entry streams.
//!
//! Reads, scans, and compaction all face the same problem: several sorted
//! sources (the memtable plus any number of tables) must be combined into
//! one ascending stream where, for a duplicated key, only the newest
//! source's entry survives. A min-heap over the heads of all sources does
//! this in O(total log sources).
//!
//! Sources are ordered by recency: **index 0 is the newest** (the memtable
//! during scans, the youngest level-0 table during compaction) and higher
//! indices are progressively older. Tombstones pass through untouched;
//! whether to suppress or persist them is the caller's decision.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use anyhow::Result;
use memtable::Entry;

/// A boxed sorted source feeding the merge.
pub type EntrySource<'a> = Box<dyn Iterator<Item = Result<(String, Entry)>> + 'a>;

/// Head-of-stream element in the merge heap.
///
/// `BinaryHeap` pops the greatest element, so the ordering is reversed on
/// keys (smallest key pops first) and reversed on source index for equal
/// keys (newest source pops first, so it wins the duplicate race).
struct HeapEntry {
    key: String,
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => other.source.cmp(&self.source),
            key_order => key_order.reverse(),
        }
    }
}

/// Merges N sorted sources into one ascending, deduplicated stream.
pub struct MergeIter<'a> {
    sources: Vec<EntrySource<'a>>,
    heap: BinaryHeap<HeapEntry>,
    last_key: Option<String>,
    /// A source failure noticed while re-priming; surfaced on the next call
    /// so the element popped alongside it is not lost.
    pending_err: Option<anyhow::Error>,
}

impl<'a> MergeIter<'a> {
    /// Builds the merge, priming the heap with the head of every source.
    ///
    /// A source that fails while producing its first item fails the whole
    /// construction.
    pub fn new(mut sources: Vec<EntrySource<'a>>) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some(head) = iter.next() {
                let (key, entry) = head?;
                heap.push(HeapEntry { key, entry, source });
            }
        }
        Ok(Self {
            sources,
            heap,
            last_key: None,
            pending_err: None,
        })
    }
}

impl Iterator for MergeIter<'_> {
    type Item = Result<(String, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_err.take() {
            return Some(Err(e));
        }
        while let Some(top) = self.heap.pop() {
            // Re-prime the source that produced this element.
            match self.sources[top.source].next() {
                Some(Ok((key, entry))) => self.heap.push(HeapEntry {
                    key,
                    entry,
                    source: top.source,
                }),
                Some(Err(e)) => self.pending_err = Some(e),
                None => {}
            }

            // Older copies of a key already yielded are dropped.
            if self.last_key.as_deref() == Some(top.key.as_str()) {
                continue;
            }
            self.last_key = Some(top.key.clone());
            return Some(Ok((top.key, top.entry)));
        }
        self.pending_err.take().map(Err)
    }
}
