//! Run-time state of a join: which source may write into which sink object.
//!
//! Source `i` contributes to sink objects strictly in order (its own
//! cursor). An object is opened on the sink ring when the first source
//! reaches it, so every source is gated by sink slot availability on its
//! own. At most one source holds a given object at a time; its segment
//! starts wherever the previous grant of that object ended. Completed
//! objects are committed to the consumer in sequence order.

use std::collections::BTreeMap;

use crate::fifo::{RingError, SlotRing};

/// Where a source may write: `len` scalars at `offset` of object `seq`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentGrant {
    pub seq: u64,
    pub offset: usize,
    pub len: usize,
}

/// One entry of the grant log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinGrant {
    pub source: usize,
    pub seq: u64,
    pub offset: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct OpenObject {
    cursor: usize,
    contributions: usize,
    holder: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct JoinState {
    source_lens: Vec<usize>,
    next_seq: Vec<u64>,
    finished: Vec<bool>,
    open: BTreeMap<u64, OpenObject>,
    grants: Vec<JoinGrant>,
}

impl JoinState {
    pub fn new(source_lens: Vec<usize>) -> Self {
        let n = source_lens.len();
        Self {
            source_lens,
            next_seq: vec![0; n],
            finished: vec![false; n],
            open: BTreeMap::new(),
            grants: Vec::new(),
        }
    }

    /// Try to grant `source` its segment of the next object it owes.
    ///
    /// Returns `None` when the sink has no free slot or another source
    /// currently holds that object.
    pub fn try_acquire(&mut self, sink: &mut SlotRing, source: usize) -> Option<SegmentGrant> {
        let seq = self.next_seq[source];
        if let Some(obj) = self.open.get(&seq) {
            if obj.holder.is_some() {
                return None;
            }
        } else {
            // sources advance one object at a time, so an unopened target
            // is always the next sequence number of the sink
            debug_assert_eq!(seq, sink.next_produce_seq());
            if !sink.try_reserve_produce(1) {
                return None;
            }
            self.open.insert(seq, OpenObject::default());
        }

        let len = self.source_lens[source];
        let obj = self.open.entry(seq).or_default();
        let offset = obj.cursor;
        obj.cursor += len;
        obj.holder = Some(source);
        self.grants.push(JoinGrant {
            source,
            seq,
            offset,
        });
        Some(SegmentGrant { seq, offset, len })
    }

    /// Finish `source`'s current segment; commits every object completed
    /// at the head of the sink. Returns how many objects were committed.
    pub fn release(&mut self, sink: &mut SlotRing, source: usize) -> Result<u32, RingError> {
        let seq = self.next_seq[source];
        let n_sources = self.source_lens.len();
        match self.open.get_mut(&seq) {
            Some(obj) if obj.holder == Some(source) => {
                obj.holder = None;
                obj.contributions += 1;
            }
            _ => {
                return Err(RingError::ReleaseMismatch {
                    requested: 1,
                    held: 0,
                })
            }
        }
        self.next_seq[source] += 1;

        let mut committed = 0;
        loop {
            let head = sink.oldest_produce_seq();
            match self.open.get(&head) {
                Some(obj) if obj.contributions == n_sources => {
                    self.open.remove(&head);
                    sink.release_produce(1)?;
                    committed += 1;
                }
                _ => break,
            }
        }
        Ok(committed)
    }

    /// Mark a source as finished. Returns true once every source is.
    pub fn finish(&mut self, source: usize) -> bool {
        self.finished[source] = true;
        self.finished.iter().all(|f| *f)
    }

    /// Objects opened but not yet complete.
    pub fn pending(&self) -> u64 {
        self.open.len() as u64
    }

    /// Objects `source` has contributed to so far.
    pub fn contributed(&self, source: usize) -> u64 {
        self.next_seq[source]
    }

    /// Grants in the order they were handed out.
    pub fn grants(&self) -> &[JoinGrant] {
        &self.grants
    }
}
