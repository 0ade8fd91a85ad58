//! Slot accounting for one channel.
//!
//! Slots are tracked with monotonically increasing sequence counters
//! rather than per-slot flags; slot `seq` lives in buffer `seq % depth`.
//! For a single consumer the ring is always partitioned as
//!
//! ```text
//! consumer-held | ready | producer-held | free      (sums to depth)
//! c_rel     c_acq   p_rel         p_acq     c_rel + depth
//! ```
//!
//! With several consumers the producer may only reuse a slot once the
//! slowest consumer released it.

/// A contiguous run of sequence numbers handed out by one acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRange {
    pub first: u64,
    pub count: u32,
}

impl SlotRange {
    pub fn seqs(&self) -> impl Iterator<Item = u64> {
        self.first..self.first + u64::from(self.count)
    }
}

/// Outcome of a non-blocking acquire attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
    Granted(SlotRange),
    /// Not enough slots yet; the opposite side has to release first.
    WouldBlock,
    /// The producer finished and the remaining data cannot satisfy the request.
    Drained,
}

/// Protocol violation detected by the ring; callers attach tile context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingError {
    CapacityExceeded { requested: u32, held: u32, depth: u32 },
    ReleaseMismatch { requested: u32, held: u32 },
}

#[derive(Clone, Copy, Debug, Default)]
struct Cursor {
    acquired: u64,
    released: u64,
}

#[derive(Clone, Debug)]
pub struct SlotRing {
    depth: u32,
    slots: Vec<Vec<i64>>,
    prod_acquired: u64,
    prod_released: u64,
    consumers: Vec<Cursor>,
    closed: bool,
}

impl SlotRing {
    pub fn new(depth: u32, element_len: usize, consumers: usize) -> Self {
        Self {
            depth,
            slots: vec![vec![0; element_len]; depth as usize],
            prod_acquired: 0,
            prod_released: 0,
            consumers: vec![Cursor::default(); consumers.max(1)],
            closed: false,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn oldest_unreleased(&self) -> u64 {
        self.consumers
            .iter()
            .map(|c| c.released)
            .min()
            .unwrap_or(self.prod_acquired)
    }

    /// Slots no side holds and no consumer still has to read.
    pub fn free(&self) -> u32 {
        let in_use = self.prod_acquired - self.oldest_unreleased();
        self.depth - in_use as u32
    }

    pub fn producer_held(&self) -> u32 {
        (self.prod_acquired - self.prod_released) as u32
    }

    /// Released by the producer, not yet acquired by consumer `c`.
    pub fn ready(&self, c: usize) -> u32 {
        (self.prod_released - self.consumers[c].acquired) as u32
    }

    pub fn consumer_held(&self, c: usize) -> u32 {
        let cur = self.consumers[c];
        (cur.acquired - cur.released) as u32
    }

    /// Next sequence number the producer will be handed.
    pub fn next_produce_seq(&self) -> u64 {
        self.prod_acquired
    }

    /// Oldest sequence number the producer still holds.
    pub fn oldest_produce_seq(&self) -> u64 {
        self.prod_released
    }

    /// Mark the producer finished; consumers drain what is left.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Atomically check and reserve `count` slots for the producer.
    pub fn try_acquire_produce(&mut self, count: u32) -> Result<Grant, RingError> {
        let held = self.producer_held();
        if count > self.depth - held {
            return Err(RingError::CapacityExceeded {
                requested: count,
                held,
                depth: self.depth,
            });
        }
        if self.try_reserve_produce(count) {
            Ok(Grant::Granted(SlotRange {
                first: self.prod_acquired - u64::from(count),
                count,
            }))
        } else {
            Ok(Grant::WouldBlock)
        }
    }

    /// Reserve producer slots without the held-count check; used when a
    /// link drives the producer side and opens objects one at a time.
    pub(crate) fn try_reserve_produce(&mut self, count: u32) -> bool {
        if self.free() >= count {
            self.prod_acquired += u64::from(count);
            true
        } else {
            false
        }
    }

    /// Atomically check and reserve `count` ready slots for consumer `c`.
    pub fn try_acquire_consume(&mut self, c: usize, count: u32) -> Result<Grant, RingError> {
        let held = self.consumer_held(c);
        if count > self.depth - held {
            return Err(RingError::CapacityExceeded {
                requested: count,
                held,
                depth: self.depth,
            });
        }
        if self.ready(c) >= count {
            let first = self.consumers[c].acquired;
            self.consumers[c].acquired += u64::from(count);
            Ok(Grant::Granted(SlotRange { first, count }))
        } else if self.closed {
            Ok(Grant::Drained)
        } else {
            Ok(Grant::WouldBlock)
        }
    }

    /// Hand the `count` oldest producer-held slots to the consumers.
    pub fn release_produce(&mut self, count: u32) -> Result<(), RingError> {
        let held = self.producer_held();
        if count > held {
            return Err(RingError::ReleaseMismatch {
                requested: count,
                held,
            });
        }
        self.prod_released += u64::from(count);
        Ok(())
    }

    /// Return the `count` oldest slots held by consumer `c`.
    pub fn release_consume(&mut self, c: usize, count: u32) -> Result<(), RingError> {
        let held = self.consumer_held(c);
        if count > held {
            return Err(RingError::ReleaseMismatch {
                requested: count,
                held,
            });
        }
        self.consumers[c].released += u64::from(count);
        Ok(())
    }

    pub fn slot(&self, seq: u64) -> &[i64] {
        &self.slots[(seq % u64::from(self.depth)) as usize]
    }

    pub fn slot_mut(&mut self, seq: u64) -> &mut [i64] {
        let idx = (seq % u64::from(self.depth)) as usize;
        &mut self.slots[idx]
    }
}
