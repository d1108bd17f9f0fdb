// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity ring allocator.
//!
//! Records are bump-allocated from a single byte region and released strictly
//! in allocation order: the only way to free a record is [`RingArena::pop_front`].
//! Live records therefore always occupy one contiguous stretch from `last` up
//! to `pos`, possibly wrapping around the end of the region.

use std::collections::VecDeque;

/// Monotonic identifier of an allocated record.
pub type Seq = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug)]
struct Record<T> {
    slot: Slot,
    meta: T,
}

#[derive(Debug)]
pub struct RingArena<T> {
    region: Box<[u8]>,
    pos: usize,
    last: usize,
    live: VecDeque<Record<T>>,
    head_seq: Seq,
}

impl<T> RingArena<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        RingArena {
            region: vec![0; capacity].into_boxed_slice(),
            pos: 0,
            last: 0,
            live: VecDeque::new(),
            head_seq: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Reserves `size` bytes for a new record, tagged with `meta`. Returns
    /// `None` when neither the space after `pos` nor, once wrapped, the space
    /// before `last` can hold it.
    pub fn alloc(&mut self, size: usize, meta: T) -> Option<Seq> {
        let capacity = self.region.len();
        let offset = if self.pos >= self.last {
            if capacity - self.pos > size {
                self.pos
            } else if self.last > size {
                0
            } else {
                return None;
            }
        } else if self.last - self.pos > size {
            self.pos
        } else {
            return None;
        };

        self.pos = offset + size;
        self.live.push_back(Record {
            slot: Slot { offset, len: size },
            meta,
        });
        Some(self.head_seq + self.live.len() as u64 - 1)
    }

    /// Releases the oldest live record.
    pub fn pop_front(&mut self) -> Option<(Slot, T)> {
        let record = self.live.pop_front()?;
        self.head_seq += 1;

        if record.slot.offset == 0 {
            self.last = 0;
        }
        self.last += record.slot.len;

        if self.live.is_empty() {
            self.pos = 0;
            self.last = 0;
        }
        Some((record.slot, record.meta))
    }

    #[must_use]
    pub fn front(&self) -> Option<(Seq, &T)> {
        self.live.front().map(|r| (self.head_seq, &r.meta))
    }

    fn index(&self, seq: Seq) -> Option<usize> {
        let index = usize::try_from(seq.checked_sub(self.head_seq)?).ok()?;
        (index < self.live.len()).then_some(index)
    }

    #[must_use]
    pub fn get(&self, seq: Seq) -> Option<&T> {
        self.index(seq).map(|i| &self.live[i].meta)
    }

    #[must_use]
    pub fn bytes(&self, seq: Seq) -> Option<&[u8]> {
        let slot = self.live[self.index(seq)?].slot;
        Some(&self.region[slot.offset..slot.offset + slot.len])
    }

    /// Metadata and backing bytes of a record, borrowed together.
    pub fn record_mut(&mut self, seq: Seq) -> Option<(&mut T, &mut [u8])> {
        let index = self.index(seq)?;
        let record = &mut self.live[index];
        let slot = record.slot;
        Some((
            &mut record.meta,
            &mut self.region[slot.offset..slot.offset + slot.len],
        ))
    }
}
