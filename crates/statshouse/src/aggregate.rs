// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-windowed merge buffer sitting in front of the transport.
//!
//! Events sharing a name and dimensions are merged for one window: counters
//! are summed in place, values and uniques collect samples up to a cap. Entry
//! storage comes from a [`RingArena`], so entries leave strictly in arrival
//! order, and an ordered index keyed by `(hash, size, kind)` finds the entry
//! to merge into.

use std::collections::BTreeMap;
use std::hash::Hasher;
use std::time::Duration;

use fnv::FnvHasher;
use tokio::time::Instant;
use tracing::{debug, trace};
use ustr::Ustr;

use crate::arena::{RingArena, Seq};
use crate::constants::MAX_DIMENSIONS;
use crate::metric::{Dimension, MetricEvent, MetricKind, Sample, Samples};
use crate::timer::Deadline;

/// Fixed bookkeeping charged to every entry. Includes room for one sample.
pub const ENTRY_OVERHEAD: usize = 64;
pub const SAMPLE_LEN: usize = 8;

/// Receiver of reclaimed entries.
pub trait FlushSink {
    fn flush_event(&mut self, event: &MetricEvent);

    /// Called once after a reclaim pass that produced at least one event.
    fn batch_complete(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Folded into an existing entry.
    Merged,
    /// Stored as a new entry.
    Buffered,
    /// Not taken; the caller sends the event directly.
    Rejected,
}

type IndexKey = (u64, usize, MetricKind);

#[derive(Debug)]
struct Entry {
    hash: u64,
    size: usize,
    kind: MetricKind,
    name: Ustr,
    inserted: Instant,
    keys: [Option<(Ustr, u32)>; MAX_DIMENSIONS],
    samples: usize,
    indexed: bool,
}

impl Entry {
    fn index_key(&self) -> IndexKey {
        (self.hash, self.size, self.kind)
    }

    fn key_names(&self) -> impl Iterator<Item = (Ustr, usize)> + '_ {
        self.keys.iter().flatten().map(|(k, len)| (*k, *len as usize))
    }
}

#[derive(Debug)]
pub struct AggregateCache {
    ring: RingArena<Entry>,
    index: BTreeMap<IndexKey, Seq>,
    window: Duration,
    values: usize,
    timer: Deadline,
}

fn event_hash(event: &MetricEvent) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(event.name.as_bytes());
    for dimension in &event.dimensions {
        hasher.write(dimension.key.as_bytes());
        hasher.write(dimension.value.as_bytes());
    }
    hasher.finish()
}

fn read_sample(kind: MetricKind, bytes: &[u8]) -> Sample {
    let mut raw = [0; SAMPLE_LEN];
    raw.copy_from_slice(&bytes[..SAMPLE_LEN]);
    match kind {
        MetricKind::Counter => Sample::Counter(f64::from_le_bytes(raw)),
        MetricKind::Value => Sample::Value(f64::from_le_bytes(raw)),
        MetricKind::Unique => Sample::Unique(i64::from_le_bytes(raw)),
    }
}

fn write_sample(sample: Sample, bytes: &mut [u8]) {
    let raw = match sample {
        Sample::Counter(v) | Sample::Value(v) => v.to_le_bytes(),
        Sample::Unique(v) => v.to_le_bytes(),
    };
    bytes[..SAMPLE_LEN].copy_from_slice(&raw);
}

impl AggregateCache {
    /// `size` is the arena capacity in bytes, `values` the per-entry sample
    /// cap for value and unique metrics. The cap never exceeds what the arena
    /// can hold.
    #[must_use]
    pub fn new(size: usize, window: Duration, values: usize) -> Self {
        AggregateCache {
            ring: RingArena::new(size),
            index: BTreeMap::new(),
            window,
            values: values.min(size / SAMPLE_LEN),
            timer: Deadline::default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.at()
    }

    fn sample_capacity(&self, kind: MetricKind) -> usize {
        match kind {
            MetricKind::Counter => 1,
            _ => self.values,
        }
    }

    fn entry_size(&self, event: &MetricEvent) -> usize {
        let keys: usize = event.dimensions.iter().map(|d| d.value.len()).sum();
        let samples = self.sample_capacity(event.kind()).saturating_sub(1) * SAMPLE_LEN;
        ENTRY_OVERHEAD + keys + samples
    }

    fn samples_len(&self, kind: MetricKind) -> usize {
        self.sample_capacity(kind) * SAMPLE_LEN
    }

    fn same_shape(&self, seq: Seq, event: &MetricEvent) -> bool {
        let (Some(entry), Some(bytes)) = (self.ring.get(seq), self.ring.bytes(seq)) else {
            return false;
        };
        if entry.name != event.name || entry.key_names().count() != event.dimensions.len() {
            return false;
        }
        let mut at = self.samples_len(entry.kind);
        for ((key, len), dimension) in entry.key_names().zip(&event.dimensions) {
            if key != dimension.key || &bytes[at..at + len] != dimension.value.as_bytes() {
                return false;
            }
            at += len;
        }
        true
    }

    /// Offers `event` to the cache. Only single-sample events are merged;
    /// anything else, and everything while `exiting`, is rejected.
    pub fn ingest(
        &mut self,
        event: &MetricEvent,
        now: Instant,
        exiting: bool,
        sink: &mut impl FlushSink,
    ) -> Ingest {
        let kind = event.kind();
        if kind != MetricKind::Counter && self.values == 0 {
            return Ingest::Rejected;
        }
        if exiting {
            debug!("Declining aggregation of {}, endpoint is shutting down", event.name);
            return Ingest::Rejected;
        }
        let Some(sample) = event.single_sample() else {
            return Ingest::Rejected;
        };

        let key = (event_hash(event), self.entry_size(event), kind);

        if let Some(&seq) = self.index.get(&key) {
            if !self.same_shape(seq, event) {
                debug!("Aggregation hash collision for {}", event.name);
                return Ingest::Rejected;
            }
            let capacity = self.sample_capacity(kind);
            if let Some((entry, bytes)) = self.ring.record_mut(seq) {
                match sample {
                    Sample::Counter(v) => {
                        let Sample::Counter(sum) = read_sample(kind, bytes) else {
                            return Ingest::Rejected;
                        };
                        write_sample(Sample::Counter(sum + v), bytes);
                        trace!("Aggregated counter {}", event.name);
                        return Ingest::Merged;
                    }
                    _ if entry.samples < capacity => {
                        let at = entry.samples * SAMPLE_LEN;
                        write_sample(sample, &mut bytes[at..]);
                        entry.samples += 1;
                        trace!("Aggregated sample {} of {}", entry.samples, event.name);
                        return Ingest::Merged;
                    }
                    _ => {
                        // Full: the entry stays queued until its window ends
                        // but stops accepting samples.
                        entry.indexed = false;
                    }
                }
            }
            self.index.remove(&key);
        }

        let seq = match self.allocate(event, key, now) {
            Some(seq) => seq,
            None => {
                debug!("Aggregation arena full, reclaiming expired entries");
                if self.reclaim(now, false, sink) == 0 {
                    return Ingest::Rejected;
                }
                match self.allocate(event, key, now) {
                    Some(seq) => seq,
                    None => {
                        debug!("Aggregation arena still full, {} bytes wanted", key.1);
                        return Ingest::Rejected;
                    }
                }
            }
        };

        let samples_len = self.samples_len(kind);
        if let Some((_, bytes)) = self.ring.record_mut(seq) {
            write_sample(sample, bytes);
            let mut at = samples_len;
            for dimension in &event.dimensions {
                let value = dimension.value.as_bytes();
                bytes[at..at + value.len()].copy_from_slice(value);
                at += value.len();
            }
        }
        self.index.insert(key, seq);
        self.arm_timer();
        Ingest::Buffered
    }

    fn allocate(&mut self, event: &MetricEvent, key: IndexKey, now: Instant) -> Option<Seq> {
        let mut keys = [None; MAX_DIMENSIONS];
        for (slot, dimension) in keys.iter_mut().zip(&event.dimensions) {
            *slot = Some((dimension.key, dimension.value.len() as u32));
        }
        let (hash, size, kind) = key;
        let entry = Entry {
            hash,
            size,
            kind,
            name: event.name,
            inserted: now,
            keys,
            samples: 1,
            indexed: true,
        };
        self.ring.alloc(size, entry)
    }

    fn materialize(&self, seq: Seq) -> Option<MetricEvent> {
        let entry = self.ring.get(seq)?;
        let bytes = self.ring.bytes(seq)?;
        let samples = match entry.kind {
            MetricKind::Counter => match read_sample(entry.kind, bytes) {
                Sample::Counter(sum) => Samples::Counter(sum),
                _ => return None,
            },
            MetricKind::Value => Samples::Value(
                bytes[..entry.samples * SAMPLE_LEN]
                    .chunks_exact(SAMPLE_LEN)
                    .filter_map(|c| c.try_into().ok().map(f64::from_le_bytes))
                    .collect(),
            ),
            MetricKind::Unique => Samples::Unique(
                bytes[..entry.samples * SAMPLE_LEN]
                    .chunks_exact(SAMPLE_LEN)
                    .filter_map(|c| c.try_into().ok().map(i64::from_le_bytes))
                    .collect(),
            ),
        };
        let mut at = self.samples_len(entry.kind);
        let dimensions = entry
            .key_names()
            .map(|(key, len)| {
                let value = String::from_utf8_lossy(&bytes[at..at + len]).into_owned();
                at += len;
                Dimension { key, value }
            })
            .collect();
        Some(MetricEvent {
            name: entry.name,
            samples,
            dimensions,
        })
    }

    /// Hands every entry whose window has passed (all of them with
    /// `flush_all`) to `sink`, oldest first. Returns the number flushed.
    pub fn reclaim(&mut self, now: Instant, flush_all: bool, sink: &mut impl FlushSink) -> usize {
        let mut count = 0;
        while let Some((seq, entry)) = self.ring.front() {
            if !flush_all && now.saturating_duration_since(entry.inserted) < self.window {
                break;
            }
            if let Some(event) = self.materialize(seq) {
                sink.flush_event(&event);
            }
            if let Some((_, entry)) = self.ring.pop_front() {
                if entry.indexed {
                    self.index.remove(&entry.index_key());
                }
            }
            count += 1;
        }

        if count > 0 {
            debug!("Reclaimed {} aggregated metrics", count);
            sink.batch_complete();
        }
        count
    }

    /// Arms the reclaim deadline for the oldest entry. An overdue entry makes
    /// the deadline fire right away.
    fn arm_timer(&mut self) {
        if let Some((_, entry)) = self.ring.front() {
            self.timer.arm(entry.inserted + self.window);
        }
    }

    /// Runs a due reclaim and rearms for what is left.
    pub fn on_timer(&mut self, now: Instant, sink: &mut impl FlushSink) -> usize {
        if !self.timer.is_due(now) {
            return 0;
        }
        self.timer.disarm();
        let count = self.reclaim(now, false, sink);
        self.arm_timer();
        count
    }

    /// Drains every entry regardless of age and cancels the deadline.
    pub fn drain(&mut self, now: Instant, sink: &mut impl FlushSink) -> usize {
        self.timer.disarm();
        self.reclaim(now, true, sink)
    }
}
