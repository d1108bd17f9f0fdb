// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary batch format understood by the StatsHouse collector.
//!
//! All integers are little endian and every field is 4-byte aligned. The
//! `*_len` functions mirror the writers exactly so buffers can be sized
//! before encoding.

use crate::errors::DecodeError;
use crate::metric::{Dimension, MetricEvent, MetricKind, Samples};
use ustr::Ustr;

pub const BATCH_TAG: u32 = 0x5658_0239;
pub const TINY_STRING_LEN: usize = 253;
pub const BIG_STRING_MARKER: u8 = 0xfe;
/// Longest string the 3-byte length prefix can describe.
pub const MAX_STRING_LEN: usize = 0x00ff_ffff;

const BATCH_HEADER_LEN: usize = 3 * 4;

fn clamp(s: &str) -> &[u8] {
    let bytes = s.as_bytes();
    &bytes[..bytes.len().min(MAX_STRING_LEN)]
}

fn string_padding(len: usize) -> usize {
    let framed = if len <= TINY_STRING_LEN { len + 1 } else { len };
    (4 - framed % 4) % 4
}

#[must_use]
pub fn string_len(s: &str) -> usize {
    let len = clamp(s).len();
    let header = if len <= TINY_STRING_LEN { 1 } else { 4 };
    header + len + string_padding(len)
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = clamp(s);
    let len = bytes.len();
    if len <= TINY_STRING_LEN {
        buf.push(len as u8);
    } else {
        buf.push(BIG_STRING_MARKER);
        buf.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + string_padding(len), 0);
}

fn write_u32(buf: &mut Vec<u8>, n: u32) {
    buf.extend_from_slice(&n.to_le_bytes());
}

#[must_use]
pub fn metric_len(event: &MetricEvent) -> usize {
    let mut len = 4 + string_len(&event.name) + 4;
    for dimension in &event.dimensions {
        len += string_len(&dimension.key) + string_len(&dimension.value);
    }
    len + match &event.samples {
        Samples::Counter(_) => 8,
        Samples::Value(values) => 4 + 8 * values.len(),
        Samples::Unique(values) => 4 + 8 * values.len(),
    }
}

pub fn write_metric(buf: &mut Vec<u8>, event: &MetricEvent) {
    write_u32(buf, event.kind().field_mask());
    write_string(buf, &event.name);
    write_u32(buf, event.dimensions.len() as u32);
    for dimension in &event.dimensions {
        write_string(buf, &dimension.key);
        write_string(buf, &dimension.value);
    }
    match &event.samples {
        Samples::Counter(sum) => buf.extend_from_slice(&sum.to_le_bytes()),
        Samples::Value(values) => {
            write_u32(buf, values.len() as u32);
            for value in values {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        Samples::Unique(values) => {
            // The collector reads this field as a presence marker.
            write_u32(buf, 1);
            for value in values {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
}

#[must_use]
pub fn batch_len(events: &[MetricEvent]) -> usize {
    BATCH_HEADER_LEN + events.iter().map(metric_len).sum::<usize>()
}

pub fn write_batch(buf: &mut Vec<u8>, events: &[MetricEvent]) {
    write_u32(buf, BATCH_TAG);
    write_u32(buf, 0);
    write_u32(buf, events.len() as u32);
    for event in events {
        write_metric(buf, event);
    }
}

/// Length of `event` framed as a batch of its own.
#[must_use]
pub fn record_len(event: &MetricEvent) -> usize {
    BATCH_HEADER_LEN + metric_len(event)
}

pub fn write_record(buf: &mut Vec<u8>, event: &MetricEvent) {
    write_batch(buf, std::slice::from_ref(event));
}

#[must_use]
pub fn encode_batch(events: &[MetricEvent]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(batch_len(events));
    write_batch(&mut buf, events);
    buf
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated(self.pos))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let first = self.take(1)?[0];
        let len = if first == BIG_STRING_MARKER {
            let b = self.take(3)?;
            usize::from(b[0]) | usize::from(b[1]) << 8 | usize::from(b[2]) << 16
        } else {
            usize::from(first)
        };
        let bytes = self.take(len)?;
        self.take(string_padding(len))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::Utf8(start))
    }
}

/// Reference decoder. Every datagram produced by the transport is a
/// concatenation of batches, all of which are returned in order.
pub fn decode_batch(buf: &[u8]) -> Result<Vec<MetricEvent>, DecodeError> {
    let mut reader = Reader { buf, pos: 0 };
    let mut events = Vec::new();
    while reader.pos < buf.len() {
        let tag = reader.u32()?;
        if tag != BATCH_TAG {
            return Err(DecodeError::BadTag(tag));
        }
        reader.u32()?;
        let count = reader.u32()?;
        for _ in 0..count {
            events.push(decode_metric(&mut reader)?);
        }
    }
    Ok(events)
}

fn decode_metric(reader: &mut Reader<'_>) -> Result<MetricEvent, DecodeError> {
    let mask = reader.u32()?;
    let kind = MetricKind::from_field_mask(mask).ok_or(DecodeError::BadFieldMask(mask))?;
    let name = Ustr::from(reader.string()?.as_str());
    let keys = reader.u32()?;
    let mut dimensions = Vec::with_capacity(keys as usize);
    for _ in 0..keys {
        let key = Ustr::from(reader.string()?.as_str());
        let value = reader.string()?;
        dimensions.push(Dimension { key, value });
    }
    let samples = match kind {
        MetricKind::Counter => Samples::Counter(f64::from_le_bytes(reader.array()?)),
        MetricKind::Value => {
            let count = reader.u32()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(f64::from_le_bytes(reader.array()?));
            }
            Samples::Value(values)
        }
        MetricKind::Unique => {
            let count = reader.u32()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(i64::from_le_bytes(reader.array()?));
            }
            Samples::Unique(values)
        }
    };
    Ok(MetricEvent {
        name,
        samples,
        dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tiny_string_layout() {
        let mut buf = Vec::new();
        write_string(&mut buf, "abc");
        assert_eq!(buf, vec![3, b'a', b'b', b'c']);

        let mut buf = Vec::new();
        write_string(&mut buf, "ab");
        assert_eq!(buf, vec![2, b'a', b'b', 0]);

        let mut buf = Vec::new();
        write_string(&mut buf, "");
        assert_eq!(buf, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_big_string_layout() {
        let s = "x".repeat(254);
        let mut buf = Vec::new();
        write_string(&mut buf, &s);
        assert_eq!(&buf[..4], &[BIG_STRING_MARKER, 254, 0, 0]);
        // 254 bytes of payload padded to 256
        assert_eq!(buf.len(), 4 + 256);
        assert_eq!(string_len(&s), buf.len());

        let s = "y".repeat(253);
        assert_eq!(string_len(&s), 1 + 253 + 2);
    }

    #[test]
    fn test_counter_record_bytes() {
        let event = MetricEvent::counter("hits", 2.0).with_dimension("0", "ok");
        let buf = encode_batch(std::slice::from_ref(&event));
        let mut expected = Vec::new();
        expected.extend_from_slice(&BATCH_TAG.to_le_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&[4, b'h', b'i', b't', b's', 0, 0, 0]);
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&[1, b'0', 0, 0]);
        expected.extend_from_slice(&[2, b'o', b'k', 0]);
        expected.extend_from_slice(&2.0f64.to_le_bytes());
        assert_eq!(buf, expected);
        assert_eq!(batch_len(std::slice::from_ref(&event)), buf.len());
    }

    #[test]
    fn test_unique_count_is_literal_one() {
        let mut event = MetricEvent::unique("users", 10);
        event.push_sample(crate::metric::Sample::Unique(11));
        let mut buf = Vec::new();
        write_metric(&mut buf, &event);
        assert_eq!(buf.len(), metric_len(&event));
        // mask, name "users" (1 + 5 + 2), key count, then the count field
        let count_at = 4 + 8 + 4;
        assert_eq!(&buf[count_at..count_at + 4], &1u32.to_le_bytes());
        assert_eq!(buf.len(), count_at + 4 + 16);
    }

    #[test]
    fn test_decode_round_trip() {
        let events = vec![
            MetricEvent::value("api_latency", 0.125)
                .with_dimension("0", "200")
                .with_dimension("_s", "GET /index"),
            MetricEvent::unique("visitors", -42),
            MetricEvent::counter("requests", 3.0),
        ];
        let decoded = decode_batch(&encode_batch(&events)).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn test_decode_concatenated_records() {
        let a = MetricEvent::counter("a", 1.0);
        let b = MetricEvent::value("b", 2.5);
        let mut buf = Vec::new();
        write_record(&mut buf, &a);
        write_record(&mut buf, &b);
        assert_eq!(buf.len(), record_len(&a) + record_len(&b));
        assert_eq!(decode_batch(&buf).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_batch(&[1, 2, 3, 4]), Err(DecodeError::BadTag(0x0403_0201)));
        let mut buf = encode_batch(&[MetricEvent::counter("a", 1.0)]);
        buf.truncate(buf.len() - 1);
        assert!(matches!(decode_batch(&buf), Err(DecodeError::Truncated(_))));
    }

    proptest! {
        #[test]
        fn test_string_len_matches_writer(len in 0usize..1100) {
            let s = "s".repeat(len);
            let mut buf = vec![0xaa];
            write_string(&mut buf, &s);
            prop_assert_eq!(buf.len() - 1, string_len(&s));
            prop_assert_eq!(string_len(&s) % 4, 0);
        }
    }
}
