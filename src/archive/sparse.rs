//! Sparse intra-file index builder.
//!
//! Samples `(value, offset)` pairs at a fixed rate over a framed record
//! stream so a consumer can seek into the middle of a capture file without
//! decoding it from the start. Offsets count decompressed bytes and point at
//! the start of the record *after* the sampled one.

use crate::mrt::{MrtError, RecordReader};
use std::io::Read;

/// Sample rate used when the requested one is outside `(0, 1]`.
pub const DEFAULT_RATE: f64 = 0.1;

/// One sampled value with the byte offset just past its record.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOffset<T> {
    pub value: T,
    pub offset: u64,
}

/// Build a sparse index over `reader`.
///
/// The result has exactly `⌊1/rate⌋` slots. Slot `k` holds the first record
/// whose cumulative byte position exceeds `k · rate · file_size` and whose
/// `translate` succeeds; a failed translation leaves the slot for the next
/// record past the threshold. Slots with no decodable record in their region
/// stay `None`.
pub fn generate_index<R, T, F>(
    reader: &mut RecordReader<R>,
    file_size: u64,
    sample_rate: f64,
    translate: F,
) -> Vec<Option<ItemOffset<T>>>
where
    R: Read,
    F: Fn(&[u8]) -> Result<T, MrtError>,
{
    let rate = if sample_rate <= 0.0 || sample_rate > 1.0 {
        DEFAULT_RATE
    } else {
        sample_rate
    };
    let slots = (1.0 / rate) as usize;
    let mut indices: Vec<Option<ItemOffset<T>>> = Vec::with_capacity(slots);
    indices.resize_with(slots, || None);

    let sample_dist = rate * file_size as f64;
    let mut k = 0usize;
    let mut pos = 0u64;

    loop {
        let record = match reader.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "record error while indexing, stopping");
                break;
            }
        };
        pos += record.total_len() as u64;
        if k < slots && pos as f64 > k as f64 * sample_dist {
            if let Ok(value) = translate(&record.raw_bytes()) {
                indices[k] = Some(ItemOffset { value, offset: pos });
                k += 1;
            }
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mrt::{record_timestamp, testutil, BGP4MP};
    use chrono::{DateTime, Utc};
    use std::io::Cursor;

    /// Ten 100-byte records (12-byte header + 88-byte body) = 1000 bytes.
    fn ten_records() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..10u32 {
            data.extend(testutil::record(1000 + i, BGP4MP, 1, &[0u8; 88]));
        }
        data
    }

    fn timestamps(data: &[u8]) -> Result<DateTime<Utc>, MrtError> {
        record_timestamp(data)
    }

    #[test]
    fn test_index_shape_and_offsets() {
        let data = ten_records();
        let mut reader = RecordReader::new(Cursor::new(data));
        let index = generate_index(&mut reader, 1000, 0.25, timestamps);

        assert_eq!(index.len(), 4);
        // Thresholds 0, 250, 500, 750 over 100-byte record boundaries.
        let offsets: Vec<u64> = index.iter().map(|s| s.as_ref().unwrap().offset).collect();
        assert_eq!(offsets, vec![100, 300, 600, 800]);

        // Values are the timestamps of the sampled records.
        let values: Vec<i64> = index
            .iter()
            .map(|s| s.as_ref().unwrap().value.timestamp())
            .collect();
        assert_eq!(values, vec![1000, 1002, 1005, 1007]);
    }

    #[test]
    fn test_offsets_monotonic_and_bounded() {
        let data = ten_records();
        let mut reader = RecordReader::new(Cursor::new(data));
        let index = generate_index(&mut reader, 1000, 0.3, timestamps);

        assert_eq!(index.len(), 3);
        let offsets: Vec<u64> = index.iter().flatten().map(|s| s.offset).collect();
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(offsets.iter().all(|&o| o <= 1000));
    }

    #[test]
    fn test_rate_clamped() {
        for bad_rate in [0.0, -0.5, 1.5] {
            let data = ten_records();
            let mut reader = RecordReader::new(Cursor::new(data));
            let index = generate_index(&mut reader, 1000, bad_rate, timestamps);
            assert_eq!(index.len(), (1.0 / DEFAULT_RATE) as usize);
        }
    }

    #[test]
    fn test_failed_translation_leaves_slot_for_next_record() {
        let data = ten_records();
        let mut reader = RecordReader::new(Cursor::new(data));
        // Reject records with odd timestamps; the sampler must retry with
        // the next record instead of advancing the slot.
        let index = generate_index(&mut reader, 1000, 0.5, |data| {
            let t = record_timestamp(data)?;
            if t.timestamp() % 2 == 0 {
                Ok(t)
            } else {
                Err(MrtError::Unsupported("odd".into()))
            }
        });

        assert_eq!(index.len(), 2);
        let values: Vec<i64> = index.iter().flatten().map(|s| s.value.timestamp()).collect();
        assert!(values.iter().all(|v| v % 2 == 0));
    }

    #[test]
    fn test_empty_stream_yields_null_slots() {
        let mut reader = RecordReader::new(Cursor::new(Vec::new()));
        let index = generate_index(&mut reader, 0, 0.25, timestamps);
        assert_eq!(index.len(), 4);
        assert!(index.iter().all(|s| s.is_none()));
    }
}
