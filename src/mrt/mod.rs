//! MRT framing layer.
//!
//! Splits an MRT byte stream ([RFC 6396]) into framed records and decodes the
//! 12-byte common header. Records are handed out as owned byte buffers so a
//! consumer may hold them after the reader has moved on.
//!
//! [RFC 6396]: https://tools.ietf.org/html/rfc6396
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Type              |            Subtype            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             Length                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Message... (variable)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `BGP4MP_ET` records carry an extra 4-byte microsecond timestamp between
//! the common header and the message; the on-wire length field includes those
//! 4 bytes.

pub mod bgp;

use bytes::{BufMut, Bytes, BytesMut};
use bzip2::read::BzDecoder;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Length of the MRT common header in bytes.
pub const MRT_COMMON_HEADER_LEN: usize = 12;

/// MRT entry type carrying a BGP message.
pub const BGP4MP: u16 = 16;
/// MRT entry type carrying a BGP message with a microsecond timestamp.
pub const BGP4MP_ET: u16 = 17;

// Upper bound on a single message body; anything larger is a corrupt header.
const MAX_MESSAGE_LEN: u32 = 16 * 1024 * 1024;

/// Errors produced while framing or decoding MRT records.
#[derive(Error, Debug)]
pub enum MrtError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes available than the field being decoded requires.
    #[error("truncated {name}: expected {expected} bytes, found {found}")]
    Truncated {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("MRT message too large: {0} bytes")]
    MessageTooLarge(u32),

    #[error("invalid MRT header length for ET record: {0} < 4")]
    InvalidEtLength(u32),

    #[error("invalid BGP message length: {0}")]
    InvalidBgpMessageLength(u16),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl MrtError {
    /// Whether the record stream stays usable after this error. A rejected
    /// header leaves the reader at the next frame boundary (its declared
    /// length has been consumed); an I/O failure or a truncated stream has
    /// no boundary to return to.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MrtError::Io(_) | MrtError::Truncated { .. })
    }
}

/// Decoded MRT common header.
///
/// `length` is the length of the message body only; for `BGP4MP_ET` records
/// the 4 microsecond-timestamp bytes have already been subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub timestamp: u32,
    pub microseconds: Option<u32>,
    pub entry_type: u16,
    pub entry_subtype: u16,
    pub length: u32,
}

impl CommonHeader {
    /// The record timestamp at second precision, UTC.
    pub fn time(&self) -> DateTime<Utc> {
        // A u32 seconds value is always within chrono's representable range.
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
            .expect("u32 epoch seconds is representable")
    }

    /// Whether this record carries a BGP message (BGP4MP or BGP4MP_ET).
    pub fn is_bgp4mp(&self) -> bool {
        self.entry_type == BGP4MP || self.entry_type == BGP4MP_ET
    }
}

/// One framed MRT record with the exact bytes read from the stream.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub header: CommonHeader,
    /// Header bytes as read (12 bytes, or 16 for BGP4MP_ET).
    pub header_bytes: Bytes,
    /// Message body bytes, excluding the header.
    pub message_bytes: Bytes,
}

impl RawRecord {
    /// The complete record as a freshly allocated buffer (header + body).
    pub fn raw_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header_bytes.len() + self.message_bytes.len());
        buf.put_slice(&self.header_bytes);
        buf.put_slice(&self.message_bytes);
        buf.freeze()
    }

    /// Total on-wire length of the record in bytes.
    pub fn total_len(&self) -> usize {
        self.header_bytes.len() + self.message_bytes.len()
    }
}

/// Decode the embedded timestamp of a framed record (the first 4 header
/// bytes, big-endian epoch seconds).
pub fn record_timestamp(data: &[u8]) -> Result<DateTime<Utc>, MrtError> {
    if data.len() < MRT_COMMON_HEADER_LEN {
        return Err(MrtError::Truncated {
            name: "MRT common header",
            expected: MRT_COMMON_HEADER_LEN,
            found: data.len(),
        });
    }
    let secs = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok(DateTime::from_timestamp(i64::from(secs), 0).expect("u32 epoch seconds is representable"))
}

/// Sequential reader over the framed records of an MRT stream.
pub struct RecordReader<R> {
    reader: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader { reader }
    }

    /// Read the next record. Returns `Ok(None)` on a clean end of stream
    /// (EOF at a record boundary); EOF inside a record is an error.
    ///
    /// When a header is rejected (bad ET length, oversized message), the
    /// record's declared length is consumed before the error is returned,
    /// so the next call resumes at the following frame boundary.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>, MrtError> {
        let mut base = [0u8; MRT_COMMON_HEADER_LEN];
        let n = read_full(&mut self.reader, &mut base)?;
        if n == 0 {
            return Ok(None);
        }
        if n < MRT_COMMON_HEADER_LEN {
            return Err(MrtError::Truncated {
                name: "MRT common header",
                expected: MRT_COMMON_HEADER_LEN,
                found: n,
            });
        }

        let timestamp = u32::from_be_bytes([base[0], base[1], base[2], base[3]]);
        let entry_type = u16::from_be_bytes([base[4], base[5]]);
        let entry_subtype = u16::from_be_bytes([base[6], base[7]]);
        let mut length = u32::from_be_bytes([base[8], base[9], base[10], base[11]]);

        let (microseconds, header_bytes) = if entry_type == BGP4MP_ET {
            // The on-wire length includes the 4 microsecond bytes that live
            // in the extended header.
            if length < 4 {
                self.skip(u64::from(length))?;
                return Err(MrtError::InvalidEtLength(length));
            }
            length -= 4;
            let mut combined = [0u8; 16];
            combined[..MRT_COMMON_HEADER_LEN].copy_from_slice(&base);
            self.reader
                .read_exact(&mut combined[MRT_COMMON_HEADER_LEN..])?;
            let micros =
                u32::from_be_bytes([combined[12], combined[13], combined[14], combined[15]]);
            (Some(micros), Bytes::copy_from_slice(&combined))
        } else {
            (None, Bytes::copy_from_slice(&base))
        };

        if length > MAX_MESSAGE_LEN {
            self.skip(u64::from(length))?;
            return Err(MrtError::MessageTooLarge(length));
        }

        let mut body = BytesMut::zeroed(length as usize);
        self.reader.read_exact(&mut body)?;

        Ok(Some(RawRecord {
            header: CommonHeader {
                timestamp,
                microseconds,
                entry_type,
                entry_subtype,
                length,
            },
            header_bytes,
            message_bytes: body.freeze(),
        }))
    }

    // Consume the body of a record whose header was rejected so the stream
    // stays on a frame boundary. A short skip means the stream ended; the
    // next read reports that as EOF.
    fn skip(&mut self, len: u64) -> Result<(), MrtError> {
        std::io::copy(&mut self.reader.by_ref().take(len), &mut std::io::sink())?;
        Ok(())
    }
}

/// Open a capture file for record iteration, transparently decompressing
/// `.bz2` files. The choice is by filename suffix only; the framing is
/// identical either way.
pub fn open_record_reader(path: &Path) -> std::io::Result<RecordReader<Box<dyn Read + Send>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read + Send> = match path.extension().and_then(|e| e.to_str()) {
        Some("bz2") => Box::new(BufReader::new(BzDecoder::new(file))),
        _ => Box::new(BufReader::new(file)),
    };
    Ok(RecordReader::new(reader))
}

// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
