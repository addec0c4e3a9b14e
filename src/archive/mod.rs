//! Archive indexing and serving.
//!
//! An archive is one collector's tree of capture files for one kind of data
//! (updates or RIB dumps). The pieces:
//!
//! - [`catalog`]: the sorted time-keyed file index and its on-disk blob
//! - [`scanner`]: filesystem walking and first-record timestamp extraction
//! - [`sparse`]: intra-file offset sampling
//! - [`service`]: the per-archive command loop that owns the live catalog
//! - [`error`]: the archive error taxonomy

pub mod catalog;
pub mod error;
pub mod scanner;
pub mod service;
pub mod sparse;

pub use catalog::{ArchEntry, Catalog, EntryOffset};
pub use error::{ArchiveError, ArchiveResult};
pub use scanner::{first_record_time, Scanner};
pub use service::{spawn_archive, ArchiveCommand, ArchiveHandle};
pub use sparse::{generate_index, ItemOffset, DEFAULT_RATE};
