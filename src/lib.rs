//! # bgpvault
//!
//! Read-only archive server for MRT-format BGP capture streams.
//!
//! bgpvault indexes a directory hierarchy of append-only MRT capture files
//! by each file's first-record timestamp, refreshes the index periodically,
//! and serves time-range queries over HTTP: either the raw binary records
//! whose embedded timestamps fall within the range, or per-second JSON
//! statistics about the BGP UPDATE messages they carry. A continuous-pull
//! mode lets a client repeatedly fetch everything since its previous pull
//! using rotating opaque session IDs.
//!
//! ## Modules
//!
//! - [`archive`]: catalog, filesystem scanner, sparse index, service loop
//! - [`query`]: streaming range-query and statistics engines
//! - [`session`]: continuous-pull session manager
//! - [`mrt`]: MRT framing and the BGP UPDATE subset the stats need
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bgpvault::api::{serve, AppState};
//! use bgpvault::archive::spawn_archive;
//! use bgpvault::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(std::path::Path::new("bgpvault.toml"))?;
//!
//!     let mut state = AppState::new();
//!     let mut tasks = Vec::new();
//!     for archive_config in config.archive.clone() {
//!         let (handle, task) = spawn_archive(archive_config);
//!         state.register(handle);
//!         tasks.push(task);
//!     }
//!
//!     serve(state, &config.server).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod archive;
pub mod config;
pub mod mrt;
pub mod query;
pub mod session;

// Re-export top-level types for convenience
pub use archive::{
    generate_index, spawn_archive, ArchEntry, ArchiveCommand, ArchiveError, ArchiveHandle,
    ArchiveResult, Catalog, EntryOffset, ItemOffset, Scanner,
};

pub use query::{spawn_raw_query, spawn_stats_query, BgpStats, Reply};

pub use session::{Session, SessionHandle, SessionManager};

pub use mrt::{open_record_reader, CommonHeader, MrtError, RawRecord, RecordReader};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{ArchiveConfig, Config, ConfigError, LoggingConfig, ServerConfig};
