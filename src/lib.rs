//! # gridrun - Batch Data-Grid Executor
//!
//! Drives a remote data-grid storage service (a hierarchical namespace of
//! collections and data objects carrying attribute/value/units metadata and
//! per-user access controls) from a stream of JSON request envelopes.
//! Requests are read from stdin, dispatched over a single logical
//! connection, and answered with one JSON response per request on stdout.
//!
//! ## Features
//!
//! - **Streaming**: requests are processed as they arrive; an upstream
//!   producer can feed the loop indefinitely
//! - **Per-item errors**: a failing request annotates its own envelope and
//!   never aborts the stream
//! - **Catalog search**: structured metadata queries with typed columns,
//!   subtree restriction, and zone qualifiers
//! - **Connection recycling**: long-lived feeds periodically reopen the
//!   backend connection
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::Cursor;
//! use std::time::Duration;
//!
//! use gridrun::config::GridEnv;
//! use gridrun::ops::OpArgs;
//! use gridrun::stream::{run_stream, StreamOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let env = GridEnv::load();
//! let options = StreamOptions {
//!     defaults: OpArgs {
//!         buffer_size: gridrun::DEFAULT_BUFFER_SIZE,
//!         ..OpArgs::default()
//!     },
//!     max_connect_time: gridrun::DEFAULT_MAX_CONNECT_TIME,
//!     connect_timeout: Duration::from_secs(10),
//! };
//!
//! let input = r#"{"operation":"list","target":{"collection":"/zone/a"}}"#;
//! let mut output = Vec::new();
//! let errors = run_stream(Cursor::new(input.as_bytes()), &mut output, &env, &options)?;
//! assert_eq!(errors, 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod flags;
pub mod grid;
pub mod ops;
pub mod path;
pub mod query;
pub mod stream;

pub use config::GridEnv;
pub use envelope::{Access, AccessLevel, Avu, Target, TargetPath};
pub use error::GridError;
pub use flags::OptionFlags;
pub use grid::{Connection, ObjectKind};
pub use ops::OpArgs;
pub use query::{Column, Operator, Query};
pub use stream::{run_stream, StreamOptions};

/// Default transfer buffer size for object reads and writes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Lower bound on the transfer buffer; tiny buffers make every transfer a
/// packet storm.
pub const MIN_BUFFER_SIZE: usize = 4096;

/// Default seconds a connection may stay open before it is recycled.
pub const DEFAULT_MAX_CONNECT_TIME: u64 = 600;
