//! Colspool Client
//!
//! Streams result rows out of a SQL query and materializes them into
//! typed, columnar in-memory arrays, overlapping row fetching with type
//! conversion so large result sets do not block on conversion latency.
//!
//! ## Architecture
//!
//! ```text
//! Cursor --batches--> FetchLoop --qIn(1)--> ConversionWorker
//!                         |                       |
//!                         <------qOut (blocks)-----
//!                         v
//!                   ResultAssembler --> ColumnSet
//! ```
//!
//! The fetch loop runs at most one batch ahead of the conversion worker
//! (capacity-1 input channel), bounding peak memory to two in-flight
//! batches. Completed blocks are drained opportunistically between
//! fetches and concatenated in submission order once the cursor is
//! exhausted. A `QuerySession` guards the whole operation: cursor close
//! and rollback run on every exit path, and caller-supplied connections
//! are never closed.
//!
//! ```no_run
//! use colspool_client::{get, ClientConfig};
//!
//! let cfg = ClientConfig::default();
//! let result = get("select ra, dec from rc3", &[], &cfg)?;
//! let ra = result.column("ra").unwrap().data.as_f64().unwrap();
//! # Ok::<(), colspool_client::ColspoolError>(())
//! ```

mod assemble;
mod convert;
#[cfg(feature = "embedded")]
pub mod embedded;
pub mod pg;
mod pipeline;
pub mod session;
pub mod source;
#[cfg(test)]
pub(crate) mod testkit;
pub mod typemap;
pub mod types;

// Re-export commonly used types
pub use colspool_common::{ClientConfig, ColspoolError, ConnectConfig, FetchConfig, Result};
pub use session::{execute, execute_with, get, get_with, QuerySession, SessionState};
pub use source::{ColumnMeta, SqlConnection, SqlCursor};
pub use typemap::map_type_code;
pub use types::{Column, ColumnData, ColumnDescriptor, ColumnSet, RowBatch, ScalarValue, Schema, SemanticType};
