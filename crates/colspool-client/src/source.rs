//! Collaborator traits for connections and cursors
//!
//! The pipeline consumes these interfaces only; driver adapters (and test
//! doubles) implement them. Connection and cursor handles are not thread
//! safe and are touched only by the foreground context; the conversion
//! worker never sees them.

use colspool_common::Result;

use crate::types::{RowBatch, ScalarValue};

/// Name and native type code of one result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_code: i32,
}

/// A database connection owned by the foreground context
pub trait SqlConnection: Send {
    /// Open a cursor, running `preamble` first (or the driver's default
    /// preamble when `None`)
    fn open_cursor(&mut self, preamble: Option<&str>) -> Result<Box<dyn SqlCursor + '_>>;

    /// Run a fire-and-forget statement outside the cursor pipeline,
    /// returning the affected row count
    fn execute_statement(&mut self, query: &str, params: &[ScalarValue]) -> Result<u64>;

    /// Roll back any pending transaction state. Best-effort on cleanup
    /// paths; failures there are logged, never propagated over the
    /// original error.
    fn rollback(&mut self) -> Result<()>;

    /// Commit pending statements (used by the execute path)
    fn commit(&mut self) -> Result<()>;

    /// Close the connection. Never called on caller-supplied connections.
    fn close(&mut self) -> Result<()>;
}

/// A server-side (or emulated) cursor bound to one query execution
pub trait SqlCursor {
    /// Execute the query with bound parameters
    fn execute(&mut self, query: &str, params: &[ScalarValue]) -> Result<()>;

    /// Fetch up to `max_rows` rows. An empty batch signals exhaustion.
    fn fetch_batch(&mut self, max_rows: usize) -> Result<RowBatch>;

    /// Column metadata for the executed query. Available even when the
    /// result has zero rows; the empty-result fallback depends on it.
    fn column_metadata(&self) -> Result<Vec<ColumnMeta>>;

    /// Close the cursor, releasing any server-side state
    fn close(&mut self) -> Result<()>;
}
