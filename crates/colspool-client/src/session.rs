//! Query session lifecycle
//!
//! `QuerySession` wraps one query execution, guaranteeing cursor cleanup
//! and transaction rollback on every exit path and deciding whether the
//! connection itself may be closed. Read queries are rolled back on
//! completion (read-only by convention); fire-and-forget statements
//! commit. Caller-supplied connections are never closed, only rolled
//! back, and the caller retains ownership for chained queries.
//!
//! Cleanup on failure paths is best-effort: a rollback or close that also
//! fails is logged and swallowed so it never masks the original error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use colspool_common::{ClientConfig, FetchConfig, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assemble::assemble;
use crate::pg;
use crate::pipeline::stream_blocks;
use crate::source::{SqlConnection, SqlCursor};
use crate::typemap::infer_schema;
use crate::types::{ColumnSet, ScalarValue};

/// Lifecycle states of one query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CursorOpen,
    Fetching,
    Success,
    Failed,
    Closed,
}

/// One query execution against a connection, with guaranteed cleanup
pub struct QuerySession<'c> {
    conn: &'c mut dyn SqlConnection,
    caller_supplied: bool,
    state: SessionState,
    query_id: Uuid,
}

impl<'c> QuerySession<'c> {
    pub fn new(conn: &'c mut dyn SqlConnection, caller_supplied: bool) -> Self {
        Self {
            conn,
            caller_supplied,
            state: SessionState::Idle,
            query_id: Uuid::new_v4(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the query through the fetch/convert/assemble pipeline and
    /// materialize the full result
    pub fn fetch_all(
        &mut self,
        query: &str,
        params: &[ScalarValue],
        cfg: &FetchConfig,
    ) -> Result<ColumnSet> {
        let started = Instant::now();
        let outcome = self.run_pipeline(query, params, cfg);

        match outcome {
            Ok(set) => {
                self.state = SessionState::Success;
                // read queries are read-only by convention
                self.conn.rollback()?;
                if !self.caller_supplied {
                    self.conn.close()?;
                }
                self.state = SessionState::Closed;
                info!(
                    query_id = %self.query_id,
                    rows = set.num_rows(),
                    columns = set.num_columns(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query materialized"
                );
                Ok(set)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                if let Err(re) = self.conn.rollback() {
                    warn!(query_id = %self.query_id, error = %re, "rollback after failure also failed");
                }
                if !self.caller_supplied {
                    if let Err(ce) = self.conn.close() {
                        warn!(query_id = %self.query_id, error = %ce, "connection close after failure failed");
                    }
                }
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    fn run_pipeline(
        &mut self,
        query: &str,
        params: &[ScalarValue],
        cfg: &FetchConfig,
    ) -> Result<ColumnSet> {
        // per-invocation cancellation flag and channels; never shared
        // across invocations
        let cancel = Arc::new(AtomicBool::new(false));

        let mut cursor = self.conn.open_cursor(cfg.preamble.as_deref())?;
        self.state = SessionState::CursorOpen;
        debug!(query_id = %self.query_id, "cursor open");

        self.state = SessionState::Fetching;
        let result = drive(cursor.as_mut(), query, params, cfg, &cancel);

        match result {
            Ok(set) => {
                cursor.close()?;
                Ok(set)
            }
            Err(e) => {
                cancel.store(true, Ordering::Release);
                if let Err(ce) = cursor.close() {
                    warn!(query_id = %self.query_id, error = %ce, "cursor close after failure failed");
                }
                Err(e)
            }
        }
    }

    /// Run a fire-and-forget statement: no result materialization,
    /// commit on success
    pub fn execute(&mut self, query: &str, params: &[ScalarValue]) -> Result<u64> {
        match self.conn.execute_statement(query, params) {
            Ok(affected) => {
                self.state = SessionState::Success;
                self.conn.commit()?;
                if !self.caller_supplied {
                    self.conn.close()?;
                }
                self.state = SessionState::Closed;
                debug!(query_id = %self.query_id, affected, "statement executed");
                Ok(affected)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                if let Err(re) = self.conn.rollback() {
                    warn!(query_id = %self.query_id, error = %re, "rollback after failure also failed");
                }
                if !self.caller_supplied {
                    if let Err(ce) = self.conn.close() {
                        warn!(query_id = %self.query_id, error = %ce, "connection close after failure failed");
                    }
                }
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }
}

/// Execute, infer, stream, assemble: the cursor-side half of a session
fn drive(
    cursor: &mut dyn SqlCursor,
    query: &str,
    params: &[ScalarValue],
    cfg: &FetchConfig,
    cancel: &Arc<AtomicBool>,
) -> Result<ColumnSet> {
    cursor.execute(query, params)?;
    // metadata is available even for zero rows; the unknown-code check
    // runs here, before any conversion work
    let meta = cursor.column_metadata()?;
    let schema = infer_schema(&meta, cfg)?;
    let blocks = stream_blocks(cursor, &schema, cfg, cancel)?;
    assemble(&schema, blocks)
}

/// Execute a query on a fresh connection and materialize the result.
///
/// The connection is opened from `cfg.connect`, used for this query only
/// and closed afterwards.
pub fn get(query: &str, params: &[ScalarValue], cfg: &ClientConfig) -> Result<ColumnSet> {
    let mut conn = pg::connect(&cfg.connect)?;
    QuerySession::new(&mut conn, false).fetch_all(query, params, &cfg.fetch)
}

/// Execute a query on a caller-supplied connection.
///
/// The connection is rolled back but never closed; the caller retains
/// ownership and can chain further queries on it.
pub fn get_with(
    conn: &mut dyn SqlConnection,
    query: &str,
    params: &[ScalarValue],
    cfg: &FetchConfig,
) -> Result<ColumnSet> {
    QuerySession::new(conn, true).fetch_all(query, params, cfg)
}

/// Run a statement with no result materialization on a fresh connection
pub fn execute(query: &str, params: &[ScalarValue], cfg: &ClientConfig) -> Result<u64> {
    let mut conn = pg::connect(&cfg.connect)?;
    QuerySession::new(&mut conn, false).execute(query, params)
}

/// Run a statement with no result materialization on a caller-supplied
/// connection
pub fn execute_with(
    conn: &mut dyn SqlConnection,
    query: &str,
    params: &[ScalarValue],
) -> Result<u64> {
    QuerySession::new(conn, true).execute(query, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockConnection;
    use crate::typemap::{PG_FLOAT8, PG_INT4, PG_VARCHAR};
    use std::time::Duration;

    fn float_batches(sizes: &[usize]) -> Vec<Vec<Vec<ScalarValue>>> {
        let mut next = 0usize;
        sizes
            .iter()
            .map(|n| {
                (0..*n)
                    .map(|_| {
                        let row = vec![
                            ScalarValue::F64(next as f64 * 0.5),
                            ScalarValue::F64(next as f64 * -0.5),
                        ];
                        next += 1;
                        row
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_materializes_across_batches() {
        // 250k rows, two float64 columns, fetched in 100k batches
        let mut conn = MockConnection::new(
            vec![("ra", PG_FLOAT8), ("dec", PG_FLOAT8)],
            float_batches(&[100_000, 100_000, 50_000]),
        );
        let cfg = FetchConfig { poll_interval_ms: 5, ..Default::default() };

        let set = get_with(&mut conn, "select ra,dec from t", &[], &cfg).unwrap();
        assert_eq!(set.num_columns(), 2);
        assert_eq!(set.num_rows(), 250_000);
        let ra = set.column("ra").unwrap().data.as_f64().unwrap();
        let dec = set.column("dec").unwrap().data.as_f64().unwrap();
        assert_eq!(ra.len(), 250_000);
        assert_eq!(ra[0], 0.0);
        assert_eq!(ra[249_999], 249_999.0 * 0.5);
        assert_eq!(dec[249_999], 249_999.0 * -0.5);
    }

    #[test]
    fn test_zero_rows_yields_typed_empty_result() {
        let mut conn = MockConnection::new(vec![("ra", PG_FLOAT8), ("dec", PG_FLOAT8)], vec![]);
        let cfg = FetchConfig { poll_interval_ms: 5, ..Default::default() };

        let set = get_with(&mut conn, "select ra,dec from t where 1=0", &[], &cfg).unwrap();
        assert_eq!(set.num_columns(), 2);
        assert_eq!(set.num_rows(), 0);
        assert_eq!(set.columns[0].name, "ra");
        assert_eq!(set.columns[0].data.as_f64().unwrap().len(), 0);
        assert_eq!(set.columns[1].data.as_f64().unwrap().len(), 0);
    }

    #[test]
    fn test_order_preserved_across_batch_split() {
        let batches: Vec<Vec<Vec<ScalarValue>>> = vec![
            (0..3).map(|n| vec![ScalarValue::I32(n)]).collect(),
            (3..8).map(|n| vec![ScalarValue::I32(n)]).collect(),
            (8..10).map(|n| vec![ScalarValue::I32(n)]).collect(),
        ];
        let mut conn = MockConnection::new(vec![("n", PG_INT4)], batches);
        let cfg = FetchConfig { poll_interval_ms: 5, ..Default::default() };

        let set = get_with(&mut conn, "select n from t", &[], &cfg).unwrap();
        assert_eq!(
            set.column("n").unwrap().data.as_i32().unwrap(),
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]
        );
    }

    #[test]
    fn test_caller_supplied_connection_never_closed() {
        let mut conn = MockConnection::new(vec![("n", PG_INT4)], vec![vec![vec![ScalarValue::I32(1)]]]);
        let cfg = FetchConfig { poll_interval_ms: 5, ..Default::default() };
        let log = Arc::clone(&conn.log);

        get_with(&mut conn, "select n from t", &[], &cfg).unwrap();
        assert_eq!(log.rollbacks(), 1);
        assert_eq!(log.conn_closes(), 0);
        assert_eq!(log.cursor_closes(), 1);

        // and on the failure path
        let mut conn = MockConnection::new(vec![("n", PG_INT4)], vec![]).fail_fetch_at(1);
        let log = Arc::clone(&conn.log);
        assert!(get_with(&mut conn, "select n from t", &[], &cfg).is_err());
        assert_eq!(log.rollbacks(), 1);
        assert_eq!(log.conn_closes(), 0);
        assert_eq!(log.cursor_closes(), 1);
    }

    #[test]
    fn test_conversion_failure_cleanup_runs_once() {
        let bad = vec![
            vec![ScalarValue::I32(1)],
            vec![ScalarValue::Text("boom".into())],
        ];
        let mut conn = MockConnection::new(
            vec![("n", PG_INT4)],
            vec![vec![vec![ScalarValue::I32(0)]], bad, vec![vec![ScalarValue::I32(9)]]],
        )
        .fetch_delay(Duration::from_millis(30));
        let cfg = FetchConfig { poll_interval_ms: 5, join_grace_ms: 500, ..Default::default() };
        let log = Arc::clone(&conn.log);

        let err = get_with(&mut conn, "select n from t", &[], &cfg).unwrap_err();
        assert_eq!(err.code(), "CONVERSION_FAILED");
        assert_eq!(log.cursor_closes(), 1);
        assert_eq!(log.rollbacks(), 1);
        assert_eq!(log.conn_closes(), 0);
    }

    #[test]
    fn test_unknown_type_aborts_before_fetching() {
        let mut conn = MockConnection::new(
            vec![("n", PG_INT4), ("ts", 1184)],
            vec![vec![vec![ScalarValue::I32(1), ScalarValue::I64(2)]]],
        );
        let cfg = FetchConfig { poll_interval_ms: 5, ..Default::default() };
        let log = Arc::clone(&conn.log);

        let err = get_with(&mut conn, "select n,ts from t", &[], &cfg).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_TYPE");
        assert_eq!(log.fetches(), 0);
        assert_eq!(log.cursor_closes(), 1);
        assert_eq!(log.rollbacks(), 1);
    }

    #[test]
    fn test_text_truncation_end_to_end() {
        let names = ["first-very-long-name", "second-very-long-name", "x"];
        let batches = vec![names
            .iter()
            .map(|n| vec![ScalarValue::Text(n.to_string())])
            .collect()];
        let mut conn = MockConnection::new(vec![("name", PG_VARCHAR)], batches);
        let cfg = FetchConfig { poll_interval_ms: 5, str_length: 10, ..Default::default() };

        let set = get_with(&mut conn, "select name from t", &[], &cfg).unwrap();
        assert_eq!(
            set.column("name").unwrap().data.as_text().unwrap(),
            &["first-very", "second-ver", "x"]
        );
    }

    #[test]
    fn test_mask_null_yields_nan_floats() {
        let batches = vec![vec![
            vec![ScalarValue::I32(5)],
            vec![ScalarValue::Null],
        ]];
        let mut conn = MockConnection::new(vec![("n", PG_INT4)], batches);
        let cfg = FetchConfig { poll_interval_ms: 5, mask_null: true, ..Default::default() };

        let set = get_with(&mut conn, "select n from t", &[], &cfg).unwrap();
        let values = set.column("n").unwrap().data.as_f64().unwrap();
        assert_eq!(values[0], 5.0);
        assert!(values[1].is_nan());
    }

    #[test]
    fn test_execute_commits_and_respects_ownership() {
        let mut conn = MockConnection::new(vec![], vec![]);
        let log = Arc::clone(&conn.log);
        execute_with(&mut conn, "delete from t", &[]).unwrap();
        assert_eq!(log.commits(), 1);
        assert_eq!(log.rollbacks(), 0);
        assert_eq!(log.conn_closes(), 0);

        let mut conn = MockConnection::new(vec![], vec![]).fail_execute();
        let log = Arc::clone(&conn.log);
        assert!(execute_with(&mut conn, "delete from t", &[]).is_err());
        assert_eq!(log.commits(), 0);
        assert_eq!(log.rollbacks(), 1);
        assert_eq!(log.conn_closes(), 0);
    }

    #[test]
    fn test_session_state_transitions() {
        let mut conn = MockConnection::new(vec![("n", PG_INT4)], vec![vec![vec![ScalarValue::I32(1)]]]);
        let cfg = FetchConfig { poll_interval_ms: 5, ..Default::default() };
        let mut session = QuerySession::new(&mut conn, true);
        assert_eq!(session.state(), SessionState::Idle);
        session.fetch_all("select n from t", &[], &cfg).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
