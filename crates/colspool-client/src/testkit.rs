//! Scripted connection and cursor doubles for pipeline and session tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colspool_common::{ColspoolError, Result};

use crate::source::{ColumnMeta, SqlConnection, SqlCursor};
use crate::types::{RowBatch, ScalarValue};

/// Call counters shared between a mock and the test body
#[derive(Debug, Default)]
pub(crate) struct CallLog {
    fetches: AtomicUsize,
    executes: AtomicUsize,
    cursor_closes: AtomicUsize,
    rollbacks: AtomicUsize,
    commits: AtomicUsize,
    conn_closes: AtomicUsize,
}

impl CallLog {
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
    pub(crate) fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }
    pub(crate) fn cursor_closes(&self) -> usize {
        self.cursor_closes.load(Ordering::SeqCst)
    }
    pub(crate) fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
    pub(crate) fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
    pub(crate) fn conn_closes(&self) -> usize {
        self.conn_closes.load(Ordering::SeqCst)
    }
}

/// Cursor double replaying scripted batches
pub(crate) struct MockCursor {
    pub(crate) log: Arc<CallLog>,
    meta: Vec<ColumnMeta>,
    batches: VecDeque<Vec<Vec<ScalarValue>>>,
    fetch_delay: Duration,
    fail_fetch_at: Option<usize>,
}

impl MockCursor {
    pub(crate) fn new(meta: Vec<(&str, i32)>, batches: Vec<Vec<Vec<ScalarValue>>>) -> Self {
        Self {
            log: Arc::new(CallLog::default()),
            meta: meta
                .into_iter()
                .map(|(name, type_code)| ColumnMeta { name: name.to_string(), type_code })
                .collect(),
            batches: batches.into(),
            fetch_delay: Duration::ZERO,
            fail_fetch_at: None,
        }
    }

    /// Sleep this long at the start of every fetch call
    pub(crate) fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Fail the n-th fetch call (1-based)
    pub(crate) fn fail_fetch_at(mut self, call: usize) -> Self {
        self.fail_fetch_at = Some(call);
        self
    }
}

impl SqlCursor for MockCursor {
    fn execute(&mut self, _query: &str, _params: &[ScalarValue]) -> Result<()> {
        self.log.executes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fetch_batch(&mut self, _max_rows: usize) -> Result<RowBatch> {
        if !self.fetch_delay.is_zero() {
            std::thread::sleep(self.fetch_delay);
        }
        let call = self.log.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fetch_at == Some(call) {
            return Err(ColspoolError::Fetch("injected fetch failure".into()));
        }
        Ok(RowBatch::new(self.batches.pop_front().unwrap_or_default()))
    }

    fn column_metadata(&self) -> Result<Vec<ColumnMeta>> {
        Ok(self.meta.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.log.cursor_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection double handing out one scripted cursor
pub(crate) struct MockConnection {
    pub(crate) log: Arc<CallLog>,
    meta: Vec<ColumnMeta>,
    batches: Option<Vec<Vec<Vec<ScalarValue>>>>,
    fetch_delay: Duration,
    fail_fetch_at: Option<usize>,
    fail_execute: bool,
}

impl MockConnection {
    pub(crate) fn new(meta: Vec<(&str, i32)>, batches: Vec<Vec<Vec<ScalarValue>>>) -> Self {
        Self {
            log: Arc::new(CallLog::default()),
            meta: meta
                .into_iter()
                .map(|(name, type_code)| ColumnMeta { name: name.to_string(), type_code })
                .collect(),
            batches: Some(batches),
            fetch_delay: Duration::ZERO,
            fail_fetch_at: None,
            fail_execute: false,
        }
    }

    pub(crate) fn fail_fetch_at(mut self, call: usize) -> Self {
        self.fail_fetch_at = Some(call);
        self
    }

    pub(crate) fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub(crate) fn fail_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }
}

impl SqlConnection for MockConnection {
    fn open_cursor(&mut self, _preamble: Option<&str>) -> Result<Box<dyn SqlCursor + '_>> {
        Ok(Box::new(MockCursor {
            log: Arc::clone(&self.log),
            meta: self.meta.clone(),
            batches: self.batches.take().unwrap_or_default().into(),
            fetch_delay: self.fetch_delay,
            fail_fetch_at: self.fail_fetch_at,
        }))
    }

    fn execute_statement(&mut self, _query: &str, _params: &[ScalarValue]) -> Result<u64> {
        if self.fail_execute {
            return Err(ColspoolError::Driver("injected statement failure".into()));
        }
        self.log.executes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn rollback(&mut self) -> Result<()> {
        self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.conn_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
