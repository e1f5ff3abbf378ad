//! Fetch loop and conversion worker orchestration
//!
//! One foreground fetch context and exactly one background conversion
//! thread per query execution. The input channel has capacity 1, the
//! backpressure valve: fetching runs at most one batch ahead of
//! conversion, bounding peak memory to two in-flight batches. The output
//! channel is unbounded but drained opportunistically after every push so
//! it stays shallow. Blocks come out in submission order (single producer,
//! single consumer, FIFO channels).
//!
//! Cancellation is cooperative: the flag is polled, never preemptive. The
//! worker is only ever asked to stop; if it fails to stop within the grace
//! period it is reported as a leaked thread and detached, never killed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use colspool_common::{ColspoolError, FetchConfig, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::convert::convert_loop;
use crate::source::SqlCursor;
use crate::types::{RowBatch, Schema, TypedBlock};

/// Handle to the background conversion thread
pub(crate) struct ConvertWorker {
    input: Sender<RowBatch>,
    output: Receiver<TypedBlock>,
    done: Receiver<Result<()>>,
    cancel: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    grace: Duration,
    poll: Duration,
    submitted: usize,
    drained: usize,
}

impl ConvertWorker {
    /// Spawn the worker for one query execution
    pub(crate) fn spawn(
        schema: Schema,
        cfg: &FetchConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (input, batch_rx) = bounded::<RowBatch>(1);
        let (block_tx, output) = unbounded::<TypedBlock>();
        let (done_tx, done) = bounded::<Result<()>>(1);
        let poll = cfg.poll_interval();
        let worker_cancel = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("colspool-convert".into())
            .spawn(move || {
                let result = convert_loop(&schema, batch_rx, block_tx, &worker_cancel, poll);
                if result.is_err() {
                    // a conversion failure terminates the whole pipeline
                    worker_cancel.store(true, Ordering::Release);
                }
                let _ = done_tx.send(result);
            })
            .map_err(|e| ColspoolError::Internal(format!("failed to spawn converter: {}", e)))?;

        Ok(Self {
            input,
            output,
            done,
            cancel,
            handle: Some(handle),
            grace: cfg.join_grace(),
            poll,
            submitted: 0,
            drained: 0,
        })
    }

    /// Push one batch, blocking while the worker is a full batch behind.
    /// A send failure means the worker terminated early; its reported
    /// error is the root cause.
    pub(crate) fn submit(&mut self, batch: RowBatch) -> Result<()> {
        match self.input.send(batch) {
            Ok(()) => {
                self.submitted += 1;
                Ok(())
            }
            Err(_) => Err(self.failure()),
        }
    }

    /// Non-blocking drain of one completed block
    pub(crate) fn try_drain(&mut self) -> Option<TypedBlock> {
        match self.output.try_recv() {
            Ok(block) => {
                self.drained += 1;
                Some(block)
            }
            Err(_) => None,
        }
    }

    fn pending(&self) -> usize {
        self.submitted - self.drained
    }

    /// Final drain after cursor exhaustion: wait for every outstanding
    /// block, then signal cancellation and wait out the worker.
    pub(crate) fn finish(mut self, blocks: &mut Vec<TypedBlock>) -> Result<()> {
        while self.pending() > 0 {
            match self.output.recv_timeout(self.poll) {
                Ok(block) => {
                    self.drained += 1;
                    blocks.push(block);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.load(Ordering::Acquire) {
                        return Err(self.failure());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.failure()),
            }
        }

        self.cancel.store(true, Ordering::Release);
        drop(self.input);
        match self.done.recv_timeout(self.grace) {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                result
            }
            Err(_) => {
                warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "conversion worker did not stop within the grace period; detaching thread"
                );
                Ok(())
            }
        }
    }

    /// Tear down after a fetch-side failure: signal cancellation, wait out
    /// the worker, report a leak if it does not stop in time.
    pub(crate) fn abort(mut self) {
        self.cancel.store(true, Ordering::Release);
        drop(self.input);
        match self.done.recv_timeout(self.grace) {
            Ok(_) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => {
                warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "conversion worker did not stop within the grace period after cancellation; detaching thread"
                );
            }
        }
    }

    /// Retrieve the terminated worker's reported error
    fn failure(&mut self) -> ColspoolError {
        self.cancel.store(true, Ordering::Release);
        match self.done.recv_timeout(self.grace) {
            Ok(Err(e)) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                e
            }
            Ok(Ok(())) => {
                ColspoolError::Internal("conversion worker exited without reporting an error".into())
            }
            Err(_) => {
                warn!("conversion worker unresponsive after failure; detaching thread");
                ColspoolError::Internal("conversion worker unresponsive after failure".into())
            }
        }
    }
}

/// Drive the cursor to exhaustion, overlapping fetch and conversion.
///
/// The worker starts lazily on the first non-empty batch; a zero-row
/// result never spawns it. Every fetch is preceded by a cancellation
/// check, and every error path signals cancellation before returning.
pub(crate) fn stream_blocks(
    cursor: &mut dyn SqlCursor,
    schema: &Schema,
    cfg: &FetchConfig,
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<TypedBlock>> {
    let mut worker: Option<ConvertWorker> = None;
    let mut blocks = Vec::new();
    let mut batches = 0usize;
    let mut total_rows = 0usize;

    loop {
        if cancel.load(Ordering::Acquire) {
            // only the worker sets the flag while fetching is under way
            return Err(match worker {
                Some(mut w) => w.failure(),
                None => ColspoolError::Internal("pipeline cancelled before any batch".into()),
            });
        }

        let batch = match cursor.fetch_batch(cfg.batch_rows) {
            Ok(batch) => batch,
            Err(e) => {
                cancel.store(true, Ordering::Release);
                if let Some(w) = worker {
                    w.abort();
                }
                return Err(e);
            }
        };
        if batch.is_empty() {
            break;
        }
        batches += 1;
        total_rows += batch.len();

        if worker.is_none() {
            worker = Some(ConvertWorker::spawn(schema.clone(), cfg, Arc::clone(cancel))?);
        }
        if let Some(w) = worker.as_mut() {
            w.submit(batch)?;
            // overlap step: move finished blocks out while the cursor works
            while let Some(block) = w.try_drain() {
                blocks.push(block);
            }
        }
        debug!(batches, total_rows, "batch submitted");
    }

    if let Some(w) = worker {
        w.finish(&mut blocks)?;
    }
    debug!(batches, rows = total_rows, blocks = blocks.len(), "fetch exhausted");
    Ok(blocks)
}
