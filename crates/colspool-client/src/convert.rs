//! Row-to-column conversion and the background worker loop
//!
//! This is the only stage that performs the row-major to column-major
//! transposition, keeping the CPU-bound work off the I/O-bound fetch loop.
//! The worker polls its bounded input channel with a short timeout and
//! terminates when the cancellation flag is set and the channel is empty.
//! A coercion failure is fatal: the worker sets the cancellation flag
//! itself, reports the error through its completion channel and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colspool_common::{ColspoolError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::types::{ColumnData, ColumnDescriptor, RowBatch, ScalarValue, Schema, SemanticType, TypedBlock};

/// Convert one batch into a typed block under `schema`.
///
/// A row whose width differs from the schema is a `SchemaMismatch`; a value
/// that cannot be coerced to its column's type is a `Conversion` error.
pub(crate) fn convert_batch(schema: &Schema, batch: RowBatch) -> Result<TypedBlock> {
    let rows = batch.len();
    let mut columns: Vec<ColumnData> = schema
        .columns
        .iter()
        .map(|d| d.ty.new_column(rows))
        .collect();

    for row in batch.rows {
        if row.len() != schema.len() {
            return Err(ColspoolError::SchemaMismatch(format!(
                "row has {} values but the inferred schema has {} columns",
                row.len(),
                schema.len()
            )));
        }
        for ((column, value), desc) in columns.iter_mut().zip(row).zip(&schema.columns) {
            coerce_push(column, value, desc)?;
        }
    }

    Ok(TypedBlock { columns, rows })
}

/// Append one scalar to its typed column, coercing where allowed.
///
/// Integer widening is accepted; float64 accepts every numeric; NULL
/// becomes NaN in float columns and the empty string in text columns, and
/// is an error in bool/integer columns (widen with mask_null instead).
fn coerce_push(column: &mut ColumnData, value: ScalarValue, desc: &ColumnDescriptor) -> Result<()> {
    match (column, value) {
        (ColumnData::Bool(out), ScalarValue::Bool(v)) => out.push(v),

        (ColumnData::Int8(out), ScalarValue::I8(v)) => out.push(v),

        (ColumnData::Int16(out), ScalarValue::I16(v)) => out.push(v),
        (ColumnData::Int16(out), ScalarValue::I8(v)) => out.push(v as i16),

        (ColumnData::Int32(out), ScalarValue::I32(v)) => out.push(v),
        (ColumnData::Int32(out), ScalarValue::I16(v)) => out.push(v as i32),
        (ColumnData::Int32(out), ScalarValue::I8(v)) => out.push(v as i32),

        (ColumnData::Int64(out), ScalarValue::I64(v)) => out.push(v),
        (ColumnData::Int64(out), ScalarValue::I32(v)) => out.push(v as i64),
        (ColumnData::Int64(out), ScalarValue::I16(v)) => out.push(v as i64),
        (ColumnData::Int64(out), ScalarValue::I8(v)) => out.push(v as i64),

        (ColumnData::Float32(out), ScalarValue::F32(v)) => out.push(v),
        (ColumnData::Float32(out), ScalarValue::Null) => out.push(f32::NAN),

        (ColumnData::Float64(out), ScalarValue::F64(v)) => out.push(v),
        (ColumnData::Float64(out), ScalarValue::F32(v)) => out.push(v as f64),
        (ColumnData::Float64(out), ScalarValue::I64(v)) => out.push(v as f64),
        (ColumnData::Float64(out), ScalarValue::I32(v)) => out.push(v as f64),
        (ColumnData::Float64(out), ScalarValue::I16(v)) => out.push(v as f64),
        (ColumnData::Float64(out), ScalarValue::I8(v)) => out.push(v as f64),
        (ColumnData::Float64(out), ScalarValue::Bool(v)) => out.push(if v { 1.0 } else { 0.0 }),
        (ColumnData::Float64(out), ScalarValue::Null) => out.push(f64::NAN),

        (ColumnData::Text(out), ScalarValue::Text(v)) => {
            let max = match desc.ty {
                SemanticType::Text(n) => n,
                _ => usize::MAX,
            };
            out.push(truncate_chars(v, max));
        }
        (ColumnData::Text(out), ScalarValue::Null) => out.push(String::new()),

        (_, value) => {
            return Err(ColspoolError::Conversion(format!(
                "column '{}' ({}) cannot hold a {} value",
                desc.name,
                desc.ty,
                value.kind()
            )));
        }
    }
    Ok(())
}

/// Truncate to at most `max` characters, on a character boundary
fn truncate_chars(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
    s
}

/// Worker loop: drain the bounded input channel, convert, push blocks.
///
/// Terminates when the cancellation flag is observed set while the input
/// channel is empty, or when the input side disconnects. Cancellation is
/// cooperative: a mid-conversion batch is always finished first.
pub(crate) fn convert_loop(
    schema: &Schema,
    input: Receiver<RowBatch>,
    output: Sender<TypedBlock>,
    cancel: &AtomicBool,
    poll: Duration,
) -> Result<()> {
    loop {
        match input.recv_timeout(poll) {
            Ok(batch) => {
                let block = convert_batch(schema, batch)?;
                if output.send(block).is_err() {
                    // receiver gone; nothing left to convert for
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if cancel.load(Ordering::Acquire) && input.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}
