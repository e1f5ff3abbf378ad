//! Block concatenation into the final column set
//!
//! Blocks arrive in submission order; concatenation preserves original row
//! order. A zero-row result falls back to zero-length float64 arrays under
//! the inferred column names, preserved from the original system.

use colspool_common::{ColspoolError, Result};

use crate::types::{Column, ColumnData, ColumnSet, Schema, TypedBlock};

/// Concatenate converted blocks into the final result
pub(crate) fn assemble(schema: &Schema, blocks: Vec<TypedBlock>) -> Result<ColumnSet> {
    let mut iter = blocks.into_iter();
    let first = match iter.next() {
        Some(block) => block,
        None => return Ok(empty_fallback(schema)),
    };

    if first.columns.len() != schema.len() {
        return Err(ColspoolError::Internal(
            "typed block width disagrees with schema".into(),
        ));
    }
    let mut rows = first.rows;
    let mut columns = first.columns;

    for block in iter {
        if block.columns.len() != schema.len() {
            return Err(ColspoolError::Internal(
                "typed block width disagrees with schema".into(),
            ));
        }
        rows += block.rows;
        for (dst, src) in columns.iter_mut().zip(block.columns) {
            if !dst.append(src) {
                return Err(ColspoolError::Internal(
                    "typed block variant mismatch during assembly".into(),
                ));
            }
        }
    }

    for (column, desc) in columns.iter().zip(&schema.columns) {
        if column.len() != rows {
            return Err(ColspoolError::Internal(format!(
                "column '{}' has {} values, expected {}",
                desc.name,
                column.len(),
                rows
            )));
        }
    }

    let columns = schema
        .columns
        .iter()
        .zip(columns)
        .map(|(desc, data)| Column { name: desc.name.clone(), data })
        .collect();
    Ok(ColumnSet { columns })
}

/// The zero-row result: correct column count and names, float64 arrays
fn empty_fallback(schema: &Schema) -> ColumnSet {
    ColumnSet {
        columns: schema
            .columns
            .iter()
            .map(|desc| Column {
                name: desc.name.clone(),
                data: ColumnData::Float64(Vec::new()),
            })
            .collect(),
    }
}
