//! Embedded DuckDB driver
//!
//! In-process analytical engine for local files and tests. There is no
//! server-side cursor here: the statement result is buffered eagerly at
//! execute time and replayed in `batch_rows` slices, so the same pipeline
//! runs downstream. Column type codes are derived from the result schema
//! and translated into the canonical code space.
//!
//! The engine autocommits; rollback and commit are no-ops.

use duckdb::arrow::array::{
    Array, ArrayRef, BooleanArray, Decimal128Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray,
};
use duckdb::arrow::datatypes::DataType;
use duckdb::types::{ToSqlOutput, Value};
use duckdb::{params_from_iter, Connection};
use tracing::debug;

use colspool_common::{ColspoolError, Result};

use crate::source::{ColumnMeta, SqlConnection, SqlCursor};
use crate::typemap;
use crate::types::{RowBatch, ScalarValue};

/// Open an in-memory database
pub fn open_memory() -> Result<DuckConnection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| ColspoolError::Driver(format!("open in-memory database failed: {}", e)))?;
    Ok(DuckConnection { conn: Some(conn) })
}

/// Open a database file
pub fn open(path: &str) -> Result<DuckConnection> {
    let conn = Connection::open(path)
        .map_err(|e| ColspoolError::Driver(format!("open '{}' failed: {}", path, e)))?;
    Ok(DuckConnection { conn: Some(conn) })
}

/// An embedded DuckDB connection
pub struct DuckConnection {
    conn: Option<Connection>,
}

impl DuckConnection {
    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| ColspoolError::Driver("connection already closed".into()))
    }
}

impl SqlConnection for DuckConnection {
    fn open_cursor(&mut self, preamble: Option<&str>) -> Result<Box<dyn SqlCursor + '_>> {
        let conn = self.conn()?;
        if let Some(sql) = preamble {
            conn.execute_batch(sql)
                .map_err(|e| ColspoolError::Driver(format!("preamble failed: {}", e)))?;
        }
        Ok(Box::new(DuckCursor { conn, buffered: Vec::new(), meta: None }))
    }

    fn execute_statement(&mut self, query: &str, params: &[ScalarValue]) -> Result<u64> {
        let affected = self
            .conn()?
            .execute(query, params_from_iter(params.iter()))
            .map_err(|e| ColspoolError::Driver(format!("statement failed: {}", e)))?;
        Ok(affected as u64)
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| ColspoolError::Driver(format!("close failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Cursor replaying an eagerly buffered result
pub struct DuckCursor<'a> {
    conn: &'a Connection,
    buffered: Vec<Vec<ScalarValue>>,
    meta: Option<Vec<ColumnMeta>>,
}

impl SqlCursor for DuckCursor<'_> {
    fn execute(&mut self, query: &str, params: &[ScalarValue]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare(query)
            .map_err(|e| ColspoolError::Driver(format!("prepare failed: {}", e)))?;
        let arrow_result = stmt
            .query_arrow(params_from_iter(params.iter()))
            .map_err(|e| ColspoolError::Driver(format!("query failed: {}", e)))?;

        // schema before consuming the iterator
        let schema = arrow_result.get_schema();
        let mut meta = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            meta.push(ColumnMeta {
                name: field.name().clone(),
                type_code: map_data_type(field.name(), field.data_type())?,
            });
        }

        let mut buffered = Vec::new();
        for batch in arrow_result {
            let columns = batch.columns();
            for row_idx in 0..batch.num_rows() {
                let mut row = Vec::with_capacity(columns.len());
                for (col, field) in columns.iter().zip(schema.fields()) {
                    row.push(arrow_cell(col, field.data_type(), row_idx)?);
                }
                buffered.push(row);
            }
        }
        debug!(rows = buffered.len(), columns = meta.len(), "result buffered");

        self.meta = Some(meta);
        self.buffered = buffered;
        Ok(())
    }

    fn fetch_batch(&mut self, max_rows: usize) -> Result<RowBatch> {
        if self.meta.is_none() {
            return Err(ColspoolError::Driver("cursor not executed".into()));
        }
        let take = max_rows.max(1).min(self.buffered.len());
        let rows: Vec<Vec<ScalarValue>> = self.buffered.drain(..take).collect();
        Ok(RowBatch::new(rows))
    }

    fn column_metadata(&self) -> Result<Vec<ColumnMeta>> {
        self.meta
            .clone()
            .ok_or_else(|| ColspoolError::Driver("cursor not executed".into()))
    }

    fn close(&mut self) -> Result<()> {
        self.buffered.clear();
        Ok(())
    }
}

/// Translate a result data type into the canonical code space.
/// 8-bit integers are promoted to the 16-bit code; the scalar values keep
/// their width and widen during conversion.
fn map_data_type(name: &str, dt: &DataType) -> Result<i32> {
    match dt {
        DataType::Boolean => Ok(typemap::PG_BOOL),
        DataType::Int8 | DataType::Int16 => Ok(typemap::PG_INT2),
        DataType::Int32 => Ok(typemap::PG_INT4),
        DataType::Int64 => Ok(typemap::PG_INT8),
        DataType::Float32 => Ok(typemap::PG_FLOAT4),
        DataType::Float64 => Ok(typemap::PG_FLOAT8),
        DataType::Utf8 | DataType::LargeUtf8 => Ok(typemap::PG_VARCHAR),
        DataType::Decimal128(_, _) => Ok(typemap::PG_NUMERIC),
        other => Err(ColspoolError::Driver(format!(
            "unsupported embedded column type {:?} for column '{}'",
            other, name
        ))),
    }
}

/// Extract one cell into the closed scalar set
fn arrow_cell(col: &ArrayRef, dt: &DataType, row_idx: usize) -> Result<ScalarValue> {
    if col.is_null(row_idx) {
        return Ok(ScalarValue::Null);
    }
    let mismatch = || ColspoolError::Internal("array type disagrees with schema".into());
    let value = match dt {
        DataType::Boolean => {
            ScalarValue::Bool(col.as_any().downcast_ref::<BooleanArray>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Int8 => {
            ScalarValue::I8(col.as_any().downcast_ref::<Int8Array>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Int16 => {
            ScalarValue::I16(col.as_any().downcast_ref::<Int16Array>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Int32 => {
            ScalarValue::I32(col.as_any().downcast_ref::<Int32Array>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Int64 => {
            ScalarValue::I64(col.as_any().downcast_ref::<Int64Array>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Float32 => {
            ScalarValue::F32(col.as_any().downcast_ref::<Float32Array>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Float64 => {
            ScalarValue::F64(col.as_any().downcast_ref::<Float64Array>().ok_or_else(mismatch)?.value(row_idx))
        }
        DataType::Utf8 => ScalarValue::Text(
            col.as_any().downcast_ref::<StringArray>().ok_or_else(mismatch)?.value(row_idx).to_string(),
        ),
        DataType::LargeUtf8 => ScalarValue::Text(
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .ok_or_else(mismatch)?
                .value(row_idx)
                .to_string(),
        ),
        DataType::Decimal128(_, scale) => {
            let raw = col
                .as_any()
                .downcast_ref::<Decimal128Array>()
                .ok_or_else(mismatch)?
                .value(row_idx);
            // same lossy narrowing as the server driver's NUMERIC path
            ScalarValue::F64(raw as f64 / 10f64.powi(*scale as i32))
        }
        other => {
            return Err(ColspoolError::Driver(format!(
                "unsupported embedded column type {:?}",
                other
            )))
        }
    };
    Ok(value)
}

impl duckdb::ToSql for ScalarValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(v) => Value::Boolean(*v),
            ScalarValue::I8(v) => Value::TinyInt(*v),
            ScalarValue::I16(v) => Value::SmallInt(*v),
            ScalarValue::I32(v) => Value::Int(*v),
            ScalarValue::I64(v) => Value::BigInt(*v),
            ScalarValue::F32(v) => Value::Float(*v),
            ScalarValue::F64(v) => Value::Double(*v),
            ScalarValue::Text(v) => Value::Text(v.clone()),
        }))
    }
}
