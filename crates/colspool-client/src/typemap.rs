//! Native type code to semantic type mapping and schema inference
//!
//! The canonical code space is PostgreSQL type OIDs; the embedded driver
//! translates its value types into the same space. An unmapped code aborts
//! the whole operation before any conversion work, since a guessed type
//! would corrupt the columnar layout downstream.

use colspool_common::{ColspoolError, FetchConfig, Result};

use crate::source::ColumnMeta;
use crate::types::{ColumnDescriptor, Schema, SemanticType};

pub const PG_BOOL: i32 = 16;
pub const PG_CHAR: i32 = 18;
pub const PG_INT8: i32 = 20;
pub const PG_INT2: i32 = 21;
pub const PG_INT4: i32 = 23;
pub const PG_TEXT: i32 = 25;
pub const PG_OID: i32 = 26;
pub const PG_FLOAT4: i32 = 700;
pub const PG_FLOAT8: i32 = 701;
pub const PG_BPCHAR: i32 = 1042;
pub const PG_VARCHAR: i32 = 1043;
pub const PG_NUMERIC: i32 = 1700;

/// Map a native type code to a semantic type.
///
/// `str_length` is the fixed length applied to textual columns. NUMERIC
/// maps to float64; digits beyond f64 precision are lost.
pub fn map_type_code(code: i32, str_length: usize) -> Result<SemanticType> {
    match code {
        PG_BOOL => Ok(SemanticType::Bool),
        PG_INT2 => Ok(SemanticType::Int16),
        PG_INT4 => Ok(SemanticType::Int32),
        PG_INT8 | PG_OID => Ok(SemanticType::Int64),
        PG_FLOAT4 => Ok(SemanticType::Float32),
        PG_FLOAT8 | PG_NUMERIC => Ok(SemanticType::Float64),
        PG_CHAR | PG_TEXT | PG_BPCHAR | PG_VARCHAR => Ok(SemanticType::Text(str_length)),
        other => Err(ColspoolError::UnknownType { code: other }),
    }
}

/// Build the schema from cursor column metadata.
///
/// Runs exactly once per query execution, before the first conversion.
/// With `mask_null` set, integer and bool columns are widened to float64
/// so SQL NULLs can be carried as NaN.
pub fn infer_schema(meta: &[ColumnMeta], cfg: &FetchConfig) -> Result<Schema> {
    let mut columns = Vec::with_capacity(meta.len());
    for m in meta {
        let mut ty = map_type_code(m.type_code, cfg.str_length)?;
        if cfg.mask_null {
            ty = match ty {
                SemanticType::Bool
                | SemanticType::Int8
                | SemanticType::Int16
                | SemanticType::Int32
                | SemanticType::Int64 => SemanticType::Float64,
                other => other,
            };
        }
        columns.push(ColumnDescriptor { name: m.name.clone(), ty });
    }
    Ok(Schema { columns })
}
