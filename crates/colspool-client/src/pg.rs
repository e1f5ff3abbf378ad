//! PostgreSQL driver adapter
//!
//! Batched retrieval uses the extended-protocol portal
//! (`Transaction::bind` + `query_portal`), the server-side cursor path:
//! rows stream from the server `batch_rows` at a time instead of being
//! buffered whole. The default preamble `SET cursor_tuple_fraction TO 1`
//! tells the planner to optimize for full retrieval.
//!
//! NUMERIC columns are decoded through `rust_decimal` and narrowed to
//! float64; digits beyond f64 precision are lost.

use bytes::BytesMut;
use colspool_common::{ColspoolError, ConnectConfig, Result};
use postgres::types::{IsNull, ToSql, Type};
use postgres::{Client, NoTls, Portal, Transaction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::source::{ColumnMeta, SqlConnection, SqlCursor};
use crate::typemap;
use crate::types::{RowBatch, ScalarValue};

const DEFAULT_PREAMBLE: &str = "SET cursor_tuple_fraction TO 1";

/// Open a connection from the configuration
pub fn connect(cfg: &ConnectConfig) -> Result<PgConnection> {
    let mut pg_cfg = postgres::Config::new();
    pg_cfg
        .host(&cfg.host)
        .port(cfg.port)
        .dbname(&cfg.database)
        .application_name(&cfg.application_name);
    if let Some(user) = &cfg.user {
        pg_cfg.user(user);
    }
    if let Some(password) = &cfg.password {
        pg_cfg.password(password);
    }

    let client = pg_cfg
        .connect(NoTls)
        .map_err(|e| ColspoolError::Driver(format!("connect to {}:{} failed: {}", cfg.host, cfg.port, e)))?;
    debug!(host = %cfg.host, port = cfg.port, database = %cfg.database, "connected");
    Ok(PgConnection { client: Some(client) })
}

/// A PostgreSQL connection
pub struct PgConnection {
    client: Option<Client>,
}

impl PgConnection {
    fn client_mut(&mut self) -> Result<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| ColspoolError::Driver("connection already closed".into()))
    }
}

impl SqlConnection for PgConnection {
    fn open_cursor(&mut self, preamble: Option<&str>) -> Result<Box<dyn SqlCursor + '_>> {
        let client = self.client_mut()?;
        let mut tx = client
            .transaction()
            .map_err(|e| ColspoolError::Driver(format!("begin failed: {}", e)))?;
        tx.batch_execute(preamble.unwrap_or(DEFAULT_PREAMBLE))
            .map_err(|e| ColspoolError::Driver(format!("preamble failed: {}", e)))?;
        Ok(Box::new(PgCursor {
            tx: Some(tx),
            portal: None,
            codes: Vec::new(),
            meta: Vec::new(),
            exhausted: false,
        }))
    }

    fn execute_statement(&mut self, query: &str, params: &[ScalarValue]) -> Result<u64> {
        let client = self.client_mut()?;
        let refs = param_refs(params);
        client
            .execute(query, &refs)
            .map_err(|e| ColspoolError::Driver(format!("statement failed: {}", e)))
    }

    fn rollback(&mut self) -> Result<()> {
        // outside an open transaction the server replies with a warning
        self.client_mut()?
            .batch_execute("ROLLBACK")
            .map_err(|e| ColspoolError::Driver(format!("rollback failed: {}", e)))
    }

    fn commit(&mut self) -> Result<()> {
        self.client_mut()?
            .batch_execute("COMMIT")
            .map_err(|e| ColspoolError::Driver(format!("commit failed: {}", e)))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .map_err(|e| ColspoolError::Driver(format!("close failed: {}", e)))?;
        }
        Ok(())
    }
}

/// A portal-backed cursor bound to one transaction
pub struct PgCursor<'a> {
    tx: Option<Transaction<'a>>,
    portal: Option<Portal>,
    codes: Vec<i32>,
    meta: Vec<ColumnMeta>,
    exhausted: bool,
}

impl SqlCursor for PgCursor<'_> {
    fn execute(&mut self, query: &str, params: &[ScalarValue]) -> Result<()> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| ColspoolError::Driver("cursor already closed".into()))?;
        let stmt = tx
            .prepare(query)
            .map_err(|e| ColspoolError::Driver(format!("prepare failed: {}", e)))?;
        self.meta = stmt
            .columns()
            .iter()
            .map(|c| ColumnMeta { name: c.name().to_string(), type_code: c.type_().oid() as i32 })
            .collect();
        self.codes = self.meta.iter().map(|m| m.type_code).collect();

        let refs = param_refs(params);
        let portal = tx
            .bind(&stmt, &refs)
            .map_err(|e| ColspoolError::Driver(format!("bind failed: {}", e)))?;
        self.portal = Some(portal);
        Ok(())
    }

    fn fetch_batch(&mut self, max_rows: usize) -> Result<RowBatch> {
        if self.exhausted {
            return Ok(RowBatch::default());
        }
        let portal = self
            .portal
            .as_ref()
            .ok_or_else(|| ColspoolError::Driver("cursor not executed".into()))?;
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| ColspoolError::Driver("cursor already closed".into()))?;

        let pg_rows = tx
            .query_portal(portal, max_rows as i32)
            .map_err(|e| ColspoolError::Fetch(e.to_string()))?;
        if pg_rows.is_empty() {
            self.exhausted = true;
            return Ok(RowBatch::default());
        }

        let mut rows = Vec::with_capacity(pg_rows.len());
        for row in &pg_rows {
            let mut values = Vec::with_capacity(self.codes.len());
            for (idx, code) in self.codes.iter().enumerate() {
                values.push(decode_value(row, idx, *code)?);
            }
            rows.push(values);
        }
        Ok(RowBatch::new(rows))
    }

    fn column_metadata(&self) -> Result<Vec<ColumnMeta>> {
        if self.portal.is_none() {
            return Err(ColspoolError::Driver("cursor not executed".into()));
        }
        Ok(self.meta.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.portal = None;
        if let Some(tx) = self.tx.take() {
            tx.rollback()
                .map_err(|e| ColspoolError::Driver(format!("cursor close failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Decode one cell into the closed scalar set, dispatching on the type code
fn decode_value(row: &postgres::Row, idx: usize, code: i32) -> Result<ScalarValue> {
    let fetch = |e: postgres::Error| ColspoolError::Fetch(format!("column {}: {}", idx, e));
    let value = match code {
        typemap::PG_BOOL => row.try_get::<_, Option<bool>>(idx).map_err(fetch)?.map(ScalarValue::Bool),
        typemap::PG_CHAR => row
            .try_get::<_, Option<i8>>(idx)
            .map_err(fetch)?
            .map(|c| ScalarValue::Text(((c as u8) as char).to_string())),
        typemap::PG_INT2 => row.try_get::<_, Option<i16>>(idx).map_err(fetch)?.map(ScalarValue::I16),
        typemap::PG_INT4 => row.try_get::<_, Option<i32>>(idx).map_err(fetch)?.map(ScalarValue::I32),
        typemap::PG_INT8 => row.try_get::<_, Option<i64>>(idx).map_err(fetch)?.map(ScalarValue::I64),
        typemap::PG_OID => row
            .try_get::<_, Option<u32>>(idx)
            .map_err(fetch)?
            .map(|v| ScalarValue::I64(v as i64)),
        typemap::PG_FLOAT4 => row.try_get::<_, Option<f32>>(idx).map_err(fetch)?.map(ScalarValue::F32),
        typemap::PG_FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(fetch)?.map(ScalarValue::F64),
        typemap::PG_NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)
            .map_err(fetch)?
            .map(|d| ScalarValue::F64(d.to_f64().unwrap_or(f64::NAN))),
        typemap::PG_TEXT | typemap::PG_VARCHAR | typemap::PG_BPCHAR => row
            .try_get::<_, Option<String>>(idx)
            .map_err(fetch)?
            .map(ScalarValue::Text),
        other => return Err(ColspoolError::UnknownType { code: other }),
    };
    Ok(value.unwrap_or(ScalarValue::Null))
}

fn param_refs(params: &[ScalarValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl ToSql for ScalarValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            ScalarValue::Null => Ok(IsNull::Yes),
            ScalarValue::Bool(v) => v.to_sql(ty, out),
            ScalarValue::I8(v) => v.to_sql(ty, out),
            ScalarValue::I16(v) => v.to_sql(ty, out),
            ScalarValue::I32(v) => v.to_sql(ty, out),
            ScalarValue::I64(v) => v.to_sql(ty, out),
            ScalarValue::F32(v) => v.to_sql(ty, out),
            ScalarValue::F64(v) => v.to_sql(ty, out),
            ScalarValue::Text(v) => v.as_str().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // variant/type agreement is the caller's contract; the server
        // reports a bind failure on a true mismatch
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}
