use crate::error::Error;
use crate::model::VerificationResult;
use crate::strategy::sql::{open_read_only, quote_ident, table_names};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::Path;

const COLUMN_SEPARATOR: u8 = 0x1f;
const ROW_SEPARATOR: u8 = 0x1e;

/// Schema text equality, then per-table row counts and content checksums.
pub fn verify_sql(source: &Path, backup: &Path) -> Result<VerificationResult, Error> {
    let source_conn = open_read_only(source)?;
    let backup_conn = match open_read_only(backup) {
        Ok(conn) => conn,
        Err(e) => return Ok(VerificationResult::fail(format!("cannot open backup: {}", e))),
    };

    if schema_signature(&source_conn)? != schema_signature(&backup_conn)? {
        return Ok(VerificationResult::fail("schema definitions differ"));
    }

    for table in table_names(&source_conn)? {
        let source_rows = row_count(&source_conn, &table)?;
        let backup_rows = row_count(&backup_conn, &table)?;
        if source_rows != backup_rows {
            return Ok(VerificationResult::fail(format!(
                "row count mismatch in '{}': source {}, backup {}",
                table, source_rows, backup_rows
            )));
        }
        if source_rows > 0
            && table_checksum(&source_conn, &table)? != table_checksum(&backup_conn, &table)?
        {
            return Ok(VerificationResult::fail(format!(
                "content checksum mismatch in '{}'",
                table
            )));
        }
    }

    Ok(VerificationResult::pass())
}

/// All user schema definitions ordered by type then name, one per line.
pub fn schema_signature(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(
        "SELECT type, name, sql FROM sqlite_master
         WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
         ORDER BY type, name",
    )?;
    let mut signature = String::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let kind: String = row.get(0)?;
        let name: String = row.get(1)?;
        let sql: String = row.get(2)?;
        signature.push_str(&format!("{}|{}|{}\n", kind, name, sql));
    }
    Ok(signature)
}

pub fn row_count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )
}

/// BLAKE3 over every column value of every row, rows ordered by all columns.
/// Text and blob values are length-prefixed.
pub fn table_checksum(conn: &Connection, table: &str) -> rusqlite::Result<blake3::Hash> {
    let quoted = quote_ident(table);
    let columns = conn
        .prepare(&format!("SELECT * FROM {}", quoted))?
        .column_count();
    let order_by = (1..=columns)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY {}", quoted, order_by))?;
    let mut rows = stmt.query([])?;
    let mut hasher = blake3::Hasher::new();
    while let Some(row) = rows.next()? {
        for i in 0..columns {
            match row.get_ref(i)? {
                ValueRef::Null => hasher.update(b"N"),
                ValueRef::Integer(v) => hasher.update(b"I").update(&v.to_le_bytes()),
                ValueRef::Real(v) => hasher.update(b"R").update(&v.to_bits().to_le_bytes()),
                ValueRef::Text(v) => hasher
                    .update(b"T")
                    .update(&(v.len() as u64).to_le_bytes())
                    .update(v),
                ValueRef::Blob(v) => hasher
                    .update(b"B")
                    .update(&(v.len() as u64).to_le_bytes())
                    .update(v),
            };
            hasher.update(&[COLUMN_SEPARATOR]);
        }
        hasher.update(&[ROW_SEPARATOR]);
    }
    Ok(hasher.finalize())
}
