use super::StageContext;
use crate::error::Error;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of `sqlite_master` describing a user schema object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: String,
    pub name: String,
    pub table: String,
    pub sql: String,
}

pub fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Double-quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// User schema objects in replay order: tables, indexes, views, triggers,
/// each group in creation order. Shadow tables of virtual tables are left out;
/// creating the virtual table recreates them.
pub fn schema_objects(conn: &Connection) -> rusqlite::Result<Vec<SchemaObject>> {
    let mut stmt = conn.prepare(
        "SELECT type, name, tbl_name, sql FROM sqlite_master
         WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
           AND name NOT IN (
               SELECT name FROM pragma_table_list
               WHERE schema = 'main' AND type = 'shadow'
           )
         ORDER BY CASE type
             WHEN 'table' THEN 0
             WHEN 'index' THEN 1
             WHEN 'view' THEN 2
             WHEN 'trigger' THEN 3
             ELSE 4
         END, rowid",
    )?;
    let objects = stmt
        .query_map([], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
                table: row.get(2)?,
                sql: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(objects)
}

pub fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    Ok(schema_objects(conn)?
        .into_iter()
        .filter(|o| o.kind == "table")
        .map(|o| o.name)
        .collect())
}

/// Columns a plain `INSERT` accepts: generated and hidden columns excluded.
pub fn insertable_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM pragma_table_xinfo(?1) WHERE hidden = 0 ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(columns)
}

pub fn has_table(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

pub fn online_export(ctx: &StageContext<'_>) -> Result<(), Error> {
    let conn = open_read_only(&ctx.item.path)?;
    let target = ctx
        .target
        .to_str()
        .ok_or_else(|| Error::Other(format!("target path {} is not UTF-8", ctx.target.display())))?;
    conn.execute("VACUUM INTO ?1", [target])?;
    debug!("Exported {} into {}", ctx.item.display_name, target);
    Ok(())
}

pub fn schema_copy(ctx: &StageContext<'_>) -> Result<(), Error> {
    let source = open_read_only(&ctx.item.path)?;
    let mut target = Connection::open(ctx.target)?;

    let (tables, others): (Vec<_>, Vec<_>) = schema_objects(&source)?
        .into_iter()
        .partition(|o| o.kind == "table");

    for table in &tables {
        target.execute_batch(&table.sql)?;
    }

    let mut rows = 0;
    for table in &tables {
        rows += copy_rows(&source, &mut target, &table.name)?;
    }

    // AUTOINCREMENT counters live in an internal table the inserts above
    // already touched; replace them with the source values.
    if has_table(&source, "sqlite_sequence")? && has_table(&target, "sqlite_sequence")? {
        target.execute("DELETE FROM sqlite_sequence", [])?;
        copy_rows(&source, &mut target, "sqlite_sequence")?;
    }

    // Indexes, views and triggers go in after the data so triggers do not fire.
    for object in &others {
        target.execute_batch(&object.sql)?;
    }

    info!(
        "Copied {} tables ({} rows) and {} other objects of {}",
        tables.len(),
        rows,
        others.len(),
        ctx.item.display_name
    );
    Ok(())
}

/// Copy every row of `table` inside one target transaction.
fn copy_rows(source: &Connection, target: &mut Connection, table: &str) -> Result<u64, Error> {
    let names = insertable_columns(source, table)?;
    if names.is_empty() {
        return Ok(0);
    }
    let quoted = quote_ident(table);
    let column_list = names
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let columns = names.len();
    let placeholders = vec!["?"; columns].join(", ");
    let mut select = source.prepare(&format!("SELECT {} FROM {}", column_list, quoted))?;

    let tx = target.transaction()?;
    let mut copied = 0;
    {
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted, column_list, placeholders
        ))?;
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let values = (0..columns)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            insert.execute(params_from_iter(values))?;
            copied += 1;
        }
    }
    tx.commit()?;

    debug!("Copied {} rows of {}", copied, table);
    Ok(copied)
}
