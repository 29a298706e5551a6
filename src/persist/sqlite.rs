//! SQLite destination store with set-oriented upserts and cursor checkpoints.

use std::path::Path;

use hashbrown::HashSet;
use rusqlite::{
    Connection, OptionalExtension, ToSql, Transaction, params,
    types::{ToSqlOutput, Value, ValueRef},
};
use tracing::{debug, info};

use crate::{
    record::{ColumnValue, TargetRow},
    schema::descriptor::TableSchema,
    types::{ObjectId, ROW_ID_COLUMN},
};

use super::{Checkpoint, PersistError, PersistResult, RowSink, UpsertBatch, UpsertOutcome};

/// Stays under SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` (32766).
const MAX_BIND_PARAMS: usize = 32_000;

/// SQLite implementation of [`crate::persist::RowSink`].
pub struct SqliteRowSink {
    conn: Connection,
}

impl SqliteRowSink {
    /// Opens or creates a SQLite database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Underlying connection, for ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates missing tables, then adds columns missing from existing ones.
    pub fn sync_schema(&mut self, tables: &[TableSchema]) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        for schema in tables {
            tx.execute_batch(&create_table_sql(schema))?;

            let existing = table_columns(&tx, &schema.table)?;
            for col in &schema.columns {
                if existing.contains(&col.name) {
                    continue;
                }
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    quote_ident(&schema.table),
                    quote_ident(&col.name),
                    col.ty.sql_name()
                ))?;
                info!(table = %schema.table, column = %col.name, "added missing column");
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Upserts one batch in a single transaction and reports how many rows
    /// were new versus already present.
    pub fn upsert_batch(&mut self, batch: &UpsertBatch<'_>) -> PersistResult<UpsertOutcome> {
        if batch.columns.first().map(String::as_str) != Some(batch.conflict_key) {
            return Err(PersistError::Message(format!(
                "first column of {} must be the conflict key `{}`",
                batch.table, batch.conflict_key
            )));
        }

        let tx = self.conn.transaction()?;
        let existing = count_existing(&tx, batch)?;

        let width = batch.columns.len();
        let rows_per_stmt = (MAX_BIND_PARAMS / width).max(1);
        for chunk in batch.rows.chunks(rows_per_stmt) {
            let sql = upsert_sql(batch, chunk.len());
            let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * width);
            for row in chunk {
                bound.push(&row.id);
                for col in &batch.columns[1..] {
                    bound.push(row.get(col));
                }
            }
            tx.prepare_cached(&sql)?.execute(bound.as_slice())?;
        }

        if let Some(cp) = batch.checkpoint {
            write_checkpoint(&tx, cp)?;
        }
        tx.commit()?;

        let total = batch.rows.len() as u64;
        debug!(table = batch.table, rows = total, existing, "upserted batch");
        Ok(UpsertOutcome {
            inserted: total - existing,
            updated: existing,
        })
    }

    /// Reads one row by id; `columns` must start with the conflict key.
    pub fn fetch_row(&self, table: &str, columns: &[String], id: &str) -> PersistResult<Option<TargetRow>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            column_list(columns),
            quote_ident(table),
            quote_ident(ROW_ID_COLUMN)
        );
        let row = self
            .conn
            .query_row(&sql, params![id], |row| read_row(row, columns))
            .optional()?;
        Ok(row)
    }

    /// Reads every row of `table` ordered by id.
    pub fn fetch_all(&self, table: &str, columns: &[String]) -> PersistResult<Vec<TargetRow>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} ASC",
            column_list(columns),
            quote_ident(table),
            quote_ident(ROW_ID_COLUMN)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| read_row(row, columns))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn row_count(&self, table: &str) -> PersistResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn load_checkpoint(&self, entity: &str) -> PersistResult<Option<Checkpoint>> {
        let raw: Option<(String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT last_id, migrated, updated_ms FROM _migration_checkpoints WHERE entity = ?1",
                params![entity],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        raw.map(|(last_id, migrated, updated_ms)| checkpoint_from_parts(entity.to_string(), &last_id, migrated, updated_ms))
            .transpose()
    }

    /// All stored checkpoints ordered by entity name.
    pub fn checkpoints(&self) -> PersistResult<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity, last_id, migrated, updated_ms FROM _migration_checkpoints ORDER BY entity ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entity, last_id, migrated, updated_ms) = row?;
            out.push(checkpoint_from_parts(entity, &last_id, migrated, updated_ms)?);
        }
        Ok(out)
    }

    /// Forgets the checkpoint for `entity`; returns whether one existed.
    pub fn clear_checkpoint(&mut self, entity: &str) -> PersistResult<bool> {
        let n = self.conn.execute(
            "DELETE FROM _migration_checkpoints WHERE entity = ?1",
            params![entity],
        )?;
        Ok(n > 0)
    }
}

impl RowSink for SqliteRowSink {
    fn sync_schema(&mut self, tables: &[TableSchema]) -> PersistResult<()> {
        SqliteRowSink::sync_schema(self, tables)
    }

    fn upsert_batch(&mut self, batch: &UpsertBatch<'_>) -> PersistResult<UpsertOutcome> {
        SqliteRowSink::upsert_batch(self, batch)
    }

    fn load_checkpoint(&mut self, entity: &str) -> PersistResult<Option<Checkpoint>> {
        SqliteRowSink::load_checkpoint(self, entity)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

impl ToSql for ColumnValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ColumnValue::Null => ToSqlOutput::Owned(Value::Null),
            ColumnValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            ColumnValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            ColumnValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

fn column_value_from_ref(value: ValueRef<'_>) -> ColumnValue {
    match value {
        ValueRef::Null => ColumnValue::Null,
        ValueRef::Integer(v) => ColumnValue::Integer(v),
        ValueRef::Real(v) => ColumnValue::Real(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            ColumnValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<TargetRow> {
    let mut out = TargetRow::new(row.get(0)?);
    for (idx, col) in columns.iter().enumerate().skip(1) {
        out.values
            .insert(col.clone(), column_value_from_ref(row.get_ref(idx)?));
    }
    Ok(out)
}

/// `CREATE TABLE IF NOT EXISTS` statement; the first column becomes the primary key.
pub fn create_table_sql(schema: &TableSchema) -> String {
    let mut defs = Vec::with_capacity(schema.columns.len());
    for (idx, col) in schema.columns.iter().enumerate() {
        if idx == 0 {
            defs.push(format!(
                "    {} {} NOT NULL PRIMARY KEY",
                quote_ident(&col.name),
                col.ty.sql_name()
            ));
        } else {
            defs.push(format!("    {} {}", quote_ident(&col.name), col.ty.sql_name()));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(&schema.table),
        defs.join(",\n")
    )
}

fn upsert_sql(batch: &UpsertBatch<'_>, rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; batch.columns.len()].join(", "));
    let values = vec![placeholders; rows].join(", ");

    let conflict = if batch.update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets: Vec<String> = batch
            .update_columns
            .iter()
            .map(|c| {
                let c = quote_ident(c);
                format!("{c} = excluded.{c}")
            })
            .collect();
        format!("DO UPDATE SET {}", sets.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT({}) {}",
        quote_ident(batch.table),
        column_list(batch.columns),
        values,
        quote_ident(batch.conflict_key),
        conflict
    )
}

fn count_existing(tx: &Transaction<'_>, batch: &UpsertBatch<'_>) -> PersistResult<u64> {
    let mut total = 0u64;
    for chunk in batch.rows.chunks(MAX_BIND_PARAMS) {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IN ({})",
            quote_ident(batch.table),
            quote_ident(batch.conflict_key),
            vec!["?"; chunk.len()].join(", ")
        );
        let ids: Vec<&dyn ToSql> = chunk.iter().map(|r| &r.id as &dyn ToSql).collect();
        let n: i64 = tx.query_row(&sql, ids.as_slice(), |row| row.get(0))?;
        total += n as u64;
    }
    Ok(total)
}

fn write_checkpoint(tx: &Transaction<'_>, cp: &Checkpoint) -> PersistResult<()> {
    tx.execute(
        "INSERT INTO _migration_checkpoints(entity, last_id, migrated, updated_ms) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(entity) DO UPDATE SET last_id = excluded.last_id, migrated = excluded.migrated, updated_ms = excluded.updated_ms",
        params![
            cp.entity,
            cp.last_id.to_hex(),
            cp.migrated as i64,
            cp.updated_ms as i64
        ],
    )?;
    Ok(())
}

fn checkpoint_from_parts(entity: String, last_id: &str, migrated: i64, updated_ms: i64) -> PersistResult<Checkpoint> {
    let last_id = ObjectId::parse_str(last_id)
        .map_err(|e| PersistError::Message(format!("corrupt checkpoint for {entity}: {e}")))?;
    Ok(Checkpoint {
        entity,
        last_id,
        migrated: migrated as u64,
        updated_ms: updated_ms as u64,
    })
}

fn table_columns(conn: &Connection, table: &str) -> PersistResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
