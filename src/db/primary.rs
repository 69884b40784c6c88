//! Primary record store backed by a local libSQL database.
//!
//! Holds the two sub-collections the register persists: client records
//! (keyed by id) and background images (keyed by opaque string id). The
//! schema is versioned through `PRAGMA user_version`; both tables are
//! created on first use, so an absent collection reads as empty rather
//! than failing.

use std::ffi::c_int;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use crate::db::{BackgroundImage, ClientRecord, ClientStore, Signature, StorageTier, SweepAction};
use crate::error::StoreError;

/// SQLite result code for a full database or disk.
const SQLITE_FULL: c_int = 13;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS clients (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        phone TEXT NOT NULL,
        address TEXT,
        service_plan TEXT NOT NULL,
        payment_details TEXT NOT NULL,
        photo TEXT,
        signature TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_clients_created_at ON clients (created_at)",
    "CREATE TABLE IF NOT EXISTS backgrounds (
        id TEXT PRIMARY KEY,
        data_url TEXT NOT NULL
    )",
];

const CLIENT_COLUMNS: &str =
    "id, code, name, phone, address, service_plan, payment_details, photo, signature, created_at";

/// Structured, queryable store for client records and background images.
pub struct PrimaryStore {
    db: libsql::Database,
    path: PathBuf,
}

impl PrimaryStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let db = libsql::Builder::new_local(&path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;
        let store = Self { db, path };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<libsql::Connection, StoreError> {
        self.db
            .connect()
            .map_err(|e| StoreError::Unavailable(format!("connect: {e}")))
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query("PRAGMA user_version", ())
            .await
            .map_err(|e| map_read_err("read schema version", e))?;
        let version = match rows
            .next()
            .await
            .map_err(|e| map_read_err("read schema version", e))?
        {
            Some(row) => get_i64(&row, 0)?,
            None => 0,
        };

        if version < SCHEMA_VERSION {
            for statement in SCHEMA_STATEMENTS {
                conn.execute(statement, ())
                    .await
                    .map_err(|e| map_write_err("apply schema", e))?;
            }
            conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), ())
                .await
                .map_err(|e| map_write_err("stamp schema version", e))?;
        }
        Ok(())
    }

    /// Visit every client record once and apply the decided action.
    ///
    /// Mutations are independent per record and applied as the scan goes;
    /// a failure mid-pass leaves already-applied mutations in place. The
    /// returned count is the number of records updated or deleted.
    pub async fn sweep_clients<F>(&self, mut decide: F) -> Result<u64, StoreError>
    where
        F: FnMut(&ClientRecord) -> SweepAction,
    {
        let conn = self.connect()?;
        let records = self.list_clients().await?;

        let mut affected = 0u64;
        for record in &records {
            match decide(record) {
                SweepAction::Keep => {}
                SweepAction::Update(updated) => {
                    conn.execute(
                        "UPDATE clients SET code = ?1, name = ?2, phone = ?3, address = ?4, \
                         service_plan = ?5, payment_details = ?6, photo = ?7, signature = ?8 \
                         WHERE id = ?9",
                        params![
                            updated.code.as_str(),
                            updated.name.as_str(),
                            updated.phone.as_str(),
                            opt_text(updated.address.as_deref()),
                            updated.service_plan.as_str(),
                            updated.payment_details.as_str(),
                            opt_text(updated.photo.as_deref()),
                            opt_text(updated.signature.to_column()),
                            record.id,
                        ],
                    )
                    .await
                    .map_err(|e| map_write_err("sweep update", e))?;
                    affected += 1;
                }
                SweepAction::Delete => {
                    conn.execute("DELETE FROM clients WHERE id = ?1", params![record.id])
                        .await
                        .map_err(|e| map_write_err("sweep delete", e))?;
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    /// Clear the photo attachment on every record older than the cutoff
    /// that still has one. Idempotent: a second pass with the same
    /// threshold finds no further matches.
    pub async fn strip_photos_older_than(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = age_cutoff(days);
        self.sweep_clients(|record| {
            if record.created_at < cutoff && record.photo.is_some() {
                SweepAction::Update(record.without_photo())
            } else {
                SweepAction::Keep
            }
        })
        .await
    }

    /// Delete every record older than the cutoff. Destructive; the caller
    /// owns the confirmation policy.
    pub async fn delete_records_older_than(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = age_cutoff(days);
        self.sweep_clients(|record| {
            if record.created_at < cutoff {
                SweepAction::Delete
            } else {
                SweepAction::Keep
            }
        })
        .await
    }

    pub async fn save_background(&self, image: &BackgroundImage) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO backgrounds (id, data_url) VALUES (?1, ?2) \
             ON CONFLICT (id) DO UPDATE SET data_url = excluded.data_url",
            params![image.id.as_str(), image.data_url.as_str()],
        )
        .await
        .map_err(|e| map_write_err("save background", e))?;
        Ok(())
    }

    pub async fn list_backgrounds(&self) -> Result<Vec<BackgroundImage>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query("SELECT id, data_url FROM backgrounds", ())
            .await
            .map_err(|e| map_read_err("list backgrounds", e))?;

        let mut images = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| map_read_err("list backgrounds", e))?
        {
            images.push(BackgroundImage {
                id: get_text(&row, 0)?,
                data_url: get_text(&row, 1)?,
            });
        }
        Ok(images)
    }

    /// Remove all background images. Returns how many were removed.
    pub async fn clear_backgrounds(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM backgrounds", ())
            .await
            .map_err(|e| map_write_err("clear backgrounds", e))
    }
}

#[async_trait]
impl ClientStore for PrimaryStore {
    fn tier(&self) -> StorageTier {
        StorageTier::Primary
    }

    async fn upsert_client(&self, record: &ClientRecord) -> Result<(), StoreError> {
        let conn = self.connect()?;
        // created_at is deliberately absent from the conflict update:
        // the creation time of an existing record never changes.
        conn.execute(
            "INSERT INTO clients (id, code, name, phone, address, service_plan, \
             payment_details, photo, signature, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT (id) DO UPDATE SET \
               code = excluded.code, \
               name = excluded.name, \
               phone = excluded.phone, \
               address = excluded.address, \
               service_plan = excluded.service_plan, \
               payment_details = excluded.payment_details, \
               photo = excluded.photo, \
               signature = excluded.signature",
            params![
                record.id,
                record.code.as_str(),
                record.name.as_str(),
                record.phone.as_str(),
                opt_text(record.address.as_deref()),
                record.service_plan.as_str(),
                record.payment_details.as_str(),
                opt_text(record.photo.as_deref()),
                opt_text(record.signature.to_column()),
                fmt_ts(record.created_at),
            ],
        )
        .await
        .map_err(|e| map_write_err("upsert client", e))?;
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(&format!("SELECT {CLIENT_COLUMNS} FROM clients"), ())
            .await
            .map_err(|e| map_read_err("list clients", e))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| map_read_err("list clients", e))?
        {
            records.push(row_to_client(&row)?);
        }
        Ok(records)
    }

    async fn delete_client(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let affected = conn
            .execute("DELETE FROM clients WHERE id = ?1", params![id])
            .await
            .map_err(|e| map_write_err("delete client", e))?;
        Ok(affected > 0)
    }
}

fn age_cutoff(days: u32) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(i64::from(days))
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(text) => libsql::Value::Text(text.to_string()),
        None => libsql::Value::Null,
    }
}

fn get_text(row: &libsql::Row, idx: i32) -> Result<String, StoreError> {
    row.get::<String>(idx)
        .map_err(|e| StoreError::Read(format!("column {idx}: {e}")))
}

fn get_opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>, StoreError> {
    match row
        .get_value(idx)
        .map_err(|e| StoreError::Read(format!("column {idx}: {e}")))?
    {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(text) => Ok(Some(text)),
        other => Err(StoreError::Read(format!(
            "column {idx}: expected text, got {other:?}"
        ))),
    }
}

fn get_i64(row: &libsql::Row, idx: i32) -> Result<i64, StoreError> {
    row.get::<i64>(idx)
        .map_err(|e| StoreError::Read(format!("column {idx}: {e}")))
}

fn row_to_client(row: &libsql::Row) -> Result<ClientRecord, StoreError> {
    Ok(ClientRecord {
        id: get_i64(row, 0)?,
        code: get_text(row, 1)?,
        name: get_text(row, 2)?,
        phone: get_text(row, 3)?,
        address: get_opt_text(row, 4)?,
        service_plan: get_text(row, 5)?,
        payment_details: get_text(row, 6)?,
        photo: get_opt_text(row, 7)?,
        signature: Signature::from_column(get_opt_text(row, 8)?),
        created_at: parse_timestamp(&get_text(row, 9)?)?,
    })
}

fn quota_signal(err: &libsql::Error) -> bool {
    match err {
        libsql::Error::SqliteFailure(code, message) => {
            *code & 0xff == SQLITE_FULL || message.contains("disk is full")
        }
        _ => false,
    }
}

fn map_write_err(op: &str, err: libsql::Error) -> StoreError {
    if quota_signal(&err) {
        StoreError::QuotaExceeded(format!("{op}: {err}"))
    } else {
        StoreError::Write(format!("{op}: {err}"))
    }
}

fn map_read_err(op: &str, err: libsql::Error) -> StoreError {
    StoreError::Read(format!("{op}: {err}"))
}
