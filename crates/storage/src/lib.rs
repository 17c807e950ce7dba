use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{EntityKind, RecordId},
    error::{ApiException, ErrorCode},
    protocol::{ListQuery, RecordDocument},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: RecordId,
    pub slug: String,
    pub order: i64,
    pub active: bool,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn into_document(self) -> RecordDocument {
        RecordDocument {
            id: Some(self.id),
            slug: self.slug,
            order: self.order,
            active: self.active,
            updated_at: Some(self.updated_at),
            fields: self.fields,
        }
    }
}

/// Columns derived from a document's entity fields so they can be queried.
struct IndexedColumns {
    category: Option<String>,
    status: Option<String>,
    fields_json: String,
}

impl IndexedColumns {
    fn from_document(kind: EntityKind, doc: &RecordDocument) -> Result<Self> {
        let mut fields = doc.fields.clone();
        for reserved in ["id", "slug", "order", "active", "updated_at"] {
            fields.remove(reserved);
        }
        let category = doc.field_str(kind.category_field()).map(str::to_string);
        let status = kind
            .status_field()
            .and_then(|field| doc.field_str(field))
            .map(str::to_string);
        let fields_json =
            serde_json::to_string(&fields).context("failed to encode record fields")?;
        Ok(Self {
            category,
            status,
            fields_json,
        })
    }
}

const RECORD_COLUMNS: &str = "id, slug, sort_order, active, fields, created_at, updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        // Every connection to `sqlite::memory:` opens its own database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn list_records(
        &self,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Vec<StoredRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = "
        ));
        builder.push_bind(kind.path_segment());
        if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
            builder.push(" AND status = ").push_bind(status.trim().to_string());
        }
        if let Some(category) = query.category.as_deref().filter(|c| !c.trim().is_empty()) {
            builder
                .push(" AND category = ")
                .push_bind(category.trim().to_string());
        }
        if let Some(active) = query.active {
            builder.push(" AND active = ").push_bind(active);
        }
        if kind.is_ordered() {
            builder.push(" ORDER BY sort_order ASC, id ASC");
        } else {
            builder.push(" ORDER BY id DESC");
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list {kind}"))?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn record_by_slug(
        &self,
        kind: EntityKind,
        slug: &str,
    ) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND slug = ?"
        ))
        .bind(kind.path_segment())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn record_by_id(
        &self,
        kind: EntityKind,
        id: RecordId,
    ) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND id = ?"
        ))
        .bind(kind.path_segment())
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Inserts a new record. The backend assigns the id; any id on `doc` is ignored.
    pub async fn insert_record(
        &self,
        kind: EntityKind,
        doc: &RecordDocument,
    ) -> Result<StoredRecord> {
        let columns = IndexedColumns::from_document(kind, doc)?;
        let row = sqlx::query(&format!(
            "INSERT INTO records (collection, slug, sort_order, active, category, status, fields, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(kind.path_segment())
        .bind(doc.slug.trim())
        .bind(doc.order)
        .bind(doc.active)
        .bind(columns.category)
        .bind(columns.status)
        .bind(columns.fields_json)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_write_error(err, kind, &doc.slug))?;
        let record = record_from_row(&row)?;
        debug!(collection = %kind, id = record.id.0, slug = %record.slug, "record inserted");
        Ok(record)
    }

    /// Full update of the record currently stored under `slug`. `doc.slug` may rename it.
    pub async fn update_record(
        &self,
        kind: EntityKind,
        slug: &str,
        doc: &RecordDocument,
    ) -> Result<Option<StoredRecord>> {
        let columns = IndexedColumns::from_document(kind, doc)?;
        let row = sqlx::query(&format!(
            "UPDATE records
             SET slug = ?, sort_order = ?, active = ?, category = ?, status = ?, fields = ?, updated_at = ?
             WHERE collection = ? AND slug = ?
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(doc.slug.trim())
        .bind(doc.order)
        .bind(doc.active)
        .bind(columns.category)
        .bind(columns.status)
        .bind(columns.fields_json)
        .bind(Utc::now())
        .bind(kind.path_segment())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| map_write_error(err, kind, &doc.slug))?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn update_record_by_id(
        &self,
        kind: EntityKind,
        id: RecordId,
        doc: &RecordDocument,
    ) -> Result<Option<StoredRecord>> {
        let columns = IndexedColumns::from_document(kind, doc)?;
        let row = sqlx::query(&format!(
            "UPDATE records
             SET slug = ?, sort_order = ?, active = ?, category = ?, status = ?, fields = ?, updated_at = ?
             WHERE collection = ? AND id = ?
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(doc.slug.trim())
        .bind(doc.order)
        .bind(doc.active)
        .bind(columns.category)
        .bind(columns.status)
        .bind(columns.fields_json)
        .bind(Utc::now())
        .bind(kind.path_segment())
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| map_write_error(err, kind, &doc.slug))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Deletes by slug, or by id when `key` is numeric and no slug matches.
    /// Returns whether a row was removed.
    pub async fn delete_record(&self, kind: EntityKind, key: &str) -> Result<bool> {
        let by_slug = sqlx::query("DELETE FROM records WHERE collection = ? AND slug = ?")
            .bind(kind.path_segment())
            .bind(key)
            .execute(&self.pool)
            .await?;
        if by_slug.rows_affected() > 0 {
            return Ok(true);
        }

        let Ok(id) = key.parse::<i64>() else {
            return Ok(false);
        };
        let by_id = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(kind.path_segment())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(by_id.rows_affected() > 0)
    }

    /// Writes every document of a reordered/edited collection in one transaction.
    /// Each document must carry the id of an existing record of `kind`.
    pub async fn replace_collection(
        &self,
        kind: EntityKind,
        docs: &[RecordDocument],
    ) -> Result<Vec<StoredRecord>> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Park slugs first so swapping two slugs within one save cannot trip UNIQUE.
        for doc in docs {
            let Some(id) = doc.id else {
                return Err(ApiException::new(
                    ErrorCode::Validation,
                    format!("record '{}' has no id", doc.slug),
                )
                .into());
            };
            let parked = sqlx::query(
                "UPDATE records SET slug = '__parked__' || id WHERE collection = ? AND id = ?",
            )
            .bind(kind.path_segment())
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
            if parked.rows_affected() == 0 {
                return Err(ApiException::new(
                    ErrorCode::NotFound,
                    format!("{} {} not found", kind.label(), id.0),
                )
                .into());
            }
        }

        for doc in docs {
            let Some(id) = doc.id else {
                continue;
            };
            let columns = IndexedColumns::from_document(kind, doc)?;
            sqlx::query(
                "UPDATE records
                 SET slug = ?, sort_order = ?, active = ?, category = ?, status = ?, fields = ?, updated_at = ?
                 WHERE collection = ? AND id = ?",
            )
            .bind(doc.slug.trim())
            .bind(doc.order)
            .bind(doc.active)
            .bind(columns.category)
            .bind(columns.status)
            .bind(columns.fields_json)
            .bind(now)
            .bind(kind.path_segment())
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_write_error(err, kind, &doc.slug))?;
        }

        tx.commit().await?;
        self.list_records(kind, &ListQuery::default()).await
    }

    pub async fn count_records(&self, kind: EntityKind) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(kind.path_segment())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn purge_collection(&self, kind: EntityKind) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(kind.path_segment())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord> {
    let fields_json: String = row.try_get("fields")?;
    let fields = match serde_json::from_str::<Value>(&fields_json)
        .context("stored record fields are not valid JSON")?
    {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(StoredRecord {
        id: RecordId(row.try_get("id")?),
        slug: row.try_get("slug")?,
        order: row.try_get("sort_order")?,
        active: row.try_get("active")?,
        fields,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_write_error(err: sqlx::Error, kind: EntityKind, slug: &str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return ApiException::new(
                ErrorCode::Conflict,
                format!("a {} with slug '{}' already exists", kind.label(), slug.trim()),
            )
            .into();
        }
    }
    anyhow::Error::new(err).context(format!("failed to write {kind} record"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
