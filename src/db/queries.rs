//! Query result persistence: insert, fetch, page through, delete.

use crate::error::{Error, Result};
use crate::model::query::HeaderMap;
use crate::model::{QueryFilter, QueryId, QueryRecord};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use sqlx::types::Json;
use uuid::Uuid;

impl super::Db {
    /// Store the record of an executed query.
    pub async fn insert_query(&self, record: &QueryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO queries (id, status, status_code, headers, length, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id.0)
        .bind(&record.status)
        .bind(i32::from(record.status_code))
        .bind(Json(&record.headers))
        .bind(record.length as i64)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;
        record_operation("insert");
        Ok(())
    }

    /// Get a query record by ID.
    pub async fn get_query(&self, id: QueryId) -> Result<QueryRecord> {
        let row: Option<QueryRow> = sqlx::query_as(
            "SELECT id, status, status_code, headers, length, created_at
             FROM queries WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        record_operation("get");

        row.map(QueryRow::into_record)
            .ok_or_else(|| Error::NotFound(format!("query {id}")))
    }

    /// One page of records in creation order.
    ///
    /// Fetches up to `limit + 1` rows so the caller can tell whether a next
    /// page exists; trimming the extra row is the caller's job.
    pub async fn list_queries(&self, filter: &QueryFilter) -> Result<Vec<QueryRecord>> {
        let rows: Vec<QueryRow> = sqlx::query_as(
            "SELECT id, status, status_code, headers, length, created_at
             FROM queries
             WHERE ($1::timestamptz IS NULL OR created_at >= $1)
             AND ($2::timestamptz IS NULL OR created_at <= $2)
             ORDER BY created_at ASC
             OFFSET $3
             LIMIT $4",
        )
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.offset())
        .bind(i64::from(filter.limit) + 1)
        .fetch_all(self.pool())
        .await?;
        record_operation("list");

        Ok(rows.into_iter().map(QueryRow::into_record).collect())
    }

    /// Delete a query record. `NotFound` if there was nothing to delete.
    pub async fn delete_query(&self, id: QueryId) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM queries WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        record_operation("delete");

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("query {id}")));
        }
        Ok(())
    }
}

fn record_operation(operation: &'static str) {
    metrics::store_operations().add(1, &[KeyValue::new("operation", operation)]);
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueryRow {
    id: Uuid,
    status: String,
    status_code: i32,
    headers: Json<HeaderMap>,
    length: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl QueryRow {
    fn into_record(self) -> QueryRecord {
        QueryRecord {
            id: QueryId(self.id),
            status: self.status,
            status_code: self.status_code as u16,
            headers: self.headers.0,
            length: self.length as u64,
            created_at: self.created_at,
        }
    }
}
