//! Postgres-backed notification queue.
//!
//! The `"NotificationQueue"` table is owned by the web application's ORM
//! (quoted camelCase columns, `timestamp(3)` columns holding UTC, `status` and
//! `type` possibly declared as Postgres enums). Queries therefore:
//!
//! - read `status` and `type` through `::text` so enum or text columns both decode
//! - write statuses as SQL literals, which Postgres coerces to either column type
//! - bind timestamps as naive UTC values
//!
//! ## Claim semantics
//!
//! `claim` is a single conditional `UPDATE ... WHERE status = 'PENDING'`; the
//! affected-row count tells whether this run owns the job. Two concurrent runs
//! can fetch the same row but only one of them can claim it.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database (unique violation `23505`) | `AlreadyExists` (enqueue only) |
//! | Database (other) | `Storage` |
//! | PoolClosed / Io / Tls / other | `Storage` |

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use async_trait::async_trait;
use paddock_core::{HorseId, JobId};
use paddock_notifications::NotificationType;

use super::store::{JobStats, JobStore, JobStoreError, RECLAIMED_ERROR};
use super::types::{JobStatus, JobUpdate, NotificationJob};

const SELECT_JOB: &str = r#"
    SELECT
        q.id,
        q."type"::text AS kind,
        q."horseId" AS horse_id,
        h.name AS horse_name,
        q.data,
        q.status::text AS status,
        q."retryCount" AS retry_count,
        q.error,
        q."createdAt" AS created_at,
        q."processedAt" AS processed_at,
        q."claimedAt" AS claimed_at
    FROM "NotificationQueue" q
    LEFT JOIN "Horse" h ON h.id = q."horseId"
"#;

/// Postgres job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why an update matched no `PROCESSING` row.
    async fn transition_error(&self, job_id: &JobId) -> JobStoreError {
        let status = sqlx::query(r#"SELECT status::text AS status FROM "NotificationQueue" WHERE id = $1"#)
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await;

        match status {
            Ok(Some(row)) => match row
                .try_get::<String, _>("status")
                .map_err(|e| e.to_string())
                .and_then(|s| s.parse::<JobStatus>().map_err(|e| e.to_string()))
            {
                Ok(status) => JobStoreError::InvalidTransition {
                    job_id: job_id.clone(),
                    status,
                },
                Err(e) => JobStoreError::Storage(format!("failed to read job status: {e}")),
            },
            Ok(None) => JobStoreError::NotFound(job_id.clone()),
            Err(e) => map_sqlx_error("load_status", e),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind), err)]
    async fn enqueue(&self, job: NotificationJob) -> Result<JobId, JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO "NotificationQueue" (
                id, "type", "horseId", data, status, "retryCount", error,
                "createdAt", "processedAt", "claimedAt"
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(job.horse_id.as_str())
        .bind(&job.data)
        .bind(job.status.as_str())
        .bind(retry_count_to_db(job.retry_count))
        .bind(job.error.as_deref())
        .bind(job.created_at.naive_utc())
        .bind(job.processed_at.map(|t| t.naive_utc()))
        .bind(job.claimed_at.map(|t| t.naive_utc()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id.clone())
            } else {
                map_sqlx_error("enqueue", e)
            }
        })?;

        Ok(job.id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: &JobId) -> Result<Option<NotificationJob>, JobStoreError> {
        let row = sqlx::query(&format!("{SELECT_JOB} WHERE q.id = $1"))
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, exclude), fields(excluded = exclude.len(), fetched = tracing::field::Empty), err)]
    async fn fetch_eligible_batch(
        &self,
        limit: usize,
        max_retries: u32,
        exclude: &[JobId],
    ) -> Result<Vec<NotificationJob>, JobStoreError> {
        let exclude: Vec<String> = exclude.iter().map(|id| id.as_str().to_string()).collect();

        let rows = sqlx::query(&format!(
            r#"{SELECT_JOB}
            WHERE q.status::text = 'PENDING'
              AND q."retryCount" < $1
              AND NOT (q.id = ANY($2))
            ORDER BY q."createdAt" ASC, q.id ASC
            LIMIT $3
            "#
        ))
        .bind(retry_count_to_db(max_retries))
        .bind(exclude)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_eligible_batch", e))?;

        Span::current().record("fetched", rows.len());
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn claim(&self, job_id: &JobId, max_retries: u32) -> Result<bool, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "NotificationQueue"
            SET status = 'PROCESSING', "claimedAt" = $2
            WHERE id = $1
              AND status::text = 'PENDING'
              AND "retryCount" < $3
            "#,
        )
        .bind(job_id.as_str())
        .bind(Utc::now().naive_utc())
        .bind(retry_count_to_db(max_retries))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, update), fields(job_id = %job_id, status = %update.resulting_status()), err)]
    async fn update_status(&self, job_id: &JobId, update: JobUpdate) -> Result<(), JobStoreError> {
        let query = match &update {
            JobUpdate::Sent { processed_at } => sqlx::query(
                r#"
                UPDATE "NotificationQueue"
                SET status = 'SENT', "processedAt" = $2
                WHERE id = $1 AND status::text = 'PROCESSING'
                "#,
            )
            .bind(job_id.as_str())
            .bind(processed_at.naive_utc()),
            JobUpdate::Retry { retry_count, error } => sqlx::query(
                r#"
                UPDATE "NotificationQueue"
                SET status = 'PENDING', "retryCount" = $2, error = $3
                WHERE id = $1 AND status::text = 'PROCESSING'
                "#,
            )
            .bind(job_id.as_str())
            .bind(retry_count_to_db(*retry_count))
            .bind(error.as_str()),
            JobUpdate::Failed {
                retry_count,
                error,
                processed_at,
            } => sqlx::query(
                r#"
                UPDATE "NotificationQueue"
                SET status = 'FAILED', "retryCount" = $2, error = $3, "processedAt" = $4
                WHERE id = $1 AND status::text = 'PROCESSING'
                "#,
            )
            .bind(job_id.as_str())
            .bind(retry_count_to_db(*retry_count))
            .bind(error.as_str())
            .bind(processed_at.naive_utc()),
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(job_id).await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "NotificationQueue"
            SET status = 'PENDING', "claimedAt" = NULL, error = $2
            WHERE status::text = 'PROCESSING'
              AND ("claimedAt" IS NULL OR "claimedAt" < $1)
            "#,
        )
        .bind(claimed_before.naive_utc())
        .bind(RECLAIMED_ERROR)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reclaim_stale", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status::text AS status, COUNT(*) AS total
            FROM "NotificationQueue"
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
            let total: i64 = row.try_get("total").map_err(|e| decode_error("total", e))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Storage(e.to_string()))?;
            stats.record(status, usize::try_from(total).unwrap_or(0));
        }
        Ok(stats)
    }
}

fn job_from_row(row: &PgRow) -> Result<NotificationJob, JobStoreError> {
    let kind: String = row.try_get("kind").map_err(|e| decode_error("type", e))?;
    let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
    let retry_count: i32 = row
        .try_get("retry_count")
        .map_err(|e| decode_error("retryCount", e))?;
    let created_at: NaiveDateTime = row
        .try_get("created_at")
        .map_err(|e| decode_error("createdAt", e))?;
    let processed_at: Option<NaiveDateTime> = row
        .try_get("processed_at")
        .map_err(|e| decode_error("processedAt", e))?;
    let claimed_at: Option<NaiveDateTime> = row
        .try_get("claimed_at")
        .map_err(|e| decode_error("claimedAt", e))?;

    Ok(NotificationJob {
        id: JobId::from(row.try_get::<String, _>("id").map_err(|e| decode_error("id", e))?),
        kind: kind
            .parse::<NotificationType>()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?,
        horse_id: HorseId::from(
            row.try_get::<String, _>("horse_id")
                .map_err(|e| decode_error("horseId", e))?,
        ),
        horse_name: row
            .try_get("horse_name")
            .map_err(|e| decode_error("horse name", e))?,
        data: row.try_get("data").map_err(|e| decode_error("data", e))?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        error: row.try_get("error").map_err(|e| decode_error("error", e))?,
        created_at: created_at.and_utc(),
        processed_at: processed_at.map(|t| t.and_utc()),
        claimed_at: claimed_at.map(|t| t.and_utc()),
    })
}

fn retry_count_to_db(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn decode_error(column: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("failed to decode column {column}: {err}"))
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Storage(format!("timed out acquiring a connection in {operation}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_counts_saturate_into_int4() {
        assert_eq!(retry_count_to_db(3), 3);
        assert_eq!(retry_count_to_db(u32::MAX), i32::MAX);
    }

    #[test]
    fn pool_errors_map_to_storage() {
        let err = map_sqlx_error("claim", sqlx::Error::PoolClosed);
        assert!(matches!(err, JobStoreError::Storage(msg) if msg.contains("claim")));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn select_reads_enum_columns_as_text() {
        assert!(SELECT_JOB.contains(r#"q."type"::text AS kind"#));
        assert!(SELECT_JOB.contains("q.status::text AS status"));
    }
}
