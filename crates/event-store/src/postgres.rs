use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::store::{EventStore, validate_batch};
use crate::{EventEnvelope, EventId, EventStoreError, Result, TransferId, Version};

/// PostgreSQL-backed event store over the `transfer_events` table.
///
/// The version is read and the batch inserted in one transaction. Two writers
/// that both pass the read are separated by the `unique_transfer_version`
/// constraint.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the workspace migrations (event streams and step progress).
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_value(row.try_get("metadata")?)?;

    Ok(EventEnvelope {
        event_id: EventId::from_uuid(row.try_get("id")?),
        event_type: row.try_get("event_type")?,
        transfer_id: TransferId::from_uuid(row.try_get("transfer_id")?),
        version: Version::new(row.try_get("version")?),
        recorded_at: row.try_get("recorded_at")?,
        payload: row.try_get("payload")?,
        metadata,
    })
}

/// Column arrays for one multi-row insert.
#[derive(Default)]
struct Columns {
    ids: Vec<Uuid>,
    event_types: Vec<String>,
    versions: Vec<i64>,
    recorded_at: Vec<DateTime<Utc>>,
    payloads: Vec<serde_json::Value>,
    metadata: Vec<serde_json::Value>,
}

impl Columns {
    fn from_batch(events: &[EventEnvelope]) -> Result<Self> {
        let mut columns = Self::default();
        for event in events {
            columns.ids.push(event.event_id.as_uuid());
            columns.event_types.push(event.event_type.clone());
            columns.versions.push(event.version.as_i64());
            columns.recorded_at.push(event.recorded_at);
            columns.payloads.push(event.payload.clone());
            columns.metadata.push(serde_json::to_value(&event.metadata)?);
        }
        Ok(columns)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, expected: Version, events: Vec<EventEnvelope>) -> Result<Version> {
        let transfer_id = validate_batch(expected, &events)?;
        let columns = Columns::from_batch(&events)?;
        let conflict = |actual: Version| {
            metrics::counter!("event_store_conflicts_total").increment(1);
            tracing::debug!(%transfer_id, %expected, %actual, "append rejected: stale version");
            EventStoreError::ConcurrencyConflict {
                transfer_id,
                expected,
                actual,
            }
        };

        let mut tx = self.pool.begin().await?;

        let head: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM transfer_events WHERE transfer_id = $1")
                .bind(transfer_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let actual = head.map_or(Version::initial(), Version::new);
        if actual != expected {
            return Err(conflict(actual));
        }

        sqlx::query(
            r#"
            INSERT INTO transfer_events (id, transfer_id, event_type, version, recorded_at, payload, metadata)
            SELECT id, $1, event_type, version, recorded_at, payload, metadata
            FROM UNNEST($2::uuid[], $3::text[], $4::bigint[], $5::timestamptz[], $6::jsonb[], $7::jsonb[])
                AS batch (id, event_type, version, recorded_at, payload, metadata)
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(&columns.ids)
        .bind(&columns.event_types)
        .bind(&columns.versions)
        .bind(&columns.recorded_at)
        .bind(&columns.payloads)
        .bind(&columns.metadata)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err)
                if db_err.constraint() == Some("unique_transfer_version") =>
            {
                // Another writer committed at least one event past `expected`.
                conflict(expected.next())
            }
            e => EventStoreError::Database(e),
        })?;

        tx.commit().await?;
        Ok(events.last().map_or(expected, |e| e.version))
    }

    async fn load_stream(&self, transfer_id: TransferId) -> Result<Vec<EventEnvelope>> {
        sqlx::query(
            r#"
            SELECT id, transfer_id, event_type, version, recorded_at, payload, metadata
            FROM transfer_events
            WHERE transfer_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(transfer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(row_to_event)
        .collect()
    }
}
