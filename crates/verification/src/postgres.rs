//! PostgreSQL step progress store over `step_progress` and `phase_cursors`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::TransferId;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::store::{PhaseCursor, SlotEntry, StepProgressStore, StepRecord};
use crate::{PayloadSlot, Phase, Result, StepKey, VerificationError};

/// Slot mutations lock the phase cursor row and then the step row
/// (`SELECT ... FOR UPDATE`). Concurrent writers to different slots of one
/// step serialize instead of overwriting each other's JSON, and no write
/// lands once the cursor is closed.
#[derive(Clone)]
pub struct PostgresStepProgressStore {
    pool: PgPool,
}

impl PostgresStepProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn mutate(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        f: impl FnOnce(&mut StepRecord),
    ) -> Result<StepRecord> {
        let mut tx = self.pool.begin().await?;

        let sealed: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT closed FROM phase_cursors
            WHERE transfer_id = $1 AND phase = $2
            FOR UPDATE
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if sealed == Some(true) {
            return Err(VerificationError::PhaseSealed { phase });
        }

        sqlx::query(
            r#"
            INSERT INTO step_progress (transfer_id, phase, step_key, slots, completed, updated_at)
            VALUES ($1, $2, $3, '{}'::jsonb, FALSE, NOW())
            ON CONFLICT (transfer_id, phase, step_key) DO NOTHING
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .bind(step.as_str())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT slots, completed, completed_at, updated_at
            FROM step_progress
            WHERE transfer_id = $1 AND phase = $2 AND step_key = $3
            FOR UPDATE
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .bind(step.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut record = row_to_record(transfer_id, phase, step, row)?;
        f(&mut record);
        write_record(&mut tx, &record).await?;

        tx.commit().await?;
        Ok(record)
    }
}

fn row_to_record(
    transfer_id: TransferId,
    phase: Phase,
    step: StepKey,
    row: PgRow,
) -> Result<StepRecord> {
    let slots_json: serde_json::Value = row.try_get("slots")?;
    let slots: BTreeMap<PayloadSlot, SlotEntry> = serde_json::from_value(slots_json)?;

    Ok(StepRecord {
        transfer_id,
        phase,
        step,
        slots,
        completed: row.try_get("completed")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn write_record(tx: &mut Transaction<'_, Postgres>, record: &StepRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE step_progress
        SET slots = $4, completed = $5, completed_at = $6, updated_at = $7
        WHERE transfer_id = $1 AND phase = $2 AND step_key = $3
        "#,
    )
    .bind(record.transfer_id.as_uuid())
    .bind(record.phase.as_str())
    .bind(record.step.as_str())
    .bind(serde_json::to_value(&record.slots)?)
    .bind(record.completed)
    .bind(record.completed_at)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_step(raw: &str) -> Result<StepKey> {
    raw.parse().map_err(|e: String| {
        VerificationError::Database(sqlx::Error::Decode(e.into()))
    })
}

#[async_trait]
impl StepProgressStore for PostgresStepProgressStore {
    async fn record_slot(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
        reference: String,
    ) -> Result<StepRecord> {
        self.mutate(transfer_id, phase, step, |record| {
            record.put_slot(slot, reference)
        })
        .await
    }

    async fn clear_slot(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
    ) -> Result<StepRecord> {
        self.mutate(transfer_id, phase, step, |record| record.clear_slot(slot))
            .await
    }

    async fn reset_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<StepRecord> {
        self.mutate(transfer_id, phase, step, StepRecord::reset).await
    }

    async fn load_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<Option<StepRecord>> {
        let row = sqlx::query(
            r#"
            SELECT slots, completed, completed_at, updated_at
            FROM step_progress
            WHERE transfer_id = $1 AND phase = $2 AND step_key = $3
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .bind(step.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_record(transfer_id, phase, step, row))
            .transpose()
    }

    async fn load_phase(&self, transfer_id: TransferId, phase: Phase) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT step_key, slots, completed, completed_at, updated_at
            FROM step_progress
            WHERE transfer_id = $1 AND phase = $2
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let step_key: String = row.try_get("step_key")?;
                let step = parse_step(&step_key)?;
                row_to_record(transfer_id, phase, step, row)
            })
            .collect()
    }

    async fn cursor(&self, transfer_id: TransferId, phase: Phase) -> Result<PhaseCursor> {
        let row = sqlx::query(
            "SELECT step_index, closed FROM phase_cursors WHERE transfer_id = $1 AND phase = $2",
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(PhaseCursor {
                step_index: row.try_get::<i32, _>("step_index")? as usize,
                closed: row.try_get("closed")?,
            }),
            None => Ok(PhaseCursor::default()),
        }
    }

    async fn compare_and_set_cursor(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        expected: PhaseCursor,
        next: PhaseCursor,
    ) -> Result<bool> {
        // A missing row stands for the default cursor.
        if expected == PhaseCursor::default() {
            let inserted = sqlx::query(
                r#"
                INSERT INTO phase_cursors (transfer_id, phase, step_index, closed)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (transfer_id, phase) DO NOTHING
                "#,
            )
            .bind(transfer_id.as_uuid())
            .bind(phase.as_str())
            .bind(next.step_index as i32)
            .bind(next.closed)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                return Ok(true);
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE phase_cursors
            SET step_index = $3, closed = $4
            WHERE transfer_id = $1 AND phase = $2 AND step_index = $5 AND closed = $6
            "#,
        )
        .bind(transfer_id.as_uuid())
        .bind(phase.as_str())
        .bind(next.step_index as i32)
        .bind(next.closed)
        .bind(expected.step_index as i32)
        .bind(expected.closed)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }
}
