use crate::db::{queries, DbPool};
use crate::models::telemetry_row::TelemetryRow;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The row already existed; nothing was written.
    Duplicate,
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Inserts `row`, doing nothing if its `(device_id, sensor_id, ts, seq)`
    /// key is already present.
    async fn insert_ignore(&self, row: &TelemetryRow) -> anyhow::Result<InsertOutcome>;
}

pub struct PgTelemetryStore {
    pool: DbPool,
}

impl PgTelemetryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert_ignore(&self, row: &TelemetryRow) -> anyhow::Result<InsertOutcome> {
        let result = sqlx::query(queries::INSERT_TELEMETRY)
            .bind(&row.device_id)
            .bind(&row.sensor_id)
            .bind(row.ts)
            .bind(row.seq)
            .bind(&row.sensor_type)
            .bind(&row.value_type)
            .bind(row.value_num)
            .bind(row.value_bool)
            .bind(&row.value_text)
            .bind(&row.unit)
            .bind(&row.location)
            .execute(&self.pool)
            .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_schema;
    use crate::testing::message;

    fn row() -> TelemetryRow {
        TelemetryRow::from_message(&message("pi-01", "cpu-temp", "2024-03-01T08:00:00Z", 72.5))
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_insert_ignore_is_idempotent(pool: sqlx::PgPool) {
        create_schema(&pool).await.unwrap();
        let store = PgTelemetryStore::new(pool.clone());
        let row = row();

        assert_eq!(store.insert_ignore(&row).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_ignore(&row).await.unwrap(), InsertOutcome::Duplicate);

        let (count, value): (i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(value_num) FROM telemetry WHERE device_id = 'pi-01'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((count, value), (1, Some(72.5)));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_row_must_carry_exactly_one_value(pool: sqlx::PgPool) {
        create_schema(&pool).await.unwrap();
        let store = PgTelemetryStore::new(pool);
        let mut row = row();
        row.value_text = Some("72.5".to_string());

        assert!(store.insert_ignore(&row).await.is_err());
    }
}
