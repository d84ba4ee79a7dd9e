//! Schema bootstrap for the telemetry and alert tables.
//!
//! Idempotent, so it is safe to run on every startup. The uniqueness rules
//! the pipeline relies on live here as constraints: one telemetry row per
//! `(device_id, sensor_id, ts, seq)` and one open alert per sensor.

use anyhow::{Context, Result};
use sqlx::PgPool;

const STATEMENTS: [(&str, &str); 4] = [
    (
        "telemetry",
        r#"
        CREATE TABLE IF NOT EXISTS telemetry (
            device_id    TEXT             NOT NULL,
            sensor_id    TEXT             NOT NULL,
            ts           TIMESTAMPTZ      NOT NULL,
            seq          BIGINT           NOT NULL CHECK (seq >= 0),
            sensor_type  TEXT             NOT NULL,
            value_type   TEXT             NOT NULL,
            value_num    DOUBLE PRECISION,
            value_bool   BOOLEAN,
            value_text   TEXT,
            unit         TEXT,
            location     TEXT,
            ingested_at  TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
            PRIMARY KEY (device_id, sensor_id, ts, seq),
            CHECK (num_nonnulls(value_num, value_bool, value_text) = 1)
        );
        "#,
    ),
    (
        "alert_triggers",
        r#"
        CREATE TABLE IF NOT EXISTS alert_triggers (
            id          UUID             PRIMARY KEY,
            device_id   TEXT             NOT NULL,
            sensor_id   TEXT             NOT NULL,
            min_value   DOUBLE PRECISION,
            max_value   DOUBLE PRECISION,
            enabled     BOOLEAN          NOT NULL DEFAULT true,
            updated_at  TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
            UNIQUE (device_id, sensor_id),
            CHECK (min_value IS NOT NULL OR max_value IS NOT NULL)
        );
        "#,
    ),
    (
        "alerts",
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id          UUID         PRIMARY KEY,
            trigger_id  UUID         NOT NULL,
            device_id   TEXT         NOT NULL,
            sensor_id   TEXT         NOT NULL,
            start_ts    TIMESTAMPTZ  NOT NULL,
            end_ts      TIMESTAMPTZ,
            reason      TEXT         NOT NULL,
            context     JSONB        NOT NULL,
            created_at  TIMESTAMPTZ  NOT NULL DEFAULT NOW()
        );
        "#,
    ),
    (
        "alerts_one_open_per_sensor",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS alerts_one_open_per_sensor
            ON alerts (device_id, sensor_id)
            WHERE end_ts IS NULL;
        "#,
    ),
];

pub async fn create_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Error creating {}", name))?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_create_schema_is_idempotent(pool: PgPool) {
        create_schema(&pool).await.unwrap();
        create_schema(&pool).await.unwrap();

        let indexes: Vec<(String,)> =
            sqlx::query_as("SELECT indexname::text FROM pg_indexes WHERE tablename = 'alerts'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert!(indexes.iter().any(|(name,)| name == "alerts_one_open_per_sensor"));
    }
}
