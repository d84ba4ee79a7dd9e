use crate::db::{queries, DbPool};
use crate::models::alert::{Alert, AlertContext, AlertTrigger, NewAlert};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug)]
pub enum OpenOutcome {
    Created(Alert),
    /// Another evaluator opened an alert for this sensor first.
    AlreadyOpen,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn enabled_trigger(&self, device_id: &str, sensor_id: &str) -> anyhow::Result<Option<AlertTrigger>>;

    async fn open_alert_for(&self, device_id: &str, sensor_id: &str) -> anyhow::Result<Option<Alert>>;

    /// Closed alert whose `[start_ts, end_ts]` interval contains `ts`.
    async fn closed_alert_covering(
        &self,
        device_id: &str,
        sensor_id: &str,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<Option<Alert>>;

    async fn open_alert(&self, alert: &NewAlert) -> anyhow::Result<OpenOutcome>;

    /// Replaces the context of an open alert, unless the stored
    /// `lastOutOfBoundsTs` is already later than the new one. Returns `false`
    /// if nothing was written.
    async fn update_context(&self, alert_id: Uuid, context: &AlertContext) -> anyhow::Result<bool>;

    /// Closes an open alert at `end_ts`, provided its last violation is not
    /// later than `cutoff`. Returns `false` if nothing was written.
    async fn close_alert(
        &self,
        alert_id: Uuid,
        end_ts: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

pub struct PgAlertStore {
    pool: DbPool,
}

impl PgAlertStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn enabled_trigger(&self, device_id: &str, sensor_id: &str) -> anyhow::Result<Option<AlertTrigger>> {
        let trigger = sqlx::query_as::<_, AlertTrigger>(queries::SELECT_ENABLED_TRIGGER)
            .bind(device_id)
            .bind(sensor_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(trigger)
    }

    async fn open_alert_for(&self, device_id: &str, sensor_id: &str) -> anyhow::Result<Option<Alert>> {
        let alert = sqlx::query_as::<_, Alert>(queries::SELECT_OPEN_ALERT)
            .bind(device_id)
            .bind(sensor_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(alert)
    }

    async fn closed_alert_covering(
        &self,
        device_id: &str,
        sensor_id: &str,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<Option<Alert>> {
        let alert = sqlx::query_as::<_, Alert>(queries::SELECT_CLOSED_ALERT_COVERING)
            .bind(device_id)
            .bind(sensor_id)
            .bind(ts)
            .fetch_optional(&self.pool)
            .await?;
        Ok(alert)
    }

    async fn open_alert(&self, alert: &NewAlert) -> anyhow::Result<OpenOutcome> {
        let created = sqlx::query_as::<_, Alert>(queries::INSERT_OPEN_ALERT)
            .bind(alert.id)
            .bind(alert.trigger_id)
            .bind(&alert.device_id)
            .bind(&alert.sensor_id)
            .bind(alert.start_ts)
            .bind(&alert.reason)
            .bind(Json(&alert.context))
            .fetch_optional(&self.pool)
            .await?;

        Ok(match created {
            Some(alert) => OpenOutcome::Created(alert),
            None => OpenOutcome::AlreadyOpen,
        })
    }

    async fn update_context(&self, alert_id: Uuid, context: &AlertContext) -> anyhow::Result<bool> {
        let result = sqlx::query(queries::UPDATE_ALERT_CONTEXT)
            .bind(alert_id)
            .bind(Json(context))
            .bind(context.last_out_of_bounds_ts)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn close_alert(
        &self,
        alert_id: Uuid,
        end_ts: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(queries::CLOSE_ALERT)
            .bind(alert_id)
            .bind(end_ts)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_schema;
    use chrono::Duration;

    const T: &str = "2024-03-01T08:00:00Z";

    fn t(minutes: i64) -> DateTime<Utc> {
        T.parse::<DateTime<Utc>>().unwrap() + Duration::minutes(minutes)
    }

    fn new_alert(start: DateTime<Utc>) -> NewAlert {
        NewAlert {
            id: Uuid::new_v4(),
            trigger_id: Uuid::new_v4(),
            device_id: "pi-01".to_string(),
            sensor_id: "cpu-temp".to_string(),
            start_ts: start,
            reason: "value 72 above max 70".to_string(),
            context: AlertContext {
                last_value: 72.0,
                min_value: None,
                max_value: Some(70.0),
                last_out_of_bounds_ts: start,
            },
        }
    }

    async fn store(pool: DbPool) -> PgAlertStore {
        create_schema(&pool).await.unwrap();
        PgAlertStore::new(pool)
    }

    fn created(outcome: OpenOutcome) -> Alert {
        match outcome {
            OpenOutcome::Created(alert) => alert,
            OpenOutcome::AlreadyOpen => panic!("expected a new alert"),
        }
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_one_open_alert_per_sensor(pool: sqlx::PgPool) {
        let store = store(pool).await;

        let first = created(store.open_alert(&new_alert(t(0))).await.unwrap());
        assert!(matches!(
            store.open_alert(&new_alert(t(1))).await.unwrap(),
            OpenOutcome::AlreadyOpen
        ));
        assert_eq!(
            store.open_alert_for("pi-01", "cpu-temp").await.unwrap().unwrap().id,
            first.id
        );

        assert!(store.close_alert(first.id, t(11), t(1)).await.unwrap());
        assert!(!store.close_alert(first.id, t(12), t(2)).await.unwrap());

        let second = created(store.open_alert(&new_alert(t(20))).await.unwrap());
        assert_ne!(second.id, first.id);
        assert_eq!(second.context.max_value, Some(70.0));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_closed_alert_covering(pool: sqlx::PgPool) {
        let store = store(pool).await;
        let alert = created(store.open_alert(&new_alert(t(0))).await.unwrap());
        store.close_alert(alert.id, t(16), t(6)).await.unwrap();

        let inside = store.closed_alert_covering("pi-01", "cpu-temp", t(16)).await.unwrap();
        assert_eq!(inside.map(|a| a.id), Some(alert.id));
        assert!(store
            .closed_alert_covering("pi-01", "cpu-temp", t(17))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .closed_alert_covering("pi-02", "cpu-temp", t(5))
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_updates_never_rewind_or_close_early(pool: sqlx::PgPool) {
        let store = store(pool).await;
        let alert = created(store.open_alert(&new_alert(t(0))).await.unwrap());

        let mut context = alert.context.0.clone();
        context.last_out_of_bounds_ts = t(6);
        assert!(store.update_context(alert.id, &context).await.unwrap());

        // a slower evaluator holding an older sample
        context.last_out_of_bounds_ts = t(2);
        assert!(!store.update_context(alert.id, &context).await.unwrap());

        // legal sample at +11 is only 5 minutes after the violation at +6
        assert!(!store.close_alert(alert.id, t(11), t(1)).await.unwrap());

        let current = store.open_alert_for("pi-01", "cpu-temp").await.unwrap().unwrap();
        assert_eq!(current.context.last_out_of_bounds_ts, t(6));
        assert!(store.close_alert(alert.id, t(16), t(6)).await.unwrap());
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs Postgres at DATABASE_URL"]
    async fn test_enabled_trigger(pool: sqlx::PgPool) {
        let store = store(pool.clone()).await;
        sqlx::query(
            "INSERT INTO alert_triggers (id, device_id, sensor_id, max_value, enabled)
             VALUES ($1, 'pi-01', 'cpu-temp', 70, true), ($2, 'pi-01', 'fan', 5000, false)",
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::new_v4())
        .execute(&pool)
        .await
        .unwrap();

        let trigger = store.enabled_trigger("pi-01", "cpu-temp").await.unwrap().unwrap();
        assert_eq!(trigger.max_value, Some(70.0));
        assert_eq!(trigger.min_value, None);
        assert!(store.enabled_trigger("pi-01", "fan").await.unwrap().is_none());
    }
}
