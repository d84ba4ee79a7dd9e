pub const INSERT_TELEMETRY: &str = r#"
INSERT INTO telemetry (
    device_id, sensor_id, ts, seq, sensor_type, value_type,
    value_num, value_bool, value_text, unit, location
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
ON CONFLICT (device_id, sensor_id, ts, seq) DO NOTHING;
"#;

pub const SELECT_ENABLED_TRIGGER: &str = r#"
SELECT id, device_id, sensor_id, min_value, max_value, enabled
FROM alert_triggers
WHERE device_id = $1 AND sensor_id = $2 AND enabled = true;
"#;

pub const SELECT_OPEN_ALERT: &str = r#"
SELECT id, trigger_id, device_id, sensor_id, start_ts, end_ts, reason, context
FROM alerts
WHERE device_id = $1 AND sensor_id = $2 AND end_ts IS NULL;
"#;

// Loses silently against a concurrent opener; the caller re-reads.
pub const INSERT_OPEN_ALERT: &str = r#"
INSERT INTO alerts (id, trigger_id, device_id, sensor_id, start_ts, end_ts, reason, context)
VALUES ($1, $2, $3, $4, $5, NULL, $6, $7)
ON CONFLICT (device_id, sensor_id) WHERE end_ts IS NULL DO NOTHING
RETURNING id, trigger_id, device_id, sensor_id, start_ts, end_ts, reason, context;
"#;

pub const SELECT_CLOSED_ALERT_COVERING: &str = r#"
SELECT id, trigger_id, device_id, sensor_id, start_ts, end_ts, reason, context
FROM alerts
WHERE device_id = $1 AND sensor_id = $2
  AND end_ts IS NOT NULL
  AND start_ts <= $3 AND end_ts >= $3
ORDER BY start_ts DESC
LIMIT 1;
"#;

// lastOutOfBoundsTs never moves backwards, whoever wrote it last
pub const UPDATE_ALERT_CONTEXT: &str = r#"
UPDATE alerts
SET context = $2
WHERE id = $1
  AND end_ts IS NULL
  AND (context->>'lastOutOfBoundsTs')::timestamptz <= $3;
"#;

// $3 is the latest violation time that still allows closing at $2
pub const CLOSE_ALERT: &str = r#"
UPDATE alerts
SET end_ts = $2
WHERE id = $1
  AND end_ts IS NULL
  AND (context->>'lastOutOfBoundsTs')::timestamptz <= $3;
"#;
