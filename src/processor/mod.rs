pub mod alert_evaluator;
pub mod archive_writer;
pub mod dispatcher;
pub mod normalizer;
pub mod timeseries_writer;
pub mod validator;

use tracing::warn;
use validator::Validated;

/// Normalizes and validates a raw batch at a stage boundary. Rejected items
/// are logged and handed back, never raised.
pub fn decode_batch(stage: &str, batch: &[Vec<u8>]) -> Validated {
    let validated = validator::validate_batch(normalizer::normalize_batch(batch));

    for rejected in &validated.bad {
        let issues: Vec<String> = rejected
            .issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect();
        warn!(
            "[{}] Rejected telemetry payload {}: {}",
            stage,
            rejected.payload,
            issues.join("; ")
        );
    }

    validated
}
