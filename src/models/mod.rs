pub mod alert;
pub mod telemetry;
pub mod telemetry_row;
