use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;

/// A pipeline stage this process runs. Each role consumes its own topic
/// under its own consumer group.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dispatcher,
    Timeseries,
    Archive,
    Alerts,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Dispatcher, Role::Timeseries, Role::Archive, Role::Alerts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dispatcher => "dispatcher",
            Role::Timeseries => "timeseries",
            Role::Archive => "archive",
            Role::Alerts => "alerts",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Role::ALL.iter().find(|r| r.as_str() == s) {
            Some(role) => Ok(*role),
            None => bail!("Unknown service role '{}'", s),
        }
    }
}

pub fn parse_roles(raw: &str) -> Result<Vec<Role>> {
    let mut roles = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let role: Role = name.parse()?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    if roles.is_empty() {
        bail!("SERVICE_ROLES must name at least one role");
    }
    Ok(roles)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_ingest_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub queue_timeseries_topic: String,
    pub queue_archive_topic: String,
    pub queue_alerts_topic: String,
    pub batch_max_size: usize,
    pub batch_linger_ms: u64,
    pub retry_delay_ms: u64,
    pub dispatch_concurrency: usize,
    pub archive_concurrency: usize,
    pub archive_root: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_bootstrap_schema: bool,
    pub roles: Vec<Role>,
    pub log_level: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let kafka_bootstrap_servers = var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        let kafka_ingest_topic = var_or("KAFKA_INGEST_TOPIC", "telemetry-ingest");
        let kafka_group_id = var_or("KAFKA_GROUP_ID", "telemetry-fanout");
        let kafka_auto_offset_reset = var_or("KAFKA_AUTO_OFFSET_RESET", "earliest");
        let kafka_sasl_mechanism = var_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256");
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol = var_or("KAFKA_SECURITY_PROTOCOL", "PLAINTEXT");
        let kafka_max_retries = parsed_or("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = parsed_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        let queue_timeseries_topic = var_or("QUEUE_TIMESERIES_TOPIC", "telemetry-timeseries");
        let queue_archive_topic = var_or("QUEUE_ARCHIVE_TOPIC", "telemetry-archive");
        let queue_alerts_topic = var_or("QUEUE_ALERTS_TOPIC", "telemetry-alerts");

        let batch_max_size = parsed_or("BATCH_MAX_SIZE", 100);
        let batch_linger_ms = parsed_or("BATCH_LINGER_MS", 250);
        let retry_delay_ms = parsed_or("RETRY_DELAY_MS", 1000);
        let dispatch_concurrency = parsed_or("DISPATCH_CONCURRENCY", 32);
        let archive_concurrency = parsed_or("ARCHIVE_CONCURRENCY", 8);
        let archive_root = var_or("ARCHIVE_ROOT", "./archive");

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "telemetry");
        let db_user = var_or("DB_USER", "telemetry");
        let db_pwd = var_or("DB_PWD", "telemetry");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );
        let db_max_connections = parsed_or("DB_MAX_CONNECTIONS", 20);
        let db_bootstrap_schema = parsed_or("DB_BOOTSTRAP_SCHEMA", true);

        let roles = parse_roles(&var_or("SERVICE_ROLES", "dispatcher,timeseries,archive,alerts"))?;
        let log_level = var_or("LOG_LEVEL", "info");

        let config = Self {
            kafka_bootstrap_servers,
            kafka_ingest_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            queue_timeseries_topic,
            queue_archive_topic,
            queue_alerts_topic,
            batch_max_size,
            batch_linger_ms,
            retry_delay_ms,
            dispatch_concurrency,
            archive_concurrency,
            archive_root,
            database_url,
            db_max_connections,
            db_bootstrap_schema,
            roles,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_max_size == 0 {
            bail!("BATCH_MAX_SIZE must be greater than zero");
        }
        if self.dispatch_concurrency == 0 || self.archive_concurrency == 0 {
            bail!("DISPATCH_CONCURRENCY and ARCHIVE_CONCURRENCY must be greater than zero");
        }
        if self.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than zero");
        }
        if self.kafka_max_retries == 0 {
            bail!("KAFKA_MAX_RETRIES must be greater than zero");
        }
        if self.roles.contains(&Role::Archive) && self.archive_root.trim().is_empty() {
            bail!("ARCHIVE_ROOT is required for the archive role");
        }
        Ok(())
    }

    /// Topic a role consumes from.
    pub fn source_topic(&self, role: Role) -> &str {
        match role {
            Role::Dispatcher => &self.kafka_ingest_topic,
            Role::Timeseries => &self.queue_timeseries_topic,
            Role::Archive => &self.queue_archive_topic,
            Role::Alerts => &self.queue_alerts_topic,
        }
    }

    pub fn needs_database(&self) -> bool {
        self.roles
            .iter()
            .any(|r| matches!(r, Role::Timeseries | Role::Alerts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roles() {
        assert_eq!(
            parse_roles(" dispatcher, alerts ,dispatcher").unwrap(),
            vec![Role::Dispatcher, Role::Alerts]
        );
        assert!(parse_roles("dispatcher,metrics").is_err());
        assert!(parse_roles(" , ").is_err());
    }
}
