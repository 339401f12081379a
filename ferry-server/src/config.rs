//! `FerryConfig`: the validated configuration surface `Ferry::initialize`
//! consumes (spec.md §6). Parsing CLI/env/TOML into this struct is the
//! `ferry` binary crate's job (`ferry::Options`); this struct is what
//! survives that and is what the core actually touches.

use std::path::PathBuf;
use std::time::Duration;

use database_utils::DatabaseConfig;
use ferry_common::TableIdentity;
use ferry_errors::FerryError;
use serde::Deserialize;

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_max_write_retries() -> u32 {
    5
}

fn default_max_binlog_retries() -> u32 {
    10
}

fn default_batch_size() -> u64 {
    500
}

fn default_workers() -> usize {
    4
}

fn default_lag_high_water_secs() -> u64 {
    10
}

fn default_lag_low_water_secs() -> u64 {
    1
}

fn default_check_interval_secs() -> u64 {
    1
}

/// Everything the core needs, already validated: connection parameters for
/// both endpoints, which tables to copy, and the tunables spec.md §6
/// enumerates.
#[derive(Debug, Clone, Deserialize)]
pub struct FerryConfig {
    pub source: DatabaseConfig,
    pub target: DatabaseConfig,

    /// Tables to copy, as fully-qualified `schema.table` strings.
    pub applicable_tables: Vec<String>,

    #[serde(default = "default_bind_addr")]
    pub server_bind_addr: String,
    #[serde(default)]
    pub web_basedir: Option<String>,
    #[serde(default)]
    pub automatic_cutover: bool,

    #[serde(default = "default_max_write_retries")]
    pub max_write_retries_on_target_db_error: u32,
    #[serde(default = "default_max_binlog_retries")]
    pub max_binlog_connect_retries: u32,

    #[serde(default = "default_batch_size")]
    pub iterator_batch_size: u64,
    #[serde(default = "default_workers")]
    pub iterator_workers: usize,

    #[serde(default = "default_lag_high_water_secs")]
    pub throttler_lag_high_water_secs: u64,
    #[serde(default = "default_lag_low_water_secs")]
    pub throttler_lag_low_water_secs: u64,
    #[serde(default = "default_check_interval_secs")]
    pub throttler_check_interval_secs: u64,

    pub state_dump_path: PathBuf,

    #[serde(default)]
    pub log_level: Option<String>,

    /// Unique replica `server_id` to register the `BinlogStreamer` with;
    /// left unset, it falls back to a fixed high sentinel value unlikely
    /// to collide with real replicas (see `replicators::BinlogStreamer`).
    #[serde(default)]
    pub server_id: Option<u32>,
}

impl FerryConfig {
    pub fn table_identities(&self) -> Result<Vec<TableIdentity>, FerryError> {
        self.applicable_tables
            .iter()
            .map(|qualified| {
                qualified
                    .split_once('.')
                    .map(|(schema, table)| TableIdentity::new(schema, table))
                    .ok_or_else(|| {
                        FerryError::Config(format!(
                            "applicable table {qualified:?} must be schema.table qualified"
                        ))
                    })
            })
            .collect()
    }

    pub fn throttler_lag_high_water(&self) -> Duration {
        Duration::from_secs(self.throttler_lag_high_water_secs)
    }

    pub fn throttler_lag_low_water(&self) -> Duration {
        Duration::from_secs(self.throttler_lag_low_water_secs)
    }

    pub fn throttler_check_interval(&self) -> Duration {
        Duration::from_secs(self.throttler_check_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FerryConfig {
        FerryConfig {
            source: DatabaseConfig {
                host: "source".into(),
                port: 3306,
                user: "root".into(),
                pass: "".into(),
                database: None,
                tls: Default::default(),
            },
            target: DatabaseConfig {
                host: "target".into(),
                port: 3306,
                user: "root".into(),
                pass: "".into(),
                database: None,
                tls: Default::default(),
            },
            applicable_tables: vec!["app.users".into()],
            server_bind_addr: default_bind_addr(),
            web_basedir: None,
            automatic_cutover: false,
            max_write_retries_on_target_db_error: default_max_write_retries(),
            max_binlog_connect_retries: default_max_binlog_retries(),
            iterator_batch_size: default_batch_size(),
            iterator_workers: default_workers(),
            throttler_lag_high_water_secs: default_lag_high_water_secs(),
            throttler_lag_low_water_secs: default_lag_low_water_secs(),
            throttler_check_interval_secs: default_check_interval_secs(),
            state_dump_path: PathBuf::from("/tmp/ferry-state-dump.yaml"),
            log_level: None,
            server_id: None,
        }
    }

    #[test]
    fn table_identities_splits_on_the_first_dot() {
        let identities = config().table_identities().unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].schema, "app");
        assert_eq!(identities[0].table, "users");
    }

    #[test]
    fn unqualified_table_name_is_a_config_error() {
        let mut cfg = config();
        cfg.applicable_tables = vec!["users".into()];
        assert!(matches!(cfg.table_identities(), Err(FerryError::Config(_))));
    }
}
