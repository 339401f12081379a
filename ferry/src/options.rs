//! [`Options`]: the `clap::Parser` struct that is the single source of
//! CLI/env configuration (spec.md §6), modelled on the teacher's
//! `readyset::Options`. An optional `--config` TOML file is merged
//! underneath whatever the CLI/env supplied — CLI/env always wins.

use std::path::PathBuf;

use clap::Parser;
use database_utils::{DatabaseConfig, TlsConfig};
use ferry_server::FerryConfig;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "ferry", about = "Online table-copy pipeline between two MySQL databases")]
pub struct Options {
    /// Path to a TOML file providing defaults for any flag not given on
    /// the command line or through its environment variable.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "SOURCE_HOST")]
    source_host: Option<String>,
    #[arg(long, env = "SOURCE_PORT")]
    source_port: Option<u16>,
    #[arg(long, env = "SOURCE_USER")]
    source_user: Option<String>,
    #[arg(long, env = "SOURCE_PASS", hide_env_values = true)]
    source_pass: Option<String>,
    #[arg(long, env = "SOURCE_TLS")]
    source_tls: bool,
    #[arg(long, env = "SOURCE_TLS_CA_CERT")]
    source_tls_ca_cert: Option<String>,

    #[arg(long, env = "TARGET_HOST")]
    target_host: Option<String>,
    #[arg(long, env = "TARGET_PORT")]
    target_port: Option<u16>,
    #[arg(long, env = "TARGET_USER")]
    target_user: Option<String>,
    #[arg(long, env = "TARGET_PASS", hide_env_values = true)]
    target_pass: Option<String>,
    #[arg(long, env = "TARGET_TLS")]
    target_tls: bool,
    #[arg(long, env = "TARGET_TLS_CA_CERT")]
    target_tls_ca_cert: Option<String>,

    /// Fully-qualified `schema.table` entries. May also be supplied (and
    /// combined with) an `applicable_tables` array in the `--config` file.
    #[arg(long = "applicable-table", env = "APPLICABLE_TABLES", value_delimiter = ',')]
    applicable_tables: Vec<String>,

    #[arg(long, env = "SERVER_BIND_ADDR")]
    server_bind_addr: Option<String>,
    #[arg(long, env = "WEB_BASEDIR")]
    web_basedir: Option<String>,
    /// Set the operator cutover flag at startup instead of waiting for an
    /// interactive dashboard (the dashboard itself is out of scope here).
    #[arg(long, env = "AUTOMATIC_CUTOVER")]
    automatic_cutover: bool,

    #[arg(long, env = "MAX_WRITE_RETRIES_ON_TARGET_DB_ERROR")]
    max_write_retries_on_target_db_error: Option<u32>,
    #[arg(long, env = "MAX_BINLOG_CONNECT_RETRIES")]
    max_binlog_connect_retries: Option<u32>,
    #[arg(long, env = "ITERATOR_BATCH_SIZE")]
    iterator_batch_size: Option<u64>,
    #[arg(long, env = "ITERATOR_WORKERS")]
    iterator_workers: Option<usize>,
    #[arg(long, env = "THROTTLER_LAG_HIGH_WATER_SECS")]
    throttler_lag_high_water_secs: Option<u64>,
    #[arg(long, env = "THROTTLER_LAG_LOW_WATER_SECS")]
    throttler_lag_low_water_secs: Option<u64>,
    #[arg(long, env = "THROTTLER_CHECK_INTERVAL_SECS")]
    throttler_check_interval_secs: Option<u64>,

    #[arg(long, env = "STATE_DUMP_PATH")]
    state_dump_path: Option<PathBuf>,
    #[arg(long, env = "SERVER_ID")]
    server_id: Option<u32>,

    /// Default level passed to `tracing_subscriber::EnvFilter` when
    /// `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Mirrors [`Options`]' configurable fields so a `--config` TOML file can
/// supply any subset of them. Connection details are nested under
/// `[source]`/`[target]` tables; everything else is top-level.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    source: FileEndpoint,
    #[serde(default)]
    target: FileEndpoint,
    #[serde(default)]
    applicable_tables: Vec<String>,
    server_bind_addr: Option<String>,
    web_basedir: Option<String>,
    automatic_cutover: Option<bool>,
    max_write_retries_on_target_db_error: Option<u32>,
    max_binlog_connect_retries: Option<u32>,
    iterator_batch_size: Option<u64>,
    iterator_workers: Option<usize>,
    throttler_lag_high_water_secs: Option<u64>,
    throttler_lag_low_water_secs: Option<u64>,
    throttler_check_interval_secs: Option<u64>,
    state_dump_path: Option<PathBuf>,
    server_id: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileEndpoint {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    pass: Option<String>,
    database: Option<String>,
    #[serde(default)]
    tls: bool,
    tls_ca_cert: Option<String>,
}

impl Options {
    /// Merge the `--config` overlay (if any) underneath the CLI/env
    /// values and validate the result into a [`FerryConfig`].
    pub fn into_ferry_config(self) -> anyhow::Result<FerryConfig> {
        let file = match &self.config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading --config {}: {e}", path.display()))?;
                toml::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("parsing --config {}: {e}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let source = endpoint(
            self.source_host,
            self.source_port,
            self.source_user,
            self.source_pass,
            self.source_tls,
            self.source_tls_ca_cert,
            file.source,
            "source",
        )?;
        let target = endpoint(
            self.target_host,
            self.target_port,
            self.target_user,
            self.target_pass,
            self.target_tls,
            self.target_tls_ca_cert,
            file.target,
            "target",
        )?;

        let applicable_tables = if self.applicable_tables.is_empty() {
            file.applicable_tables
        } else {
            self.applicable_tables
        };
        if applicable_tables.is_empty() {
            anyhow::bail!("at least one --applicable-table is required");
        }

        let state_dump_path = self
            .state_dump_path
            .or(file.state_dump_path)
            .unwrap_or_else(|| PathBuf::from("/tmp/ferry-state-dump.yaml"));

        Ok(FerryConfig {
            source,
            target,
            applicable_tables,
            server_bind_addr: self
                .server_bind_addr
                .or(file.server_bind_addr)
                .unwrap_or_else(|| "0.0.0.0:8090".to_string()),
            web_basedir: self.web_basedir.or(file.web_basedir),
            automatic_cutover: self.automatic_cutover || file.automatic_cutover.unwrap_or(false),
            max_write_retries_on_target_db_error: self
                .max_write_retries_on_target_db_error
                .or(file.max_write_retries_on_target_db_error)
                .unwrap_or(5),
            max_binlog_connect_retries: self
                .max_binlog_connect_retries
                .or(file.max_binlog_connect_retries)
                .unwrap_or(10),
            iterator_batch_size: self
                .iterator_batch_size
                .or(file.iterator_batch_size)
                .unwrap_or(500),
            iterator_workers: self.iterator_workers.or(file.iterator_workers).unwrap_or(4),
            throttler_lag_high_water_secs: self
                .throttler_lag_high_water_secs
                .or(file.throttler_lag_high_water_secs)
                .unwrap_or(10),
            throttler_lag_low_water_secs: self
                .throttler_lag_low_water_secs
                .or(file.throttler_lag_low_water_secs)
                .unwrap_or(1),
            throttler_check_interval_secs: self
                .throttler_check_interval_secs
                .or(file.throttler_check_interval_secs)
                .unwrap_or(1),
            state_dump_path,
            log_level: Some(self.log_level),
            server_id: self.server_id.or(file.server_id),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn endpoint(
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    pass: Option<String>,
    tls: bool,
    tls_ca_cert: Option<String>,
    file: FileEndpoint,
    label: &str,
) -> anyhow::Result<DatabaseConfig> {
    Ok(DatabaseConfig {
        host: host
            .or(file.host)
            .ok_or_else(|| anyhow::anyhow!("--{label}-host is required (or [{label}] host in --config)"))?,
        port: port.or(file.port).unwrap_or(3306),
        user: user
            .or(file.user)
            .ok_or_else(|| anyhow::anyhow!("--{label}-user is required (or [{label}] user in --config)"))?,
        pass: pass.or(file.pass).unwrap_or_default(),
        database: file.database,
        tls: TlsConfig {
            enabled: tls || file.tls,
            ca_cert_path: tls_ca_cert.or(file.tls_ca_cert),
        },
    })
}
