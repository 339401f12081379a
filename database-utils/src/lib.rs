//! Connection pools and TLS material for the source and target databases.
//!
//! Source and target each get their own [`DatabaseConfig`] and therefore
//! their own [`native_tls::TlsConnector`] — the two are never derived from
//! one another. An earlier draft of this pipeline's design conflated
//! "source TLS" and "target TLS" configuration in one place; that bug is
//! called out in the design notes and is asserted against in
//! [`tests::source_and_target_tls_are_independent`].

use std::time::Duration;

use ferry_errors::{config_err, FerryError};
use ferry_util::Redacted;
use mysql_async::{Opts, OptsBuilder, Pool, SslOpts};
use serde::Deserialize;
use tracing::debug;

/// How long to wait for a new connection before treating the endpoint as
/// unreachable during `Ferry::initialize`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TLS material for one endpoint (source or target). Always constructed
/// independently per endpoint — see the module docs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// Require a TLS connection; if the endpoint doesn't support it,
    /// `DatabaseConfig::connect` fails with `FerryError::Config`.
    pub enabled: bool,
    /// PEM-encoded CA certificate used to verify the server, if not using
    /// the system trust store.
    pub ca_cert_path: Option<String>,
}

/// Connection parameters for one endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub pass: String,
    pub database: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl DatabaseConfig {
    fn ssl_opts(&self) -> Option<SslOpts> {
        if !self.tls.enabled {
            return None;
        }
        let mut opts = SslOpts::default();
        if let Some(ca) = &self.tls.ca_cert_path {
            opts = opts.with_root_cert_path(Some(std::path::PathBuf::from(ca)));
        }
        Some(opts)
    }

    /// The raw driver options for this endpoint, e.g. for the
    /// `BinlogStreamer`'s direct `mysql_async::Conn` (it can't use a
    /// pooled connection, since it registers as a replica for the
    /// connection's lifetime).
    pub fn opts(&self) -> Opts {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.pass.clone()))
            .ssl_opts(self.ssl_opts());
        if let Some(db) = &self.database {
            builder = builder.db_name(Some(db.clone()));
        }
        builder.into()
    }

    /// Open a connection pool and verify connectivity with a cheap status
    /// query, per `Ferry::initialize`'s contract.
    pub async fn connect(&self) -> Result<Pool, FerryError> {
        let pool = Pool::new(self.opts());
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, pool.get_conn())
            .await
            .map_err(|_| FerryError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| config_err(format!("connecting to {}", self.redacted_host()), e))?;

        use mysql_async::prelude::Queryable;
        let _: Option<String> = conn
            .query_first("SELECT 1")
            .await
            .map_err(|e| config_err(format!("status query against {}", self.redacted_host()), e))?;

        debug!(host = %self.host, port = self.port, "connected");
        Ok(pool)
    }

    fn redacted_host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The password, wrapped so it never appears in a `Debug` impl by
    /// accident if this struct grows a derive later.
    pub fn redacted_pass(&self) -> Redacted {
        Redacted::new(self.pass.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tls: bool) -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            pass: "".into(),
            database: None,
            tls: TlsConfig {
                enabled: tls,
                ca_cert_path: None,
            },
        }
    }

    #[test]
    fn source_and_target_tls_are_independent() {
        let source = config(true);
        let target = config(false);
        assert!(source.ssl_opts().is_some());
        assert!(target.ssl_opts().is_none());
    }
}
