use mysql_async::prelude::Queryable;
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

use crate::db::schema::{self, SchemaCache};
use crate::error::{Error, Result};

/// Supported database engines. Each variant carries the engine-specific
/// pieces the pipeline needs: the explain dialect, the schema-dump utility,
/// and any session setup issued at connect time. Adding an engine means
/// adding a variant here, not touching call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Mysql,
    Postgres,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Mysql => "mysql",
            Engine::Postgres => "postgres",
        }
    }

    /// Wrap a statement in this engine's "explain analyze" dialect.
    /// PostgreSQL's EXPLAIN ANALYZE and MySQL's FORMAT=TREE both produce a
    /// single text column, one plan line per row.
    pub fn explain_statement(&self, sql: &str) -> String {
        match self {
            Engine::Postgres => format!("EXPLAIN ANALYZE {sql}"),
            Engine::Mysql => format!("EXPLAIN FORMAT=TREE {sql}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl ConnectionParams {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Configuration(
                "database host must be a non-empty string".into(),
            ));
        }
        if self.port == 0 {
            return Err(Error::Configuration(
                "database port must be between 1 and 65535".into(),
            ));
        }
        if self.database.is_empty() {
            return Err(Error::Configuration(
                "database name must be a non-empty string".into(),
            ));
        }
        Ok(())
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    fn postgres_conn_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
        )
    }
}

/// One live backend session. Created on demand by [`Connection::open`],
/// dropped exactly once by its owner; there is no pooling and no implicit
/// reconnection.
pub struct Connection {
    pub(crate) params: ConnectionParams,
    pub(crate) backend: Backend,
    pub(crate) schema: SchemaCache,
}

pub(crate) enum Backend {
    Postgres(tokio_postgres::Client),
    Mysql(mysql_async::Conn),
}

impl Connection {
    /// Open a session against the configured engine. Network or auth
    /// failures surface as `Error::Connection`. MySQL sessions get query
    /// profiling enabled once, here, so later plan inspection can use
    /// profiling data.
    pub async fn open(params: ConnectionParams) -> Result<Connection> {
        let backend = match params.engine {
            Engine::Postgres => {
                let (client, connection) =
                    tokio_postgres::connect(&params.postgres_conn_string(), NoTls)
                        .await
                        .map_err(|e| {
                            Error::Connection(format!("failed to connect to PostgreSQL: {e}"))
                        })?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!("postgres connection error: {e}");
                    }
                });
                Backend::Postgres(client)
            }
            Engine::Mysql => {
                let opts = mysql_async::OptsBuilder::default()
                    .ip_or_hostname(params.host.clone())
                    .tcp_port(params.port)
                    .db_name(Some(params.database.clone()))
                    .user(Some(params.username.clone()))
                    .pass(Some(params.password.clone()));
                let mut conn = mysql_async::Conn::new(opts)
                    .await
                    .map_err(|e| Error::Connection(format!("failed to connect to MySQL: {e}")))?;
                conn.query_drop("SET profiling = 1").await.map_err(|e| {
                    Error::Connection(format!("failed to enable session profiling: {e}"))
                })?;
                Backend::Mysql(conn)
            }
        };

        tracing::info!(
            engine = params.engine.as_str(),
            target = %params.display_string(),
            "connected to database"
        );

        Ok(Connection {
            params,
            backend,
            schema: SchemaCache::default(),
        })
    }

    pub fn engine(&self) -> Engine {
        self.params.engine
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Schema-only DDL for the connected database, computed once per
    /// connection by shelling out to the engine's dump utility and cached
    /// for the lifetime of the session. The cache is left empty on failure
    /// so a later call can retry.
    pub async fn schema_text(&mut self) -> Result<String> {
        let params = &self.params;
        self.schema
            .get_or_fill(|| schema::dump_schema(params))
            .await
    }
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}
