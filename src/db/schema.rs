use tokio::process::Command;

use crate::db::connection::{ConnectionParams, Engine};
use crate::error::{Error, Result};

/// Computed-once cell for the schema DDL, owned by a `Connection` and
/// invalidated only when the connection itself is replaced. Stays empty on
/// a failed dump so the next call retries.
#[derive(Debug, Default)]
pub(crate) struct SchemaCache {
    text: Option<String>,
}

impl SchemaCache {
    pub(crate) fn get(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Memoizing accessor: `produce` runs only when the cell is empty, and
    /// the cell stays empty when `produce` fails.
    pub(crate) async fn get_or_fill<F, Fut>(&mut self, produce: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        if let Some(text) = self.text.as_deref() {
            return Ok(text.to_string());
        }
        let text = produce().await?;
        Ok(self.text.insert(text).clone())
    }
}

/// A fully-built dump invocation: program, argument vector, and child
/// environment. The password travels through the environment rather than the
/// command line, and arguments are passed as a vector, never a shell string.
#[derive(Debug, PartialEq)]
pub struct DumpCommand {
    pub program: &'static str,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
}

pub fn dump_command(params: &ConnectionParams) -> DumpCommand {
    match params.engine {
        Engine::Postgres => DumpCommand {
            program: "pg_dump",
            args: vec![
                "--schema-only".into(),
                "--host".into(),
                params.host.clone(),
                "--port".into(),
                params.port.to_string(),
                "--username".into(),
                params.username.clone(),
                params.database.clone(),
            ],
            env: vec![("PGPASSWORD", params.password.clone())],
        },
        Engine::Mysql => DumpCommand {
            program: "mysqldump",
            args: vec![
                "--no-data".into(),
                "--host".into(),
                params.host.clone(),
                "--port".into(),
                params.port.to_string(),
                "--user".into(),
                params.username.clone(),
                params.database.clone(),
            ],
            env: vec![("MYSQL_PWD", params.password.clone())],
        },
    }
}

/// Run the engine's schema-dump utility and capture its stdout. A non-zero
/// exit is a hard failure carrying the process's stderr text.
pub(crate) async fn dump_schema(params: &ConnectionParams) -> Result<String> {
    let command = dump_command(params);
    tracing::debug!(program = command.program, "extracting schema");

    let output = Command::new(command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (*k, v.as_str())))
        .output()
        .await
        .map_err(|e| {
            Error::SchemaExtraction(format!("failed to run {}: {e}", command.program))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::SchemaExtraction(format!(
            "{} exited with {}: {}",
            command.program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(engine: Engine) -> ConnectionParams {
        ConnectionParams {
            engine,
            host: "db.internal".into(),
            port: 5433,
            database: "shop".into(),
            username: "app".into(),
            password: "hunter2".into(),
        }
    }

    #[test]
    fn test_postgres_dump_command() {
        let command = dump_command(&params(Engine::Postgres));
        assert_eq!(command.program, "pg_dump");
        assert!(command.args.contains(&"--schema-only".to_string()));
        assert_eq!(command.args.last().unwrap(), "shop");
        assert_eq!(command.env, vec![("PGPASSWORD", "hunter2".to_string())]);
    }

    #[test]
    fn test_mysql_dump_command() {
        let command = dump_command(&params(Engine::Mysql));
        assert_eq!(command.program, "mysqldump");
        assert!(command.args.contains(&"--no-data".to_string()));
        assert!(command.args.contains(&"5433".to_string()));
        assert_eq!(command.env, vec![("MYSQL_PWD", "hunter2".to_string())]);
    }

    #[test]
    fn test_password_never_on_command_line() {
        for engine in [Engine::Postgres, Engine::Mysql] {
            let command = dump_command(&params(engine));
            assert!(!command.args.iter().any(|a| a.contains("hunter2")));
        }
    }

    #[tokio::test]
    async fn test_schema_dump_runs_at_most_once() {
        let mut cache = SchemaCache::default();
        assert!(cache.get().is_none());

        let dump_invocations = std::cell::Cell::new(0);
        for _ in 0..3 {
            let text = cache
                .get_or_fill(|| async {
                    dump_invocations.set(dump_invocations.get() + 1);
                    Ok("CREATE TABLE orders (id int);".to_string())
                })
                .await
                .unwrap();
            assert_eq!(text, "CREATE TABLE orders (id int);");
        }

        assert_eq!(dump_invocations.get(), 1);
        assert_eq!(cache.get(), Some("CREATE TABLE orders (id int);"));
    }

    #[tokio::test]
    async fn test_failed_dump_leaves_cache_empty_for_retry() {
        let mut cache = SchemaCache::default();

        let outcome = cache
            .get_or_fill(|| async {
                Err(Error::SchemaExtraction("pg_dump exited with 1".into()))
            })
            .await;
        assert!(outcome.is_err());
        assert!(cache.get().is_none());

        let text = cache
            .get_or_fill(|| async { Ok("CREATE TABLE orders (id int);".to_string()) })
            .await
            .unwrap();
        assert_eq!(text, "CREATE TABLE orders (id int);");
    }
}
