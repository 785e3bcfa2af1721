mod connection;
mod query;
mod schema;

pub use connection::{Connection, ConnectionParams, Engine};
pub use query::{run_query, BoundedQueryResult, QueryOutcome, MAX_RESULT_ROWS};
pub use schema::{dump_command, DumpCommand};
