use comfy_table::{modifiers, presets, Table};
use std::io::{self, BufRead, Write};

use crate::config::Config;
use crate::db::{run_query, BoundedQueryResult, Connection, MAX_RESULT_ROWS};
use crate::llm::{parse_advice, AdvisoryClient, AdvisoryRequest, StructuredAdvice};

/// Interactive shell: reads SQL lines, runs the full advisory pipeline per
/// statement, and prints result table, plan, and advice.
pub async fn run(config: Config) -> anyhow::Result<()> {
    println!("Welcome to the qopt shell. Type help or ? to list commands.");
    println!(
        "Config points to database '{}' on {} at {}:{}.",
        config.database.database,
        config.database.engine.as_str(),
        config.database.host,
        config.database.port
    );

    let mut conn = Connection::open(config.database).await?;
    let advisor = AdvisoryClient::new(&config.ai_model);
    println!("Connected to database.");

    let stdin = io::stdin();
    loop {
        print!("qopt>>> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF behaves like quit.
            println!();
            break;
        }

        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "help" | "?" => print_help(),
            "schema" => match conn.schema_text().await {
                Ok(schema) => println!("{schema}"),
                Err(e) => println!("Error: {e}"),
            },
            sql => run_pipeline(&mut conn, &advisor, sql).await,
        }
    }

    Ok(())
}

fn print_help() {
    println!("Use this shell to interact with your database, and to run queries.");
    println!("Just enter a SQL query to get started.");
    println!();
    println!("Commands:");
    println!("  schema  Show the database schema.");
    println!("  help    Show this message.");
    println!("  quit    Quit the shell.");
}

async fn run_pipeline(conn: &mut Connection, advisor: &AdvisoryClient, sql: &str) {
    let result = run_query(conn, sql).await;

    if let Some(error) = &result.error {
        println!("Error: query failed to run. Details of error:");
        println!("{error}");
        return;
    }

    println!(
        "{} rows returned in {:.3} seconds.",
        result.row_count,
        result.elapsed_ms as f64 / 1000.0
    );
    if result.truncated() {
        println!("Showing first {MAX_RESULT_ROWS} results.");
    }
    if !result.headers.is_empty() {
        println!("{}", render_table(&result));
    }
    if !result.explain.is_empty() {
        println!("Query EXPLAIN results:");
        println!("{}", result.explain);
    }

    println!("Checking for optimizations...");

    let schema = match conn.schema_text().await {
        Ok(schema) => schema,
        Err(e) => {
            println!("Error: could not obtain advice: {e}");
            return;
        }
    };
    let request = AdvisoryRequest {
        schema,
        query: sql.to_string(),
        explain: result.explain.clone(),
    };

    let advice = match advisor.optimize(&request).await {
        Ok(response) => match parse_advice(&response) {
            Ok(advice) => advice,
            Err(e) => {
                println!("Error: LLM provided bad response: {e}");
                return;
            }
        },
        Err(e) => {
            println!("Error: could not obtain advice: {e}");
            return;
        }
    };

    print_advice(&advice);
}

fn render_table(result: &BoundedQueryResult) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_header(result.headers.clone());
    for row in &result.rows {
        table.add_row(row.clone());
    }
    table
}

fn print_advice(advice: &StructuredAdvice) {
    let section = "-".repeat(10);
    println!("LLM advice:");
    println!("{section}");
    println!("Query-related advice:");
    println!("{}", advice.query_advice.as_deref().unwrap_or("null"));
    println!("Suggested query:");
    println!("{}", advice.query_optimized.as_deref().unwrap_or("null"));
    println!("{section}");
    println!("Schema-related advice:");
    println!("{}", advice.schema_advice.as_deref().unwrap_or("null"));
    println!("Suggested schema:");
    println!("{}", advice.schema_optimized.as_deref().unwrap_or("null"));
    println!("{section}");
    println!("Explanation for advice:");
    println!("{}", advice.explanation.as_deref().unwrap_or("null"));
}
