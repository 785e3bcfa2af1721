use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::db::{run_query, BoundedQueryResult, Connection, ConnectionParams};
use crate::llm::{parse_advice, AdvisoryClient, AdvisoryRequest, StructuredAdvice};

/// Shared server state. The single connection is stateless aside from its
/// schema cache, so every request shares it, serialized through the mutex;
/// advisory calls share no mutable state and run outside the lock.
struct AppState {
    conn: Mutex<Connection>,
    advisor: AdvisoryClient,
    params: ConnectionParams,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct OptimizeResponse {
    result: BoundedQueryResult,
    advice: Option<StructuredAdvice>,
    advice_error: Option<String>,
}

/// Expose the pipeline over REST, primarily for the web UI.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let params = config.database.clone();
    let conn = Connection::open(config.database).await?;
    let advisor = AdvisoryClient::new(&config.ai_model);

    let state = Arc::new(AppState {
        conn: Mutex::new(conn),
        advisor,
        params,
    });

    let app = Router::new()
        .route("/status", get(status))
        .route("/database", get(database_details))
        .route("/schema", get(schema))
        .route("/query", post(execute_query))
        .route("/optimize", post(optimize_query))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 8000)).await?;
    info!("qopt API listening on 127.0.0.1:8000");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Healthcheck route for the UI.
async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "qopt API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Connection facts, password omitted by serialization.
async fn database_details(State(state): State<Arc<AppState>>) -> Json<ConnectionParams> {
    Json(state.params.clone())
}

async fn schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut conn = state.conn.lock().await;
    match conn.schema_text().await {
        Ok(schema) => Ok(Json(serde_json::json!({ "schema": schema }))),
        Err(e) => {
            tracing::error!("schema extraction failed: {e}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Run a query on the connected database. Query failures are part of the
/// result record, not an HTTP error.
async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Json<BoundedQueryResult> {
    let mut conn = state.conn.lock().await;
    Json(run_query(&mut conn, &request.query).await)
}

/// Run a query and ask the completion endpoint for optimization advice.
/// A failed query skips the advisory stage; advisory or parse failures are
/// reported in `advice_error`, never as fabricated advice.
async fn optimize_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Json<OptimizeResponse> {
    let (result, schema) = {
        let mut conn = state.conn.lock().await;
        let result = run_query(&mut conn, &request.query).await;
        if result.error.is_some() {
            return Json(OptimizeResponse {
                result,
                advice: None,
                advice_error: Some("query failed; no advice requested".to_string()),
            });
        }
        let schema = conn.schema_text().await;
        (result, schema)
    };

    let schema = match schema {
        Ok(schema) => schema,
        Err(e) => {
            return Json(OptimizeResponse {
                result,
                advice: None,
                advice_error: Some(e.to_string()),
            });
        }
    };

    let advisory_request = AdvisoryRequest {
        schema,
        query: request.query.clone(),
        explain: result.explain.clone(),
    };
    let outcome = state.advisor.optimize(&advisory_request).await;
    let (advice, advice_error) = match outcome {
        Ok(response) => match parse_advice(&response) {
            Ok(advice) => (Some(advice), None),
            Err(e) => (None, Some(e.to_string())),
        },
        Err(e) => (None, Some(e.to_string())),
    };

    Json(OptimizeResponse {
        result,
        advice,
        advice_error,
    })
}
