// SPDX-License-Identifier: MIT

//! HTTP surface for registered flows
//!
//! Exposes start, stream (SSE), resume and batch endpoints per flow, plus
//! list endpoints for tooling. Caller credentials are decoded into an
//! `AuthContext` before dispatch; core error kinds map onto transport
//! status codes.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::AuthContext;
use crate::error::{FlowError, Result};
use crate::flow::{FlowEngine, FlowEvent, FlowInvokeOptions};
use crate::store::ListFilter;

/// Bind and serve the flow API on the given port
pub async fn serve(engine: Arc<FlowEngine>, port: u16) -> Result<()> {
    let app = router(engine);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(engine: Arc<FlowEngine>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/flows", get(list_flows))
        .route("/api/runs", get(list_runs))
        .route("/api/flows/{name}", post(start_flow))
        .route("/api/flows/{name}/stream", post(stream_flow))
        .route("/api/flows/{name}/resume", post(resume_flow))
        .route("/api/flows/{name}/batch", post(batch_flow))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Core error kinds mapped onto transport status codes
fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::Validation { .. } => StatusCode::BAD_REQUEST,
        FlowError::Auth(_) => StatusCode::FORBIDDEN,
        FlowError::NotFound(_) => StatusCode::NOT_FOUND,
        FlowError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(json!({ "error": self.0.to_error_info() }));
        (status, body).into_response()
    }
}

/// Decode `Authorization: Bearer <token>` into an `AuthContext`
fn auth_from_headers(headers: &HeaderMap) -> Option<AuthContext> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value);
    Some(AuthContext::from_token(token))
}

/// Start/resume request envelope
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InvokeRequest {
    input: Option<Value>,
    run_id: Option<String>,
    resume: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    inputs: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunsQuery {
    flow: Option<String>,
    page_size: Option<usize>,
    page_token: Option<String>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_flows(State(engine): State<Arc<FlowEngine>>) -> Json<Value> {
    let flows = engine.list_flows().await;
    Json(json!(flows))
}

async fn list_runs(
    State(engine): State<Arc<FlowEngine>>,
    Query(query): Query<RunsQuery>,
) -> std::result::Result<Json<Value>, ApiError> {
    let page = engine
        .list_runs(ListFilter {
            flow_name: query.flow,
            page_size: query.page_size,
            page_token: query.page_token,
        })
        .await?;
    Ok(Json(json!(page)))
}

async fn start_flow(
    State(engine): State<Arc<FlowEngine>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<InvokeRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let opts = FlowInvokeOptions {
        run_id: request.run_id,
        auth: auth_from_headers(&headers),
    };
    let operation = engine
        .run_flow(&name, request.input.unwrap_or(Value::Null), opts)
        .await?;
    Ok(Json(json!(operation)))
}

async fn stream_flow(
    State(engine): State<Arc<FlowEngine>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<InvokeRequest>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    let opts = FlowInvokeOptions {
        run_id: request.run_id,
        auth: auth_from_headers(&headers),
    };
    let rx = engine
        .stream_flow(&name, request.input.unwrap_or(Value::Null), opts)
        .await?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let frame = match &event {
            FlowEvent::Chunk { .. } => Event::default().event("chunk"),
            FlowEvent::Done(_) => Event::default().event("operation"),
        };
        let frame = match frame.json_data(&event) {
            Ok(frame) => frame,
            Err(e) => Event::default()
                .event("error")
                .data(format!("frame serialization failed: {e}")),
        };
        Ok(frame)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(1))))
}

async fn resume_flow(
    State(engine): State<Arc<FlowEngine>>,
    Path(_name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<InvokeRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let run_id = request
        .run_id
        .ok_or_else(|| FlowError::validation("resume requires `runId`"))?;
    let payload = request.resume.unwrap_or(Value::Null);
    let operation = engine
        .resume_flow(&run_id, payload, auth_from_headers(&headers))
        .await?;
    Ok(Json(json!(operation)))
}

async fn batch_flow(
    State(engine): State<Arc<FlowEngine>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let opts = FlowInvokeOptions {
        run_id: None,
        auth: auth_from_headers(&headers),
    };
    let operations = engine.run_batch(&name, request.inputs, opts).await?;
    Ok(Json(json!(operations)))
}
