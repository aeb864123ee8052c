//! REST routes and handlers.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tscast::{Caster, Error, StreamInfo};

/// Body of `POST /streams`.
#[derive(Debug, Deserialize)]
struct CreateStreamRequest {
    source: String,
    endpoint: EndpointBody,
}

#[derive(Debug, Deserialize)]
struct EndpointBody {
    ip: String,
    port: u16,
}

/// Body of `GET /streams`.
#[derive(Debug, Serialize)]
struct ListStreamsResponse {
    streams: Vec<StreamInfo>,
}

/// Builds the API router over a shared caster.
pub fn router(caster: Arc<Caster>) -> Router {
    Router::new()
        .route("/streams", post(create_stream))
        .route("/streams", get(list_streams))
        .route("/streams/:id", delete(delete_stream))
        .with_state(caster)
        .layer(TraceLayer::new_for_http())
}

/// Binds `0.0.0.0:port` and serves the API until the process exits.
pub async fn serve(caster: Arc<Caster>, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "REST API listening");
    axum::serve(listener, router(caster)).await
}

fn api_error(code: StatusCode, message: impl Into<String>) -> Response {
    let body = json!({
        "error": {
            "code": code.as_u16(),
            "message": message.into(),
        }
    });
    (code, Json(body)).into_response()
}

async fn create_stream(
    State(caster): State<Arc<Caster>>,
    body: Result<Json<CreateStreamRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return api_error(StatusCode::BAD_REQUEST, rejection.to_string()),
    };

    let ip: IpAddr = match request.endpoint.ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("invalid ip address: {}", request.endpoint.ip),
            )
        }
    };

    // Stream creation parses the source file and spawns threads.
    let result = tokio::task::spawn_blocking(move || {
        caster.create_stream(&request.source, ip, request.endpoint.port)
    })
    .await;

    match result {
        Ok(Ok(info)) => Json(info).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "stream creation failed");
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn list_streams(State(caster): State<Arc<Caster>>) -> Response {
    Json(ListStreamsResponse {
        streams: caster.list_streams(),
    })
    .into_response()
}

async fn delete_stream(State(caster): State<Arc<Caster>>, Path(id): Path<u32>) -> Response {
    // Deletion joins the stream's worker threads.
    let result = tokio::task::spawn_blocking(move || caster.delete_stream(id)).await;

    match result {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(Error::StreamNotFound(id))) => {
            api_error(StatusCode::NOT_FOUND, format!("stream {id} not found"))
        }
        Ok(Err(e)) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
