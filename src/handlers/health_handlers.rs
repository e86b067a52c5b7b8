//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata index and disk I/O

use crate::services::object_store::ObjectStoreService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Pings the metadata index (`SELECT 1`).
/// 2. Performs a write/read/delete round trip in the staging area.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<ObjectStoreService>) -> impl IntoResponse {
    let index_check = match service.index().ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    // Staging files are never mistaken for objects and get swept on startup.
    let tmp_path = service
        .blobs()
        .staging_dir()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => {
            let check = match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
                Ok(_) => CheckStatus::failed("file content mismatch".to_string()),
                Err(e) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
            };
            match fs::remove_file(&tmp_path).await {
                Ok(_) => check,
                Err(e) if check.ok => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove tmp file: {}", e)),
                },
                Err(_) => check,
            }
        }
        Err(e) => CheckStatus::failed(format!("could not write tmp file: {}", e)),
    };

    let overall_ok = index_check.ok && disk_check.ok;

    let mut checks = HashMap::new();
    checks.insert("index", index_check);
    checks.insert("disk", disk_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
