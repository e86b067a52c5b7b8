//! Defines routes for object operations.
//!
//! ## Structure
//! - **Object endpoints**
//!   - `PUT    /objects/{name}` — upload object from the raw body
//!   - `GET    /objects/{name}` — download object
//!   - `DELETE /objects/{name}` — delete object
//!
//! - **Form endpoints** (same semantics as the object endpoints)
//!   - `POST   /upload`         — multipart upload, `file` part
//!   - `GET    /get/{name}`
//!   - `DELETE /delete/{name}`
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, upload_form, upload_object},
    },
    services::object_store::ObjectStoreService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Build and return the router for all object routes.
///
/// Body size is enforced by the service while streaming, so axum's default
/// extractor limit is lifted on the upload routes.
pub fn routes() -> Router<ObjectStoreService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/objects/{name}",
            put(upload_object)
                .get(get_object)
                .delete(delete_object)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/upload",
            post(upload_form).layer(DefaultBodyLimit::disable()),
        )
        .route("/get/{name}", get(get_object))
        .route("/delete/{name}", delete(delete_object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::open_temp_service;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(app: &Router, method: &str, uri: &str, body: Body) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn test_app(dir: &std::path::Path) -> (Router, ObjectStoreService) {
        let service = open_temp_service(dir).await;
        (routes().with_state(service.clone()), service)
    }

    #[tokio::test]
    async fn object_lifecycle_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let response = send(&app, "PUT", "/objects/a.txt", Body::from("hello")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["url"], "/objects/a.txt");
        assert_eq!(json["size_bytes"], 5);

        let response = send(&app, "GET", "/objects/a.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(body_bytes(response).await, b"hello");

        let response = send(&app, "PUT", "/objects/a.txt", Body::from("other")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["status"], 409);

        let response = send(&app, "DELETE", "/objects/a.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/objects/a.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn returned_url_fetches_names_with_reserved_characters() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let response = send(&app, "PUT", "/objects/a%23b%3Fc", Body::from("tricky")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["name"], "a#b?c");
        let url = json["url"].as_str().unwrap().to_string();
        assert_eq!(url, "/objects/a%23b%3Fc");

        let response = send(&app, "GET", &url, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"tricky");
    }

    #[tokio::test]
    async fn missing_object_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let response = send(&app, "GET", "/objects/missing", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&app, "DELETE", "/objects/missing", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_name_is_400_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (app, service) = test_app(dir.path()).await;

        let response = send(&app, "PUT", "/objects/..%2Fevil", Body::from("x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(service.index().records().await.unwrap().is_empty());
        assert!(service.blobs().committed_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_type_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/objects/page.html")
                    .header(header::CONTENT_TYPE, "text/html")
                    .body(Body::from("<p>hi</p>"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/get/page.html", Body::empty()).await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
    }

    #[tokio::test]
    async fn multipart_upload_then_legacy_get_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let boundary = "X-BOUNDARY";
        let form = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"docs/notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             form body\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(form))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "notes.txt");

        let response = send(&app, "GET", "/get/notes.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"form body");

        let response = send(&app, "DELETE", "/delete/notes.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&app, "GET", "/get/notes.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn multipart_without_file_part_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let form = "--B\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--B--\r\n";
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(header::CONTENT_TYPE, "multipart/form-data; boundary=B")
                    .body(Body::from(form))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_temp_service(dir.path()).await.with_max_object_bytes(3);
        let app = routes().with_state(service);

        let response = send(&app, "PUT", "/objects/big", Body::from("abcdef")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let response = send(&app, "GET", "/objects/big", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dangling_record_is_500_not_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, service) = test_app(dir.path()).await;

        send(&app, "PUT", "/objects/gone", Body::from("x")).await;
        let record = service.index().lookup("gone").await.unwrap().unwrap();
        std::fs::remove_file(service.blobs().resolve(&record.location).unwrap()).unwrap();

        let response = send(&app, "GET", "/objects/gone", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal Server Error");
    }

    #[tokio::test]
    async fn probes_report_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let response = send(&app, "GET", "/healthz", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/readyz", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["checks"]["index"]["ok"], true);
        assert_eq!(json["checks"]["disk"]["ok"], true);
    }

    #[tokio::test]
    async fn readyz_fails_when_index_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (app, service) = test_app(dir.path()).await;
        service.index().close().await;

        let response = send(&app, "GET", "/readyz", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
