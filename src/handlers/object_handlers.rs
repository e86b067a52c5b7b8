//! HTTP handlers for object operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `ObjectStoreService`.

use crate::{
    errors::AppError,
    models::{
        object::ObjectRecord,
        responses::{DeleteResponse, UploadResponse},
    },
    services::object_store::ObjectStoreService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::io;
use tokio_util::io::ReaderStream;

/// Characters escaped in a path segment: everything but RFC 3986 unreserved.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Upload an object to `/objects/{name}` from the raw request body.
pub async fn upload_object(
    State(service): State<ObjectStoreService>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let record = service.put(&name, content_type, stream).await?;
    Ok(Json(upload_response(&record)))
}

/// `POST /upload` — multipart form upload with a `file` part.
///
/// The object name is the base name of the part's filename.
pub async fn upload_form(
    State(service): State<ObjectStoreService>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(base_name)
            .ok_or_else(|| AppError::bad_request("file part has no filename"))?;
        let content_type = field.content_type().map(str::to_string);
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));

        let record = service.put(&name, content_type, stream).await?;
        return Ok(Json(upload_response(&record)));
    }

    Err(AppError::bad_request("Bad Request"))
}

/// Download `/objects/{name}` as a streaming response.
pub async fn get_object(
    State(service): State<ObjectStoreService>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let (record, file) = service.get(&name).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &record);

    Ok(response)
}

/// DELETE `/objects/{name}`
pub async fn delete_object(
    State(service): State<ObjectStoreService>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    service.delete(&name).await?;

    Ok(Json(DeleteResponse {
        message: "File deleted successfully".into(),
    }))
}

fn upload_response(record: &ObjectRecord) -> UploadResponse {
    UploadResponse {
        message: "File uploaded successfully".into(),
        name: record.name.clone(),
        url: format!("/objects/{}", utf8_percent_encode(&record.name, PATH_SEGMENT)),
        size_bytes: record.size_bytes,
        content_type: record.content_type.clone(),
    }
}

/// Last path segment of a client-supplied filename (either separator).
fn base_name(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .to_string()
}

fn set_object_headers(headers: &mut HeaderMap, record: &ObjectRecord) {
    let content_type = record
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let last_modified = record
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
