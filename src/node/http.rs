//! HTTP API of a node
//!
//! Serves clients (create/update/delete on the leader, reads everywhere)
//! and peers pulling blobs during reconciliation.
//!
//! Identity travels in headers: `X-Blob-User` and `X-Blob-Groups` name a
//! user, anything else is anonymous. On the read routes peers use, the
//! `X-Blob-Peer` header marks traffic from another node; writes ignore it.
//! The API is meant to sit on a trusted cluster network.

use crate::blobstore::{AccessControl, BlobKey, Caller, SettableBlobMeta};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::Error;
use crate::node::service::BlobService;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;

pub const PEER_HEADER: &str = "X-Blob-Peer";
pub const USER_HEADER: &str = "X-Blob-User";
pub const GROUPS_HEADER: &str = "X-Blob-Groups";
pub const ACL_HEADER: &str = "X-Blob-Acl";
pub const REPLICATION_HEADER: &str = "X-Blob-Replication";
pub const VERSION_HEADER: &str = "X-Blob-Version";
pub const SEQUENCE_HEADER: &str = "X-Blob-Sequence";

/// Largest blob accepted in a single request.
pub const MAX_BLOB_SIZE: usize = 1024 * 1024 * 1024;

/// Error body returned by every failing endpoint.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self {
            status: e.to_http_status(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Caller of a read. Peers pulling blobs read as [`Caller::Internal`].
pub fn reader_from_headers(headers: &HeaderMap) -> Caller {
    if header_str(headers, PEER_HEADER).is_some() {
        return Caller::Internal;
    }
    caller_from_headers(headers)
}

/// Client identity from request headers.
pub fn caller_from_headers(headers: &HeaderMap) -> Caller {
    match header_str(headers, USER_HEADER) {
        Some(name) => {
            let groups = header_str(headers, GROUPS_HEADER)
                .map(|g| {
                    g.split(',')
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Caller::user_in_groups(name, groups)
        }
        None => Caller::Anonymous,
    }
}

fn create_meta(headers: &HeaderMap) -> ApiResult<SettableBlobMeta> {
    let acl = match header_str(headers, ACL_HEADER) {
        Some(acl) => AccessControl::parse_list(acl).map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => Vec::new(),
    };
    let mut meta = SettableBlobMeta::new(acl);
    if let Some(replication) = header_str(headers, REPLICATION_HEADER) {
        let replication = replication
            .parse::<u32>()
            .map_err(|e| ApiError::bad_request(format!("bad {}: {}", REPLICATION_HEADER, e)))?;
        meta = meta.with_replication(replication);
    }
    Ok(meta)
}

fn parse_key(raw: String) -> ApiResult<BlobKey> {
    Ok(BlobKey::new(raw)?)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub key: String,
    pub sequence: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicationBody {
    pub replication: u32,
}

pub fn create_router(service: BlobService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/blobs", get(list_blobs))
        .route(
            "/blobs/:key",
            get(get_blob)
                .put(create_blob)
                .post(update_blob)
                .delete(delete_blob),
        )
        .route("/blobs/:key/meta", get(get_meta).put(set_meta))
        .route(
            "/blobs/:key/replication",
            get(get_replication).put(set_replication),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BLOB_SIZE))
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(service)
}

async fn health(State(svc): State<BlobService>) -> impl IntoResponse {
    let role = if svc.is_leader() { "leader" } else { "follower" };
    Json(json!({
        "status": "healthy",
        "node": svc.node().to_string(),
        "role": role,
        "is_leader": svc.is_leader(),
        "leader": svc.leader().map(|n| n.to_string()),
        "time": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_blobs(State(svc): State<BlobService>) -> ApiResult<impl IntoResponse> {
    let keys: Vec<String> = svc
        .list_keys()
        .await?
        .into_iter()
        .map(BlobKey::into_string)
        .collect();
    Ok(Json(json!({ "keys": keys })))
}

async fn get_blob(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let key = parse_key(key)?;
    let reader = svc.get_blob(&key, &reader_from_headers(&headers)).await?;
    let version = reader.version();
    let body = tokio::task::spawn_blocking(move || reader.read_to_vec())
        .await
        .map_err(|e| Error::Internal(format!("read task failed: {}", e)))??;

    let mut response = Bytes::from(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&version.to_string()) {
        response.headers_mut().insert(VERSION_HEADER, value);
    }
    Ok(response)
}

fn write_response(status: StatusCode, key: &BlobKey, sequence: u64) -> Response {
    let mut response = (
        status,
        Json(WriteResponse {
            key: key.to_string(),
            sequence,
        }),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&sequence.to_string()) {
        response.headers_mut().insert(SEQUENCE_HEADER, value);
    }
    response
}

async fn create_blob(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let key = parse_key(key)?;
    let meta = create_meta(&headers)?;
    let sequence = svc
        .create_blob(&key, &body, meta, &caller_from_headers(&headers))
        .await?;
    Ok(write_response(StatusCode::CREATED, &key, sequence))
}

async fn update_blob(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let key = parse_key(key)?;
    let sequence = svc
        .update_blob(&key, &body, &caller_from_headers(&headers))
        .await?;
    Ok(write_response(StatusCode::OK, &key, sequence))
}

async fn delete_blob(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let key = parse_key(key)?;
    svc.delete_blob(&key, &caller_from_headers(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_meta(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(key)?;
    let meta = svc.get_blob_meta(&key, &reader_from_headers(&headers)).await?;
    Ok(Json(meta))
}

async fn set_meta(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(meta): Json<SettableBlobMeta>,
) -> ApiResult<StatusCode> {
    let key = parse_key(key)?;
    svc.set_blob_meta(&key, meta, &caller_from_headers(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_replication(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(key)?;
    let replication = svc
        .get_blob_replication(&key, &reader_from_headers(&headers))
        .await?;
    Ok(Json(ReplicationBody { replication }))
}

async fn set_replication(
    State(svc): State<BlobService>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ReplicationBody>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(key)?;
    let replication = svc
        .update_blob_replication(&key, body.replication, &caller_from_headers(&headers))
        .await?;
    Ok(Json(ReplicationBody { replication }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_caller_from_headers() {
        assert_eq!(caller_from_headers(&HeaderMap::new()), Caller::Anonymous);
        assert_eq!(
            reader_from_headers(&headers(&[("x-blob-peer", "nimbus-2:6627")])),
            Caller::Internal
        );
        assert_eq!(
            caller_from_headers(&headers(&[("x-blob-peer", "nimbus-2:6627")])),
            Caller::Anonymous
        );
        assert_eq!(
            caller_from_headers(&headers(&[
                ("x-blob-user", "alice"),
                ("x-blob-groups", "ops, dev")
            ])),
            Caller::user_in_groups("alice", vec!["ops".into(), "dev".into()])
        );
    }

    #[test]
    fn test_create_meta_from_headers() {
        let meta = create_meta(&headers(&[
            ("x-blob-acl", "u:alice:rwa,o::r--"),
            ("x-blob-replication", "3"),
        ]))
        .ok()
        .unwrap();
        assert_eq!(meta.acl.len(), 2);
        assert_eq!(meta.replication_factor, Some(3));

        assert!(create_meta(&headers(&[("x-blob-replication", "lots")])).is_err());
        assert!(create_meta(&headers(&[("x-blob-acl", "z:who:rwa")])).is_err());
    }
}
