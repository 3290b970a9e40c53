//! HTTP content endpoint.
//!
//! Endpoints:
//!   GET /src?path=<file>  - decrypted bytes if a registered password opens
//!                           the file, raw bytes otherwise, 404 if missing
//!
//! Every request resolves the file against the registry independently;
//! callers never say whether a file is encrypted.
//!
//! Headers are sent before the body is produced. If reading or decrypting
//! fails mid-body the stream ends short of `Content-Length` and the
//! connection is dropped; there is no in-band error report.

use crate::key_manager::DerivedKey;
use crate::registry::CipherRegistry;
use crate::streaming::{StreamCipherPipeline, StreamSession};
use anyhow::Result;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Shared state for request handlers
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<CipherRegistry>,
    pub pipeline: StreamCipherPipeline,
}

impl ServerState {
    pub fn new(registry: Arc<CipherRegistry>, pipeline: StreamCipherPipeline) -> Self {
        Self { registry, pipeline }
    }
}

#[derive(Debug, Deserialize)]
pub struct SrcQuery {
    pub path: Option<String>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/src", get(src_handler))
        .with_state(state)
}

/// Serve the content endpoint on `addr` (e.g. "127.0.0.1:7878")
pub async fn serve(addr: String, state: ServerState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;

    info!(addr = %addr, passwords = state.registry.len(), "serving /src");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("content server: {e}"))
}

async fn src_handler(State(state): State<ServerState>, Query(query): Query<SrcQuery>) -> Response {
    let Some(path) = query.path.filter(|p| !p.is_empty()).map(PathBuf::from) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let raw_len = match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            debug!(path = %path.display(), "requested file not found");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    match state.registry.resolve(&path).await {
        Some(resolution) => {
            debug!(path = %path.display(), index = resolution.index, "serving decrypted content");
            let body = decrypted_body(state.pipeline.clone(), path.clone(), resolution.key);
            respond(&path, resolution.plaintext_size, body)
        }
        None => {
            debug!(path = %path.display(), "serving raw content");
            match fs::File::open(&path).await {
                Ok(file) => respond(&path, raw_len, Body::from_stream(ReaderStream::new(file))),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open file");
                    StatusCode::NOT_FOUND.into_response()
                }
            }
        }
    }
}

/// Runs decryption on its own task, feeding the body through a bounded pipe.
/// A full pipe suspends the pipeline until the client reads more.
fn decrypted_body(
    pipeline: StreamCipherPipeline,
    path: PathBuf,
    key: DerivedKey,
) -> Body {
    let (mut writer, reader) = tokio::io::duplex(pipeline.chunk_size());
    tokio::spawn(async move {
        let session = StreamSession::new();
        if let Err(e) = pipeline
            .decrypt_to_sink(&path, &mut writer, Some(&key), &session)
            .await
        {
            warn!(
                path = %path.display(),
                error = %e,
                sent = session.bytes_processed(),
                expected = session.expected_size(),
                "decrypting response body failed"
            );
        }
    });
    Body::from_stream(ReaderStream::new(reader))
}

fn respond(path: &Path, content_length: u64, body: Body) -> Response {
    let content_type = mime_guess::from_path(path).first_or_octet_stream();
    HttpResponse::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(body)
        .unwrap_or_else(|e| {
            warn!(error = %e, "building response failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
