//! Caller-facing response writer
//!
//! Adaptors write normalized bytes through `ResponseWriter`. The writer commits the
//! status/headers once, forwards body chunks to the caller in order, and keeps a
//! bounded diagnostic copy of what was forwarded. Once the capture cap is reached
//! capture stops but forwarding continues.

use super::pool::{PooledBuffer, CAPTURE_POOL};
use crate::utils::error::{ErrorContext, RelayError, RelayResult};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Default diagnostic capture cap
pub const MAX_CAPTURE_BYTES: usize = 512 * 1024;

/// Number of body chunks buffered between the relay task and the caller
const BODY_CHANNEL_CAPACITY: usize = 64;

type BodyChunk = Result<Bytes, std::io::Error>;

/// Committed status line and headers
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Bounded copy of bytes forwarded to the caller
#[derive(Debug)]
pub struct CaptureBuffer {
    buf: PooledBuffer<'static>,
    limit: usize,
    truncated: bool,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: CAPTURE_POOL.get(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `data` as fits under the cap
    pub fn push(&mut self, data: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        if data.len() > room {
            self.truncated = true;
        }
        let take = data.len().min(room);
        if take > 0 {
            self.buf.extend_from_slice(&data[..take]);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// What the writer observed once the pipeline is finished with it
#[derive(Debug, Clone, Default)]
pub struct WriterSummary {
    pub status: Option<StatusCode>,
    pub captured: String,
    pub truncated: bool,
    pub forwarded_bytes: u64,
    pub first_byte_at: Option<DateTime<Utc>>,
}

/// Writes the normalized response to the caller
#[derive(Debug)]
pub struct ResponseWriter {
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::Sender<BodyChunk>,
    headers: HeaderMap,
    status: Option<StatusCode>,
    capture: CaptureBuffer,
    forwarded_bytes: u64,
    first_byte_at: Option<DateTime<Utc>>,
    client_gone: bool,
}

impl ResponseWriter {
    /// Create a writer and the receiving half handed to the HTTP layer
    pub fn channel(capture_limit: usize) -> (Self, ResponseReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let writer = Self {
            head_tx: Some(head_tx),
            body_tx,
            headers: HeaderMap::new(),
            status: None,
            capture: CaptureBuffer::new(capture_limit),
            forwarded_bytes: 0,
            first_byte_at: None,
            client_gone: false,
        };
        (
            writer,
            ResponseReceiver {
                head: head_rx,
                body: body_rx,
            },
        )
    }

    /// Headers to send with the status line; ignored once committed
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_content_type(&mut self, content_type: &'static str) {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Bytes forwarded to the caller so far
    pub fn forwarded_bytes(&self) -> u64 {
        self.forwarded_bytes
    }

    /// Commit the status line. Only the first call has any effect.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.status.is_some() {
            warn!("Response header already committed, ignoring status {}", status);
            return;
        }
        self.status = Some(status);
        let head = ResponseHead {
            status,
            headers: std::mem::take(&mut self.headers),
        };
        if let Some(head_tx) = self.head_tx.take() {
            if head_tx.send(head).is_err() {
                self.mark_client_gone();
            }
        }
    }

    /// Forward a chunk to the caller, committing 200 first if needed
    pub async fn write(&mut self, data: Bytes) {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        if data.is_empty() {
            return;
        }
        if self.first_byte_at.is_none() {
            self.first_byte_at = Some(Utc::now());
        }
        self.capture.push(&data);
        self.forwarded_bytes += data.len() as u64;

        // A departed client does not stop the relay; the upstream is still read
        // to completion so its usage can be accounted.
        if !self.client_gone && self.body_tx.send(Ok(data)).await.is_err() {
            self.mark_client_gone();
        }
    }

    /// Serialize `value` as the complete JSON response
    pub async fn write_json<T: Serialize>(&mut self, status: StatusCode, value: &T) -> RelayResult<()> {
        let body = serde_json::to_vec(value).internal_context("Failed to serialize response")?;
        self.set_content_type("application/json");
        self.write_header(status);
        self.write(Bytes::from(body)).await;
        Ok(())
    }

    /// Write the canonical error body, unless a response was already committed
    pub async fn write_error(&mut self, error: &RelayError) {
        if self.is_committed() {
            warn!("Cannot report error after response was committed: {}", error);
            return;
        }
        if let Err(e) = self
            .write_json(error.status_code(), &error.to_error_response())
            .await
        {
            warn!("Failed to write error response: {}", e);
        }
    }

    /// Close the body and report what was written
    pub fn finish(self) -> WriterSummary {
        WriterSummary {
            status: self.status,
            captured: self.capture.to_string_lossy(),
            truncated: self.capture.is_truncated(),
            forwarded_bytes: self.forwarded_bytes,
            first_byte_at: self.first_byte_at,
        }
    }

    fn mark_client_gone(&mut self) {
        if !self.client_gone {
            debug!("Client disconnected; continuing to drain upstream");
            self.client_gone = true;
        }
    }
}

/// Receiving half of a `ResponseWriter`
#[derive(Debug)]
pub struct ResponseReceiver {
    head: oneshot::Receiver<ResponseHead>,
    body: mpsc::Receiver<BodyChunk>,
}

impl ResponseReceiver {
    /// Wait for the committed head and stream the body as an HTTP response
    pub async fn into_response(self) -> Response {
        let head = match self.head.await {
            Ok(head) => head,
            Err(_) => {
                return RelayError::Internal("relay finished without a response".to_string())
                    .into_response()
            }
        };

        let mut response = Response::new(Body::from_stream(ReceiverStream::new(self.body)));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }

    /// Collect the full response. The writer must be driven concurrently.
    pub async fn collect(mut self) -> Option<(ResponseHead, Bytes)> {
        let head = self.head.await.ok()?;
        let mut body = Vec::new();
        while let Some(chunk) = self.body.recv().await {
            body.extend_from_slice(&chunk.ok()?);
        }
        Some((head, Bytes::from(body)))
    }
}
