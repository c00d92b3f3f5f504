//! Relay handler
//!
//! Entry point for every relayed endpoint. Classifies the request, picks a channel
//! for the requested model and hands the rest to the relay pipeline on its own task.

use crate::handlers::AppState;
use crate::middleware::{RequestId, REQUEST_ID_HEADER};
use crate::relay::adaptor::BodyRemainder;
use crate::relay::{classify, tokenizer, Endpoint, InboundRequest, Meta, ResponseWriter};
use crate::utils::error::{RelayError, RelayResult};
use crate::utils::multipart;
use axum::{
    body::{to_bytes, Body, BodyDataStream},
    extract::{Request, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info_span, Instrument};

/// Upload bytes read while looking for the `model` part. Past this window the
/// whole body is buffered instead of streamed.
const UPLOAD_HEAD_LIMIT: usize = 64 * 1024;

/// Upload chunks in flight between the inbound body and the upstream request
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

/// Relay one inbound API call
///
/// The upstream call runs on a spawned task, so a caller disconnecting mid-stream
/// does not abort it; usage is still recorded once the upstream finishes.
pub async fn handle_relay(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match prepare(&state, request).await {
        Ok((meta, inbound)) => dispatch(state, meta, inbound).await,
        Err(error) => error.into_response(),
    }
}

async fn prepare(state: &AppState, request: Request) -> RelayResult<(Meta, InboundRequest)> {
    let (parts, body) = request.into_parts();
    let endpoint = classify(&parts.method, parts.uri.path())
        .ok_or_else(|| RelayError::NotFound(format!("unknown endpoint {}", parts.uri.path())))?;

    let limit = state.settings.request.max_request_size;
    let upload_boundary = endpoint
        .mode
        .is_upload()
        .then(|| content_type(&parts.headers).and_then(multipart::boundary))
        .flatten()
        .map(str::to_string);
    let (body, remainder) = match upload_boundary {
        Some(boundary) => read_upload(body, &boundary, limit).await?,
        None => (read_body(body, limit).await?, None),
    };
    let json = if is_json(&parts.headers) && !body.is_empty() {
        Some(
            serde_json::from_slice::<Value>(&body)
                .map_err(|e| RelayError::InvalidRequest(format!("Invalid JSON body: {}", e)))?,
        )
    } else {
        None
    };
    let model = origin_model(&endpoint, &parts.headers, &body, json.as_ref())?;

    let mode = endpoint.mode;
    let channel = state
        .config
        .select_channel(mode, &model, |t, m| state.supports(t, m))
        // Let the relay reject the mode with a typed error instead of a 404
        .or_else(|| state.config.select_channel(mode, &model, |_, _| true))
        .ok_or_else(|| RelayError::NotFound(format!("no channel serves model '{}'", model)))?;

    let actual_model = channel.map_model(&model).to_string();
    let request_id = parts
        .extensions
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .or_else(|| {
            parts
                .headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

    let mut meta = Meta::from_endpoint(&endpoint, channel.to_channel(), model, actual_model);
    if let Some(request_id) = request_id {
        meta = meta.with_request_id(request_id);
    }
    if let Some(json) = &json {
        let input_tokens = tokenizer::count_request(mode, &meta.origin_model, json);
        meta = meta.with_input_tokens(input_tokens);
    }

    debug!(
        request_id = %meta.request_id,
        mode = %mode,
        channel = channel.id,
        model = %meta.origin_model,
        actual_model = %meta.actual_model,
        "Relay request classified"
    );

    let inbound = match remainder {
        Some(remainder) => InboundRequest::streamed(parts.method, parts.headers, body, remainder),
        None => InboundRequest::new(parts.method, parts.headers, body),
    };
    Ok((meta, inbound))
}

async fn dispatch(state: Arc<AppState>, mut meta: Meta, inbound: InboundRequest) -> Response {
    let Some(adaptor) = state.registry.get(meta.channel.channel_type) else {
        return RelayError::Internal(format!(
            "no adaptor registered for {}",
            meta.channel.channel_type
        ))
        .into_response();
    };

    let (writer, receiver) = ResponseWriter::channel(state.relay.capture_limit());
    let span = info_span!("relay", request_id = %meta.request_id, mode = %meta.mode());
    let price = state.config.model(&meta.origin_model).map(|m| m.price.clone());

    tokio::spawn(
        async move {
            let outcome = state
                .relay
                .run(adaptor.as_ref(), &mut meta, inbound, writer)
                .await;
            state.sink.record(&meta, &outcome, price.as_ref());
        }
        .instrument(span),
    );

    receiver.into_response().await
}

async fn read_body(body: Body, limit: usize) -> RelayResult<Bytes> {
    to_bytes(body, limit)
        .await
        .map_err(|e| RelayError::InvalidRequest(format!("Failed to read request body: {}", e)))
}

/// Read a multipart upload up to its `model` part and stream the rest
///
/// Returns the buffered head and, when the head already holds a complete `model`
/// field, the unread remainder.
async fn read_upload(
    body: Body,
    boundary: &str,
    limit: usize,
) -> RelayResult<(Bytes, Option<BodyRemainder>)> {
    let mut chunks = body.into_data_stream();
    let mut head = BytesMut::new();
    let mut sniffing = true;

    loop {
        if sniffing {
            if multipart::text_field(&head, boundary, "model").is_some() {
                let budget = limit - head.len();
                return Ok((head.freeze(), Some(forward_remainder(chunks, budget))));
            }
            // `model` comes after the file part: buffer everything
            sniffing = head.len() < UPLOAD_HEAD_LIMIT;
        }

        match chunks.next().await {
            Some(Ok(chunk)) => {
                if head.len() + chunk.len() > limit {
                    return Err(RelayError::InvalidRequest(format!(
                        "request body exceeds {} bytes",
                        limit
                    )));
                }
                head.extend_from_slice(&chunk);
            }
            Some(Err(e)) => {
                return Err(RelayError::InvalidRequest(format!(
                    "Failed to read request body: {}",
                    e
                )))
            }
            None => return Ok((head.freeze(), None)),
        }
    }
}

/// Pump the rest of an upload through a bounded channel so the upstream request
/// body can stream it
fn forward_remainder(mut chunks: BodyDataStream, mut budget: usize) -> BodyRemainder {
    let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(chunk) = chunks.next().await {
            let item = match chunk {
                Ok(chunk) if chunk.len() <= budget => {
                    budget -= chunk.len();
                    Ok(chunk)
                }
                Ok(_) => Err(io::Error::new(io::ErrorKind::InvalidData, "request body too large")),
                Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

fn is_json(headers: &HeaderMap) -> bool {
    content_type(headers).is_some_and(|ct| ct.starts_with("application/json"))
}

/// Model name from the path, the multipart form or the JSON body
fn origin_model(
    endpoint: &Endpoint,
    headers: &HeaderMap,
    body: &[u8],
    json: Option<&Value>,
) -> RelayResult<String> {
    if endpoint.mode.is_job_lookup() {
        return Ok(String::new());
    }
    if let Some(model) = &endpoint.path_model {
        return Ok(model.clone());
    }

    let model = match json {
        Some(json) => json.get("model").and_then(Value::as_str).map(str::to_string),
        None => content_type(headers)
            .and_then(multipart::boundary)
            .and_then(|boundary| multipart::text_field(body, boundary, "model")),
    };

    model
        .filter(|m| !m.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest("model is required".to_string()))
}
