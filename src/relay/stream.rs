//! Response normalization
//!
//! Shared handlers for OpenAI-shaped upstreams. Streaming replies are scanned line by
//! line and every event is forwarded as soon as it is parsed; non-streaming replies
//! are decoded whole. Both paths extract `Usage`.

use super::meta::Meta;
use super::mode::Mode;
use super::node::{self, NodeTransform};
use super::pool::{PooledBuffer, SCAN_POOL};
use super::tokenizer::tokenizer;
use super::writer::ResponseWriter;
use crate::models::openai::ChatUsage;
use crate::models::Usage;
use crate::utils::error::{ErrorContext, RelayError, ResponseError};
use axum::http::{header, HeaderValue, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::error::Error as StdError;
use std::pin::Pin;
use tracing::{debug, error, warn};

/// Terminal SSE marker
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// How streamed usage objects combine into the final `Usage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsagePolicy {
    /// The last chunk carrying non-empty usage replaces everything before it
    #[default]
    LastWins,
    /// Token counters are last-wins, web search counts are summed over all chunks
    SumWebSearch,
}

impl UsagePolicy {
    pub fn apply(&self, acc: &mut Usage, chunk: Usage) {
        match self {
            UsagePolicy::LastWins => {
                if !chunk.is_empty() {
                    *acc = chunk;
                }
            }
            UsagePolicy::SumWebSearch => {
                let searches = acc.web_search_count.saturating_add(chunk.web_search_count);
                if chunk.has_tokens() {
                    *acc = chunk;
                }
                acc.web_search_count = searches;
            }
        }
    }
}

/// Per-adaptor knobs for the shared handlers
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseHooks {
    pub policy: UsagePolicy,
    /// Run on every decoded chunk or body before usage extraction
    pub transforms: &'static [NodeTransform],
}

/// Splits a byte stream into lines using a pooled scan buffer
pub struct LineScanner<S> {
    stream: Pin<Box<S>>,
    buf: PooledBuffer<'static>,
    finished: bool,
}

impl<S, E> LineScanner<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: StdError + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Box::pin(stream),
            buf: SCAN_POOL.get(),
            finished: false,
        }
    }

    /// Next line without its terminator. A trailing unterminated line is returned
    /// once the stream ends.
    pub async fn next_line(&mut self) -> Result<Option<Bytes>, RelayError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return Ok(Some(line.freeze()));
            }

            if self.finished {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = self.buf.split();
                return Ok(Some(rest.freeze()));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(RelayError::transport(e)),
                None => self.finished = true,
            }
        }
    }
}

/// Payload of an SSE `data:` line
pub fn sse_data(line: &[u8]) -> Option<&[u8]> {
    let rest = line.strip_prefix(b"data:")?;
    let rest = rest.strip_prefix(b" ").unwrap_or(rest);
    let end = rest
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    Some(&rest[..end])
}

pub fn is_done(data: &[u8]) -> bool {
    data == b"[DONE]"
}

/// `data: <payload>\n\n`
pub fn sse_frame(data: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(data.len() + 8);
    frame.put_slice(b"data: ");
    frame.put_slice(data);
    frame.put_slice(b"\n\n");
    frame.freeze()
}

pub fn sse_json_frame<T: Serialize>(value: &T) -> Result<Bytes, RelayError> {
    let data = serde_json::to_vec(value).internal_context("Failed to encode stream chunk")?;
    Ok(sse_frame(&data))
}

pub fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

/// Usage from an OpenAI-shaped `usage` member, if present
pub fn extract_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage").filter(|u| !u.is_null())?;
    match ChatUsage::deserialize(usage) {
        Ok(usage) => Some(usage.to_usage()),
        Err(e) => {
            warn!("Ignoring malformed usage object: {}", e);
            None
        }
    }
}

fn restore_model(meta: &Meta, value: &mut Value) {
    if meta.origin_model.is_empty() {
        return;
    }
    if let Some(model) = value.get_mut("model").filter(|m| m.is_string()) {
        *model = Value::String(meta.origin_model.clone());
    }
}

fn push_delta_text(value: &Value, text: &mut String) {
    let Some(choices) = value.get("choices").and_then(Value::as_array) else {
        return;
    };
    for choice in choices {
        for path in [
            "delta.content",
            "delta.reasoning_content",
            "message.content",
            "message.reasoning_content",
            "text",
        ] {
            if let Some(s) = node::get(choice, path).and_then(Value::as_str) {
                text.push_str(s);
            }
        }
        if let Some(calls) = node::get(choice, "delta.tool_calls").and_then(Value::as_array) {
            for call in calls {
                if let Some(args) = node::get(call, "function.arguments").and_then(Value::as_str) {
                    text.push_str(args);
                }
            }
        }
    }
}

/// Stream an OpenAI-shaped SSE reply to the caller
pub async fn openai_stream_handler(
    meta: &Meta,
    response: reqwest::Response,
    writer: &mut ResponseWriter,
    hooks: ResponseHooks,
) -> Result<Usage, ResponseError> {
    writer.set_content_type("text/event-stream");
    writer
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    writer.write_header(StatusCode::OK);

    let mut scanner = LineScanner::new(response.bytes_stream());
    let mut usage = Usage::default();
    let mut text = String::new();

    loop {
        let line = match scanner.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Upstream stream interrupted: {}", e);
                return Err(ResponseError::with_usage(e, usage));
            }
        };
        let Some(data) = sse_data(&line) else {
            continue;
        };
        if data.is_empty() {
            continue;
        }
        if is_done(data) {
            break;
        }

        let mut chunk: Value = match serde_json::from_slice(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Forwarding undecodable stream chunk verbatim: {}", e);
                writer.write(sse_frame(data)).await;
                continue;
            }
        };

        if let Some(upstream_error) = chunk.get("error").filter(|e| e.is_object()) {
            let message = upstream_error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream stream error")
                .to_string();
            writer.write(sse_frame(data)).await;
            error!("Upstream reported error mid-stream: {}", message);
            return Err(ResponseError::with_usage(
                RelayError::upstream(StatusCode::INTERNAL_SERVER_ERROR, message),
                usage,
            ));
        }

        node::apply(&mut chunk, hooks.transforms);
        if let Some(chunk_usage) = extract_usage(&chunk) {
            hooks.policy.apply(&mut usage, chunk_usage);
        }
        push_delta_text(&chunk, &mut text);
        restore_model(meta, &mut chunk);

        let frame = sse_json_frame(&chunk).map_err(|e| ResponseError::with_usage(e, usage))?;
        writer.write(frame).await;
    }

    writer.write(Bytes::from_static(DONE_FRAME)).await;

    if !usage.has_tokens() {
        debug!("Stream carried no usage, counting locally");
        usage.input_tokens = meta.input_tokens;
        usage.output_tokens = tokenizer().count_text(&meta.actual_model, &text);
    }
    Ok(usage)
}

/// Decode an OpenAI-shaped JSON reply and forward it
pub async fn openai_json_handler(
    meta: &Meta,
    response: reqwest::Response,
    writer: &mut ResponseWriter,
    hooks: ResponseHooks,
) -> Result<Usage, ResponseError> {
    let status = response.status();
    let body = response.bytes().await.map_err(RelayError::transport)?;
    let mut value: Value =
        serde_json::from_slice(&body).decode_context("Failed to decode upstream response")?;

    node::apply(&mut value, hooks.transforms);
    let mut usage = extract_usage(&value).unwrap_or_default();
    if !usage.has_tokens() {
        usage = fallback_usage(meta, &value);
    }
    restore_model(meta, &mut value);

    writer.write_json(status, &value).await?;
    Ok(usage)
}

fn fallback_usage(meta: &Meta, value: &Value) -> Usage {
    match meta.mode() {
        Mode::ChatCompletions | Mode::Completions => {
            let mut text = String::new();
            push_delta_text(value, &mut text);
            Usage::tokens(
                meta.input_tokens,
                tokenizer().count_text(&meta.actual_model, &text),
            )
        }
        Mode::ImagesGenerations | Mode::ImagesEdits => {
            let images = value
                .get("data")
                .and_then(Value::as_array)
                .map_or(0, |data| data.len() as u64);
            Usage::tokens(meta.input_tokens, images)
        }
        _ => Usage::tokens(meta.input_tokens, 0),
    }
}

/// Forward the upstream body verbatim with its status and content type
pub async fn passthrough_handler(
    response: reqwest::Response,
    writer: &mut ResponseWriter,
) -> Result<(), ResponseError> {
    if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
        writer
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type.clone());
    }
    writer.write_header(response.status());

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => writer.write(chunk).await,
            Err(e) => {
                error!("Upstream body interrupted: {}", e);
                return Err(RelayError::transport(e).into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_line_scanner_reassembles_split_lines() {
        let mut scanner = LineScanner::new(chunks(&["data: {\"a\"", ":1}\r\n\ndata: [DO", "NE]"]));
        assert_eq!(
            scanner.next_line().await.unwrap().as_deref(),
            Some(&b"data: {\"a\":1}"[..])
        );
        assert_eq!(scanner.next_line().await.unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(
            scanner.next_line().await.unwrap().as_deref(),
            Some(&b"data: [DONE]"[..])
        );
        assert_eq!(scanner.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_scanner_reports_transport_error() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: x\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut scanner = LineScanner::new(stream::iter(parts));
        assert!(scanner.next_line().await.unwrap().is_some());
        match scanner.next_line().await {
            Err(RelayError::Transport { kind, .. }) => {
                assert_eq!(kind, crate::utils::error::TransportKind::Eof)
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_sse_data() {
        assert_eq!(sse_data(b"data: {\"x\":1}  "), Some(&b"{\"x\":1}"[..]));
        assert_eq!(sse_data(b"data:[DONE]"), Some(&b"[DONE]"[..]));
        assert_eq!(sse_data(b"event: ping"), None);
        assert!(is_done(sse_data(b"data: [DONE]").unwrap()));
    }

    #[test]
    fn test_last_wins_policy() {
        let mut acc = Usage::default();
        UsagePolicy::LastWins.apply(&mut acc, Usage::tokens(5, 1));
        UsagePolicy::LastWins.apply(&mut acc, Usage::default());
        UsagePolicy::LastWins.apply(&mut acc, Usage::tokens(5, 9));
        assert_eq!(acc, Usage::tokens(5, 9));
    }

    #[test]
    fn test_sum_web_search_policy() {
        let searched = |n| Usage {
            web_search_count: n,
            ..Default::default()
        };
        let mut acc = Usage::default();
        UsagePolicy::SumWebSearch.apply(&mut acc, searched(1));
        UsagePolicy::SumWebSearch.apply(&mut acc, searched(2));
        UsagePolicy::SumWebSearch.apply(&mut acc, Usage::tokens(10, 4));
        assert_eq!(acc.input_tokens, 10);
        assert_eq!(acc.output_tokens, 4);
        assert_eq!(acc.web_search_count, 3);
    }

    #[test]
    fn test_extract_usage() {
        let chunk = serde_json::json!({"usage": {"prompt_tokens": 2, "completion_tokens": 3}});
        assert_eq!(extract_usage(&chunk), Some(Usage::tokens(2, 3)));
        assert_eq!(extract_usage(&serde_json::json!({"usage": null})), None);
    }
}
