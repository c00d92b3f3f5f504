//! Anthropic adaptor
//!
//! Native `/v1/messages` requests are relayed unchanged. Chat completions are
//! translated into a messages request, and the reply (JSON or SSE events) is
//! translated back into OpenAI chat completion objects and chunks.

use super::openai::decode_openai_error;
use crate::models::anthropic::{
    finish_reason, AnthropicError, AnthropicMessage, AnthropicTool, AnthropicUsage, BlockDelta,
    ContentBlock, ImageSource, MessagesRequest, MessagesResponse, StreamEvent,
};
use crate::models::openai::{
    ChatChoice, ChatCompletion, ChatCompletionChunk, ChatDelta, ChatMessage, ChatRequest,
    ChatUsage, ChunkChoice, ContentPart, FunctionCall, MessageContent, ToolCall,
};
use crate::models::Usage;
use crate::relay::adaptor::{
    insert_header, read_upstream_error, Adaptor, AdaptorMetadata, ConvertResult, InboundRequest,
    RequestUrl,
};
use crate::relay::node;
use crate::relay::stream::{is_event_stream, sse_data, sse_json_frame, LineScanner, DONE_FRAME};
use crate::relay::{Meta, Mode, ResponseWriter};
use crate::utils::error::{ErrorContext, RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Value of the `anthropic-version` header
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory upstream
const DEFAULT_MAX_TOKENS: u32 = 4096;

const MODES: &[Mode] = &[Mode::ChatCompletions, Mode::Anthropic];

const MODELS: &[&str] = &[
    "claude-opus-4-1",
    "claude-sonnet-4-5",
    "claude-3-7-sonnet-latest",
    "claude-3-5-haiku-latest",
];

/// Decode the Anthropic error shape, falling back to the OpenAI one
pub fn decode_anthropic_error(status: StatusCode, body: &[u8]) -> RelayError {
    match serde_json::from_slice::<AnthropicError>(body) {
        Ok(error) => RelayError::Upstream {
            status,
            error_type: Some(error.error.error_type.clone()).filter(|t| !t.is_empty()),
            code: Some(error.error.error_type).filter(|t| !t.is_empty()),
            message: error.error.message,
        },
        Err(_) => decode_openai_error(status, body),
    }
}

fn image_block(url: &str) -> ContentBlock {
    // data:<media type>;base64,<data>
    let inline = url.strip_prefix("data:").and_then(|rest| {
        let (media_type, data) = rest.split_once(";base64,")?;
        Some(ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
    });
    ContentBlock::Image {
        source: inline.unwrap_or_else(|| ImageSource::Url {
            url: url.to_string(),
        }),
    }
}

fn content_blocks(content: Option<&MessageContent>) -> Vec<ContentBlock> {
    match content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) if text.is_empty() => Vec::new(),
        Some(MessageContent::Text(text)) => vec![ContentBlock::Text { text: text.clone() }],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
                ContentPart::ImageUrl { image_url } => image_block(&image_url.url),
            })
            .collect(),
    }
}

fn tool_choice(choice: &Value) -> Option<Value> {
    let mapped = match choice {
        Value::String(choice) => match choice.as_str() {
            "auto" => serde_json::json!({"type": "auto"}),
            "required" => serde_json::json!({"type": "any"}),
            "none" => serde_json::json!({"type": "none"}),
            _ => return None,
        },
        Value::Object(_) => {
            let name = node::get(choice, "function.name")?.as_str()?;
            serde_json::json!({"type": "tool", "name": name})
        }
        _ => return None,
    };
    Some(mapped)
}

/// Translate an OpenAI chat request into a messages request
pub fn to_messages_request(request: ChatRequest, model: &str) -> RelayResult<MessagesRequest> {
    let mut system: Vec<String> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in request.messages {
        let (role, blocks) = match message.role.as_str() {
            "system" | "developer" => {
                if let Some(content) = &message.content {
                    system.push(content.extract_text());
                }
                continue;
            }
            "user" => ("user", content_blocks(message.content.as_ref())),
            "assistant" => {
                let mut blocks = content_blocks(message.content.as_ref());
                for call in message.tool_calls.unwrap_or_default() {
                    let arguments = call.function.arguments.unwrap_or_default();
                    let input = if arguments.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&arguments)
                            .conversion_context("Invalid tool call arguments")?
                    };
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.unwrap_or_default(),
                        name: call.function.name.unwrap_or_default(),
                        input,
                    });
                }
                ("assistant", blocks)
            }
            "tool" => {
                let tool_use_id = message.tool_call_id.ok_or_else(|| {
                    RelayError::Conversion("tool message without tool_call_id".to_string())
                })?;
                let content = message
                    .content
                    .as_ref()
                    .map(MessageContent::extract_text)
                    .unwrap_or_default();
                ("user", vec![ContentBlock::ToolResult { tool_use_id, content }])
            }
            other => {
                return Err(RelayError::Conversion(format!("unsupported message role: {}", other)))
            }
        };

        if blocks.is_empty() {
            continue;
        }
        // Consecutive messages with the same role must be merged
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(AnthropicMessage {
                role: role.to_string(),
                content: blocks,
            }),
        }
    }

    if messages.is_empty() {
        return Err(RelayError::Conversion("at least one message is required".to_string()));
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| AnthropicTool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool
                    .function
                    .parameters
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect()
    });

    Ok(MessagesRequest {
        model: model.to_string(),
        max_tokens: request
            .max_tokens
            .or(request.max_completion_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system.is_empty()).then(|| system.join("\n")),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.map(|stop| stop.into_vec()),
        stream: request.stream.then_some(true),
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(tool_choice),
    })
}

/// Translate a messages response into an OpenAI chat completion
pub fn to_chat_completion(response: MessagesResponse, model: &str) -> ChatCompletion {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::Thinking { thinking, .. } => reasoning.push_str(&thinking),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                index: None,
                id: Some(id),
                tool_type: Some("function".to_string()),
                function: FunctionCall {
                    name: Some(name),
                    arguments: Some(input.to_string()),
                },
            }),
            _ => {}
        }
    }

    let usage = response.usage.to_usage();
    ChatCompletion {
        id: response.id,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: Some(MessageContent::Text(text)),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                ..Default::default()
            },
            finish_reason: finish_reason(response.stop_reason.as_deref()),
        }],
        usage: Some(ChatUsage::from_usage(&usage)),
    }
}

/// Builds OpenAI chunks for one translated stream
struct ChunkBuilder {
    id: String,
    model: String,
    created: i64,
}

impl ChunkBuilder {
    fn chunk(&self, delta: ChatDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    fn usage_chunk(&self, usage: &Usage) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: Vec::new(),
            usage: Some(ChatUsage::from_usage(usage)),
        }
    }
}

fn start_event_stream(writer: &mut ResponseWriter) {
    writer.set_content_type("text/event-stream");
    writer
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    writer.write_header(StatusCode::OK);
}

fn stream_error(message: String, usage: &AnthropicUsage) -> ResponseError {
    error!("Upstream reported error mid-stream: {}", message);
    ResponseError::with_usage(
        RelayError::upstream(StatusCode::INTERNAL_SERVER_ERROR, message),
        usage.to_usage(),
    )
}

/// Translate an SSE event stream into OpenAI chunks
async fn chat_stream(
    meta: &Meta,
    response: reqwest::Response,
    writer: &mut ResponseWriter,
) -> Result<Usage, ResponseError> {
    start_event_stream(writer);

    let mut scanner = LineScanner::new(response.bytes_stream());
    let mut usage = AnthropicUsage::default();
    let mut builder = ChunkBuilder {
        id: String::new(),
        model: meta.origin_model.clone(),
        created: chrono::Utc::now().timestamp(),
    };
    // content block index -> tool call index
    let mut tool_indexes: HashMap<u32, u32> = HashMap::new();

    loop {
        let line = match scanner.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Upstream stream interrupted: {}", e);
                return Err(ResponseError::with_usage(e, usage.to_usage()));
            }
        };
        let Some(data) = sse_data(&line).filter(|d| !d.is_empty()) else {
            continue;
        };
        let event: StreamEvent = match serde_json::from_slice(data) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable stream event: {}", e);
                continue;
            }
        };

        let chunk = match event {
            StreamEvent::MessageStart { message } => {
                usage.merge(&message.usage);
                builder.id = message.id;
                builder.chunk(
                    ChatDelta {
                        role: Some("assistant".to_string()),
                        content: Some(String::new()),
                        ..Default::default()
                    },
                    None,
                )
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name, .. },
            } => {
                let tool_index = tool_indexes.len() as u32;
                tool_indexes.insert(index, tool_index);
                builder.chunk(
                    ChatDelta {
                        tool_calls: Some(vec![ToolCall {
                            index: Some(tool_index),
                            id: Some(id),
                            tool_type: Some("function".to_string()),
                            function: FunctionCall {
                                name: Some(name),
                                arguments: Some(String::new()),
                            },
                        }]),
                        ..Default::default()
                    },
                    None,
                )
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let delta = match delta {
                    BlockDelta::TextDelta { text } => ChatDelta {
                        content: Some(text),
                        ..Default::default()
                    },
                    BlockDelta::ThinkingDelta { thinking } => ChatDelta {
                        reasoning_content: Some(thinking),
                        ..Default::default()
                    },
                    BlockDelta::InputJsonDelta { partial_json } => ChatDelta {
                        tool_calls: Some(vec![ToolCall {
                            index: tool_indexes.get(&index).copied(),
                            function: FunctionCall {
                                name: None,
                                arguments: Some(partial_json),
                            },
                            ..Default::default()
                        }]),
                        ..Default::default()
                    },
                    BlockDelta::SignatureDelta { .. } | BlockDelta::Unknown => continue,
                };
                builder.chunk(delta, None)
            }
            StreamEvent::MessageDelta { delta, usage: delta_usage } => {
                usage.merge(&delta_usage);
                builder.chunk(ChatDelta::default(), finish_reason(delta.stop_reason.as_deref()))
            }
            StreamEvent::MessageStop => break,
            StreamEvent::Error { error } => return Err(stream_error(error.message, &usage)),
            StreamEvent::ContentBlockStart { .. }
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::Ping
            | StreamEvent::Unknown => continue,
        };

        let frame = sse_json_frame(&chunk).map_err(|e| ResponseError::with_usage(e, usage.to_usage()))?;
        writer.write(frame).await;
    }

    let total = usage.to_usage();
    let frame = sse_json_frame(&builder.usage_chunk(&total))
        .map_err(|e| ResponseError::with_usage(e, total))?;
    writer.write(frame).await;
    writer.write(Bytes::from_static(DONE_FRAME)).await;
    Ok(total)
}

/// Relay a native SSE stream line by line, reading usage on the way
async fn native_stream(
    response: reqwest::Response,
    writer: &mut ResponseWriter,
) -> Result<Usage, ResponseError> {
    start_event_stream(writer);

    let mut scanner = LineScanner::new(response.bytes_stream());
    let mut usage = AnthropicUsage::default();

    loop {
        let line = match scanner.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Upstream stream interrupted: {}", e);
                return Err(ResponseError::with_usage(e, usage.to_usage()));
            }
        };

        let mut frame = BytesMut::with_capacity(line.len() + 1);
        frame.put_slice(&line);
        frame.put_u8(b'\n');
        writer.write(frame.freeze()).await;

        let Some(data) = sse_data(&line).filter(|d| !d.is_empty()) else {
            continue;
        };
        match serde_json::from_slice::<StreamEvent>(data) {
            Ok(StreamEvent::MessageStart { message }) => usage.merge(&message.usage),
            Ok(StreamEvent::MessageDelta { usage: delta_usage, .. }) => usage.merge(&delta_usage),
            Ok(StreamEvent::Error { error }) => return Err(stream_error(error.message, &usage)),
            Ok(_) => {}
            Err(e) => debug!("Unparsed stream event: {}", e),
        }
    }

    Ok(usage.to_usage())
}

/// Anthropic adaptor
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdaptor;

impl AnthropicAdaptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adaptor for AnthropicAdaptor {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn supported_modes(&self) -> &'static [Mode] {
        MODES
    }

    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl> {
        match meta.mode() {
            Mode::ChatCompletions | Mode::Anthropic => {
                Ok(RequestUrl::post(format!("{}/messages", meta.base_url())))
            }
            mode => Err(RelayError::UnsupportedMode { mode }),
        }
    }

    fn convert_request(&self, meta: &mut Meta, request: &InboundRequest) -> RelayResult<ConvertResult> {
        match meta.mode() {
            Mode::Anthropic => {
                let mut body = request.json()?;
                if !meta.actual_model.is_empty() {
                    node::set(&mut body, "model", Value::String(meta.actual_model.clone()));
                }
                let mut converted = ConvertResult::json(&body)?;
                if let Some(beta) = request.headers.get("anthropic-beta") {
                    converted.headers.insert("anthropic-beta", beta.clone());
                }
                Ok(converted)
            }
            Mode::ChatCompletions => {
                let chat: ChatRequest = serde_json::from_slice(&request.body)
                    .conversion_context("Invalid chat completion request")?;
                let messages = to_messages_request(chat, &meta.actual_model)?;
                ConvertResult::json(&messages)
            }
            mode => Err(RelayError::UnsupportedMode { mode }),
        }
    }

    fn setup_request_header(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()> {
        insert_header(headers, "x-api-key", &meta.channel.key)?;
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(())
    }

    async fn do_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
    ) -> Result<Usage, ResponseError> {
        if !response.status().is_success() {
            return Err(read_upstream_error(response, decode_anthropic_error).await.into());
        }

        let streaming = is_event_stream(&response);
        match (meta.mode(), streaming) {
            (Mode::Anthropic, true) => native_stream(response, writer).await,
            (Mode::Anthropic, false) => {
                let status = response.status();
                let body = response.bytes().await.map_err(RelayError::transport)?;
                let message: MessagesResponse = serde_json::from_slice(&body)
                    .decode_context("Failed to decode messages response")?;
                writer.set_content_type("application/json");
                writer.write_header(status);
                writer.write(body).await;
                Ok(message.usage.to_usage())
            }
            (_, true) => chat_stream(meta, response, writer).await,
            (_, false) => {
                let body = response.bytes().await.map_err(RelayError::transport)?;
                let message: MessagesResponse = serde_json::from_slice(&body)
                    .decode_context("Failed to decode messages response")?;
                let usage = message.usage.to_usage();
                let completion = to_chat_completion(message, &meta.origin_model);
                writer.write_json(StatusCode::OK, &completion).await?;
                Ok(usage)
            }
        }
    }

    fn metadata(&self) -> AdaptorMetadata {
        AdaptorMetadata {
            name: self.name(),
            default_base_url: DEFAULT_BASE_URL,
            modes: MODES.to_vec(),
            models: MODELS,
            key_help: "sk-ant-...",
            features: &["native messages passthrough", "chat completions translation"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::openai::{Function, ImageUrl, Tool};

    fn user(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: Some(MessageContent::Text(text.to_string())),
            ..Default::default()
        }
    }

    #[test]
    fn test_system_and_merge() {
        let request = ChatRequest {
            model: "claude".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(MessageContent::Text("Be brief".to_string())),
                    ..Default::default()
                },
                user("Hello"),
                user("Again"),
            ],
            ..Default::default()
        };
        let converted = to_messages_request(request, "claude-sonnet-4-5").unwrap();
        assert_eq!(converted.system.as_deref(), Some("Be brief"));
        assert_eq!(converted.messages.len(), 1);
        assert_eq!(converted.messages[0].content.len(), 2);
        assert_eq!(converted.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(converted.model, "claude-sonnet-4-5");
    }

    #[test]
    fn test_tool_round_trip_messages() {
        let request = ChatRequest {
            messages: vec![
                user("weather?"),
                ChatMessage {
                    role: "assistant".to_string(),
                    tool_calls: Some(vec![ToolCall {
                        id: Some("call_1".to_string()),
                        tool_type: Some("function".to_string()),
                        function: FunctionCall {
                            name: Some("get_weather".to_string()),
                            arguments: Some(r#"{"city":"Paris"}"#.to_string()),
                        },
                        ..Default::default()
                    }]),
                    ..Default::default()
                },
                ChatMessage {
                    role: "tool".to_string(),
                    tool_call_id: Some("call_1".to_string()),
                    content: Some(MessageContent::Text("sunny".to_string())),
                    ..Default::default()
                },
            ],
            tools: Some(vec![Tool {
                tool_type: "function".to_string(),
                function: Function {
                    name: "get_weather".to_string(),
                    description: None,
                    parameters: None,
                },
            }]),
            tool_choice: Some(serde_json::json!("required")),
            ..Default::default()
        };
        let converted = to_messages_request(request, "m").unwrap();
        assert_eq!(converted.messages.len(), 3);
        assert!(matches!(
            &converted.messages[1].content[0],
            ContentBlock::ToolUse { name, .. } if name == "get_weather"
        ));
        assert!(matches!(
            &converted.messages[2].content[0],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"
        ));
        assert_eq!(converted.tool_choice, Some(serde_json::json!({"type": "any"})));
    }

    #[test]
    fn test_inline_image() {
        let content = MessageContent::Parts(vec![ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: "data:image/png;base64,AAAA".to_string(),
                detail: None,
            },
        }]);
        match &content_blocks(Some(&content))[0] {
            ContentBlock::Image {
                source: ImageSource::Base64 { media_type, data },
            } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, "AAAA");
            }
            other => panic!("Expected base64 image, got {:?}", other),
        }
    }

    #[test]
    fn test_to_chat_completion() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"id":"msg_1","model":"claude","content":[{"type":"text","text":"Hi"}],
                "stop_reason":"end_turn","usage":{"input_tokens":9,"output_tokens":2}}"#,
        )
        .unwrap();
        let completion = to_chat_completion(response, "claude-alias");
        assert_eq!(completion.model, "claude-alias");
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = completion.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 9);
        assert_eq!(usage.total_tokens, 11);
    }

    #[test]
    fn test_decode_anthropic_error() {
        let err = decode_anthropic_error(
            StatusCode::TOO_MANY_REQUESTS,
            br#"{"type":"error","error":{"type":"rate_limit_error","message":"Too many"}}"#,
        );
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.error_type(), "rate_limit_error");
        assert_eq!(err.public_message(), "Too many");
    }

    #[test]
    fn test_headers() {
        let channel = crate::relay::Channel::new(2, crate::relay::ChannelType::Anthropic, "sk-ant");
        let meta = Meta::new(Mode::Anthropic, channel, "claude", "claude");
        let mut headers = HeaderMap::new();
        AnthropicAdaptor.setup_request_header(&meta, &mut headers).unwrap();
        assert_eq!(headers["x-api-key"], "sk-ant");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
    }
}
