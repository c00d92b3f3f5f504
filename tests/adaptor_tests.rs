//! Adaptor contract tests
//!
//! URL resolution, header setup and request conversion for every registered
//! adaptor, plus full relay runs against a mocked upstream.

use airelay::providers::azure::{parse_key, DEFAULT_API_VERSION};
use airelay::providers::{AnthropicAdaptor, AzureAdaptor, BaiduAdaptor, CohereAdaptor};
use airelay::relay::{
    Adaptor, AdaptorRegistry, Channel, ChannelType, InboundRequest, Meta, Mode, Relay,
    RelayState, ResponseWriter,
};
use airelay::utils::error::RelayError;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use httpmock::prelude::*;
use serde_json::{json, Value};

fn meta(channel_type: ChannelType, mode: Mode, base_url: &str, key: &str) -> Meta {
    let channel = Channel::new(1, channel_type, key).with_base_url(base_url);
    let mut meta = Meta::new(mode, channel, "gpt-4.1", "gpt-4.1");
    meta.job_id = Some("job-1".to_string());
    meta.generation_id = Some("gen-1".to_string());
    meta
}

fn json_request(body: Value) -> InboundRequest {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    InboundRequest::new(Method::POST, headers, Bytes::from(body.to_string()))
}

#[test]
fn test_registry_has_every_channel_type() {
    let registry = AdaptorRegistry::builtin();
    assert_eq!(registry.len(), ChannelType::ALL.len());
    for channel_type in ChannelType::ALL {
        let adaptor = registry.get(channel_type).unwrap();
        assert_eq!(adaptor.name(), channel_type.as_str());
        assert_eq!(adaptor.metadata().name, adaptor.name());
    }
}

#[test]
fn test_composed_adaptors_share_openai_base() {
    let registry = AdaptorRegistry::builtin();
    let base = registry.get(ChannelType::OpenAI).unwrap().metadata();

    // Azure advertises the OpenAI catalog with its own modes
    let azure = registry.get(ChannelType::Azure).unwrap().metadata();
    assert_eq!(azure.models, base.models);
    assert_ne!(azure.modes, base.modes);

    for channel_type in [ChannelType::Cohere, ChannelType::Baidu, ChannelType::Groq] {
        let adaptor = registry.get(channel_type).unwrap();
        let meta = meta(channel_type, Mode::ChatCompletions, "https://upstream.test/v1", "sk-shared");
        let mut headers = HeaderMap::new();
        adaptor.setup_request_header(&meta, &mut headers).unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-shared", "{}", channel_type);

        let converted = adaptor
            .convert_request(&mut meta.clone(), &json_request(json!({"model": "alias", "stream": true})))
            .unwrap();
        let body: Value = serde_json::from_slice(&converted.body).unwrap();
        assert_eq!(body["stream_options"]["include_usage"], json!(true), "{}", channel_type);
    }
}

#[test]
fn test_every_supported_mode_resolves_a_url() {
    let registry = AdaptorRegistry::builtin();
    for (channel_type, adaptor) in registry.iter() {
        for &mode in adaptor.supported_modes() {
            let meta = meta(channel_type, mode, "https://upstream.test/v1", "sk-test");
            let url = adaptor
                .request_url(&meta)
                .unwrap_or_else(|e| panic!("{} {}: {}", channel_type, mode, e));
            assert!(
                url.url.starts_with("https://upstream.test/v1"),
                "{} {} resolved {}",
                channel_type,
                mode,
                url.url
            );
        }
    }
}

#[test]
fn test_unsupported_modes_are_typed_errors() {
    let registry = AdaptorRegistry::builtin();
    for (channel_type, adaptor) in registry.iter() {
        for mode in Mode::ALL {
            if adaptor.supports(mode) {
                continue;
            }
            let meta = meta(channel_type, mode, "https://upstream.test/v1", "sk-test");
            match adaptor.request_url(&meta) {
                Err(RelayError::UnsupportedMode { mode: rejected }) => assert_eq!(rejected, mode),
                other => panic!("{} {}: expected unsupported mode, got {:?}", channel_type, mode, other),
            }
        }
    }
}

#[test]
fn test_default_base_urls() {
    let registry = AdaptorRegistry::builtin();
    for (channel_type, adaptor) in registry.iter() {
        let base = adaptor.default_base_url();
        if channel_type == ChannelType::Azure {
            assert!(base.is_empty());
        } else {
            assert!(base.starts_with("https://"), "{}: {}", channel_type, base);
        }
    }
}

#[test]
fn test_azure_key_parsing() {
    assert_eq!(parse_key("abc|2024-01-01"), ("abc", "2024-01-01"));
    assert_eq!(parse_key("abc"), ("abc", DEFAULT_API_VERSION));
    assert_eq!(parse_key("abc|"), ("abc", DEFAULT_API_VERSION));
}

#[test]
fn test_azure_urls_and_headers() {
    let adaptor = AzureAdaptor::new();
    let mut chat = meta(
        ChannelType::Azure,
        Mode::ChatCompletions,
        "https://res.openai.azure.com/",
        "secret|2024-10-21",
    );
    chat.actual_model = "gpt-3.5-turbo".to_string();

    let url = adaptor.request_url(&chat).unwrap();
    assert_eq!(
        url.url,
        "https://res.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2024-10-21"
    );

    let mut headers = HeaderMap::new();
    adaptor.setup_request_header(&chat, &mut headers).unwrap();
    assert_eq!(headers["api-key"], "secret");
    assert!(headers.get(header::AUTHORIZATION).is_none());

    let lookup = meta(
        ChannelType::Azure,
        Mode::VideoGenerationsGetJobs,
        "https://res.openai.azure.com",
        "secret",
    );
    let url = adaptor.request_url(&lookup).unwrap();
    assert_eq!(url.method, Method::GET);
    assert!(url.url.contains("/video/generations/jobs/job-1"));

    let content = meta(
        ChannelType::Azure,
        Mode::VideoGenerationsContent,
        "https://res.openai.azure.com",
        "secret",
    );
    assert!(adaptor
        .request_url(&content)
        .unwrap()
        .url
        .contains("/video/generations/gen-1/content/video"));
}

#[test]
fn test_azure_requires_resource_url() {
    let meta = meta(ChannelType::Azure, Mode::ChatCompletions, "", "secret");
    assert!(matches!(
        AzureAdaptor::new().request_url(&meta),
        Err(RelayError::InvalidRequest(_))
    ));
}

#[test]
fn test_baidu_lowercases_model_only_on_the_wire() {
    let adaptor = BaiduAdaptor::new();
    let mut meta = meta(ChannelType::Baidu, Mode::ChatCompletions, "https://q.test/v2", "bce-v3/ak/sk");
    meta.actual_model = "ERNIE-4.5-Turbo-128K".to_string();

    let converted = adaptor
        .convert_request(&mut meta, &json_request(json!({"model": "x", "messages": []})))
        .unwrap();
    let body: Value = serde_json::from_slice(&converted.body).unwrap();
    assert_eq!(body["model"], "ernie-4.5-turbo-128k");
    assert_eq!(meta.actual_model, "ERNIE-4.5-Turbo-128K");

    let validator = adaptor.key_validator().unwrap();
    assert!(validator.validate_key("bce-v3/ak/sk").is_ok());
    assert!(validator.validate_key("sk-plain").is_err());
}

#[test]
fn test_anthropic_converts_chat_request() {
    let mut meta = meta(
        ChannelType::Anthropic,
        Mode::ChatCompletions,
        "https://api.anthropic.com/v1",
        "sk-ant",
    );
    meta.actual_model = "claude-sonnet-4-5".to_string();

    let converted = AnthropicAdaptor::new()
        .convert_request(
            &mut meta,
            &json_request(json!({
                "model": "claude",
                "stream": true,
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "Hi"}
                ]
            })),
        )
        .unwrap();
    let body: Value = serde_json::from_slice(&converted.body).unwrap();
    assert_eq!(body["model"], "claude-sonnet-4-5");
    assert_eq!(body["system"], "Be brief");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["stream"], true);
    assert!(body["max_tokens"].as_u64().unwrap() > 0);

    let mut headers = HeaderMap::new();
    AnthropicAdaptor::new()
        .setup_request_header(&meta, &mut headers)
        .unwrap();
    assert_eq!(headers["x-api-key"], "sk-ant");
    assert!(headers.contains_key("anthropic-version"));
}

#[test]
fn test_compatible_providers_reject_unsupported_rerank() {
    let registry = AdaptorRegistry::builtin();
    for channel_type in [ChannelType::DeepSeek, ChannelType::Groq, ChannelType::OpenRouter] {
        let adaptor = registry.get(channel_type).unwrap();
        assert!(!adaptor.supports(Mode::Rerank));
    }
    assert!(registry.get(ChannelType::Cohere).unwrap().supports(Mode::Rerank));
    assert!(registry.get(ChannelType::Baidu).unwrap().supports(Mode::Rerank));
}

async fn run_relay(
    adaptor: &dyn Adaptor,
    meta: &mut Meta,
    request: InboundRequest,
) -> (airelay::RelayOutcome, StatusCode, Value) {
    let relay = Relay::new(reqwest::Client::new(), 64 * 1024, false);
    let (writer, receiver) = ResponseWriter::channel(relay.capture_limit());
    let collector = tokio::spawn(receiver.collect());

    let outcome = relay.run(adaptor, meta, request, writer).await;
    let (head, body) = collector.await.unwrap().unwrap();
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (outcome, head.status, body)
}

#[tokio::test]
async fn test_relay_azure_end_to_end() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/openai/deployments/gpt-41/embeddings")
                .query_param("api-version", DEFAULT_API_VERSION)
                .header("api-key", "secret")
                .body_contains("\"model\":\"gpt-4.1\"");
            then.status(200).header("content-type", "application/json").body(
                r#"{"object":"list","data":[{"embedding":[0.1]}],"model":"gpt-4.1","usage":{"prompt_tokens":4,"total_tokens":4}}"#,
            );
        })
        .await;

    let mut meta = meta(ChannelType::Azure, Mode::Embeddings, &server.base_url(), "secret");
    let (outcome, status, body) = run_relay(
        &AzureAdaptor::new(),
        &mut meta,
        json_request(json!({"model": "gpt-4.1", "input": "hello"})),
    )
    .await;

    mock.assert_async().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    assert!(outcome.is_success());
    assert_eq!(outcome.state, RelayState::Done);
    assert_eq!(outcome.usage.input_tokens, 4);
    assert_eq!(outcome.usage.total_tokens, 4);
    assert!(outcome
        .detail
        .response_body
        .as_deref()
        .is_some_and(|body| body.contains("embedding")));
}

#[tokio::test]
async fn test_relay_cohere_rerank_usage_fallback() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v2/rerank")
                .header("authorization", "Bearer co-key");
            then.status(200).header("content-type", "application/json").body(
                r#"{"id":"r1","results":[{"index":1,"relevance_score":0.9}],"meta":{"billed_units":{"search_units":1}}}"#,
            );
        })
        .await;

    let channel = Channel::new(2, ChannelType::Cohere, "co-key").with_base_url(server.base_url());
    let mut meta = Meta::new(Mode::Rerank, channel, "rerank-v3.5", "rerank-v3.5").with_input_tokens(12);
    let (outcome, status, body) = run_relay(
        &CohereAdaptor::new(),
        &mut meta,
        json_request(json!({"model": "rerank-v3.5", "query": "q", "documents": ["a", "b"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["index"], 1);
    assert_eq!(outcome.usage.input_tokens, 12);
    assert_eq!(outcome.usage.total_tokens, 12);
}

#[tokio::test]
async fn test_relay_anthropic_upstream_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/messages");
            then.status(529).header("content-type", "application/json").body(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            );
        })
        .await;

    let mut meta = meta(ChannelType::Anthropic, Mode::ChatCompletions, &server.base_url(), "sk-ant");
    let (outcome, status, body) = run_relay(
        &AnthropicAdaptor::new(),
        &mut meta,
        json_request(json!({"model": "claude", "messages": [{"role": "user", "content": "Hi"}]})),
    )
    .await;

    assert_eq!(status.as_u16(), 529);
    assert_eq!(body["error"]["message"], "Overloaded");
    assert_eq!(body["error"]["type"], "overloaded_error");
    assert_eq!(outcome.state, RelayState::Errored);
    assert!(outcome.usage.is_empty());
    assert!(outcome.error.unwrap().is_upstream());
}

#[tokio::test]
async fn test_relay_unsupported_mode_never_calls_upstream() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|_when, then| {
            then.status(200);
        })
        .await;

    let mut meta = meta(ChannelType::Anthropic, Mode::Embeddings, &server.base_url(), "sk-ant");
    let (outcome, status, body) = run_relay(
        &AnthropicAdaptor::new(),
        &mut meta,
        json_request(json!({"model": "claude", "input": "x"})),
    )
    .await;

    mock.assert_hits_async(0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unsupported_mode");
    assert!(outcome.usage.is_empty());
    assert!(matches!(
        outcome.error,
        Some(RelayError::UnsupportedMode { mode: Mode::Embeddings })
    ));
}
