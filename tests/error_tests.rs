//! Error handling module unit tests

use airelay::relay::Mode;
use airelay::utils::error::*;
use airelay::Usage;
use axum::http::StatusCode;
use axum::response::IntoResponse;

fn transport(kind: TransportKind) -> RelayError {
    RelayError::Transport {
        kind,
        message: "connection dropped".to_string(),
    }
}

#[test]
fn test_relay_error_status_codes() {
    let test_cases = vec![
        (RelayError::Conversion("bad".to_string()), StatusCode::BAD_REQUEST),
        (
            RelayError::UnsupportedMode { mode: Mode::Rerank },
            StatusCode::BAD_REQUEST,
        ),
        (RelayError::InvalidRequest("bad".to_string()), StatusCode::BAD_REQUEST),
        (RelayError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
        (transport(TransportKind::Canceled), StatusCode::BAD_REQUEST),
        (transport(TransportKind::Timeout), StatusCode::REQUEST_TIMEOUT),
        (transport(TransportKind::Eof), StatusCode::SERVICE_UNAVAILABLE),
        (transport(TransportKind::UnexpectedEof), StatusCode::INTERNAL_SERVER_ERROR),
        (transport(TransportKind::Other), StatusCode::INTERNAL_SERVER_ERROR),
        (RelayError::Header("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        (RelayError::Decode("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        (RelayError::Internal("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        (
            RelayError::upstream(StatusCode::BAD_GATEWAY, "gateway"),
            StatusCode::BAD_GATEWAY,
        ),
    ];

    for (error, expected_status) in test_cases {
        assert_eq!(error.status_code(), expected_status, "{}", error);
    }
}

#[test]
fn test_relay_error_codes() {
    let test_cases = vec![
        (RelayError::Conversion("x".to_string()), "convert_request_failed"),
        (RelayError::Header("x".to_string()), "setup_request_header_failed"),
        (
            RelayError::UnsupportedMode { mode: Mode::ParsePdf },
            "unsupported_mode",
        ),
        (transport(TransportKind::Canceled), "request_canceled"),
        (transport(TransportKind::Timeout), "request_timeout"),
        (transport(TransportKind::Eof), "upstream_eof"),
        (transport(TransportKind::Other), "do_request_failed"),
        (RelayError::Decode("x".to_string()), "decode_response_failed"),
        (RelayError::NotFound("x".to_string()), "not_found"),
    ];

    for (error, expected_code) in test_cases {
        assert_eq!(error.error_code(), expected_code);
    }
}

#[test]
fn test_upstream_error_passthrough() {
    let error = RelayError::Upstream {
        status: StatusCode::UNAUTHORIZED,
        error_type: Some("authentication_error".to_string()),
        code: Some("invalid_api_key".to_string()),
        message: "Incorrect API key provided".to_string(),
    };

    assert!(error.is_upstream());
    assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(error.error_type(), "authentication_error");
    assert_eq!(error.error_code(), "invalid_api_key");
    assert_eq!(error.public_message(), "Incorrect API key provided");
}

#[test]
fn test_upstream_error_without_details() {
    let error = RelayError::Upstream {
        status: StatusCode::SERVICE_UNAVAILABLE,
        error_type: Some(String::new()),
        code: None,
        message: "overloaded".to_string(),
    };
    assert_eq!(error.error_type(), "upstream_error");
    assert_eq!(error.error_code(), "upstream_error");
}

#[test]
fn test_public_messages_hide_local_details() {
    let error = RelayError::Internal("mutex poisoned at src/relay/pool.rs".to_string());
    assert_eq!(error.public_message(), "internal server error");

    let error = RelayError::Transport {
        kind: TransportKind::Other,
        message: "dns error: failed to lookup address 10.0.0.12".to_string(),
    };
    assert_eq!(error.public_message(), "upstream request failed");
    assert!(!error.public_message().contains("10.0.0.12"));

    let error = RelayError::UnsupportedMode { mode: Mode::Rerank };
    assert!(error.public_message().contains("rerank"));
}

#[test]
fn test_should_log_details() {
    assert!(!RelayError::InvalidRequest("x".to_string()).should_log_details());
    assert!(!RelayError::NotFound("x".to_string()).should_log_details());
    assert!(RelayError::Internal("x".to_string()).should_log_details());
    assert!(transport(TransportKind::Timeout).should_log_details());
}

#[test]
fn test_error_response_shape() {
    let error = RelayError::InvalidRequest("model is required".to_string());
    let json = serde_json::to_value(error.to_error_response()).unwrap();

    assert_eq!(json["error"]["type"], "invalid_request_error");
    assert_eq!(json["error"]["code"], "invalid_request");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("model is required"));
}

#[tokio::test]
async fn test_into_response() {
    let response = RelayError::NotFound("no channel serves model 'x'".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["type"], "not_found_error");
}

#[test]
fn test_response_error_keeps_partial_usage() {
    let partial = Usage::tokens(12, 40);
    let error = ResponseError::with_usage(transport(TransportKind::UnexpectedEof), partial);
    assert_eq!(error.usage, partial);

    let error: ResponseError = RelayError::Decode("x".to_string()).into();
    assert!(error.usage.is_empty());
}

#[test]
fn test_error_context_helpers() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
    match parse.decode_context("Failed to decode upstream response") {
        Err(RelayError::Decode(msg)) => assert!(msg.starts_with("Failed to decode upstream response")),
        other => panic!("Expected decode error, got {:?}", other),
    }

    let header: Result<axum::http::HeaderValue, _> = axum::http::HeaderValue::from_str("bad\nvalue");
    assert!(matches!(
        header.header_context("Invalid header"),
        Err(RelayError::Header(_))
    ));
}
