//! Relay orchestrator
//!
//! Drives one request through convert → resolve → build → send → normalize and
//! returns the usage and diagnostics for billing and logging. States only move
//! forward; any failure ends the run in `Errored`.

use super::adaptor::{Adaptor, InboundRequest};
use super::detail::{should_capture_request, RequestDetail};
use super::meta::Meta;
use super::writer::ResponseWriter;
use crate::models::Usage;
use crate::utils::error::{RelayError, ResponseError};
use crate::utils::logging::truncate;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, field, info, info_span, warn};

/// Bytes of each captured body written to the debug log
const DEBUG_BODY_LOG_LIMIT: usize = 4096;

/// Orchestrator progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelayState {
    Init,
    BodyCaptured,
    Converted,
    UrlResolved,
    RequestBuilt,
    HeadersSet,
    Sent,
    ResponseReceived,
    Normalized,
    Done,
    Errored,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Init => "init",
            RelayState::BodyCaptured => "body_captured",
            RelayState::Converted => "converted",
            RelayState::UrlResolved => "url_resolved",
            RelayState::RequestBuilt => "request_built",
            RelayState::HeadersSet => "headers_set",
            RelayState::Sent => "sent",
            RelayState::ResponseReceived => "response_received",
            RelayState::Normalized => "normalized",
            RelayState::Done => "done",
            RelayState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Result of one relay run, handed to the billing/logging layer
#[derive(Debug)]
pub struct RelayOutcome {
    pub usage: Usage,
    pub detail: RequestDetail,
    pub error: Option<RelayError>,
    /// Last state reached before finishing or failing
    pub state: RelayState,
}

impl RelayOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Shared relay pipeline
#[derive(Debug, Clone)]
pub struct Relay {
    client: reqwest::Client,
    capture_limit: usize,
    debug: bool,
}

impl Relay {
    pub fn new(client: reqwest::Client, capture_limit: usize, debug: bool) -> Self {
        Self {
            client,
            capture_limit,
            debug,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn capture_limit(&self) -> usize {
        self.capture_limit
    }

    /// Run the pipeline. The response is written through `writer`; nothing is
    /// returned to the caller directly.
    pub async fn run(
        &self,
        adaptor: &dyn Adaptor,
        meta: &mut Meta,
        mut request: InboundRequest,
        mut writer: ResponseWriter,
    ) -> RelayOutcome {
        let started = Instant::now();
        let mut detail = RequestDetail::default();
        let mut state = RelayState::Init;

        let result = self
            .drive(adaptor, meta, &mut request, &mut writer, &mut detail, &mut state)
            .await;
        drop(request);

        let (mut usage, error) = match result {
            Ok(usage) => {
                state = RelayState::Done;
                (usage, None)
            }
            Err(ResponseError { error, usage }) => {
                let failed_at = state;
                state = RelayState::Errored;
                let usage = if writer.forwarded_bytes() == 0 {
                    Usage::default()
                } else {
                    usage
                };
                if error.is_upstream() || !error.should_log_details() {
                    warn!(
                        request_id = %meta.request_id,
                        channel = meta.channel.id,
                        after = %failed_at,
                        "Relay failed: {}", error
                    );
                } else {
                    error!(
                        request_id = %meta.request_id,
                        channel = meta.channel.id,
                        after = %failed_at,
                        "Relay failed: {}", error
                    );
                }
                // Before anything was committed the caller still gets a proper error body
                writer.write_error(&error).await;
                (usage, Some(error))
            }
        };

        let summary = writer.finish();
        detail.record_response(&summary);
        usage.fill_total();

        self.log_usage(meta, &usage, started);
        if self.debug {
            debug!(
                request_id = %meta.request_id,
                request_body = %truncate(detail.request_body.as_deref().unwrap_or_default(), DEBUG_BODY_LOG_LIMIT),
                response_body = %truncate(detail.response_body.as_deref().unwrap_or_default(), DEBUG_BODY_LOG_LIMIT),
                response_truncated = detail.response_truncated,
                "Relay bodies"
            );
        }

        RelayOutcome {
            usage,
            detail,
            error,
            state,
        }
    }

    async fn drive(
        &self,
        adaptor: &dyn Adaptor,
        meta: &mut Meta,
        request: &mut InboundRequest,
        writer: &mut ResponseWriter,
        detail: &mut RequestDetail,
        state: &mut RelayState,
    ) -> Result<Usage, ResponseError> {
        let mode = meta.mode();
        if !adaptor.supports(mode) {
            return Err(RelayError::UnsupportedMode { mode }.into());
        }

        if should_capture_request(mode, &request.headers) {
            detail.capture_request(&request.body, self.capture_limit);
        }
        *state = RelayState::BodyCaptured;

        let converted = adaptor.convert_request(meta, request)?;
        *state = RelayState::Converted;

        if meta.channel.base_url.is_empty() {
            meta.channel.base_url = adaptor.default_base_url().to_string();
        }
        let target = adaptor.request_url(meta)?;
        *state = RelayState::UrlResolved;

        let body = match request.take_remainder() {
            Some(remainder) if converted.forwards_inbound => {
                let head = stream::iter([Ok::<_, std::io::Error>(converted.body)]);
                reqwest::Body::wrap_stream(head.chain(remainder))
            }
            Some(_) => {
                return Err(RelayError::Conversion(
                    "streamed upload bodies can only be forwarded unchanged".to_string(),
                )
                .into())
            }
            None => reqwest::Body::from(converted.body),
        };
        let mut upstream = self
            .client
            .request(target.method, &target.url)
            .headers(converted.headers)
            .body(body)
            .build()
            .map_err(|e| RelayError::Internal(format!("Failed to build upstream request: {}", e)))?;
        *state = RelayState::RequestBuilt;

        adaptor.setup_request_header(meta, upstream.headers_mut())?;
        *state = RelayState::HeadersSet;

        debug!(
            request_id = %meta.request_id,
            adaptor = adaptor.name(),
            url = %target.url,
            "Sending upstream request"
        );
        let response = adaptor.do_request(&self.client, meta, upstream).await?;
        *state = RelayState::Sent;

        debug!(
            request_id = %meta.request_id,
            status = %response.status(),
            "Upstream responded"
        );
        *state = RelayState::ResponseReceived;

        let usage = adaptor.do_response(meta, response, writer).await?;
        *state = RelayState::Normalized;
        Ok(usage)
    }

    fn log_usage(&self, meta: &Meta, usage: &Usage, started: Instant) {
        let span = info_span!(
            "usage",
            input_tokens = field::Empty,
            output_tokens = field::Empty,
            total_tokens = field::Empty,
            cached_tokens = field::Empty,
            cache_creation_tokens = field::Empty,
            reasoning_tokens = field::Empty,
            image_input_tokens = field::Empty,
            audio_input_tokens = field::Empty,
            web_search_count = field::Empty,
        );
        for (name, value) in usage.non_zero_fields() {
            span.record(name, value);
        }
        span.in_scope(|| {
            info!(
                request_id = %meta.request_id,
                mode = %meta.mode(),
                channel = meta.channel.id,
                origin_model = %meta.origin_model,
                actual_model = %meta.actual_model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Relay finished"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(RelayState::Init < RelayState::BodyCaptured);
        assert!(RelayState::HeadersSet < RelayState::Sent);
        assert!(RelayState::Normalized < RelayState::Done);
        assert_eq!(RelayState::UrlResolved.to_string(), "url_resolved");
    }
}
