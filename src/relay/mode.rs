//! Request mode classification
//!
//! Maps an inbound endpoint to exactly one `Mode`. Classification happens once per
//! request; the mode is never reassigned afterwards.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of AI operation a request represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    ChatCompletions,
    Completions,
    Embeddings,
    Moderations,
    ImagesGenerations,
    ImagesEdits,
    AudioSpeech,
    AudioTranscription,
    AudioTranslation,
    Rerank,
    ParsePdf,
    /// Native Anthropic messages, relayed without translation
    Anthropic,
    VideoGenerationsJobs,
    VideoGenerationsGetJobs,
    VideoGenerationsContent,
}

impl Mode {
    pub const ALL: [Mode; 15] = [
        Mode::ChatCompletions,
        Mode::Completions,
        Mode::Embeddings,
        Mode::Moderations,
        Mode::ImagesGenerations,
        Mode::ImagesEdits,
        Mode::AudioSpeech,
        Mode::AudioTranscription,
        Mode::AudioTranslation,
        Mode::Rerank,
        Mode::ParsePdf,
        Mode::Anthropic,
        Mode::VideoGenerationsJobs,
        Mode::VideoGenerationsGetJobs,
        Mode::VideoGenerationsContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ChatCompletions => "chat_completions",
            Mode::Completions => "completions",
            Mode::Embeddings => "embeddings",
            Mode::Moderations => "moderations",
            Mode::ImagesGenerations => "images_generations",
            Mode::ImagesEdits => "images_edits",
            Mode::AudioSpeech => "audio_speech",
            Mode::AudioTranscription => "audio_transcription",
            Mode::AudioTranslation => "audio_translation",
            Mode::Rerank => "rerank",
            Mode::ParsePdf => "parse_pdf",
            Mode::Anthropic => "anthropic",
            Mode::VideoGenerationsJobs => "video_generations_jobs",
            Mode::VideoGenerationsGetJobs => "video_generations_get_jobs",
            Mode::VideoGenerationsContent => "video_generations_content",
        }
    }

    /// Upload modes carry large multipart bodies that are forwarded unread
    pub fn is_upload(&self) -> bool {
        matches!(
            self,
            Mode::AudioTranscription | Mode::AudioTranslation | Mode::ImagesEdits
        )
    }

    /// Modes whose requests carry no model and only reference an existing job
    pub fn is_job_lookup(&self) -> bool {
        matches!(
            self,
            Mode::VideoGenerationsGetJobs | Mode::VideoGenerationsContent
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified inbound endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub mode: Mode,
    /// Model carried in the path (engines-style embeddings)
    pub path_model: Option<String>,
    pub job_id: Option<String>,
    pub generation_id: Option<String>,
}

impl Endpoint {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            path_model: None,
            job_id: None,
            generation_id: None,
        }
    }
}

/// Classify an inbound method + path. Returns `None` for unsupported endpoints.
pub fn classify(method: &Method, path: &str) -> Option<Endpoint> {
    let path = path.trim_end_matches('/');
    let segments: Vec<&str> = path
        .strip_prefix("/v1/")?
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if *method == Method::GET {
        return match segments.as_slice() {
            ["video", "generations", "jobs", id] => Some(Endpoint {
                job_id: Some((*id).to_string()),
                ..Endpoint::new(Mode::VideoGenerationsGetJobs)
            }),
            ["video", "generations", id, "content", "video"] => Some(Endpoint {
                generation_id: Some((*id).to_string()),
                ..Endpoint::new(Mode::VideoGenerationsContent)
            }),
            _ => None,
        };
    }

    if *method != Method::POST {
        return None;
    }

    let mode = match segments.as_slice() {
        ["chat", "completions"] => Mode::ChatCompletions,
        ["completions"] => Mode::Completions,
        ["embeddings"] => Mode::Embeddings,
        ["engines", model, "embeddings"] => {
            return Some(Endpoint {
                path_model: Some((*model).to_string()),
                ..Endpoint::new(Mode::Embeddings)
            })
        }
        ["moderations"] => Mode::Moderations,
        ["images", "generations"] => Mode::ImagesGenerations,
        ["images", "edits"] => Mode::ImagesEdits,
        ["audio", "speech"] => Mode::AudioSpeech,
        ["audio", "transcriptions"] => Mode::AudioTranscription,
        ["audio", "translations"] => Mode::AudioTranslation,
        ["rerank"] => Mode::Rerank,
        ["parse", "pdf"] => Mode::ParsePdf,
        ["messages"] => Mode::Anthropic,
        ["video", "generations", "jobs"] => Mode::VideoGenerationsJobs,
        _ => return None,
    };
    Some(Endpoint::new(mode))
}
