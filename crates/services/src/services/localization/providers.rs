//! External translation and transcription services.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// A subtitle track. Content is always WebVTT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubtitleTrack {
    pub format: String,
    pub content: String,
}

impl SubtitleTrack {
    pub const WEBVTT: &'static str = "vtt";

    pub fn webvtt(content: impl Into<String>) -> Result<Self, ProviderError> {
        let content = content.into();
        if !content.trim_start().starts_with("WEBVTT") {
            return Err(ProviderError::Decode("subtitle track is not WebVTT".to_string()));
        }
        Ok(Self {
            format: Self::WEBVTT.to_string(),
            content,
        })
    }
}

/// Machine translation. Output order matches input order.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Speech-to-subtitles for a talk's video, in the requested language.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, video_url: &str, language: &str) -> Result<SubtitleTrack, ProviderError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    texts: &'a [String],
    source: &'a str,
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    video_url: &'a str,
    language: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    content: String,
}

fn endpoint_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Remote {
        status: status.as_u16(),
        body,
    })
}

/// JSON-over-HTTP translation service (`POST {base}/translate`).
pub struct HttpTranslationProvider {
    client: Client,
    base_url: String,
}

impl HttpTranslationProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    async fn translate(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .post(endpoint_url(&self.base_url, "translate"))
            .json(&TranslateRequest {
                texts,
                source: source_language,
                target: target_language,
            })
            .send()
            .await?;

        let body: TranslateResponse = check_status(response).await?.json().await?;
        if body.translations.len() != texts.len() {
            return Err(ProviderError::Decode(format!(
                "expected {} translations, got {}",
                texts.len(),
                body.translations.len()
            )));
        }
        Ok(body.translations)
    }
}

/// JSON-over-HTTP transcription service (`POST {base}/transcribe`).
pub struct HttpTranscriptionProvider {
    client: Client,
    base_url: String,
}

impl HttpTranscriptionProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, video_url: &str, language: &str) -> Result<SubtitleTrack, ProviderError> {
        let response = self
            .client
            .post(endpoint_url(&self.base_url, "transcribe"))
            .json(&TranscribeRequest {
                video_url,
                language,
                format: SubtitleTrack::WEBVTT,
            })
            .send()
            .await?;

        let body: TranscribeResponse = check_status(response).await?.json().await?;
        SubtitleTrack::webvtt(body.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint_url("http://mt.internal/", "translate"),
            "http://mt.internal/translate"
        );
        assert_eq!(endpoint_url("http://mt.internal", "transcribe"), "http://mt.internal/transcribe");
    }

    #[test]
    fn subtitle_tracks_must_be_webvtt() {
        let track = SubtitleTrack::webvtt("WEBVTT\n\n00:00.000 --> 00:02.000\nHola").unwrap();
        assert_eq!(track.format, "vtt");
        assert!(SubtitleTrack::webvtt("1\n00:00:00,000 --> 00:00:02,000\nHola").is_err());
    }
}
