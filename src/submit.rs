//! Submission of captured audio to the assistant endpoint

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::Deserialize;

use crate::voice::{CapturedAudio, ReplyAudio};
use crate::{Error, Result};

/// Placeholder when the server sent no usable transcript
pub const TRANSCRIPT_PLACEHOLDER: &str = "Processing...";

/// Placeholder when the server sent no usable reply text
pub const REPLY_PLACEHOLDER: &str = "Responding...";

/// Reply content type assumed when the server omits one
pub const DEFAULT_REPLY_TYPE: &str = "audio/mpeg";

/// What the server made of one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    /// What the user said
    pub transcript: String,
    /// What the assistant answered
    pub reply_text: String,
    /// Spoken answer
    pub audio: ReplyAudio,
}

/// Hands a captured utterance to the assistant, once per turn
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit one recording
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is unreachable or rejects the request
    async fn submit(&self, audio: CapturedAudio) -> Result<ServerReply>;
}

/// Error body returned by the endpoint
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<ErrorDetail>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message(String),
    Fields(Vec<FieldError>),
}

#[derive(Debug, Deserialize)]
struct FieldError {
    msg: String,
}

/// Multipart upload to the full-interaction endpoint
pub struct HttpSubmitter {
    client: reqwest::Client,
    endpoint: String,
    upload_field: String,
}

impl HttpSubmitter {
    /// Create a submitter for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        endpoint: impl Into<String>,
        upload_field: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            upload_field: upload_field.into(),
        })
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, audio: CapturedAudio) -> Result<ServerReply> {
        tracing::debug!(
            audio_bytes = audio.len(),
            content_type = %audio.content_type,
            endpoint = %self.endpoint,
            "submitting recording"
        );

        let file_name = format!("question.{}", upload_extension(&audio.content_type));
        let part = reqwest::multipart::Part::bytes(audio.bytes)
            .file_name(file_name)
            .mime_str(&audio.content_type)
            .map_err(|e| Error::Submission(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part(self.upload_field.clone(), part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "submission request failed");
                Error::Submission(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body)
                .unwrap_or_else(|| format!("Failed to process message ({status})"));
            tracing::error!(status = %status, message = %message, "endpoint rejected turn");
            return Err(Error::Submission(message));
        }

        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|e| {
            tracing::error!(error = %e, "failed to read reply audio");
            Error::Submission(e.to_string())
        })?;

        let reply = reply_from_parts(&headers, bytes.to_vec());
        tracing::info!(
            transcript = %reply.transcript,
            reply_bytes = reply.audio.bytes.len(),
            "turn processed"
        );
        Ok(reply)
    }
}

/// Extension the server expects on the uploaded file name
fn upload_extension(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or_default().trim() {
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        _ => "webm",
    }
}

/// Build a reply from response headers and body
fn reply_from_parts(headers: &HeaderMap, body: Vec<u8>) -> ServerReply {
    ServerReply {
        transcript: decode_text_field(
            header_str(headers, "X-Transcript-B64"),
            header_str(headers, "X-Transcript"),
            TRANSCRIPT_PLACEHOLDER,
        ),
        reply_text: decode_text_field(
            header_str(headers, "X-Response-Text-B64"),
            header_str(headers, "X-Response-Text"),
            REPLY_PLACEHOLDER,
        ),
        audio: ReplyAudio {
            bytes: body,
            content_type: header_str(headers, CONTENT_TYPE.as_str())
                .unwrap_or(DEFAULT_REPLY_TYPE)
                .to_string(),
        },
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decode a transport-encoded text field
///
/// Tries the base64 form first, then the legacy plain field, then the
/// placeholder. Never fails.
#[must_use]
pub fn decode_text_field(encoded: Option<&str>, legacy: Option<&str>, placeholder: &str) -> String {
    if let Some(encoded) = encoded {
        match BASE64
            .decode(encoded.trim())
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
        {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to decode encoded text field"),
        }
    }

    legacy
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| placeholder.to_string(), ToString::to_string)
}

/// Extract a user-facing message from an error body
///
/// Field-level messages are joined with ", ".
#[must_use]
pub fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;

    match parsed.detail {
        Some(ErrorDetail::Message(msg)) => Some(msg),
        Some(ErrorDetail::Fields(fields)) if !fields.is_empty() => Some(
            fields
                .into_iter()
                .map(|f| f.msg)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => parsed.error,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_decode_prefers_encoded_field() {
        let encoded = BASE64.encode("¿qué hora es?");
        assert_eq!(
            decode_text_field(Some(&encoded), Some("legacy"), TRANSCRIPT_PLACEHOLDER),
            "¿qué hora es?"
        );
    }

    #[test]
    fn test_decode_falls_back_to_legacy_then_placeholder() {
        assert_eq!(
            decode_text_field(Some("%%% not base64"), Some("what time is it"), "x"),
            "what time is it"
        );
        assert_eq!(
            decode_text_field(Some(&BASE64.encode([0xff, 0xfe])), None, REPLY_PLACEHOLDER),
            REPLY_PLACEHOLDER
        );
        assert_eq!(decode_text_field(None, Some("  "), "x"), "x");
    }

    #[test]
    fn test_error_message_variants() {
        assert_eq!(
            error_message(r#"{"detail": "No speech detected"}"#).as_deref(),
            Some("No speech detected")
        );
        assert_eq!(
            error_message(r#"{"detail": [{"msg": "field required"}, {"msg": "bad type"}]}"#)
                .as_deref(),
            Some("field required, bad type")
        );
        assert_eq!(
            error_message(r#"{"error": "boom", "success": false}"#).as_deref(),
            Some("boom")
        );
        assert_eq!(error_message("<html>502</html>"), None);
        assert_eq!(error_message("{}"), None);
    }

    #[test]
    fn test_reply_from_parts() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Transcript-B64",
            HeaderValue::from_str(&BASE64.encode("hola")).unwrap(),
        );
        headers.insert("X-Response-Text", HeaderValue::from_static("hi there"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/wav"));

        let reply = reply_from_parts(&headers, vec![1, 2, 3]);
        assert_eq!(reply.transcript, "hola");
        assert_eq!(reply.reply_text, "hi there");
        assert_eq!(reply.audio.content_type, "audio/wav");
        assert_eq!(reply.audio.bytes, vec![1, 2, 3]);

        let bare = reply_from_parts(&HeaderMap::new(), Vec::new());
        assert_eq!(bare.transcript, TRANSCRIPT_PLACEHOLDER);
        assert_eq!(bare.reply_text, REPLY_PLACEHOLDER);
        assert_eq!(bare.audio.content_type, DEFAULT_REPLY_TYPE);
    }

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension("audio/wav"), "wav");
        assert_eq!(upload_extension("audio/webm;codecs=opus"), "webm");
    }
}
