//! OpenAI-compatible chat and audio clients.
//!
//! Clients are bound to a loaded model variant and execute against the core's
//! `chat_completions` / `audio_transcribe` commands. The OpenAI-shaped request
//! is serialized and attached under the `OpenAICreateRequest` parameter; both
//! one-shot and streaming forms exist, with streaming chunks decoded on the
//! worker thread so a malformed chunk surfaces as the stream's fault.

use crate::error::{LocalError, Result};
use crate::interop::channel::ChunkStream;
use crate::interop::{CommandRequest, CoreInterop};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling settings supported by the core for chat completions.
///
/// `top_k` and `seed` travel in the request's `metadata` map; the rest are
/// first-class OpenAI request fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSettings {
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<i32>,
    pub n: Option<i32>,
    pub temperature: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<i64>,
    pub top_k: Option<i32>,
    pub top_p: Option<f32>,
}

/// Settings supported by the core for audio transcription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSettings {
    pub language: Option<String>,
    pub temperature: Option<f32>,
}

/// OpenAI chat completion create request, as sent to the core.
#[derive(Debug, Serialize)]
struct ChatCreateRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct AudioCreateRequest<'a> {
    model: &'a str,
    file_name: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, String>>,
}

/// Token accounting reported with a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

/// One completion choice. `message` is set for one-shot responses, `delta`
/// for streamed chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Chat completion response, whole or chunked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Content of the first choice, whether it arrived as a full message or a
    /// streamed delta.
    pub fn content(&self) -> Option<&str> {
        let choice = self.choices.first()?;
        choice
            .message
            .as_ref()
            .or(choice.delta.as_ref())
            .map(|m| m.content.as_str())
    }
}

/// Audio transcription response, whole or chunked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

fn decode_payload<T: serde::de::DeserializeOwned>(what: &str, payload: &str) -> Result<T> {
    serde_json::from_str(payload)
        .map_err(|e| LocalError::Deserialization(format!("malformed {what}: {e}")))
}

fn openai_request(json: String) -> CommandRequest {
    CommandRequest::new().with_param("OpenAICreateRequest", json)
}

/// Chat completions client for one loaded model variant.
///
/// Obtained from [`ModelVariant::chat_client`](crate::model::ModelVariant::chat_client).
#[derive(Debug, Clone)]
pub struct ChatClient {
    model_id: String,
    interop: CoreInterop,
    /// Settings applied to every request made through this client.
    pub settings: ChatSettings,
}

impl ChatClient {
    pub(crate) fn new(model_id: String, interop: CoreInterop) -> Self {
        Self {
            model_id,
            interop,
            settings: ChatSettings::default(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn request_json(&self, messages: &[ChatMessage], stream: bool) -> Result<String> {
        let mut metadata = HashMap::new();
        if let Some(top_k) = self.settings.top_k {
            metadata.insert("top_k".to_string(), top_k.to_string());
        }
        if let Some(seed) = self.settings.seed {
            metadata.insert("random_seed".to_string(), seed.to_string());
        }
        let request = ChatCreateRequest {
            model: &self.model_id,
            messages,
            stream,
            frequency_penalty: self.settings.frequency_penalty,
            max_tokens: self.settings.max_tokens,
            n: self.settings.n,
            temperature: self.settings.temperature,
            presence_penalty: self.settings.presence_penalty,
            top_p: self.settings.top_p,
            metadata: (!metadata.is_empty()).then_some(metadata),
        };
        serde_json::to_string(&request)
            .map_err(|e| LocalError::Marshaling(format!("failed to encode chat request: {e}")))
    }

    /// One-shot chat completion. To continue a conversation, append the
    /// previous response's message and the new prompt to `messages`.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        let request = openai_request(self.request_json(messages, false)?);
        let data = self.interop.run("chat_completions", Some(&request)).await?;
        decode_payload("chat completion response", &data)
    }

    /// Streaming chat completion. Each streamed chunk is one
    /// [`ChatCompletion`] carrying a delta; dropping the stream cancels
    /// consumption without an error.
    pub fn complete_streaming(&self, messages: &[ChatMessage]) -> ChunkStream<ChatCompletion> {
        let request = match self.request_json(messages, true).map(openai_request) {
            Ok(request) => request,
            Err(e) => return failed_stream(e),
        };
        self.interop
            .execute_streaming_map("chat_completions", Some(&request), |chunk| {
                decode_payload("chat completion chunk", &chunk)
            })
    }
}

/// Audio transcription client for one loaded model variant.
///
/// Obtained from [`ModelVariant::audio_client`](crate::model::ModelVariant::audio_client).
#[derive(Clone)]
pub struct AudioClient {
    model_id: String,
    interop: CoreInterop,
    /// Settings applied to every request made through this client.
    pub settings: AudioSettings,
}

impl AudioClient {
    pub(crate) fn new(model_id: String, interop: CoreInterop) -> Self {
        Self {
            model_id,
            interop,
            settings: AudioSettings::default(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn request_json(&self, audio_file_path: &str, stream: bool) -> Result<String> {
        let mut metadata = HashMap::new();
        if let Some(language) = &self.settings.language {
            metadata.insert("language".to_string(), language.clone());
        }
        if let Some(temperature) = self.settings.temperature {
            metadata.insert("temperature".to_string(), temperature.to_string());
        }
        let request = AudioCreateRequest {
            model: &self.model_id,
            file_name: audio_file_path,
            stream,
            language: self.settings.language.as_deref(),
            temperature: self.settings.temperature,
            metadata: (!metadata.is_empty()).then_some(metadata),
        };
        serde_json::to_string(&request).map_err(|e| {
            LocalError::Marshaling(format!("failed to encode transcription request: {e}"))
        })
    }

    /// One-shot transcription of a local audio file. The file path is passed
    /// to the core, which reads it directly.
    pub async fn transcribe(&self, audio_file_path: &str) -> Result<Transcription> {
        let request = openai_request(self.request_json(audio_file_path, false)?);
        let data = self.interop.run("audio_transcribe", Some(&request)).await?;
        decode_payload("transcription response", &data)
    }

    /// Streaming transcription. Yields partial [`Transcription`]s as the core
    /// produces them.
    pub fn transcribe_streaming(&self, audio_file_path: &str) -> ChunkStream<Transcription> {
        let request = match self.request_json(audio_file_path, true).map(openai_request) {
            Ok(request) => request,
            Err(e) => return failed_stream(e),
        };
        self.interop
            .execute_streaming_map("audio_transcribe", Some(&request), |chunk| {
                decode_payload("transcription chunk", &chunk)
            })
    }
}

/// A stream that immediately ends with the given fault.
fn failed_stream<T>(error: LocalError) -> ChunkStream<T> {
    let (sender, stream) = crate::interop::channel::channel();
    sender.complete(Some(error));
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedCore;
    use std::sync::Arc;

    fn client_over(core: ScriptedCore) -> ChatClient {
        ChatClient::new(
            "m-cpu:1".to_string(),
            CoreInterop::with_core(Arc::new(core)),
        )
    }

    #[test]
    fn chat_request_json_carries_model_and_stream_flag() {
        let client = client_over(ScriptedCore::new());
        let json = client
            .request_json(&[ChatMessage::user("hi")], true)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["model"], "m-cpu:1");
        assert_eq!(parsed["stream"], true);
        assert_eq!(parsed["messages"][0]["role"], "user");
        assert!(parsed.get("temperature").is_none());
        assert!(parsed.get("metadata").is_none());
    }

    #[test]
    fn chat_settings_split_between_fields_and_metadata() {
        let mut client = client_over(ScriptedCore::new());
        client.settings.temperature = Some(0.7);
        client.settings.top_k = Some(40);
        client.settings.seed = Some(11);

        let json = client.request_json(&[], false).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["temperature"], 0.7);
        assert_eq!(parsed["metadata"]["top_k"], "40");
        assert_eq!(parsed["metadata"]["random_seed"], "11");
        assert!(parsed.get("top_k").is_none());
    }

    #[test]
    fn audio_request_json_carries_file_and_settings() {
        let mut client = AudioClient::new(
            "whisper-cpu:1".to_string(),
            CoreInterop::with_core(Arc::new(ScriptedCore::new())),
        );
        client.settings.language = Some("en".to_string());

        let json = client.request_json("/tmp/clip.wav", false).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["model"], "whisper-cpu:1");
        assert_eq!(parsed["file_name"], "/tmp/clip.wav");
        assert_eq!(parsed["language"], "en");
        assert_eq!(parsed["metadata"]["language"], "en");
    }

    #[test]
    fn chat_completion_content_prefers_message_then_delta() {
        let whole: ChatCompletion = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(whole.content(), Some("hi"));

        let chunk: ChatCompletion = serde_json::from_str(
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"h"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.content(), Some("h"));

        assert_eq!(ChatCompletion::default().content(), None);
    }
}
