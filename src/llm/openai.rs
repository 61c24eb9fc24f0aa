//! OpenAI-compatible chat completions client.
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol,
//! including its Server-Sent Events streaming mode.

use super::{CompletionClient, DeltaStream, LlmError};
use crate::message::{Message, Role};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Client for an OpenAI-compatible endpoint.
pub struct OpenAIClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAIClient {
    /// Create a new client for `base_url` (e.g. https://api.openai.com/v1).
    pub fn new(base_url: String, api_key: String) -> Result<Self, LlmError> {
        // No overall timeout: streamed replies can legitimately run for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send a request and turn non-2xx statuses into errors.
    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<OpenAIError>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| {
                if body.trim().is_empty() {
                    "Unknown error".to_string()
                } else {
                    body.trim().to_string()
                }
            });
        Err(LlmError::Status { status, message })
    }
}

#[async_trait]
impl CompletionClient for OpenAIClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, model: &str, messages: &[Message]) -> Result<Message, LlmError> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };
        let response = self.send(&request).await?;
        let body: ChatResponse = response.json().await?;

        let message = body
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyReply)?
            .message;
        let content = message.content.unwrap_or_default();
        debug!(len = content.len(), "Received full reply");
        Ok(Message::new(message.role.unwrap_or(Role::Assistant), content))
    }

    async fn stream(&self, model: &str, messages: &[Message]) -> Result<DeltaStream, LlmError> {
        let request = ChatRequest {
            model,
            messages,
            stream: true,
        };
        let response = self.send(&request).await?;
        Ok(delta_stream(response.bytes_stream()).boxed())
    }
}

/// State carried between polls of the delta stream.
struct DeltaState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

/// Turn a raw SSE byte stream into reply fragments.
///
/// The stream ends after `[DONE]`, after the connection closes, or right after
/// the first error it yields.
fn delta_stream<S, B>(bytes: S) -> impl Stream<Item = Result<String, LlmError>> + Send + 'static
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DeltaState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.ingest(chunk.as_ref()),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(LlmError::Transport(e)), state));
                }
                // Connection closed without [DONE]; treat it as a normal end.
                None => state.finished = true,
            }
        }
    })
}

impl<S> DeltaState<S> {
    fn ingest(&mut self, chunk: &[u8]) {
        let frames = match self.decoder.push(chunk) {
            Ok(frames) => frames,
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
                return;
            }
        };

        for frame in frames {
            match parse_frame(&frame) {
                Ok(Frame::Delta(text)) => self.pending.push_back(Ok(text)),
                Ok(Frame::Empty) => {}
                Ok(Frame::Done) => {
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Lines may be split across chunks. Comments, blank lines and fields other
/// than `data` are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return every complete `data:` payload it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LlmError> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = std::str::from_utf8(&line)
                .map_err(|e| LlmError::MalformedFrame(format!("invalid UTF-8 in stream: {}", e)))?;
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        Ok(payloads)
    }
}

/// A decoded stream payload.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Delta(String),
    /// A valid chunk with no text, e.g. the role-only opening chunk.
    Empty,
    Done,
}

fn parse_frame(data: &str) -> Result<Frame, LlmError> {
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::MalformedFrame(format!("{}: {}", e, data)))?;

    if let Some(error) = chunk.error {
        return Err(LlmError::Remote(error.message));
    }

    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty());

    Ok(match text {
        Some(text) => Frame::Delta(text),
        None => Frame::Empty,
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<OpenAIErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {{\"id\":\"c1\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn test_decoder_joins_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").unwrap().is_empty());
        let frames = decoder.push(b":1}\r\n\r\ndata: [DONE]\n").unwrap();
        assert_eq!(frames, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_decoder_skips_comments_and_other_fields() {
        let mut decoder = SseDecoder::default();
        let frames = decoder
            .push(b": keep-alive\nevent: message\nid: 3\n\ndata:[DONE]\n")
            .unwrap();
        assert_eq!(frames, vec!["[DONE]".to_string()]);
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = SseDecoder::default();
        let err = decoder.push(b"data: \xff\xfe\n").unwrap_err();
        assert!(matches!(err, LlmError::MalformedFrame(_)));
    }

    #[test]
    fn test_parse_frame_variants() {
        assert_eq!(parse_frame("[DONE]").unwrap(), Frame::Done);
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Frame::Delta("Hi".to_string())
        );
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            Frame::Empty
        );
        assert_eq!(parse_frame(r#"{"choices":[]}"#).unwrap(), Frame::Empty);
        assert!(matches!(
            parse_frame("{not json"),
            Err(LlmError::MalformedFrame(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"error":{"message":"overloaded"}}"#),
            Err(LlmError::Remote(m)) if m == "overloaded"
        ));
    }

    #[tokio::test]
    async fn test_delta_stream_stops_at_done() {
        let body = format!("{}{}data: [DONE]\n\n{}", chunk("Hel"), chunk("lo"), chunk("ignored"));
        // Split mid-frame to exercise buffering.
        let (a, b) = body.as_bytes().split_at(17);
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(a.to_vec()), Ok(b.to_vec())];

        let deltas: Vec<String> = delta_stream(futures::stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_delta_stream_ends_after_malformed_frame() {
        let body = format!("{}data: {{broken\n\n{}", chunk("Par"), chunk("never"));
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(body.into_bytes())];

        let items: Vec<Result<String, LlmError>> =
            delta_stream(futures::stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Par");
        assert!(matches!(items[1], Err(LlmError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn test_stream_against_server() {
        let mut server = mockito::Server::new_async().await;
        let body = format!("{}{}{}data: [DONE]\n\n", chunk("Hi"), chunk(" there"), chunk("!"));

        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"gpt-test","stream":true}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAIClient::new(format!("{}/v1/", server.url()), "sk-test".to_string()).unwrap();
        let messages = vec![Message::system("sys"), Message::user("Hello")];
        let stream = client.stream("gpt-test", &messages).await.unwrap();
        let deltas: Vec<String> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(deltas.concat(), "Hi there!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_against_server() {
        let mut server = mockito::Server::new_async().await;
        let response_body = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello! How can I help?"},
                "finish_reason": "stop"
            }]
        }"#;

        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response_body)
            .create_async()
            .await;

        let client = OpenAIClient::new(server.url(), "sk-test".to_string()).unwrap();
        let reply = client
            .complete("gpt-test", &[Message::user("Hi")])
            .await
            .unwrap();
        assert_eq!(reply, Message::assistant("Hello! How can I help?"));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"Incorrect API key provided"}}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new(server.url(), "bad".to_string()).unwrap();
        let err = match client.stream("gpt-test", &[Message::user("Hi")]).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        match err {
            LlmError::Status { status, message } => {
                assert_eq!(status.as_u16(), 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_empty_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new(server.url(), "sk".to_string()).unwrap();
        let err = client.complete("m", &[Message::user("Hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyReply));
    }
}
