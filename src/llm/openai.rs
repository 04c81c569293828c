use std::fmt::Display;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use super::provider::{
    ChatBackend, ChatRequest, ChatStream, FunctionDeclaration, LlmError, LlmResult, Message,
};
use super::sse::{SseDecoder, SseEvent, parse_chunk};
use crate::http::client::HttpClient;

/// Streaming client for `/chat/completions` endpoints that speak the OpenAI
/// wire format (Ollama, llama.cpp server, vLLM, OpenAI itself).
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    http: HttpClient,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(http: HttpClient, api_key: Option<String>, model: String, base_url: String) -> Self {
        Self {
            http,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(&'a self, request: &'a ChatRequest) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            tools: request.tools.iter().map(ToolSpec::from).collect(),
            stream: true,
        }
    }
}

impl ChatBackend for OpenAiCompatProvider {
    async fn stream_chat(&self, request: ChatRequest) -> LlmResult<ChatStream> {
        let payload = self.build_request(&request);
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "opening completion stream"
        );

        let response = self
            .http
            .post_json_streaming(&self.endpoint(), self.api_key.as_deref(), &payload)
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            self.http.log_body_line(&body);
            let body = body.chars().take(400).collect::<String>();
            return Err(LlmError::HttpStatus { status, body });
        }

        Ok(decode_stream(response.bytes_stream(), Some(self.http.clone())))
    }
}

/// Turns raw SSE bytes into increments. The stream ends at `[DONE]`, at end of
/// body, or right after the first error it yields.
pub fn decode_stream<S, B, E>(bytes: S, http: Option<HttpClient>) -> ChatStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(LlmError::Stream(err.to_string()));
                    return;
                }
            };

            for event in decoder.push(chunk.as_ref()) {
                match event {
                    SseEvent::Done => return,
                    SseEvent::Data(data) => {
                        if let Some(http) = &http {
                            http.log_body_line(&data);
                        }
                        match parse_chunk(&data) {
                            Ok(increment) if increment.is_empty() => {}
                            Ok(increment) => {
                                yield Ok(increment);
                            }
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                    }
                }
            }
        }

        if let Some(SseEvent::Data(data)) = decoder.finish() {
            match parse_chunk(&data) {
                Ok(increment) if increment.is_empty() => {}
                Ok(increment) => {
                    yield Ok(increment);
                }
                Err(err) => {
                    yield Err(err);
                }
            }
        }
    })
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a FunctionDeclaration> for ToolSpec<'a> {
    fn from(declaration: &'a FunctionDeclaration) -> Self {
        Self {
            kind: "function",
            function: FunctionSpec {
                name: &declaration.name,
                description: &declaration.description,
                parameters: &declaration.parameters_json_schema,
            },
        }
    }
}
