use std::error::Error;
use std::fmt::{Display, Formatter};

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool name, only set on function-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters_json_schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Empty means the request carries no tool catalog.
    pub tools: Vec<FunctionDeclaration>,
}

/// One piece of a streamed tool call. Pieces sharing an `index` belong to the
/// same call and their `arguments` must be concatenated in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatIncrement {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

impl ChatIncrement {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty) && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    HttpStatus { status: u16, body: String },
    Transport(String),
    Stream(String),
    Parse(String),
}

impl Display for LlmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpStatus { status, body } => {
                write!(f, "provider request failed with status {status}: {body}")
            }
            Self::Transport(msg) => write!(f, "provider transport error: {msg}"),
            Self::Stream(msg) => write!(f, "provider stream error: {msg}"),
            Self::Parse(msg) => write!(f, "provider parse error: {msg}"),
        }
    }
}

impl Error for LlmError {}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

pub type ChatStream = BoxStream<'static, LlmResult<ChatIncrement>>;

pub trait ChatBackend {
    /// Opens one streaming generation. The returned stream is consumed once.
    fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> impl std::future::Future<Output = LlmResult<ChatStream>> + Send;
}

/// Drains a stream into its concatenated text, ignoring tool-call fragments.
pub async fn collect_text(mut stream: ChatStream) -> LlmResult<String> {
    let mut text = String::new();
    while let Some(increment) = stream.next().await {
        if let Some(delta) = increment?.text {
            text.push_str(&delta);
        }
    }
    Ok(text)
}
