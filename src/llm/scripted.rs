//! In-process backend that replays canned streams, for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::StreamExt;

use super::provider::{
    ChatBackend, ChatIncrement, ChatRequest, ChatStream, LlmError, LlmResult, ToolCallFragment,
};

/// Outcome of one `stream_chat` call: an open error or the increments to replay.
pub type Script = LlmResult<Vec<LlmResult<ChatIncrement>>>;

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    seen: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::from(scripts))),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

impl ChatBackend for ScriptedBackend {
    async fn stream_chat(&self, request: ChatRequest) -> LlmResult<ChatStream> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request);
        }
        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front())
            .unwrap_or_else(|| Err(LlmError::Transport("no scripted response".to_string())));
        let increments = script?;
        Ok(futures::stream::iter(increments).boxed())
    }
}

pub fn text(delta: &str) -> LlmResult<ChatIncrement> {
    Ok(ChatIncrement::text(delta))
}

/// A tool-call fragment. A named fragment also carries an id, as the first
/// fragment of a real call does.
pub fn call(index: usize, name: Option<&str>, arguments: &str) -> LlmResult<ChatIncrement> {
    Ok(ChatIncrement {
        text: None,
        tool_calls: vec![ToolCallFragment {
            index,
            id: name.map(|_| format!("call_{index}")),
            name: name.map(str::to_string),
            arguments: Some(arguments.to_string()),
        }],
    })
}
