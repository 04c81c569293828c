use async_stream::stream;
use futures::{Stream, StreamExt};

use crate::agent::accumulator::ToolCallAccumulator;
use crate::agent::context::ConversationContext;
use crate::agent::dispatch::{ToolInvocation, ToolOutcome, Toolbox, tool_declarations};
use crate::agent::prompt::{TIP_PROMPT, system_prompt};
use crate::llm::provider::{ChatBackend, ChatRequest, LlmError, LlmResult, Message, collect_text};
use crate::trace::SessionTrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Primary,
    FollowUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming(StreamPhase),
    ToolPending,
    Done,
    Errored,
}

impl TurnState {
    pub fn can_advance_to(self, next: TurnState) -> bool {
        use StreamPhase::{FollowUp, Primary};
        use TurnState::{Done, Errored, Idle, Streaming, ToolPending};

        match (self, next) {
            (Done | Errored, _) => false,
            (_, Errored) => true,
            (Idle, Streaming(Primary)) => true,
            (Streaming(Primary), ToolPending | Done) => true,
            (ToolPending, ToolPending | Streaming(FollowUp)) => true,
            (Streaming(FollowUp), Done) => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct TurnTracker {
    state: TurnState,
}

impl TurnTracker {
    fn new() -> Self {
        Self {
            state: TurnState::Idle,
        }
    }

    fn advance(&mut self, next: TurnState) {
        if self.state.can_advance_to(next) {
            tracing::debug!(from = ?self.state, to = ?next, "turn state");
        } else {
            tracing::warn!(from = ?self.state, to = ?next, "unexpected turn transition");
        }
        self.state = next;
    }
}

/// One fragment of a turn, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    PrimaryText(String),
    ToolStatus { tool: String, text: String },
    FollowUpText(String),
    Failure(String),
}

impl TurnEvent {
    pub fn text(&self) -> &str {
        match self {
            Self::PrimaryText(text) | Self::FollowUpText(text) | Self::Failure(text) => text,
            Self::ToolStatus { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::PrimaryText(text) | Self::FollowUpText(text) | Self::Failure(text) => text,
            Self::ToolStatus { text, .. } => text,
        }
    }

    fn trace_kind(&self) -> &'static str {
        match self {
            Self::PrimaryText(_) | Self::FollowUpText(_) => "ai.text",
            Self::ToolStatus { .. } => "tool.status",
            Self::Failure(_) => "ai.error",
        }
    }
}

pub fn backend_failure_message(err: &LlmError) -> String {
    format!("Sorry, I'm having trouble connecting to my language model. Error: {err}")
}

pub struct Assistant<B> {
    backend: B,
    tools: Toolbox,
    trace: Option<SessionTrace>,
}

impl<B: ChatBackend> Assistant<B> {
    pub fn new(backend: B, tools: Toolbox) -> Self {
        Self {
            backend,
            tools,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn tools(&self) -> &Toolbox {
        &self.tools
    }

    pub fn trace(&self) -> Option<&SessionTrace> {
        self.trace.as_ref()
    }

    /// Plain-text view of [`Assistant::respond_events`].
    pub fn respond<'a>(
        &'a self,
        user_input: &'a str,
        context: &'a mut ConversationContext,
    ) -> impl Stream<Item = String> + 'a {
        self.respond_events(user_input, context)
            .map(TurnEvent::into_text)
    }

    /// Runs one turn. Fragments are yielded as soon as they are known:
    /// primary text, then one status per tool call, then follow-up text.
    /// The context is only touched once the turn completes; a failed turn
    /// yields a single `Failure` and leaves it as it was.
    pub fn respond_events<'a>(
        &'a self,
        user_input: &'a str,
        context: &'a mut ConversationContext,
    ) -> impl Stream<Item = TurnEvent> + 'a {
        stream! {
            let mut turn = TurnTracker::new();
            if let Some(trace) = &self.trace {
                trace.log_user_input(user_input);
            }

            let mut messages = Vec::with_capacity(context.transcript().len() + 2);
            messages.push(Message::system(system_prompt(context.profile())));
            messages.extend_from_slice(context.transcript());
            messages.push(Message::user(user_input));

            let mut full_response = String::new();
            let mut pending = ToolCallAccumulator::default();

            turn.advance(TurnState::Streaming(StreamPhase::Primary));
            let opened = self
                .backend
                .stream_chat(ChatRequest {
                    messages: messages.clone(),
                    tools: tool_declarations(),
                })
                .await;
            let mut primary = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    turn.advance(TurnState::Errored);
                    yield self.emit(TurnEvent::Failure(backend_failure_message(&err)));
                    return;
                }
            };

            while let Some(increment) = primary.next().await {
                let increment = match increment {
                    Ok(increment) => increment,
                    Err(err) => {
                        turn.advance(TurnState::Errored);
                        yield self.emit(TurnEvent::Failure(backend_failure_message(&err)));
                        return;
                    }
                };
                if let Some(text) = increment.text.filter(|text| !text.is_empty()) {
                    full_response.push_str(&text);
                    yield self.emit(TurnEvent::PrimaryText(text));
                }
                for fragment in increment.tool_calls {
                    pending.push(fragment);
                }
            }
            drop(primary);

            let calls = pending.finish();
            let dispatched = !calls.is_empty();
            for call in calls {
                turn.advance(TurnState::ToolPending);
                tracing::debug!(
                    tool = %call.name,
                    index = call.index,
                    id = call.id.as_deref().unwrap_or("-"),
                    "dispatching tool call"
                );
                if let Some(trace) = &self.trace {
                    trace.log_tool_call(&call.name, &call.arguments);
                }

                let result = match ToolInvocation::parse(&call.name, &call.arguments) {
                    Ok(invocation) => self.tools.dispatch(&invocation).await,
                    Err(err) => Err(err),
                };
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(tool = %call.name, "tool call rejected: {err}");
                        ToolOutcome::not_run(&call.name, &err)
                    }
                    Err(err) => {
                        tracing::error!(tool = %call.name, "tool call failed: {err}");
                        turn.advance(TurnState::Errored);
                        yield self.emit(TurnEvent::Failure(format!(
                            "Sorry, I couldn't complete the {} request. Error: {err}",
                            call.name
                        )));
                        return;
                    }
                };

                if let Some(trace) = &self.trace {
                    trace.log_tool_result(&call.name, &outcome.output);
                }
                full_response.push_str(&outcome.status);
                messages.push(Message::function_result(call.name.clone(), outcome.output));
                yield self.emit(TurnEvent::ToolStatus {
                    tool: call.name,
                    text: outcome.status,
                });
            }

            if dispatched {
                turn.advance(TurnState::Streaming(StreamPhase::FollowUp));
                messages.push(Message::assistant(full_response.clone()));
                let opened = self
                    .backend
                    .stream_chat(ChatRequest {
                        messages,
                        tools: Vec::new(),
                    })
                    .await;
                let mut follow_up = match opened {
                    Ok(stream) => stream,
                    Err(err) => {
                        turn.advance(TurnState::Errored);
                        yield self.emit(TurnEvent::Failure(backend_failure_message(&err)));
                        return;
                    }
                };

                while let Some(increment) = follow_up.next().await {
                    let increment = match increment {
                        Ok(increment) => increment,
                        Err(err) => {
                            turn.advance(TurnState::Errored);
                            yield self.emit(TurnEvent::Failure(backend_failure_message(&err)));
                            return;
                        }
                    };
                    if !increment.tool_calls.is_empty() {
                        tracing::warn!(
                            count = increment.tool_calls.len(),
                            "ignoring tool calls proposed by follow-up generation"
                        );
                    }
                    if let Some(text) = increment.text.filter(|text| !text.is_empty()) {
                        full_response.push_str(&text);
                        yield self.emit(TurnEvent::FollowUpText(text));
                    }
                }
            }

            turn.advance(TurnState::Done);
            context.record_exchange(user_input, &full_response);
        }
    }

    /// One-shot tip request. Carries no profile, history or tools.
    pub async fn coding_tip(&self) -> LlmResult<String> {
        let stream = self
            .backend
            .stream_chat(ChatRequest {
                messages: vec![Message::user(TIP_PROMPT)],
                tools: Vec::new(),
            })
            .await?;
        collect_text(stream).await
    }

    fn emit(&self, event: TurnEvent) -> TurnEvent {
        if let Some(trace) = &self.trace {
            trace.log_fragment(event.trace_kind(), event.text());
        }
        event
    }
}
