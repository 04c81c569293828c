use std::error::Error;
use std::fmt::{Display, Formatter};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::llm::provider::FunctionDeclaration;
use crate::productivity::ProductivityStore;
use crate::sandbox::CodeExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ExecuteCode,
    UpdateProductivity,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::ExecuteCode, ToolKind::UpdateProductivity];

    pub fn name(self) -> &'static str {
        match self {
            Self::ExecuteCode => "execute_code",
            Self::UpdateProductivity => "update_productivity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn declaration(self) -> FunctionDeclaration {
        match self {
            Self::ExecuteCode => FunctionDeclaration {
                name: self.name().to_string(),
                description: "Execute Python code and return the result".to_string(),
                parameters_json_schema: json!({
                    "type": "object",
                    "properties": {
                        "code": {"type": "string", "description": "The Python code to execute"}
                    },
                    "required": ["code"]
                }),
            },
            Self::UpdateProductivity => FunctionDeclaration {
                name: self.name().to_string(),
                description: "Update productivity data".to_string(),
                parameters_json_schema: json!({
                    "type": "object",
                    "properties": {
                        "focus_time": {"type": "integer", "description": "Focus time in minutes"},
                        "tasks_completed": {"type": "integer", "description": "Number of tasks completed"}
                    },
                    "required": ["focus_time", "tasks_completed"]
                }),
            },
        }
    }
}

pub fn tool_declarations() -> Vec<FunctionDeclaration> {
    ToolKind::ALL.into_iter().map(ToolKind::declaration).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecuteCodeArgs {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateProductivityArgs {
    pub focus_time: u32,
    pub tasks_completed: u32,
}

/// A fully assembled call, arguments already validated against the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    ExecuteCode(ExecuteCodeArgs),
    UpdateProductivity(UpdateProductivityArgs),
}

impl ToolInvocation {
    pub fn parse(name: &str, raw_arguments: &str) -> Result<Self, ToolError> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        match kind {
            ToolKind::ExecuteCode => parse_args(kind, raw_arguments).map(Self::ExecuteCode),
            ToolKind::UpdateProductivity => {
                parse_args(kind, raw_arguments).map(Self::UpdateProductivity)
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(kind: ToolKind, raw: &str) -> Result<T, ToolError> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|err| ToolError::InvalidArguments {
        tool: kind.name().to_string(),
        message: err.to_string(),
    })
}

/// `output` goes back to the model; `status` is the fragment shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub output: String,
    pub status: String,
}

impl ToolOutcome {
    /// Outcome for a call that was rejected before running.
    pub fn not_run(name: &str, err: &ToolError) -> Self {
        Self {
            output: format!("Error: {err}"),
            status: format!("\nTool {name} was not run: {err}\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    UnknownTool { name: String },
    InvalidArguments { tool: String, message: String },
    Storage(String),
}

impl ToolError {
    /// Rejected calls become diagnostics; storage failures end the turn.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

impl Display for ToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "unknown tool `{name}`"),
            Self::InvalidArguments { tool, message } => {
                write!(f, "invalid arguments for {tool}: {message}")
            }
            Self::Storage(msg) => write!(f, "failed to store productivity data: {msg}"),
        }
    }
}

impl Error for ToolError {}

#[derive(Debug)]
pub struct Toolbox {
    executor: CodeExecutor,
    store: ProductivityStore,
}

impl Toolbox {
    pub fn new(executor: CodeExecutor, store: ProductivityStore) -> Self {
        Self { executor, store }
    }

    pub fn executor(&self) -> &CodeExecutor {
        &self.executor
    }

    pub fn store(&self) -> &ProductivityStore {
        &self.store
    }

    pub async fn dispatch(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, ToolError> {
        match invocation {
            ToolInvocation::ExecuteCode(args) => {
                let output = self.executor.execute(&args.code).await;
                let status = format!("\nExecuted code. Result:\n{output}\n");
                Ok(ToolOutcome { output, status })
            }
            ToolInvocation::UpdateProductivity(args) => {
                let record = self
                    .store
                    .record(args.focus_time, args.tasks_completed)
                    .map_err(|err| ToolError::Storage(format!("{err:#}")))?;
                Ok(ToolOutcome {
                    output: format!(
                        "Recorded {} focus minutes and {} completed tasks for {}.",
                        record.focus_minutes, record.tasks_completed, record.date
                    ),
                    status: format!(
                        "\nProductivity updated: Focus time {} minutes, {} tasks completed.\n",
                        record.focus_minutes, record.tasks_completed
                    ),
                })
            }
        }
    }
}
