pub mod accumulator;
pub mod context;
pub mod dispatch;
pub mod loop_impl;
pub mod prompt;

pub use context::{ConversationContext, UserProfile};
pub use dispatch::{ToolError, ToolKind, Toolbox};
pub use loop_impl::{Assistant, TurnEvent, TurnState};
