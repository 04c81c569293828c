use std::collections::HashMap;

use crate::llm::provider::ToolCallFragment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledCall {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    last_seen: usize,
}

/// Reassembles tool calls from streamed fragments keyed by call index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: HashMap<usize, PartialCall>,
    seen: usize,
}

impl ToolCallAccumulator {
    pub fn push(&mut self, fragment: ToolCallFragment) {
        self.seen += 1;
        let entry = self.calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            entry.id = Some(id);
        }
        if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
            entry.name = Some(name);
        }
        if let Some(arguments) = fragment.arguments {
            entry.arguments.push_str(&arguments);
        }
        entry.last_seen = self.seen;
    }

    /// Calls ordered by when their final fragment arrived. A call that never
    /// received a name is kept with an empty one so dispatch can reject it.
    pub fn finish(self) -> Vec<AssembledCall> {
        let mut calls: Vec<(usize, AssembledCall)> = self
            .calls
            .into_iter()
            .map(|(index, partial)| {
                (
                    partial.last_seen,
                    AssembledCall {
                        index,
                        id: partial.id,
                        name: partial.name.unwrap_or_default(),
                        arguments: partial.arguments,
                    },
                )
            })
            .collect();
        calls.sort_by_key(|(last_seen, _)| *last_seen);
        calls.into_iter().map(|(_, call)| call).collect()
    }
}
