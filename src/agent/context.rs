use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::llm::provider::Message;

pub const LAST_INTERACTION_KEY: &str = "last_interaction";

/// Free-form facts about the user, embedded in every system prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UserProfile(BTreeMap<String, Value>);

impl UserProfile {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Last write wins per key; keys not mentioned are kept.
    pub fn merge(&mut self, partial: impl IntoIterator<Item = (String, Value)>) {
        self.0.extend(partial);
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(profile is empty)");
        }
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                writeln!(f)?;
            }
            first = false;
            match value {
                Value::String(text) => write!(f, "{key}: {text}")?,
                other => write!(f, "{key}: {other}")?,
            }
        }
        Ok(())
    }
}

/// One session's transcript and profile. Only the orchestrator mutates it
/// during a turn, and only once the turn has completed.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    transcript: Vec<Message>,
    profile: UserProfile,
}

impl ConversationContext {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            transcript: Vec::new(),
            profile,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn append(&mut self, message: Message) {
        self.transcript.push(message);
    }

    pub fn profile_update(&mut self, partial: impl IntoIterator<Item = (String, Value)>) {
        self.profile.merge(partial);
    }

    pub fn set_profile_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.profile.set(key, value);
    }

    /// Turn-completion path: summary first, then both messages.
    pub fn record_exchange(&mut self, user_input: &str, full_response: &str) {
        self.profile_update([(
            LAST_INTERACTION_KEY.to_string(),
            Value::String(format!(
                "User input: {user_input}\nAssistant response: {full_response}"
            )),
        )]);
        self.append(Message::user(user_input));
        self.append(Message::assistant(full_response));
    }
}
