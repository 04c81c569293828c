use crate::agent::context::UserProfile;

pub const TIP_PROMPT: &str = "Provide a coding tip for ADHD developers.";

const ROLE: &str = "You are NeuroCode, an AI assistant for ADHD full-stack Python developers. \
Your role is to provide friendly, supportive advice on coding, project management, and ADHD \
strategies. Always be concise, clear, and supportive in your responses.";

const CAPABILITIES: &str = "Your capabilities include:
1. Executing Python code
2. Updating productivity data
3. Providing coding tips and ADHD management strategies

When using these capabilities, always explain what you're doing and why it's helpful for the user.";

pub fn system_prompt(profile: &UserProfile) -> String {
    format!(
        "{ROLE}\n\nUser profile: {}\n\n{CAPABILITIES}",
        profile.to_json()
    )
}

#[cfg(test)]
mod tests {
    use super::system_prompt;
    use crate::agent::context::UserProfile;

    #[test]
    fn profile_is_embedded_as_json() {
        let mut profile = UserProfile::default();
        profile.set("first_name", "Sam");
        let prompt = system_prompt(&profile);
        assert!(prompt.starts_with("You are NeuroCode"));
        assert!(prompt.contains(r#"User profile: {"first_name":"Sam"}"#));
        assert!(prompt.contains("1. Executing Python code"));
    }

    #[test]
    fn empty_profile_is_an_empty_object() {
        assert!(system_prompt(&UserProfile::default()).contains("User profile: {}\n"));
    }
}
