use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::config::{Gender, parse_age};

/// A slash command typed at the REPL prompt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Help,
    Profile,
    ProfileSet { key: &'static str, value: Value },
    Record { focus_minutes: u32, tasks_completed: u32 },
    Report(Option<u32>),
    Run { path: String },
    Tip,
    History(Option<usize>),
    Trace,
}

/// User-facing reason a command line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParseError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for ParseError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

pub(crate) const HELP_TEXT: &str = "Available commands:\n  /help                       Show this command list\n  /profile                    Show the user profile\n  /profile set <key> <value>  Set first_name, last_name, age, gender or description\n  /record <focus> <tasks>     Log focus minutes and completed tasks for today\n  /report [days]              Show daily productivity totals (default 7 days)\n  /run <file>                 Execute a Python file in the sandbox\n  /tip                        Ask for a coding tip for ADHD developers\n  /history [n]                Show the conversation (or last n messages)\n  /trace                      Show path to the current trace file\n  exit | quit                 Leave the session";

const PROFILE_FIELDS: [&str; 5] = ["first_name", "last_name", "age", "gender", "description"];
const EMPTY_COMMAND: &str = "empty command. Try /help";

pub(crate) fn parse_command(line: &str) -> Result<Command, ParseError> {
    let body = line.strip_prefix('/').ok_or("not a command")?.trim_end();
    if body.is_empty() || body.starts_with(char::is_whitespace) {
        return Err(EMPTY_COMMAND.into());
    }

    let (name, rest) = body
        .split_once(char::is_whitespace)
        .map_or((body, ""), |(name, rest)| (name, rest.trim()));

    match name.to_ascii_lowercase().as_str() {
        "help" => bare(Command::Help, "help", rest),
        "profile" => parse_profile(rest),
        "record" => parse_record(rest),
        "report" => optional_count(rest, "usage: /report [days]", "days").map(Command::Report),
        "run" if rest.is_empty() => Err("missing file argument. usage: /run <file>".into()),
        "run" => Ok(Command::Run {
            path: rest.to_string(),
        }),
        "tip" => bare(Command::Tip, "tip", rest),
        "history" => optional_count(rest, "usage: /history [n]", "n").map(Command::History),
        "trace" => bare(Command::Trace, "trace", rest),
        other => Err(format!("unknown command '/{other}'. Try /help").into()),
    }
}

pub(crate) fn is_command_line(line: &str) -> bool {
    line.starts_with('/')
}

pub(crate) fn is_exit_line(line: &str) -> bool {
    matches!(line.trim(), "exit" | "quit")
}

fn bare(command: Command, name: &str, rest: &str) -> Result<Command, ParseError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(format!("usage: /{name}").into())
    }
}

/// Parses an optional count that must be at least one.
fn optional_count<T>(rest: &str, usage: &str, unit: &str) -> Result<Option<T>, ParseError>
where
    T: FromStr + Default + PartialEq,
{
    if rest.is_empty() {
        return Ok(None);
    }
    match rest.parse::<T>() {
        Ok(count) if count == T::default() => Err(format!("{usage} ({unit} must be >= 1)").into()),
        Ok(count) => Ok(Some(count)),
        Err(_) => Err(usage.into()),
    }
}

fn parse_profile(rest: &str) -> Result<Command, ParseError> {
    const USAGE: &str = "usage: /profile set <key> <value>";
    if rest.is_empty() {
        return Ok(Command::Profile);
    }

    let Some(("set", assignment)) = rest.split_once(char::is_whitespace) else {
        return Err(USAGE.into());
    };
    let Some((key, value)) = assignment.trim().split_once(char::is_whitespace) else {
        return Err(USAGE.into());
    };
    let value = value.trim();

    let key = PROFILE_FIELDS
        .into_iter()
        .find(|field| *field == key)
        .ok_or_else(|| {
            format!(
                "unknown profile field '{key}', expected one of {}",
                PROFILE_FIELDS.join(", ")
            )
        })?;

    let value = match key {
        "age" => {
            let age = value
                .parse::<i64>()
                .map_err(|_| "age must be a whole number".to_string())
                .and_then(parse_age)?;
            Value::from(age)
        }
        "gender" => Value::from(Gender::from_str(value)?.as_str()),
        _ => Value::from(value),
    };

    Ok(Command::ProfileSet { key, value })
}

fn parse_record(rest: &str) -> Result<Command, ParseError> {
    let mut numbers = rest.split_whitespace().map(str::parse::<u32>);
    match (numbers.next(), numbers.next(), numbers.next()) {
        (Some(Ok(focus_minutes)), Some(Ok(tasks_completed)), None) => Ok(Command::Record {
            focus_minutes,
            tasks_completed,
        }),
        _ => Err("usage: /record <focus_minutes> <tasks_completed>".into()),
    }
}
