use std::io::Write;
use std::path::Path;
use std::pin::pin;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::commands::{Command, HELP_TEXT, is_command_line, is_exit_line, parse_command};
use crate::agent::{Assistant, ConversationContext};
use crate::llm::provider::{ChatBackend, Role};
use crate::productivity::DEFAULT_REPORT_DAYS;

pub const PROMPT: &str = "you> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    Continue,
    Exit,
}

/// Reads lines from stdin until `exit`, `quit` or EOF.
pub async fn run_repl<B: ChatBackend>(
    assistant: &Assistant<B>,
    context: &mut ConversationContext,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    writeln!(
        stdout,
        "NeuroCode is ready. Ask about coding, project management or ADHD strategies. /help lists commands."
    )?;

    loop {
        write!(stdout, "{PROMPT}")?;
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(stdout)?;
            break;
        };

        if handle_line(assistant, context, &line, &mut stdout).await? == LineOutcome::Exit {
            break;
        }
    }

    Ok(())
}

pub(crate) async fn handle_line<B: ChatBackend, W: Write>(
    assistant: &Assistant<B>,
    context: &mut ConversationContext,
    line: &str,
    out: &mut W,
) -> Result<LineOutcome> {
    let line = line.trim();
    if is_exit_line(line) {
        return Ok(LineOutcome::Exit);
    }
    if line.is_empty() {
        return Ok(LineOutcome::Continue);
    }

    if is_command_line(line) {
        match parse_command(line) {
            Ok(command) => run_command(assistant, context, command, out).await?,
            Err(err) => writeln!(out, "{err}")?,
        }
        return Ok(LineOutcome::Continue);
    }

    stream_turn(assistant, context, line, out).await?;
    Ok(LineOutcome::Continue)
}

/// Prints each fragment the moment it arrives.
async fn stream_turn<B: ChatBackend, W: Write>(
    assistant: &Assistant<B>,
    context: &mut ConversationContext,
    input: &str,
    out: &mut W,
) -> Result<()> {
    let mut fragments = pin!(assistant.respond(input, context));
    let mut ends_with_newline = true;
    while let Some(fragment) = fragments.next().await {
        write!(out, "{fragment}")?;
        out.flush()?;
        if !fragment.is_empty() {
            ends_with_newline = fragment.ends_with('\n');
        }
    }
    if !ends_with_newline {
        writeln!(out)?;
    }
    Ok(())
}

async fn run_command<B: ChatBackend, W: Write>(
    assistant: &Assistant<B>,
    context: &mut ConversationContext,
    command: Command,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Help => writeln!(out, "{HELP_TEXT}")?,
        Command::Profile => writeln!(out, "{}", context.profile())?,
        Command::ProfileSet { key, value } => {
            context.set_profile_field(key, value);
            writeln!(out, "Profile updated: {key}")?;
        }
        Command::Record {
            focus_minutes,
            tasks_completed,
        } => match assistant.tools().store().record(focus_minutes, tasks_completed) {
            Ok(record) => writeln!(
                out,
                "Recorded {} focus minutes and {} completed tasks for {}.",
                record.focus_minutes, record.tasks_completed, record.date
            )?,
            Err(err) => writeln!(out, "error: {err:#}")?,
        },
        Command::Report(days) => {
            match assistant
                .tools()
                .store()
                .report(days.unwrap_or(DEFAULT_REPORT_DAYS))
            {
                Ok(report) => writeln!(out, "{report}")?,
                Err(err) => writeln!(out, "error: {err:#}")?,
            }
        }
        Command::Run { path } => match read_script(Path::new(&path)).await {
            Ok(code) => {
                let output = assistant.tools().executor().execute(&code).await;
                write!(out, "{output}")?;
                if !output.is_empty() && !output.ends_with('\n') {
                    writeln!(out)?;
                }
            }
            Err(err) => writeln!(out, "error: {err:#}")?,
        },
        Command::Tip => match assistant.coding_tip().await {
            Ok(tip) => writeln!(out, "{}", tip.trim_end())?,
            Err(err) => writeln!(out, "Could not fetch a tip: {err}")?,
        },
        Command::History(limit) => {
            let transcript = context.transcript();
            if transcript.is_empty() {
                writeln!(out, "(no messages yet)")?;
            }
            let skip = limit.map_or(0, |n| transcript.len().saturating_sub(n));
            for message in &transcript[skip..] {
                writeln!(out, "{}: {}", role_label(message.role), message.content)?;
            }
        }
        Command::Trace => match assistant.trace() {
            Some(trace) => writeln!(out, "{}", trace.file_path().display())?,
            None => writeln!(out, "Tracing is disabled for this session.")?,
        },
    }
    Ok(())
}

pub(crate) async fn read_script(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "you",
        Role::Assistant => "neurocode",
        Role::Function => "tool",
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::{LineOutcome, handle_line};
    use crate::agent::dispatch::Toolbox;
    use crate::agent::{Assistant, ConversationContext};
    use crate::llm::scripted::{ScriptedBackend, call, text};
    use crate::productivity::ProductivityStore;
    use crate::sandbox::CodeExecutor;
    use crate::trace::SessionTrace;

    fn assistant(scripts: ScriptedBackend) -> Assistant<ScriptedBackend> {
        Assistant::new(
            scripts,
            Toolbox::new(
                CodeExecutor::new("sh", Duration::from_secs(5)),
                ProductivityStore::open_in_memory().expect("store"),
            ),
        )
    }

    async fn run_lines(
        assistant: &Assistant<ScriptedBackend>,
        context: &mut ConversationContext,
        lines: &[&str],
    ) -> String {
        let mut out = Vec::new();
        for line in lines {
            handle_line(assistant, context, line, &mut out)
                .await
                .expect("handle line");
        }
        String::from_utf8(out).expect("utf8")
    }

    #[tokio::test]
    async fn exit_words_end_the_session() {
        let assistant = assistant(ScriptedBackend::default());
        let mut context = ConversationContext::default();
        let mut out = Vec::new();
        for word in ["exit", "quit", "  quit  "] {
            assert_eq!(
                handle_line(&assistant, &mut context, word, &mut out)
                    .await
                    .expect("handle"),
                LineOutcome::Exit
            );
        }
        assert_eq!(
            handle_line(&assistant, &mut context, "   ", &mut out)
                .await
                .expect("handle"),
            LineOutcome::Continue
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn chat_line_streams_fragments_then_newline() {
        let backend = ScriptedBackend::new(vec![
            Ok(vec![
                text("Logging."),
                call(0, Some("update_productivity"), r#"{"focus_time":20,"tasks_completed":1}"#),
            ]),
            Ok(vec![text("Nice work.")]),
        ]);
        let assistant = assistant(backend);
        let mut context = ConversationContext::default();

        let output = run_lines(&assistant, &mut context, &["20 minutes, one task"]).await;
        insta::assert_snapshot!(output, @r"
        Logging.
        Productivity updated: Focus time 20 minutes, 1 tasks completed.
        Nice work.
        ");
        assert_eq!(context.transcript().len(), 2);
    }

    #[tokio::test]
    async fn profile_commands_edit_context() {
        let assistant = assistant(ScriptedBackend::default());
        let mut context = ConversationContext::default();

        let output = run_lines(
            &assistant,
            &mut context,
            &[
                "/profile",
                "/profile set first_name Ada",
                "/profile set age 36",
                "/profile set age old",
                "/profile",
            ],
        )
        .await;
        insta::assert_snapshot!(output, @r"
        (profile is empty)
        Profile updated: first_name
        Profile updated: age
        age must be a whole number
        age: 36
        first_name: Ada
        ");
    }

    #[tokio::test]
    async fn record_and_report_bypass_the_model() {
        let backend = ScriptedBackend::default();
        let assistant = assistant(backend.clone());
        let mut context = ConversationContext::default();

        let output = run_lines(
            &assistant,
            &mut context,
            &["/record 30 2", "/record 15 1", "/report 1"],
        )
        .await;
        assert!(output.contains("Recorded 30 focus minutes and 2 completed tasks for "));
        assert!(output.contains("Productivity, last 1 days:"));
        assert!(output.contains("focus   45 min  tasks   3  (2 entries)"));
        assert!(backend.requests().is_empty());
        assert!(context.transcript().is_empty());
    }

    #[tokio::test]
    async fn run_executes_a_file_in_the_sandbox() {
        let dir = tempdir().expect("tempdir");
        let script = dir.path().join("hello.sh");
        fs::write(&script, "echo from-file").expect("write script");

        let assistant = assistant(ScriptedBackend::default());
        let mut context = ConversationContext::default();
        let run_line = format!("/run {}", script.display());
        let output = run_lines(
            &assistant,
            &mut context,
            &[run_line.as_str(), "/run /nonexistent/script.py"],
        )
        .await;

        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("from-file"));
        assert!(
            lines
                .next()
                .is_some_and(|line| line.starts_with("error: Failed to read /nonexistent/script.py"))
        );
    }

    #[tokio::test]
    async fn tip_history_and_trace() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_dir("repl", dir.path()).expect("trace");
        let backend = ScriptedBackend::new(vec![
            Ok(vec![text("Hello!")]),
            Ok(vec![text("Break work into 25 minute sprints.\n")]),
        ]);
        let assistant = assistant(backend).with_trace(trace.clone());
        let mut context = ConversationContext::default();

        let output = run_lines(
            &assistant,
            &mut context,
            &["hi", "/tip", "/history", "/history 1", "/trace"],
        )
        .await;
        let expected = format!(
            "Hello!\nBreak work into 25 minute sprints.\nyou: hi\nneurocode: Hello!\nneurocode: Hello!\n{}\n",
            trace.file_path().display()
        );
        assert_eq!(output, expected);
        assert_eq!(context.transcript().len(), 2);
    }

    #[tokio::test]
    async fn unknown_commands_print_usage() {
        let assistant = assistant(ScriptedBackend::default());
        let mut context = ConversationContext::default();
        let output = run_lines(&assistant, &mut context, &["/nope", "/history", "/trace"]).await;
        assert_eq!(
            output,
            "unknown command '/nope'. Try /help\n(no messages yet)\nTracing is disabled for this session.\n"
        );
    }
}
