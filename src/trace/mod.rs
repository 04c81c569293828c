//! Per-session trace files.
//!
//! Every line is `[<utc timestamp>] [<kind>] <text>`, where kind is padded to
//! eleven columns. Multi-line text becomes one entry per line.

use anyhow::{Context, Result, bail};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::http::client::HttpEvent;

const TRACE_SUBDIR: &str = "neurocode/traces";
const EMPTY_MARKER: &str = "<empty>";

/// Append-only record of one chat session. Cloning shares the file.
#[derive(Clone)]
pub struct SessionTrace {
    file: Arc<TraceFile>,
}

struct TraceFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    broken: AtomicBool,
}

impl SessionTrace {
    pub fn create(session_id: &str) -> Result<Self> {
        Self::create_in_dir(session_id, &trace_dir_from_env()?)
    }

    pub fn create_in_dir(session_id: &str, dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create trace directory {}", dir.display()))?;

        let path = dir.join(format!("session-{session_id}.log"));
        let file = open_private(&path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;

        Ok(Self {
            file: Arc::new(TraceFile {
                path,
                writer: Mutex::new(BufWriter::new(file)),
                broken: AtomicBool::new(false),
            }),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file.path
    }

    pub fn log_user_input(&self, text: &str) {
        self.write_text("user.in", text);
    }

    /// `kind` tags the fragment source, e.g. `ai.text` or `tool.status`.
    pub fn log_fragment(&self, kind: &str, text: &str) {
        self.write_text(kind, text);
    }

    pub fn log_tool_call(&self, name: &str, raw_arguments: &str) {
        self.write_entries("tool.call", [format!("{name} {raw_arguments}")]);
    }

    pub fn log_tool_result(&self, name: &str, output: &str) {
        let mut lines = vec![name.to_string()];
        lines.extend(text_lines(output));
        self.write_entries("tool.result", lines);
    }

    pub fn log_http(&self, event: &HttpEvent<'_>) {
        let (kind, lines) = event.trace_lines();
        self.write_entries(kind, lines);
    }

    fn write_text(&self, kind: &str, text: &str) {
        self.write_entries(kind, text_lines(text));
    }

    /// Writes all lines under one lock so entries from clones never interleave.
    fn write_entries<I>(&self, kind: &str, lines: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        if self.file.broken.load(Ordering::Relaxed) {
            return;
        }
        let stamp = timestamp();
        let result = match self.file.writer.lock() {
            Ok(mut writer) => lines
                .into_iter()
                .try_for_each(|line| {
                    writeln!(writer, "[{stamp}] [{kind:<11}] {}", line.as_ref())
                })
                .and_then(|()| writer.flush())
                .map_err(|err| err.to_string()),
            Err(_) => Err("writer lock poisoned".to_string()),
        };

        if let Err(reason) = result {
            if !self.file.broken.swap(true, Ordering::Relaxed) {
                tracing::warn!(path = %self.file.path.display(), "session trace stopped: {reason}");
            }
        }
    }
}

fn text_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![EMPTY_MARKER.to_string()];
    }
    text.lines().map(str::to_string).collect()
}

fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ))
        .unwrap_or_else(|_| "????-??-??T??:??:??.???Z".to_string())
}

fn trace_dir_from_env() -> Result<PathBuf> {
    resolve_trace_dir(
        env::var("XDG_STATE_HOME").ok().as_deref(),
        dirs::home_dir().as_deref(),
    )
}

fn resolve_trace_dir(xdg_state_home: Option<&str>, home_dir: Option<&Path>) -> Result<PathBuf> {
    match (xdg_state_home.map(str::trim), home_dir) {
        (Some(""), _) => bail!("Failed to resolve trace path: XDG_STATE_HOME is set but empty"),
        (Some(state), _) => Ok(Path::new(state).join(TRACE_SUBDIR)),
        (None, Some(home)) => Ok(home.join(".local/state").join(TRACE_SUBDIR)),
        (None, None) => bail!("Failed to resolve trace path: HOME directory is unavailable"),
    }
}
