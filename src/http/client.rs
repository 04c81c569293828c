use super::redact::{HttpDebugConfig, body_for_log, header_value_for_log, truncate_for_log};
use crate::trace::SessionTrace;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};

const DEBUG_PREFIX: &str = "[http-debug]";

/// One observable step of a streamed exchange.
#[derive(Debug, Clone, Copy)]
pub enum HttpEvent<'a> {
    Request {
        method: &'a str,
        url: &'a str,
        headers: &'a HeaderMap,
        body: &'a str,
    },
    Status {
        status: u16,
        headers: &'a HeaderMap,
    },
    BodyLine(&'a str),
    Failed(&'a str),
}

impl HttpEvent<'_> {
    /// Trace tag plus the raw lines to record. Nothing is redacted: the trace
    /// file is private to the user.
    pub fn trace_lines(&self) -> (&'static str, Vec<String>) {
        match *self {
            Self::Request {
                method,
                url,
                headers,
                body,
            } => {
                let mut lines = vec![format!("{method} {url}")];
                lines.extend(raw_headers(headers));
                if body.is_empty() {
                    lines.push("<empty>".to_string());
                } else {
                    lines.extend(body.lines().map(str::to_string));
                }
                ("http.req", lines)
            }
            Self::Status { status, headers } => {
                let mut lines = vec![format!("HTTP {status}")];
                lines.extend(raw_headers(headers));
                ("http.resp", lines)
            }
            Self::BodyLine(line) => ("http.resp", vec![line.to_string()]),
            Self::Failed(message) => ("http.err", vec![message.to_string()]),
        }
    }

    fn debug_lines(&self, debug: HttpDebugConfig) -> Vec<String> {
        let shown = |text: &str| {
            truncate_for_log(&body_for_log(text, debug.redact_secrets), debug.max_body_chars)
        };
        let headers_with = |arrow: char, headers: &HeaderMap| -> Vec<String> {
            headers
                .iter()
                .map(|(name, value)| {
                    format!(
                        "{DEBUG_PREFIX} {arrow} {}: {}",
                        name.as_str(),
                        header_value_for_log(name.as_str(), value, debug.redact_secrets)
                    )
                })
                .collect()
        };

        match *self {
            Self::Request {
                method,
                url,
                headers,
                body,
            } => {
                let mut lines = vec![format!("{DEBUG_PREFIX} > {method} {url}")];
                lines.extend(headers_with('>', headers));
                lines.push(format!("{DEBUG_PREFIX} > {}", shown(body)));
                lines
            }
            Self::Status { status, headers } => {
                let mut lines = vec![format!("{DEBUG_PREFIX} < HTTP {status}")];
                lines.extend(headers_with('<', headers));
                lines
            }
            Self::BodyLine(line) => vec![format!("{DEBUG_PREFIX} < {}", shown(line))],
            Self::Failed(message) => vec![format!("{DEBUG_PREFIX} ! {message}")],
        }
    }
}

fn raw_headers(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers.iter().map(|(name, value)| {
        format!(
            "{}: {}",
            name.as_str(),
            value.to_str().unwrap_or("<non-utf8>")
        )
    })
}

#[derive(Clone)]
enum DebugSink {
    Stderr,
    #[cfg(test)]
    Memory(Arc<Mutex<Vec<String>>>),
}

impl DebugSink {
    fn write(&self, line: String) {
        match self {
            Self::Stderr => {
                let _ = writeln!(io::stderr().lock(), "{line}");
            }
            #[cfg(test)]
            Self::Memory(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        }
    }
}

/// `reqwest` wrapper that reports every exchange to the session trace and,
/// when verbose, to stderr.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    debug: HttpDebugConfig,
    sink: DebugSink,
    trace: Option<SessionTrace>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("debug", &self.debug)
            .field("traced", &self.trace.is_some())
            .finish()
    }
}

impl HttpClient {
    pub fn new(inner: Client, debug: HttpDebugConfig) -> Self {
        Self {
            inner,
            debug,
            sink: DebugSink::Stderr,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Sends a JSON POST and returns as soon as the status line is in. The
    /// body is left unread for the caller to stream.
    pub async fn post_json_streaming<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        payload: &T,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self.inner.post(url).json(payload);
        if let Some(token) = bearer_token {
            builder = builder.bearer_auth(token);
        }
        let request = builder.build()?;

        let body = request
            .body()
            .and_then(|body| body.as_bytes())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        self.observe(HttpEvent::Request {
            method: request.method().as_str(),
            url: request.url().as_str(),
            headers: request.headers(),
            body: &body,
        });

        let response = self
            .inner
            .execute(request)
            .await
            .inspect_err(|err| self.observe(HttpEvent::Failed(&err.to_string())))?;

        self.observe(HttpEvent::Status {
            status: response.status().as_u16(),
            headers: response.headers(),
        });
        Ok(response)
    }

    pub fn log_body_line(&self, line: &str) {
        self.observe(HttpEvent::BodyLine(line));
    }

    fn observe(&self, event: HttpEvent<'_>) {
        if self.debug.enabled {
            for line in event.debug_lines(self.debug) {
                self.sink.write(line);
            }
        }
        if let Some(trace) = &self.trace {
            trace.log_http(&event);
        }
    }

    #[cfg(test)]
    pub fn with_memory_sink(
        inner: Client,
        debug: HttpDebugConfig,
    ) -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut client = Self::new(inner, debug);
        client.sink = DebugSink::Memory(Arc::clone(&lines));
        (client, lines)
    }
}
