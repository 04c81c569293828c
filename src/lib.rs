pub mod agent;
pub mod cli;
pub mod config;
pub mod http;
pub mod llm;
pub mod productivity;
pub mod sandbox;
pub mod trace;

use agent::{Assistant, ConversationContext, Toolbox};
use anyhow::{Context, Result};
use cli::{CliArgs, CliCommand, read_script, run_repl};
use config::AppConfig;
use http::client::HttpClient;
use http::redact::HttpDebugConfig;
use llm::openai::OpenAiCompatProvider;
use productivity::ProductivityStore;
use sandbox::CodeExecutor;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use trace::SessionTrace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(args: CliArgs) -> Result<()> {
    let config = AppConfig::load_with_path(args.config.as_deref())?;
    tracing::debug!(
        config = ?config.config_path,
        model = %config.model,
        base_url = %config.base_url,
        database = %config.database_path.display(),
        "configuration loaded"
    );

    match args.command {
        Some(CliCommand::Exec { file }) => exec_file(&config, &file).await,
        Some(CliCommand::Record {
            focus_minutes,
            tasks_completed,
        }) => {
            let store = ProductivityStore::open(&config.database_path)?;
            let record = store.record(focus_minutes, tasks_completed)?;
            println!(
                "Recorded {} focus minutes and {} completed tasks for {}.",
                record.focus_minutes, record.tasks_completed, record.date
            );
            Ok(())
        }
        Some(CliCommand::Report { days }) => {
            let store = ProductivityStore::open(&config.database_path)?;
            println!("{}", store.report(days)?);
            Ok(())
        }
        None => run_chat(&config, args.verbose).await,
    }
}

async fn exec_file(config: &AppConfig, file: &Path) -> Result<()> {
    let code = read_script(file).await?;
    let output = executor_for(config).execute(&code).await;
    print!("{output}");
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn run_chat(config: &AppConfig, verbose: bool) -> Result<()> {
    let session_id = generate_session_id();
    let trace = match SessionTrace::create(&session_id) {
        Ok(trace) => Some(trace),
        Err(err) => {
            tracing::warn!("session trace disabled: {err:#}");
            None
        }
    };

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let mut http = HttpClient::new(client, HttpDebugConfig::from_verbose(verbose));
    if let Some(trace) = &trace {
        http = http.with_trace(trace.clone());
    }

    let provider = OpenAiCompatProvider::new(
        http,
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
    );
    let store = ProductivityStore::open(&config.database_path)?;
    let mut assistant = Assistant::new(provider, Toolbox::new(executor_for(config), store));
    if let Some(trace) = trace {
        tracing::info!(path = %trace.file_path().display(), "session trace enabled");
        assistant = assistant.with_trace(trace);
    }

    let mut context = ConversationContext::new(config.profile.to_profile());
    run_repl(&assistant, &mut context).await
}

fn executor_for(config: &AppConfig) -> CodeExecutor {
    CodeExecutor::new(config.python.clone(), config.execution_timeout())
}

fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis());
    format!("{millis:x}-{:x}", std::process::id())
}
