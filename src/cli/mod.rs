mod args;
mod commands;
mod repl;

pub use args::{CliArgs, CliCommand};
pub(crate) use repl::read_script;
pub use repl::{PROMPT, run_repl};
