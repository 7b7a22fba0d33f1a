use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bbsync", about = "Conversation sync engine tooling")]
pub struct Cli {
    /// Machine-readable output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Replay a JSON fixture through the sync engine and print the result.
    Replay(ReplayArgs),
    /// List conversations from a live server.
    List(ListArgs),
    /// Search messages on a live server.
    Search(SearchArgs),
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    #[arg(long, env = "BLUEBUBBLES_SERVER_URL")]
    pub server: String,
    #[arg(long, env = "BLUEBUBBLES_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    #[arg(long)]
    pub fixture: PathBuf,
    /// Directory holding `bluebubbles_config.json`. Defaults to a temp dir.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Conversation guid (or local id) to open before replaying.
    #[arg(long)]
    pub open: Option<String>,
    #[arg(long, default_value_t = 5_000)]
    pub timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    #[arg(long, default_value_t = 25)]
    pub count: usize,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    pub query: String,
    /// Restrict to these chat guids.
    #[arg(long = "chat")]
    pub chats: Vec<String>,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::Usage(_) => "usage",
            CliError::Other(_) => "failed",
        }
    }
}

pub fn render_err(json: bool, e: CliError) -> ExitCode {
    if json {
        let v = serde_json::json!({ "ok": false, "code": e.code(), "error": format!("{e:#}") });
        eprintln!("{v}");
    } else {
        eprintln!("error: {e:#}");
    }
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn search_collects_repeated_chat_flags() {
        let cli = Cli::try_parse_from([
            "bbsync",
            "--json",
            "search",
            "--server",
            "http://localhost:1234",
            "--password",
            "pw",
            "--chat",
            "iMessage;-;a",
            "--chat",
            "SMS;-;b",
            "dinner",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.cmd {
            Cmd::Search(s) => {
                assert_eq!(s.query, "dinner");
                assert_eq!(s.chats, vec!["iMessage;-;a", "SMS;-;b"]);
                assert_eq!(s.server.server, "http://localhost:1234");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
