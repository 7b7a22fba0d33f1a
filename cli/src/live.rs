use anyhow::Context;
use bluebubbles_core::model::SearchOptions;
use bluebubbles_core::server::{HttpServerApi, ServerApi};
use bluebubbles_core::format_display_timestamp;

use crate::cli::{CliError, ListArgs, SearchArgs, ServerArgs};

fn connect(args: &ServerArgs) -> Result<(HttpServerApi, tokio::runtime::Runtime), CliError> {
    let api = HttpServerApi::new(&args.server, args.password.clone())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("tokio runtime")?;
    Ok((api, runtime))
}

pub fn list(json: bool, args: ListArgs) -> Result<(), CliError> {
    if args.count == 0 {
        return Err(CliError::Usage("--count must be positive".into()));
    }
    let (api, runtime) = connect(&args.server)?;
    let conversations = runtime
        .block_on(api.fetch_conversations(args.count))
        .context("fetch conversations")?;

    if json {
        let v = serde_json::json!({ "ok": true, "conversations": conversations });
        println!("{}", serde_json::to_string_pretty(&v).context("encode output")?);
        return Ok(());
    }
    for c in &conversations {
        let name = c.name.clone().unwrap_or_else(|| c.members.join(", "));
        let when = c.preview.date().map(format_display_timestamp).unwrap_or_default();
        let marker = if c.unread_messages { "*" } else { " " };
        println!("{marker} {:<40} {:>8}  {}", name, when, c.preview.snippet());
    }
    Ok(())
}

pub fn search(json: bool, args: SearchArgs) -> Result<(), CliError> {
    if args.query.trim().is_empty() {
        return Err(CliError::Usage("query must not be empty".into()));
    }
    let (api, runtime) = connect(&args.server)?;
    let options = SearchOptions {
        query: args.query,
        chat_guids: (!args.chats.is_empty()).then_some(args.chats),
        limit: args.limit,
    };
    let hits = runtime
        .block_on(api.search_messages(options))
        .context("search messages")?;

    if json {
        let v = serde_json::json!({ "ok": true, "hits": hits });
        println!("{}", serde_json::to_string_pretty(&v).context("encode output")?);
        return Ok(());
    }
    for hit in &hits {
        println!(
            "{:>8}  {:<28} {:<16} {}",
            format_display_timestamp(hit.date),
            hit.chat_guid,
            hit.sender.as_deref().unwrap_or("me"),
            hit.text.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
