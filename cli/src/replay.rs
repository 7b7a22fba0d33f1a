use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use bluebubbles_core::fixture::{Fixture, FixtureBatch, FixtureServer};
use bluebubbles_core::model::Conversation;
use bluebubbles_core::notify::LogNotifier;
use bluebubbles_core::{format_display_timestamp, AppAction, AppState, SyncApp};

use crate::cli::{CliError, ReplayArgs};

pub fn replay(json: bool, args: ReplayArgs) -> Result<(), CliError> {
    let fixture = Fixture::load(&args.fixture)?;
    if args.timeout_ms == 0 {
        return Err(CliError::Usage("--timeout-ms must be positive".into()));
    }
    let timeout = Duration::from_millis(args.timeout_ms);

    let temp = tempfile::tempdir().context("create temp data dir")?;
    let data_dir = args
        .data_dir
        .unwrap_or_else(|| temp.path().to_path_buf())
        .to_string_lossy()
        .into_owned();

    let server = Arc::new(FixtureServer::new(&fixture));
    let app = SyncApp::new(data_dir, server, Arc::new(LogNotifier::new(false)));

    app.dispatch(AppAction::LoadConversations);
    settle(&app, timeout);
    if let Some(conversation_id) = args.open {
        app.dispatch(AppAction::OpenConversation { conversation_id });
    }

    let batches = fixture.batches.len();
    for batch in fixture.batches {
        match batch {
            FixtureBatch::Messages(items) => app.push_messages(items),
            FixtureBatch::Modifiers(modifiers) => app.push_modifiers(modifiers),
        }
    }
    let state = settle(&app, timeout);
    tracing::info!(batches, rev = state.rev, "replay finished");

    if json {
        print_json(&state)?;
    } else {
        print_human(&state);
    }
    Ok(())
}

/// Waits until no new state has been published for a short while.
fn settle(app: &SyncApp, timeout: Duration) -> AppState {
    let quiet = Duration::from_millis(250);
    let start = Instant::now();
    let mut last_rev = app.state().rev;
    let mut last_change = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(25));
        let state = app.state();
        if state.rev != last_rev {
            last_rev = state.rev;
            last_change = Instant::now();
        } else if last_change.elapsed() >= quiet && !state.loading_conversations {
            return state;
        }
        if start.elapsed() >= timeout {
            tracing::warn!(rev = state.rev, "engine did not settle before timeout");
            return state;
        }
    }
}

fn print_json(state: &AppState) -> anyhow::Result<()> {
    let conversations: Vec<&Conversation> = state.conversations.iter().map(|c| c.as_ref()).collect();
    let v = serde_json::json!({
        "ok": true,
        "rev": state.rev,
        "conversations": conversations,
        "timeline": state.timeline.as_ref().map(|t| &t.items),
    });
    println!("{}", serde_json::to_string_pretty(&v)?);
    Ok(())
}

fn print_human(state: &AppState) {
    for c in state.conversations.iter() {
        let marker = if c.unread_messages { "*" } else { " " };
        let when = c
            .preview_date()
            .map(format_display_timestamp)
            .unwrap_or_default();
        println!(
            "{marker} {:>4}  {:<32} {:>8}  {}",
            c.local_id.0,
            c.display_name(),
            when,
            c.preview.snippet()
        );
    }
    if let Some(timeline) = &state.timeline {
        println!("\n-- timeline {} --", timeline.local_id);
        for item in &timeline.items {
            match item.as_message() {
                Some(m) => println!(
                    "{:>8}  {:<24} {}",
                    format_display_timestamp(m.header.date),
                    m.sender.as_deref().unwrap_or("me"),
                    m.text.as_deref().unwrap_or("")
                ),
                None => println!("{:>8}  ({:?})", format_display_timestamp(item.date()), item.header().guid),
            }
        }
    }
}
