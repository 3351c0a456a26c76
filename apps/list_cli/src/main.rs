use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{HttpPageFetcher, ListEvent, ListOptions, PageFetcher, PaginatedList};
use serde_json::Value;
use shared::{domain::Resource, protocol::ExtraParams};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "list-cli", about = "Browse the paginated lists of the logistics backend")]
struct Args {
    /// packages, pulls, batches, dispatches, transport-agencies, delivery-agencies or reports
    #[arg(long, default_value = "packages")]
    resource: Resource,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    page_size: Option<u32>,
    #[arg(long)]
    base_url: Option<String>,
    /// Extra query parameter, repeatable
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    filters: Vec<String>,
    #[arg(long, default_value = "list_cli.toml")]
    config: PathBuf,
    /// Keep reading paging commands from stdin
    #[arg(long)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(base_url) = args.base_url {
        settings.api_base_url = base_url;
    }
    if let Some(page_size) = args.page_size {
        settings.page_size = page_size;
    }
    let extra = parse_filters(&args.filters)?;

    let fetcher =
        HttpPageFetcher::<Value>::new(&settings.api_base_url, args.resource, settings.timeout())
            .context("failed to configure list endpoint")?;
    info!(
        endpoint = %fetcher.endpoint(),
        page_size = settings.page_size,
        "browsing {}",
        args.resource
    );

    let list = PaginatedList::new(
        Arc::new(fetcher) as Arc<dyn PageFetcher<Value>>,
        ListOptions {
            page_size: settings.page_size,
            auto_load: false,
        },
    );
    let mut events = list.subscribe();

    list.load(args.page, extra)
        .await
        .with_context(|| format!("failed to load {} page {}", args.resource, args.page))?;
    render(&list, &mut events).await?;

    if args.interactive {
        browse(&list, &mut events).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Next,
    Previous,
    Goto(u32),
    Refresh,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim() {
        "n" | "next" => Some(Command::Next),
        "p" | "prev" => Some(Command::Previous),
        "r" | "refresh" => Some(Command::Refresh),
        "q" | "quit" => Some(Command::Quit),
        other => other.parse().ok().map(Command::Goto),
    }
}

async fn browse(
    list: &Arc<PaginatedList<Value>>,
    events: &mut broadcast::Receiver<ListEvent>,
) -> Result<()> {
    println!("commands: n(ext), p(rev), <page>, r(efresh), q(uit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            println!("unknown command '{}'", line.trim());
            continue;
        };
        let current = list.current_page().await;
        let handle = match command {
            Command::Next => list.change_page(current.saturating_add(1)),
            Command::Previous => list.change_page(current.saturating_sub(1).max(1)),
            Command::Goto(page) => list.change_page(page),
            Command::Refresh => list.refresh(),
            Command::Quit => break,
        };
        handle.await.context("page load task panicked")?;
        render(list, events).await?;
    }
    Ok(())
}

async fn render(
    list: &PaginatedList<Value>,
    events: &mut broadcast::Receiver<ListEvent>,
) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        match event {
            ListEvent::ScrollToTop { page } => println!("==== page {page} ===="),
            ListEvent::LoadFailed { page, error } => {
                println!("!! page {page} failed: {}", error.user_message(None))
            }
            ListEvent::LoadStarted { .. } => {}
        }
    }

    let snapshot = list.snapshot().await;
    if snapshot.last_error.is_none() {
        for item in &snapshot.items {
            println!("{}", serde_json::to_string(item)?);
        }
    }
    println!(
        "page {}/{} ({} records, {} per page)",
        snapshot.current_page,
        snapshot.total_pages.max(1),
        snapshot.total_count,
        snapshot.page_size
    );
    Ok(())
}

/// Parses repeated `KEY=VALUE` flags; values that read as JSON scalars keep their type.
fn parse_filters(raw: &[String]) -> Result<ExtraParams> {
    let mut extra = ExtraParams::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("filter '{entry}' must look like KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("filter '{entry}' has an empty key");
        }
        let value = match serde_json::from_str::<Value>(value) {
            Ok(parsed @ (Value::Bool(_) | Value::Number(_))) => parsed,
            _ => Value::String(value.to_string()),
        };
        extra.insert(key.to_string(), value);
    }
    Ok(extra)
}
