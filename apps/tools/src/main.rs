use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, load_settings_from, parse_commit_policy},
    ChecklistStore, LatencyBoundary, ListStore, MutationTicket, TodoStore,
};
use futures::StreamExt;
use serde::Serialize;
use shared::{
    domain::{fields, Completable, FieldValue},
    protocol::CommitPolicy,
};
use storage::RandomIds;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Drive an in-memory list store and print its snapshots")]
struct Cli {
    /// Settings file; defaults to ./list-tools.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    latency_ms: Option<u64>,
    #[arg(long, value_parser = policy_arg)]
    policy: Option<CommitPolicy>,
    /// Print every store event as a JSON line.
    #[arg(long)]
    events: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// add a, add b, move a down, remove b, reset.
    Scenario,
    /// Two edits of one item whose round trips resolve in reverse order.
    Race,
    /// Clone, complete and reorder items of a checklist.
    Checklist,
}

fn policy_arg(raw: &str) -> Result<CommitPolicy, String> {
    parse_commit_policy(raw).ok_or_else(|| format!("unknown policy '{raw}'; use fifo or optimistic"))
}

/// Later mutations resolve sooner: seq n waits `base / n`.
struct DescendingLatency {
    base: Duration,
}

#[async_trait]
impl LatencyBoundary for DescendingLatency {
    async fn wait(&self, ticket: &MutationTicket) {
        let divisor = u32::try_from(ticket.seq).unwrap_or(u32::MAX).max(1);
        tokio::time::sleep(self.base / divisor).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    if let Some(latency_ms) = cli.latency_ms {
        settings.latency_ms = latency_ms;
    }
    if let Some(policy) = cli.policy {
        settings.commit_policy = policy;
    }

    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();
    info!(?settings, "list-tools starting");

    match cli.command {
        Command::Scenario => {
            let store = TodoStore::new("scenario", &settings)?;
            watch_events(&store, cli.events);
            run_scenario(&store).await?;
        }
        Command::Race => {
            let base = settings.latency().max(Duration::from_millis(10));
            let store = TodoStore::new_with_dependencies(
                "race",
                &settings,
                Arc::new(RandomIds),
                Arc::new(DescendingLatency { base }),
            )?;
            watch_events(&store, cli.events);
            run_race(&store).await?;
        }
        Command::Checklist => {
            let store = ChecklistStore::new("checklist", &settings)?;
            watch_events(&store, cli.events);
            run_checklist(&store).await?;
        }
    }

    Ok(())
}

fn watch_events<E: Completable>(store: &ListStore<E>, enabled: bool) {
    if !enabled {
        return;
    }
    let mut stream = Box::pin(store.event_stream());
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("event {line}"),
                Err(error) => tracing::warn!(%error, "failed to encode event"),
            }
        }
    });
}

async fn print_step<E>(store: &ListStore<E>, label: &str) -> Result<()>
where
    E: Completable + Serialize,
{
    store.settled().await?;
    let snapshot = store.snapshot()?;
    println!("{label}: {}", serde_json::to_string(&*snapshot)?);
    Ok(())
}

async fn run_scenario(store: &TodoStore) -> Result<()> {
    let a = store.add(fields([("text", "a")]))?;
    print_step(store, "add a").await?;

    let b = store.add(fields([("text", "b")]))?;
    print_step(store, "add b").await?;

    store.move_down(a)?;
    print_step(store, "move_down a").await?;

    store.remove(b)?;
    print_step(store, "remove b").await?;

    store.reset()?;
    print_step(store, "reset").await?;
    Ok(())
}

async fn run_race(store: &TodoStore) -> Result<()> {
    let id = store.add(fields([("text", "draft")]))?;
    print_step(store, "add").await?;

    store.set_field(id, "text", FieldValue::Text("first".into()))?;
    store.set_field(id, "text", FieldValue::Text("second".into()))?;
    store.settled().await?;

    let text = store.get(id)?.map(|item| item.text).unwrap_or_default();
    println!(
        "policy {:?}: final text '{text}' ({})",
        store.policy(),
        match store.policy() {
            CommitPolicy::Fifo => "issue order",
            CommitPolicy::Optimistic => "last round trip to finish",
        }
    );
    Ok(())
}

async fn run_checklist(store: &ChecklistStore) -> Result<()> {
    let milk = store.add(fields([("content", "milk")]))?;
    let eggs = store.add(fields([("content", "eggs")]))?;
    print_step(store, "add milk, eggs").await?;

    let copy = store.clone_entity(milk)?;
    store.set_done(milk, true)?;
    print_step(store, "clone milk, finish original").await?;

    store.move_up(copy)?;
    store.move_down(milk)?;
    print_step(store, "reorder").await?;

    store.remove(eggs)?;
    print_step(store, "remove eggs").await?;
    Ok(())
}
