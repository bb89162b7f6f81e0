//! # relmap demo
//!
//! A CLI walkthrough of sequencer-ordered shared maps: replicas mutate a
//! shared key-value map, the in-memory sequencer imposes a total order, and
//! every replica converges by applying operations in that order.
//!
//! Three scenarios:
//! - `demo`: two attached replicas exchange writes and converge
//! - `offline`: a local map buffers writes, then attaches and flushes
//! - `nested`: a map stored inside another map, attached transitively

use clap::{Parser, Subcommand};
use colored::*;
use relmap_client::{
    MemorySequencer, MemoryStorage, ObjectServices, Registry, SharedMap, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "relmap-demo")]
#[command(about = "Sequencer-ordered shared map walkthrough")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Two attached replicas exchange writes and converge
    Demo,
    /// Buffer writes on a local map, then attach and flush
    Offline,
    /// Store a map inside another map and attach transitively
    Nested,
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

async fn show_map(label: &str, map: &SharedMap) {
    let mut keys = map.keys().await.expect("map is readable");
    keys.sort();
    println!(
        "  {} {} (seq {}, {} pending)",
        "▸".bright_yellow(),
        label.bright_magenta(),
        map.sequence_number(),
        map.pending_ops()
    );
    if keys.is_empty() {
        println!("      {}", "(empty)".dimmed());
    }
    for key in keys {
        if let Some(value) = map.get(&key).await.expect("map is readable") {
            match value.as_plain() {
                Some(plain) => println!("      {} = {}", key.bright_white(), plain),
                None => println!("      {} = {}", key.bright_white(), "<nested map>".cyan()),
            }
        }
    }
}

/// Give the inbound pumps a moment to drain.
async fn propagate() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ─── Scenarios ────────────────────────────────────────────────────────────

fn fresh_collab() -> (MemorySequencer, Arc<ObjectServices>, Arc<Registry>) {
    let sequencer = MemorySequencer::new();
    let services = Arc::new(ObjectServices::new(
        Arc::new(sequencer.clone()),
        Arc::new(MemoryStorage::new()),
    ));
    (sequencer, services, Arc::new(Registry::with_defaults()))
}

async fn run_demo() {
    header("Two replicas, one total order");
    let (sequencer, services, registry) = fresh_collab();

    let alice = SharedMap::with_id("whiteboard");
    alice.attach(services.clone(), registry.clone()).await.unwrap();
    let bob = SharedMap::with_id("whiteboard");
    bob.attach(services, registry).await.unwrap();
    step("alice and bob attached to document 'whiteboard'");

    alice.set("title", json!("standup notes")).await.unwrap();
    bob.set("owner", json!("bob")).await.unwrap();
    alice.set("count", json!(2)).await.unwrap();
    propagate().await;

    show_map("alice", &alice).await;
    show_map("bob", &bob).await;

    step("bob deletes 'count'");
    bob.delete("count").await.unwrap();
    propagate().await;

    show_map("alice", &alice).await;
    show_map("bob", &bob).await;
    println!(
        "\n  sequencer stamped {} operations",
        sequencer.sequence_number("whiteboard").to_string().bright_yellow()
    );
}

async fn run_offline() {
    header("Local-first: buffer, then attach");
    let (_sequencer, services, registry) = fresh_collab();

    let reader = SharedMap::with_id("journal");
    reader.attach(services.clone(), registry.clone()).await.unwrap();
    step("reader attached and waiting");

    let writer = SharedMap::with_id("journal");
    writer.set("mon", json!("wrote draft")).await.unwrap();
    writer.set("tue", json!("wrote code")).await.unwrap();
    writer.delete("mon").await.unwrap();
    step(&format!(
        "writer buffered {} operations while local",
        writer.pending_ops()
    ));

    writer.attach(services, registry).await.unwrap();
    propagate().await;
    step("writer attached; log flushed in issue order and acknowledged");

    show_map("writer", &writer).await;
    show_map("reader", &reader).await;
}

async fn run_nested() {
    header("Nested maps attach transitively");
    let (_sequencer, services, registry) = fresh_collab();

    let board = SharedMap::with_id("board");
    board.attach(services.clone(), registry.clone()).await.unwrap();
    let mirror = SharedMap::with_id("board");
    mirror.attach(services, registry).await.unwrap();

    let column = SharedMap::with_id("todo-column");
    column.set("first", json!("ship it")).await.unwrap();
    step("created local map 'todo-column' with one entry");

    board
        .set("todo", Value::object(column.handle()))
        .await
        .unwrap();
    propagate().await;
    step("stored it under board['todo']; it attached before the set shipped");
    println!(
        "      column.is_local() = {}",
        column.is_local().to_string().bright_yellow()
    );

    let value = mirror.get("todo").await.unwrap().expect("replicated slot");
    let replica = value.as_map().expect("slot holds a map").clone();
    step("mirror replica materialized the nested map through the registry");

    column.set("second", json!("celebrate")).await.unwrap();
    propagate().await;

    show_map("board", &board).await;
    show_map("column (origin)", &column).await;
    show_map("column (mirror)", &replica).await;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Offline => run_offline().await,
        Commands::Nested => run_nested().await,
    }
}
