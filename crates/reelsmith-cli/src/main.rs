/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Reelsmith CLI - operator commands for the generation queue.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Reelsmith - durable orchestration for batched content generation
#[derive(Parser)]
#[command(name = "reelsmith")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Queue configuration file (TOML)
    #[arg(long, env = "REELSMITH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair state left behind by a crashed process
    Reconcile {
        /// Force batches idle for longer than this many hours to Failed
        #[arg(long)]
        stuck_hours: Option<u64>,

        /// Recover tasks processing for longer than this many seconds
        #[arg(long)]
        max_processing_secs: Option<u64>,
    },
    /// Show queue statistics
    Stats,
    /// Inspect and manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Inspect generation locks
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Inspect sync status
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Show a single task
    Show { task_id: String },
    /// List an account's tasks, newest first
    List {
        #[arg(long)]
        account: i64,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Re-queue a failed task
    Retry { task_id: String },
    /// Cancel a pending or queued task
    Cancel { task_id: String },
    /// List tasks whose workers stopped heartbeating
    Orphans {
        /// Re-queue (or fail, once retries are spent) the orphaned tasks
        #[arg(long)]
        requeue: bool,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// List held generation locks
    List,
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Show an account's sync status
    Show { account: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let database_url = cli
        .database_url
        .context("Database URL is required. Set --database-url or DATABASE_URL environment variable")?;
    let ctx = commands::Context::connect(&database_url, cli.config.as_deref()).await?;

    match cli.command {
        Commands::Reconcile {
            stuck_hours,
            max_processing_secs,
        } => commands::reconcile::run(&ctx, stuck_hours, max_processing_secs).await?,
        Commands::Stats => commands::stats::run(&ctx).await?,
        Commands::Task { command } => match command {
            TaskCommands::Show { task_id } => commands::task::show(&ctx, &task_id).await?,
            TaskCommands::List {
                account,
                limit,
                offset,
            } => commands::task::list(&ctx, account, limit, offset).await?,
            TaskCommands::Retry { task_id } => commands::task::retry(&ctx, &task_id).await?,
            TaskCommands::Cancel { task_id } => commands::task::cancel(&ctx, &task_id).await?,
            TaskCommands::Orphans { requeue } => commands::task::orphans(&ctx, requeue).await?,
        },
        Commands::Lock { command } => match command {
            LockCommands::List => commands::lock::list(&ctx).await?,
        },
        Commands::Sync { command } => match command {
            SyncCommands::Show { account } => commands::sync::show(&ctx, account).await?,
        },
    }

    Ok(())
}
