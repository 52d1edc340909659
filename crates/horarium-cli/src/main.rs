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


//! Horarium CLI - runs the periodic notification service, sends it commands
//! and manages registered periodic queries.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use horarium::TimeUnit;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Horarium - windowed, periodic delivery of continuous query results
#[derive(Parser)]
#[command(name = "horarium")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (can also be set via HORARIUM_CONFIG environment variable)
    #[arg(short, long, env = "HORARIUM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic notification service until interrupted
    Serve,
    /// Send notification commands to a running service
    Notify {
        #[command(subcommand)]
        command: NotifyCommands,
    },
    /// Manage registered periodic queries while the service is stopped
    Query {
        #[command(subcommand)]
        command: QueryCommands,
    },
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Register a periodic query and print its id
    Add {
        /// SPARQL text containing a periodic filter
        #[arg(long, required_unless_present = "file", conflicts_with = "file")]
        sparql: Option<String>,

        /// File holding the SPARQL text
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List registered periodic queries
    List,
    /// Remove a periodic query and its stored results
    Delete {
        /// Query id
        id: String,
    },
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// Schedule a periodic notification
    Add {
        /// Notification id, usually the query id
        #[arg(long)]
        id: String,

        /// Period, in units of --time-unit
        #[arg(long)]
        period: u64,

        /// Unit for --period and --delay (MILLISECONDS, SECONDS, MINUTES, HOURS)
        #[arg(long, default_value = "SECONDS")]
        time_unit: TimeUnit,

        /// Delay before the first fire
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },
    /// Cancel a periodic notification
    Delete {
        /// Notification id
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => commands::serve::run(config).await?,
        Commands::Notify { command } => match command {
            NotifyCommands::Add {
                id,
                period,
                time_unit,
                delay,
            } => commands::notify::add(&config, &id, period, time_unit, delay).await?,
            NotifyCommands::Delete { id } => commands::notify::delete(&config, &id).await?,
        },
        Commands::Query { command } => match command {
            QueryCommands::Add { sparql, file } => {
                let sparql = match (sparql, file) {
                    (Some(sparql), _) => sparql,
                    (None, Some(file)) => std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?,
                    (None, None) => return Err(anyhow!("either --sparql or --file is required")),
                };
                let query_id = commands::query::add(&config, &sparql).await?;
                println!("{}", query_id);
            }
            QueryCommands::List => {
                for query in commands::query::list(&config).await? {
                    println!(
                        "{}\tperiod={}ms\twindow={}ms\t{}",
                        query.query_id, query.period_ms, query.window_ms, query.sparql
                    );
                }
            }
            QueryCommands::Delete { id } => commands::query::delete(&config, &id).await?,
        },
    }

    Ok(())
}
