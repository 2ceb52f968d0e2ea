// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxiconf::{
    config::ServerConfig,
    path::default_config_path,
    repo::{composite::CompositeRepository, EnvironmentRepository},
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::{fs::read_to_string, path::PathBuf, process::exit, sync::Arc, time::Duration};
use tokio::{task::spawn_blocking, time::timeout};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oxiconf [options] <oxiconf-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to server configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let repository = Arc::new(load_repository(self.config).await?);
        match self.command {
            Command::Find(opts) => run_find(repository, opts).await,
            Command::Locations(opts) => run_locations(repository, opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Resolve environment of application.
    #[command(override_usage = "oxiconf find [options] <application> <profile> [<label>]")]
    Find(FindOptions),

    /// Show search locations of application without reading any files.
    #[command(override_usage = "oxiconf locations [options] <application> <profile> [<label>]")]
    Locations(LocationsOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FindOptions {
    /// Name of application, or comma separated listing of names.
    #[arg(required = true, value_name = "application")]
    pub application: String,

    /// Comma separated listing of profiles.
    #[arg(required = true, value_name = "profile")]
    pub profile: String,

    /// Branch, tag, or commit to read from.
    #[arg(value_name = "label")]
    pub label: Option<String>,

    /// Output format of environment.
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    pub format: Format,

    /// Give up after this many seconds.
    #[arg(short, long, value_name = "secs")]
    pub timeout: Option<u64>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LocationsOptions {
    /// Name of application, or comma separated listing of names.
    #[arg(required = true, value_name = "application")]
    pub application: String,

    /// Comma separated listing of profiles.
    #[arg(required = true, value_name = "profile")]
    pub profile: String,

    /// Branch, tag, or commit to read from.
    #[arg(value_name = "label")]
    pub label: Option<String>,

    /// Output format of locations.
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn render(self, value: &impl Serialize) -> Result<String> {
        match self {
            Format::Json => Ok(serde_json::to_string_pretty(value)?),
            Format::Toml => Ok(toml::to_string_pretty(&without_nulls(
                serde_json::to_value(value)?,
            ))?),
        }
    }
}

/// TOML has no null. Drop unset top-level fields, and blank out null values below them.
fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (key, blank_nulls(value)))
                .collect(),
        ),
        other => blank_nulls(other),
    }
}

fn blank_nulls(value: Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(items) => Value::Array(items.into_iter().map(blank_nulls).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, value)| (key, blank_nulls(value)))
                .collect(),
        ),
        scalar => scalar,
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn load_repository(path: Option<PathBuf>) -> Result<CompositeRepository> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    debug!("load configuration from {:?}", path.display());

    let data = read_to_string(&path)
        .with_context(|| format!("cannot read configuration {:?}", path.display()))?;
    let config: ServerConfig = data
        .parse()
        .with_context(|| format!("malformed configuration {:?}", path.display()))?;

    // INVARIANT: Clone on start may hit the network, keep it off the runtime.
    let repository = spawn_blocking(move || CompositeRepository::from_config(&config)).await??;

    Ok(repository)
}

async fn run_find(repository: Arc<CompositeRepository>, opts: FindOptions) -> Result<()> {
    let FindOptions {
        application,
        profile,
        label,
        format,
        timeout: limit,
    } = opts;

    let task = spawn_blocking(move || {
        repository.find_one(&application, &profile, label.as_deref())
    });
    let environment = match limit {
        Some(secs) => timeout(Duration::from_secs(secs), task)
            .await
            .map_err(|_| anyhow!("request did not finish within {secs} seconds"))???,
        None => task.await??,
    };

    println!("{}", format.render(&environment)?);

    Ok(())
}

async fn run_locations(repository: Arc<CompositeRepository>, opts: LocationsOptions) -> Result<()> {
    let LocationsOptions {
        application,
        profile,
        label,
        format,
    } = opts;

    let locations = spawn_blocking(move || {
        repository.get_locations(&application, &profile, label.as_deref())
    })
    .await??;

    println!("{}", format.render(&locations)?);

    Ok(())
}
