mod cache;
mod config;
mod logging;
mod soda;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use cache::{CacheLayer, CacheStorage, MemoryStorage, NoopStorage};
use soda::cached_client::CachedSodaClient;
use soda::client::{FetchContext, SodaClient};
use soda::types::{FetchMode, Flag, Retrieval};

#[derive(Parser, Debug)]
#[command(name = "crimefeed")]
#[command(about = "Pull LA City crime records for a date window, with response caching")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/crimefeed/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Skip the response cache entirely
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Retrieve every record in a date window
  Fetch {
    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: String,
    /// Last day (inclusive), YYYY-MM-DD
    #[arg(long)]
    end: String,
    #[arg(short, long, value_enum, default_value_t = FetchMode::Auto)]
    mode: FetchMode,
    /// Write JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Stop waiting on upstream after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
  },
  /// Count records in a date window
  Count {
    #[arg(long)]
    start: String,
    #[arg(long)]
    end: String,
  },
  /// Show the earliest and latest dates available
  Range,
  /// Run a raw SODA query against the dataset, e.g. --param '$select=count(*)'
  Query {
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let inner = SodaClient::new(&config.api)?;

  if args.no_cache {
    let client = CachedSodaClient::new(inner, CacheLayer::new(NoopStorage), &config.cache);
    run(args.command, &client).await
  } else {
    let cache = CacheLayer::new(MemoryStorage::new()).with_default_ttl(config.cache.default_ttl());
    let _sweeper = cache.spawn_sweeper(config.cache.sweep_interval());
    let client = CachedSodaClient::new(inner, cache, &config.cache);
    run(args.command, &client).await
  }
}

async fn run<S: CacheStorage>(command: Command, client: &CachedSodaClient<S>) -> Result<()> {
  match command {
    Command::Fetch {
      start,
      end,
      mode,
      output,
      timeout,
    } => {
      let ctx = timeout
        .map(|secs| FetchContext::with_timeout(Duration::from_secs(secs)))
        .unwrap_or_default();
      let progress = |so_far: usize, total: usize| {
        info!(so_far, total, "fetched page");
      };

      let retrieval = client
        .retrieve(&start, &end, mode, &ctx, Some(&progress))
        .await?;

      if let Some(failure) = &retrieval.soft_failure {
        warn!(%failure, "retrieval incomplete, records may be missing");
      }
      info!(count = retrieval.count, strategy = ?retrieval.strategy, "retrieved");
      log_summary(&retrieval);

      write_json(output.as_deref(), &retrieval)?;
    }
    Command::Count { start, end } => {
      let count = client.count(&start, &end, &FetchContext::default()).await?;
      if let Some(failure) = &count.soft_failure {
        warn!(%failure, "count unavailable, reporting zero");
      }
      println!("{}", count.data);
    }
    Command::Range => {
      let range = client.date_range(&FetchContext::default()).await?;
      println!("{} {}", range.min, range.max);
    }
    Command::Query { params } => {
      let params: Vec<(&str, String)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
      let url = client.dataset_url().to_string();
      let value = client
        .cached_get_json(&url, &params, None, &FetchContext::default())
        .await?;
      write_json(None, &value)?;
    }
  }

  debug!(stats = ?client.cache().stats(), "cache");
  Ok(())
}

fn log_summary(retrieval: &Retrieval) {
  let mut by_district: BTreeMap<&str, usize> = BTreeMap::new();
  for record in &retrieval.records {
    *by_district.entry(record.district().unwrap_or("unknown")).or_default() += 1;
  }
  for (district, records) in by_district {
    debug!(district, records, "district totals");
  }

  for flag in Flag::ALL {
    let flagged = retrieval.records.iter().filter(|r| r.flag(flag)).count();
    debug!(flag = flag.column(), flagged, "flag totals");
  }
}

fn write_json(path: Option<&Path>, value: &impl Serialize) -> Result<()> {
  match path {
    Some(path) => {
      let file = std::fs::File::create(path)
        .map_err(|e| eyre!("Failed to create {}: {}", path.display(), e))?;
      let mut writer = BufWriter::new(file);
      serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      writer.flush()?;
      info!(path = %path.display(), "wrote output");
    }
    None => {
      let mut stdout = std::io::stdout().lock();
      serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(|e| eyre!("Failed to write output: {}", e))?;
      writeln!(stdout)?;
    }
  }
  Ok(())
}
