mod logging;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

use zombie_squirrel::{
  hide_acorns, CachedMetadataClient, Config, SyncOptions, SyncOutcome, View,
};

const EXIT_PARTIAL: u8 = 1;
const EXIT_SETUP: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "zombie-squirrel")]
#[command(about = "Cache metadata views in S3 and keep them fresh")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/zombie-squirrel/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG is set
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh cached views from the metadata database
  Sync {
    /// View to sync; repeat for several (default: all)
    #[arg(long = "view", value_name = "VIEW")]
    views: Vec<View>,

    /// Queries in flight at once (default: sync.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Keep existing entries instead of overwriting them
    #[arg(long)]
    no_force: bool,
  },

  /// Print a view as tab-separated values
  Get {
    view: View,

    /// Identifiers to filter by (subject ids for qc)
    ids: Vec<String>,

    /// Fetch from the metadata database even when cached
    #[arg(long)]
    refresh: bool,
  },

  /// Print the column names of a view
  Columns { view: View },

  /// List cached keys, for one view or all of them
  List { view: Option<View> },
}

#[tokio::main]
async fn main() -> ExitCode {
  if let Err(report) = color_eyre::install() {
    eprintln!("{:?}", report);
  }

  let args = Args::parse();

  let config = match Config::load(args.config.as_deref()).wrap_err("Failed to load configuration") {
    Ok(config) => config,
    Err(report) => {
      eprintln!("{:?}", report);
      return ExitCode::from(EXIT_SETUP);
    }
  };

  let _guard = logging::init(&config.log, args.verbose);

  let client = match CachedMetadataClient::from_config(&config).wrap_err("Failed to set up the cache") {
    Ok(client) => client,
    Err(report) => {
      eprintln!("{:?}", report);
      return ExitCode::from(EXIT_SETUP);
    }
  };

  // Entries written before an interrupt stay valid
  tokio::select! {
    code = run(args.command, &client, &config) => code,
    _ = tokio::signal::ctrl_c() => {
      warn!("Interrupted");
      ExitCode::from(EXIT_INTERRUPTED)
    }
  }
}

async fn run(command: Command, client: &CachedMetadataClient, config: &Config) -> ExitCode {
  let result = match command {
    Command::Sync {
      views,
      concurrency,
      no_force,
    } => {
      let options = SyncOptions {
        views: if views.is_empty() {
          View::ALL.to_vec()
        } else {
          views
        },
        force_refresh: !no_force,
        concurrency: concurrency.unwrap_or(config.sync.concurrency),
      };
      return sync(client, &options).await;
    }
    Command::Get { view, ids, refresh } => get(client, view, &ids, refresh).await,
    Command::Columns { view } => columns(client, view).await,
    Command::List { view } => list(client, view).await,
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(report) => {
      eprintln!("{:?}", report);
      ExitCode::from(EXIT_PARTIAL)
    }
  }
}

async fn sync(client: &CachedMetadataClient, options: &SyncOptions) -> ExitCode {
  let report = hide_acorns(client.layer(), options).await;

  for failure in &report.failures {
    eprintln!("failed: {} {}: {}", failure.view, failure.params, failure.error);
  }
  println!("{} succeeded, {} failed", report.succeeded, report.failed);

  match report.outcome() {
    SyncOutcome::AllSucceeded => ExitCode::SUCCESS,
    SyncOutcome::PartialFailure => ExitCode::from(EXIT_PARTIAL),
  }
}

async fn get(client: &CachedMetadataClient, view: View, ids: &[String], refresh: bool) -> Result<()> {
  let table = client
    .get(view, ids, refresh)
    .await
    .wrap_err_with(|| format!("Failed to get {}", view))?;
  print!("{}", table.to_tsv());
  Ok(())
}

async fn columns(client: &CachedMetadataClient, view: View) -> Result<()> {
  for column in client.columns(view).await? {
    println!("{}", column);
  }
  Ok(())
}

async fn list(client: &CachedMetadataClient, view: Option<View>) -> Result<()> {
  let views = match view {
    Some(view) => vec![view],
    None => View::ALL.to_vec(),
  };

  for view in views {
    let keys = client
      .layer()
      .cached_keys(view)
      .await
      .wrap_err_with(|| format!("Failed to list {}", view))?;
    for key in keys {
      println!("{}", key);
    }
  }
  Ok(())
}
