use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use electra_client::ElectraClient;
use electra_manifest::{AssetLocator, DispatchAssetKey, LatticeManifest, ResultManifest};
use electra_server::{DEFAULT_BIND, ServerConfig};

/// Electra - a workflow dispatch engine
#[derive(Parser)]
#[command(name = "electra")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.electra)
  #[arg(long, global = true, env = "ELECTRA_DATA_DIR")]
  data_dir: Option<PathBuf>,

  /// Base URL of the electra server
  #[arg(
    long,
    global = true,
    env = "ELECTRA_SERVER",
    default_value = "http://127.0.0.1:48008"
  )]
  server: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the dispatch server
  Serve {
    /// Address to listen on
    #[arg(long, env = "ELECTRA_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Externally reachable base URL written into asset remote URIs
    #[arg(long, env = "ELECTRA_PUBLIC_URL")]
    public_url: Option<String>,

    /// Directory the server may import file:// assets from
    #[arg(long, env = "ELECTRA_IMPORT_ROOT")]
    import_root: Option<PathBuf>,

    /// Database URL (default: sqlite file in the data directory)
    #[arg(long)]
    database_url: Option<String>,
  },

  /// Register a serialized dispatch manifest, upload its assets and start it
  Submit {
    /// Path to the manifest JSON; asset URIs must be local file:// paths
    manifest_file: PathBuf,

    /// Register and upload only
    #[arg(long)]
    no_start: bool,
  },

  /// Start a registered dispatch
  Start { dispatch_id: String },

  /// Print dispatch and node statuses
  Status { dispatch_id: String },

  /// Wait until a dispatch reaches a terminal status
  Wait {
    dispatch_id: String,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
  },

  /// Cancel a dispatch
  Cancel { dispatch_id: String },

  /// Register a new dispatch from an existing one
  Redispatch {
    dispatch_id: String,

    /// Replacement lattice JSON, as serialized locally with file:// assets
    #[arg(long)]
    lattice: Option<PathBuf>,

    /// Replace a task's callable: NAME=PATH
    #[arg(long = "update", value_parser = parse_update)]
    updates: Vec<(String, PathBuf)>,

    /// Run every task again instead of reusing completed results
    #[arg(long)]
    no_reuse: bool,

    /// Start the new dispatch right away
    #[arg(long)]
    start: bool,
  },

  /// Download a dispatch result
  Result {
    dispatch_id: String,

    /// Write to this file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
  let Some(command) = cli.command else {
    println!("electra - use --help to see available commands");
    return Ok(());
  };

  if let Commands::Serve {
    bind,
    public_url,
    import_root,
    database_url,
  } = command
  {
    let data_dir = match cli.data_dir {
      Some(dir) => dir,
      None => dirs::home_dir()
        .context("could not determine home directory")?
        .join(".electra"),
    };
    let mut config = ServerConfig::new(data_dir, bind);
    config.public_url = public_url;
    config.import_root = import_root;
    config.database_url = database_url;
    return serve(config).await;
  }

  let client = ElectraClient::new(&cli.server).context("failed to create HTTP client")?;
  match command {
    Commands::Serve { .. } => Ok(()),
    Commands::Submit {
      manifest_file,
      no_start,
    } => submit(&client, manifest_file, no_start).await,
    Commands::Start { dispatch_id } => {
      client.start(&dispatch_id).await?;
      println!("{dispatch_id}");
      Ok(())
    }
    Commands::Status { dispatch_id } => {
      let view = client.status(&dispatch_id).await?;
      println!("{}", serde_json::to_string_pretty(&view)?);
      Ok(())
    }
    Commands::Wait {
      dispatch_id,
      timeout,
    } => {
      let cancel = cancel_on_ctrl_c();
      let status = client
        .wait_for_completion(&dispatch_id, timeout.map(Duration::from_secs), cancel)
        .await?;
      println!("{status}");
      Ok(())
    }
    Commands::Cancel { dispatch_id } => {
      client.cancel(&dispatch_id).await?;
      println!("{dispatch_id}");
      Ok(())
    }
    Commands::Redispatch {
      dispatch_id,
      lattice,
      updates,
      no_reuse,
      start,
    } => redispatch(&client, dispatch_id, lattice, updates, !no_reuse, start).await,
    Commands::Result {
      dispatch_id,
      output,
    } => result(&client, dispatch_id, output).await,
  }
}

async fn serve(config: ServerConfig) -> Result<()> {
  let shutdown = cancel_on_ctrl_c();
  electra_server::serve(config, shutdown)
    .await
    .context("server failed")
}

async fn submit(client: &ElectraClient, manifest_file: PathBuf, no_start: bool) -> Result<()> {
  let content = tokio::fs::read_to_string(&manifest_file)
    .await
    .with_context(|| format!("failed to read manifest file: {}", manifest_file.display()))?;
  let mut manifest: ResultManifest = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse manifest file: {}", manifest_file.display()))?;

  let dispatch_id = client
    .register_manifest(&mut manifest)
    .await
    .context("failed to register dispatch")?;
  if !no_start {
    client.start(&dispatch_id).await.context("failed to start dispatch")?;
  }
  println!("{dispatch_id}");
  Ok(())
}

async fn redispatch(
  client: &ElectraClient,
  dispatch_id: String,
  lattice: Option<PathBuf>,
  updates: Vec<(String, PathBuf)>,
  reuse: bool,
  start: bool,
) -> Result<()> {
  let lattice = match lattice {
    Some(path) => {
      let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read lattice file: {}", path.display()))?;
      let lattice: LatticeManifest = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lattice file: {}", path.display()))?;
      Some(lattice)
    }
    None => None,
  };

  let mut electron_updates = BTreeMap::new();
  for (name, path) in updates {
    let callable = tokio::fs::read(&path)
      .await
      .with_context(|| format!("failed to read callable: {}", path.display()))?;
    electron_updates.insert(name, Bytes::from(callable));
  }

  let new_id = client
    .redispatch(&dispatch_id, lattice, &electron_updates, reuse)
    .await
    .context("redispatch failed")?;
  if start {
    client.start(&new_id).await.context("failed to start dispatch")?;
  }
  println!("{new_id}");
  Ok(())
}

async fn result(client: &ElectraClient, dispatch_id: String, output: Option<PathBuf>) -> Result<()> {
  let locator = AssetLocator::Dispatch(DispatchAssetKey::Result);
  match output {
    Some(path) => {
      let written = client
        .download_asset(&dispatch_id, locator, &path)
        .await
        .context("failed to download result")?;
      eprintln!("Wrote {written} bytes to {}", path.display());
    }
    None => {
      let data = client
        .fetch_asset(&dispatch_id, locator, None)
        .await
        .context("failed to download result")?;
      std::io::stdout().write_all(&data)?;
    }
  }
  Ok(())
}

/// Token cancelled on the first ctrl-c.
fn cancel_on_ctrl_c() -> CancellationToken {
  let token = CancellationToken::new();
  let cancel = token.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      cancel.cancel();
    }
  });
  token
}

fn parse_update(value: &str) -> Result<(String, PathBuf), String> {
  let (name, path) = value
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=PATH, got '{value}'"))?;
  if name.is_empty() {
    return Err("task name is empty".to_string());
  }
  Ok((name.to_string(), PathBuf::from(path)))
}
