use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use edgecache::logging::{self, LogTarget};
use edgecache::{
  replay, Config, DisconnectedRemote, EdgeCacheEngine, FixtureRuntime, HttpRemote, InputRecord,
  ModelKind, NewOperation, OperationSource, RemoteSink, SqliteQueueStore,
};

#[derive(Parser, Debug)]
#[command(name = "edgecache")]
#[command(about = "Edge inference cache and offline operation sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/edgecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log directory
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run (or serve from cache) one inference
  Infer {
    /// Model kind, e.g. mood_prediction
    kind: String,
    /// Input record as a JSON object
    #[arg(short, long, default_value = "{}")]
    input: String,
    #[arg(short, long)]
    owner: String,
  },
  /// Record an offline operation in the persisted queue
  Enqueue {
    /// Operation type, e.g. task_completion
    op_type: String,
    /// Payload as a JSON object
    #[arg(short, long, default_value = "{}")]
    payload: String,
    #[arg(short, long)]
    entity: Option<String>,
    /// manual_input, ai_inference or system
    #[arg(short, long)]
    source: Option<String>,
  },
  /// List queued operations
  Queue,
  /// Push queued operations to the configured remote
  Sync,
  /// Run a JSONL script of steps against one engine
  Replay { script: PathBuf },
  /// Cache statistics and engine health
  Stats,
}

impl Command {
  /// One-shot commands that touch the queue need it on disk to see anything.
  fn needs_store(&self) -> bool {
    matches!(self, Command::Enqueue { .. } | Command::Queue | Command::Sync)
  }
}

fn parse_object(raw: &str, what: &str) -> Result<InputRecord> {
  match serde_json::from_str::<Value>(raw).map_err(|e| eyre!("Invalid {} JSON: {}", what, e))? {
    Value::Object(map) => Ok(map),
    other => Err(eyre!("{} must be a JSON object, got {}", what, other)),
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", out);
  Ok(())
}

fn build_engine(config: &Config, persist: bool) -> Result<EdgeCacheEngine> {
  let fixtures: HashMap<_, _> = config
    .runtime
    .fixtures
    .iter()
    .map(|(kind, value)| (*kind, value.clone()))
    .collect();
  let runtime = Arc::new(FixtureRuntime::new(fixtures));

  let remote: Arc<dyn RemoteSink> = match &config.sync.remote_url {
    Some(url) => Arc::new(HttpRemote::new(url, config.submit_timeout())?),
    None => Arc::new(DisconnectedRemote),
  };

  let engine = EdgeCacheEngine::new(config, runtime, remote)?;
  if persist {
    let store = SqliteQueueStore::open(config.queue.db_path.as_deref())?;
    engine.with_store(Arc::new(store))
  } else {
    Ok(engine)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let target = if args.log_stderr {
    LogTarget::Stderr
  } else {
    LogTarget::default_directory()?
  };
  let _log_guard = logging::init(target)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let engine = build_engine(&config, config.queue.persist || args.command.needs_store())?;

  match args.command {
    Command::Infer { kind, input, owner } => {
      let input = parse_object(&input, "input")?;
      let kind: ModelKind = kind.parse()?;
      print_json(&engine.get_or_infer_detailed(kind, &input, &owner).await)?;
    }
    Command::Enqueue {
      op_type,
      payload,
      entity,
      source,
    } => {
      let source = source
        .map(|s| s.parse::<OperationSource>())
        .transpose()?;
      let operation = NewOperation {
        op_type,
        entity_id: entity,
        payload: parse_object(&payload, "payload")?,
        source,
      };
      let id = engine.enqueue_offline_operation(operation);
      print_json(&serde_json::json!({ "id": id, "queue_size": engine.queue_size() }))?;
    }
    Command::Queue => print_json(&engine.pending_operations())?,
    Command::Sync => print_json(&engine.sync().await)?,
    Command::Replay { script } => {
      let file = std::fs::File::open(&script)
        .map_err(|e| eyre!("Failed to open script {}: {}", script.display(), e))?;
      for result in replay::run_script(&engine, BufReader::new(file)).await? {
        println!("{}", result);
      }
    }
    Command::Stats => {
      print_json(&serde_json::json!({
        "cache": engine.cache_stats(),
        "health": engine.health(),
      }))?;
    }
  }

  Ok(())
}
