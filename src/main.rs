use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use cronkeeper::{AgentConfig, CronAgent};

#[derive(Parser, Debug)]
#[command(name = "cronkeeper", version, about = "Fleet-distributed cron agent")]
struct Args {
  /// Path to the YAML configuration file
  #[arg(short, long, default_value = "example.yml")]
  config: PathBuf,
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, ansi) = match log_file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
      (BoxMakeWriter::new(std::io::stdout.and(Mutex::new(file))), false)
    }
    None => (BoxMakeWriter::new(std::io::stdout), true),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(ansi)
    .init();
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args = Args::parse();

  let config = AgentConfig::load(&args.config)?;
  init_logging(config.log.filename.as_deref())?;
  info!(config = %args.config.display(), "Configuration loaded");

  let agent = CronAgent::builder().node(config.client.clone()).build();

  let listener = TcpListener::bind(&config.client.uri)
    .await
    .with_context(|| format!("cannot listen on {}", config.client.uri))?;

  // Lives as long as the process; the loop absorbs every failure itself.
  let _heartbeat = agent.spawn_heartbeat(&config.server);

  if let Err(e) = agent.serve(listener).await {
    warn!(error = %e, "Management RPC service stopped");
    return Err(e.into());
  }
  Ok(())
}
