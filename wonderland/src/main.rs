//! Wonderland client.
//!
//! Reads commands on stdin and writes the world's narrative on stdout, so
//! people and autonomous explorers can drive it the same way:
//!
//! ```bash
//! cargo run -p wonderland -- --name "Alice" --data-dir ./wonderland-data
//! ```
//!
//! Logs go to stderr and follow `RUST_LOG` when it is set.

mod headless;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use voice::Voice;
use wonderland_core::{
    ArchetypeRegistry, FileStorage, Realm, Silent, TextGenerator, Topology, WorldConfig,
};

#[derive(Parser)]
#[command(name = "wonderland")]
#[command(about = "A persistent text world with vows built into its physics")]
struct Cli {
    /// Display name to enter the world under
    #[arg(short, long, default_value = "Alice")]
    name: String,

    /// Directory holding the witness log and snapshots
    #[arg(short, long, env = "WONDERLAND_DATA_DIR", default_value = "wonderland-data")]
    data_dir: PathBuf,

    /// Room graph as JSON (defaults to the built-in Wonderland)
    #[arg(short, long)]
    world: Option<PathBuf>,

    /// World configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NPC archetypes as JSON (defaults to the built-in hosts)
    #[arg(long)]
    archetypes: Option<PathBuf>,

    /// Model used for NPC speech
    #[arg(long, env = "WONDERLAND_MODEL")]
    model: Option<String>,

    /// Log level for this client
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "wonderland={level},wonderland_core={level},info",
                    level = cli.log_level
                ))
            }),
        )
        .init();

    let config = match &cli.config {
        Some(path) => WorldConfig::load_json(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorldConfig::default(),
    };

    let mut builder = Realm::builder().with_config(config.clone());
    if let Some(path) = &cli.world {
        let topology = Topology::load_json(path)
            .await
            .with_context(|| format!("loading world from {}", path.display()))?;
        builder = builder.with_topology(topology);
    }
    if let Some(path) = &cli.archetypes {
        let archetypes = ArchetypeRegistry::load_json(path, config.npc.pointer_budget)
            .await
            .with_context(|| format!("loading archetypes from {}", path.display()))?;
        builder = builder.with_archetypes(archetypes);
    }

    let storage = FileStorage::open(&cli.data_dir)
        .await
        .with_context(|| format!("opening {}", cli.data_dir.display()))?;
    let realm = builder
        .with_storage(Arc::new(storage))
        .with_generator(generator(cli.model.as_deref()))
        .open()
        .await
        .context("opening the realm")?;
    info!(instance = %realm.instance(), data_dir = %cli.data_dir.display(), "Realm ready");

    headless::run(Arc::new(realm), &cli.name).await
}

/// The configured voice, or silence when no key is available.
fn generator(model: Option<&str>) -> Arc<dyn TextGenerator> {
    match Voice::from_env() {
        Ok(voice) => {
            let voice = match model {
                Some(model) => voice.with_model(model),
                None => voice,
            };
            info!(model = voice.model(), "NPC voice enabled");
            Arc::new(voice)
        }
        Err(err) => {
            warn!(error = %err, "No NPC voice, hosts will use their fallback lines");
            Arc::new(Silent)
        }
    }
}
