use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_application::{bus_progress, prepare_models, AppConfig, Readiness, ReadinessProbe};
use tally_events::TracingEventBus;
use tally_models::{ensure_asset_copied, ModelName, ModelStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Manage the on-device receipt scanner models")]
struct Args {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the models directory
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which models are present
    Status,
    /// Download a model ("small", "large") or every missing one ("all")
    Download {
        #[arg(default_value = "all")]
        model: String,
    },
    /// Print the local path of a downloaded model
    Path { model: ModelName },
    /// Copy a bundled model asset into the app files directory
    CopyAsset { name: String },
    /// Delete a downloaded model
    Delete { model: ModelName },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tally=debug")),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(dir) = args.models_dir {
        config.models_dir = Some(dir);
    }
    let store_config = config.store_config();
    let store = Arc::new(ModelStore::new(store_config.clone()));

    match args.command {
        Command::Status => {
            let probe = ReadinessProbe::new(Arc::clone(&store));
            let readiness = probe.check().await;
            for artifact in store.catalog().iter() {
                let mark = if artifact.local_path.exists() { "present" } else { "missing" };
                println!(
                    "{:<6} {:<13} {:<8} {}",
                    artifact.name,
                    artifact.name.display_name(),
                    mark,
                    artifact.local_path.display()
                );
            }
            match readiness {
                Readiness::Ready => println!("ready"),
                Readiness::Missing(missing) => println!("{} model(s) missing", missing.len()),
                Readiness::Checking => println!("checking"),
            }
        }
        Command::Download { model } => {
            let publish_progress = bus_progress(Arc::new(TracingEventBus));
            let progress = |name: ModelName, percent: u8| {
                println!("{name}: {percent}%");
                publish_progress(name, percent);
            };
            if model.eq_ignore_ascii_case("all") {
                let paths = prepare_models(&store, progress).await?;
                if paths.is_empty() {
                    println!("all models already present");
                }
                for path in paths {
                    println!("{}", path.display());
                }
            } else {
                let name: ModelName = model.parse()?;
                let path = store
                    .download(name, |percent| progress(name, percent))
                    .await
                    .with_context(|| format!("downloading {name}"))?;
                println!("{}", path.display());
            }
        }
        Command::Path { model } => {
            let path = store.local_path_or_fail(model)?;
            println!("{}", path.display());
        }
        Command::CopyAsset { name } => {
            let path = ensure_asset_copied(&store_config, &name).await?;
            println!("{}", path.display());
        }
        Command::Delete { model } => {
            store.delete(model).await?;
            tracing::info!(model = %model, "Model deleted");
        }
    }

    Ok(())
}
