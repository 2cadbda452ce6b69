use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hl_orchestrator::{promote_best, CancellationToken, Orchestrator, SearchConfig};
use hl_search::{SearchSpace, StrategyConfig};
use hl_tracking::{FileRecorder, LocalArtifactStore, LocalModelRegistry, ModelRegistry};
use hl_trainer::{load_csv, split_dataset, CsvOptions, MlpModel, MlpTrainer, SplitRatios};
use hl_types::DatasetSplits;

#[derive(Parser, Debug)]
#[command(name = "hyperloom")]
#[command(about = "Hyperparameter search with run tracking and model promotion", long_about = None)]
struct Cli {
    /// Delimited data file with a header row
    #[arg(long)]
    data: PathBuf,

    /// Target column
    #[arg(long, default_value = "quality")]
    target: String,

    /// Field delimiter
    #[arg(long, default_value = ";")]
    delimiter: char,

    /// Number of trials [default: 20]
    #[arg(long)]
    budget: Option<usize>,

    /// Search space as inline JSON or a path to a JSON file
    #[arg(long)]
    space: Option<String>,

    /// Proposal strategy (random, grid, tpe) [default: tpe]
    #[arg(long)]
    strategy: Option<StrategyConfig>,

    /// Seed for proposals, data splitting and weight initialisation [default: 42]
    #[arg(long)]
    seed: Option<u64>,

    /// Trials run in parallel [default: 1]
    #[arg(long)]
    concurrency: Option<usize>,

    /// Where runs, artifacts and registered models are stored
    #[arg(long, env = "HYPERLOOM_TRACKING_DIR")]
    tracking_dir: Option<PathBuf>,

    /// Registry name for the promoted model [default: hyperloom-model]
    #[arg(long)]
    model_name: Option<String>,

    /// Full search configuration as JSON; other flags override it
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Everything resolved before the search starts. Failures up to here are
/// invalid input.
struct Prepared {
    config: SearchConfig,
    splits: DatasetSplits,
    recorder: Arc<FileRecorder>,
    artifacts: Arc<LocalArtifactStore>,
    registry: LocalModelRegistry,
}

fn default_tracking_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hyperloom")
}

fn parse_space(value: &str) -> anyhow::Result<SearchSpace> {
    let text = if value.trim_start().starts_with('{') {
        value.to_string()
    } else {
        std::fs::read_to_string(value).with_context(|| format!("failed to read {value}"))?
    };
    serde_json::from_str(&text).context("invalid search space")
}

fn resolve_config(cli: &Cli) -> anyhow::Result<SearchConfig> {
    let mut config = match &cli.config {
        Some(path) => SearchConfig::from_json_file(path)?,
        None => SearchConfig::default(),
    };
    if let Some(space) = &cli.space {
        config.search_space = parse_space(space)?;
    }
    if let Some(budget) = cli.budget {
        config = config.with_budget(budget);
    }
    if let Some(strategy) = &cli.strategy {
        config = config.with_strategy(strategy.clone());
    }
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    if let Some(concurrency) = cli.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(name) = &cli.model_name {
        config = config.with_model_name(name.clone());
    }

    if config.budget == 0 {
        bail!("--budget must be a positive integer");
    }
    if config.concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }
    for initial in &config.initial_configurations {
        config.search_space.validate(initial)?;
    }
    Ok(config)
}

fn prepare(cli: &Cli) -> anyhow::Result<Prepared> {
    let config = resolve_config(cli)?;

    if !cli.delimiter.is_ascii() {
        bail!("--delimiter must be a single ASCII character");
    }
    let options = CsvOptions::new(cli.target.clone()).with_delimiter(cli.delimiter as u8);
    let dataset = load_csv(&cli.data, &options)
        .with_context(|| format!("failed to load {}", cli.data.display()))?;
    let splits = split_dataset(&dataset, SplitRatios::default(), config.seed)?;
    info!(
        "Split {} rows into {} training, {} validation, {} holdout",
        dataset.len(),
        splits.training.len(),
        splits.validation.len(),
        splits.holdout.len()
    );

    let tracking_dir = cli.tracking_dir.clone().unwrap_or_else(default_tracking_dir);
    let recorder = Arc::new(FileRecorder::open(&tracking_dir)?);
    let artifacts = Arc::new(LocalArtifactStore::new(tracking_dir.join("artifacts"))?);
    let registry = LocalModelRegistry::new(tracking_dir.join("models"), artifacts.clone())?;
    info!("Tracking runs under {}", tracking_dir.display());

    Ok(Prepared {
        config,
        splits,
        recorder,
        artifacts,
        registry,
    })
}

fn holdout_rmse(uri: &str, splits: &DatasetSplits) -> anyhow::Result<f64> {
    let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let model = MlpModel::from_bytes(&bytes)?;
    Ok(model.rmse(&splits.holdout))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hyperloom=info,hl_orchestrator=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let Prepared {
        config,
        splits,
        recorder,
        artifacts,
        registry,
    } = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Invalid input: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling search after the running trial");
            interrupt.cancel();
        }
    });

    let model_name = config.model_name.clone();
    let trainer = Arc::new(MlpTrainer::new().with_seed(config.seed));
    let splits = Arc::new(splits);
    let search_splits = Arc::clone(&splits);
    let search = tokio::task::spawn_blocking(move || {
        let mut orchestrator = Orchestrator::new(config, recorder, artifacts, trainer)
            .with_cancellation(token);
        orchestrator.run(&search_splits.training, &search_splits.validation)
    });

    let report = match search.await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!("Search aborted: {}", e);
            return ExitCode::from(1);
        }
        Err(e) => {
            error!("Search task failed: {}", e);
            return ExitCode::from(1);
        }
    };

    println!("{}", report.summary());
    if !report.has_usable_model() {
        warn!(
            "No usable model: {} of {} trials failed; skipping registration",
            report.failed, report.budget
        );
        return ExitCode::SUCCESS;
    }

    let handle = match promote_best(&report, &registry, &model_name) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Promotion failed: {}", e);
            return ExitCode::from(1);
        }
    };
    println!(
        "Registered {} version {} at {}",
        handle.name, handle.version, handle.uri
    );

    match registry
        .latest(&handle.name)
        .map_err(anyhow::Error::from)
        .and_then(|model| holdout_rmse(&model.handle.uri, &splits))
    {
        Ok(rmse) => println!("Holdout RMSE: {rmse:.4}"),
        Err(e) => warn!("Could not evaluate the promoted model: {:#}", e),
    }
    ExitCode::SUCCESS
}
