// src/main.rs

use anyhow::{bail, Result};
use clap::Parser;
use motion_actions::cli::{Cli, Commands};
use motion_actions::pipeline::{
    provider_from_config, ContextWatcher, EscalationDispatcher, FrameLoop, SharedRuntime,
};
use motion_actions::profiles::{EffectSink, LoggingEffectSink, ProfileStore};
use motion_actions::recognition::CentroidIndex;
use motion_actions::replay::{find_frame_files, FrameReplay};
use motion_actions::store::SampleStore;
use motion_actions::training::TrainingSession;
use motion_actions::types::Config;
use motion_actions::vision_client::{FallbackClassifier, VisionModelClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("motion_actions={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🕺 Motion action recognizer starting");
    info!("✓ Configuration loaded from {}", cli.config.display());

    match cli.command {
        Commands::Run {
            frames,
            context,
            no_detect,
        } => run(config, frames, context, no_detect).await,
        Commands::Train {
            context,
            label,
            samples,
            frames,
        } => train(&config, &context, &label, samples, frames.as_deref()),
        Commands::Contexts => {
            list_contexts(&config);
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Arc<SampleStore> {
    Arc::new(SampleStore::new(
        &config.storage.data_dir,
        config.storage.feature_dim,
    ))
}

fn frame_sources(frames: Option<&Path>) -> Result<Vec<FrameReplay>> {
    match frames {
        Some(path) => find_frame_files(path)?
            .iter()
            .map(|p| FrameReplay::open(p))
            .collect(),
        None => Ok(vec![FrameReplay::stdin()]),
    }
}

async fn run(
    mut config: Config,
    frames: Option<PathBuf>,
    context: Option<String>,
    no_detect: bool,
) -> Result<()> {
    if context.is_some() {
        config.context.fixed_context = context;
    }

    let store = open_store(&config);
    info!(
        "Sample store at {} (feature dim {})",
        store.base().display(),
        store.feature_dim()
    );
    store.log_inventory();
    let index = Arc::new(CentroidIndex::new(store));
    let profiles = Arc::new(ProfileStore::new(&config.storage.profiles_dir));
    let runtime = SharedRuntime::new(config.recognition.detect_enabled && !no_detect);

    info!(
        "Recognition: threshold={:.2}, confirm_frames={}, cooldown={:.1}s",
        config.recognition.offline_threshold,
        config.recognition.confirm_frames,
        config.recognition.cooldown_secs
    );

    let client = VisionModelClient::from_config(&config.escalation, config.escalation_api_key())?
        .map(|c| Arc::new(c) as Arc<dyn FallbackClassifier>);
    let dispatcher = EscalationDispatcher::new(client, runtime.clone());

    let Some(provider) = provider_from_config(&config.context) else {
        bail!("No context source: set context.fixed_context, context.context_file or pass --context");
    };
    let (context_tx, context_rx) = watch::channel(None);
    let mut watcher = ContextWatcher::new(
        provider,
        Arc::clone(&index),
        runtime.clone(),
        Duration::from_millis(config.context.poll_interval_ms),
    )
    .with_profiles(Arc::clone(&profiles));
    watcher.poll_once(&context_tx);
    let watcher_handle = watcher.spawn(context_tx);

    let mut frame_loop = FrameLoop::new(
        index,
        config.recognition.clone(),
        config.escalation.clone(),
        context_rx,
        dispatcher,
        runtime.clone(),
    );
    let mut sink = LoggingEffectSink::new();

    info!("Starting main detection loop...");
    for replay in frame_sources(frames.as_deref())? {
        for frame in replay {
            let outcome = frame_loop.process(frame.input);
            if let Some(event) = outcome.fired {
                let mapping = profiles.mapping_for(&event.context, &event.label);
                sink.execute(&event, mapping.as_ref());
            }
            tokio::task::yield_now().await;
        }
    }

    drop(frame_loop);
    watcher_handle.abort();

    let summary = runtime.summary();
    info!("\n✓ Replay finished");
    info!("  Frames processed: {} ({:.1} fps)", summary.total_frames, summary.fps);
    info!("  Actions fired: {}", summary.fires);
    info!("  Effects executed: {}", sink.executed());
    if summary.escalations > 0 {
        info!(
            "  🔍 Escalations: {} ({} failed)",
            summary.escalations, summary.escalation_failures
        );
    }
    Ok(())
}

fn train(
    config: &Config,
    context: &str,
    label: &str,
    samples: usize,
    frames: Option<&Path>,
) -> Result<()> {
    let store = open_store(config);
    let mut session = TrainingSession::new(context, label, samples, config.training.history_len);

    'sources: for replay in frame_sources(frames)? {
        for frame in replay {
            session.push(
                &store,
                &frame.input.features,
                &frame.image_ref,
                frame.landmarks.as_deref(),
            )?;
            if session.is_complete() {
                break 'sources;
            }
        }
    }

    if !session.is_complete() {
        warn!(
            "Frame stream ended after {}/{} samples",
            session.collected(),
            session.target()
        );
    }
    Ok(())
}

fn list_contexts(config: &Config) {
    let store = open_store(config);
    for context in store.contexts() {
        let labels: Vec<String> = store.labels_for_context(&context).into_iter().collect();
        info!("{}: {}", context, labels.join(", "));
    }
    let profiles = ProfileStore::new(&config.storage.profiles_dir);
    info!(
        "Profiles in {}: {}",
        profiles.base().display(),
        profiles.list_profiles().join(", ")
    );
}
