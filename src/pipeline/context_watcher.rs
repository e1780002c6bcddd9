// src/pipeline/context_watcher.rs
//
// Background poller for the active context (the foreground application).
// On change it warms the centroid index for the new context, then
// publishes the name on a watch channel. The frame loop builds the new
// Recognizer between two frames.

use super::runtime::SharedRuntime;
use crate::profiles::ProfileStore;
use crate::recognition::CentroidIndex;
use crate::types::ContextConfig;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Source of the current context name.
pub trait ContextProvider: Send + Sync {
    /// `None` means "unknown right now"; the previous context stays active.
    fn current(&self) -> Option<String>;
}

/// Always the same context.
pub struct FixedContext(pub String);

impl ContextProvider for FixedContext {
    fn current(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the context name from a file maintained by an external
/// foreground-window watcher. First non-empty line wins.
pub struct FileContextProvider {
    path: PathBuf,
}

impl FileContextProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContextProvider for FileContextProvider {
    fn current(&self) -> Option<String> {
        let text = fs::read_to_string(&self.path).ok()?;
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}

/// Provider described by the config: a pinned context beats the context file.
pub fn provider_from_config(config: &ContextConfig) -> Option<Box<dyn ContextProvider>> {
    if let Some(ctx) = &config.fixed_context {
        return Some(Box::new(FixedContext(ctx.clone())));
    }
    config
        .context_file
        .as_ref()
        .map(|p| Box::new(FileContextProvider::new(p)) as Box<dyn ContextProvider>)
}

pub struct ContextWatcher {
    provider: Box<dyn ContextProvider>,
    index: Arc<CentroidIndex>,
    profiles: Option<Arc<ProfileStore>>,
    runtime: SharedRuntime,
    interval: Duration,
    current: Option<String>,
}

impl ContextWatcher {
    pub fn new(
        provider: Box<dyn ContextProvider>,
        index: Arc<CentroidIndex>,
        runtime: SharedRuntime,
        interval: Duration,
    ) -> Self {
        Self {
            provider,
            index,
            profiles: None,
            runtime,
            interval,
            current: None,
        }
    }

    pub fn with_profiles(mut self, profiles: Arc<ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Check the provider once. Returns true when a new context was published.
    pub fn poll_once(&mut self, tx: &watch::Sender<Option<String>>) -> bool {
        let Some(next) = self.provider.current() else {
            return false;
        };
        if self.current.as_deref() == Some(next.as_str()) {
            return false;
        }

        // Build the centroid snapshot before anyone switches to it
        let snapshot = self.index.centroids_for(&next);

        let profile_name = self
            .profiles
            .as_ref()
            .and_then(|p| p.get_profile(&next))
            .and_then(|p| p.display_name.clone());
        info!(
            "Active context: {} | profile: {} | {} labels",
            next,
            profile_name.as_deref().unwrap_or("None"),
            snapshot.len()
        );

        self.runtime.set_active_context(Some(next.clone()));
        self.current = Some(next.clone());
        tx.send_replace(Some(next));
        true
    }

    /// Poll on a fixed interval until every receiver is gone.
    pub fn spawn(mut self, tx: watch::Sender<Option<String>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    debug!("Context watcher stopping: no receivers");
                    break;
                }
                self.poll_once(&tx);
            }
        })
    }
}
