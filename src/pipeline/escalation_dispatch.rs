// src/pipeline/escalation_dispatch.rs
//
// Runs the fallback classifier off the frame loop. A call is spawned onto
// the runtime and its reconciled label comes back over a oneshot that the
// loop polls without blocking on later frames.

use super::runtime::SharedRuntime;
use crate::recognition::reconcile_label;
use crate::vision_client::{FallbackClassifier, FrameImage};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum EscalationPoll {
    /// Nothing outstanding
    Idle,
    Pending,
    /// The call finished; `None` covers no-match and failures
    Finished(Option<String>),
}

pub struct EscalationDispatcher {
    client: Option<Arc<dyn FallbackClassifier>>,
    runtime: SharedRuntime,
    /// Async runtime the calls are spawned on; captured at construction when available
    handle: Option<Handle>,
    pending: Option<(oneshot::Receiver<Option<String>>, JoinHandle<()>)>,
}

impl EscalationDispatcher {
    pub fn new(client: Option<Arc<dyn FallbackClassifier>>, runtime: SharedRuntime) -> Self {
        Self {
            client,
            runtime,
            handle: Handle::try_current().ok(),
            pending: None,
        }
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a call. Returns false when no client is configured, a call
    /// is already outstanding, or no async runtime is reachable.
    pub fn dispatch(&mut self, image: FrameImage, labels: Vec<String>) -> bool {
        let Some(client) = self.client.clone() else {
            return false;
        };
        if self.pending.is_some() {
            return false;
        }
        let Some(handle) = self.handle.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("No async runtime available, escalation skipped");
            return false;
        };

        info!("🔍 Escalating frame to vision model ({})", labels.join(", "));
        self.runtime.inc(&self.runtime.escalations);

        let runtime = self.runtime.clone();
        let (tx, rx) = oneshot::channel();
        let task = handle.spawn(async move {
            let label = match client.classify(&image, &labels).await {
                Ok(answer) => {
                    let label = reconcile_label(&answer, &labels);
                    debug!("Vision model answered {:?} → {:?}", answer.trim(), label);
                    label
                }
                Err(e) => {
                    warn!("Vision fallback failed: {:#}", e);
                    runtime.inc(&runtime.escalation_failures);
                    None
                }
            };
            // Receiver gone means the result is no longer wanted
            let _ = tx.send(label);
        });

        self.pending = Some((rx, task));
        true
    }

    pub fn poll(&mut self) -> EscalationPoll {
        let Some((rx, _)) = self.pending.as_mut() else {
            return EscalationPoll::Idle;
        };
        match rx.try_recv() {
            Ok(label) => {
                self.pending = None;
                EscalationPoll::Finished(label)
            }
            Err(TryRecvError::Empty) => EscalationPoll::Pending,
            Err(TryRecvError::Closed) => {
                self.pending = None;
                EscalationPoll::Finished(None)
            }
        }
    }

    /// Drop any outstanding call (context switch).
    pub fn cancel(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
            debug!("Pending escalation cancelled");
        }
    }
}

impl Drop for EscalationDispatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl FallbackClassifier for Fixed {
        async fn classify(&self, _image: &FrameImage, _labels: &[String]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl FallbackClassifier for Failing {
        async fn classify(&self, _image: &FrameImage, _labels: &[String]) -> Result<String> {
            bail!("connection refused")
        }
    }

    fn image() -> FrameImage {
        FrameImage::Jpeg(vec![0xFF, 0xD8])
    }

    fn labels() -> Vec<String> {
        vec!["Jump".to_string(), "Duck".to_string()]
    }

    async fn wait(d: &mut EscalationDispatcher) -> Option<String> {
        loop {
            match d.poll() {
                EscalationPoll::Finished(label) => return label,
                EscalationPoll::Pending => tokio::task::yield_now().await,
                EscalationPoll::Idle => panic!("nothing pending"),
            }
        }
    }

    #[tokio::test]
    async fn test_result_is_reconciled() {
        let runtime = SharedRuntime::default();
        let mut d = EscalationDispatcher::new(Some(Arc::new(Fixed(" duck "))), runtime.clone());

        assert!(d.dispatch(image(), labels()));
        // Only one outstanding call
        assert!(!d.dispatch(image(), labels()));
        assert_eq!(wait(&mut d).await.as_deref(), Some("Duck"));
        assert_eq!(d.poll(), EscalationPoll::Idle);
        assert_eq!(runtime.summary().escalations, 1);
    }

    #[tokio::test]
    async fn test_failure_becomes_no_label() {
        let runtime = SharedRuntime::default();
        let mut d = EscalationDispatcher::new(Some(Arc::new(Failing)), runtime.clone());

        assert!(d.dispatch(image(), labels()));
        assert_eq!(wait(&mut d).await, None);
        assert_eq!(runtime.summary().escalation_failures, 1);
    }

    #[tokio::test]
    async fn test_sentinel_becomes_no_label() {
        let mut d =
            EscalationDispatcher::new(Some(Arc::new(Fixed("NONE"))), SharedRuntime::default());
        assert!(d.dispatch(image(), labels()));
        assert_eq!(wait(&mut d).await, None);
    }

    #[tokio::test]
    async fn test_without_client_nothing_dispatches() {
        let mut d = EscalationDispatcher::new(None, SharedRuntime::default());
        assert!(!d.has_client());
        assert!(!d.dispatch(image(), labels()));
        assert_eq!(d.poll(), EscalationPoll::Idle);
    }

    #[test]
    fn test_dispatch_outside_runtime_declines() {
        let runtime = SharedRuntime::default();
        let mut d = EscalationDispatcher::new(Some(Arc::new(Fixed("Jump"))), runtime.clone());
        assert!(!d.dispatch(image(), labels()));
        assert!(!d.is_pending());
        assert_eq!(runtime.summary().escalations, 0);
    }

    #[tokio::test]
    async fn test_cancel_clears_pending() {
        let mut d =
            EscalationDispatcher::new(Some(Arc::new(Fixed("Jump"))), SharedRuntime::default());
        assert!(d.dispatch(image(), labels()));
        d.cancel();
        assert!(!d.is_pending());
        assert_eq!(d.poll(), EscalationPoll::Idle);
    }
}
