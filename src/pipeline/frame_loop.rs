// src/pipeline/frame_loop.rs
//
// Per-frame composition:
//
//   context change? → new Recognizer
//   features → centroid snapshot → best match
//            → offline label (score ≥ threshold)
//            → finished escalation result overrides the label
//            → near-miss? dispatch escalation (result lands on a later frame)
//            → stability gate → FireEvent
//
// Nothing in here awaits; the only slow operation runs on a spawned task.

use super::escalation_dispatch::{EscalationDispatcher, EscalationPoll};
use super::runtime::SharedRuntime;
use crate::recognition::{CentroidIndex, EscalationDecision, EscalationInput, Recognizer};
use crate::types::{
    ClassificationOutcome, EscalationConfig, FeatureVector, FireEvent, RecognitionConfig,
};
use crate::vision_client::FrameImage;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// One frame as seen by the loop.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Seconds on a monotonic clock
    pub timestamp: f64,
    pub features: FeatureVector,
    pub motion_energy: Option<f32>,
    /// Needed only when the frame gets escalated
    pub image: Option<FrameImage>,
}

#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub context: Option<String>,
    pub classification: ClassificationOutcome,
    /// Label fed to the gate this frame
    pub label: Option<String>,
    pub escalated: bool,
    pub fired: Option<FireEvent>,
}

pub struct FrameLoop {
    index: Arc<CentroidIndex>,
    recognition: RecognitionConfig,
    escalation: EscalationConfig,
    context_rx: watch::Receiver<Option<String>>,
    recognizer: Option<Recognizer>,
    dispatcher: EscalationDispatcher,
    runtime: SharedRuntime,
    /// Last label supplied by the vision fallback, carried while it still applies
    rescued: Option<String>,
}

impl FrameLoop {
    pub fn new(
        index: Arc<CentroidIndex>,
        recognition: RecognitionConfig,
        escalation: EscalationConfig,
        context_rx: watch::Receiver<Option<String>>,
        dispatcher: EscalationDispatcher,
        runtime: SharedRuntime,
    ) -> Self {
        Self {
            index,
            recognition,
            escalation,
            context_rx,
            recognizer: None,
            dispatcher,
            runtime,
            rescued: None,
        }
    }

    pub fn recognizer(&self) -> Option<&Recognizer> {
        self.recognizer.as_ref()
    }

    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    pub fn process(&mut self, frame: FrameInput) -> FrameOutcome {
        self.sync_context();
        let now = frame.timestamp;

        let Some(recognizer) = self.recognizer.as_mut() else {
            self.runtime
                .record_frame(0, &ClassificationOutcome::none(), 0.0);
            return FrameOutcome {
                context: None,
                classification: ClassificationOutcome::none(),
                label: None,
                escalated: false,
                fired: None,
            };
        };

        let snapshot = recognizer.snapshot();
        let classification = snapshot.best_match(&frame.features);

        let mut label = classification
            .best_label
            .clone()
            .filter(|_| classification.best_score >= recognizer.offline_threshold());

        match self.dispatcher.poll() {
            EscalationPoll::Finished(result) => {
                recognizer.escalation_mut().complete();
                if let Some(rescued) = &result {
                    info!("Vision fallback labelled frame as {}", rescued);
                    label = Some(rescued.clone());
                }
                self.rescued = result;
            }
            EscalationPoll::Idle | EscalationPoll::Pending => {
                // A rescue holds while the offline match agrees and stays in the near-miss band
                let carried = self.rescued.take().filter(|r| {
                    classification.best_label.as_deref() == Some(r.as_str())
                        && recognizer.escalation().in_near_miss_band(
                            classification.best_score,
                            recognizer.offline_threshold(),
                        )
                });
                if label.is_none() {
                    label = carried.clone();
                }
                self.rescued = carried;
            }
        }

        let mut escalated = false;
        if label.is_none() {
            if let Some(image) = frame.image.as_ref() {
                let labels = snapshot.labels();
                let input = EscalationInput {
                    offline_score: classification.best_score,
                    offline_threshold: recognizer.offline_threshold(),
                    labels: &labels,
                    motion_energy: frame.motion_energy,
                    now,
                };
                match recognizer.escalation().evaluate(&input) {
                    EscalationDecision::Escalate => {
                        recognizer.escalation_mut().mark_attempt(now);
                        escalated = self.dispatcher.dispatch(image.clone(), labels);
                        if !escalated {
                            recognizer.escalation_mut().complete();
                        }
                    }
                    EscalationDecision::Decline(reason) => {
                        debug!("Escalation declined: {:?}", reason);
                    }
                }
            }
        }

        let fire = recognizer.gate_mut().update(
            label.as_deref(),
            classification.best_score,
            now,
            self.runtime.detect_enabled(),
        );

        let gate = recognizer.gate();
        self.runtime.record_frame(
            gate.consecutive_count(),
            &classification,
            gate.cooldown_left(now),
        );

        let context = recognizer.context().to_string();
        let fired = fire.map(|f| {
            info!(
                "🎯 Firing action '{}' [{}] score={:.3}",
                f.label, context, f.score
            );
            self.runtime.inc(&self.runtime.fires);
            FireEvent {
                context: context.clone(),
                label: f.label,
                score: f.score,
                timestamp: now,
            }
        });

        FrameOutcome {
            context: Some(context),
            classification,
            label,
            escalated,
            fired,
        }
    }

    /// Swap in a fresh Recognizer when the watcher published a new context.
    fn sync_context(&mut self) {
        let changed = {
            let current = self.context_rx.borrow_and_update();
            let active = self.recognizer.as_ref().map(|r| r.context());
            if current.as_deref() == active {
                None
            } else {
                Some(current.clone())
            }
        };

        let Some(next) = changed else {
            return;
        };

        self.dispatcher.cancel();
        self.rescued = None;
        self.recognizer = next.map(|ctx| {
            debug!("Frame loop switching to context {}", ctx);
            Recognizer::new(
                ctx,
                Arc::clone(&self.index),
                &self.recognition,
                &self.escalation,
                self.dispatcher.has_client(),
            )
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SampleStore;
    use crate::vision_client::FallbackClassifier;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingClient {
        calls: Arc<AtomicUsize>,
        answer: &'static str,
    }

    #[async_trait]
    impl FallbackClassifier for CountingClient {
        async fn classify(&self, _image: &FrameImage, _labels: &[String]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.to_string())
        }
    }

    fn one_hot(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 12];
        v[i] = 1.0;
        v
    }

    /// Cosine 0.89 against one_hot(0)
    fn near_miss() -> Vec<f32> {
        let mut v = vec![0.0; 12];
        v[0] = 0.89;
        v[1] = (1.0f32 - 0.89 * 0.89).sqrt();
        v
    }

    fn frame(t: f64, features: Vec<f32>) -> FrameInput {
        FrameInput {
            timestamp: t,
            features,
            motion_energy: Some(50.0),
            image: Some(FrameImage::Jpeg(vec![0xFF, 0xD8])),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        frame_loop: FrameLoop,
        context_tx: watch::Sender<Option<String>>,
        calls: Arc<AtomicUsize>,
    }

    fn harness(answer: &'static str, confirm_frames: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SampleStore::new(dir.path(), 12));
        store.add_sample("Game", "Jump", &one_hot(0), "", None).unwrap();
        store.add_sample("Other", "Duck", &one_hot(5), "", None).unwrap();
        let index = Arc::new(CentroidIndex::new(store));

        let calls = Arc::new(AtomicUsize::new(0));
        let client: Arc<dyn FallbackClassifier> = Arc::new(CountingClient {
            calls: Arc::clone(&calls),
            answer,
        });
        let runtime = SharedRuntime::new(true);
        let dispatcher = EscalationDispatcher::new(Some(client), runtime.clone());

        let (context_tx, context_rx) = watch::channel(Some("Game".to_string()));
        let frame_loop = FrameLoop::new(
            index,
            RecognitionConfig {
                offline_threshold: 0.90,
                confirm_frames,
                cooldown_secs: 1.0,
                detect_enabled: true,
            },
            EscalationConfig {
                enabled: true,
                cooldown_secs: 2.5,
                trigger_band: 0.02,
                min_motion_energy: 35.0,
                ..Default::default()
            },
            context_rx,
            dispatcher,
            runtime,
        );

        Harness {
            _dir: dir,
            frame_loop,
            context_tx,
            calls,
        }
    }

    #[tokio::test]
    async fn test_offline_fire_after_confirmation() {
        let mut h = harness("NONE", 4);
        let mut fires = Vec::new();
        for (i, t) in [0.0, 0.1, 0.2, 0.3, 0.4].into_iter().enumerate() {
            let out = h.frame_loop.process(frame(t, one_hot(0)));
            assert_eq!(out.label.as_deref(), Some("Jump"), "frame {}", i);
            assert!(!out.escalated);
            if let Some(f) = out.fired {
                fires.push(f);
            }
        }
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].label, "Jump");
        assert_eq!(fires[0].context, "Game");
        assert!((fires[0].timestamp - 0.3).abs() < 1e-9);
        assert_eq!(h.frame_loop.runtime().summary().fires, 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_escalation_rate_limited() {
        let mut h = harness("NONE", 4);

        let first = h.frame_loop.process(frame(0.0, near_miss()));
        assert!(first.escalated);
        assert_eq!(first.label, None);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = h.frame_loop.process(frame(0.5, near_miss()));
        assert!(!second.escalated);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let third = h.frame_loop.process(frame(2.6, near_miss()));
        assert!(third.escalated);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rescued_label_confirms_over_following_frames() {
        let mut h = harness("jump", 4);

        let first = h.frame_loop.process(frame(0.0, near_miss()));
        assert!(first.escalated);
        assert!(first.fired.is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut fires = Vec::new();
        for t in [0.1, 0.2, 0.3, 0.4] {
            let out = h.frame_loop.process(frame(t, near_miss()));
            assert_eq!(out.label.as_deref(), Some("Jump"), "t={}", t);
            assert!(!out.escalated);
            if let Some(f) = out.fired {
                fires.push(f);
            }
        }
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].label, "Jump");
        assert!((fires[0].timestamp - 0.4).abs() < 1e-9);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rescue_dropped_once_match_moves_away() {
        let mut h = harness("jump", 4);

        h.frame_loop.process(frame(0.0, near_miss()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            h.frame_loop.process(frame(0.1, near_miss())).label.as_deref(),
            Some("Jump")
        );

        // Unrelated pose breaks the carry; returning to the near miss does not revive it
        assert_eq!(h.frame_loop.process(frame(0.2, one_hot(3))).label, None);
        let back = h.frame_loop.process(frame(0.3, near_miss()));
        assert_eq!(back.label, None);
        assert!(!back.escalated);
        assert_eq!(h.frame_loop.recognizer().unwrap().gate().consecutive_count(), 0);
    }

    #[test]
    fn test_escalation_without_async_runtime_is_skipped() {
        let mut h = harness("jump", 4);
        let out = h.frame_loop.process(frame(0.0, near_miss()));
        assert!(!out.escalated);
        assert_eq!(out.label, None);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(!h.frame_loop.recognizer().unwrap().escalation().is_in_flight());
    }

    #[tokio::test]
    async fn test_idle_scene_and_far_scores_do_not_escalate() {
        let mut h = harness("NONE", 4);

        let mut idle = frame(0.0, near_miss());
        idle.motion_energy = Some(5.0);
        assert!(!h.frame_loop.process(idle).escalated);

        let mut far = frame(0.1, one_hot(3));
        far.motion_energy = Some(80.0);
        assert!(!h.frame_loop.process(far).escalated);

        let mut no_image = frame(0.2, near_miss());
        no_image.image = None;
        assert!(!h.frame_loop.process(no_image).escalated);

        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_switch_rebuilds_recognizer() {
        let mut h = harness("NONE", 4);
        for t in [0.0, 0.1, 0.2] {
            h.frame_loop.process(frame(t, one_hot(0)));
        }
        assert_eq!(h.frame_loop.recognizer().unwrap().gate().consecutive_count(), 3);

        h.context_tx.send_replace(Some("Other".to_string()));
        let out = h.frame_loop.process(frame(0.3, one_hot(0)));
        assert_eq!(out.context.as_deref(), Some("Other"));
        // Jump is unknown in the new context and the streak did not carry over
        assert_eq!(out.label, None);
        assert!(out.fired.is_none());

        let duck = h.frame_loop.process(frame(0.4, one_hot(5)));
        assert_eq!(duck.label.as_deref(), Some("Duck"));
        assert_eq!(h.frame_loop.recognizer().unwrap().gate().consecutive_count(), 1);
    }

    #[tokio::test]
    async fn test_disarmed_never_fires_and_no_context_is_inert() {
        let mut h = harness("NONE", 1);
        h.frame_loop.runtime().set_detect_enabled(false);
        assert!(h.frame_loop.process(frame(0.0, one_hot(0))).fired.is_none());

        h.context_tx.send_replace(None);
        let out = h.frame_loop.process(frame(0.1, one_hot(0)));
        assert!(out.context.is_none());
        assert!(h.frame_loop.recognizer().is_none());
    }
}
