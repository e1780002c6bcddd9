// src/pipeline/runtime.rs
//
// Shared runtime state. Read by anything that wants to display status,
// written by exactly one component per field:
//   detect_enabled            external toggle (API/CLI)
//   active_context            context watcher
//   stable_count, last_confidence, last_margin, cooldown_left, counters   frame loop

use crate::types::ClassificationOutcome;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SharedRuntime {
    pub detect_enabled: Arc<AtomicBool>,
    pub active_context: Arc<RwLock<Option<String>>>,
    pub stable_count: Arc<AtomicU32>,
    /// f32 bits
    pub last_confidence: Arc<AtomicU32>,
    /// f32 bits; best minus runner-up score
    pub last_margin: Arc<AtomicU32>,
    /// f64 bits
    pub cooldown_left: Arc<AtomicU64>,
    pub total_frames: Arc<AtomicU64>,
    pub fires: Arc<AtomicU64>,
    pub escalations: Arc<AtomicU64>,
    pub escalation_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl SharedRuntime {
    pub fn new(detect_enabled: bool) -> Self {
        Self {
            detect_enabled: Arc::new(AtomicBool::new(detect_enabled)),
            active_context: Arc::new(RwLock::new(None)),
            stable_count: Arc::new(AtomicU32::new(0)),
            last_confidence: Arc::new(AtomicU32::new(0f32.to_bits())),
            last_margin: Arc::new(AtomicU32::new(0f32.to_bits())),
            cooldown_left: Arc::new(AtomicU64::new(0f64.to_bits())),
            total_frames: Arc::new(AtomicU64::new(0)),
            fires: Arc::new(AtomicU64::new(0)),
            escalations: Arc::new(AtomicU64::new(0)),
            escalation_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn detect_enabled(&self) -> bool {
        self.detect_enabled.load(Ordering::Relaxed)
    }

    pub fn set_detect_enabled(&self, enabled: bool) {
        self.detect_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn active_context(&self) -> Option<String> {
        self.active_context.read().clone()
    }

    pub fn set_active_context(&self, context: Option<String>) {
        *self.active_context.write() = context;
    }

    pub fn record_frame(
        &self,
        stable_count: u32,
        outcome: &ClassificationOutcome,
        cooldown_left: f64,
    ) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.stable_count.store(stable_count, Ordering::Relaxed);
        self.last_confidence
            .store(outcome.best_score.to_bits(), Ordering::Relaxed);
        self.last_margin
            .store(outcome.margin().to_bits(), Ordering::Relaxed);
        self.cooldown_left
            .store(cooldown_left.to_bits(), Ordering::Relaxed);
    }

    pub fn last_confidence(&self) -> f32 {
        f32::from_bits(self.last_confidence.load(Ordering::Relaxed))
    }

    pub fn last_margin(&self) -> f32 {
        f32::from_bits(self.last_margin.load(Ordering::Relaxed))
    }

    pub fn cooldown_left(&self) -> f64 {
        f64::from_bits(self.cooldown_left.load(Ordering::Relaxed))
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> RuntimeSummary {
        RuntimeSummary {
            detect_enabled: self.detect_enabled(),
            active_context: self.active_context(),
            stable_count: self.stable_count.load(Ordering::Relaxed),
            last_confidence: self.last_confidence(),
            last_margin: self.last_margin(),
            cooldown_left: self.cooldown_left(),
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            fires: self.fires.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            escalation_failures: self.escalation_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SharedRuntime {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeSummary {
    pub detect_enabled: bool,
    pub active_context: Option<String>,
    pub stable_count: u32,
    pub last_confidence: f32,
    pub last_margin: f32,
    pub cooldown_left: f64,
    pub total_frames: u64,
    pub fps: f64,
    pub fires: u64,
    pub escalations: u64,
    pub escalation_failures: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let runtime = SharedRuntime::new(true);
        let view = runtime.clone();

        runtime.record_frame(
            3,
            &ClassificationOutcome {
                best_label: Some("Jump".to_string()),
                best_score: 0.87,
                second_best_score: 0.62,
            },
            0.25,
        );
        runtime.inc(&runtime.fires);
        runtime.set_active_context(Some("Game".to_string()));
        view.set_detect_enabled(false);

        let s = view.summary();
        assert_eq!(s.stable_count, 3);
        assert!((s.last_confidence - 0.87).abs() < 1e-6);
        assert!((s.last_margin - 0.25).abs() < 1e-6);
        assert!((s.cooldown_left - 0.25).abs() < 1e-9);
        assert_eq!(s.total_frames, 1);
        assert_eq!(s.fires, 1);
        assert_eq!(s.active_context.as_deref(), Some("Game"));
        assert!(!runtime.detect_enabled());
    }

    #[test]
    fn test_summary_serializes() {
        let json = serde_json::to_value(SharedRuntime::default().summary()).unwrap();
        assert_eq!(json["detect_enabled"], true);
        assert!(json["active_context"].is_null());
    }
}
