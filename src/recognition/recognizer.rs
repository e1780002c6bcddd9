// src/recognition/recognizer.rs
//
// One active context bound to its centroid index, stability gate and
// escalation policy. Gate and escalation state live here, so a context
// switch means building a new Recognizer; nothing carries over.

use super::centroid_index::{CentroidIndex, CentroidSnapshot};
use super::escalation::EscalationPolicy;
use super::stability_gate::{GateConfig, StabilityGate};
use crate::types::{ClassificationOutcome, EscalationConfig, RecognitionConfig};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Recognizer {
    context: String,
    index: Arc<CentroidIndex>,
    offline_threshold: f32,
    gate: StabilityGate,
    escalation: EscalationPolicy,
}

impl Recognizer {
    pub fn new(
        context: impl Into<String>,
        index: Arc<CentroidIndex>,
        recognition: &RecognitionConfig,
        escalation: &EscalationConfig,
        escalation_client_available: bool,
    ) -> Self {
        Self {
            context: context.into(),
            index,
            offline_threshold: recognition.offline_threshold,
            gate: StabilityGate::new(GateConfig {
                confirm_frames: recognition.confirm_frames,
                cooldown_secs: recognition.cooldown_secs,
            }),
            escalation: EscalationPolicy::new(escalation, escalation_client_available),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn offline_threshold(&self) -> f32 {
        self.offline_threshold
    }

    /// Current centroid set (cache hit unless the store changed).
    pub fn snapshot(&self) -> Arc<CentroidSnapshot> {
        self.index.centroids_for(&self.context)
    }

    pub fn classify(&self, features: &[f32]) -> ClassificationOutcome {
        self.snapshot().best_match(features)
    }

    /// Labels with at least one decodable sample in the store.
    pub fn candidate_labels(&self) -> BTreeSet<String> {
        self.index.store().labels_for_context(&self.context)
    }

    pub fn gate(&self) -> &StabilityGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut StabilityGate {
        &mut self.gate
    }

    pub fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    pub fn escalation_mut(&mut self) -> &mut EscalationPolicy {
        &mut self.escalation
    }
}
