// src/recognition/mod.rs
//
// Motion-action recognition core.
//
// Signal flow per frame:
//   FeatureVector → CentroidIndex snapshot → matcher → (label, best, second)
//                                                  ├→ EscalationPolicy (near-miss?)
//                                                  └→ StabilityGate → fire
//
// Recognizer binds all of it to one active context.

pub mod centroid_index;
pub mod escalation;
pub mod matcher;
pub mod recognizer;
pub mod stability_gate;

pub use centroid_index::{CentroidIndex, CentroidSnapshot};
pub use escalation::{
    reconcile_label, DeclineReason, EscalationDecision, EscalationInput, EscalationPolicy,
};
pub use matcher::{best_match, cosine_similarity};
pub use recognizer::Recognizer;
pub use stability_gate::{GateConfig, GateFire, GateState, StabilityGate};
