// src/lib.rs

pub mod cli;
pub mod config;
pub mod motion;
pub mod pipeline;
pub mod profiles;
pub mod recognition;
pub mod replay;
pub mod store;
pub mod training;
pub mod types;
pub mod vision_client;

pub use pipeline::{FrameInput, FrameLoop, SharedRuntime};
pub use recognition::{CentroidIndex, Recognizer, StabilityGate};
pub use store::SampleStore;
pub use types::{ClassificationOutcome, Config, FeatureVector, FireEvent};
