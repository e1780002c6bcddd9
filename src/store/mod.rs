// src/store/mod.rs

pub mod freshness;
pub mod sample_store;

pub use freshness::FreshnessToken;
pub use sample_store::{SampleRecord, SampleSet, SampleStore};
