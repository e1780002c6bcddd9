// src/training.rs
//
// Supervised sample capture. Frames stream in while the user holds a pose;
// every `history_len` frames the newest vector is written as one sample,
// which spreads the captures over time instead of storing near-duplicates.

use crate::store::SampleStore;
use crate::types::FeatureVector;
use anyhow::Result;
use std::collections::VecDeque;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingProgress {
    /// Frame buffered, nothing written
    Buffering,
    /// A sample was written
    Captured { collected: usize, target: usize },
    /// Target already reached; the frame was ignored
    Complete,
}

pub struct TrainingSession {
    context: String,
    label: String,
    target: usize,
    history: VecDeque<FeatureVector>,
    history_len: usize,
    collected: usize,
}

impl TrainingSession {
    pub fn new(
        context: impl Into<String>,
        label: impl Into<String>,
        target: usize,
        history_len: usize,
    ) -> Self {
        let history_len = history_len.max(1);
        let session = Self {
            context: context.into(),
            label: label.into(),
            target,
            history: VecDeque::with_capacity(history_len),
            history_len,
            collected: 0,
        };
        info!(
            "Training mode: context={} label={} samples={}",
            session.context, session.label, session.target
        );
        session
    }

    /// Feed one frame. Storage errors are returned and leave the history intact.
    pub fn push(
        &mut self,
        store: &SampleStore,
        features: &[f32],
        image_ref: &str,
        landmarks: Option<&[Vec<f32>]>,
    ) -> Result<TrainingProgress> {
        if self.is_complete() {
            return Ok(TrainingProgress::Complete);
        }

        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(features.to_vec());
        if self.history.len() < self.history_len {
            return Ok(TrainingProgress::Buffering);
        }

        store.add_sample(&self.context, &self.label, features, image_ref, landmarks)?;
        self.collected += 1;
        self.history.clear();
        info!("Captured sample {}/{}", self.collected, self.target);

        if self.is_complete() {
            info!("✓ Done collecting samples for {}/{}", self.context, self.label);
        }
        Ok(TrainingProgress::Captured {
            collected: self.collected,
            target: self.target,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.collected >= self.target
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn target(&self) -> usize {
        self.target
    }
}
