// src/types.rs

use serde::{Deserialize, Serialize};

/// Default feature dimensionality: one angle per joint relation of the body signature.
pub const DEFAULT_FEATURE_DIM: usize = 12;

/// One frame's pose signature as produced by the external feature extractor.
pub type FeatureVector = Vec<f32>;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub recognition: RecognitionConfig,
    pub escalation: EscalationConfig,
    pub context: ContextConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the sample store: `<data_dir>/<context>/<label>/*.json`
    pub data_dir: String,
    /// Directory holding `<context>.json` effect profiles
    pub profiles_dir: String,
    /// Expected feature vector length; records of another length are skipped
    pub feature_dim: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            profiles_dir: "profiles".to_string(),
            feature_dim: DEFAULT_FEATURE_DIM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Cosine score the offline matcher alone must reach to trust a label
    pub offline_threshold: f32,
    /// Consecutive identical labels required before firing
    pub confirm_frames: u32,
    /// Minimum spacing between two fires
    pub cooldown_secs: f64,
    /// Initial value of the externally toggled detection switch
    pub detect_enabled: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            offline_threshold: 0.82,
            confirm_frames: 4,
            cooldown_secs: 1.0,
            detect_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Hard rate limit between two fallback calls
    pub cooldown_secs: f64,
    /// Width of the near-miss band below `offline_threshold`
    pub trigger_band: f32,
    /// Motion energy below which the scene counts as idle
    pub min_motion_energy: f32,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_secs: 2.5,
            trigger_band: 0.02,
            min_motion_energy: 35.0,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub poll_interval_ms: u64,
    /// Pin the active context instead of following the foreground application
    pub fixed_context: Option<String>,
    /// File whose contents name the foreground application, written by an external watcher
    pub context_file: Option<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            fixed_context: None,
            context_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Frames accumulated between two persisted samples
    pub history_len: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self { history_len: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// RECOGNITION VALUES
// ============================================================================

/// Result of matching one feature vector against a context's centroids.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub best_label: Option<String>,
    pub best_score: f32,
    pub second_best_score: f32,
}

impl ClassificationOutcome {
    pub fn none() -> Self {
        Self {
            best_label: None,
            best_score: 0.0,
            second_best_score: 0.0,
        }
    }

    /// Gap between the winner and the runner-up.
    pub fn margin(&self) -> f32 {
        self.best_score - self.second_best_score
    }
}

/// A confirmed action handed to the effect-execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireEvent {
    pub context: String,
    pub label: String,
    pub score: f32,
    pub timestamp: f64,
}

/// One replayed input frame: the extractor's output plus auxiliary signals.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    /// Seconds since stream start
    pub timestamp: f64,
    pub features: FeatureVector,
    #[serde(default)]
    pub motion_energy: Option<f32>,
    /// Path of a JPEG snapshot of this frame, used only for escalation
    #[serde(default)]
    pub image_path: Option<String>,
    /// Raw pose landmarks, stored alongside training samples
    #[serde(default)]
    pub landmarks: Option<Vec<Vec<f32>>>,
}
