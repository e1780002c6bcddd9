// src/store/sample_store.rs
//
// Disk-backed store of labeled training samples.
//
// Layout:
//   <base>/<context>/<label>/<millis>_<id>.json
//
// Each record holds the feature vector, a reference to the captured
// image and optionally the raw landmarks (provenance only). Records are
// immutable once written; this store never deletes them.

use super::freshness::{is_record, FreshnessToken};
use crate::types::FeatureVector;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Label → every decodable feature vector stored under it.
pub type SampleSet = BTreeMap<String, Vec<FeatureVector>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub features: FeatureVector,
    /// Opaque reference to the captured frame
    pub image: String,
    #[serde(default)]
    pub landmarks: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub struct SampleStore {
    base: PathBuf,
    feature_dim: usize,
    /// Local write counter per context, part of the freshness token
    generations: Mutex<HashMap<String, u64>>,
}

impl SampleStore {
    pub fn new(base: impl Into<PathBuf>, feature_dim: usize) -> Self {
        Self {
            base: base.into(),
            feature_dim,
            generations: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn context_dir(&self, context: &str) -> PathBuf {
        self.base.join(context)
    }

    /// Persist one sample under `(context, label)`.
    ///
    /// The record is written to a hidden temp file and renamed into place,
    /// so readers never observe a half-written record. Returns the final path.
    pub fn add_sample(
        &self,
        context: &str,
        label: &str,
        features: &[f32],
        image_ref: &str,
        landmarks: Option<&[Vec<f32>]>,
    ) -> Result<PathBuf> {
        validate_segment("context", context)?;
        validate_segment("label", label)?;
        if features.len() != self.feature_dim {
            bail!(
                "Feature vector has {} values, store expects {}",
                features.len(),
                self.feature_dim
            );
        }

        let folder = self.base.join(context).join(label);
        fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create sample folder {}", folder.display()))?;

        let created_at = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let file_name = format!("{}_{}.json", created_at.timestamp_millis(), &id[..8]);

        let record = SampleRecord {
            features: features.to_vec(),
            image: image_ref.to_string(),
            landmarks: landmarks.map(|l| l.to_vec()),
            created_at: Some(created_at),
        };
        let body = serde_json::to_vec(&record).context("Failed to serialize sample")?;

        let tmp_path = folder.join(format!(".{}.tmp", file_name));
        let final_path = folder.join(&file_name);
        fs::write(&tmp_path, body)
            .with_context(|| format!("Failed to write sample {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("Failed to commit sample {}", final_path.display()))?;

        *self.generations.lock().entry(context.to_string()).or_insert(0) += 1;

        debug!("Stored sample {}", final_path.display());
        Ok(final_path)
    }

    /// Every decodable feature vector for `context`, grouped by label.
    ///
    /// Unreadable or malformed records are skipped; a missing context is an
    /// empty map. Labels whose every record failed to decode are omitted.
    pub fn load_all(&self, context: &str) -> SampleSet {
        let mut out = SampleSet::new();
        if let Err(e) = validate_segment("context", context) {
            debug!("No samples: {}", e);
            return out;
        }
        let context_dir = self.context_dir(context);

        let entries = match fs::read_dir(&context_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No samples for {} ({})", context, e);
                return out;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let label_dir = entry.path();
            if !label_dir.is_dir() {
                continue;
            }
            let label = entry.file_name().to_string_lossy().into_owned();

            let feats: Vec<FeatureVector> = WalkDir::new(&label_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_record(e.path()))
                .filter_map(|e| self.read_features(e.path()))
                .collect();

            if !feats.is_empty() {
                out.insert(label, feats);
            }
        }

        out
    }

    pub fn labels_for_context(&self, context: &str) -> BTreeSet<String> {
        self.load_all(context).into_keys().collect()
    }

    /// Snapshot of the context's storage state, see [`FreshnessToken`].
    pub fn freshness_token(&self, context: &str) -> FreshnessToken {
        if validate_segment("context", context).is_err() {
            return FreshnessToken::empty(0);
        }
        let generation = self.generations.lock().get(context).copied().unwrap_or(0);
        FreshnessToken::scan(&self.context_dir(context), generation)
    }

    /// Contexts that have a sample folder.
    pub fn contexts(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.base) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    fn read_features(&self, path: &Path) -> Option<FeatureVector> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Skipping unreadable sample {}: {}", path.display(), e);
                return None;
            }
        };
        let record: SampleRecord = match serde_json::from_slice(&raw) {
            Ok(r) => r,
            Err(e) => {
                debug!("Skipping corrupt sample {}: {}", path.display(), e);
                return None;
            }
        };
        if record.features.len() != self.feature_dim {
            debug!(
                "Skipping sample {}: {} values, expected {}",
                path.display(),
                record.features.len(),
                self.feature_dim
            );
            return None;
        }
        Some(record.features)
    }

    /// Log a one-line inventory of the store.
    pub fn log_inventory(&self) {
        for context in self.contexts() {
            let samples = self.load_all(&context);
            let total: usize = samples.values().map(|v| v.len()).sum();
            info!(
                "Sample store: {} → {} labels, {} samples",
                context,
                samples.len(),
                total
            );
        }
    }
}

/// Reject names that are not a single plain path component.
pub(crate) fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0'])
    {
        bail!("Invalid {} name {:?}", kind, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec12(seed: f32) -> Vec<f32> {
        (0..12).map(|i| seed + i as f32 * 0.1).collect()
    }

    #[test]
    fn test_add_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);

        let v = vec12(1.0);
        store
            .add_sample("Game.exe", "Jump", &v, "jump.jpg", None)
            .unwrap();

        let all = store.load_all("Game.exe");
        assert_eq!(all.len(), 1);
        let loaded = &all["Jump"][0];
        for (a, b) in loaded.iter().zip(&v) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_context_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        assert!(store.load_all("Unknown.exe").is_empty());
        assert!(store.labels_for_context("Unknown.exe").is_empty());
    }

    #[test]
    fn test_duplicate_label_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);

        let a = store.add_sample("g", "Duck", &vec12(0.0), "a.jpg", None).unwrap();
        let b = store.add_sample("g", "Duck", &vec12(0.5), "b.jpg", None).unwrap();

        assert_ne!(a, b);
        assert_eq!(store.load_all("g")["Duck"].len(), 2);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        store.add_sample("g", "Jump", &vec12(1.0), "x.jpg", None).unwrap();

        let label_dir = dir.path().join("g").join("Jump");
        fs::write(label_dir.join("999_broken.json"), b"{not json").unwrap();
        fs::write(label_dir.join("998_short.json"), br#"{"features":[1.0,2.0],"image":""}"#)
            .unwrap();

        let all = store.load_all("g");
        assert_eq!(all["Jump"].len(), 1);
    }

    #[test]
    fn test_label_with_only_corrupt_records_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        let label_dir = dir.path().join("g").join("Wave");
        fs::create_dir_all(&label_dir).unwrap();
        fs::write(label_dir.join("1.json"), b"garbage").unwrap();

        assert!(store.labels_for_context("g").is_empty());
    }

    #[test]
    fn test_landmarks_round_trip_in_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        let landmarks = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];

        let path = store
            .add_sample("g", "Jump", &vec12(0.0), "frame.jpg", Some(&landmarks))
            .unwrap();

        let record: SampleRecord = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(record.image, "frame.jpg");
        assert_eq!(record.landmarks.unwrap(), landmarks);
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        assert!(store.add_sample("..", "Jump", &vec12(0.0), "", None).is_err());
        assert!(store.add_sample("g", "a/b", &vec12(0.0), "", None).is_err());
        assert!(store.add_sample("g", "", &vec12(0.0), "", None).is_err());
    }

    #[test]
    fn test_path_like_context_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("data"), 12);
        // Samples that sit beside the store root must stay unreachable
        let outside = SampleStore::new(dir.path(), 12);
        outside.add_sample("escape", "Jump", &vec12(1.0), "", None).unwrap();

        assert!(store.load_all("../escape").is_empty());
        assert!(store.load_all("..").is_empty());
        assert!(store.labels_for_context("").is_empty());
        assert!(store.load_all("a/b").is_empty());
        assert!(store.freshness_token("../escape").labels.is_empty());
        assert_eq!(store.base(), dir.path().join("data").as_path());
        assert_eq!(store.feature_dim(), 12);
    }

    #[test]
    fn test_wrong_dimension_rejected_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        assert!(store.add_sample("g", "Jump", &[1.0, 2.0], "", None).is_err());
    }

    #[test]
    fn test_unwritable_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let store = SampleStore::new(&blocker, 12);

        assert!(store.add_sample("g", "Jump", &vec12(0.0), "", None).is_err());
    }

    #[test]
    fn test_write_bumps_freshness_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        store.add_sample("g", "Jump", &vec12(0.0), "", None).unwrap();

        let before = store.freshness_token("g");
        store.add_sample("g", "Jump", &vec12(0.2), "", None).unwrap();
        let after = store.freshness_token("g");

        assert_ne!(before, after);
        assert_eq!(after.generation, before.generation + 1);
    }

    #[test]
    fn test_contexts_listed_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path(), 12);
        store.add_sample("b.exe", "Jump", &vec12(0.0), "", None).unwrap();
        store.add_sample("a.exe", "Jump", &vec12(0.0), "", None).unwrap();
        assert_eq!(store.contexts(), vec!["a.exe", "b.exe"]);
    }
}
