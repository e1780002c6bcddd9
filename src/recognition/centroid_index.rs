// src/recognition/centroid_index.rs
//
// Per-context centroid cache over the SampleStore.
//
// centroids_for() compares the store's freshness token with the token the
// cached snapshot was built from. On a match the cached Arc is returned;
// otherwise the whole context is reloaded, averaged and swapped in as a
// new immutable snapshot. Readers never see a partially built mapping.

use super::matcher;
use crate::store::{FreshnessToken, SampleSet, SampleStore};
use crate::types::{ClassificationOutcome, FeatureVector};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Immutable centroid set for one context, in label order.
#[derive(Debug)]
pub struct CentroidSnapshot {
    token: FreshnessToken,
    centroids: BTreeMap<String, FeatureVector>,
}

impl CentroidSnapshot {
    pub fn centroids(&self) -> &BTreeMap<String, FeatureVector> {
        &self.centroids
    }

    pub fn centroid(&self, label: &str) -> Option<&FeatureVector> {
        self.centroids.get(label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.centroids.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    /// Nearest centroid to `features`; ties resolve to the lexicographically first label.
    pub fn best_match(&self, features: &[f32]) -> ClassificationOutcome {
        matcher::best_match(&self.centroids, features)
    }
}

pub struct CentroidIndex {
    store: Arc<SampleStore>,
    cache: RwLock<HashMap<String, Arc<CentroidSnapshot>>>,
    rebuilds: AtomicU64,
}

impl CentroidIndex {
    pub fn new(store: Arc<SampleStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            rebuilds: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn centroids_for(&self, context: &str) -> Arc<CentroidSnapshot> {
        // Token is taken before loading: a write racing the load leaves the
        // snapshot tagged with the older token, so the next call rebuilds.
        let token = self.store.freshness_token(context);

        if let Some(cached) = self.cache.read().get(context) {
            if cached.token == token {
                return Arc::clone(cached);
            }
        }

        let samples = self.store.load_all(context);
        let snapshot = Arc::new(CentroidSnapshot {
            token,
            centroids: compute_centroids(&samples),
        });

        self.cache
            .write()
            .insert(context.to_string(), Arc::clone(&snapshot));
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        info!(
            "Built centroid index for {}: {:?}",
            context,
            snapshot.centroids.keys().collect::<Vec<_>>()
        );
        snapshot
    }

    pub fn best_match(&self, context: &str, features: &[f32]) -> ClassificationOutcome {
        self.centroids_for(context).best_match(features)
    }

    /// Drop the cached snapshot so the next lookup rebuilds unconditionally.
    pub fn invalidate(&self, context: &str) {
        self.cache.write().remove(context);
    }

    /// Number of full recomputations since construction.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}

/// Element-wise mean per label. Labels with no usable vectors are left out.
pub fn compute_centroids(samples: &SampleSet) -> BTreeMap<String, FeatureVector> {
    let mut out = BTreeMap::new();

    for (label, feats) in samples {
        let Some(first) = feats.first() else {
            continue;
        };
        let dim = first.len();
        let rows: Vec<&FeatureVector> = feats.iter().filter(|f| f.len() == dim).collect();

        let mut sum = vec![0.0f64; dim];
        for row in &rows {
            for (acc, v) in sum.iter_mut().zip(row.iter()) {
                *acc += *v as f64;
            }
        }
        let n = rows.len() as f64;
        out.insert(
            label.clone(),
            sum.into_iter().map(|s| (s / n) as f32).collect(),
        );
    }

    out
}
