// src/store/freshness.rs
//
// Change marker for one context's sample directory.
//
// A directory mtime alone misses writes that land inside the same
// timestamp tick, and a context-level mtime misses files added to an
// existing label folder. The token therefore combines:
//   - an in-process write generation (bumped by every local add_sample)
//   - the context directory mtime (label folders added / removed)
//   - per label folder: mtime + record count (records added / removed externally)
//
// Computing it never decodes a record.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Record file extension inside a label folder.
pub const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessToken {
    pub generation: u64,
    pub context_mtime: Option<SystemTime>,
    pub labels: Vec<LabelStamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelStamp {
    pub label: String,
    pub mtime: Option<SystemTime>,
    pub records: usize,
}

impl FreshnessToken {
    /// Token for a context that has no directory yet.
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            context_mtime: None,
            labels: Vec::new(),
        }
    }

    pub fn scan(context_dir: &Path, generation: u64) -> Self {
        let context_mtime = match fs::metadata(context_dir) {
            Ok(meta) if meta.is_dir() => meta.modified().ok(),
            _ => return Self::empty(generation),
        };

        let mut labels: Vec<LabelStamp> = match fs::read_dir(context_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| {
                    let path = e.path();
                    LabelStamp {
                        label: e.file_name().to_string_lossy().into_owned(),
                        mtime: fs::metadata(&path).and_then(|m| m.modified()).ok(),
                        records: count_records(&path),
                    }
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        labels.sort_by(|a, b| a.label.cmp(&b.label));

        Self {
            generation,
            context_mtime,
            labels,
        }
    }
}

pub fn is_record(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
}

fn count_records(label_dir: &Path) -> usize {
    fs::read_dir(label_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| is_record(&e.path()))
                .count()
        })
        .unwrap_or(0)
}
