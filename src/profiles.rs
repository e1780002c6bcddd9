// src/profiles.rs
//
// Per-context effect profiles and the sink that receives fired actions.
//
// A profile lives at `<profiles_dir>/<context>.json`:
//
//   {
//     "display_name": "Minecraft",
//     "actions": {
//       "Jump": {"type": "keyboard", "keys": ["space"], "hold_ms": 50},
//       "Punch": {"type": "mouse", "buttons": ["left"]}
//     }
//   }
//
// Files are re-read when their mtime changes, so edits apply without a restart.

use crate::store::sample_store::validate_segment;
use crate::types::FireEvent;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

const PROFILE_EXTENSION: &str = "json";
const DEFAULT_HOLD_MS: u64 = 50;

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD_MS
}

/// What to do when a label fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EffectMapping {
    /// Keys pressed together as a chord, then released
    Keyboard {
        keys: Vec<String>,
        #[serde(default = "default_hold_ms")]
        hold_ms: u64,
    },
    Mouse {
        buttons: Vec<String>,
        #[serde(default = "default_hold_ms")]
        hold_ms: u64,
    },
}

impl EffectMapping {
    /// Human-readable form, e.g. `keyboard ctrl+shift+a (50ms)`.
    pub fn describe(&self) -> String {
        match self {
            EffectMapping::Keyboard { keys, hold_ms } => {
                let keys: Vec<String> = keys.iter().map(|k| normalize_key(k)).collect();
                format!("keyboard {} ({}ms)", keys.join("+"), hold_ms)
            }
            EffectMapping::Mouse { buttons, hold_ms } => {
                format!("mouse {} ({}ms)", buttons.join("+"), hold_ms)
            }
        }
    }
}

/// Canonical key name: lower-cased with common aliases folded.
pub fn normalize_key(key: &str) -> String {
    let k = key.trim().to_lowercase();
    let canonical = match k.as_str() {
        "spacebar" => "space",
        "return" => "enter",
        "escape" => "esc",
        "control" => "ctrl",
        "pgup" => "pageup",
        "pgdn" => "pagedown",
        "del" => "delete",
        "bksp" => "backspace",
        other => other,
    };
    canonical.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub actions: BTreeMap<String, EffectMapping>,
}

struct CachedProfile {
    mtime: Option<SystemTime>,
    profile: Arc<Profile>,
}

// ============================================================================
// PROFILE STORE
// ============================================================================

pub struct ProfileStore {
    base: PathBuf,
    cache: Mutex<HashMap<String, CachedProfile>>,
}

impl ProfileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, context: &str) -> Result<PathBuf> {
        validate_segment("context", context)?;
        Ok(self.base.join(format!("{}.{}", context, PROFILE_EXTENSION)))
    }

    /// Profile for `context`, reloaded if the file changed since last read.
    /// Missing or unparsable files give `None`.
    pub fn get_profile(&self, context: &str) -> Option<Arc<Profile>> {
        let path = match self.path_for(context) {
            Ok(path) => path,
            Err(e) => {
                debug!("No profile: {:#}", e);
                return None;
            }
        };
        let mtime = match fs::metadata(&path) {
            Ok(meta) => meta.modified().ok(),
            Err(_) => {
                self.cache.lock().remove(context);
                return None;
            }
        };

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get(context) {
            if cached.mtime == mtime {
                return Some(Arc::clone(&cached.profile));
            }
        }

        match read_profile(&path) {
            Ok(profile) => {
                debug!(
                    "Loaded profile {} ({} actions)",
                    path.display(),
                    profile.actions.len()
                );
                let profile = Arc::new(profile);
                cache.insert(
                    context.to_string(),
                    CachedProfile {
                        mtime,
                        profile: Arc::clone(&profile),
                    },
                );
                Some(profile)
            }
            Err(e) => {
                warn!("Ignoring profile {}: {:#}", path.display(), e);
                cache.remove(context);
                None
            }
        }
    }

    pub fn mapping_for(&self, context: &str, label: &str) -> Option<EffectMapping> {
        self.get_profile(context)?.actions.get(label).cloned()
    }

    /// Names of every profile file that parses, sorted.
    pub fn list_profiles(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == PROFILE_EXTENSION))
            .filter(|p| read_profile(p).is_ok())
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    pub fn save_profile(&self, context: &str, profile: &Profile) -> Result<PathBuf> {
        fs::create_dir_all(&self.base)
            .with_context(|| format!("Failed to create {}", self.base.display()))?;
        let path = self.path_for(context)?;
        let tmp = self.base.join(format!(".{}.{}.tmp", context, PROFILE_EXTENSION));
        let body = serde_json::to_vec_pretty(profile).context("Failed to serialize profile")?;
        fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to commit {}", path.display()))?;
        self.cache.lock().remove(context);
        Ok(path)
    }
}

fn read_profile(path: &Path) -> Result<Profile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

// ============================================================================
// EFFECT SINK
// ============================================================================

/// Receives every fired action. Implementations perform the side effect.
pub trait EffectSink: Send {
    fn execute(&mut self, event: &FireEvent, mapping: Option<&EffectMapping>);
}

/// Logs fires instead of injecting input.
#[derive(Default)]
pub struct LoggingEffectSink {
    executed: u64,
}

impl LoggingEffectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }
}

impl EffectSink for LoggingEffectSink {
    fn execute(&mut self, event: &FireEvent, mapping: Option<&EffectMapping>) {
        match mapping {
            Some(m) => {
                self.executed += 1;
                info!(
                    "🎮 {} → {} [{}] at {:.2}s",
                    event.label,
                    m.describe(),
                    event.context,
                    event.timestamp
                );
            }
            None => debug!(
                "No mapping for {} in profile {}",
                event.label, event.context
            ),
        }
    }
}
