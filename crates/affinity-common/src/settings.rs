//! Operational settings (tool paths, search-box defaults, collaborator ids).
//!
//! Components never read the environment or a global directly: they receive
//! an `Arc<dyn SettingsProvider>`. `CachedSettings` sits in front of an
//! ordered chain of sources (writable store → environment → config
//! defaults) and caches every value it resolves until the key is invalidated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

/// Well-known setting keys.
pub mod keys {
    pub const VINA_PATH: &str = "VINA_PATH";
    pub const OBABEL_PATH: &str = "OBABEL_PATH";
    pub const FPOCKET_PATH: &str = "FPOCKET_PATH";
    pub const ADMET_PATH: &str = "ADMET_PATH";
    pub const VINA_EXHAUSTIVENESS: &str = "VINA_EXHAUSTIVENESS";
    pub const VINA_CENTER: &str = "VINA_CENTER";
    pub const VINA_SIZE: &str = "VINA_SIZE";
    pub const QDRANT_URL: &str = "QDRANT_URL";
    pub const QDRANT_API_KEY: &str = "QDRANT_API_KEY";
    pub const QDRANT_COLLECTION: &str = "QDRANT_COLLECTION";
    pub const CHEMBERT_MODEL: &str = "CHEMBERT_MODEL";

    /// Keys refreshed by `CachedSettings::reload_all`.
    pub const IMPORTANT: &[&str] = &[
        VINA_PATH,
        OBABEL_PATH,
        FPOCKET_PATH,
        ADMET_PATH,
        VINA_EXHAUSTIVENESS,
        VINA_CENTER,
        VINA_SIZE,
        QDRANT_URL,
        QDRANT_API_KEY,
        QDRANT_COLLECTION,
        CHEMBERT_MODEL,
    ];
}

/// A backing store consulted on cache misses.
pub trait SettingsSource: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
}

/// Read access to operational settings.
pub trait SettingsProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Drop cached values so the next `get` re-reads the sources.
    fn invalidate(&self, keys: &[&str]);
}

// ── Sources ──────────────────────────────────────────────────────────────────

/// Writable in-memory store. Stands in for the settings table.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { values: RwLock::new(map) }
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut guard = self.values.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        let mut guard = self.values.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
    }
}

impl SettingsSource for MemorySettings {
    fn load(&self, key: &str) -> Option<String> {
        let guard = self.values.read().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned()
    }
}

/// Process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn load(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

/// Lazily-populated cache over an ordered chain of sources.
///
/// Only values that resolved are cached; a miss is retried on the next read.
/// Writers replace whole entries under the lock, so readers observe either
/// the old or the new value.
pub struct CachedSettings {
    sources: Vec<Arc<dyn SettingsSource>>,
    cache: RwLock<HashMap<String, String>>,
}

impl CachedSettings {
    pub fn new(sources: Vec<Arc<dyn SettingsSource>>) -> Self {
        Self {
            sources,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn resolve(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.load(key))
    }

    /// Re-read the important keys from the sources.
    pub fn reload_all(&self) {
        let fresh: Vec<(String, Option<String>)> = keys::IMPORTANT
            .iter()
            .map(|k| (k.to_string(), self.resolve(k)))
            .collect();

        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        for (k, v) in fresh {
            match v {
                Some(v) => {
                    guard.insert(k, v);
                }
                None => {
                    guard.remove(&k);
                }
            }
        }
    }
}

impl SettingsProvider for CachedSettings {
    fn get(&self, key: &str) -> Option<String> {
        {
            let guard = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(v) = guard.get(key) {
                return Some(v.clone());
            }
        }

        let value = self.resolve(key)?;
        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value.clone());
        Some(value)
    }

    fn invalidate(&self, keys: &[&str]) {
        debug!(?keys, "Invalidating cached settings");
        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        for k in keys {
            guard.remove(*k);
        }
    }
}

/// Parse a comma-separated `x,y,z` triple, returning `default` when the value
/// is absent or malformed.
pub fn parse_triple(value: Option<&str>, default: [f64; 3]) -> [f64; 3] {
    let Some(value) = value else { return default };
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return default;
    }
    let mut out = [0.0; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        match part.parse::<f64>() {
            Ok(v) => *slot = v,
            Err(_) => return default,
        }
    }
    out
}
