//! Configuration loading for Affinity.
//! Reads affinity.toml from the current directory or the path in AFFINITY_CONFIG.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::settings::{keys, CachedSettings, EnvSettings, MemorySettings, SettingsSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub docking: DockingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ligand, receptor, pose and log artifacts from docking runs.
    #[serde(default = "default_poses_dir")]
    pub poses_dir: PathBuf,
}

fn default_poses_dir() -> PathBuf { PathBuf::from("storage/poses") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            poses_dir: default_poses_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockingConfig {
    #[serde(default = "default_exhaustiveness")]
    pub exhaustiveness: u32,
    /// Default search-box center, "x,y,z".
    #[serde(default = "default_center")]
    pub center: String,
    /// Default search-box size, "x,y,z".
    #[serde(default = "default_size")]
    pub size: String,
    /// Local optimization steps applied to generated ligand conformers.
    #[serde(default = "default_minimize_steps")]
    pub minimize_steps: u32,
    pub vina_path: Option<String>,
    pub obabel_path: Option<String>,
    pub fpocket_path: Option<String>,
    pub admet_path: Option<String>,
}

fn default_exhaustiveness() -> u32    { 8 }
fn default_center()         -> String { "0,0,0".to_string() }
fn default_size()           -> String { "20,20,20".to_string() }
fn default_minimize_steps() -> u32    { 200 }

impl Default for DockingConfig {
    fn default() -> Self {
        Self {
            exhaustiveness: default_exhaustiveness(),
            center: default_center(),
            size: default_size(),
            minimize_steps: default_minimize_steps(),
            vina_path: None,
            obabel_path: None,
            fpocket_path: None,
            admet_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_molecules")]
    pub max_molecules: usize,
    /// How many of the best docked candidates go on to ADMET scoring.
    #[serde(default = "default_admet_top_k")]
    pub admet_top_k: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_molecules()  -> usize { 10 }
fn default_admet_top_k()    -> usize { 10 }
fn default_workers()        -> usize { 2 }
fn default_queue_capacity() -> usize { 64 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_molecules: default_max_molecules(),
            admet_top_k: default_admet_top_k(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 { 2000 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self { interval_ms: default_interval_ms() }
    }
}

impl StreamConfig {
    /// Poll interval for job progress streams; never below 10 ms.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(10))
    }
}

impl Config {
    /// Load configuration from affinity.toml.
    /// Checks AFFINITY_CONFIG env var first, then current directory.
    /// A missing file yields the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var("AFFINITY_CONFIG")
            .unwrap_or_else(|_| "affinity.toml".to_string());

        if !Path::new(&path).exists() {
            tracing::warn!("Config file not found: {}, using defaults", path);
            return Ok(Self::default());
        }
        Self::from_file(Path::new(&path))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Settings layer carrying this config's values under the well-known keys.
    pub fn settings_defaults(&self) -> MemorySettings {
        let d = &self.docking;
        let defaults = MemorySettings::with_values([
            (keys::VINA_EXHAUSTIVENESS, d.exhaustiveness.to_string()),
            (keys::VINA_CENTER, d.center.clone()),
            (keys::VINA_SIZE, d.size.clone()),
        ]);
        let paths = [
            (keys::VINA_PATH, &d.vina_path),
            (keys::OBABEL_PATH, &d.obabel_path),
            (keys::FPOCKET_PATH, &d.fpocket_path),
            (keys::ADMET_PATH, &d.admet_path),
        ];
        for (key, value) in paths {
            if let Some(v) = value {
                defaults.set(key, v);
            }
        }
        defaults
    }

    /// Build the settings chain: writable store → environment → config defaults.
    pub fn settings_chain(&self, store: Arc<MemorySettings>) -> CachedSettings {
        let sources: Vec<Arc<dyn SettingsSource>> = vec![
            store,
            Arc::new(EnvSettings),
            Arc::new(self.settings_defaults()),
        ];
        CachedSettings::new(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsProvider;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.docking.exhaustiveness, 8);
        assert_eq!(config.pipeline.max_molecules, 10);
        assert_eq!(config.pipeline.admet_top_k, 10);
        assert_eq!(config.stream.interval_ms, 2000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [docking]
            exhaustiveness = 4
            vina_path = "/opt/vina/bin/vina"

            [pipeline]
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.docking.exhaustiveness, 4);
        assert_eq!(config.docking.size, "20,20,20");
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.max_molecules, 10);
        assert_eq!(config.storage.poses_dir, PathBuf::from("storage/poses"));
    }

    #[test]
    fn test_store_overrides_config_defaults() {
        let mut config = Config::default();
        config.docking.vina_path = Some("/from/config/vina".to_string());
        let store = Arc::new(MemorySettings::new());
        let settings = config.settings_chain(store.clone());

        assert_eq!(settings.get("VINA_EXHAUSTIVENESS").as_deref(), Some("8"));

        store.set("VINA_EXHAUSTIVENESS", "32");
        settings.invalidate(&["VINA_EXHAUSTIVENESS"]);
        assert_eq!(settings.get("VINA_EXHAUSTIVENESS").as_deref(), Some("32"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("affinity.toml");
        std::fs::write(&path, "[stream]\ninterval_ms = 500\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.stream.interval_ms, 500);
        assert_eq!(config.stream.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_follows_config_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screening.toml");
        std::fs::write(
            &path,
            "[storage]\nposes_dir = \"/data/poses\"\n\n[pipeline]\nadmet_top_k = 3\n",
        )
        .unwrap();

        std::env::set_var("AFFINITY_CONFIG", &path);
        let loaded = Config::load();
        std::env::set_var("AFFINITY_CONFIG", dir.path().join("missing.toml"));
        let fallback = Config::load();
        std::env::remove_var("AFFINITY_CONFIG");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.storage.poses_dir, PathBuf::from("/data/poses"));
        assert_eq!(loaded.pipeline.admet_top_k, 3);
        assert_eq!(loaded.pipeline.max_molecules, 10);

        let fallback = fallback.unwrap();
        assert_eq!(fallback.pipeline.admet_top_k, 10);
        assert_eq!(fallback.storage.poses_dir, PathBuf::from("storage/poses"));
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[pipeline\nworkers = ").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
