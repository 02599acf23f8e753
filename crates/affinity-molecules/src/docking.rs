//! Molecular docking using AutoDock Vina.
//!
//! One `dock` call prepares the ligand (SMILES → 3-D PDBQT via OpenBabel),
//! prepares or reuses the receptor PDBQT, runs Vina against a search box and
//! scrapes the best affinity from the pose file, the log or the console.
//! Every failure is returned to the caller; nothing here aborts a run.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use affinity_common::settings::{keys, parse_triple, SettingsProvider};
use affinity_common::tools::{self, resolve_tool, run_tool};
use affinity_common::{Config, Result, ScreeningError};

use crate::pocket::Pocket;
use crate::smiles;

pub const DEFAULT_CENTER: [f64; 3] = [0.0, 0.0, 0.0];
pub const DEFAULT_SIZE: [f64; 3] = [20.0, 20.0, 20.0];
pub const DEFAULT_EXHAUSTIVENESS: u32 = 8;
pub const DEFAULT_MINIMIZE_STEPS: u32 = 200;

/// Docking search box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBox {
    pub center: [f64; 3],
    pub size: [f64; 3],
}

impl SearchBox {
    pub fn from_pocket(pocket: &Pocket) -> Self {
        Self {
            center: pocket.center,
            size: pocket.size,
        }
    }

    /// Box from `VINA_CENTER` / `VINA_SIZE`, each falling back independently.
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        Self {
            center: parse_triple(settings.get(keys::VINA_CENTER).as_deref(), DEFAULT_CENTER),
            size: parse_triple(settings.get(keys::VINA_SIZE).as_deref(), DEFAULT_SIZE),
        }
    }
}

/// A successful docking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockedPose {
    pub pose_path: PathBuf,
    /// Best affinity in kcal/mol, as reported by Vina (lower is better).
    pub score: f64,
    pub log_path: PathBuf,
}

#[async_trait]
pub trait DockingEngine: Send + Sync {
    /// Dock one SMILES against a structure. `None` uses the configured default box.
    async fn dock(&self, smiles: &str, structure_path: &Path, search_box: Option<&SearchBox>) -> Result<DockedPose>;
}

// ── Score extraction ─────────────────────────────────────────────────────────

pub type AffinityParser = fn(&str) -> Option<f64>;

fn vina_remark_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"REMARK\s+VINA\s+RESULT:\s*([-+]?\d+(?:\.\d+)?)").unwrap())
}

fn result_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"RESULT:\s*([-+]?\d+(?:\.\d+)?)").unwrap())
}

fn first_mode_row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*1\s+([-+]?\d+(?:\.\d+)?)").unwrap())
}

fn affinity_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Affinity:\s*([-+]?\d+(?:\.\d+)?)").unwrap())
}

fn first_capture(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// `REMARK VINA RESULT:` line written into pose files.
pub fn parse_vina_remark(text: &str) -> Option<f64> {
    first_capture(vina_remark_regex(), text)
}

/// Any `RESULT:` line.
pub fn parse_result_line(text: &str) -> Option<f64> {
    first_capture(result_line_regex(), text)
}

/// Row for mode 1 of the console results table.
pub fn parse_first_mode_row(text: &str) -> Option<f64> {
    first_capture(first_mode_row_regex(), text)
}

/// `Affinity:` label printed by score-only runs.
pub fn parse_affinity_label(text: &str) -> Option<f64> {
    first_capture(affinity_label_regex(), text)
}

/// Score parsers in the order they are tried.
pub const AFFINITY_PARSERS: &[(&str, AffinityParser)] = &[
    ("vina_remark", parse_vina_remark),
    ("result_line", parse_result_line),
    ("first_mode_row", parse_first_mode_row),
    ("affinity_label", parse_affinity_label),
];

/// First number produced by the parser chain.
pub fn extract_affinity(text: &str) -> Option<f64> {
    AFFINITY_PARSERS.iter().find_map(|(name, parse)| {
        let found = parse(text);
        if found.is_some() {
            debug!(parser = name, "Affinity parsed");
        }
        found
    })
}

// ── Artifacts ────────────────────────────────────────────────────────────────

fn short_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))[..10].to_string()
}

/// First 10 hex characters of the SHA-256 of the SMILES.
pub fn smiles_tag(smiles: &str) -> String {
    short_digest(smiles.as_bytes())
}

/// First 10 hex characters of the SHA-256 of the structure's full path.
/// Keeps receptors of equally named structures from different directories apart.
pub fn structure_tag(structure_path: &Path) -> String {
    short_digest(structure_path.to_string_lossy().as_bytes())
}

/// Files produced while docking one ligand against one structure.
///
/// The receptor is shared by every docking against the same structure path.
/// Ligand, pose and log carry `run_id`, so concurrent or repeated dockings of
/// the same SMILES never read each other's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub ligand_smiles: PathBuf,
    pub ligand: PathBuf,
    pub receptor: PathBuf,
    pub pose: PathBuf,
    pub log: PathBuf,
}

impl ArtifactPaths {
    pub fn new(poses_dir: &Path, structure_path: &Path, smiles: &str, run_id: &str) -> Self {
        let stem = structure_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "structure".to_string());
        let tag = smiles_tag(smiles);
        Self {
            ligand_smiles: poses_dir.join(format!("lig_{stem}_{tag}_{run_id}.smi")),
            ligand: poses_dir.join(format!("lig_{stem}_{tag}_{run_id}.pdbqt")),
            receptor: poses_dir.join(format!("rec_{stem}_{}.pdbqt", structure_tag(structure_path))),
            pose: poses_dir.join(format!("pose_{stem}_{tag}_{run_id}.pdbqt")),
            log: poses_dir.join(format!("vina_{stem}_{tag}_{run_id}.log")),
        }
    }
}

// ── Receptor cache ───────────────────────────────────────────────────────────

/// Converted receptor per structure path, shared by every job.
///
/// Concurrent callers for the same structure wait on one conversion. A failed
/// conversion is not cached, and an entry whose file has disappeared is
/// rebuilt.
#[derive(Debug, Default)]
pub struct ReceptorCache {
    entries: Mutex<HashMap<PathBuf, Arc<OnceCell<PathBuf>>>>,
}

impl ReceptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &Path) -> Arc<OnceCell<PathBuf>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(key.to_path_buf()).or_default().clone()
    }

    fn evict(&self, key: &Path, stale: &Arc<OnceCell<PathBuf>>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|cell| Arc::ptr_eq(cell, stale)) {
            entries.remove(key);
        }
    }

    pub async fn get_or_prepare<F, Fut>(&self, structure_path: &Path, prepare: F) -> Result<PathBuf>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<PathBuf>>,
    {
        let cell = self.cell(structure_path);
        let path = cell.get_or_try_init(&prepare).await?.clone();
        if path.exists() {
            return Ok(path);
        }

        warn!("Cached receptor {:?} is gone, preparing again", path);
        self.evict(structure_path, &cell);
        let cell = self.cell(structure_path);
        Ok(cell.get_or_try_init(&prepare).await?.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Vina engine ──────────────────────────────────────────────────────────────

/// Wrapper for OpenBabel preparation and AutoDock Vina execution.
pub struct VinaDockingEngine {
    settings: Arc<dyn SettingsProvider>,
    poses_dir: PathBuf,
    minimize_steps: u32,
    receptors: ReceptorCache,
}

impl VinaDockingEngine {
    pub fn new(settings: Arc<dyn SettingsProvider>, poses_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            poses_dir: poses_dir.into(),
            minimize_steps: DEFAULT_MINIMIZE_STEPS,
            receptors: ReceptorCache::new(),
        }
    }

    pub fn from_config(config: &Config, settings: Arc<dyn SettingsProvider>) -> Self {
        Self::new(settings, config.storage.poses_dir.clone()).with_minimize_steps(config.docking.minimize_steps)
    }

    pub fn with_minimize_steps(mut self, steps: u32) -> Self {
        self.minimize_steps = steps;
        self
    }

    pub fn receptor_cache(&self) -> &ReceptorCache {
        &self.receptors
    }

    fn exhaustiveness(&self) -> u32 {
        match self.settings.get(keys::VINA_EXHAUSTIVENESS) {
            None => DEFAULT_EXHAUSTIVENESS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!("Ignoring invalid {}={:?}", keys::VINA_EXHAUSTIVENESS, raw);
                    DEFAULT_EXHAUSTIVENESS
                }
            },
        }
    }

    /// SMILES → minimized 3-D PDBQT.
    pub async fn prepare_ligand(&self, smiles: &str, paths: &ArtifactPaths) -> Result<()> {
        smiles::validate(smiles).map_err(|e| ScreeningError::InvalidInput(format!("Invalid SMILES for ligand: {e}")))?;
        let obabel = resolve_tool(&tools::OBABEL, self.settings.as_ref())?;

        tokio::fs::write(&paths.ligand_smiles, format!("{}\n", smiles.trim())).await?;
        let steps = self.minimize_steps.to_string();
        let args: [&std::ffi::OsStr; 10] = [
            paths.ligand_smiles.as_os_str(),
            "-O".as_ref(),
            paths.ligand.as_os_str(),
            "--gen3d".as_ref(),
            "--minimize".as_ref(),
            "--ff".as_ref(),
            "UFF".as_ref(),
            "--steps".as_ref(),
            steps.as_ref(),
            "-h".as_ref(),
        ];
        run_tool(&obabel, args).await?.check("OpenBabel")?;

        ensure_written(&paths.ligand, "OpenBabel").await
    }

    /// Copy a PDBQT receptor or convert any other format, stripping waters
    /// and adding hydrogens. Written under a temporary name, then renamed.
    pub async fn prepare_receptor(&self, structure_path: &Path, out: &Path) -> Result<PathBuf> {
        let stem = out.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let tmp = out.with_file_name(format!("{}.{}.pdbqt", stem, Uuid::new_v4().simple()));

        if is_pdbqt(structure_path) {
            tokio::fs::copy(structure_path, &tmp).await?;
        } else {
            let obabel = resolve_tool(&tools::OBABEL, self.settings.as_ref())?;
            info!("Converting receptor {:?} with OpenBabel", structure_path);
            let args: [&std::ffi::OsStr; 5] = [
                structure_path.as_os_str(),
                "-O".as_ref(),
                tmp.as_os_str(),
                "-xr".as_ref(),
                "-xh".as_ref(),
            ];
            run_tool(&obabel, args).await?.check("OpenBabel")?;
            ensure_written(&tmp, "OpenBabel").await?;
        }

        tokio::fs::rename(&tmp, out).await?;
        Ok(out.to_path_buf())
    }

    async fn run_vina(&self, receptor: &Path, paths: &ArtifactPaths, search_box: &SearchBox) -> Result<f64> {
        let vina = resolve_tool(&tools::VINA, self.settings.as_ref())?;
        let [cx, cy, cz] = search_box.center;
        let [sx, sy, sz] = search_box.size;

        let mut args: Vec<OsString> = Vec::with_capacity(20);
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };
        push("--receptor", receptor.into());
        push("--ligand", paths.ligand.clone().into());
        push("--center_x", cx.to_string().into());
        push("--center_y", cy.to_string().into());
        push("--center_z", cz.to_string().into());
        push("--size_x", sx.to_string().into());
        push("--size_y", sy.to_string().into());
        push("--size_z", sz.to_string().into());
        push("--exhaustiveness", self.exhaustiveness().to_string().into());
        push("--out", paths.pose.clone().into());

        remove_if_present(&paths.pose).await?;
        remove_if_present(&paths.log).await?;

        info!("Running AutoDock Vina on {:?}", paths.ligand);
        let output = run_tool(&vina, &args).await?;

        if let Err(e) = tokio::fs::write(&paths.log, output.combined()).await {
            warn!("Failed to write Vina log {:?}: {}", paths.log, e);
        }
        let output = output.check("Vina")?;

        let from_pose = tokio::fs::read_to_string(&paths.pose)
            .await
            .ok()
            .and_then(|text| extract_affinity(&text));
        let score = match from_pose {
            Some(score) => Some(score),
            None => tokio::fs::read_to_string(&paths.log)
                .await
                .ok()
                .and_then(|text| extract_affinity(&text)),
        };
        let score = score.or_else(|| extract_affinity(&format!("{}\n{}", output.stdout, output.stderr)));

        score.ok_or_else(|| ScreeningError::UnparsableOutput {
            tool: "Vina".to_string(),
            log_path: paths.log.clone(),
        })
    }
}

#[async_trait]
impl DockingEngine for VinaDockingEngine {
    #[instrument(skip(self, structure_path, search_box), fields(structure = %structure_path.display()))]
    async fn dock(&self, smiles: &str, structure_path: &Path, search_box: Option<&SearchBox>) -> Result<DockedPose> {
        if !structure_path.exists() {
            return Err(ScreeningError::NotFound(format!("structure file {}", structure_path.display())));
        }
        let structure_path = tokio::fs::canonicalize(structure_path).await?;
        tokio::fs::create_dir_all(&self.poses_dir).await?;

        let run_id = Uuid::new_v4().simple().to_string();
        let paths = ArtifactPaths::new(&self.poses_dir, &structure_path, smiles, &run_id[..8]);
        let search_box = match search_box {
            Some(b) => *b,
            None => SearchBox::from_settings(self.settings.as_ref()),
        };

        self.prepare_ligand(smiles, &paths).await?;
        let (source, receptor_out) = (&structure_path, &paths.receptor);
        let receptor = self
            .receptors
            .get_or_prepare(source, move || self.prepare_receptor(source, receptor_out))
            .await?;
        let score = self.run_vina(&receptor, &paths, &search_box).await?;

        debug!(score, pose = %paths.pose.display(), "AutoDock Vina completed");
        Ok(DockedPose {
            pose_path: paths.pose,
            score,
            log_path: paths.log,
        })
    }
}

fn is_pdbqt(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("pdbqt"))
        .unwrap_or(false)
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn ensure_written(path: &Path, tool: &str) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(ScreeningError::ToolExecutionFailed {
            tool: tool.to_string(),
            detail: format!("no output written to {}", path.display()),
        }),
    }
}
