//! Binding pocket detection: fpocket when installed, bounding-box heuristic otherwise.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use affinity_common::settings::SettingsProvider;
use affinity_common::tools::{self, resolve_tool, run_tool};
use affinity_common::Result;

use crate::features::PocketFeatures;
use crate::structure::{bounding_box, parse_pdb_coords, Structure};

/// Margin added to every box dimension, in Å.
pub const POCKET_PADDING: f64 = 4.0;

pub const METHOD_FPOCKET: &str = "fpocket";
pub const METHOD_HEURISTIC: &str = "bbox_heuristic";

/// Top-pocket atom files inside an fpocket output directory, in lookup order.
const FPOCKET_TOP_POCKET_FILES: &[&str] = &["pockets/pocket1_atm.pdb", "pockets/pocket0/pocket.pqr"];

/// An axis-aligned search box approximating a binding site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pocket {
    pub center: [f64; 3],
    /// Full box dimensions.
    pub size: [f64; 3],
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<PocketFeatures>,
}

impl Pocket {
    pub fn new(center: [f64; 3], size: [f64; 3], method: &str) -> Self {
        Self {
            center,
            size,
            method: method.to_string(),
            note: None,
            features: None,
        }
    }

    /// A copy of this pocket carrying `features`.
    pub fn with_features(&self, features: PocketFeatures) -> Self {
        Self {
            features: Some(features),
            ..self.clone()
        }
    }

    /// Center and size are finite and the size is non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.center.iter().all(|v| v.is_finite())
            && self.size.iter().all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Center and padded size of the bounding box around `coords`.
pub fn padded_box(coords: &[[f64; 3]]) -> Option<([f64; 3], [f64; 3])> {
    let (min, max) = bounding_box(coords)?;
    let mut center = [0.0; 3];
    let mut size = [0.0; 3];
    for i in 0..3 {
        center[i] = (min[i] + max[i]) / 2.0;
        size[i] = (max[i] - min[i]) + POCKET_PADDING;
    }
    Some((center, size))
}

#[async_trait]
pub trait PocketDetector: Send + Sync {
    /// Candidate pockets, best first. Empty when nothing usable was found.
    async fn detect(&self, structure_path: &Path) -> Result<Vec<Pocket>>;
}

/// Coarse single-pocket detector: padded bounding box over heteroatoms when
/// present, otherwise over the whole structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicDetector;

impl HeuristicDetector {
    pub fn detect_in(&self, structure: &Structure) -> Vec<Pocket> {
        let het = structure.hetero_coords();
        let coords = if het.is_empty() { structure.all_coords() } else { het };

        match padded_box(&coords) {
            Some((center, size)) => {
                let mut pocket = Pocket::new(center, size, METHOD_HEURISTIC);
                pocket.note = Some("Coarse pocket (consider installing fpocket for detailed pockets)".to_string());
                vec![pocket]
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl PocketDetector for HeuristicDetector {
    async fn detect(&self, structure_path: &Path) -> Result<Vec<Pocket>> {
        let structure = Structure::read(structure_path)?;
        Ok(self.detect_in(&structure))
    }
}

/// Wrapper for fpocket execution, falling back to `HeuristicDetector`.
pub struct FpocketDetector {
    settings: Arc<dyn SettingsProvider>,
    fallback: HeuristicDetector,
}

impl FpocketDetector {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            settings,
            fallback: HeuristicDetector,
        }
    }

    /// Run fpocket and box its top pocket. `None` means "fall back".
    async fn run_fpocket(&self, structure_path: &Path) -> Option<Pocket> {
        let exe = match resolve_tool(&tools::FPOCKET, self.settings.as_ref()) {
            Ok(exe) => exe,
            Err(e) => {
                debug!("{}", e);
                return None;
            }
        };

        info!("Running fpocket on {:?}", structure_path);
        let output = match run_tool(&exe, [Path::new("-f"), structure_path]).await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                warn!("fpocket exited with {:?}: {}", out.exit_code, out.stderr.trim());
                return None;
            }
            Err(e) => {
                warn!("fpocket could not be started: {}", e);
                return None;
            }
        };
        debug!(stdout_len = output.stdout.len(), "fpocket completed");

        let pocket_file = output_dirs(structure_path)
            .into_iter()
            .flat_map(|dir| FPOCKET_TOP_POCKET_FILES.iter().map(move |f| dir.join(f)))
            .find(|p| p.exists());
        let Some(pocket_file) = pocket_file else {
            warn!("fpocket output directory or top pocket file not found for {:?}", structure_path);
            return None;
        };

        let contents = match tokio::fs::read_to_string(&pocket_file).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {:?}: {}", pocket_file, e);
                return None;
            }
        };

        let (center, size) = padded_box(&pocket_atom_coords(&contents))?;
        Some(Pocket::new(center, size, METHOD_FPOCKET))
    }
}

#[async_trait]
impl PocketDetector for FpocketDetector {
    async fn detect(&self, structure_path: &Path) -> Result<Vec<Pocket>> {
        if let Some(pocket) = self.run_fpocket(structure_path).await {
            info!(center = ?pocket.center, size = ?pocket.size, "fpocket pocket selected");
            return Ok(vec![pocket]);
        }
        self.fallback.detect(structure_path).await
    }
}

/// fpocket writes `<stem>_out` next to its input; some builds keep the extension.
fn output_dirs(structure_path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(stem) = structure_path.file_stem() {
        dirs.push(structure_path.with_file_name(format!("{}_out", stem.to_string_lossy())));
    }
    if let Some(name) = structure_path.file_name() {
        dirs.push(structure_path.with_file_name(format!("{}_out", name.to_string_lossy())));
    }
    dirs
}

/// Coordinates of every ATOM/HETATM record with readable fixed-column coordinates.
fn pocket_atom_coords(contents: &str) -> Vec<[f64; 3]> {
    contents
        .lines()
        .filter(|l| l.starts_with("ATOM") || l.starts_with("HETATM"))
        .filter_map(parse_pdb_coords)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::fixtures::atom_line;
    use affinity_common::settings::{CachedSettings, MemorySettings, SettingsSource};

    fn approx(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    fn write_structure(dir: &Path, lines: &[String]) -> PathBuf {
        let path = dir.join("target.pdb");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn settings_with(values: &[(&str, &str)]) -> Arc<dyn SettingsProvider> {
        let store: Arc<dyn SettingsSource> = Arc::new(MemorySettings::with_values(values.iter().copied()));
        Arc::new(CachedSettings::new(vec![store]))
    }

    #[test]
    fn test_heuristic_without_heteroatoms_boxes_all_atoms() {
        let s = Structure::from_pdb_str(&[
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, [0.0, 0.0, 0.0]),
            atom_line("ATOM", 2, "CA", "GLY", 'A', 2, [10.0, 4.0, -2.0]),
        ].join("\n"));

        let pockets = HeuristicDetector.detect_in(&s);
        assert_eq!(pockets.len(), 1);
        let p = &pockets[0];
        assert_eq!(p.method, METHOD_HEURISTIC);
        assert!(p.note.is_some());
        assert!(approx(p.center, [5.0, 2.0, -1.0]));
        assert!(approx(p.size, [14.0, 8.0, 6.0]));
    }

    #[test]
    fn test_heuristic_prefers_heteroatoms() {
        let s = Structure::from_pdb_str(&[
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, [-50.0, -50.0, -50.0]),
            atom_line("HETATM", 2, "C1", "LIG", 'A', 900, [1.0, 1.0, 1.0]),
            atom_line("HETATM", 3, "C2", "LIG", 'A', 900, [3.0, 1.0, 1.0]),
        ].join("\n"));

        let p = &HeuristicDetector.detect_in(&s)[0];
        assert!(approx(p.center, [2.0, 1.0, 1.0]));
        assert!(approx(p.size, [6.0, 4.0, 4.0]));
    }

    #[test]
    fn test_heuristic_empty_structure_has_no_pockets() {
        let s = Structure::from_pdb_str("HEADER    EMPTY\nEND\n");
        assert!(HeuristicDetector.detect_in(&s).is_empty());
    }

    #[tokio::test]
    async fn test_fpocket_missing_falls_back_to_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_structure(dir.path(), &[
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, [0.0, 0.0, 0.0]),
            atom_line("ATOM", 2, "CA", "GLY", 'A', 2, [2.0, 2.0, 2.0]),
        ]);
        let settings = settings_with(&[("FPOCKET_PATH", "/no/such/fpocket")]);

        let pockets = FpocketDetector::new(settings).detect(&path).await.unwrap();
        assert_eq!(pockets.len(), 1);
        assert_eq!(pockets[0].method, METHOD_HEURISTIC);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fpocket_top_pocket_is_boxed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_structure(dir.path(), &[
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, [0.0, 0.0, 0.0]),
        ]);

        let fixture = dir.path().join("pocket1_atm.pdb");
        std::fs::write(&fixture, [
            "HEADER    fpocket pocket 1".to_string(),
            atom_line("ATOM", 10, "CB", "LEU", 'A', 30, [1.0, 2.0, 3.0]),
            atom_line("ATOM", 11, "CD1", "LEU", 'A', 30, [3.0, 6.0, 7.0]),
        ].join("\n")).unwrap();

        let script = crate::testing::write_script(
            dir.path(),
            "fpocket",
            &format!(
                "out=\"${{2%.*}}_out/pockets\"\nmkdir -p \"$out\"\ncp '{}' \"$out/pocket1_atm.pdb\"\n",
                fixture.display()
            ),
        );
        let settings = settings_with(&[("FPOCKET_PATH", script.to_str().unwrap())]);

        let pockets = FpocketDetector::new(settings).detect(&path).await.unwrap();
        assert_eq!(pockets.len(), 1);
        let p = &pockets[0];
        assert_eq!(p.method, METHOD_FPOCKET);
        assert!(approx(p.center, [2.0, 4.0, 5.0]));
        assert!(approx(p.size, [6.0, 8.0, 8.0]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fpocket_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_structure(dir.path(), &[
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, [0.0, 0.0, 0.0]),
        ]);
        let script = crate::testing::write_script(dir.path(), "fpocket", "echo boom >&2\nexit 1\n");
        let settings = settings_with(&[("FPOCKET_PATH", script.to_str().unwrap())]);

        let pockets = FpocketDetector::new(settings).detect(&path).await.unwrap();
        assert_eq!(pockets[0].method, METHOD_HEURISTIC);
        assert!(approx(pockets[0].size, [4.0, 4.0, 4.0]));
    }
}
