//! Pocket chemistry descriptors derived from the residues inside a search box.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pocket::Pocket;
use crate::structure::Structure;

/// Residue identifiers kept in the feature record.
pub const MAX_RESIDUE_IDS: usize = 50;

const STANDARD_AA: &[&str] = &[
    "ALA", "ARG", "ASN", "ASP", "CYS", "GLN", "GLU", "GLY", "HIS", "ILE",
    "LEU", "LYS", "MET", "PHE", "PRO", "SER", "THR", "TRP", "TYR", "VAL",
];
const HYDROPHOBIC: &[&str] = &["ALA", "VAL", "LEU", "ILE", "MET", "PHE", "TRP", "PRO"];
const AROMATIC: &[&str] = &["PHE", "TYR", "TRP", "HIS"];
const POSITIVE: &[&str] = &["LYS", "ARG", "HIS"];
const NEGATIVE: &[&str] = &["ASP", "GLU"];
const HBOND_DONOR: &[&str] = &["SER", "THR", "TYR", "LYS", "ARG", "HIS", "ASN", "GLN", "TRP", "CYS"];
const HBOND_ACCEPTOR: &[&str] = &["ASP", "GLU", "SER", "THR", "TYR", "HIS", "ASN", "GLN", "CYS"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PocketFeatures {
    /// Box volume in Å^3.
    pub pocket_volume: f64,
    pub center: [f64; 3],
    pub size: [f64; 3],
    pub residues_total: usize,
    /// Ordered map so serialization is stable.
    pub residue_counts: BTreeMap<String, usize>,
    pub hydrophobic_residues: usize,
    pub hydrophobic_fraction: f64,
    pub aromatic_residues: usize,
    pub positive_residues: usize,
    pub negative_residues: usize,
    pub net_charge: i64,
    pub hbond_donor_residues: usize,
    pub hbond_acceptor_residues: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub residues: Vec<String>,
}

fn in_box(p: &[f64; 3], min: &[f64; 3], max: &[f64; 3]) -> bool {
    (0..3).all(|i| min[i] <= p[i] && p[i] <= max[i])
}

/// Compute descriptors for the standard residues with at least one atom in
/// the pocket box. Returns `None` when the pocket's center or size is not
/// usable.
pub fn analyze(structure: &Structure, pocket: &Pocket) -> Option<PocketFeatures> {
    if !pocket.is_well_formed() {
        return None;
    }
    let (center, size) = (pocket.center, pocket.size);
    let min = [center[0] - size[0] / 2.0, center[1] - size[1] / 2.0, center[2] - size[2] / 2.0];
    let max = [center[0] + size[0] / 2.0, center[1] + size[1] / 2.0, center[2] + size[2] / 2.0];

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut ids = Vec::new();
    let (mut hydrophobic, mut aromatic, mut positive, mut negative, mut hbd, mut hba) = (0, 0, 0, 0, 0, 0);

    for residue in &structure.residues {
        if residue.hetero {
            continue;
        }
        let name = residue.name.as_str();
        if !STANDARD_AA.contains(&name) {
            continue;
        }
        let inside = residue
            .atoms
            .iter()
            .any(|&i| in_box(&structure.atoms[i].pos, &min, &max));
        if !inside {
            continue;
        }

        *counts.entry(name.to_string()).or_insert(0) += 1;
        ids.push(residue.label());

        if HYDROPHOBIC.contains(&name) { hydrophobic += 1; }
        if AROMATIC.contains(&name) { aromatic += 1; }
        if POSITIVE.contains(&name) { positive += 1; }
        if NEGATIVE.contains(&name) { negative += 1; }
        if HBOND_DONOR.contains(&name) { hbd += 1; }
        if HBOND_ACCEPTOR.contains(&name) { hba += 1; }
    }

    let total: usize = counts.values().sum();
    let hydrophobic_fraction = if total > 0 { hydrophobic as f64 / total as f64 } else { 0.0 };
    ids.truncate(MAX_RESIDUE_IDS);

    Some(PocketFeatures {
        pocket_volume: size[0] * size[1] * size[2],
        center,
        size,
        residues_total: total,
        residue_counts: counts,
        hydrophobic_residues: hydrophobic,
        hydrophobic_fraction,
        aromatic_residues: aromatic,
        positive_residues: positive,
        negative_residues: negative,
        net_charge: positive as i64 - negative as i64,
        hbond_donor_residues: hbd,
        hbond_acceptor_residues: hba,
        residues: ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::fixtures::atom_line;

    fn sample() -> Structure {
        Structure::from_pdb_str(&[
            atom_line("ATOM", 1, "CA", "LEU", 'A', 10, [0.0, 0.0, 0.0]),
            atom_line("ATOM", 2, "CA", "LYS", 'A', 11, [1.0, 1.0, 1.0]),
            atom_line("ATOM", 3, "CA", "ASP", 'A', 12, [-1.0, 0.5, 0.0]),
            atom_line("ATOM", 4, "CA", "ASP", 'A', 13, [2.0, 0.0, 0.0]),
            atom_line("ATOM", 5, "CA", "PHE", 'A', 14, [30.0, 30.0, 30.0]),
            atom_line("ATOM", 6, "CB", "PHE", 'A', 14, [1.5, 0.0, 0.0]),
            atom_line("HETATM", 7, "O", "HOH", 'A', 200, [0.0, 0.0, 0.5]),
            atom_line("ATOM", 8, "CA", "MSE", 'A', 15, [0.0, 0.0, 0.2]),
        ].join("\n"))
    }

    #[test]
    fn test_counts_residues_inside_box() {
        let pocket = Pocket::new([0.0, 0.0, 0.0], [6.0, 6.0, 6.0], "test");
        let f = analyze(&sample(), &pocket).unwrap();

        assert_eq!(f.residues_total, 5);
        assert_eq!(f.residue_counts.get("ASP"), Some(&2));
        assert_eq!(f.hydrophobic_residues, 2);
        assert!((f.hydrophobic_fraction - 0.4).abs() < 1e-12);
        assert_eq!(f.aromatic_residues, 1);
        assert_eq!(f.positive_residues, 1);
        assert_eq!(f.negative_residues, 2);
        assert_eq!(f.net_charge, -1);
        assert_eq!(f.hbond_donor_residues, 1);
        assert_eq!(f.hbond_acceptor_residues, 2);
        assert_eq!(f.pocket_volume, 216.0);
        assert_eq!(f.residues[0], "A:LEU10");
        assert!(!f.residues.iter().any(|r| r.contains("HOH") || r.contains("MSE")));
    }

    #[test]
    fn test_empty_box_has_no_division_by_zero() {
        let pocket = Pocket::new([100.0, 100.0, 100.0], [2.0, 2.0, 2.0], "test");
        let f = analyze(&sample(), &pocket).unwrap();
        assert_eq!(f.residues_total, 0);
        assert_eq!(f.hydrophobic_fraction, 0.0);
        assert!(f.residues.is_empty());
    }

    #[test]
    fn test_malformed_pocket_yields_none() {
        let pocket = Pocket::new([f64::NAN, 0.0, 0.0], [2.0, 2.0, 2.0], "test");
        assert!(analyze(&sample(), &pocket).is_none());
        let pocket = Pocket::new([0.0, 0.0, 0.0], [-2.0, 2.0, 2.0], "test");
        assert!(analyze(&sample(), &pocket).is_none());
    }

    #[test]
    fn test_residue_ids_are_truncated() {
        let lines: Vec<String> = (0..80)
            .map(|i| atom_line("ATOM", i + 1, "CA", "GLY", 'B', i as i32 + 1, [0.0, 0.0, 0.0]))
            .collect();
        let s = Structure::from_pdb_str(&lines.join("\n"));
        let f = analyze(&s, &Pocket::new([0.0; 3], [1.0; 3], "test")).unwrap();
        assert_eq!(f.residues_total, 80);
        assert_eq!(f.residues.len(), MAX_RESIDUE_IDS);
    }

    #[test]
    fn test_analysis_is_byte_for_byte_repeatable() {
        let s = sample();
        let pocket = Pocket::new([0.0, 0.0, 0.0], [6.0, 6.0, 6.0], "test");
        let a = serde_json::to_vec(&analyze(&s, &pocket)).unwrap();
        let b = serde_json::to_vec(&analyze(&s, &pocket)).unwrap();
        assert_eq!(a, b);
    }
}
