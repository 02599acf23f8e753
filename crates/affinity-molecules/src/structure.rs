//! Protein structure reading (PDB / PDBQT fixed columns and mmCIF `_atom_site`).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use affinity_common::{Result, ScreeningError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub name: String,
    pub pos: [f64; 3],
    /// Came from a HETATM record.
    pub hetero: bool,
    /// Index into `Structure::residues`.
    pub residue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Residue {
    pub name: String,
    pub chain: String,
    pub seq: String,
    pub icode: String,
    pub model: usize,
    /// Taken from the residue's first atom record.
    pub hetero: bool,
    pub atoms: Vec<usize>,
}

impl Residue {
    /// Identifier such as `A:LYS42` or `B:GLY7A`.
    pub fn label(&self) -> String {
        format!("{}:{}{}{}", self.chain, self.name, self.seq, self.icode)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Structure {
    pub atoms: Vec<Atom>,
    pub residues: Vec<Residue>,
}

/// Fields of one atom record prior to residue grouping.
struct AtomRecord {
    name: String,
    res_name: String,
    chain: String,
    seq: String,
    icode: String,
    model: usize,
    hetero: bool,
    pos: [f64; 3],
}

impl Structure {
    /// Read a structure file, choosing the parser from the extension
    /// (`.cif`/`.mmcif`) or a leading `data_` block.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let structure = if ext == "cif" || ext == "mmcif" || contents.trim_start().starts_with("data_") {
            Self::from_mmcif_str(&contents)?
        } else {
            Self::from_pdb_str(&contents)
        };
        debug!(
            path = %path.display(),
            atoms = structure.atoms.len(),
            residues = structure.residues.len(),
            "Structure loaded"
        );
        Ok(structure)
    }

    /// Parse PDB or PDBQT text. Records with unreadable coordinates are skipped.
    pub fn from_pdb_str(contents: &str) -> Self {
        let mut records = Vec::new();
        let mut model = 1usize;
        let mut seen_model = false;

        for line in contents.lines() {
            if line.starts_with("MODEL") {
                if seen_model {
                    model += 1;
                }
                seen_model = true;
                continue;
            }
            let record = line.get(0..6).unwrap_or(line).trim_end();
            let hetero = match record {
                "ATOM" => false,
                "HETATM" => true,
                _ => continue,
            };
            let Some(pos) = parse_pdb_coords(line) else { continue };

            records.push(AtomRecord {
                name: column(line, 12, 16),
                res_name: column(line, 17, 20).to_ascii_uppercase(),
                chain: column(line, 21, 22),
                seq: column(line, 22, 26),
                icode: column(line, 26, 27),
                model,
                hetero,
                pos,
            });
        }

        Self::from_records(records)
    }

    /// Parse the `_atom_site` loop of an mmCIF file. Author fields are
    /// preferred over label fields, matching the PDB numbering.
    pub fn from_mmcif_str(contents: &str) -> Result<Self> {
        let mut lines = contents.lines().peekable();
        let mut tags: Vec<String> = Vec::new();

        while let Some(line) = lines.next() {
            if line.trim() != "loop_" {
                continue;
            }
            let mut loop_tags = Vec::new();
            while let Some(next) = lines.peek() {
                let t = next.trim();
                if t.starts_with('_') {
                    loop_tags.push(t.split_whitespace().next().unwrap_or(t).to_string());
                    lines.next();
                } else {
                    break;
                }
            }
            if loop_tags.first().is_some_and(|t| t.starts_with("_atom_site.")) {
                tags = loop_tags;
                break;
            }
        }

        if tags.is_empty() {
            return Ok(Self::default());
        }

        let index: HashMap<&str, usize> = tags
            .iter()
            .enumerate()
            .map(|(i, t)| (t.trim_start_matches("_atom_site."), i))
            .collect();
        let col = |names: &[&str]| names.iter().find_map(|n| index.get(n).copied());

        let (Some(x), Some(y), Some(z)) = (col(&["Cartn_x"]), col(&["Cartn_y"]), col(&["Cartn_z"])) else {
            return Err(ScreeningError::InvalidInput(
                "mmCIF _atom_site loop has no Cartesian coordinates".to_string(),
            ));
        };
        let group = col(&["group_PDB"]);
        let atom_name = col(&["auth_atom_id", "label_atom_id"]);
        let res_name = col(&["auth_comp_id", "label_comp_id"]);
        let chain = col(&["auth_asym_id", "label_asym_id"]);
        let seq = col(&["auth_seq_id", "label_seq_id"]);
        let icode = col(&["pdbx_PDB_ins_code"]);
        let model = col(&["pdbx_PDB_model_num"]);

        let mut records = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for line in lines {
            let t = line.trim();
            if t.starts_with('_') || t.starts_with("loop_") || t.starts_with("data_") || t.starts_with('#') {
                break;
            }
            pending.extend(tokenize_cif_line(t));
            if pending.len() < tags.len() {
                continue;
            }
            let row: Vec<String> = pending.drain(..tags.len()).collect();
            let field = |idx: Option<usize>| -> String {
                idx.and_then(|i| row.get(i))
                    .map(|v| if v == "?" || v == "." { String::new() } else { v.clone() })
                    .unwrap_or_default()
            };

            let coords = (row[x].parse::<f64>(), row[y].parse::<f64>(), row[z].parse::<f64>());
            let (Ok(px), Ok(py), Ok(pz)) = coords else { continue };

            records.push(AtomRecord {
                name: field(atom_name),
                res_name: field(res_name).to_ascii_uppercase(),
                chain: field(chain),
                seq: field(seq),
                icode: field(icode),
                model: field(model).parse().unwrap_or(1),
                hetero: field(group) == "HETATM",
                pos: [px, py, pz],
            });
        }

        Ok(Self::from_records(records))
    }

    fn from_records(records: Vec<AtomRecord>) -> Self {
        let mut structure = Structure::default();
        let mut lookup: HashMap<(usize, String, String, String, String), usize> = HashMap::new();

        for rec in records {
            let key = (
                rec.model,
                rec.chain.clone(),
                rec.seq.clone(),
                rec.icode.clone(),
                rec.res_name.clone(),
            );
            let residue_index = *lookup.entry(key).or_insert_with(|| {
                structure.residues.push(Residue {
                    name: rec.res_name.clone(),
                    chain: rec.chain.clone(),
                    seq: rec.seq.clone(),
                    icode: rec.icode.clone(),
                    model: rec.model,
                    hetero: rec.hetero,
                    atoms: Vec::new(),
                });
                structure.residues.len() - 1
            });

            let atom_index = structure.atoms.len();
            structure.atoms.push(Atom {
                name: rec.name,
                pos: rec.pos,
                hetero: rec.hetero,
                residue: residue_index,
            });
            structure.residues[residue_index].atoms.push(atom_index);
        }

        structure
    }

    pub fn hetero_coords(&self) -> Vec<[f64; 3]> {
        self.atoms.iter().filter(|a| a.hetero).map(|a| a.pos).collect()
    }

    pub fn all_coords(&self) -> Vec<[f64; 3]> {
        self.atoms.iter().map(|a| a.pos).collect()
    }
}

fn column(line: &str, start: usize, end: usize) -> String {
    let end = end.min(line.len());
    line.get(start..end).map(str::trim).unwrap_or("").to_string()
}

/// Read the fixed-column x/y/z fields (columns 31–54) of an atom record.
pub fn parse_pdb_coords(line: &str) -> Option<[f64; 3]> {
    let x = line.get(30..38)?.trim().parse().ok()?;
    let y = line.get(38..46)?.trim().parse().ok()?;
    let z = line.get(46..54)?.trim().parse().ok()?;
    Some([x, y, z])
}

fn tokenize_cif_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '\'' || c == '"' {
            chars.next();
            while let Some(ch) = chars.next() {
                // A quote only closes the token when followed by whitespace or end of line.
                if ch == c && chars.peek().map_or(true, |n| n.is_whitespace()) {
                    break;
                }
                token.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                token.push(ch);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Axis-aligned bounding box `(min, max)` of a coordinate set.
pub fn bounding_box(coords: &[[f64; 3]]) -> Option<([f64; 3], [f64; 3])> {
    let first = coords.first()?;
    let mut min = *first;
    let mut max = *first;
    for p in &coords[1..] {
        for i in 0..3 {
            min[i] = min[i].min(p[i]);
            max[i] = max[i].max(p[i]);
        }
    }
    Some((min, max))
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Format one fixed-column PDB atom record.
    pub fn atom_line(record: &str, serial: usize, name: &str, res: &str, chain: char, seq: i32, pos: [f64; 3]) -> String {
        format!(
            "{:<6}{:>5} {:<4} {:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00",
            record, serial, name, res, chain, seq, pos[0], pos[1], pos[2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::atom_line;
    use super::*;

    #[test]
    fn test_pdb_groups_atoms_into_residues() {
        let pdb = [
            atom_line("ATOM", 1, "N", "ALA", 'A', 1, [0.0, 0.0, 0.0]),
            atom_line("ATOM", 2, "CA", "ALA", 'A', 1, [1.0, 0.0, 0.0]),
            atom_line("ATOM", 3, "N", "LYS", 'A', 2, [2.0, 1.0, 0.0]),
            atom_line("HETATM", 4, "C1", "LIG", 'A', 101, [5.0, 5.0, 5.0]),
            "END".to_string(),
        ]
        .join("\n");

        let s = Structure::from_pdb_str(&pdb);
        assert_eq!(s.atoms.len(), 4);
        assert_eq!(s.residues.len(), 3);
        assert_eq!(s.residues[0].name, "ALA");
        assert_eq!(s.residues[0].atoms, vec![0, 1]);
        assert_eq!(s.residues[1].label(), "A:LYS2");
        assert!(s.residues[2].hetero);
        assert_eq!(s.hetero_coords(), vec![[5.0, 5.0, 5.0]]);
    }

    #[test]
    fn test_pdb_skips_unreadable_coordinates() {
        let good = atom_line("ATOM", 1, "CA", "GLY", 'A', 1, [1.0, 2.0, 3.0]);
        let bad = "ATOM      2  CA  GLY A   2      xxxxxxx  2.000   3.000";
        let s = Structure::from_pdb_str(&format!("{good}\n{bad}\n"));
        assert_eq!(s.atoms.len(), 1);
        assert_eq!(s.atoms[0].pos, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_pdb_models_are_distinct_residues() {
        let pdb = [
            "MODEL        1".to_string(),
            atom_line("ATOM", 1, "CA", "GLY", 'A', 1, [0.0, 0.0, 0.0]),
            "ENDMDL".to_string(),
            "MODEL        2".to_string(),
            atom_line("ATOM", 1, "CA", "GLY", 'A', 1, [0.5, 0.0, 0.0]),
            "ENDMDL".to_string(),
        ]
        .join("\n");
        let s = Structure::from_pdb_str(&pdb);
        assert_eq!(s.residues.len(), 2);
        assert_eq!(s.residues[1].model, 2);
    }

    #[test]
    fn test_mmcif_atom_site_loop() {
        let cif = r#"data_TEST
#
loop_
_atom_site.group_PDB
_atom_site.id
_atom_site.type_symbol
_atom_site.label_atom_id
_atom_site.label_comp_id
_atom_site.label_asym_id
_atom_site.label_seq_id
_atom_site.pdbx_PDB_ins_code
_atom_site.Cartn_x
_atom_site.Cartn_y
_atom_site.Cartn_z
_atom_site.auth_seq_id
_atom_site.auth_comp_id
_atom_site.auth_asym_id
_atom_site.auth_atom_id
_atom_site.pdbx_PDB_model_num
ATOM   1 N N   ALA A 1 ? 10.0 11.0 12.0 5 ALA A N   1
ATOM   2 C CA  ALA A 1 ? 10.5 11.5 12.5 5 ALA A CA  1
HETATM 3 O O   HOH C . ? 20.0 21.0 22.0 301 HOH C O 1
#
"#;
        let s = Structure::from_mmcif_str(cif).unwrap();
        assert_eq!(s.atoms.len(), 3);
        assert_eq!(s.residues.len(), 2);
        assert_eq!(s.residues[0].label(), "A:ALA5");
        assert!(s.residues[1].hetero);
        assert_eq!(s.atoms[2].pos, [20.0, 21.0, 22.0]);
    }

    #[test]
    fn test_cif_tokenizer_handles_quotes() {
        let tokens = tokenize_cif_line(r#"ATOM 1 C "C1'" 'A B' 1.0"#);
        assert_eq!(tokens, vec!["ATOM", "1", "C", "C1'", "A B", "1.0"]);
    }

    #[test]
    fn test_bounding_box() {
        let bb = bounding_box(&[[1.0, -2.0, 3.0], [-1.0, 4.0, 0.0]]).unwrap();
        assert_eq!(bb, ([-1.0, -2.0, 0.0], [1.0, 4.0, 3.0]));
        assert!(bounding_box(&[]).is_none());
    }
}
