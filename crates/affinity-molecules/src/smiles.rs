//! SMILES syntax validation.
//!
//! Checks the linear notation well enough to reject strings the conformer
//! generator would choke on: atom tokens (organic subset and bracket atoms),
//! bonds, branches, ring closures (`1`..`9`, `%nn`) and `.`-separated
//! components. Valence and aromaticity are left to the converter.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SMILES at position {position}: {reason}")]
pub struct SmilesError {
    pub position: usize,
    pub reason: String,
}

impl SmilesError {
    fn at(position: usize, reason: impl Into<String>) -> Self {
        Self { position, reason: reason.into() }
    }
}

/// Counts gathered while validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmilesSummary {
    pub atoms: usize,
    pub ring_closures: usize,
    pub components: usize,
}

fn bracket_atom_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // isotope? symbol chirality? hcount? charge? class?
        Regex::new(
            r"^(\d+)?(\*|[A-Z][a-z]?|se|as|te|[bcnops])(@@?|@(?:TH|AL)[12]|@SP[1-3]|@(?:TB|OH)\d{1,2})?(H\d*)?([+-]{1,2}|[+-]\d+)?(:\d+)?$",
        )
        .unwrap()
    })
}

/// Validate a SMILES string. Anything after the first whitespace is treated
/// as a name and ignored.
pub fn validate(input: &str) -> Result<SmilesSummary, SmilesError> {
    let smiles = input.split_whitespace().next().unwrap_or("");
    if smiles.is_empty() {
        return Err(SmilesError::at(0, "empty string"));
    }

    let chars: Vec<char> = smiles.chars().collect();
    let mut i = 0;
    let mut has_atom = false;
    let mut pending_bond: Option<usize> = None;
    let mut branches: Vec<(usize, usize)> = Vec::new();
    let mut open_rings: HashSet<u32> = HashSet::new();
    let mut summary = SmilesSummary { atoms: 0, ring_closures: 0, components: 1 };

    while i < chars.len() {
        let c = chars[i];
        match c {
            'B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I' | 'b' | 'c' | 'n' | 'o' | 'p' | 's' | '*' => {
                if (c == 'C' && chars.get(i + 1) == Some(&'l')) || (c == 'B' && chars.get(i + 1) == Some(&'r')) {
                    i += 1;
                }
                summary.atoms += 1;
                has_atom = true;
                pending_bond = None;
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|off| i + off)
                    .ok_or_else(|| SmilesError::at(i, "unclosed bracket atom"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                if !bracket_atom_regex().is_match(&inner) {
                    return Err(SmilesError::at(i, format!("malformed bracket atom [{inner}]")));
                }
                i = close;
                summary.atoms += 1;
                has_atom = true;
                pending_bond = None;
            }
            '-' | '=' | '#' | '$' | ':' | '/' | '\\' => {
                if !has_atom {
                    return Err(SmilesError::at(i, format!("bond '{c}' has no preceding atom")));
                }
                if pending_bond.is_some() {
                    return Err(SmilesError::at(i, "consecutive bond symbols"));
                }
                pending_bond = Some(i);
            }
            '0'..='9' | '%' => {
                if !has_atom {
                    return Err(SmilesError::at(i, "ring closure has no preceding atom"));
                }
                let label = if c == '%' {
                    let digits: String = chars.iter().skip(i + 1).take(2).collect();
                    if digits.len() != 2 || !digits.chars().all(|d| d.is_ascii_digit()) {
                        return Err(SmilesError::at(i, "'%' must be followed by two digits"));
                    }
                    i += 2;
                    digits.parse::<u32>().unwrap_or_default()
                } else {
                    c.to_digit(10).unwrap_or_default()
                };
                if open_rings.remove(&label) {
                    summary.ring_closures += 1;
                } else {
                    open_rings.insert(label);
                }
                pending_bond = None;
            }
            '(' => {
                if !has_atom {
                    return Err(SmilesError::at(i, "branch has no preceding atom"));
                }
                if pending_bond.is_some() {
                    return Err(SmilesError::at(i, "bond symbol before branch"));
                }
                branches.push((i, summary.atoms));
            }
            ')' => {
                let (_, atoms_at_open) = branches
                    .pop()
                    .ok_or_else(|| SmilesError::at(i, "unbalanced ')'"))?;
                if pending_bond.is_some() {
                    return Err(SmilesError::at(i, "branch ends with a bond"));
                }
                if summary.atoms == atoms_at_open {
                    return Err(SmilesError::at(i, "empty branch"));
                }
            }
            '.' => {
                if !has_atom || pending_bond.is_some() || !branches.is_empty() {
                    return Err(SmilesError::at(i, "misplaced '.'"));
                }
                has_atom = false;
                summary.components += 1;
            }
            other => {
                return Err(SmilesError::at(i, format!("unexpected character '{other}'")));
            }
        }
        i += 1;
    }

    if let Some(pos) = pending_bond {
        return Err(SmilesError::at(pos, "dangling bond"));
    }
    if let Some((pos, _)) = branches.last() {
        return Err(SmilesError::at(*pos, "unclosed branch"));
    }
    if !open_rings.is_empty() {
        let mut labels: Vec<u32> = open_rings.into_iter().collect();
        labels.sort_unstable();
        return Err(SmilesError::at(chars.len(), format!("unclosed ring bond(s) {labels:?}")));
    }
    if !has_atom {
        return Err(SmilesError::at(chars.len(), "ends without an atom"));
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_molecules() {
        let aspirin = validate("CC(=O)OC1=CC=CC=C1C(=O)O").unwrap();
        assert_eq!(aspirin.atoms, 13);
        assert_eq!(aspirin.ring_closures, 1);

        assert!(validate("c1ccccc1Cl").is_ok());
        assert!(validate("C1=CC=CC=C1S(=O)(=O)O").is_ok());
        assert!(validate("[NH4+].[Cl-]").unwrap().components == 2);
        assert!(validate("C[C@@H](N)C(=O)O").is_ok());
        assert!(validate("[13CH4]").is_ok());
        assert!(validate("C%10CCCCC%10").is_ok());
        assert!(validate("F/C=C/F").is_ok());
        assert!(validate("CCO ethanol").is_ok());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(validate("").is_err());
        assert!(validate("   ").is_err());
        assert!(validate("C1CC").is_err());
        assert!(validate("CC(C").is_err());
        assert!(validate("CC)C").is_err());
        assert!(validate("C()C").is_err());
        assert!(validate("CC=").is_err());
        assert!(validate("=CC").is_err());
        assert!(validate("C==C").is_err());
        assert!(validate("C[Xx").is_err());
        assert!(validate("C[]C").is_err());
        assert!(validate("C.").is_err());
        assert!(validate("not a smiles").is_err());
    }

    #[test]
    fn test_error_reports_position() {
        let err = validate("CCQ").unwrap_err();
        assert_eq!(err.position, 2);
        assert!(err.to_string().contains("unexpected character 'Q'"));
    }
}
