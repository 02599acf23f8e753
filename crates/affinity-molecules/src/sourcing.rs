//! Candidate sourcing: reuse the owner's stored molecules, then top up from a
//! generator biased by the pocket.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use affinity_common::Result;

use crate::ligand::{Candidate, CandidateOrigin, CandidateRepository};
use crate::pocket::Pocket;

/// Produces new candidate SMILES for a target.
#[async_trait]
pub trait MoleculeGenerator: Send + Sync {
    /// Up to `count` SMILES strings. Returning fewer is allowed.
    async fn generate(&self, target: Option<&str>, count: usize, pocket: Option<&Pocket>) -> Result<Vec<String>>;
}

const BASE_SCAFFOLD: &str = "C1=CC=CC=C1";

const POLAR: &[&str] = &["O", "N", "F", "Cl"];
const HYDROPHOBIC: &[&str] = &["C", "CC", "CCC"];
const HYDROGEN_BOND: &[&str] = &["NO", "ON", "CN", "NC"];
const ACIDIC: &[&str] = &["C(=O)O", "S(=O)(=O)O"];
const BASIC: &[&str] = &["N", "CN", "CCN"];

/// Lightweight generator that decorates a benzene scaffold with substituents
/// chosen from the pocket's size and chemistry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstituentGenerator;

impl SubstituentGenerator {
    /// Ordered, de-duplicated substituent list for a target and pocket.
    pub fn substituents(&self, has_target: bool, pocket: Option<&Pocket>) -> Vec<&'static str> {
        let mut variants: Vec<&'static str> = if has_target { POLAR.to_vec() } else { HYDROPHOBIC.to_vec() };

        let Some(pocket) = pocket else {
            return variants;
        };
        let features = pocket.features.as_ref();

        let box_volume = pocket.size.iter().product::<f64>();
        let volume = features
            .map(|f| f.pocket_volume)
            .or_else(|| box_volume.is_finite().then_some(box_volume));

        if let Some(volume) = volume {
            variants = if volume < 800.0 {
                [&["O", "N", "F"][..], HYDROGEN_BOND].concat()
            } else if volume > 3000.0 {
                vec!["CC", "CCC", "CCO", "CCN", "CCl"]
            } else {
                vec!["O", "N", "Cl", "CO", "CN"]
            };
        }

        if let Some(f) = features {
            if f.hydrophobic_fraction >= 0.6 {
                variants = vec!["C", "CC", "CCC", "Cl", "F", "CCl"];
            } else if f.hydrophobic_fraction <= 0.3 {
                variants = [&["O", "N", "CO", "CN"][..], HYDROGEN_BOND].concat();
            }

            // Counter-charge the pocket.
            if f.net_charge <= -1 {
                variants = [BASIC, &variants[..]].concat();
            } else if f.net_charge >= 1 {
                variants = [ACIDIC, &variants[..]].concat();
            }

            if f.hbond_donor_residues > f.hbond_acceptor_residues {
                variants = [&["O", "CO", "C(=O)O", "C#N"][..], &variants[..]].concat();
            } else if f.hbond_acceptor_residues > f.hbond_donor_residues {
                variants = [&["N", "CN", "NC"][..], &variants[..]].concat();
            }
        }

        if pocket.method.to_lowercase().contains("pocket") {
            variants = [&["O", "N", "F"][..], HYDROGEN_BOND, &variants[..]].concat();
        }

        let mut seen = HashSet::new();
        variants.retain(|v| seen.insert(*v));
        variants
    }
}

#[async_trait]
impl MoleculeGenerator for SubstituentGenerator {
    async fn generate(&self, target: Option<&str>, count: usize, pocket: Option<&Pocket>) -> Result<Vec<String>> {
        let variants = self.substituents(target.is_some(), pocket);
        debug!(count, variants = variants.len(), "Generating scaffold variants");
        Ok((0..count)
            .map(|i| format!("{}{}", BASE_SCAFFOLD, variants[i % variants.len()]))
            .collect())
    }
}

/// Assembles the candidate set for one run.
pub struct MoleculeSourcer {
    candidates: Arc<dyn CandidateRepository>,
    generator: Arc<dyn MoleculeGenerator>,
}

impl MoleculeSourcer {
    pub fn new(candidates: Arc<dyn CandidateRepository>, generator: Arc<dyn MoleculeGenerator>) -> Self {
        Self { candidates, generator }
    }

    /// Up to `target_count` candidates: the owner's most recent stored ones,
    /// then freshly generated ones for the shortfall. Generated candidates are
    /// persisted before they are returned.
    pub async fn source(
        &self,
        owner_id: Uuid,
        protein_id: Uuid,
        target_count: usize,
        pocket: Option<&Pocket>,
    ) -> Result<Vec<Candidate>> {
        let mut selected: Vec<Candidate> = self
            .candidates
            .list_recent_for_owner(owner_id, target_count)
            .await?
            .into_iter()
            .map(|mut c| {
                c.origin = CandidateOrigin::Existing;
                c
            })
            .collect();

        let need = target_count.saturating_sub(selected.len());
        if need > 0 {
            let target = protein_id.to_string();
            let smiles = self.generator.generate(Some(&target), need, pocket).await?;
            for s in smiles.into_iter().take(need) {
                let candidate = Candidate::new(&s, owner_id, CandidateOrigin::Generated).for_protein(protein_id);
                selected.push(self.candidates.insert(candidate).await?);
            }
        }

        info!(
            existing = selected.iter().filter(|c| c.origin == CandidateOrigin::Existing).count(),
            total = selected.len(),
            "Candidates sourced"
        );
        Ok(selected)
    }
}
