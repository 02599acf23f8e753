//! Scoring and ranking of docked candidates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admet::{AdmetError, AdmetPrediction};
use crate::docking::DockedPose;
use crate::ligand::Candidate;

/// Result of docking one candidate: a pose and score, or an error. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DockOutcome {
    Docked {
        candidate_id: Uuid,
        smiles: String,
        /// kcal/mol, lower is better.
        score: f64,
        pose_path: PathBuf,
        log_path: PathBuf,
    },
    Failed {
        candidate_id: Uuid,
        smiles: String,
        error: String,
    },
}

impl DockOutcome {
    pub fn docked(candidate: &Candidate, pose: DockedPose) -> Self {
        DockOutcome::Docked {
            candidate_id: candidate.id,
            smiles: candidate.smiles.clone(),
            score: pose.score,
            pose_path: pose.pose_path,
            log_path: pose.log_path,
        }
    }

    pub fn failed(candidate: &Candidate, error: impl ToString) -> Self {
        DockOutcome::Failed {
            candidate_id: candidate.id,
            smiles: candidate.smiles.clone(),
            error: error.to_string(),
        }
    }

    pub fn is_docked(&self) -> bool {
        matches!(self, DockOutcome::Docked { .. })
    }
}

/// A successfully docked candidate, as carried into property scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate_id: Uuid,
    pub smiles: String,
    pub score: f64,
    pub pose_path: PathBuf,
}

/// Successful dockings, best (most negative) score first. Ties keep input order.
pub fn rank_successes(outcomes: &[DockOutcome]) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = outcomes
        .iter()
        .filter_map(|o| match o {
            DockOutcome::Docked { candidate_id, smiles, score, pose_path, .. } => Some(RankedCandidate {
                candidate_id: *candidate_id,
                smiles: smiles.clone(),
                score: *score,
                pose_path: pose_path.clone(),
            }),
            DockOutcome::Failed { .. } => None,
        })
        .collect();
    ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
    ranked
}

/// The `top_k` best-ranked successes.
pub fn select_for_admet(outcomes: &[DockOutcome], top_k: usize) -> Vec<RankedCandidate> {
    let mut ranked = rank_successes(outcomes);
    ranked.truncate(top_k);
    ranked
}

/// Result of property scoring for one docked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PropertyOutcome {
    Scored {
        candidate_id: Uuid,
        smiles: String,
        docking_score: f64,
        solubility: f64,
        toxicity: f64,
        clearance: f64,
    },
    Failed {
        candidate_id: Uuid,
        smiles: String,
        docking_score: f64,
        error: String,
    },
}

impl PropertyOutcome {
    /// Fold a prediction into an outcome, filling unreported properties with 0.0.
    pub fn from_prediction(candidate: &RankedCandidate, prediction: Result<AdmetPrediction, AdmetError>) -> Self {
        match prediction {
            Ok(p) => {
                let (solubility, toxicity, clearance) = p.values_or_zero();
                PropertyOutcome::Scored {
                    candidate_id: candidate.candidate_id,
                    smiles: candidate.smiles.clone(),
                    docking_score: candidate.score,
                    solubility,
                    toxicity,
                    clearance,
                }
            }
            Err(e) => PropertyOutcome::Failed {
                candidate_id: candidate.candidate_id,
                smiles: candidate.smiles.clone(),
                docking_score: candidate.score,
                error: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ligand::CandidateOrigin;

    fn candidate(smiles: &str) -> Candidate {
        Candidate::new(smiles, Uuid::new_v4(), CandidateOrigin::Generated)
    }

    fn docked(smiles: &str, score: f64) -> DockOutcome {
        DockOutcome::docked(
            &candidate(smiles),
            DockedPose {
                pose_path: PathBuf::from(format!("pose_{smiles}.pdbqt")),
                score,
                log_path: PathBuf::from(format!("vina_{smiles}.log")),
            },
        )
    }

    #[test]
    fn test_rank_ascending_skips_failures() {
        let outcomes = vec![
            docked("A", -5.0),
            DockOutcome::failed(&candidate("B"), "Vina failed: boom"),
            docked("C", -9.2),
            docked("D", -7.1),
        ];
        let ranked = rank_successes(&outcomes);
        let order: Vec<&str> = ranked.iter().map(|r| r.smiles.as_str()).collect();
        assert_eq!(order, vec!["C", "D", "A"]);
    }

    #[test]
    fn test_select_truncates_to_top_k() {
        let outcomes: Vec<DockOutcome> = (0..15).map(|i| docked(&format!("M{i}"), -(i as f64))).collect();
        let picked = select_for_admet(&outcomes, 10);
        assert_eq!(picked.len(), 10);
        assert_eq!(picked[0].score, -14.0);
        assert_eq!(picked[9].score, -5.0);
    }

    #[test]
    fn test_outcomes_serialize_tagged() {
        let ok = serde_json::to_value(docked("CCO", -6.0)).unwrap();
        assert_eq!(ok["outcome"], "docked");
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(DockOutcome::failed(&candidate("CCO"), "bad")).unwrap();
        assert_eq!(err["outcome"], "failed");
        assert_eq!(err["error"], "bad");
        assert!(err.get("score").is_none());
    }

    #[test]
    fn test_property_outcome_defaults_missing_fields() {
        let ranked = &rank_successes(&[docked("CCO", -6.0)])[0];
        let scored = PropertyOutcome::from_prediction(
            ranked,
            Ok(AdmetPrediction { solubility: Some(-2.0), toxicity: None, clearance: None }),
        );
        match scored {
            PropertyOutcome::Scored { solubility, toxicity, clearance, docking_score, .. } => {
                assert_eq!((solubility, toxicity, clearance), (-2.0, 0.0, 0.0));
                assert_eq!(docking_score, -6.0);
            }
            other => panic!("unexpected {other:?}"),
        }

        let failed = PropertyOutcome::from_prediction(ranked, Err(AdmetError::Unavailable("no module".into())));
        assert!(matches!(failed, PropertyOutcome::Failed { ref error, .. } if error.contains("not available")));
    }
}
