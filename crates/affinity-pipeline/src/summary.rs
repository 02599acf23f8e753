//! Structured results attached to a completed job.

use serde::{Deserialize, Serialize};

use affinity_molecules::pocket::Pocket;
use affinity_molecules::scoring::{DockOutcome, PropertyOutcome};

pub const RETROSYNTHESIS_PENDING: &str = "pending (hook AiZynthFinder/ASKCOS here)";
pub const PROTOCOL_PENDING: &str = "pending (LLM-based SOP generation)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// The pocket the run used, with its features when they could be computed.
    pub pockets: Vec<Pocket>,
    /// One entry per candidate, in docking order.
    pub docking: Vec<DockOutcome>,
    /// One entry per candidate sent to property scoring, best docking score first.
    pub admet: Vec<PropertyOutcome>,
    pub retrosynthesis: String,
    pub protocol: String,
}

impl RunSummary {
    pub fn new(pocket: Pocket, docking: Vec<DockOutcome>, admet: Vec<PropertyOutcome>) -> Self {
        Self {
            pockets: vec![pocket],
            docking,
            admet,
            retrosynthesis: RETROSYNTHESIS_PENDING.to_string(),
            protocol: PROTOCOL_PENDING.to_string(),
        }
    }

    pub fn docked_count(&self) -> usize {
        self.docking.iter().filter(|d| d.is_docked()).count()
    }
}
