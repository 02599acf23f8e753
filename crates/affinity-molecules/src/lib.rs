//! Affinity Molecules - structure handling and the per-candidate stages of a
//! screening run.
//!
//! 1. Reading target structures (PDB / PDBQT / mmCIF)
//! 2. Detecting binding pockets (fpocket, bounding-box fallback)
//! 3. Describing pocket chemistry
//! 4. Sourcing candidate ligands (stored + generated)
//! 5. Molecular docking (OpenBabel preparation, AutoDock Vina)
//! 6. ADMET prediction
//! 7. Ranking docked candidates

pub mod admet;
pub mod docking;
pub mod features;
pub mod ligand;
pub mod pocket;
pub mod scoring;
pub mod smiles;
pub mod sourcing;
pub mod structure;

pub use affinity_common::{Result, ScreeningError};
