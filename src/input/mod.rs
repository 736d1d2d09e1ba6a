//! Readers and writers for the file contracts of the pipeline.
//!
//! The similarity hits and the gene catalog are produced by external
//! collaborators; the ortholog and paralog lists are intermediates emitted by
//! the first two stages and re-ingested by the catalog loader.

pub mod catalog;
pub mod genomes;
pub mod hits;
pub mod orthos;
pub mod paralogs;

/// Violations of the input data contracts.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// A similarity hit references a pid the catalog does not know.
    #[error("gene {0} referenced by a hit is not in the catalog")]
    UnknownHitGene(String),
    /// An ortholog pair references a pid the catalog does not know.
    #[error("ortholog pair references gene {0} not in the catalog")]
    UnknownOrthoGene(String),
}
