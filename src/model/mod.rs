//! Core domain types for the correction pipeline.
//!
//! - `Essay`: a submitted essay and its status lifecycle
//! - `Correction`: one grading attempt, owned by an essay
//! - `CanonicalResult`: the provider-independent scoring/analysis schema

pub mod canonical;
pub mod correction;
pub mod essay;

pub use canonical::{
    Analyses, CanonicalResult, DimensionComments, ErrorCorrection, ResultMeta, Scores,
};
pub use correction::{Correction, CorrectionKind, CorrectionStatus};
pub use essay::{Essay, EssayStatus, SourceType};
