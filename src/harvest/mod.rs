//! Harvest core - pagination, classification and the run loop.
//!
//! - **Navigation**: [`StrategyCascade`] advances a listing through ordered
//!   [`LocatorStrategy`] implementations, judged by the page signature
//! - **Classification**: [`RequirementClassifier`] labels case text as RCA,
//!   EIA/RIMA, Both or Undetermined from zoned evidence
//! - **Pipeline**: [`HarvestPipeline`] ties both to the fetch and persistence
//!   collaborators

pub mod classifier;
pub mod dictionary;
pub mod navigator;
pub mod pipeline;
pub mod signature;
pub mod strategies;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use traits::{
    Bounds, Candidate, ClassificationResult, Control, ControlId, Evidence, EvidenceZone,
    FiredStrategy, Key, ListingPage, LocateContext, LocatorStrategy, NavigationAttempt,
    NavigationOutcome, Provenance, RequirementCategory, StallReason, StrategyTier, Target,
};

pub use classifier::{ActivityInference, ClassifierConfig, RequirementClassifier};
pub use dictionary::{DictionaryError, StudyKind, TermDictionary};
pub use navigator::StrategyCascade;
pub use pipeline::{HarvestPipeline, HarvestReport, HarvestStats, PipelineError, Termination};
pub use signature::{parse_signature, ResultsRange, SignatureError};
