use crate::harvest::traits::{ClassificationResult, RequirementCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One licensing case as extracted from a listing row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    /// Column name -> cell text, as produced by the record extractor.
    pub fields: BTreeMap<String, String>,
    /// Link or identifier of the detail page / technical opinion document.
    pub detail_ref: Option<String>,
    /// Titles of documents linked from the row.
    pub link_titles: Vec<String>,
    /// Activity classification code, e.g. "A-05-02-0".
    pub activity_code: Option<String>,
    /// Regulatory size/impact class ("classe"), e.g. "6".
    pub class: Option<String>,
    /// Category already printed on the listing row, if any.
    pub listing_category: Option<RequirementCategory>,
}

impl CaseRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_detail_ref(mut self, reference: impl Into<String>) -> Self {
        self.detail_ref = Some(reference.into());
        self
    }

    /// RCA, EIA/RIMA or Both on the listing row makes the detail fetch
    /// unnecessary. `None` and `Undetermined` rows are still fetched.
    pub fn has_decisive_listing_category(&self) -> bool {
        matches!(
            self.listing_category,
            Some(RequirementCategory::Rca | RequirementCategory::EiaRima | RequirementCategory::Both)
        )
    }
}

/// Content returned by a [`DetailFetcher`](crate::traits::DetailFetcher).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailContent {
    /// Rendered page text or extracted document text.
    pub text: String,
    /// Titles of the documents listed on the detail page.
    pub link_titles: Vec<String>,
}

/// A case record together with its requirement classification.
///
/// `classification.category` is always set; `Undetermined` is a valid
/// terminal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestedRecord {
    pub record: CaseRecord,
    pub classification: ClassificationResult,
    /// Listing page the record was found on (1-based).
    pub page: u32,
    /// Detail fetch or classification failure that forced a fallback.
    pub detail_error: Option<String>,
}
