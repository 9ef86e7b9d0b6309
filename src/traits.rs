use crate::harvest::traits::ListingPage;
use crate::model::{CaseRecord, DetailContent, HarvestedRecord};
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a content collaborator (browser, HTTP session, parser).
///
/// The orchestrator decides what a failure means: transient failures are
/// retried with backoff, fatal ones end the call site that raised them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transient fetch failure: {0}")]
    Transient(String),
    #[error("Fatal fetch failure: {0}")]
    Fatal(String),
    #[error("Fetch timed out after {0}s")]
    Timeout(u64),
}

impl FetchError {
    /// Timeouts count as transient: the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to persist records: {0}")]
    Write(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Opens the listing page that the navigator will traverse.
#[async_trait]
pub trait ListingSource: Send {
    type Page: ListingPage;

    /// Loads the first listing page (filters already applied by the source).
    async fn fetch_listing(&mut self) -> Result<Self::Page, FetchError>;
}

/// Fixed-schema table parsing for the currently loaded listing page.
#[async_trait]
pub trait RecordExtractor: Send + Sync {
    async fn extract_records(
        &self,
        page: &mut dyn ListingPage,
    ) -> Result<Vec<CaseRecord>, FetchError>;
}

/// Retrieves the detail content (page text or document text) of one case.
///
/// Takes `&self` so the executor can issue fetches from several workers;
/// an implementation that shares a single browsing context must serialize
/// internally.
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch_detail(&self, reference: &str) -> Result<DetailContent, FetchError>;
}

/// Durable, incremental storage of harvested records. Called once per page.
#[async_trait]
pub trait RecordSink: Send {
    async fn persist(&mut self, batch: &[HarvestedRecord]) -> Result<(), SinkError>;
}

#[async_trait]
impl RecordSink for Vec<HarvestedRecord> {
    async fn persist(&mut self, batch: &[HarvestedRecord]) -> Result<(), SinkError> {
        self.extend_from_slice(batch);
        Ok(())
    }
}
