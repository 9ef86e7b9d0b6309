//! Harvest run orchestrator.
//!
//! [`HarvestPipeline`] drives one collection loop over a paginated listing:
//! - extract the records of the current page (delegated)
//! - fetch and classify their detail content through the [`DetailExecutor`]
//! - persist the page's records through a [`RecordSink`]
//! - advance with the [`StrategyCascade`], retrying stalls with backoff
//!
//! The loop ends on the last results range, on the configured page limit,
//! on an empty page, or when stalls exceed the retry budget.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, HarvestConfig, StallPolicy};
use crate::executor::DetailExecutor;
use crate::harvest::classifier::{ActivityInference, RequirementClassifier};
use crate::harvest::navigator::StrategyCascade;
use crate::harvest::traits::{
    ListingPage, NavigationOutcome, Provenance, RequirementCategory, StallReason,
};
use crate::model::{CaseRecord, HarvestedRecord};
use crate::traits::{
    DetailFetcher, FetchError, ListingSource, RecordExtractor, RecordSink, SinkError,
};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The results range reached the total.
    End,
    /// `max_pages` pages were harvested.
    MaxPages,
    /// The page reached by the last advance held no records.
    EmptyPage,
    /// Navigation stalled past the retry budget under `StallPolicy::TreatAsEnd`.
    StallLimit,
}

/// Counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub pages_visited: u32,
    pub records_emitted: usize,
    /// Records whose detail content was requested from the fetcher.
    pub details_fetched: usize,
    /// Records that kept a detail fetch or classification error.
    pub detail_failures: usize,
    pub navigation_stalls: u32,
    pub by_category: BTreeMap<RequirementCategory, usize>,
    /// Records whose category came from the activity fallback.
    pub inferred: usize,
    pub total_duration_ms: u64,
}

impl HarvestStats {
    fn record_page(&mut self, batch: &[HarvestedRecord]) {
        self.pages_visited += 1;
        self.records_emitted += batch.len();
        for harvested in batch {
            if harvested.record.detail_ref.is_some()
                && harvested.classification.provenance != Provenance::Listing
            {
                self.details_fetched += 1;
            }
            if harvested.detail_error.is_some() {
                self.detail_failures += 1;
            }
            if harvested.classification.is_inferred() {
                self.inferred += 1;
            }
            *self
                .by_category
                .entry(harvested.classification.category)
                .or_default() += 1;
        }
    }

    pub fn count(&self, category: RequirementCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

/// Summary returned by [`HarvestPipeline::run`]. The records themselves go
/// to the sink page by page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestReport {
    pub termination: Termination,
    pub stats: HarvestStats,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Listing fetch failed: {0}")]
    Fetch(FetchError),

    #[error("Record extraction failed on page {page}: {source}")]
    Extraction { page: u32, source: FetchError },

    #[error("Failed to persist page records: {0}")]
    Persist(#[from] SinkError),

    #[error("Navigation stalled on page {page} after {attempts} attempts: {reason:?}")]
    NavigationStalled {
        page: u32,
        attempts: u32,
        reason: StallReason,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Sequential page traversal with bounded-parallel detail classification.
///
/// Pages are visited strictly in order: the detail stage of a page is
/// drained before the cascade touches the listing again.
///
/// # Example
///
/// ```ignore
/// let pipeline = HarvestPipeline::new(extractor, fetcher)
///     .with_config(HarvestConfig::from_path(Path::new("harvest.json"))?)
///     .with_activity_inference(ActivityInference::default());
///
/// let mut records: Vec<HarvestedRecord> = Vec::new();
/// let report = pipeline.run(&mut source, &mut records).await?;
/// println!("{:?}: {} records", report.termination, report.stats.records_emitted);
/// ```
pub struct HarvestPipeline<X, F>
where
    X: RecordExtractor,
    F: DetailFetcher + 'static,
{
    extractor: X,
    fetcher: Arc<F>,
    navigator: StrategyCascade,
    classifier: Arc<RequirementClassifier>,
    inference: Option<Arc<ActivityInference>>,
    config: HarvestConfig,
}

impl<X, F> HarvestPipeline<X, F>
where
    X: RecordExtractor,
    F: DetailFetcher + 'static,
{
    /// Creates a pipeline with the default cascade, the built-in
    /// dictionaries, no activity fallback and [`HarvestConfig::default`].
    pub fn new(extractor: X, fetcher: F) -> Self {
        let config = HarvestConfig::default();
        Self {
            extractor,
            fetcher: Arc::new(fetcher),
            navigator: StrategyCascade::default(),
            classifier: Arc::new(RequirementClassifier::new(
                Default::default(),
                config.classifier.clone(),
            )),
            inference: None,
            config,
        }
    }

    /// Replaces the configuration. The classifier keeps its dictionary and
    /// takes the new zone settings.
    pub fn with_config(mut self, config: HarvestConfig) -> Self {
        self.classifier = Arc::new(RequirementClassifier::new(
            self.classifier.dictionary().clone(),
            config.classifier.clone(),
        ));
        self.config = config;
        self
    }

    pub fn with_navigator(mut self, navigator: StrategyCascade) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn with_classifier(mut self, classifier: RequirementClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Enables the activity-code fallback for records left undetermined.
    pub fn with_activity_inference(mut self, inference: ActivityInference) -> Self {
        self.inference = Some(Arc::new(inference));
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Runs the collection loop until a [`Termination`] condition holds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if:
    /// - the configuration is invalid
    /// - the listing or a page's records cannot be fetched after retries
    /// - the sink rejects a batch
    /// - navigation stalls past the retry budget under `StallPolicy::Abort`
    ///
    /// Detail fetch failures are not errors: the affected records are
    /// emitted as `Undetermined` with the failure kept on the record.
    #[instrument(skip_all, fields(max_pages = self.config.max_pages))]
    pub async fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<HarvestReport, PipelineError>
    where
        S: ListingSource,
        K: RecordSink,
    {
        self.config.validate()?;
        let start = Instant::now();
        let mut stats = HarvestStats::default();

        let executor = DetailExecutor::new(self.config.detail_concurrency)
            .with_timeouts(self.config.detail_timeout(), self.config.classify_timeout())
            .with_retries(
                self.config.fetch_retries,
                Duration::from_millis(self.config.fetch_backoff_ms),
            );

        debug!(strategies = ?self.navigator.strategy_names(), "Navigation cascade");
        info!("Opening listing");
        let mut page = self.open_listing(source).await?;
        let mut page_number = 1u32;

        let termination = loop {
            let records = self.extract(&mut page, page_number).await?;
            let extracted = self.current_signature(&mut page).await;
            if records.is_empty() {
                info!(page = page_number, "Page holds no records");
                break Termination::EmptyPage;
            }

            let page_start = Instant::now();
            let batch = executor
                .execute(
                    self.fetcher.clone(),
                    self.classifier.clone(),
                    self.inference.clone(),
                    records,
                    page_number,
                )
                .await;
            stats.record_page(&batch);
            sink.persist(&batch).await?;
            info!(
                page = page_number,
                records = batch.len(),
                duration_ms = page_start.elapsed().as_millis() as u64,
                "Page harvested"
            );

            if page_number >= self.config.max_pages {
                info!(page = page_number, "Page limit reached");
                break Termination::MaxPages;
            }

            match self
                .advance(&mut page, extracted.as_deref(), page_number, &mut stats)
                .await?
            {
                Some(termination) => break termination,
                None => page_number += 1,
            }
        };

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            ?termination,
            pages = stats.pages_visited,
            records = stats.records_emitted,
            duration_ms = stats.total_duration_ms,
            "Harvest finished"
        );

        Ok(HarvestReport { termination, stats })
    }

    async fn open_listing<S: ListingSource>(&self, source: &mut S) -> Result<S::Page, PipelineError> {
        let deadline = self.config.navigation_timeout();
        let mut retry = 0;
        loop {
            let result = timeout(deadline, source.fetch_listing())
                .await
                .unwrap_or_else(|_| Err(FetchError::Timeout(deadline.as_secs())));
            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && retry < self.config.fetch_retries => {
                    retry += 1;
                    warn!(retry, error = %e, "Listing fetch failed, retrying");
                    tokio::time::sleep(self.config.fetch_backoff(retry)).await;
                }
                Err(e) => return Err(PipelineError::Fetch(e)),
            }
        }
    }

    async fn extract(
        &self,
        page: &mut dyn ListingPage,
        page_number: u32,
    ) -> Result<Vec<CaseRecord>, PipelineError> {
        let deadline = self.config.navigation_timeout();
        let mut retry = 0;
        loop {
            let result = timeout(deadline, self.extractor.extract_records(&mut *page))
                .await
                .unwrap_or_else(|_| Err(FetchError::Timeout(deadline.as_secs())));
            match result {
                Ok(records) => {
                    debug!(page = page_number, records = records.len(), "Records extracted");
                    return Ok(records);
                }
                Err(e) if e.is_transient() && retry < self.config.fetch_retries => {
                    retry += 1;
                    warn!(page = page_number, retry, error = %e, "Extraction failed, retrying");
                    tokio::time::sleep(self.config.fetch_backoff(retry)).await;
                }
                Err(source) => {
                    return Err(PipelineError::Extraction {
                        page: page_number,
                        source,
                    })
                }
            }
        }
    }

    /// `Ok(None)` once the page moved past `extracted`, `Ok(Some(_))` when
    /// the run should stop.
    ///
    /// A stalled attempt may still have moved the page (a click that landed
    /// before the deadline), so the signature is compared with the extracted
    /// page before anything is clicked again.
    async fn advance(
        &self,
        page: &mut dyn ListingPage,
        extracted: Option<&str>,
        page_number: u32,
        stats: &mut HarvestStats,
    ) -> Result<Option<Termination>, PipelineError> {
        let mut retries = 0;
        loop {
            let attempt = self
                .navigator
                .advance_within(&mut *page, self.config.navigation_timeout())
                .await;

            let reason = match attempt.outcome {
                NavigationOutcome::Advanced { .. } => return Ok(None),
                NavigationOutcome::End => return Ok(Some(Termination::End)),
                NavigationOutcome::Stalled(reason) => reason,
            };

            stats.navigation_stalls += 1;
            if self.has_moved(&mut *page, extracted).await {
                info!(page = page_number, ?reason, "Page moved despite the stall");
                return Ok(None);
            }

            if retries >= self.config.max_stall_retries {
                return match self.config.stall_policy {
                    StallPolicy::TreatAsEnd => {
                        warn!(page = page_number, ?reason, "Navigation stalled, ending run");
                        Ok(Some(Termination::StallLimit))
                    }
                    StallPolicy::Abort => Err(PipelineError::NavigationStalled {
                        page: page_number,
                        attempts: retries + 1,
                        reason,
                    }),
                };
            }

            retries += 1;
            warn!(page = page_number, retry = retries, ?reason, "Navigation stalled, retrying");
            tokio::time::sleep(self.config.stall_backoff(retries)).await;

            if self.has_moved(&mut *page, extracted).await {
                info!(page = page_number, "Page moved during stall backoff");
                return Ok(None);
            }
        }
    }

    async fn current_signature(&self, page: &mut dyn ListingPage) -> Option<String> {
        match timeout(self.config.navigation_timeout(), page.signature()).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => {
                debug!(error = %e, "Failed to read page signature");
                None
            }
            Err(_) => None,
        }
    }

    async fn has_moved(&self, page: &mut dyn ListingPage, extracted: Option<&str>) -> bool {
        match self.current_signature(page).await {
            Some(current) => extracted != Some(current.as_str()),
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
