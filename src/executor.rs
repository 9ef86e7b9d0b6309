use crate::harvest::classifier::{ActivityInference, RequirementClassifier};
use crate::harvest::traits::ClassificationResult;
use crate::model::{CaseRecord, DetailContent, HarvestedRecord};
use crate::traits::{DetailFetcher, FetchError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Bounded worker pool for the detail stage of one listing page: fetch the
/// detail content of each record, classify it, apply the activity fallback.
///
/// Records are independent, so they run concurrently up to the semaphore
/// limit. The pool is drained before the caller navigates again.
pub struct DetailExecutor {
    semaphore: Arc<Semaphore>,
    detail_timeout: Duration,
    classify_timeout: Duration,
    fetch_retries: u32,
    fetch_backoff: Duration,
}

impl DetailExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            detail_timeout: Duration::from_secs(60),
            classify_timeout: Duration::from_secs(10),
            fetch_retries: 2,
            fetch_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_timeouts(mut self, detail: Duration, classify: Duration) -> Self {
        self.detail_timeout = detail;
        self.classify_timeout = classify;
        self
    }

    /// Transient fetch failures are retried `retries` times, waiting
    /// `backoff * n` before retry `n`.
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.fetch_retries = retries;
        self.fetch_backoff = backoff;
        self
    }

    /// Classifies every record of a page. The output has one entry per
    /// input record, in input order, each with a category set.
    #[instrument(skip_all, fields(page = page, records = records.len()))]
    pub async fn execute<F>(
        &self,
        fetcher: Arc<F>,
        classifier: Arc<RequirementClassifier>,
        inference: Option<Arc<ActivityInference>>,
        records: Vec<CaseRecord>,
        page: u32,
    ) -> Vec<HarvestedRecord>
    where
        F: DetailFetcher + 'static,
    {
        let worker = Arc::new(Worker {
            fetcher,
            classifier,
            inference,
            detail_timeout: self.detail_timeout,
            classify_timeout: self.classify_timeout,
            fetch_retries: self.fetch_retries,
            fetch_backoff: self.fetch_backoff,
        });

        let fallback = records.clone();
        let mut tasks = JoinSet::new();
        for (index, record) in records.into_iter().enumerate() {
            let worker = worker.clone();
            let semaphore = self.semaphore.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so acquire only fails on shutdown.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, worker.process(record, page).await)
            });
        }

        let mut slots: Vec<Option<HarvestedRecord>> = vec![None; fallback.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, harvested)) => slots[index] = Some(harvested),
                Err(e) => warn!(error = %e, "Detail worker failed"),
            }
        }

        // A slot left empty belongs to a worker that panicked or was cancelled.
        let harvested: Vec<HarvestedRecord> = slots
            .into_iter()
            .zip(fallback)
            .map(|(slot, record)| {
                slot.unwrap_or_else(|| HarvestedRecord {
                    record,
                    classification: ClassificationResult::undetermined(),
                    page,
                    detail_error: Some("detail worker failed".to_string()),
                })
            })
            .collect();

        info!(records = harvested.len(), "Detail stage completed");
        harvested
    }
}

struct Worker<F> {
    fetcher: Arc<F>,
    classifier: Arc<RequirementClassifier>,
    inference: Option<Arc<ActivityInference>>,
    detail_timeout: Duration,
    classify_timeout: Duration,
    fetch_retries: u32,
    fetch_backoff: Duration,
}

impl<F: DetailFetcher + 'static> Worker<F> {
    async fn process(&self, record: CaseRecord, page: u32) -> HarvestedRecord {
        if let Some(category) = record
            .listing_category
            .filter(|_| record.has_decisive_listing_category())
        {
            debug!(record = %record.id, %category, "Category taken from listing row");
            return HarvestedRecord {
                record,
                classification: ClassificationResult::from_listing(category),
                page,
                detail_error: None,
            };
        }

        let mut detail_error = None;
        let content = match record.detail_ref.as_deref() {
            Some(reference) => match self.fetch(reference).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(record = %record.id, error = %e, "Detail fetch failed");
                    detail_error = Some(e.to_string());
                    DetailContent::default()
                }
            },
            None => DetailContent::default(),
        };

        let DetailContent {
            text,
            link_titles: mut titles,
        } = content;
        titles.extend(record.link_titles.iter().cloned());

        let classifier = self.classifier.clone();
        let classification = match timeout(
            self.classify_timeout,
            tokio::task::spawn_blocking(move || classifier.classify(&text, &titles)),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(record = %record.id, error = %e, "Classification task failed");
                detail_error.get_or_insert(format!("classification failed: {e}"));
                ClassificationResult::undetermined()
            }
            Err(_) => {
                warn!(record = %record.id, "Classification timed out");
                detail_error.get_or_insert(format!(
                    "classification timed out after {}s",
                    self.classify_timeout.as_secs()
                ));
                ClassificationResult::undetermined()
            }
        };

        let classification = match &self.inference {
            Some(inference) => inference.infer(
                classification,
                record.activity_code.as_deref(),
                record.class.as_deref(),
            ),
            None => classification,
        };

        debug!(record = %record.id, category = %classification.category, "Record classified");
        HarvestedRecord {
            record,
            classification,
            page,
            detail_error,
        }
    }

    async fn fetch(&self, reference: &str) -> Result<DetailContent, FetchError> {
        let mut retry = 0;
        loop {
            let result = match timeout(self.detail_timeout, self.fetcher.fetch_detail(reference)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.detail_timeout.as_secs())),
            };
            match result {
                Err(e) if e.is_transient() && retry < self.fetch_retries => {
                    retry += 1;
                    debug!(reference, retry, error = %e, "Retrying detail fetch");
                    tokio::time::sleep(self.fetch_backoff * retry).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::traits::{Provenance, RequirementCategory};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves canned detail text; references listed in `flaky` fail
    /// transiently the first time they are requested.
    #[derive(Default)]
    struct MockFetcher {
        pages: HashMap<String, DetailContent>,
        flaky: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockFetcher {
        fn with(mut self, reference: &str, text: &str) -> Self {
            self.pages.insert(
                reference.to_string(),
                DetailContent {
                    text: text.to_string(),
                    link_titles: Vec::new(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl DetailFetcher for MockFetcher {
        async fn fetch_detail(&self, reference: &str) -> Result<DetailContent, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            {
                let mut flaky = self.flaky.lock().unwrap();
                if let Some(pos) = flaky.iter().position(|r| r == reference) {
                    flaky.remove(pos);
                    return Err(FetchError::Transient("connection reset".into()));
                }
            }
            self.pages
                .get(reference)
                .cloned()
                .ok_or_else(|| FetchError::Fatal(format!("404 {reference}")))
        }
    }

    fn executor() -> DetailExecutor {
        DetailExecutor::new(2).with_retries(2, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_every_record_gets_a_category_in_order() {
        let fetcher = Arc::new(
            MockFetcher::default()
                .with("p/1", "Parecer único.\n\nExigido EIA/RIMA.")
                .with("p/2", "Apresentado RCA."),
        );
        let records = vec![
            CaseRecord::new("1").with_detail_ref("p/1"),
            CaseRecord::new("2").with_detail_ref("p/2"),
            CaseRecord::new("3").with_detail_ref("p/missing"),
            CaseRecord::new("4"),
        ];

        let out = executor()
            .execute(fetcher, Arc::new(RequirementClassifier::default()), None, records, 1)
            .await;

        let ids: Vec<&str> = out.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(out[0].classification.category, RequirementCategory::EiaRima);
        assert_eq!(out[1].classification.category, RequirementCategory::Rca);
        assert_eq!(out[2].classification.category, RequirementCategory::Undetermined);
        assert!(out[2].detail_error.as_deref().unwrap().contains("404"));
        assert_eq!(out[3].classification.category, RequirementCategory::Undetermined);
        assert!(out[3].detail_error.is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fetcher = MockFetcher::default().with("p/1", "Consta RCA.");
        fetcher.flaky.lock().unwrap().push("p/1".into());

        let out = executor()
            .execute(
                Arc::new(fetcher),
                Arc::new(RequirementClassifier::default()),
                None,
                vec![CaseRecord::new("1").with_detail_ref("p/1")],
                3,
            )
            .await;

        assert_eq!(out[0].classification.category, RequirementCategory::Rca);
        assert_eq!(out[0].page, 3);
        assert!(out[0].detail_error.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut fetcher = MockFetcher::default();
        let records: Vec<CaseRecord> = (0..8)
            .map(|i| {
                let reference = format!("p/{i}");
                fetcher = std::mem::take(&mut fetcher).with(&reference, "Consta EIA.");
                CaseRecord::new(i.to_string()).with_detail_ref(reference)
            })
            .collect();
        let fetcher = Arc::new(fetcher);

        let out = executor()
            .execute(
                fetcher.clone(),
                Arc::new(RequirementClassifier::default()),
                None,
                records,
                1,
            )
            .await;

        assert_eq!(out.len(), 8);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_listing_category_skips_detail_and_inference_tags_fallback() {
        let fetcher = Arc::new(MockFetcher::default());
        let mut listed = CaseRecord::new("1").with_detail_ref("p/never");
        listed.listing_category = Some(RequirementCategory::EiaRima);
        let mut coded = CaseRecord::new("2");
        coded.activity_code = Some("A-05-03-7".into());

        let out = executor()
            .execute(
                fetcher,
                Arc::new(RequirementClassifier::default()),
                Some(Arc::new(ActivityInference::default())),
                vec![listed, coded],
                1,
            )
            .await;

        assert_eq!(out[0].classification.provenance, Provenance::Listing);
        assert!(out[0].detail_error.is_none());
        assert_eq!(out[1].classification.category, RequirementCategory::EiaRima);
        assert!(out[1].classification.is_inferred());
    }
}
