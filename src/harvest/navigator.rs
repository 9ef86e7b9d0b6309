//! Strategy cascade for advancing a paginated listing.
//!
//! [`StrategyCascade::advance`] decides termination from the results-range
//! indicator first, and only then walks its locator strategies in priority
//! order. Success is judged solely by comparing the page signature before
//! and after the interaction.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::harvest::signature::{parse_signature, ResultsRange, SignatureError};
use crate::harvest::strategies::{default_strategies, is_directional_glyph};
use crate::harvest::traits::{
    Candidate, FiredStrategy, ListingPage, LocateContext, LocatorStrategy, NavigationAttempt,
    NavigationOutcome, StallReason,
};

/// Ordered, immutable list of locator strategies.
///
/// The cascade holds no per-page state; it is safe to share, but a single
/// page must never be advanced from two tasks at once.
pub struct StrategyCascade {
    strategies: Vec<Box<dyn LocatorStrategy>>,
    malformed_logged: AtomicBool,
}

impl Default for StrategyCascade {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl StrategyCascade {
    /// Creates a cascade. Strategies run tier by tier (semantic, then
    /// structural, then destructive); within a tier the given order holds.
    pub fn new(mut strategies: Vec<Box<dyn LocatorStrategy>>) -> Self {
        strategies.sort_by_key(|s| s.tier());
        Self {
            strategies,
            malformed_logged: AtomicBool::new(false),
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Attempts one page-to-page transition.
    ///
    /// Returns `End` when the results-range indicator shows the last record
    /// (no strategy is consulted), `Advanced` when the signature changed
    /// after an activation, and `Stalled` otherwise. A page on which no
    /// strategy finds a control is `Stalled`, not `End`.
    #[instrument(skip_all)]
    pub async fn advance(&self, page: &mut dyn ListingPage) -> NavigationAttempt {
        let before = match page.signature().await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "Failed to read page signature");
                return NavigationAttempt::stalled(None, StallReason::PageError(e.to_string()));
            }
        };

        let range = self.read_range(before.as_deref());
        if range.is_some_and(|r| r.is_last()) {
            info!(signature = ?before, "Results range reached the total, no more pages");
            return NavigationAttempt {
                strategy: None,
                after: before.clone(),
                before,
                outcome: NavigationOutcome::End,
            };
        }

        let ctx = LocateContext::from_range(range);
        let Some(fired) = self.activate_first(page, &ctx).await else {
            warn!(signature = ?before, "No strategy located a next-page control");
            return NavigationAttempt::stalled(before, StallReason::NoCandidate);
        };

        if let Err(e) = page.settle().await {
            warn!(error = %e, "Page did not settle after activation");
        }

        let after = match page.signature().await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "Failed to re-read page signature");
                return NavigationAttempt {
                    strategy: Some(fired),
                    before,
                    after: None,
                    outcome: NavigationOutcome::Stalled(StallReason::PageError(e.to_string())),
                };
            }
        };

        let outcome = if after != before {
            info!(strategy = %fired.name, from = ?before, to = ?after, "Advanced to next page");
            NavigationOutcome::Advanced {
                signature: after.clone(),
            }
        } else {
            warn!(strategy = %fired.name, signature = ?before, "Signature unchanged after activation");
            NavigationOutcome::Stalled(StallReason::SignatureUnchanged)
        };

        NavigationAttempt {
            strategy: Some(fired),
            before,
            after,
            outcome,
        }
    }

    /// [`advance`](Self::advance) bounded by `deadline`. An attempt that runs
    /// out of time is `Stalled(Timeout)`, never `End`.
    pub async fn advance_within(
        &self,
        page: &mut dyn ListingPage,
        deadline: Duration,
    ) -> NavigationAttempt {
        match timeout(deadline, self.advance(page)).await {
            Ok(attempt) => attempt,
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Navigation attempt timed out");
                NavigationAttempt::stalled(None, StallReason::Timeout)
            }
        }
    }

    fn read_range(&self, signature: Option<&str>) -> Option<ResultsRange> {
        match parse_signature(signature?) {
            Ok(range) => Some(range),
            Err(SignatureError::Malformed(text)) => {
                if !self.malformed_logged.swap(true, AtomicOrdering::Relaxed) {
                    warn!(
                        signature = %text,
                        "Results range did not parse, using control-based strategies only"
                    );
                }
                None
            }
        }
    }

    /// Runs strategies in order until one activates a candidate.
    async fn activate_first(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Option<FiredStrategy> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let candidates = match strategy.locate(&mut *page, ctx).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    debug!(strategy = strategy.name(), error = %e, "Strategy failed to locate");
                    continue;
                }
            };
            let found = candidates.len();
            let Some(candidate) = choose_candidate(candidates, ctx) else {
                debug!(strategy = strategy.name(), "No candidate");
                continue;
            };

            debug!(strategy = strategy.name(), found, text = %candidate.text, "Activating candidate");
            match strategy.activate(&mut *page, &candidate).await {
                Ok(()) => {
                    return Some(FiredStrategy {
                        index,
                        name: strategy.name().to_string(),
                    })
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Activation failed");
                }
            }
        }
        None
    }
}

/// Picks one candidate out of a strategy's findings.
///
/// Prefers text equal to the expected next page number or a forward glyph;
/// among the remaining ties, the candidate furthest along in reading order.
pub fn choose_candidate(mut candidates: Vec<Candidate>, ctx: &LocateContext) -> Option<Candidate> {
    if candidates.len() <= 1 {
        return candidates.pop();
    }

    let expected = ctx.next_page.map(|n| n.to_string());
    let is_exact = |c: &Candidate| {
        expected.as_deref() == Some(c.text.as_str()) || is_directional_glyph(&c.text)
    };
    let pool: Vec<Candidate> = if candidates.iter().any(|c| is_exact(c)) {
        candidates.into_iter().filter(|c| is_exact(c)).collect()
    } else {
        candidates
    };

    pool.into_iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| reading_order(a, b).then(ia.cmp(ib)))
        .map(|(_, c)| c)
}

fn reading_order(a: &Candidate, b: &Candidate) -> Ordering {
    match (a.bounds, b.bounds) {
        (Some(a), Some(b)) => a
            .y
            .partial_cmp(&b.y)
            .unwrap_or(Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal)),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::strategies::{NextTextStrategy, PageNumberStrategy};
    use crate::harvest::testing::ScriptedPage;
    use crate::harvest::traits::{Control, StrategyTier, Target};
    use crate::traits::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Wraps a strategy and counts `locate` calls.
    struct Counting<S> {
        inner: S,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl<S: LocatorStrategy> LocatorStrategy for Counting<S> {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn tier(&self) -> StrategyTier {
            self.inner.tier()
        }

        async fn locate(
            &self,
            page: &mut dyn ListingPage,
            ctx: &LocateContext,
        ) -> Result<Vec<Candidate>, FetchError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.locate(page, ctx).await
        }
    }

    fn counting_cascade() -> (StrategyCascade, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cascade = StrategyCascade::new(vec![
            Box::new(Counting {
                inner: NextTextStrategy,
                calls: calls.clone(),
            }),
            Box::new(Counting {
                inner: PageNumberStrategy,
                calls: calls.clone(),
            }),
        ]);
        (cascade, calls)
    }

    fn next_controls() -> Vec<Control> {
        vec![Control::new(1, "a", "Próximo").at(300.0, 900.0)]
    }

    #[test]
    fn test_destructive_strategies_never_run_first() {
        use crate::harvest::strategies::{
            AnchorRelativeStrategy, ClassNameStrategy, UrlRewriteStrategy,
        };

        let cascade = StrategyCascade::new(vec![
            Box::new(UrlRewriteStrategy),
            Box::new(AnchorRelativeStrategy),
            Box::new(PageNumberStrategy),
            Box::new(NextTextStrategy),
            Box::new(ClassNameStrategy),
        ]);
        assert_eq!(
            cascade.strategy_names(),
            vec!["page-number", "next-text", "class-name", "anchor-relative", "url-rewrite"]
        );
        assert_eq!(
            StrategyCascade::default().strategy_names(),
            vec![
                "next-text",
                "page-number",
                "class-name",
                "page-parameter",
                "anchor-relative",
                "synthetic-control",
                "url-rewrite",
                "keyboard-focus",
            ]
        );
    }

    #[tokio::test]
    async fn test_unsigned_page_uses_control_strategies() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::unsigned().with_controls(next_controls());

        let attempt = cascade.advance(&mut page).await;

        // Without a signature the change cannot be observed.
        assert_eq!(
            attempt.outcome,
            NavigationOutcome::Stalled(StallReason::SignatureUnchanged)
        );
        assert_eq!(attempt.strategy.map(|s| s.name), Some("next-text".to_string()));
        assert_eq!(page.activated.len(), 1);
    }

    #[tokio::test]
    async fn test_last_range_ends_without_consulting_strategies() {
        for signature in ["21-25 of 25", "1 - 10 de 10 Registros", "131–137 of 137", "1-1 of 1"] {
            let (cascade, calls) = counting_cascade();
            let mut page = ScriptedPage::new(&[signature]).with_controls(next_controls());

            let attempt = cascade.advance(&mut page).await;

            assert_eq!(attempt.outcome, NavigationOutcome::End, "{signature}");
            assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
            assert!(page.activated.is_empty());
        }
    }

    #[tokio::test]
    async fn test_signature_sequence_advances_then_ends() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25", "21-25 of 25"])
            .with_controls(next_controls());

        let outcomes: Vec<NavigationOutcome> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(cascade.advance(&mut page).await.outcome);
            }
            out
        };

        assert_eq!(
            outcomes,
            vec![
                NavigationOutcome::Advanced {
                    signature: Some("11-20 of 25".into())
                },
                NavigationOutcome::Advanced {
                    signature: Some("21-25 of 25".into())
                },
                NavigationOutcome::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_higher_priority_strategy_wins() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25"]).with_controls(vec![
            Control::new(1, "a", "2").at(100.0, 900.0),
            Control::new(2, "a", "Próximo").at(50.0, 900.0),
        ]);

        let attempt = cascade.advance(&mut page).await;

        let fired = attempt.strategy.expect("a strategy should fire");
        assert_eq!(fired.index, 0);
        assert_eq!(fired.name, "next-text");
        assert_eq!(page.activated, vec![crate::harvest::traits::ControlId(2)]);
    }

    #[tokio::test]
    async fn test_page_number_fires_when_no_next_text() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25"])
            .with_controls(vec![Control::new(1, "a", "2"), Control::new(2, "a", "3")]);

        let attempt = cascade.advance(&mut page).await;

        assert_eq!(attempt.strategy.map(|s| s.index), Some(1));
        assert!(attempt.outcome.is_advanced());
    }

    #[tokio::test]
    async fn test_no_candidate_is_stalled_not_end() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25"]);

        let attempt = cascade.advance(&mut page).await;

        assert_eq!(attempt.outcome, NavigationOutcome::Stalled(StallReason::NoCandidate));
        assert!(attempt.strategy.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_signature_is_stalled() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25"])
            .with_controls(next_controls())
            .stuck();

        let attempt = cascade.advance(&mut page).await;

        assert_eq!(
            attempt.outcome,
            NavigationOutcome::Stalled(StallReason::SignatureUnchanged)
        );
        assert_eq!(attempt.before, attempt.after);
        assert_eq!(page.current_index(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_stalled() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25"])
            .with_controls(next_controls())
            .with_delay(Duration::from_millis(500));

        let attempt = cascade
            .advance_within(&mut page, Duration::from_millis(20))
            .await;

        assert_eq!(attempt.outcome, NavigationOutcome::Stalled(StallReason::Timeout));
    }

    #[tokio::test]
    async fn test_malformed_signature_falls_back_to_controls() {
        let cascade = StrategyCascade::default();
        let mut page =
            ScriptedPage::new(&["Página um", "Página dois"]).with_controls(next_controls());

        let attempt = cascade.advance(&mut page).await;

        assert!(attempt.outcome.is_advanced());
        assert_eq!(attempt.strategy.map(|s| s.name), Some("next-text".to_string()));
    }

    #[tokio::test]
    async fn test_grouped_total_is_not_the_last_page() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1 - 10 de 1.370 Registros", "11 - 20 de 1.370 Registros"])
            .with_controls(next_controls());

        let attempt = cascade.advance(&mut page).await;

        assert!(attempt.outcome.is_advanced());
    }

    #[tokio::test]
    async fn test_failed_clicks_fall_through_to_url_rewrite() {
        let cascade = StrategyCascade::default();
        let mut page = ScriptedPage::new(&["1-10 of 25", "11-20 of 25"])
            .with_controls(next_controls())
            .with_url("https://portal/processos?page=1")
            .failing_clicks();

        let attempt = cascade.advance(&mut page).await;

        let fired = attempt.strategy.expect("url rewrite should fire");
        assert_eq!(fired.name, "url-rewrite");
        assert_eq!(page.injected, vec!["https://portal/processos?page=2".to_string()]);
        assert_eq!(page.navigations, vec!["https://portal/processos?page=2".to_string()]);
        assert!(attempt.outcome.is_advanced());
        assert_eq!(page.current_index(), 1);
    }

    #[test]
    fn test_choose_candidate_prefers_exact_then_trailing() {
        let ctx = LocateContext {
            next_page: Some(3),
            ..LocateContext::default()
        };
        let picked = choose_candidate(
            vec![
                Candidate::control(Control::new(1, "a", "4").at(200.0, 900.0)),
                Candidate::control(Control::new(2, "a", "3").at(100.0, 900.0)),
                Candidate::control(Control::new(3, "a", "5").at(300.0, 900.0)),
            ],
            &ctx,
        )
        .unwrap();
        assert_eq!(picked.text, "3");

        let picked = choose_candidate(
            vec![
                Candidate::control(Control::new(1, "a", "Próximo").at(100.0, 100.0)),
                Candidate::control(Control::new(2, "a", "Próximo").at(100.0, 950.0)),
                Candidate::control(Control::new(3, "a", "Próximo").at(400.0, 120.0)),
            ],
            &LocateContext::default(),
        )
        .unwrap();
        assert!(matches!(picked.target, Target::Control(c) if c.id.0 == 2));

        assert!(choose_candidate(Vec::new(), &ctx).is_none());
    }
}
