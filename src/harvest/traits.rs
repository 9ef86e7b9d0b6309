//! Core traits and types for the Harvest Core.
//!
//! This module defines the vocabulary shared by the navigator and the
//! classifier:
//! - The listing page surface via [`ListingPage`]
//! - Pluggable "next page" locators via [`LocatorStrategy`]
//! - Navigation results via [`NavigationAttempt`] and [`NavigationOutcome`]
//! - Classification results via [`ClassificationResult`]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::harvest::signature::ResultsRange;
use crate::traits::FetchError;

// ============================================================================
// Page Surface
// ============================================================================

/// Opaque handle the page collaborator uses to find an element again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlId(pub u64);

/// Layout box of an element in page coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Snapshot of an interactable element on the listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    /// Lower-case tag name (`a`, `button`, `li`, ...).
    pub tag: String,
    /// Visible text, whitespace-trimmed.
    pub text: String,
    pub classes: Vec<String>,
    pub href: Option<String>,
    pub aria_label: Option<String>,
    pub bounds: Bounds,
    pub visible: bool,
}

impl Control {
    pub fn new(id: u64, tag: &str, text: &str) -> Self {
        Self {
            id: ControlId(id),
            tag: tag.to_string(),
            text: text.trim().to_string(),
            classes: Vec::new(),
            href: None,
            aria_label: None,
            bounds: Bounds::default(),
            visible: true,
        }
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_href(mut self, href: &str) -> Self {
        self.href = Some(href.to_string());
        self
    }

    pub fn with_aria_label(mut self, label: &str) -> Self {
        self.aria_label = Some(label.to_string());
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.bounds = Bounds::new(x, y, 20.0, 20.0);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Keys the keyboard-traversal strategy may press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tab,
    Enter,
}

/// The currently loaded listing page and the interactions the navigator
/// may perform on it.
///
/// Implementations own the browsing context. Waiting for content to settle
/// after an interaction is their responsibility ([`ListingPage::settle`]).
#[async_trait]
pub trait ListingPage: Send {
    /// Text of the results-range indicator (e.g. `"11 - 20 de 137 Registros"`),
    /// if the page shows one.
    async fn signature(&mut self) -> Result<Option<String>, FetchError>;

    /// Interactable elements currently on the page, in document order.
    async fn controls(&mut self) -> Result<Vec<Control>, FetchError>;

    /// Layout box of the results table, used as the structural anchor.
    async fn anchor(&mut self) -> Result<Option<Bounds>, FetchError>;

    /// Clicks the element identified by `control.id`.
    async fn activate(&mut self, control: &Control) -> Result<(), FetchError>;

    async fn current_url(&mut self) -> Result<Option<String>, FetchError>;

    /// Loads `url` in the listing context.
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError>;

    /// Adds a synthetic control to the page that loads `target_url` when
    /// activated, and returns it.
    async fn inject_control(&mut self, target_url: &str) -> Result<Control, FetchError>;

    async fn press_key(&mut self, key: Key) -> Result<(), FetchError>;

    /// Element that currently holds keyboard focus.
    async fn focused(&mut self) -> Result<Option<Control>, FetchError>;

    /// Waits until content triggered by the last interaction has loaded.
    async fn settle(&mut self) -> Result<(), FetchError> {
        Ok(())
    }
}

// ============================================================================
// Locator Strategies
// ============================================================================

/// Coarse risk level of a strategy. Cascades list tiers in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyTier {
    /// Matches explicit "next" affordances (text, glyph, page number, class).
    Semantic,
    /// Matches by position relative to the results table.
    Structural,
    /// Changes the page itself (injected control, URL rewrite, key presses).
    Destructive,
}

/// What a located candidate will act on when activated.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Control(Control),
    Address(String),
    Injected { url: String },
    FocusedControl(Control),
}

/// A plausible "next page" affordance found by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub target: Target,
    /// Visible text used for the tie-break (empty for address targets).
    pub text: String,
    pub bounds: Option<Bounds>,
}

impl Candidate {
    pub fn control(control: Control) -> Self {
        Self {
            text: control.text.clone(),
            bounds: Some(control.bounds),
            target: Target::Control(control),
        }
    }

    pub fn address(url: String) -> Self {
        Self {
            target: Target::Address(url),
            text: String::new(),
            bounds: None,
        }
    }
}

/// Facts about the current page shared with every strategy of one attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocateContext {
    pub range: Option<ResultsRange>,
    pub current_page: Option<u32>,
    pub next_page: Option<u32>,
}

impl LocateContext {
    pub fn from_range(range: Option<ResultsRange>) -> Self {
        Self {
            current_page: range.map(|r| r.current_page()),
            next_page: range.map(|r| r.current_page() + 1),
            range,
        }
    }
}

/// A named rule for finding and activating a "go to next page" control.
///
/// Strategies are stateless; a cascade holds them in a fixed priority order.
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn tier(&self) -> StrategyTier;

    /// Returns every plausible candidate. An empty list means this strategy
    /// found nothing and the cascade moves on.
    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError>;

    /// Performs the strategy's interaction on the chosen candidate.
    async fn activate(
        &self,
        page: &mut dyn ListingPage,
        candidate: &Candidate,
    ) -> Result<(), FetchError> {
        match &candidate.target {
            Target::Control(control) => page.activate(control).await,
            Target::Address(url) => page.navigate(url).await,
            Target::Injected { url } => {
                let control = page.inject_control(url).await?;
                page.activate(&control).await
            }
            Target::FocusedControl(_) => page.press_key(Key::Enter).await,
        }
    }
}

// ============================================================================
// Navigation Results
// ============================================================================

/// Why an attempt did not advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StallReason {
    /// No strategy located a candidate.
    NoCandidate,
    /// A control was activated but the page signature did not change.
    SignatureUnchanged,
    /// The caller's deadline elapsed.
    Timeout,
    /// The page collaborator failed while reading the signature.
    PageError(String),
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationOutcome {
    Advanced { signature: Option<String> },
    /// The results-range indicator shows the last record.
    End,
    Stalled(StallReason),
}

impl NavigationOutcome {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Stalled(_))
    }
}

/// The strategy that fired during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredStrategy {
    /// Position in the cascade's priority list.
    pub index: usize,
    pub name: String,
}

/// Record of one page-to-page transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationAttempt {
    pub strategy: Option<FiredStrategy>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub outcome: NavigationOutcome,
}

impl NavigationAttempt {
    pub(crate) fn stalled(before: Option<String>, reason: StallReason) -> Self {
        Self {
            strategy: None,
            after: before.clone(),
            before,
            outcome: NavigationOutcome::Stalled(reason),
        }
    }
}

// ============================================================================
// Classification Results
// ============================================================================

/// Which environmental study the authority required.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RequirementCategory {
    #[serde(rename = "None")]
    NotRequired,
    #[serde(rename = "RCA")]
    Rca,
    #[serde(rename = "EIA/RIMA")]
    EiaRima,
    Both,
    Undetermined,
}

impl RequirementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "None",
            Self::Rca => "RCA",
            Self::EiaRima => "EIA/RIMA",
            Self::Both => "Both",
            Self::Undetermined => "Undetermined",
        }
    }
}

impl fmt::Display for RequirementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text region a term was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceZone {
    Lead,
    Conclusion,
    FullText,
    LinkTitle,
}

/// A dictionary term found for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub term: String,
    pub zone: EvidenceZone,
    /// Parenthetical phrase of a `TERM - ... (reason)` mention.
    pub reason: Option<String>,
}

/// Where a classification came from. Text findings and inferences are
/// never merged into one another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Found (or not found) in the case text or link titles.
    Text,
    /// Printed on the listing row.
    Listing,
    /// Inferred from an activity code or class after the text was
    /// undetermined.
    InferredFromActivity { basis: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: RequirementCategory,
    pub rca: Option<Evidence>,
    pub eia_rima: Option<Evidence>,
    pub provenance: Provenance,
}

impl ClassificationResult {
    pub fn undetermined() -> Self {
        Self {
            category: RequirementCategory::Undetermined,
            rca: None,
            eia_rima: None,
            provenance: Provenance::Text,
        }
    }

    /// Category printed on the listing row; no text was read.
    pub fn from_listing(category: RequirementCategory) -> Self {
        Self {
            category,
            rca: None,
            eia_rima: None,
            provenance: Provenance::Listing,
        }
    }

    pub(crate) fn from_evidence(rca: Option<Evidence>, eia_rima: Option<Evidence>) -> Self {
        let category = match (&rca, &eia_rima) {
            (Some(_), Some(_)) => RequirementCategory::Both,
            (Some(_), None) => RequirementCategory::Rca,
            (None, Some(_)) => RequirementCategory::EiaRima,
            (None, None) => RequirementCategory::Undetermined,
        };
        Self {
            category,
            rca,
            eia_rima,
            provenance: Provenance::Text,
        }
    }

    fn primary(&self) -> Option<&Evidence> {
        self.rca.as_ref().or(self.eia_rima.as_ref())
    }

    /// Zone of the primary evidence (RCA first); `None` when nothing matched.
    pub fn zone(&self) -> Option<EvidenceZone> {
        self.primary().map(|e| e.zone)
    }

    pub fn matched_term(&self) -> Option<&str> {
        self.primary().map(|e| e.term.as_str())
    }

    pub fn is_inferred(&self) -> bool {
        matches!(self.provenance, Provenance::InferredFromActivity { .. })
    }

    /// Human-readable label in the collectors' style, e.g.
    /// `"EIA/RIMA (lavra a céu aberto)"` or `"EIA/RIMA (inferred from activity)"`.
    pub fn label(&self) -> String {
        let reason = |e: &Option<Evidence>| e.as_ref().and_then(|e| e.reason.clone());
        let mut label = match self.category {
            RequirementCategory::Both => "EIA/RIMA and RCA".to_string(),
            other => other.as_str().to_string(),
        };
        match self.category {
            RequirementCategory::Both => {
                if let Some(r) = reason(&self.eia_rima) {
                    label.push_str(&format!(" (EIA/RIMA: {r})"));
                }
                if let Some(r) = reason(&self.rca) {
                    label.push_str(&format!(" (RCA: {r})"));
                }
            }
            RequirementCategory::Rca => {
                if let Some(r) = reason(&self.rca) {
                    label.push_str(&format!(" ({r})"));
                }
            }
            RequirementCategory::EiaRima => {
                if let Some(r) = reason(&self.eia_rima) {
                    label.push_str(&format!(" ({r})"));
                }
            }
            _ => {}
        }
        if self.is_inferred() {
            label.push_str(" (inferred from activity)");
        }
        label
    }
}

// ============================================================================
// Tests
// ============================================================================
