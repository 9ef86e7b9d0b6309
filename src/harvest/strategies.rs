//! Concrete "next page" locator strategies.
//!
//! [`default_strategies`] returns them in cascade priority order: explicit
//! affordances first, then position relative to the results table, then
//! strategies that alter the page.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::harvest::traits::{
    Candidate, Control, Key, ListingPage, LocateContext, LocatorStrategy, StrategyTier, Target,
};
use crate::traits::FetchError;

static PAGE_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([?&](?:page|pagina)=)(\d+)").unwrap());

const NEXT_WORDS: &[&str] = &[
    "próximo",
    "próxima",
    "proximo",
    "proxima",
    "próxima página",
    "proxima pagina",
    "next",
    "next page",
    "seguinte",
];

const NEXT_GLYPHS: &[char] = &['»', '>', '→', '›'];

const NEXT_CLASS_HINTS: &[&str] = &["next", "proximo", "próximo", "pagination-next"];

/// True for text made only of forward glyphs, such as `»` or `>>`.
pub fn is_directional_glyph(text: &str) -> bool {
    let t = text.trim();
    !t.is_empty() && t.chars().all(|c| NEXT_GLYPHS.contains(&c))
}

/// True for labels like `Próximo`, `next »` or `>`.
pub fn is_next_label(text: &str) -> bool {
    if is_directional_glyph(text) {
        return true;
    }
    let lowered = text.to_lowercase();
    let stripped = lowered.trim_matches(|c: char| c.is_whitespace() || NEXT_GLYPHS.contains(&c));
    NEXT_WORDS.contains(&stripped)
}

fn looks_like_next(control: &Control) -> bool {
    is_next_label(&control.text) || control.aria_label.as_deref().is_some_and(is_next_label)
}

fn is_disabled(control: &Control) -> bool {
    control
        .classes
        .iter()
        .any(|c| c.eq_ignore_ascii_case("disabled") || c.eq_ignore_ascii_case("active"))
}

async fn visible_controls(page: &mut dyn ListingPage) -> Result<Vec<Control>, FetchError> {
    Ok(page
        .controls()
        .await?
        .into_iter()
        .filter(|c| c.visible && !is_disabled(c))
        .collect())
}

/// Page number carried by a `page=`/`pagina=` query parameter.
pub fn page_param(url: &str) -> Option<u32> {
    PAGE_PARAM_RE
        .captures(url)
        .and_then(|caps| caps[2].parse().ok())
}

/// Replaces the page parameter of `url`, or appends one.
pub fn rewrite_page_param(url: &str, page: u32) -> String {
    if PAGE_PARAM_RE.is_match(url) {
        return PAGE_PARAM_RE
            .replace(url, |caps: &regex::Captures| format!("{}{}", &caps[1], page))
            .into_owned();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}page={page}")
}

/// Next-page address for the strategies that bypass the page's own controls.
async fn next_address(
    page: &mut dyn ListingPage,
    ctx: &LocateContext,
) -> Result<Option<String>, FetchError> {
    let Some(url) = page.current_url().await? else {
        return Ok(None);
    };
    let Some(next) = ctx.next_page.or_else(|| page_param(&url).map(|p| p + 1)) else {
        return Ok(None);
    };
    let rewritten = rewrite_page_param(&url, next);
    Ok((rewritten != url).then_some(rewritten))
}

// ============================================================================
// Semantic
// ============================================================================

/// Controls whose visible text or aria-label says "next".
pub struct NextTextStrategy;

#[async_trait]
impl LocatorStrategy for NextTextStrategy {
    fn name(&self) -> &'static str {
        "next-text"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Semantic
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        _ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        Ok(visible_controls(page)
            .await?
            .into_iter()
            .filter(looks_like_next)
            .map(Candidate::control)
            .collect())
    }
}

/// Controls whose text is the page number after the current one.
pub struct PageNumberStrategy;

#[async_trait]
impl LocatorStrategy for PageNumberStrategy {
    fn name(&self) -> &'static str {
        "page-number"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Semantic
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        let Some(next) = ctx.next_page else {
            return Ok(Vec::new());
        };
        let wanted = next.to_string();
        Ok(visible_controls(page)
            .await?
            .into_iter()
            .filter(|c| c.text == wanted)
            .map(Candidate::control)
            .collect())
    }
}

/// Controls carrying a "next"-like CSS class (`next`, `pagination-next`, ...).
pub struct ClassNameStrategy;

#[async_trait]
impl LocatorStrategy for ClassNameStrategy {
    fn name(&self) -> &'static str {
        "class-name"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Semantic
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        _ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        Ok(visible_controls(page)
            .await?
            .into_iter()
            .filter(|c| {
                c.classes.iter().any(|class| {
                    let class = class.to_lowercase();
                    NEXT_CLASS_HINTS.iter().any(|hint| class.contains(hint))
                })
            })
            .map(Candidate::control)
            .collect())
    }
}

/// Links whose `page=`/`pagina=` parameter points at the next page.
pub struct PageParameterStrategy;

#[async_trait]
impl LocatorStrategy for PageParameterStrategy {
    fn name(&self) -> &'static str {
        "page-parameter"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Semantic
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        let Some(next) = ctx.next_page else {
            return Ok(Vec::new());
        };
        Ok(visible_controls(page)
            .await?
            .into_iter()
            .filter(|c| c.href.as_deref().and_then(page_param) == Some(next))
            .map(Candidate::control)
            .collect())
    }
}

// ============================================================================
// Structural
// ============================================================================

/// Short pagination-looking controls below or to the right of the results
/// table: forward glyphs, "next" labels, or numbers past the current page.
pub struct AnchorRelativeStrategy;

#[async_trait]
impl LocatorStrategy for AnchorRelativeStrategy {
    fn name(&self) -> &'static str {
        "anchor-relative"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Structural
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        let Some(anchor) = page.anchor().await? else {
            return Ok(Vec::new());
        };
        let current = ctx.current_page.unwrap_or(1);
        Ok(visible_controls(page)
            .await?
            .into_iter()
            .filter(|c| {
                let below = c.bounds.y >= anchor.bottom();
                let beside = c.bounds.x >= anchor.right() && c.bounds.y >= anchor.y;
                below || beside
            })
            .filter(|c| {
                looks_like_next(c) || c.text.parse::<u32>().is_ok_and(|n| n > current)
            })
            .map(Candidate::control)
            .collect())
    }
}

// ============================================================================
// Destructive
// ============================================================================

/// Injects a control that loads the next-page address, then clicks it.
pub struct SyntheticControlStrategy;

#[async_trait]
impl LocatorStrategy for SyntheticControlStrategy {
    fn name(&self) -> &'static str {
        "synthetic-control"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Destructive
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        Ok(next_address(page, ctx)
            .await?
            .map(|url| Candidate {
                target: Target::Injected { url },
                text: String::new(),
                bounds: None,
            })
            .into_iter()
            .collect())
    }
}

/// Loads the current address with its page parameter rewritten.
pub struct UrlRewriteStrategy;

#[async_trait]
impl LocatorStrategy for UrlRewriteStrategy {
    fn name(&self) -> &'static str {
        "url-rewrite"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Destructive
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        Ok(next_address(page, ctx)
            .await?
            .map(Candidate::address)
            .into_iter()
            .collect())
    }
}

/// Tabs through the page until a "next"-like control holds focus, then
/// presses Enter on it.
pub struct KeyboardFocusStrategy {
    pub max_tabs: usize,
}

impl Default for KeyboardFocusStrategy {
    fn default() -> Self {
        Self { max_tabs: 30 }
    }
}

#[async_trait]
impl LocatorStrategy for KeyboardFocusStrategy {
    fn name(&self) -> &'static str {
        "keyboard-focus"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Destructive
    }

    async fn locate(
        &self,
        page: &mut dyn ListingPage,
        _ctx: &LocateContext,
    ) -> Result<Vec<Candidate>, FetchError> {
        for _ in 0..self.max_tabs {
            page.press_key(Key::Tab).await?;
            if let Some(focused) = page.focused().await? {
                if looks_like_next(&focused) {
                    return Ok(vec![Candidate {
                        text: focused.text.clone(),
                        bounds: Some(focused.bounds),
                        target: Target::FocusedControl(focused),
                    }]);
                }
            }
        }
        Ok(Vec::new())
    }
}

/// The full cascade in priority order.
pub fn default_strategies() -> Vec<Box<dyn LocatorStrategy>> {
    vec![
        Box::new(NextTextStrategy),
        Box::new(PageNumberStrategy),
        Box::new(ClassNameStrategy),
        Box::new(PageParameterStrategy),
        Box::new(AnchorRelativeStrategy),
        Box::new(SyntheticControlStrategy),
        Box::new(UrlRewriteStrategy),
        Box::new(KeyboardFocusStrategy::default()),
    ]
}
