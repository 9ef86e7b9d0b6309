//! Scripted listing page shared by the navigator, strategy and pipeline tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::harvest::traits::{Bounds, Control, ControlId, Key, ListingPage};
use crate::traits::FetchError;

/// A listing page that walks through a fixed list of signatures. Every
/// successful interaction (click, navigation, Enter on a focused control)
/// moves to the next signature unless the page is `stuck`.
pub struct ScriptedPage {
    signatures: Vec<Option<String>>,
    index: usize,
    controls: Vec<Control>,
    anchor: Option<Bounds>,
    url: Option<String>,
    focus_order: Vec<Control>,
    focus: Option<usize>,
    stuck: bool,
    fail_activation: bool,
    delay: Option<Duration>,
    settle_delay: Option<Duration>,
    tabs: usize,
    pub activated: Vec<ControlId>,
    pub navigations: Vec<String>,
    pub injected: Vec<String>,
}

impl ScriptedPage {
    pub fn new(signatures: &[&str]) -> Self {
        Self {
            signatures: signatures.iter().map(|s| Some(s.to_string())).collect(),
            index: 0,
            controls: Vec::new(),
            anchor: None,
            url: None,
            focus_order: Vec::new(),
            focus: None,
            stuck: false,
            fail_activation: false,
            delay: None,
            settle_delay: None,
            tabs: 0,
            activated: Vec::new(),
            navigations: Vec::new(),
            injected: Vec::new(),
        }
    }

    /// A page without a results-range indicator.
    pub fn unsigned() -> Self {
        let mut page = Self::new(&[]);
        page.signatures = vec![None];
        page
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }

    pub fn with_anchor(mut self, anchor: Bounds) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_focus_order(mut self, order: Vec<Control>) -> Self {
        self.focus_order = order;
        self
    }

    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn failing_clicks(mut self) -> Self {
        self.fail_activation = true;
        self
    }

    /// Makes every `controls()` call take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every `settle()` call take `delay`, after the page has moved.
    pub fn with_slow_settle(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    pub fn tabs_pressed(&self) -> usize {
        self.tabs
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    fn step(&mut self) {
        if !self.stuck && self.index + 1 < self.signatures.len() {
            self.index += 1;
        }
    }
}

#[async_trait]
impl ListingPage for ScriptedPage {
    async fn signature(&mut self) -> Result<Option<String>, FetchError> {
        Ok(self.signatures.get(self.index).cloned().flatten())
    }

    async fn controls(&mut self) -> Result<Vec<Control>, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.controls.clone())
    }

    async fn anchor(&mut self) -> Result<Option<Bounds>, FetchError> {
        Ok(self.anchor)
    }

    async fn activate(&mut self, control: &Control) -> Result<(), FetchError> {
        if self.fail_activation {
            return Err(FetchError::Transient("element is not clickable".into()));
        }
        self.activated.push(control.id);
        self.step();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Option<String>, FetchError> {
        Ok(self.url.clone())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), FetchError> {
        self.navigations.push(url.to_string());
        self.url = Some(url.to_string());
        self.step();
        Ok(())
    }

    async fn inject_control(&mut self, target_url: &str) -> Result<Control, FetchError> {
        self.injected.push(target_url.to_string());
        Ok(Control::new(9_999, "button", "Próxima página"))
    }

    async fn press_key(&mut self, key: Key) -> Result<(), FetchError> {
        match key {
            Key::Tab => {
                self.tabs += 1;
                let next = self.focus.map_or(0, |i| i + 1);
                self.focus = (next < self.focus_order.len()).then_some(next);
            }
            Key::Enter => {
                if self.focus.is_some() {
                    self.step();
                }
            }
        }
        Ok(())
    }

    async fn settle(&mut self) -> Result<(), FetchError> {
        if let Some(delay) = self.settle_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn focused(&mut self) -> Result<Option<Control>, FetchError> {
        Ok(self.focus.and_then(|i| self.focus_order.get(i).cloned()))
    }
}
