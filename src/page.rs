//! Page control surface.
//!
//! [`PageController`] is everything the agent needs from a live page: a
//! serialized view of the interactive elements and a handful of actions
//! addressed by element index. Implementations live elsewhere (a content
//! script, a CDP session, or [`RemotePage`](crate::transport::RemotePage)
//! over a message channel).
//!
//! [`InMemoryPage`] is a scripted page used by tests and the demos.

use crate::config::DomConfig;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::RwLock;

/// Snapshot of the page handed to the model on every step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserState {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Flattened interactive-element tree, one `[index]<tag>` line per element
    pub element_tree: String,
    #[serde(default)]
    pub pixels_above: u32,
    #[serde(default)]
    pub pixels_below: u32,
}

/// Uniform result of a page action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    #[must_use]
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Text describing the outcome, whichever way it went.
    #[must_use]
    pub fn message(&self) -> String {
        if self.success {
            self.data.clone().unwrap_or_else(|| "Done".to_owned())
        } else {
            self.error
                .clone()
                .unwrap_or_else(|| "Action failed".to_owned())
        }
    }
}

/// How far to scroll.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollAmount {
    /// Multiples of the viewport (or container) size
    Pages(f64),
    Pixels(u32),
}

impl Default for ScrollAmount {
    fn default() -> Self {
        Self::Pages(1.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollOptions {
    /// Down for vertical scrolling, right for horizontal
    pub forward: bool,
    #[serde(default)]
    pub amount: ScrollAmount,
    /// Scroll inside this element instead of the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// DOM read/write primitives consumed by the page tools and the loop.
///
/// Element indices refer to the most recent [`BrowserState::element_tree`].
#[async_trait]
pub trait PageController: Send + Sync {
    /// # Errors
    /// Returns an error if the page cannot be read.
    async fn get_browser_state(&self) -> Result<BrowserState>;

    /// Re-extract the element tree and return its serialized form.
    ///
    /// # Errors
    /// Returns an error if the page cannot be read.
    async fn update_tree(&self) -> Result<String>;

    /// # Errors
    /// Returns an error if the overlay cannot be reached.
    async fn clean_up_highlights(&self) -> Result<()>;

    /// # Errors
    /// Returns an error only for transport-level failures; a missing element
    /// is a failed [`ActionResult`].
    async fn click_element(&self, index: u32) -> Result<ActionResult>;

    /// # Errors
    /// Returns an error only for transport-level failures.
    async fn input_text(&self, index: u32, text: &str) -> Result<ActionResult>;

    /// # Errors
    /// Returns an error only for transport-level failures.
    async fn select_option(&self, index: u32, option_text: &str) -> Result<ActionResult>;

    /// # Errors
    /// Returns an error only for transport-level failures.
    async fn scroll(&self, options: ScrollOptions) -> Result<ActionResult>;

    /// # Errors
    /// Returns an error only for transport-level failures.
    async fn scroll_horizontally(&self, options: ScrollOptions) -> Result<ActionResult>;

    /// # Errors
    /// Returns an error only for transport-level failures.
    async fn execute_javascript(&self, script: &str) -> Result<ActionResult>;

    /// # Errors
    /// Returns an error if the overlay cannot be reached.
    async fn show_mask(&self) -> Result<()>;

    /// # Errors
    /// Returns an error if the overlay cannot be reached.
    async fn hide_mask(&self) -> Result<()>;

    /// # Errors
    /// Returns an error if cleanup fails.
    async fn dispose(&self) -> Result<()>;
}

/// An element of an [`InMemoryPage`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageElement {
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    /// Option labels for `<select>` elements
    pub options: Vec<String>,
}

impl PageElement {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Match a simple selector: `tag`, `#id` or `.class`.
    fn matches(&self, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            return self.attributes.get("id").is_some_and(|v| v == id);
        }
        if let Some(class) = selector.strip_prefix('.') {
            return self
                .attributes
                .get("class")
                .is_some_and(|v| v.split_whitespace().any(|c| c == class));
        }
        self.tag.eq_ignore_ascii_case(selector)
    }

    fn is_text_field(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea")
    }
}

const DEFAULT_ATTRIBUTES: &[&str] = &[
    "id",
    "type",
    "name",
    "placeholder",
    "href",
    "aria-label",
    "role",
    "value",
];

struct PageState {
    url: String,
    title: String,
    elements: Vec<PageElement>,
    values: HashMap<u32, String>,
    scroll_y: u32,
    scroll_x: u32,
    page_height: u32,
    page_width: u32,
    viewport_height: u32,
    viewport_width: u32,
    scripts: HashMap<String, String>,
    actions: Vec<String>,
    mask_visible: bool,
    highlight_cleanups: usize,
    unavailable: bool,
    disposed: bool,
}

/// Scripted in-memory page for tests and demos.
///
/// Element indices are positions among the elements not excluded by the
/// [`DomConfig`] block list. Clicking an element with an `href` navigates.
pub struct InMemoryPage {
    state: RwLock<PageState>,
    dom: DomConfig,
}

impl InMemoryPage {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(PageState {
                url: url.into(),
                title: String::new(),
                elements: Vec::new(),
                values: HashMap::new(),
                scroll_y: 0,
                scroll_x: 0,
                page_height: 800,
                page_width: 1280,
                viewport_height: 800,
                viewport_width: 1280,
                scripts: HashMap::new(),
                actions: Vec::new(),
                mask_visible: false,
                highlight_cleanups: 0,
                unavailable: false,
                disposed: false,
            }),
            dom: DomConfig::default(),
        }
    }

    #[must_use]
    pub fn with_dom_config(mut self, dom: DomConfig) -> Self {
        self.dom = dom;
        self
    }

    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.title = title.into();
        }
        self
    }

    #[must_use]
    pub fn with_element(self, element: PageElement) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.elements.push(element);
        }
        self
    }

    /// Total scrollable size of the document.
    #[must_use]
    pub fn with_page_size(self, width: u32, height: u32) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.page_width = width;
            state.page_height = height;
        }
        self
    }

    /// Canned result for `execute_javascript(script)`.
    #[must_use]
    pub fn with_script_result(self, script: impl Into<String>, result: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.scripts.insert(script.into(), result.into());
        }
        self
    }

    #[must_use]
    pub const fn dom_config(&self) -> &DomConfig {
        &self.dom
    }

    /// Make `get_browser_state` fail, as a detached tab would.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.unavailable = unavailable;
        }
    }

    pub fn navigate(&self, url: impl Into<String>) {
        if let Ok(mut state) = self.state.write() {
            state.url = url.into();
            state.scroll_y = 0;
            state.scroll_x = 0;
        }
    }

    /// Log of actions performed, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| s.actions.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.state.read().map(|s| s.url.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn value_of(&self, index: u32) -> Option<String> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.values.get(&index).cloned())
    }

    #[must_use]
    pub fn scroll_position(&self) -> (u32, u32) {
        self.state
            .read()
            .map(|s| (s.scroll_x, s.scroll_y))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn mask_visible(&self) -> bool {
        self.state.read().is_ok_and(|s| s.mask_visible)
    }

    #[must_use]
    pub fn highlight_cleanups(&self) -> usize {
        self.state.read().map(|s| s.highlight_cleanups).unwrap_or(0)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.read().is_ok_and(|s| s.disposed)
    }

    fn is_blocked(&self, element: &PageElement) -> bool {
        let allowed = self.dom.interactive_allowlist.iter().any(|s| element.matches(s));
        !allowed && self.dom.interactive_blocklist.iter().any(|s| element.matches(s))
    }

    /// Elements visible to the model, paired with their indices.
    fn indexed<'a>(&self, state: &'a PageState) -> Vec<(u32, &'a PageElement)> {
        state
            .elements
            .iter()
            .filter(|e| !self.is_blocked(e))
            .zip(0u32..)
            .map(|(e, i)| (i, e))
            .collect()
    }

    fn render_tree(&self, state: &PageState) -> String {
        let mut out = String::new();
        for (index, element) in self.indexed(state) {
            let _ = write!(out, "[{index}]<{}", element.tag);
            for (name, value) in &element.attributes {
                let keep = DEFAULT_ATTRIBUTES.contains(&name.as_str())
                    || self.dom.extra_attributes.iter().any(|a| a == name);
                if keep {
                    let _ = write!(out, " {name}={value:?}");
                }
            }
            if let Some(value) = state.values.get(&index) {
                let _ = write!(out, " value={value:?}");
            }
            let _ = writeln!(out, ">{}</{}>", element.text, element.tag);
            for option in &element.options {
                let _ = writeln!(out, "\t<option>{option}</option>");
            }
        }
        out
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PageState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().ok().context("lock poisoned")?;
        if state.disposed {
            bail!("page controller has been disposed");
        }
        f(&mut *state)
    }

    fn element_at(&self, state: &PageState, index: u32) -> Option<PageElement> {
        self.indexed(state)
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, e)| e.clone())
    }

    fn scroll_delta(amount: ScrollAmount, viewport: u32) -> u32 {
        match amount {
            ScrollAmount::Pages(pages) => {
                let px = (f64::from(viewport) * pages.abs()).round();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let px = px.min(f64::from(u32::MAX)) as u32;
                px
            }
            ScrollAmount::Pixels(px) => px,
        }
    }
}

#[async_trait]
impl PageController for InMemoryPage {
    async fn get_browser_state(&self) -> Result<BrowserState> {
        self.with_state(|state| {
            if state.unavailable {
                bail!("page is not reachable");
            }
            let max_y = state.page_height.saturating_sub(state.viewport_height);
            Ok(BrowserState {
                url: state.url.clone(),
                title: state.title.clone(),
                element_tree: self.render_tree(state),
                pixels_above: state.scroll_y,
                pixels_below: max_y.saturating_sub(state.scroll_y),
            })
        })
    }

    async fn update_tree(&self) -> Result<String> {
        self.with_state(|state| Ok(self.render_tree(state)))
    }

    async fn clean_up_highlights(&self) -> Result<()> {
        self.with_state(|state| {
            state.highlight_cleanups += 1;
            Ok(())
        })
    }

    async fn click_element(&self, index: u32) -> Result<ActionResult> {
        self.with_state(|state| {
            let Some(element) = self.element_at(state, index) else {
                return Ok(ActionResult::failed(format!(
                    "No interactive element with index {index}"
                )));
            };
            state.actions.push(format!("click:{index}"));
            if let Some(href) = element.attributes.get("href") {
                let target = url::Url::parse(&state.url)
                    .and_then(|base| base.join(href))
                    .map_or_else(|_| href.clone(), |u| u.to_string());
                state.url = target;
                state.scroll_y = 0;
                return Ok(ActionResult::ok(format!(
                    "Clicked element {index} and navigated to {}",
                    state.url
                )));
            }
            Ok(ActionResult::ok(format!(
                "Clicked element {index} <{}>{}",
                element.tag, element.text
            )))
        })
    }

    async fn input_text(&self, index: u32, text: &str) -> Result<ActionResult> {
        self.with_state(|state| {
            let Some(element) = self.element_at(state, index) else {
                return Ok(ActionResult::failed(format!(
                    "No interactive element with index {index}"
                )));
            };
            if !element.is_text_field() {
                return Ok(ActionResult::failed(format!(
                    "Element {index} <{}> does not accept text input",
                    element.tag
                )));
            }
            state.values.insert(index, text.to_owned());
            state.actions.push(format!("input:{index}:{text}"));
            Ok(ActionResult::ok(format!("Typed {text:?} into element {index}")))
        })
    }

    async fn select_option(&self, index: u32, option_text: &str) -> Result<ActionResult> {
        self.with_state(|state| {
            let Some(element) = self.element_at(state, index) else {
                return Ok(ActionResult::failed(format!(
                    "No interactive element with index {index}"
                )));
            };
            if element.tag != "select" {
                return Ok(ActionResult::failed(format!(
                    "Element {index} <{}> is not a dropdown",
                    element.tag
                )));
            }
            let Some(option) = element
                .options
                .iter()
                .find(|o| o.trim().eq_ignore_ascii_case(option_text.trim()))
            else {
                return Ok(ActionResult::failed(format!(
                    "Option {option_text:?} not found. Available options: {}",
                    element.options.join(", ")
                )));
            };
            state.values.insert(index, option.clone());
            state.actions.push(format!("select:{index}:{option}"));
            Ok(ActionResult::ok(format!(
                "Selected {option:?} in element {index}"
            )))
        })
    }

    async fn scroll(&self, options: ScrollOptions) -> Result<ActionResult> {
        self.with_state(|state| {
            let max_y = state.page_height.saturating_sub(state.viewport_height);
            let delta = Self::scroll_delta(options.amount, state.viewport_height);
            let before = state.scroll_y;
            state.scroll_y = if options.forward {
                before.saturating_add(delta).min(max_y)
            } else {
                before.saturating_sub(delta)
            };
            state.actions.push(format!("scroll:{}", state.scroll_y));
            if state.scroll_y == before {
                let edge = if options.forward { "bottom" } else { "top" };
                return Ok(ActionResult::ok(format!("Already at the {edge} of the page")));
            }
            Ok(ActionResult::ok(format!(
                "Scrolled {} by {}px",
                if options.forward { "down" } else { "up" },
                state.scroll_y.abs_diff(before)
            )))
        })
    }

    async fn scroll_horizontally(&self, options: ScrollOptions) -> Result<ActionResult> {
        self.with_state(|state| {
            let max_x = state.page_width.saturating_sub(state.viewport_width);
            let delta = Self::scroll_delta(options.amount, state.viewport_width);
            let before = state.scroll_x;
            state.scroll_x = if options.forward {
                before.saturating_add(delta).min(max_x)
            } else {
                before.saturating_sub(delta)
            };
            state.actions.push(format!("scroll_x:{}", state.scroll_x));
            Ok(ActionResult::ok(format!(
                "Scrolled {} by {}px",
                if options.forward { "right" } else { "left" },
                state.scroll_x.abs_diff(before)
            )))
        })
    }

    async fn execute_javascript(&self, script: &str) -> Result<ActionResult> {
        self.with_state(|state| {
            state.actions.push(format!("js:{script}"));
            let result = state
                .scripts
                .get(script)
                .cloned()
                .unwrap_or_else(|| "undefined".to_owned());
            Ok(ActionResult::ok(result))
        })
    }

    async fn show_mask(&self) -> Result<()> {
        self.with_state(|state| {
            state.mask_visible = true;
            Ok(())
        })
    }

    async fn hide_mask(&self) -> Result<()> {
        self.with_state(|state| {
            state.mask_visible = false;
            Ok(())
        })
    }

    async fn dispose(&self) -> Result<()> {
        let mut state = self.state.write().ok().context("lock poisoned")?;
        state.mask_visible = false;
        state.disposed = true;
        Ok(())
    }
}
