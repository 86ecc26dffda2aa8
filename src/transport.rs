//! [`PageController`] across a process boundary.
//!
//! When the agent and the page live in different processes (an extension
//! background worker driving a content script, say), every page primitive
//! becomes a typed [`PageRequest`] answered by a [`PageResponse`]. The agent
//! side wraps a [`PageTransport`] in [`RemotePage`]; the page side answers
//! requests with [`handle_request`] against a local controller.
//!
//! Transport failures have their own retry policy, separate from the one
//! around model calls: an endpoint that is not listening yet is retried with
//! backoff, a closed tab fails immediately, and the tab is looked up again
//! before every retry.
//!
//! # Example
//!
//! ```
//! use page_agent::transport::{ChannelTransport, RemotePage};
//! use page_agent::{InMemoryPage, PageController};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let (transport, endpoint) = ChannelTransport::new(16);
//! tokio::spawn(endpoint.serve(Arc::new(InMemoryPage::new("https://example.com"))));
//!
//! let page = RemotePage::new(transport);
//! let state = page.get_browser_state().await?;
//! assert_eq!(state.url, "https://example.com");
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::page::{ActionResult, BrowserState, PageController, ScrollOptions};
use crate::retry::calculate_backoff_delay;
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

/// One page primitive, addressed by the same names the tools use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PageRequest {
    GetBrowserState,
    UpdateTree,
    CleanUpHighlights,
    ClickElement { index: u32 },
    InputText { index: u32, text: String },
    SelectOption { index: u32, option_text: String },
    Scroll { options: ScrollOptions },
    ScrollHorizontally { options: ScrollOptions },
    ExecuteJavascript { script: String },
    ShowMask,
    HideMask,
    Dispose,
}

impl PageRequest {
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::GetBrowserState => "get_browser_state",
            Self::UpdateTree => "update_tree",
            Self::CleanUpHighlights => "clean_up_highlights",
            Self::ClickElement { .. } => "click_element",
            Self::InputText { .. } => "input_text",
            Self::SelectOption { .. } => "select_option",
            Self::Scroll { .. } => "scroll",
            Self::ScrollHorizontally { .. } => "scroll_horizontally",
            Self::ExecuteJavascript { .. } => "execute_javascript",
            Self::ShowMask => "show_mask",
            Self::HideMask => "hide_mask",
            Self::Dispose => "dispose",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PageResponse {
    BrowserState(BrowserState),
    Tree(String),
    Action(ActionResult),
    /// Success with no payload
    Ack,
    /// The page side received the request but could not carry it out
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("the tab was closed")]
    TabClosed,

    /// Nothing is listening on the other side yet, typically a content
    /// script that has not loaded.
    #[error("receiving end does not exist: {0}")]
    EndpointNotReady(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::EndpointNotReady(_))
    }
}

/// Carries page requests to wherever the page lives.
#[async_trait]
pub trait PageTransport: Send + Sync {
    /// Deliver one request and wait for its answer.
    ///
    /// # Errors
    /// Returns a [`TransportError`] if the request could not be delivered or
    /// no answer came back.
    async fn send(&self, request: PageRequest) -> Result<PageResponse, TransportError>;

    /// Whether the target tab still exists.
    async fn tab_exists(&self) -> bool;
}

#[async_trait]
impl<T: PageTransport + ?Sized> PageTransport for Arc<T> {
    async fn send(&self, request: PageRequest) -> Result<PageResponse, TransportError> {
        (**self).send(request).await
    }

    async fn tab_exists(&self) -> bool {
        (**self).tab_exists().await
    }
}

/// Retry policy for [`PageTransport`] failures.
#[derive(Clone, Debug)]
pub struct TransportRetryPolicy {
    config: RetryConfig,
}

impl Default for TransportRetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
        })
    }
}

impl TransportRetryPolicy {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Send `request`, retrying while the endpoint is not ready.
    ///
    /// # Errors
    /// Returns [`TransportError::TabClosed`] as soon as the tab is gone,
    /// any non-retryable error unchanged, or the last error once retries
    /// are exhausted.
    pub async fn send<T>(
        &self,
        transport: &T,
        request: &PageRequest,
    ) -> Result<PageResponse, TransportError>
    where
        T: PageTransport + ?Sized,
    {
        let mut attempt = 0;
        loop {
            let error = match transport.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if !error.is_retryable() || attempt >= self.config.max_retries {
                return Err(error);
            }

            attempt += 1;
            let delay = calculate_backoff_delay(attempt, &self.config);
            debug!(
                "Page request `{}` failed ({error}), retrying {attempt}/{} in {}ms",
                request.action(),
                self.config.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;

            if !transport.tab_exists().await {
                return Err(TransportError::TabClosed);
            }
        }
    }
}

/// A [`PageController`] whose page lives on the far side of a transport.
pub struct RemotePage<T> {
    transport: T,
    retry: TransportRetryPolicy,
}

impl<T: PageTransport> RemotePage<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: TransportRetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: TransportRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn call(&self, request: PageRequest) -> Result<PageResponse> {
        let action = request.action();
        match self.retry.send(&self.transport, &request).await {
            Ok(PageResponse::Failed(message)) => bail!("`{action}` failed in the page: {message}"),
            Ok(response) => Ok(response),
            Err(e) => {
                warn!("Page request `{action}` failed: {e}");
                Err(anyhow!(e).context(format!("page request `{action}` failed")))
            }
        }
    }

    async fn call_action(&self, request: PageRequest) -> Result<ActionResult> {
        let action = request.action();
        match self.call(request).await? {
            PageResponse::Action(result) => Ok(result),
            other => Err(unexpected(action, &other)),
        }
    }

    async fn call_ack(&self, request: PageRequest) -> Result<()> {
        let action = request.action();
        match self.call(request).await? {
            PageResponse::Ack => Ok(()),
            other => Err(unexpected(action, &other)),
        }
    }
}

fn unexpected(action: &str, response: &PageResponse) -> anyhow::Error {
    anyhow!("unexpected response to `{action}`: {response:?}")
}

#[async_trait]
impl<T: PageTransport> PageController for RemotePage<T> {
    async fn get_browser_state(&self) -> Result<BrowserState> {
        match self.call(PageRequest::GetBrowserState).await? {
            PageResponse::BrowserState(state) => Ok(state),
            other => Err(unexpected("get_browser_state", &other)),
        }
    }

    async fn update_tree(&self) -> Result<String> {
        match self.call(PageRequest::UpdateTree).await? {
            PageResponse::Tree(tree) => Ok(tree),
            other => Err(unexpected("update_tree", &other)),
        }
    }

    async fn clean_up_highlights(&self) -> Result<()> {
        self.call_ack(PageRequest::CleanUpHighlights).await
    }

    async fn click_element(&self, index: u32) -> Result<ActionResult> {
        self.call_action(PageRequest::ClickElement { index }).await
    }

    async fn input_text(&self, index: u32, text: &str) -> Result<ActionResult> {
        self.call_action(PageRequest::InputText {
            index,
            text: text.to_owned(),
        })
        .await
    }

    async fn select_option(&self, index: u32, option_text: &str) -> Result<ActionResult> {
        self.call_action(PageRequest::SelectOption {
            index,
            option_text: option_text.to_owned(),
        })
        .await
    }

    async fn scroll(&self, options: ScrollOptions) -> Result<ActionResult> {
        self.call_action(PageRequest::Scroll { options }).await
    }

    async fn scroll_horizontally(&self, options: ScrollOptions) -> Result<ActionResult> {
        self.call_action(PageRequest::ScrollHorizontally { options })
            .await
    }

    async fn execute_javascript(&self, script: &str) -> Result<ActionResult> {
        self.call_action(PageRequest::ExecuteJavascript {
            script: script.to_owned(),
        })
        .await
    }

    async fn show_mask(&self) -> Result<()> {
        self.call_ack(PageRequest::ShowMask).await
    }

    async fn hide_mask(&self) -> Result<()> {
        self.call_ack(PageRequest::HideMask).await
    }

    async fn dispose(&self) -> Result<()> {
        self.call_ack(PageRequest::Dispose).await
    }
}

/// Answer one request against a local page. Page errors become
/// [`PageResponse::Failed`].
pub async fn handle_request(page: &dyn PageController, request: PageRequest) -> PageResponse {
    let result = match request {
        PageRequest::GetBrowserState => page
            .get_browser_state()
            .await
            .map(PageResponse::BrowserState),
        PageRequest::UpdateTree => page.update_tree().await.map(PageResponse::Tree),
        PageRequest::CleanUpHighlights => {
            page.clean_up_highlights().await.map(|()| PageResponse::Ack)
        }
        PageRequest::ClickElement { index } => {
            page.click_element(index).await.map(PageResponse::Action)
        }
        PageRequest::InputText { index, text } => page
            .input_text(index, &text)
            .await
            .map(PageResponse::Action),
        PageRequest::SelectOption { index, option_text } => page
            .select_option(index, &option_text)
            .await
            .map(PageResponse::Action),
        PageRequest::Scroll { options } => page.scroll(options).await.map(PageResponse::Action),
        PageRequest::ScrollHorizontally { options } => page
            .scroll_horizontally(options)
            .await
            .map(PageResponse::Action),
        PageRequest::ExecuteJavascript { script } => page
            .execute_javascript(&script)
            .await
            .map(PageResponse::Action),
        PageRequest::ShowMask => page.show_mask().await.map(|()| PageResponse::Ack),
        PageRequest::HideMask => page.hide_mask().await.map(|()| PageResponse::Ack),
        PageRequest::Dispose => page.dispose().await.map(|()| PageResponse::Ack),
    };
    result.unwrap_or_else(|e| PageResponse::Failed(format!("{e:#}")))
}

type Envelope = (PageRequest, oneshot::Sender<PageResponse>);

/// In-process transport over a tokio channel, mostly for tests and demos.
///
/// Dropping the [`PageEndpoint`] closes the "tab".
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Envelope>,
}

/// Page side of a [`ChannelTransport`].
pub struct PageEndpoint {
    rx: mpsc::Receiver<Envelope>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new(buffer: usize) -> (Self, PageEndpoint) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, PageEndpoint { rx })
    }
}

#[async_trait]
impl PageTransport for ChannelTransport {
    async fn send(&self, request: PageRequest) -> Result<PageResponse, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| TransportError::TabClosed)?;
        reply_rx
            .await
            .map_err(|_| TransportError::EndpointNotReady("the page dropped the request".into()))
    }

    async fn tab_exists(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl PageEndpoint {
    /// Answer requests until every [`ChannelTransport`] clone is dropped.
    pub async fn serve(mut self, page: Arc<dyn PageController>) {
        while let Some((request, reply)) = self.rx.recv().await {
            let action = request.action();
            let response = handle_request(page.as_ref(), request).await;
            if reply.send(response).is_err() {
                debug!("Caller went away before `{action}` was answered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{InMemoryPage, PageElement};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Fails with scripted errors before delegating to a real endpoint.
    struct FlakyTransport {
        failures: Mutex<VecDeque<TransportError>>,
        inner: ChannelTransport,
        tab_open: AtomicBool,
        sends: AtomicUsize,
    }

    impl FlakyTransport {
        fn new(failures: Vec<TransportError>, page: InMemoryPage) -> Self {
            let (inner, endpoint) = ChannelTransport::new(8);
            tokio::spawn(endpoint.serve(Arc::new(page)));
            Self {
                failures: Mutex::new(failures.into()),
                inner,
                tab_open: AtomicBool::new(true),
                sends: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageTransport for FlakyTransport {
        async fn send(&self, request: PageRequest) -> Result<PageResponse, TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let failure = self.failures.lock().unwrap().pop_front();
            match failure {
                Some(error) => Err(error),
                None => self.inner.send(request).await,
            }
        }

        async fn tab_exists(&self) -> bool {
            self.tab_open.load(Ordering::SeqCst)
        }
    }

    fn fast() -> TransportRetryPolicy {
        TransportRetryPolicy::new(RetryConfig::fast())
    }

    fn page() -> InMemoryPage {
        InMemoryPage::new("https://shop.test")
            .with_title("Shop")
            .with_element(PageElement::new("button").text("Buy"))
    }

    #[test]
    fn requests_are_tagged_by_action() {
        let request = PageRequest::InputText {
            index: 2,
            text: "hi".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "action": "input_text", "index": 2, "text": "hi" })
        );
        assert_eq!(request.action(), "input_text");
        assert_eq!(
            serde_json::to_value(PageRequest::ShowMask).unwrap(),
            json!({ "action": "show_mask" })
        );
    }

    #[tokio::test]
    async fn remote_page_round_trips_through_channel() -> Result<()> {
        let (transport, endpoint) = ChannelTransport::new(8);
        let local = Arc::new(page());
        tokio::spawn(endpoint.serve(local.clone()));
        let remote = RemotePage::new(transport);

        let state = remote.get_browser_state().await?;
        assert_eq!(state.title, "Shop");
        assert!(state.element_tree.contains("[0]<button>Buy</button>"));

        let clicked = remote.click_element(0).await?;
        assert!(clicked.success);
        let missing = remote.click_element(9).await?;
        assert!(!missing.success);

        remote.show_mask().await?;
        assert!(local.mask_visible());
        remote.hide_mask().await?;
        assert_eq!(local.actions(), vec!["click:0"]);
        Ok(())
    }

    #[tokio::test]
    async fn page_errors_surface_as_failures() -> Result<()> {
        let local = Arc::new(page());
        local.set_unavailable(true);
        let (transport, endpoint) = ChannelTransport::new(8);
        tokio::spawn(endpoint.serve(local));
        let remote = RemotePage::new(transport);

        let err = remote.get_browser_state().await.unwrap_err();
        assert!(format!("{err:#}").contains("page is not reachable"));
        Ok(())
    }

    #[tokio::test]
    async fn endpoint_not_ready_is_retried() -> Result<()> {
        let transport = FlakyTransport::new(
            vec![
                TransportError::EndpointNotReady("no listener".into()),
                TransportError::EndpointNotReady("no listener".into()),
            ],
            page(),
        );
        let transport = Arc::new(transport);
        let remote = RemotePage::new(transport.clone()).with_retry_policy(fast());

        let state = remote.get_browser_state().await?;
        assert_eq!(state.url, "https://shop.test");
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn closed_tab_fails_fast() {
        let transport = Arc::new(FlakyTransport::new(vec![TransportError::TabClosed], page()));
        let remote = RemotePage::new(transport.clone()).with_retry_policy(fast());

        let err = remote.click_element(0).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransportError>(),
            Some(&TransportError::TabClosed)
        );
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tab_is_checked_before_retrying() {
        let transport = Arc::new(FlakyTransport::new(
            vec![TransportError::EndpointNotReady("no listener".into())],
            page(),
        ));
        transport.tab_open.store(false, Ordering::SeqCst);
        let policy = fast();

        let err = policy
            .send(transport.as_ref(), &PageRequest::GetBrowserState)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::TabClosed);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let not_ready = || TransportError::EndpointNotReady("no listener".into());
        let transport = Arc::new(FlakyTransport::new(
            vec![not_ready(), not_ready(), not_ready(), not_ready(), not_ready()],
            page(),
        ));
        let policy = fast();

        let err = policy
            .send(transport.as_ref(), &PageRequest::UpdateTree)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // One attempt plus three retries.
        assert_eq!(transport.sends.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn dropped_endpoint_reads_as_closed_tab() {
        let (transport, endpoint) = ChannelTransport::new(1);
        drop(endpoint);
        assert!(!transport.tab_exists().await);
        assert_eq!(
            transport.send(PageRequest::HideMask).await,
            Err(TransportError::TabClosed)
        );
    }
}
