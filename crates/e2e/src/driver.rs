//! Navigation driver and the per-scenario page context

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{ActStatus, Action, ElementHandle, LoadState, Observation, Page, Predicate};
use crate::config::{join_url, HarnessConfig};
use crate::error::{E2eError, E2eResult};
use crate::poll::Poller;

/// One live browsing context, owned by a single scenario.
///
/// Holds no element cache: every lookup goes to the page, and handles from
/// an earlier navigation are refused.
pub struct PageContext {
    page: Box<dyn Page>,
    url: Option<String>,
    ready: bool,
    generation: u64,
    closed: bool,
}

impl PageContext {
    pub fn new(page: Box<dyn Page>) -> Self {
        Self {
            page,
            url: None,
            ready: false,
            generation: 0,
            closed: false,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// True only after the last navigation completed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn query(&mut self, selector: &str) -> E2eResult<Option<ElementHandle>> {
        if !self.ready {
            return Ok(None);
        }
        let found = self.page.query(selector).await?;
        Ok(found.filter(|h| h.generation == self.generation))
    }

    pub async fn perform(&mut self, element: &ElementHandle, action: &Action) -> E2eResult<ActStatus> {
        if element.generation != self.generation {
            return Ok(ActStatus::Detached);
        }
        self.page.perform(element, action).await
    }

    pub async fn observe(&mut self, selector: &str, predicate: &Predicate) -> E2eResult<Observation> {
        if !self.ready {
            return Ok(Observation {
                holds: false,
                observed: "no page loaded".to_string(),
            });
        }
        self.page.observe(selector, predicate).await
    }

    pub async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.page.screenshot(path).await
    }

    /// Release the browsing context. Idempotent.
    pub async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ready = false;
        self.page.close().await
    }
}

impl Drop for PageContext {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Page context for {:?} dropped without being closed", self.url);
        }
    }
}

/// Loads pages and waits for them to become ready
#[derive(Debug, Clone)]
pub struct NavigationDriver {
    base_url: String,
    timeout: Duration,
    interval: Duration,
}

impl NavigationDriver {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: config.page_load_timeout(),
            interval: config.retry.interval(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open `url` in the scenario's context, suspending until the load
    /// completes or the navigation budget runs out.
    pub async fn open(&self, context: &mut PageContext, url: &str) -> E2eResult<()> {
        self.open_with_timeout(context, url, self.timeout).await
    }

    pub async fn open_with_timeout(
        &self,
        context: &mut PageContext,
        url: &str,
        timeout: Duration,
    ) -> E2eResult<()> {
        let target = self.resolve(url);
        debug!("Opening {}", target);

        context.ready = false;
        context.generation += 1;
        context.url = Some(target.clone());

        let mut poller = Poller::new(self.interval, timeout);
        context.page.goto(&target).await?;

        let last_state = loop {
            let state = context.page.load_state().await?;
            match state {
                LoadState::Complete => {
                    context.ready = true;
                    debug!("Loaded {} in {} ms", target, poller.elapsed().as_millis());
                    return Ok(());
                }
                LoadState::Failed => break state,
                _ => {}
            }
            if !poller.wait().await {
                break state;
            }
        };

        Err(E2eError::Navigation {
            url: target,
            elapsed: poller.elapsed(),
            last_state,
        })
    }

    fn resolve(&self, url: &str) -> String {
        join_url(&self.base_url, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserLauncher;
    use crate::sim::{SimElement, SimPage, SimulatedSite};

    async fn context_on(site: &SimulatedSite) -> PageContext {
        let browser = site.launch().await.unwrap();
        PageContext::new(browser.new_page().await.unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_waits_for_load() {
        let site = SimulatedSite::new().page("/shell.html", SimPage::new().loads_after(Duration::from_millis(300)));
        let driver = NavigationDriver::new(&HarnessConfig::default());
        let mut context = context_on(&site).await;

        let start = tokio::time::Instant::now();
        driver.open(&mut context, "/shell.html").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(context.is_ready());
        assert_eq!(context.url(), Some("http://localhost:8000/shell.html"));
        context.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out_with_last_state() {
        let site = SimulatedSite::new().page("/hang.html", SimPage::new().never_loads());
        let driver = NavigationDriver::new(&HarnessConfig::default()).with_timeout(Duration::from_millis(700));
        let mut context = context_on(&site).await;

        let err = driver.open(&mut context, "/hang.html").await.unwrap_err();
        match err {
            E2eError::Navigation { elapsed, last_state, .. } => {
                assert_eq!(last_state, LoadState::Loading);
                assert_eq!(elapsed, Duration::from_millis(700));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!context.is_ready());
        context.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handles_do_not_survive_navigation() {
        let site = SimulatedSite::new().page("/", SimPage::new().element(SimElement::new("#btn3")));
        let driver = NavigationDriver::new(&HarnessConfig::default());
        let mut context = context_on(&site).await;

        assert!(context.query("#btn3").await.unwrap().is_none());
        driver.open(&mut context, "/").await.unwrap();
        let handle = context.query("#btn3").await.unwrap().unwrap();
        assert_eq!(handle.generation, context.generation());

        driver.open(&mut context, "/").await.unwrap();
        assert_eq!(context.perform(&handle, &Action::Click).await.unwrap(), ActStatus::Detached);

        context.close().await.unwrap();
        context.close().await.unwrap();
        assert_eq!(site.open_pages(), 0);
    }
}
