//! Simulated browser backend
//!
//! Pages are described up front: which elements exist, when they appear,
//! whether they detach, how long the document takes to load. Time is read
//! from `tokio::time`, so tests running with a paused clock get exact
//! timings. Every interaction is appended to an event log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::browser::{
    ActStatus, Action, Browser, BrowserLauncher, ElementHandle, LoadState, Observation, Page,
    Predicate,
};
use crate::error::{E2eError, E2eResult};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// One element of a simulated page
#[derive(Debug, Clone)]
pub struct SimElement {
    selector: String,
    text: String,
    visible: bool,
    attributes: HashMap<String, String>,
    appear_after: Duration,
    detach_after: Option<Duration>,
    detaches_on_action: u32,
    on_click: Option<(String, String)>,
}

impl SimElement {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: String::new(),
            visible: true,
            attributes: HashMap::new(),
            appear_after: Duration::ZERO,
            detach_after: None,
            detaches_on_action: 0,
            on_click: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Rendered this long after the navigation started
    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appear_after = delay;
        self
    }

    /// Removed from the document this long after the navigation started
    pub fn detaches_after(mut self, delay: Duration) -> Self {
        self.detach_after = Some(delay);
        self
    }

    /// The next `times` actions find the element replaced by a fresh copy
    pub fn detaches_on_action(mut self, times: u32) -> Self {
        self.detaches_on_action = times;
        self
    }

    /// Clicking sets the text of `target`
    pub fn on_click_set_text(mut self, target: impl Into<String>, text: impl Into<String>) -> Self {
        self.on_click = Some((target.into(), text.into()));
        self
    }
}

/// A simulated document
#[derive(Debug, Clone)]
pub struct SimPage {
    load_delay: Option<Duration>,
    elements: Vec<SimElement>,
}

impl Default for SimPage {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPage {
    /// A page that loads immediately
    pub fn new() -> Self {
        Self {
            load_delay: Some(Duration::ZERO),
            elements: Vec::new(),
        }
    }

    pub fn loads_after(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// The load event never fires
    pub fn never_loads(mut self) -> Self {
        self.load_delay = None;
        self
    }

    pub fn element(mut self, element: SimElement) -> Self {
        self.elements.push(element);
        self
    }
}

/// Everything the simulated browser was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Navigate(String),
    Query(String),
    Perform { selector: String, action: String },
    Observe(String),
    Screenshot(PathBuf),
    Close,
}

#[derive(Debug, Default)]
struct SiteInner {
    pages: Mutex<HashMap<String, SimPage>>,
    events: Mutex<Vec<SimEvent>>,
    fail_screenshots: AtomicBool,
    open_pages: AtomicUsize,
    launches: AtomicUsize,
}

/// A set of simulated pages, keyed by URL path. Also the launcher.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSite {
    inner: Arc<SiteInner>,
}

impl SimulatedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, path: impl Into<String>, page: SimPage) -> Self {
        self.inner.pages.lock().insert(path.into(), page);
        self
    }

    pub fn fail_screenshots(self) -> Self {
        self.inner.fail_screenshots.store(true, Ordering::SeqCst);
        self
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.inner.events.lock().clone()
    }

    /// Contexts opened and not yet closed
    pub fn open_pages(&self) -> usize {
        self.inner.open_pages.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    /// Successful actions named `action` against `selector`
    pub fn actions_on(&self, selector: &str, action: &str) -> usize {
        self.inner
            .events
            .lock()
            .iter()
            .filter(|e| {
                matches!(e, SimEvent::Perform { selector: s, action: a } if s == selector && a == action)
            })
            .count()
    }

    fn record(&self, event: SimEvent) {
        self.inner.events.lock().push(event);
    }

    fn lookup(&self, path: &str) -> Option<SimPage> {
        self.inner.pages.lock().get(path).cloned()
    }
}

#[async_trait]
impl BrowserLauncher for SimulatedSite {
    async fn launch(&self) -> E2eResult<Box<dyn Browser>> {
        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimBrowser { site: self.clone() }))
    }
}

struct SimBrowser {
    site: SimulatedSite,
}

#[async_trait]
impl Browser for SimBrowser {
    async fn new_page(&self) -> E2eResult<Box<dyn Page>> {
        self.site.inner.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimTab {
            site: self.site.clone(),
            generation: 0,
            current: None,
            handles: HashMap::new(),
            next_handle: 1,
            detaches_left: HashMap::new(),
            incarnation: HashMap::new(),
            text_overrides: HashMap::new(),
            closed: false,
        }))
    }

    async fn close(&self) -> E2eResult<()> {
        Ok(())
    }
}

struct Loaded {
    page: Option<SimPage>,
    started: Instant,
}

struct SimTab {
    site: SimulatedSite,
    generation: u64,
    current: Option<Loaded>,
    /// handle id -> (selector, incarnation)
    handles: HashMap<u64, (String, u64)>,
    next_handle: u64,
    detaches_left: HashMap<String, u32>,
    incarnation: HashMap<String, u64>,
    text_overrides: HashMap<String, String>,
    closed: bool,
}

/// Path component of a URL, without query or fragment
fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(i) => {
            let after = &url[i + 3..];
            after.find('/').map(|j| &after[j..]).unwrap_or("/")
        }
        None => url,
    };
    rest.split(['?', '#']).next().unwrap_or(rest)
}

impl SimTab {
    fn state(&self) -> LoadState {
        match &self.current {
            None => LoadState::Idle,
            Some(Loaded { page: None, .. }) => LoadState::Failed,
            Some(Loaded { page: Some(page), started }) => match page.load_delay {
                Some(delay) if started.elapsed() >= delay => LoadState::Complete,
                _ => LoadState::Loading,
            },
        }
    }

    /// Elements currently attached to the document
    fn present(&self, selector: &str) -> Vec<&SimElement> {
        if self.state() != LoadState::Complete {
            return Vec::new();
        }
        let Some(Loaded { page: Some(page), started }) = &self.current else {
            return Vec::new();
        };
        let elapsed = started.elapsed();
        page.elements
            .iter()
            .filter(|e| e.selector == selector)
            .filter(|e| elapsed >= e.appear_after)
            .filter(|e| e.detach_after.map_or(true, |d| elapsed < d))
            .collect()
    }

    fn text_of(&self, element: &SimElement) -> String {
        self.text_overrides
            .get(&element.selector)
            .cloned()
            .unwrap_or_else(|| element.text.clone())
    }
}

#[async_trait]
impl Page for SimTab {
    async fn goto(&mut self, url: &str) -> E2eResult<()> {
        if self.closed {
            return Err(E2eError::Browser("page is closed".to_string()));
        }
        self.site.record(SimEvent::Navigate(url.to_string()));
        self.generation += 1;
        self.handles.clear();
        self.incarnation.clear();
        self.text_overrides.clear();

        let page = self.site.lookup(url_path(url));
        self.detaches_left = page
            .iter()
            .flat_map(|p| p.elements.iter())
            .filter(|e| e.detaches_on_action > 0)
            .map(|e| (e.selector.clone(), e.detaches_on_action))
            .collect();
        self.current = Some(Loaded {
            page,
            started: Instant::now(),
        });
        Ok(())
    }

    async fn load_state(&mut self) -> E2eResult<LoadState> {
        Ok(self.state())
    }

    async fn query(&mut self, selector: &str) -> E2eResult<Option<ElementHandle>> {
        self.site.record(SimEvent::Query(selector.to_string()));
        if self.present(selector).is_empty() {
            return Ok(None);
        }
        let id = self.next_handle;
        self.next_handle += 1;
        let incarnation = self.incarnation.get(selector).copied().unwrap_or(0);
        self.handles.insert(id, (selector.to_string(), incarnation));
        Ok(Some(ElementHandle {
            id,
            generation: self.generation,
        }))
    }

    async fn perform(&mut self, element: &ElementHandle, action: &Action) -> E2eResult<ActStatus> {
        if element.generation != self.generation {
            return Ok(ActStatus::Detached);
        }
        let Some((selector, incarnation)) = self.handles.get(&element.id).cloned() else {
            return Ok(ActStatus::Detached);
        };
        if self.incarnation.get(&selector).copied().unwrap_or(0) != incarnation {
            return Ok(ActStatus::Detached);
        }
        let Some(target) = self.present(&selector).first().map(|e| (*e).clone()) else {
            return Ok(ActStatus::Detached);
        };

        if let Some(left) = self.detaches_left.get_mut(&selector) {
            if *left > 0 {
                *left -= 1;
                *self.incarnation.entry(selector).or_insert(0) += 1;
                return Ok(ActStatus::Detached);
            }
        }

        if !target.visible {
            return Ok(ActStatus::Rejected("element is not visible".to_string()));
        }

        self.site.record(SimEvent::Perform {
            selector: selector.clone(),
            action: action.name().to_string(),
        });
        if *action == Action::Click {
            if let Some((other, text)) = &target.on_click {
                self.text_overrides.insert(other.clone(), text.clone());
            }
        }
        Ok(ActStatus::Done)
    }

    async fn observe(&mut self, selector: &str, predicate: &Predicate) -> E2eResult<Observation> {
        self.site.record(SimEvent::Observe(selector.to_string()));
        let present = self.present(selector);
        let first = present.first().copied();

        let (holds, observed) = match predicate {
            Predicate::Exists(expected) => {
                (!present.is_empty() == *expected, format!("{} element(s)", present.len()))
            }
            Predicate::Visible(expected) => {
                let visible = first.map_or(false, |e| e.visible);
                let observed = match first {
                    None => "absent",
                    Some(_) if visible => "visible",
                    Some(_) => "hidden",
                };
                (visible == *expected, observed.to_string())
            }
            Predicate::Text(expected) => match first {
                Some(e) => {
                    let text = self.text_of(e);
                    (text.trim() == expected, format!("text {:?}", text))
                }
                None => (false, "no element".to_string()),
            },
            Predicate::TextContains(expected) => match first {
                Some(e) => {
                    let text = self.text_of(e);
                    (text.contains(expected.as_str()), format!("text {:?}", text))
                }
                None => (false, "no element".to_string()),
            },
            Predicate::Attribute { name, value } => match first.map(|e| e.attributes.get(name)) {
                Some(Some(actual)) => (
                    value.as_ref().map_or(true, |v| v == actual),
                    format!("{}={:?}", name, actual),
                ),
                Some(None) => (false, format!("no attribute {}", name)),
                None => (false, "no element".to_string()),
            },
            Predicate::Count(expected) => {
                (present.len() == *expected, format!("{} element(s)", present.len()))
            }
        };

        Ok(Observation { holds, observed })
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        if self.site.inner.fail_screenshots.load(Ordering::SeqCst) {
            return Err(E2eError::Browser("screenshot capture failed".to_string()));
        }
        tokio::fs::write(path, PNG_MAGIC).await?;
        self.site.record(SimEvent::Screenshot(path.to_path_buf()));
        Ok(())
    }

    async fn close(&mut self) -> E2eResult<()> {
        if !self.closed {
            self.closed = true;
            self.site.inner.open_pages.fetch_sub(1, Ordering::SeqCst);
            self.site.record(SimEvent::Close);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("http://localhost:8000/watch-library/simulator/shell.html"), "/watch-library/simulator/shell.html");
        assert_eq!(url_path("http://localhost:8000"), "/");
        assert_eq!(url_path("/a.html?x=1#top"), "/a.html");
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_appears_after_delay() {
        let site = SimulatedSite::new().page(
            "/shell.html",
            SimPage::new().element(SimElement::new("#late").appears_after(Duration::from_millis(200))),
        );
        let browser = site.launch().await.unwrap();
        let mut page = browser.new_page().await.unwrap();
        page.goto("http://localhost:8000/shell.html").await.unwrap();

        assert_eq!(page.load_state().await.unwrap(), LoadState::Complete);
        assert!(page.query("#late").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(page.query("#late").await.unwrap().is_some());
        page.close().await.unwrap();
        assert_eq!(site.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_unknown_url_fails_to_load() {
        let site = SimulatedSite::new();
        let browser = site.launch().await.unwrap();
        let mut page = browser.new_page().await.unwrap();
        page.goto("http://localhost:8000/nowhere.html").await.unwrap();
        assert_eq!(page.load_state().await.unwrap(), LoadState::Failed);
    }

    #[tokio::test]
    async fn test_flaky_element_detaches_once() {
        let site = SimulatedSite::new().page(
            "/",
            SimPage::new().element(SimElement::new("#btn3").detaches_on_action(1)),
        );
        let browser = site.launch().await.unwrap();
        let mut page = browser.new_page().await.unwrap();
        page.goto("/").await.unwrap();

        let first = page.query("#btn3").await.unwrap().unwrap();
        assert_eq!(page.perform(&first, &Action::Click).await.unwrap(), ActStatus::Detached);
        // the stale handle stays stale
        assert_eq!(page.perform(&first, &Action::Click).await.unwrap(), ActStatus::Detached);

        let fresh = page.query("#btn3").await.unwrap().unwrap();
        assert_eq!(page.perform(&fresh, &Action::Click).await.unwrap(), ActStatus::Done);
        assert_eq!(site.actions_on("#btn3", "click"), 1);
    }
}
