//! Browser backend abstraction
//!
//! The harness never talks to a browser engine directly. A backend exposes
//! browsing contexts as [`Page`]s: it can start a navigation, report load
//! progress, answer element queries, perform actions and evaluate predicates.
//! All waiting and retrying happens above this seam, in the driver and the
//! command queue.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// Document load progress as last reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Nothing requested yet
    #[default]
    Idle,
    Loading,
    Interactive,
    Complete,
    /// The backend gave up on the request (connection refused, DNS, ...)
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::Idle => "idle",
            LoadState::Loading => "loading",
            LoadState::Interactive => "interactive",
            LoadState::Complete => "complete",
            LoadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Opaque reference to an element returned by a query.
///
/// `generation` is the number of `goto` calls the page had seen at query
/// time; a handle from an earlier navigation is never valid again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: u64,
    pub generation: u64,
}

/// Interaction performed against a located element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Click,
    DoubleClick,
    Hover,
    Focus,
    Check,
    Uncheck,
    Fill(String),
    Press(String),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::DoubleClick => "dblclick",
            Action::Hover => "hover",
            Action::Focus => "focus",
            Action::Check => "check",
            Action::Uncheck => "uncheck",
            Action::Fill(_) => "fill",
            Action::Press(_) => "press",
        }
    }
}

/// What an action call reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActStatus {
    Done,
    /// The element is no longer attached to the document
    Detached,
    /// The element exists but refused the action (disabled, covered, ...)
    Rejected(String),
}

/// Condition evaluated against current page state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Exists(bool),
    Visible(bool),
    Text(String),
    TextContains(String),
    Attribute { name: String, value: Option<String> },
    Count(usize),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Exists(true) => write!(f, "to exist"),
            Predicate::Exists(false) => write!(f, "not to exist"),
            Predicate::Visible(true) => write!(f, "to be visible"),
            Predicate::Visible(false) => write!(f, "to be hidden"),
            Predicate::Text(t) => write!(f, "text {:?}", t),
            Predicate::TextContains(t) => write!(f, "text containing {:?}", t),
            Predicate::Attribute { name, value: Some(v) } => write!(f, "attribute {}={:?}", name, v),
            Predicate::Attribute { name, value: None } => write!(f, "attribute {}", name),
            Predicate::Count(n) => write!(f, "{} matching element(s)", n),
        }
    }
}

/// Result of one predicate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub holds: bool,
    /// What was actually seen, for failure messages
    pub observed: String,
}

/// A single isolated browsing context
#[async_trait]
pub trait Page: Send {
    /// Start loading `url`. Returns once the request is issued, not when the
    /// document is ready.
    async fn goto(&mut self, url: &str) -> E2eResult<()>;

    /// Current load progress of the last navigation
    async fn load_state(&mut self) -> E2eResult<LoadState>;

    /// Query the live document once. Never served from a cache.
    async fn query(&mut self, selector: &str) -> E2eResult<Option<ElementHandle>>;

    async fn perform(&mut self, element: &ElementHandle, action: &Action) -> E2eResult<ActStatus>;

    async fn observe(&mut self, selector: &str, predicate: &Predicate) -> E2eResult<Observation>;

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()>;

    /// Tear the context down. Must be safe to call on a page that never loaded.
    async fn close(&mut self) -> E2eResult<()>;
}

/// A running browser able to open fresh contexts
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> E2eResult<Box<dyn Page>>;

    async fn close(&self) -> E2eResult<()>;
}

/// Starts browsers; one browser per worker
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> E2eResult<Box<dyn Browser>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_display() {
        assert_eq!(Predicate::Visible(true).to_string(), "to be visible");
        assert_eq!(
            Predicate::Attribute { name: "class".into(), value: Some("on".into()) }.to_string(),
            "attribute class=\"on\""
        );
        assert_eq!(Predicate::Count(2).to_string(), "2 matching element(s)");
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::Click.name(), "click");
        assert_eq!(Action::Fill("x".into()).name(), "fill");
    }
}
