//! Error types for E2E testing

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::browser::LoadState;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("No scenario files matched '{pattern}' under {root}")]
    Discovery { pattern: String, root: String },

    #[error("Navigation to {url} did not complete after {} ms (last state: {last_state})", elapsed.as_millis())]
    Navigation {
        url: String,
        elapsed: Duration,
        last_state: LoadState,
    },

    #[error("Element '{selector}' not found after {} ms", elapsed.as_millis())]
    ElementNotFound { selector: String, elapsed: Duration },

    #[error("Cannot {action} '{selector}': {reason}")]
    Action {
        selector: String,
        action: String,
        reason: String,
    },

    #[error("Assertion on '{selector}' failed after {} ms: expected {expected}, observed {observed}", elapsed.as_millis())]
    Assertion {
        selector: String,
        expected: String,
        observed: String,
        elapsed: Duration,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scenario file error in {path}: {reason}")]
    SpecParse { path: String, reason: String },

    #[error("Invalid spec pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Playwright not found. Install with: npm i -D playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Classification of a scenario failure, as recorded in its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Navigation,
    ElementNotFound,
    Action,
    Assertion,
    Cancelled,
    /// Backend transport or other infrastructure failure
    Internal,
}

impl E2eError {
    /// Classify this error for an outcome record
    pub fn kind(&self) -> FailureKind {
        match self {
            E2eError::Navigation { .. } => FailureKind::Navigation,
            E2eError::ElementNotFound { .. } => FailureKind::ElementNotFound,
            E2eError::Action { .. } => FailureKind::Action,
            E2eError::Assertion { .. } => FailureKind::Assertion,
            E2eError::Cancelled(_) => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Navigation => "NavigationError",
            FailureKind::ElementNotFound => "ElementNotFoundError",
            FailureKind::Action => "ActionError",
            FailureKind::Assertion => "AssertionError",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = E2eError::ElementNotFound {
            selector: "#missing".to_string(),
            elapsed: Duration::from_millis(500),
        };
        assert_eq!(err.kind(), FailureKind::ElementNotFound);
        assert_eq!(err.to_string(), "Element '#missing' not found after 500 ms");

        let err = E2eError::Io(std::io::Error::other("boom"));
        assert_eq!(err.kind(), FailureKind::Internal);
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Navigation.to_string(), "NavigationError");
        assert_eq!(FailureKind::Cancelled.to_string(), "Cancelled");
    }
}
