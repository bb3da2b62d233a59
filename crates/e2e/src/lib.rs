//! Sensor Watch E2E Test Harness
//!
//! This crate drives a real browser against the Sensor Watch web simulator:
//! - Discovers declarative YAML scenario files by glob pattern
//! - Navigates pages and waits for them to finish loading
//! - Resolves commands in order with poll-until-timeout readiness
//! - Reports one outcome per scenario, with failure screenshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   watch-e2e runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                  │
//! │    ├── ServerHandle::spawn()      (optional static server)  │
//! │    ├── ScenarioLoader::discover(), parse() per worker       │
//! │    ├── BrowserLauncher::launch()  (one per worker)          │
//! │    │     ├── PlaywrightLauncher   (Node bridge)             │
//! │    │     └── SimulatedSite        (in-memory, for tests)    │
//! │    └── per scenario:                                        │
//! │          PageContext ── CommandQueue::run() ── Outcome      │
//! │                            │                                │
//! │                            ├── navigate → NavigationDriver  │
//! │                            ├── locate / act / assert        │
//! │                            └── fail-fast, cancellation      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reporter                                                    │
//! │    ├── summary table + test-results.json                    │
//! │    └── exit code: 0 when nothing failed, 1 otherwise        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod pattern;
pub mod playwright;
pub mod poll;
pub mod reporter;
pub mod runner;
pub mod server;
pub mod sim;
pub mod spec;

pub use browser::{Action, Browser, BrowserLauncher, LoadState, Page, Predicate};
pub use command::{Command, CommandQueue, CommandState};
pub use config::HarnessConfig;
pub use driver::{NavigationDriver, PageContext};
pub use error::{E2eError, E2eResult, FailureKind};
pub use hooks::{HookEvent, HookPayload, Hooks};
pub use playwright::{PlaywrightConfig, PlaywrightLauncher};
pub use reporter::{Outcome, Reporter, ScenarioStatus};
pub use runner::TestRunner;
pub use spec::{Scenario, ScenarioFilter, ScenarioGroup, ScenarioLoader};
