//! Run lifecycle hooks
//!
//! Listeners are registered per event before the run starts. A failing
//! listener is logged and the run carries on.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

use crate::reporter::{Outcome, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeRun,
    BeforeSpec,
    AfterSpec,
    AfterScreenshot,
    AfterRun,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeRun => "before:run",
            HookEvent::BeforeSpec => "before:spec",
            HookEvent::AfterSpec => "after:spec",
            HookEvent::AfterScreenshot => "after:screenshot",
            HookEvent::AfterRun => "after:run",
        }
    }
}

/// Data handed to listeners
#[derive(Debug, Clone)]
pub enum HookPayload {
    Run { spec_files: usize },
    Spec { path: PathBuf, group: String },
    SpecResults { path: PathBuf, outcomes: Vec<Outcome> },
    Screenshot { path: PathBuf, scenario: String },
    RunResults { summary: RunSummary },
}

pub type HookFn = Box<dyn Fn(&HookPayload) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    listeners: HashMap<HookEvent, Vec<HookFn>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`
    pub fn on<F>(&mut self, event: HookEvent, listener: F) -> &mut Self
    where
        F: Fn(&HookPayload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.entry(event).or_default().push(Box::new(listener));
        self
    }

    pub fn emit(&self, event: HookEvent, payload: &HookPayload) {
        let Some(listeners) = self.listeners.get(&event) else {
            return;
        };
        for listener in listeners {
            if let Err(e) = listener(payload) {
                warn!("{} hook failed: {:#}", event.as_str(), e);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.values().all(Vec::is_empty)
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        f.debug_struct("Hooks").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_failing_hook_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut hooks = Hooks::new();
        hooks
            .on(HookEvent::BeforeRun, |_| anyhow::bail!("listener exploded"))
            .on(HookEvent::BeforeRun, move |payload| {
                if let HookPayload::Run { spec_files } = payload {
                    counter.fetch_add(*spec_files, Ordering::SeqCst);
                }
                Ok(())
            });

        hooks.emit(HookEvent::BeforeRun, &HookPayload::Run { spec_files: 2 });
        hooks.emit(HookEvent::AfterRun, &HookPayload::Run { spec_files: 5 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!hooks.is_empty());
    }
}
