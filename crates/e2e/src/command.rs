//! Commands and the command queue
//!
//! A scenario is built first and run second: [`CommandQueue::enqueue`] only
//! records intent, [`CommandQueue::run`] resolves the commands one at a time
//! in declaration order and stops at the first failure.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::browser::{ActStatus, Action, ElementHandle, Predicate};
use crate::config::RetryOptions;
use crate::driver::{NavigationDriver, PageContext};
use crate::error::{E2eError, E2eResult};
use crate::poll::Poller;
use crate::reporter::{CommandRecord, Failure, Outcome, ScenarioStatus};

/// What a command does
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Navigate { url: String },
    Locate { selector: String },
    Act { selector: String, action: Action },
    Assert { selector: String, predicate: Predicate },
}

/// Resolution state of a command. Every state but `Unresolved` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Unresolved,
    Resolved,
    TimedOut,
    Errored,
    /// Never attempted because an earlier command failed
    Skipped,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandState::Unresolved)
    }
}

/// One atomic step of a scenario
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    retry: RetryOptions,
    state: CommandState,
}

impl Command {
    pub fn new(kind: CommandKind, retry: RetryOptions) -> Self {
        Self {
            kind,
            retry,
            state: CommandState::Unresolved,
        }
    }

    pub fn navigate(url: impl Into<String>, retry: RetryOptions) -> Self {
        Self::new(CommandKind::Navigate { url: url.into() }, retry)
    }

    pub fn locate(selector: impl Into<String>, retry: RetryOptions) -> Self {
        Self::new(CommandKind::Locate { selector: selector.into() }, retry)
    }

    pub fn act(selector: impl Into<String>, action: Action, retry: RetryOptions) -> Self {
        Self::new(
            CommandKind::Act {
                selector: selector.into(),
                action,
            },
            retry,
        )
    }

    pub fn assert(selector: impl Into<String>, predicate: Predicate, retry: RetryOptions) -> Self {
        Self::new(
            CommandKind::Assert {
                selector: selector.into(),
                predicate,
            },
            retry,
        )
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn retry(&self) -> RetryOptions {
        self.retry
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    fn settle(&mut self, state: CommandState) {
        if self.state.is_terminal() {
            warn!("Ignoring transition {:?} -> {:?} for '{}'", self.state, state, self);
            return;
        }
        self.state = state;
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Navigate { url } => write!(f, "navigate {}", url),
            CommandKind::Locate { selector } => write!(f, "locate {}", selector),
            CommandKind::Act { selector, action } => write!(f, "{} {}", action.name(), selector),
            CommandKind::Assert { selector, predicate } => {
                write!(f, "assert {} {}", selector, predicate)
            }
        }
    }
}

/// Ordered commands of one scenario
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command. Nothing is resolved until [`CommandQueue::run`].
    pub fn enqueue(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Resolve every command in order against `context`.
    ///
    /// The first failure marks all later commands skipped. Cancellation is
    /// only observed between commands.
    pub async fn run(
        &mut self,
        group: &str,
        scenario: &str,
        context: &mut PageContext,
        driver: &NavigationDriver,
        cancel: &CancellationToken,
    ) -> Outcome {
        let start = Instant::now();
        let mut records = Vec::with_capacity(self.commands.len());
        let mut failure: Option<Failure> = None;
        let mut located: HashSet<String> = HashSet::new();

        for (index, command) in self.commands.iter_mut().enumerate() {
            if failure.is_none() && cancel.is_cancelled() {
                failure = Some(Failure::from_error(&E2eError::Cancelled(format!(
                    "run timeout reached before '{}'",
                    command
                ))));
            }

            if failure.is_some() {
                command.settle(CommandState::Skipped);
                records.push(CommandRecord::new(index, command, Duration::ZERO));
                continue;
            }

            let step_start = Instant::now();
            debug!("[{}] {}", index, command);
            let result = resolve(command, context, driver, &mut located).await;
            let elapsed = step_start.elapsed();

            match result {
                Ok(()) => command.settle(CommandState::Resolved),
                Err(e) => {
                    let state = match e {
                        E2eError::Navigation { .. }
                        | E2eError::ElementNotFound { .. }
                        | E2eError::Assertion { .. } => CommandState::TimedOut,
                        _ => CommandState::Errored,
                    };
                    command.settle(state);
                    debug!("[{}] {} failed: {}", index, command, e);
                    failure = Some(Failure::from_error(&e));
                }
            }
            records.push(CommandRecord::new(index, command, elapsed));
        }

        Outcome {
            group: group.to_string(),
            scenario: scenario.to_string(),
            status: if failure.is_some() {
                ScenarioStatus::Failed
            } else {
                ScenarioStatus::Passed
            },
            failure,
            artifact: None,
            commands: records,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

async fn resolve(
    command: &Command,
    context: &mut PageContext,
    driver: &NavigationDriver,
    located: &mut HashSet<String>,
) -> E2eResult<()> {
    match &command.kind {
        CommandKind::Navigate { url } => {
            located.clear();
            driver.open_with_timeout(context, url, command.retry.timeout()).await
        }
        CommandKind::Locate { selector } => {
            locate(context, selector, command.retry).await?;
            located.insert(selector.clone());
            Ok(())
        }
        CommandKind::Act { selector, action } => {
            if !located.contains(selector) {
                return Err(E2eError::Action {
                    selector: selector.clone(),
                    action: action.name().to_string(),
                    reason: "no prior locate of this selector".to_string(),
                });
            }
            act(context, selector, action).await
        }
        CommandKind::Assert { selector, predicate } => {
            assert_eventually(context, selector, predicate, command.retry).await
        }
    }
}

/// Query until the selector resolves or the budget is spent
pub async fn locate(
    context: &mut PageContext,
    selector: &str,
    retry: RetryOptions,
) -> E2eResult<ElementHandle> {
    let mut poller = Poller::from_options(retry);
    loop {
        if let Some(handle) = context.query(selector).await? {
            debug!("Located {} after {} attempt(s)", selector, poller.attempts() + 1);
            return Ok(handle);
        }
        if !poller.wait().await {
            return Err(E2eError::ElementNotFound {
                selector: selector.to_string(),
                elapsed: poller.elapsed(),
            });
        }
    }
}

/// Perform `action` on a fresh lookup of `selector`, re-locating at most
/// once if the element is gone or detaches before the action lands
async fn act(context: &mut PageContext, selector: &str, action: &Action) -> E2eResult<()> {
    let action_error = |reason: &str| E2eError::Action {
        selector: selector.to_string(),
        action: action.name().to_string(),
        reason: reason.to_string(),
    };

    let mut relocated = false;
    loop {
        let Some(handle) = context.query(selector).await? else {
            if relocated {
                return Err(action_error("element detached and no longer present"));
            }
            relocated = true;
            debug!("{} missing before {}, re-locating once", selector, action.name());
            continue;
        };

        match context.perform(&handle, action).await? {
            ActStatus::Done => return Ok(()),
            ActStatus::Rejected(reason) => return Err(action_error(&reason)),
            ActStatus::Detached if relocated => {
                return Err(action_error("element detached from the page twice"));
            }
            ActStatus::Detached => {
                relocated = true;
                debug!("{} detached before {}, re-locating once", selector, action.name());
            }
        }
    }
}

/// Evaluate a predicate until it holds or the budget is spent
pub async fn assert_eventually(
    context: &mut PageContext,
    selector: &str,
    predicate: &Predicate,
    retry: RetryOptions,
) -> E2eResult<()> {
    let mut poller = Poller::from_options(retry);
    loop {
        let observation = context.observe(selector, predicate).await?;
        if observation.holds {
            return Ok(());
        }
        if !poller.wait().await {
            return Err(E2eError::Assertion {
                selector: selector.to_string(),
                expected: predicate.to_string(),
                observed: observation.observed,
                elapsed: poller.elapsed(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_does_not_resolve() {
        let retry = RetryOptions::default();
        let mut queue = CommandQueue::new();
        queue.enqueue(Command::navigate("/", retry));
        queue.enqueue(Command::locate("#btn3", retry));
        queue.enqueue(Command::act("#btn3", Action::Click, retry));

        assert_eq!(queue.len(), 3);
        assert!(queue.commands().iter().all(|c| c.state() == CommandState::Unresolved));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut command = Command::locate("#btn3", RetryOptions::default());
        command.settle(CommandState::TimedOut);
        command.settle(CommandState::Resolved);
        assert_eq!(command.state(), CommandState::TimedOut);
    }

    #[test]
    fn test_display() {
        let retry = RetryOptions::default();
        assert_eq!(Command::act("#btn3", Action::Click, retry).to_string(), "click #btn3");
        assert_eq!(
            Command::assert("#display", Predicate::TextContains("12".into()), retry).to_string(),
            "assert #display text containing \"12\""
        );
    }
}
