//! Test runner that orchestrates the server, browsers, and scenario groups

use std::collections::BTreeMap;
use std::iter::Enumerate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserLauncher};
use crate::command::CommandQueue;
use crate::config::HarnessConfig;
use crate::driver::{NavigationDriver, PageContext};
use crate::error::{E2eError, E2eResult};
use crate::hooks::{HookEvent, HookPayload, Hooks};
use crate::reporter::{capture_failure, Outcome, Reporter, ScenarioStatus};
use crate::server::ServerHandle;
use crate::spec::{Scenario, ScenarioFilter, ScenarioGroup, ScenarioLoader};

/// State shared by all workers of one run
struct RunShared {
    config: HarnessConfig,
    driver: NavigationDriver,
    hooks: Arc<Hooks>,
    filter: ScenarioFilter,
    cancel: CancellationToken,
    loader: ScenarioLoader,
    paths: Mutex<Enumerate<std::vec::IntoIter<PathBuf>>>,
    /// Groups a worker has taken but not finished
    in_flight: Mutex<BTreeMap<usize, PathBuf>>,
    finished: Mutex<Vec<(usize, Vec<Outcome>)>>,
}

/// Main E2E test runner
pub struct TestRunner {
    config: HarnessConfig,
    launcher: Arc<dyn BrowserLauncher>,
    hooks: Arc<Hooks>,
    filter: ScenarioFilter,
    server: Option<ServerHandle>,
}

impl TestRunner {
    pub fn new(config: HarnessConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            launcher,
            hooks: Arc::new(Hooks::new()),
            filter: ScenarioFilter::default(),
            server: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_filter(mut self, filter: ScenarioFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Start the configured static server, if any
    pub async fn start_server(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let Some(server) = &self.config.server else {
            return Ok(());
        };
        let handle = ServerHandle::spawn(server, &self.config.project_root, &self.config.base_url).await?;
        self.server = Some(handle);
        Ok(())
    }

    pub fn stop_server(&mut self) -> E2eResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        Ok(())
    }

    /// Run every discovered scenario and collect outcomes in discovery order.
    ///
    /// Errors returned here are setup failures; scenario failures are
    /// recorded in the returned reporter.
    pub async fn run(&mut self) -> E2eResult<Reporter> {
        let start = Instant::now();
        self.config.validate()?;
        let loader = ScenarioLoader::new(&self.config)?;
        let paths = loader.discover()?;
        let spec_files = paths.len();

        self.start_server().await?;

        let workers = self.config.workers.min(spec_files);
        let mut browsers = Vec::with_capacity(workers);
        for _ in 0..workers {
            browsers.push(self.launcher.launch().await?);
        }

        info!("Running {} spec file(s) on {} worker(s)...", spec_files, workers);
        self.hooks.emit(HookEvent::BeforeRun, &HookPayload::Run { spec_files });

        let cancel = CancellationToken::new();
        let timer = self.config.run_timeout().map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Run timeout of {:?} reached, cancelling", timeout);
                cancel.cancel();
            })
        });

        let shared = Arc::new(RunShared {
            config: self.config.clone(),
            driver: NavigationDriver::new(&self.config),
            hooks: self.hooks.clone(),
            filter: self.filter.clone(),
            cancel,
            loader,
            paths: Mutex::new(paths.into_iter().enumerate()),
            in_flight: Mutex::new(BTreeMap::new()),
            finished: Mutex::new(Vec::new()),
        });

        let mut tasks = JoinSet::new();
        for (worker, browser) in browsers.into_iter().enumerate() {
            tasks.spawn(run_worker(worker, shared.clone(), browser));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let mut results = std::mem::take(&mut *shared.finished.lock());
        // left behind by a worker that died mid-group, or never taken at all
        let mut lost: Vec<(usize, PathBuf)> = std::mem::take(&mut *shared.in_flight.lock()).into_iter().collect();
        lost.extend(shared.paths.lock().by_ref());
        for (index, path) in lost {
            let error = E2eError::Worker(format!("worker stopped before finishing {}", path.display()));
            results.push((index, vec![Outcome::failed(&path.display().to_string(), "(worker)", &error)]));
        }

        results.sort_by_key(|(index, _)| *index);
        let mut reporter = Reporter::new();
        for outcome in results.into_iter().flat_map(|(_, outcomes)| outcomes) {
            reporter.record(outcome);
        }
        reporter.finish(start.elapsed());

        if let Err(e) = reporter.write_results(&self.config.output_dir) {
            warn!("Failed to write results: {}", e);
        }

        self.hooks.emit(
            HookEvent::AfterRun,
            &HookPayload::RunResults {
                summary: reporter.summary(),
            },
        );

        self.stop_server()?;
        Ok(reporter)
    }
}

impl Drop for TestRunner {
    fn drop(&mut self) {
        let _ = self.stop_server();
    }
}

/// Take discovered files one at a time until none are left
async fn run_worker(worker: usize, shared: Arc<RunShared>, browser: Box<dyn Browser>) {
    loop {
        let next = shared.paths.lock().next();
        let Some((index, path)) = next else {
            break;
        };
        shared.in_flight.lock().insert(index, path.clone());
        debug!("worker {} picked up {}", worker, path.display());

        let outcomes = match shared.loader.parse(&path) {
            Ok(group) => run_group(&shared, browser.as_ref(), path, group).await,
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                vec![Outcome::failed(&path.display().to_string(), "(load)", &e)]
            }
        };

        shared.finished.lock().push((index, outcomes));
        shared.in_flight.lock().remove(&index);
    }

    if let Err(e) = browser.close().await {
        warn!("worker {} failed to close browser: {}", worker, e);
    }
}

async fn run_group(shared: &RunShared, browser: &dyn Browser, path: PathBuf, group: ScenarioGroup) -> Vec<Outcome> {
    let group = shared.filter.apply(group);
    if group.scenarios.is_empty() {
        return Vec::new();
    }

    shared.hooks.emit(
        HookEvent::BeforeSpec,
        &HookPayload::Spec {
            path: path.clone(),
            group: group.name.clone(),
        },
    );

    let mut outcomes = Vec::with_capacity(group.scenarios.len());
    for scenario in group.scenarios {
        let outcome = if scenario.skip {
            Outcome::skipped(&group.name, &scenario.name)
        } else if shared.cancel.is_cancelled() {
            Outcome::failed(
                &group.name,
                &scenario.name,
                &E2eError::Cancelled("run timeout reached before scenario start".to_string()),
            )
        } else {
            run_scenario(shared, browser, &group.name, scenario).await
        };
        outcomes.push(outcome);
    }

    shared.hooks.emit(
        HookEvent::AfterSpec,
        &HookPayload::SpecResults {
            path,
            outcomes: outcomes.clone(),
        },
    );
    outcomes
}

/// One scenario in a fresh page context that is always closed afterwards
async fn run_scenario(shared: &RunShared, browser: &dyn Browser, group: &str, scenario: Scenario) -> Outcome {
    let page = match browser.new_page().await {
        Ok(page) => page,
        Err(e) => return Outcome::failed(group, &scenario.name, &e),
    };
    let mut context = PageContext::new(page);

    let mut queue = CommandQueue::new();
    for command in scenario.commands {
        queue.enqueue(command);
    }

    let mut outcome = queue
        .run(group, &scenario.name, &mut context, &shared.driver, &shared.cancel)
        .await;

    if outcome.status == ScenarioStatus::Failed && shared.config.screenshot_on_failure {
        let artifact = capture_failure(&mut context, &shared.config.screenshot_dir(), &outcome).await;
        if let Some(path) = &artifact {
            shared.hooks.emit(
                HookEvent::AfterScreenshot,
                &HookPayload::Screenshot {
                    path: path.clone(),
                    scenario: outcome.title(),
                },
            );
        }
        outcome = outcome.with_artifact(artifact);
    }

    if let Err(e) = context.close().await {
        warn!("Failed to close page for '{}': {}", outcome.title(), e);
    }
    outcome
}
