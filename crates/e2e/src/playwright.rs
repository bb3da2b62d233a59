//! Playwright browser automation
//!
//! Playwright is driven through a small Node program (the bridge) that reads
//! one JSON request per line on stdin and answers with one JSON line on
//! stdout. The bridge only exposes primitive operations; polling, timeouts
//! and retries stay on the Rust side.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::browser::{
    ActStatus, Action, Browser, BrowserLauncher, ElementHandle, LoadState, Observation, Page,
    Predicate,
};
use crate::config::{BrowserKind, HarnessConfig};
use crate::error::{E2eError, E2eResult};

/// Upper bound on a single bridge round trip
const BRIDGE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-action timeout handed to Playwright so a stuck click cannot block
const ACTION_TIMEOUT_MS: u64 = 5_000;

const BRIDGE_JS: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

let browser = null;
const pages = new Map();
let nextId = 1;

function reply(msg) {
  process.stdout.write(JSON.stringify(msg) + '\n');
}

function pageOf(req) {
  const p = pages.get(req.page);
  if (!p) throw new Error('unknown page ' + req.page);
  return p;
}

async function observe(p, selector, pred) {
  const els = await p.page.$$(selector);
  const first = els[0];
  switch (pred.type) {
    case 'exists':
      return { holds: (els.length > 0) === pred.value, observed: els.length + ' element(s)' };
    case 'visible': {
      const vis = first ? await first.isVisible() : false;
      return { holds: vis === pred.value, observed: first ? (vis ? 'visible' : 'hidden') : 'absent' };
    }
    case 'text':
    case 'text_contains': {
      if (!first) return { holds: false, observed: 'no element' };
      const text = ((await first.textContent()) || '').trim();
      const holds = pred.type === 'text' ? text === pred.value : text.includes(pred.value);
      return { holds, observed: 'text ' + JSON.stringify(text) };
    }
    case 'attribute': {
      if (!first) return { holds: false, observed: 'no element' };
      const v = await first.getAttribute(pred.name);
      if (v === null) return { holds: false, observed: 'no attribute ' + pred.name };
      return { holds: pred.value === null || pred.value === v, observed: pred.name + '=' + JSON.stringify(v) };
    }
    case 'count':
      return { holds: els.length === pred.value, observed: els.length + ' element(s)' };
    default:
      throw new Error('unknown predicate ' + pred.type);
  }
}

async function perform(p, req) {
  const el = p.handles.get(req.element);
  if (!el) return { status: 'detached' };
  const connected = await el.evaluate(n => n.isConnected).catch(() => false);
  if (!connected) return { status: 'detached' };
  const opts = { timeout: req.timeout_ms };
  try {
    switch (req.action.type) {
      case 'click': await el.click(opts); break;
      case 'dblclick': await el.dblclick(opts); break;
      case 'hover': await el.hover(opts); break;
      case 'focus': await el.focus(); break;
      case 'check': await el.check(opts); break;
      case 'uncheck': await el.uncheck(opts); break;
      case 'fill': await el.fill(req.action.value, opts); break;
      case 'press': await el.press(req.action.value, opts); break;
      default: throw new Error('unknown action ' + req.action.type);
    }
  } catch (e) {
    const message = String((e && e.message) || e);
    if (/not attached|detached/i.test(message)) return { status: 'detached' };
    return { status: 'rejected', reason: message.split('\n')[0] };
  }
  return { status: 'done' };
}

async function handle(req) {
  switch (req.op) {
    case 'launch':
      browser = await playwright[req.browser].launch({ headless: req.headless });
      return {};
    case 'new_page': {
      const opts = { viewport: req.viewport };
      if (req.video_dir) opts.recordVideo = { dir: req.video_dir, size: req.viewport };
      const context = await browser.newContext(opts);
      const page = await context.newPage();
      const id = nextId++;
      pages.set(id, { context, page, state: 'idle', generation: 0, handles: new Map() });
      return { page: id };
    }
    case 'goto': {
      const p = pageOf(req);
      const gen = ++p.generation;
      p.state = 'loading';
      p.handles.clear();
      p.page.goto(req.url, { waitUntil: 'load', timeout: 0 })
        .then(() => { if (p.generation === gen) p.state = 'complete'; })
        .catch(() => { if (p.generation === gen) p.state = 'failed'; });
      return { generation: gen };
    }
    case 'load_state':
      return { state: pageOf(req).state };
    case 'query': {
      const p = pageOf(req);
      const el = await p.page.$(req.selector);
      if (!el) return { element: null, generation: p.generation };
      const id = nextId++;
      p.handles.set(id, el);
      return { element: id, generation: p.generation };
    }
    case 'perform':
      return perform(pageOf(req), req);
    case 'observe':
      return observe(pageOf(req), req.selector, req.predicate);
    case 'screenshot':
      await pageOf(req).page.screenshot({ path: req.path });
      return {};
    case 'close_page': {
      const p = pages.get(req.page);
      if (p) {
        pages.delete(req.page);
        await p.context.close();
      }
      return {};
    }
    case 'shutdown':
      if (browser) await browser.close();
      browser = null;
      return {};
    default:
      throw new Error('unknown op ' + req.op);
  }
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let req;
  try {
    req = JSON.parse(line);
  } catch (e) {
    return reply({ id: null, ok: false, error: 'malformed request' });
  }
  try {
    reply({ id: req.id, ok: true, result: await handle(req) });
  } catch (e) {
    reply({ id: req.id, ok: false, error: String((e && e.message) || e) });
  }
});
rl.on('close', async () => {
  if (browser) await browser.close().catch(() => {});
  process.exit(0);
});
"#;

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Record context videos here when set
    pub video_dir: Option<PathBuf>,
    /// Directory whose `node_modules` provides `playwright`
    pub project_root: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            viewport_width: 1000,
            viewport_height: 660,
            video_dir: None,
            project_root: PathBuf::from("."),
        }
    }
}

impl PlaywrightConfig {
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            browser: config.browser.kind,
            headless: config.browser.headless,
            viewport_width: config.browser.viewport_width,
            viewport_height: config.browser.viewport_height,
            video_dir: config.video.then(|| config.video_dir()),
            project_root: config.project_root.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// The Node process and its pipes
struct Bridge {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    // keeps the bridge script on disk for the process lifetime
    _script_dir: tempfile::TempDir,
}

impl Bridge {
    async fn spawn(project_root: &Path) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_JS)?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .current_dir(project_root)
            .env("NODE_PATH", project_root.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Browser(format!("failed to start node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Browser("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Browser("bridge stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            _script_dir: script_dir,
        })
    }

    async fn call(&mut self, op: &str, params: Value) -> E2eResult<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut request = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        request.insert("id".into(), json!(id));
        request.insert("op".into(), json!(op));

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        tokio::time::timeout(BRIDGE_CALL_TIMEOUT, self.exchange(id, op, &line))
            .await
            .map_err(|_| E2eError::Browser(format!("{} timed out after {:?}", op, BRIDGE_CALL_TIMEOUT)))?
    }

    /// Write one request line and read until its reply arrives
    async fn exchange(&mut self, id: u64, op: &str, line: &str) -> E2eResult<Value> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        loop {
            let Some(reply) = self.stdout.next_line().await? else {
                return Err(E2eError::Browser("Playwright bridge exited".to_string()));
            };
            let response: BridgeResponse = match serde_json::from_str(&reply) {
                Ok(r) => r,
                Err(_) => {
                    // stray output from the page or Playwright itself
                    debug!("bridge: {}", reply);
                    continue;
                }
            };
            if response.id != Some(id) && response.id.is_some() {
                warn!("Discarding out-of-order bridge reply {:?}", response.id);
                continue;
            }
            return if response.ok {
                Ok(response.result)
            } else {
                Err(E2eError::Browser(format!(
                    "{}: {}",
                    op,
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                )))
            };
        }
    }
}

/// Launches one bridge process, and so one browser, per call
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Check that node can resolve the `playwright` package
    pub async fn check_installed(&self) -> E2eResult<()> {
        let status = TokioCommand::new("node")
            .args(["-e", "require.resolve('playwright')"])
            .current_dir(&self.config.project_root)
            .env("NODE_PATH", self.config.project_root.join("node_modules"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self) -> E2eResult<Box<dyn Browser>> {
        self.check_installed().await?;

        let mut bridge = Bridge::spawn(&self.config.project_root).await?;
        bridge
            .call(
                "launch",
                json!({
                    "browser": self.config.browser.as_str(),
                    "headless": self.config.headless,
                }),
            )
            .await?;

        info!(
            "Launched {} ({})",
            self.config.browser.as_str(),
            if self.config.headless { "headless" } else { "headed" }
        );

        if let Some(dir) = &self.config.video_dir {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Box::new(PlaywrightBrowser {
            bridge: Arc::new(Mutex::new(bridge)),
            config: self.config.clone(),
        }))
    }
}

/// Playwright browser handle
pub struct PlaywrightBrowser {
    bridge: Arc<Mutex<Bridge>>,
    config: PlaywrightConfig,
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn new_page(&self) -> E2eResult<Box<dyn Page>> {
        let video_dir = self
            .config
            .video_dir
            .as_ref()
            .map(|d| d.to_string_lossy().into_owned());
        let result = self
            .bridge
            .lock()
            .await
            .call(
                "new_page",
                json!({
                    "viewport": {
                        "width": self.config.viewport_width,
                        "height": self.config.viewport_height,
                    },
                    "video_dir": video_dir,
                }),
            )
            .await?;

        let page_id = result["page"]
            .as_u64()
            .ok_or_else(|| E2eError::Browser("new_page returned no page id".to_string()))?;

        Ok(Box::new(PlaywrightPage {
            bridge: self.bridge.clone(),
            page_id,
            closed: false,
        }))
    }

    async fn close(&self) -> E2eResult<()> {
        let mut bridge = self.bridge.lock().await;
        bridge.call("shutdown", json!({})).await?;
        let _ = bridge.stdin.shutdown().await;
        let _ = bridge.child.wait().await;
        Ok(())
    }
}

/// One Playwright browser context with a single page
pub struct PlaywrightPage {
    bridge: Arc<Mutex<Bridge>>,
    page_id: u64,
    closed: bool,
}

impl PlaywrightPage {
    async fn call(&self, op: &str, mut params: Value) -> E2eResult<Value> {
        params["page"] = json!(self.page_id);
        self.bridge.lock().await.call(op, params).await
    }
}

fn action_json(action: &Action) -> Value {
    match action {
        Action::Fill(value) | Action::Press(value) => json!({ "type": action.name(), "value": value }),
        _ => json!({ "type": action.name() }),
    }
}

fn predicate_json(predicate: &Predicate) -> Value {
    match predicate {
        Predicate::Exists(v) => json!({ "type": "exists", "value": v }),
        Predicate::Visible(v) => json!({ "type": "visible", "value": v }),
        Predicate::Text(v) => json!({ "type": "text", "value": v }),
        Predicate::TextContains(v) => json!({ "type": "text_contains", "value": v }),
        Predicate::Attribute { name, value } => json!({ "type": "attribute", "name": name, "value": value }),
        Predicate::Count(v) => json!({ "type": "count", "value": v }),
    }
}

fn parse_load_state(state: &str) -> LoadState {
    match state {
        "loading" => LoadState::Loading,
        "interactive" => LoadState::Interactive,
        "complete" => LoadState::Complete,
        "failed" => LoadState::Failed,
        _ => LoadState::Idle,
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&mut self, url: &str) -> E2eResult<()> {
        self.call("goto", json!({ "url": url })).await?;
        Ok(())
    }

    async fn load_state(&mut self) -> E2eResult<LoadState> {
        let result = self.call("load_state", json!({})).await?;
        Ok(parse_load_state(result["state"].as_str().unwrap_or("idle")))
    }

    async fn query(&mut self, selector: &str) -> E2eResult<Option<ElementHandle>> {
        let result = self.call("query", json!({ "selector": selector })).await?;
        let generation = result["generation"].as_u64().unwrap_or(0);
        Ok(result["element"].as_u64().map(|id| ElementHandle { id, generation }))
    }

    async fn perform(&mut self, element: &ElementHandle, action: &Action) -> E2eResult<ActStatus> {
        let result = self
            .call(
                "perform",
                json!({
                    "element": element.id,
                    "action": action_json(action),
                    "timeout_ms": ACTION_TIMEOUT_MS,
                }),
            )
            .await?;

        Ok(match result["status"].as_str() {
            Some("done") => ActStatus::Done,
            Some("detached") => ActStatus::Detached,
            _ => ActStatus::Rejected(result["reason"].as_str().unwrap_or("action rejected").to_string()),
        })
    }

    async fn observe(&mut self, selector: &str, predicate: &Predicate) -> E2eResult<Observation> {
        let result = self
            .call(
                "observe",
                json!({ "selector": selector, "predicate": predicate_json(predicate) }),
            )
            .await?;
        Ok(Observation {
            holds: result["holds"].as_bool().unwrap_or(false),
            observed: result["observed"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        self.call("screenshot", json!({ "path": path.to_string_lossy() })).await?;
        Ok(())
    }

    async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.call("close_page", json!({})).await?;
        Ok(())
    }
}
