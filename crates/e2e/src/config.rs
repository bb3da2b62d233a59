//! Harness configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// Run configuration, normally read from `harness.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Prefix for relative navigation URLs
    pub base_url: String,

    /// Pattern selecting scenario files, relative to `project_root`
    pub spec_pattern: String,

    /// Directory the spec pattern is evaluated against
    pub project_root: PathBuf,

    /// Commands run before every scenario
    pub support_file: Option<PathBuf>,

    /// Record a video of every browsing context
    pub video: bool,

    /// Capture a screenshot when a scenario fails
    pub screenshot_on_failure: bool,

    /// Accept a run that discovers no scenario files
    pub allow_empty: bool,

    /// Where results, screenshots and videos are written
    pub output_dir: PathBuf,

    /// Number of independent workers, each with its own browser
    pub workers: usize,

    /// Global run timeout in milliseconds (0 disables it)
    pub run_timeout_ms: u64,

    /// Navigation timeout in milliseconds
    pub page_load_timeout_ms: u64,

    pub retry: RetryOptions,

    pub browser: BrowserConfig,

    /// Static file server to spawn before the run
    pub server: Option<ServerConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            spec_pattern: "e2e/**/*.scenario.{yaml,yml}".to_string(),
            project_root: PathBuf::from("."),
            support_file: None,
            video: false,
            screenshot_on_failure: true,
            allow_empty: false,
            output_dir: PathBuf::from("test-results"),
            workers: 1,
            run_timeout_ms: 0,
            page_load_timeout_ms: 60_000,
            retry: RetryOptions::default(),
            browser: BrowserConfig::default(),
            server: None,
        }
    }
}

/// Polling budget for `locate` and `assert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub retry_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retry_interval_ms: 50,
            timeout_ms: 4000,
        }
    }
}

impl RetryOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Same interval, different budget
    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        Self { timeout_ms, ..self }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(E2eError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            headless: true,
            viewport_width: 1000,
            viewport_height: 660,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Program and arguments, e.g. `["python3", "-m", "http.server", "8000"]`
    pub command: Vec<String>,

    /// Working directory for the server (defaults to the project root)
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent.
    ///
    /// A relative `project_root` is resolved against the file's directory,
    /// and a relative `output_dir` against the project root.
    pub fn load(path: &Path) -> E2eResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        if config.project_root.is_relative() {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.project_root = dir.join(&config.project_root);
            }
        }
        if config.output_dir.is_relative() {
            config.output_dir = config.project_root.join(&config.output_dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runner cannot work with
    pub fn validate(&self) -> E2eResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(E2eError::Config("base_url must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".into()));
        }
        if self.retry.retry_interval_ms == 0 {
            return Err(E2eError::Config("retry.retry_interval_ms must be positive".into()));
        }
        if let Some(server) = &self.server {
            if server.command.is_empty() {
                return Err(E2eError::Config("server.command must name a program".into()));
            }
        }
        Ok(())
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_ms > 0).then(|| Duration::from_millis(self.run_timeout_ms))
    }

    /// Resolve a possibly relative navigation target against `base_url`
    pub fn resolve_url(&self, url: &str) -> String {
        join_url(&self.base_url, url)
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.output_dir.join("screenshots")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.output_dir.join("videos")
    }

    /// Absolute-or-root-relative path of the support file
    pub fn support_path(&self) -> Option<PathBuf> {
        self.support_file.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.project_root.join(p)
            }
        })
    }
}

/// Join a navigation target onto a base URL; absolute targets pass through
pub fn join_url(base_url: &str, url: &str) -> String {
    if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
        return url.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{}{}", base, url)
    } else {
        format!("{}/{}", base, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.retry.retry_interval_ms, 50);
        assert_eq!(config.retry.timeout_ms, 4000);
        assert!(config.screenshot_on_failure);
        assert!(!config.video);
        assert!(config.run_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
base_url = "http://127.0.0.1:9000"
video = true

[retry]
timeout_ms = 500

[server]
command = ["python3", "-m", "http.server", "9000"]
"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert!(config.video);
        assert_eq!(config.retry.timeout_ms, 500);
        assert_eq!(config.retry.retry_interval_ms, 50);
        assert_eq!(config.server.unwrap().startup_timeout_ms, 30_000);
    }

    #[test_case("/watch-library/simulator/shell.html", "http://localhost:8000/watch-library/simulator/shell.html")]
    #[test_case("index.html", "http://localhost:8000/index.html")]
    #[test_case("http://example.test/a", "http://example.test/a")]
    #[test_case("about:blank", "about:blank")]
    fn test_resolve_url(input: &str, expected: &str) {
        let config = HarnessConfig {
            base_url: "http://localhost:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolve_url(input), expected);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = HarnessConfig { workers: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(E2eError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = HarnessConfig::load(Path::new("/nonexistent/harness.toml")).unwrap();
        assert_eq!(config.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_load_resolves_paths_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        let path = sub.join("harness.toml");

        std::fs::write(&path, "workers = 2\n").unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, sub.join("test-results"));
        assert_eq!(config.screenshot_dir(), sub.join("test-results/screenshots"));

        std::fs::write(&path, "project_root = \"site\"\noutput_dir = \"out\"\n").unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.project_root, sub.join("site"));
        assert_eq!(config.output_dir, sub.join("site/out"));
    }

    #[test]
    fn test_browser_kind_from_str() {
        assert_eq!("Firefox".parse::<BrowserKind>().unwrap(), BrowserKind::Firefox);
        assert!("lynx".parse::<BrowserKind>().is_err());
    }
}
