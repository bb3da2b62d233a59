//! Declarative YAML scenario files and their discovery

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::{Action, Predicate};
use crate::command::Command;
use crate::config::{HarnessConfig, RetryOptions};
use crate::error::{E2eError, E2eResult};
use crate::pattern::SpecPattern;

/// One scenario file as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    /// Group name shown in reports
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags applied to every scenario in the file
    #[serde(default)]
    pub tags: Vec<String>,

    pub scenarios: Vec<ScenarioDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDef {
    pub name: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Record as skipped without running
    #[serde(default)]
    pub skip: bool,

    /// Run only the scenarios marked `only` in this file
    #[serde(default)]
    pub only: bool,

    pub commands: Vec<CommandDef>,
}

/// A single command in a scenario file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandDef {
    /// Load a URL (relative to `base_url`)
    #[serde(alias = "visit")]
    Navigate {
        url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for an element to exist
    #[serde(alias = "get")]
    Locate {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Act on a previously located element
    Act {
        selector: String,
        action: ActionName,
        #[serde(default)]
        value: Option<String>,
    },

    /// Shorthand for `locate` followed by `act: click`
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for page state to satisfy every given condition
    Assert {
        selector: String,
        #[serde(default)]
        exists: Option<bool>,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        attribute: Option<AttributeAssertion>,
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    Click,
    #[serde(alias = "double_click")]
    Dblclick,
    Hover,
    Focus,
    Check,
    Uncheck,
    Fill,
    Press,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeAssertion {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Support file: commands shared by every scenario
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportFile {
    #[serde(default)]
    pub before_each: Vec<CommandDef>,
}

impl CommandDef {
    /// Expand into queue commands using `retry` unless overridden.
    ///
    /// `navigation` is the budget for `navigate`.
    pub fn to_commands(&self, retry: RetryOptions, navigation: RetryOptions) -> Result<Vec<Command>, String> {
        let budget = |base: RetryOptions, override_ms: &Option<u64>| match override_ms {
            Some(ms) => base.with_timeout_ms(*ms),
            None => base,
        };

        let commands = match self {
            CommandDef::Navigate { url, timeout_ms } => {
                vec![Command::navigate(url.clone(), budget(navigation, timeout_ms))]
            }
            CommandDef::Locate { selector, timeout_ms } => {
                vec![Command::locate(selector.clone(), budget(retry, timeout_ms))]
            }
            CommandDef::Act { selector, action, value } => {
                vec![Command::act(selector.clone(), action.to_action(value.as_deref())?, retry)]
            }
            CommandDef::Click { selector, timeout_ms } => {
                let retry = budget(retry, timeout_ms);
                vec![
                    Command::locate(selector.clone(), retry),
                    Command::act(selector.clone(), Action::Click, retry),
                ]
            }
            CommandDef::Assert {
                selector,
                exists,
                visible,
                text,
                text_contains,
                attribute,
                count,
                timeout_ms,
            } => {
                let retry = budget(retry, timeout_ms);
                let mut predicates = Vec::new();
                if let Some(e) = exists {
                    predicates.push(Predicate::Exists(*e));
                }
                if let Some(v) = visible {
                    predicates.push(Predicate::Visible(*v));
                }
                if let Some(t) = text {
                    predicates.push(Predicate::Text(t.clone()));
                }
                if let Some(t) = text_contains {
                    predicates.push(Predicate::TextContains(t.clone()));
                }
                if let Some(a) = attribute {
                    predicates.push(Predicate::Attribute {
                        name: a.name.clone(),
                        value: a.value.clone(),
                    });
                }
                if let Some(c) = count {
                    predicates.push(Predicate::Count(*c));
                }
                if predicates.is_empty() {
                    predicates.push(Predicate::Exists(true));
                }
                predicates
                    .into_iter()
                    .map(|p| Command::assert(selector.clone(), p, retry))
                    .collect()
            }
        };
        Ok(commands)
    }
}

impl ActionName {
    fn to_action(self, value: Option<&str>) -> Result<Action, String> {
        let required = |name: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| format!("action '{}' requires a value", name))
        };
        Ok(match self {
            ActionName::Click => Action::Click,
            ActionName::Dblclick => Action::DoubleClick,
            ActionName::Hover => Action::Hover,
            ActionName::Focus => Action::Focus,
            ActionName::Check => Action::Check,
            ActionName::Uncheck => Action::Uncheck,
            ActionName::Fill => Action::Fill(required("fill")?),
            ActionName::Press => Action::Press(required("press")?),
        })
    }
}

impl ScenarioFile {
    /// Parse a scenario file from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a scenario file from disk
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| E2eError::SpecParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

impl SupportFile {
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        if !path.exists() {
            return Err(E2eError::Config(format!(
                "support file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| E2eError::SpecParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// A runnable scenario: name plus its fully expanded commands
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub tags: Vec<String>,
    pub skip: bool,
    pub commands: Vec<Command>,
}

/// All scenarios of one file
#[derive(Debug, Clone)]
pub struct ScenarioGroup {
    pub name: String,
    pub path: PathBuf,
    pub scenarios: Vec<Scenario>,
}

/// Narrows which scenarios run
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    pub tag: Option<String>,
    pub name: Option<String>,
}

impl ScenarioFilter {
    pub fn accepts(&self, group: &ScenarioGroup, scenario: &Scenario) -> bool {
        if let Some(tag) = &self.tag {
            if !scenario.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &scenario.name != name && &group.name != name {
                return false;
            }
        }
        true
    }

    /// Drop rejected scenarios, keeping group order
    pub fn apply(&self, mut group: ScenarioGroup) -> ScenarioGroup {
        let keep: Vec<Scenario> = group
            .scenarios
            .iter()
            .filter(|s| self.accepts(&group, s))
            .cloned()
            .collect();
        group.scenarios = keep;
        group
    }
}

/// Builds scenarios from files using the run's retry settings
#[derive(Debug, Clone)]
struct ScenarioBuilder {
    retry: RetryOptions,
    navigation: RetryOptions,
    before_each: Vec<CommandDef>,
}

impl ScenarioBuilder {
    fn build(&self, path: &Path) -> E2eResult<ScenarioGroup> {
        let file = ScenarioFile::from_file(path)?;
        let invalid = |reason: String| E2eError::SpecParse {
            path: path.display().to_string(),
            reason,
        };

        let any_only = file.scenarios.iter().any(|s| s.only);
        let mut scenarios = Vec::with_capacity(file.scenarios.len());

        for def in &file.scenarios {
            let mut commands = Vec::new();
            for command in self.before_each.iter().chain(def.commands.iter()) {
                let expanded = command
                    .to_commands(self.retry, self.navigation)
                    .map_err(|e| invalid(format!("scenario '{}': {}", def.name, e)))?;
                commands.extend(expanded);
            }

            let mut tags = file.tags.clone();
            tags.extend(def.tags.iter().cloned());

            scenarios.push(Scenario {
                name: def.name.clone(),
                tags,
                skip: def.skip || (any_only && !def.only),
                commands,
            });
        }

        Ok(ScenarioGroup {
            name: file.name,
            path: path.to_path_buf(),
            scenarios,
        })
    }
}

/// Finds scenario files matching the configured pattern
#[derive(Debug, Clone)]
pub struct ScenarioLoader {
    root: PathBuf,
    pattern: SpecPattern,
    allow_empty: bool,
    builder: ScenarioBuilder,
}

impl ScenarioLoader {
    pub fn new(config: &HarnessConfig) -> E2eResult<Self> {
        let pattern = SpecPattern::new(&config.spec_pattern)?;
        let before_each = match config.support_path() {
            Some(path) => SupportFile::from_file(&path)?.before_each,
            None => Vec::new(),
        };

        Ok(Self {
            root: config.project_root.clone(),
            pattern,
            allow_empty: config.allow_empty,
            builder: ScenarioBuilder {
                retry: config.retry,
                navigation: config.retry.with_timeout_ms(config.page_load_timeout_ms),
                before_each,
            },
        })
    }

    /// Matching files, sorted for a stable run order
    pub fn discover(&self) -> E2eResult<Vec<PathBuf>> {
        let walk_root = self.root.join(self.pattern.literal_prefix());
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(&walk_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .strip_prefix(&self.root)
                    .map(|rel| self.pattern.matches(rel))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        if paths.is_empty() && !self.allow_empty {
            return Err(E2eError::Discovery {
                pattern: self.pattern.as_str().to_string(),
                root: self.root.display().to_string(),
            });
        }

        debug!("Discovered {} scenario file(s)", paths.len());
        Ok(paths)
    }

    /// Parse one scenario file into a group
    pub fn parse(&self, path: &Path) -> E2eResult<ScenarioGroup> {
        self.builder.build(path)
    }

    /// Lazily parsed groups, one per discovered file
    pub fn load(&self) -> E2eResult<ScenarioGroups> {
        let paths = self.discover()?;
        Ok(ScenarioGroups {
            paths: paths.into_iter(),
            builder: self.builder.clone(),
        })
    }
}

/// Single-pass iterator over scenario groups. Each file is read only when
/// reached; a file that fails to parse yields an error for that file alone.
#[derive(Debug)]
pub struct ScenarioGroups {
    paths: std::vec::IntoIter<PathBuf>,
    builder: ScenarioBuilder,
}

impl ScenarioGroups {
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl Iterator for ScenarioGroups {
    type Item = (PathBuf, E2eResult<ScenarioGroup>);

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let group = self.builder.build(&path);
        Some((path, group))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    const BTN3: &str = r##"
name: "Button #btn3 Click Test"
tags: [simulator]
scenarios:
  - name: "should click button #btn3"
    commands:
      - command: visit
        url: /watch-library/simulator/shell.html
      - command: get
        selector: "#btn3"
      - command: act
        selector: "#btn3"
        action: click
"##;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config_for(dir: &Path) -> HarnessConfig {
        HarnessConfig {
            project_root: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_btn3_file() {
        let file = ScenarioFile::from_yaml(BTN3).unwrap();
        assert_eq!(file.name, "Button #btn3 Click Test");
        assert_eq!(file.scenarios[0].commands.len(), 3);
        assert!(matches!(file.scenarios[0].commands[0], CommandDef::Navigate { .. }));
        assert!(matches!(file.scenarios[0].commands[1], CommandDef::Locate { .. }));
    }

    #[test]
    fn test_click_shorthand_expands_to_locate_and_act() {
        let def = CommandDef::Click {
            selector: "#btn3".into(),
            timeout_ms: Some(1000),
        };
        let commands = def.to_commands(RetryOptions::default(), RetryOptions::default()).unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0].kind(), CommandKind::Locate { .. }));
        assert!(matches!(commands[1].kind(), CommandKind::Act { action: Action::Click, .. }));
        assert_eq!(commands[0].retry().timeout_ms, 1000);
    }

    #[test]
    fn test_assert_expands_one_command_per_condition() {
        let def: CommandDef = serde_yaml::from_str(
            r##"
command: assert
selector: "#display"
visible: true
text_contains: "12"
"##,
        )
        .unwrap();
        let commands = def.to_commands(RetryOptions::default(), RetryOptions::default()).unwrap();
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_fill_requires_value() {
        let def = CommandDef::Act {
            selector: "input".into(),
            action: ActionName::Fill,
            value: None,
        };
        assert!(def.to_commands(RetryOptions::default(), RetryOptions::default()).is_err());
    }

    #[test]
    fn test_loader_discovers_sorted_and_lazy() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "e2e/b.scenario.yaml", BTN3);
        write(dir.path(), "e2e/nested/a.scenario.yml", BTN3);
        write(dir.path(), "e2e/broken.scenario.yaml", "name: [unclosed");
        write(dir.path(), "e2e/notes.txt", "ignored");

        let loader = ScenarioLoader::new(&config_for(dir.path())).unwrap();
        let mut groups = loader.load().unwrap();
        assert_eq!(groups.remaining(), 3);

        let (first, group) = groups.next().unwrap();
        assert!(first.ends_with("b.scenario.yaml"));
        assert_eq!(group.unwrap().scenarios[0].commands.len(), 3);

        let (_, broken) = groups.next().unwrap();
        assert!(matches!(broken, Err(E2eError::SpecParse { .. })));

        let (last, group) = groups.next().unwrap();
        assert!(last.ends_with("nested/a.scenario.yml"));
        assert!(group.is_ok());
        assert!(groups.next().is_none());
    }

    #[test]
    fn test_parse_reads_one_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "e2e/btn3.scenario.yaml", BTN3);
        write(dir.path(), "e2e/broken.scenario.yaml", "scenarios: 3");

        let loader = ScenarioLoader::new(&config_for(dir.path())).unwrap();
        let paths = loader.discover().unwrap();
        assert_eq!(paths.len(), 2);

        assert!(matches!(loader.parse(&paths[0]), Err(E2eError::SpecParse { .. })));
        let group = loader.parse(&paths[1]).unwrap();
        assert_eq!(group.name, "Button #btn3 Click Test");
        assert_eq!(group.path, paths[1]);
    }

    #[test]
    fn test_loader_empty_policy() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ScenarioLoader::new(&config_for(dir.path())).unwrap();
        assert!(matches!(loader.discover(), Err(E2eError::Discovery { .. })));

        let lenient = ScenarioLoader::new(&HarnessConfig {
            allow_empty: true,
            ..config_for(dir.path())
        })
        .unwrap();
        assert!(lenient.discover().unwrap().is_empty());
    }

    #[test]
    fn test_support_file_prepends_commands() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "e2e/btn3.scenario.yaml", BTN3);
        write(
            dir.path(),
            "e2e/support.yaml",
            "before_each:\n  - command: navigate\n    url: /reset.html\n",
        );

        let config = HarnessConfig {
            support_file: Some(PathBuf::from("e2e/support.yaml")),
            ..config_for(dir.path())
        };
        let mut groups = ScenarioLoader::new(&config).unwrap().load().unwrap();
        let group = groups.next().unwrap().1.unwrap();
        let commands = &group.scenarios[0].commands;
        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands[0].kind(),
            &CommandKind::Navigate { url: "/reset.html".into() }
        );
    }

    #[test]
    fn test_missing_support_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig {
            support_file: Some(PathBuf::from("nope.yaml")),
            ..config_for(dir.path())
        };
        assert!(matches!(ScenarioLoader::new(&config), Err(E2eError::Config(_))));
    }

    #[test]
    fn test_only_marks_others_skipped_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "e2e/only.scenario.yaml",
            r##"
name: Buttons
scenarios:
  - name: light
    tags: [smoke]
    only: true
    commands:
      - command: click
        selector: "#btn1"
  - name: mode
    commands:
      - command: click
        selector: "#btn2"
"##,
        );
        let mut groups = ScenarioLoader::new(&config_for(dir.path())).unwrap().load().unwrap();
        let group = groups.next().unwrap().1.unwrap();
        assert!(!group.scenarios[0].skip);
        assert!(group.scenarios[1].skip);

        let filter = ScenarioFilter {
            tag: Some("smoke".into()),
            name: None,
        };
        let filtered = filter.apply(group);
        assert_eq!(filtered.scenarios.len(), 1);
        assert_eq!(filtered.scenarios[0].name, "light");
    }
}
