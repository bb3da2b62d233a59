//! Spec file patterns
//!
//! Patterns are compiled to a regex and matched against paths relative to
//! the project root, always with `/` separators. Supported syntax:
//! `**/` (zero or more directories), `*` (anything but `/`), `?` (one
//! character but `/`) and `{a,b}` alternation.

use std::path::Path;

use regex::Regex;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone)]
pub struct SpecPattern {
    source: String,
    regex: Regex,
}

impl SpecPattern {
    pub fn new(pattern: &str) -> E2eResult<Self> {
        let translated = translate(pattern).map_err(|reason| E2eError::Pattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        let regex = Regex::new(&translated).map_err(|e| E2eError::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a path relative to the pattern root
    pub fn matches(&self, relative: &Path) -> bool {
        let normalized: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        self.regex.is_match(&normalized.join("/"))
    }

    /// Leading directories with no wildcard, where a walk can start
    pub fn literal_prefix(&self) -> &str {
        let end = self
            .source
            .find(|c| matches!(c, '*' | '?' | '{' | '['))
            .unwrap_or(self.source.len());
        match self.source[..end].rfind('/') {
            Some(slash) => &self.source[..slash],
            None => "",
        }
    }
}

fn translate(pattern: &str) -> Result<String, String> {
    let pattern = pattern.trim_start_matches("./");
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut in_group = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                if !at_segment_start {
                    return Err("'**' must be a whole path segment".into());
                }
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:[^/]+/)*");
                    i += 3;
                } else if i + 2 == chars.len() {
                    out.push_str(".*");
                    i += 2;
                } else {
                    return Err("'**' must be a whole path segment".into());
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                if in_group {
                    return Err("nested '{' is not supported".into());
                }
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if in_group {
        return Err("unclosed '{'".into());
    }
    out.push('$');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("e2e/**/*.scenario.{yaml,yml}", "e2e/btn3-click.scenario.yaml", true)]
    #[test_case("e2e/**/*.scenario.{yaml,yml}", "e2e/buttons/light.scenario.yml", true)]
    #[test_case("e2e/**/*.scenario.{yaml,yml}", "e2e/btn3-click.yaml", false)]
    #[test_case("e2e/**/*.scenario.{yaml,yml}", "other/btn3.scenario.yaml", false)]
    #[test_case("e2e/*.yaml", "e2e/a/b.yaml", false)]
    #[test_case("e2e/?.yaml", "e2e/a.yaml", true)]
    #[test_case("**/*.yaml", "a.yaml", true)]
    #[test_case("e2e/**", "e2e/deep/er/file.txt", true)]
    fn test_matches(pattern: &str, path: &str, expected: bool) {
        let pattern = SpecPattern::new(pattern).unwrap();
        assert_eq!(pattern.matches(Path::new(path)), expected, "{}", path);
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(SpecPattern::new("e2e/**/*.yaml").unwrap().literal_prefix(), "e2e");
        assert_eq!(SpecPattern::new("a/b/c*.yaml").unwrap().literal_prefix(), "a/b");
        assert_eq!(SpecPattern::new("*.yaml").unwrap().literal_prefix(), "");
    }

    #[test]
    fn test_rejects_bad_patterns() {
        assert!(SpecPattern::new("e2e/{a,b").is_err());
        assert!(SpecPattern::new("e2e/a**/x").is_err());
    }
}
