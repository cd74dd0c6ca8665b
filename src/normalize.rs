//! Output canonicalization and expected-output construction.

use crate::error::{HarnessError, HarnessResult};
use regex::Regex;
use similar::TextDiff;
use std::fmt;

/// Replace every match of `pattern` with `replacement`.
///
/// The replacement must not itself match `pattern`, otherwise normalization
/// stops being idempotent. It must also stay on one line.
#[derive(Debug, Clone)]
pub struct VolatileRule {
    pattern: Regex,
    replacement: String,
}

impl VolatileRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> HarnessResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            HarnessError::InvalidConfig(format!("volatile pattern '{}': {}", pattern, e))
        })?;
        let replacement = replacement.into();
        if replacement.contains(['\n', '\r']) {
            return Err(HarnessError::InvalidConfig(format!(
                "volatile replacement {:?} contains a line break",
                replacement
            )));
        }
        if pattern.is_match(&replacement) {
            return Err(HarnessError::InvalidConfig(format!(
                "volatile replacement '{}' matches its own pattern '{}'",
                replacement, pattern
            )));
        }
        Ok(Self {
            pattern,
            replacement,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    rules: Vec<VolatileRule>,
    trim_trailing_whitespace: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `rule` after the existing ones.
    ///
    /// Fails when any configured pattern matches another rule's replacement,
    /// since a later pass would then rewrite text an earlier pass produced.
    pub fn with_rule(mut self, rule: VolatileRule) -> HarnessResult<Self> {
        for existing in &self.rules {
            if existing.pattern.is_match(&rule.replacement) {
                return Err(HarnessError::InvalidConfig(format!(
                    "volatile replacement '{}' matches pattern '{}'",
                    rule.replacement, existing.pattern
                )));
            }
            if rule.pattern.is_match(&existing.replacement) {
                return Err(HarnessError::InvalidConfig(format!(
                    "volatile pattern '{}' matches replacement '{}'",
                    rule.pattern, existing.replacement
                )));
            }
        }
        self.rules.push(rule);
        Ok(self)
    }

    pub fn trim_trailing_whitespace(mut self, enabled: bool) -> Self {
        self.trim_trailing_whitespace = enabled;
        self
    }

    /// Canonicalize `raw` for exact comparison.
    ///
    /// CRLF and lone CR become LF and all trailing line breaks are removed
    /// before volatile substrings are replaced, so rules anchored at the end
    /// of the text see the same text on every pass. Applying it twice gives
    /// the same text as applying it once.
    pub fn normalize(&self, raw: &str) -> String {
        let mut text = self.canonicalize(raw);
        if self.rules.is_empty() {
            return text;
        }

        for rule in &self.rules {
            text = rule
                .pattern
                .replace_all(&text, rule.replacement.as_str())
                .into_owned();
        }
        self.canonicalize(&text)
    }

    fn canonicalize(&self, raw: &str) -> String {
        let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");

        if self.trim_trailing_whitespace {
            text = text
                .split('\n')
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
        }

        let trimmed = text.trim_end_matches('\n').len();
        text.truncate(trimmed);
        text
    }
}

/// Normalize with no volatile rules
pub fn normalize(raw: &str) -> String {
    Normalizer::default().normalize(raw)
}

/// Ordered lines joined by `\n`, the comparison target for a command's stdout
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpectedOutput {
    lines: Vec<String>,
}

impl ExpectedOutput {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The joined text, normalized the same way actual output is
    pub fn text(&self) -> String {
        normalize(&self.lines.join("\n"))
    }

    pub fn matches(&self, actual: &str) -> bool {
        self.text() == actual
    }
}

impl fmt::Display for ExpectedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// `join_lines(&["a", "b"])` is the text `"a\nb"`; `join_lines(&[""])` is empty output.
pub fn join_lines(lines: &[&str]) -> ExpectedOutput {
    ExpectedOutput::from_lines(lines.iter().copied())
}

/// Unified diff between expected and actual text
pub fn render_diff(expected: &str, actual: &str) -> String {
    // Without a final newline the last line of each side runs into the hunk marker
    let expected = format!("{}\n", expected);
    let actual = format!("{}\n", actual);
    TextDiff::from_lines(expected.as_str(), actual.as_str())
        .unified_diff()
        .context_radius(3)
        .header("expected", "actual")
        .to_string()
}
