//! Gitignore-style ignore rules.
//!
//! Rules are compiled to anchored regular expressions once and then tested
//! against object keys. A key is ignored when the last rule matching it is
//! not negated, or when one of its parent directories is ignored.

use regex::Regex;
use thiserror::Error;

/// Errors parsing a rule set.
#[derive(Debug, Error)]
pub enum IgnoreParseError {
    #[error("Rule file is not valid UTF-8")]
    NotUtf8,

    #[error("Unterminated character class in rule '{0}'")]
    UnterminatedClass(String),

    #[error("Rule '{pattern}' does not compile: {message}")]
    Regex { pattern: String, message: String },
}

#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    negated: bool,
    dir_only: bool,
}

impl Rule {
    fn parse(raw: &str) -> Result<Option<Rule>, IgnoreParseError> {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        // A slash anywhere but the end pins the rule to the container root
        let anchored = body.contains('/');
        let body = body.strip_prefix('/').unwrap_or(body);
        if body.is_empty() {
            return Ok(None);
        }

        let source = format!(
            "^{}{}$",
            if anchored { "" } else { "(?:.*/)?" },
            glob_to_regex(body, line)?
        );
        let regex = Regex::new(&source).map_err(|e| IgnoreParseError::Regex {
            pattern: line.to_string(),
            message: e.to_string(),
        })?;

        Ok(Some(Rule {
            regex,
            negated,
            dir_only,
        }))
    }
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

/// Translate one glob (without negation or trailing slash) to a regex body.
fn glob_to_regex(glob: &str, rule: &str) -> Result<String, IgnoreParseError> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                let next = chars.get(i + 2);
                if at_segment_start && next == Some(&'/') {
                    // "**/": zero or more directories
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else if at_segment_start && next.is_none() {
                    // trailing "/**" or a lone "**": everything below
                    out.push_str(".*");
                    i += 2;
                } else {
                    out.push_str("[^/]*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let mut j = i + 1;
                let mut class = String::from("[");
                if matches!(chars.get(j), Some('!') | Some('^')) {
                    class.push_str("^/");
                    j += 1;
                }
                if chars.get(j) == Some(&']') {
                    class.push_str("\\]");
                    j += 1;
                }
                let mut closed = false;
                while j < chars.len() {
                    match chars[j] {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' if j + 1 < chars.len() => {
                            push_literal(&mut class, chars[j + 1]);
                            j += 2;
                            continue;
                        }
                        c @ ('[' | '&' | '~' | '^' | '\\') => {
                            class.push('\\');
                            class.push(c);
                        }
                        c => class.push(c),
                    }
                    j += 1;
                }
                if !closed {
                    return Err(IgnoreParseError::UnterminatedClass(rule.to_string()));
                }
                class.push(']');
                out.push_str(&class);
                i = j + 1;
            }
            '\\' => {
                if let Some(next) = chars.get(i + 1) {
                    push_literal(&mut out, *next);
                }
                i += 2;
            }
            c => {
                push_literal(&mut out, c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// An ordered set of ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// A rule set that ignores nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile patterns in order. Blank entries and comments are skipped.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, IgnoreParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            if let Some(rule) = Rule::parse(pattern.as_ref())? {
                rules.push(rule);
            }
        }
        Ok(Self { rules })
    }

    /// Parse rule file text; rules are separated by newlines or commas.
    pub fn parse(text: &str) -> Result<Self, IgnoreParseError> {
        Self::from_patterns(text.split(['\n', ',']))
    }

    /// Parse raw rule file bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IgnoreParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| IgnoreParseError::NotUtf8)?;
        Self::parse(text)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Verdict of the last rule matching `path`, if any.
    fn verdict(&self, path: &str, is_dir: bool) -> Option<bool> {
        self.rules
            .iter()
            .rev()
            .find(|rule| (is_dir || !rule.dir_only) && rule.regex.is_match(path))
            .map(|rule| !rule.negated)
    }

    /// Whether an object key should be deleted.
    pub fn is_ignored(&self, key: &str) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let is_dir = key.ends_with('/');
        let path = key.trim_matches('/');
        if path.is_empty() {
            return false;
        }

        // Nothing below an ignored directory can be re-included
        for (pos, _) in path.match_indices('/') {
            if self.verdict(&path[..pos], true) == Some(true) {
                return true;
            }
        }
        self.verdict(path, is_dir) == Some(true)
    }
}
