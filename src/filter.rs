//! # Path Filtering for cloudcp
//!
//! Decides which entries of a directory tree take part in a transfer. Rules
//! come from `--exclude`/`--include` options and from ignore files found in
//! the source tree; both use gitignore-style glob patterns.
//!
//! Paths are always relative to the root of the transfer, use `/` as the
//! separator, and directories carry a trailing `/`. A pattern ending in `/`
//! therefore only ever matches directories.

use regex::Regex;

use crate::error::{FsError, FsResult};

/// One exclude or include rule.
#[derive(Debug, Clone)]
struct FilterRule {
    exclude: bool,
    regex: Regex,
    /// Directory (relative to the transfer root, ending in `/`) the rule
    /// was declared in; the rule only sees paths below it.
    prefix: String,
}

/// An ordered list of exclude/include rules. The last matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    rules: Vec<FilterRule>,
}

impl FileFilter {
    pub fn new() -> Self {
        FileFilter::default()
    }

    /// Add a rule excluding paths below `prefix` that match `pattern`.
    ///
    /// # Errors
    /// Returns [`FsError::InvalidPattern`] if the pattern cannot be compiled.
    pub fn exclude(&mut self, pattern: &str, prefix: &str) -> FsResult<()> {
        self.append(true, pattern, prefix)
    }

    /// Add a rule re-including paths below `prefix` that match `pattern`.
    ///
    /// # Errors
    /// Returns [`FsError::InvalidPattern`] if the pattern cannot be compiled.
    pub fn include(&mut self, pattern: &str, prefix: &str) -> FsResult<()> {
        self.append(false, pattern, prefix)
    }

    /// Add the rules of an ignore file located in directory `prefix`.
    ///
    /// One pattern per line; blank lines and `#` comments are skipped, a
    /// leading `!` turns the pattern into an include, `\#` and `\!` escape
    /// those characters, and trailing spaces are dropped unless escaped.
    ///
    /// # Errors
    /// Returns [`FsError::InvalidPattern`] for the first bad line.
    pub fn read_from_buffer(&mut self, text: &str, prefix: &str) -> FsResult<()> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = strip_trailing_spaces(line);
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix('!') {
                Some(pattern) => self.include(pattern, prefix)?,
                None => self.exclude(line, prefix)?,
            }
        }
        Ok(())
    }

    /// Verdict of the last rule matching `path`, `None` if no rule applies.
    ///
    /// `Some(true)` means include, `Some(false)` exclude.
    pub fn decide(&self, path: &str) -> Option<bool> {
        self.rules.iter().rev().find_map(|rule| {
            let rest = path.strip_prefix(rule.prefix.as_str())?;
            rule.regex.is_match(rest).then_some(!rule.exclude)
        })
    }

    /// Whether `path` is included; paths no rule mentions are.
    pub fn matches(&self, path: &str) -> bool {
        self.decide(path).unwrap_or(true)
    }

    fn append(&mut self, exclude: bool, pattern: &str, prefix: &str) -> FsResult<()> {
        debug_assert!(prefix.is_empty() || prefix.ends_with('/'));

        // A name without an inner slash matches at any depth, anything else
        // is anchored to the prefix directory
        let trimmed = pattern.trim_end_matches('/');
        let anchored = if trimmed.contains('/') {
            pattern.trim_start_matches('/').to_string()
        } else {
            format!("**/{pattern}")
        };

        let mut re = translate(&anchored);
        if !anchored.ends_with('/') {
            re.push_str("/?");
        }
        let regex = compile(pattern, &re)?;

        self.rules.push(FilterRule {
            exclude,
            regex,
            prefix: prefix.to_string(),
        });
        Ok(())
    }
}

/// Translate a shell glob into an (unanchored) regular expression.
///
/// - `*` matches within one path segment, `?` a single character of it,
/// - `[abc]`, `[a-z]` and `[!abc]` are character classes,
/// - `**/` matches zero or more whole directories, a trailing `/**`
///   everything below,
/// - `\` makes the next character literal.
pub fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') && (i == 0 || chars[i - 1] == '/') => {
                match chars.get(i + 2) {
                    Some('/') => {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    }
                    None => {
                        out.push_str(".*");
                        i += 2;
                    }
                    // `**x` behaves like `*x`
                    Some(_) => {
                        out.push_str("[^/]*");
                        i += 2;
                    }
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push_str(&translate_class(&chars[i + 1..end]));
                    i = end + 1;
                    continue;
                }
                None => out.push_str(r"\["),
            },
            '\\' if i + 1 < chars.len() => {
                out.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 2;
                continue;
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out
}

/// Compile a translated glob so that it must match the whole input.
pub(crate) fn compile(pattern: &str, re: &str) -> FsResult<Regex> {
    Regex::new(&format!("^(?:{re})$")).map_err(|err| FsError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

/// Index of the `]` closing the class opened at `start`.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if matches!(chars.get(j), Some('!') | Some('^')) {
        j += 1;
    }
    // A `]` right after the opening bracket is literal
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}

fn translate_class(body: &[char]) -> String {
    let (negated, body) = match body.first() {
        Some('!') | Some('^') => (true, &body[1..]),
        _ => (false, body),
    };

    let mut out = String::from(if negated { "[^/" } else { "[" });
    for &c in body {
        match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push(']');
    out
}

fn strip_trailing_spaces(line: &str) -> &str {
    let trimmed = line.trim_end_matches(' ');
    if trimmed.len() < line.len() && trimmed.ends_with('\\') {
        // `\ ` keeps one escaped space
        &line[..trimmed.len() + 1]
    } else {
        trimmed
    }
}
