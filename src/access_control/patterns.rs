//! Ref pattern matching for access sections
//!
//! A section applies to refs through one of three pattern shapes:
//!
//! - a literal ref name (`refs/heads/master`)
//! - a trailing wildcard (`refs/heads/*`), matching everything below the prefix
//! - a regular expression introduced by `^` (`^refs/heads/rel-[0-9]+`)
//!
//! Any shape may contain `${username}`, which is replaced with the acting
//! user's name (regex-escaped for regular expressions) before matching.

use crate::error::ConfigError;
use regex::Regex;
use std::borrow::Cow;
use std::cmp::Reverse;
use std::iter::Peekable;
use std::str::Chars;
use tracing::warn;

/// Placeholder replaced with the acting user's name
pub const USERNAME_PLACEHOLDER: &str = "${username}";

/// Pattern matching every ref
pub const ALL_REFS: &str = "refs/*";

const REGEX_PREFIX: char = '^';

/// Compiled ref pattern
#[derive(Debug, Clone)]
pub struct RefPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact,
    /// Everything starting with the prefix, which keeps its trailing `/`
    Prefix(String),
    Regex(Regex),
    /// Contains `${username}`; must be expanded before it can match
    Parameterized,
}

impl RefPattern {
    /// Validate and compile a pattern
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        validate(pattern)?;
        Self::compile(pattern)
    }

    fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let matcher = if pattern.contains(USERNAME_PLACEHOLDER) {
            Matcher::Parameterized
        } else if is_regex(pattern) {
            Matcher::Regex(compile_regex(pattern)?)
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Matcher::Prefix(prefix.to_string())
        } else {
            Matcher::Exact
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_regex(&self) -> bool {
        is_regex(&self.source)
    }

    pub fn is_parameterized(&self) -> bool {
        matches!(self.matcher, Matcher::Parameterized)
    }

    /// The pattern as seen by `username`.
    ///
    /// Returns `None` when the pattern needs a username and there is none, so
    /// the section does not apply to the user.
    pub fn for_user(&self, username: Option<&str>) -> Option<Cow<'_, RefPattern>> {
        if !self.is_parameterized() {
            return Some(Cow::Borrowed(self));
        }

        let username = username?;
        let replacement = if self.is_regex() {
            Cow::Owned(regex::escape(username))
        } else {
            Cow::Borrowed(username)
        };
        let expanded = self.source.replace(USERNAME_PLACEHOLDER, &replacement);

        match Self::compile(&expanded) {
            Ok(pattern) => Some(Cow::Owned(pattern)),
            Err(e) => {
                warn!(pattern = %self.source, error = %e, "Cannot expand ref pattern for user");
                None
            }
        }
    }

    /// Check if a ref name matches this pattern
    pub fn matches(&self, ref_name: &str) -> bool {
        match &self.matcher {
            Matcher::Exact => self.source == ref_name,
            Matcher::Prefix(prefix) => ref_name.starts_with(prefix.as_str()),
            Matcher::Regex(regex) => regex.is_match(ref_name),
            Matcher::Parameterized => false,
        }
    }

    /// Sort key; smaller keys are more specific.
    pub fn specificity(&self) -> Specificity {
        let (tier, prefix) = match &self.matcher {
            Matcher::Exact => (0, self.source.len()),
            Matcher::Prefix(prefix) => (1, prefix.len()),
            Matcher::Regex(_) | Matcher::Parameterized => (2, regex_literal_prefix(&self.source).len()),
        };
        Specificity {
            tier,
            literal_prefix: Reverse(prefix),
            length: Reverse(self.source.len()),
        }
    }
}

/// Ordering key of a ref pattern: exact literals first, then wildcards by
/// longest literal prefix, then regular expressions by literal prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    tier: u8,
    literal_prefix: Reverse<usize>,
    length: Reverse<usize>,
}

/// Patterns starting with `^` are regular expressions
pub fn is_regex(pattern: &str) -> bool {
    pattern.starts_with(REGEX_PREFIX)
}

fn compile_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| ConfigError::invalid_pattern(pattern, e.to_string()))
}

/// Representative ref for a target that is itself a pattern.
///
/// `refs/heads/x/*` becomes `refs/heads/x/` and a regular expression becomes
/// its shortest example, so sections can be matched against it.
pub fn representative_ref(ref_name: &str) -> Cow<'_, str> {
    if is_regex(ref_name) {
        match shortest_example(ref_name) {
            Ok(example) => Cow::Owned(example),
            Err(_) => Cow::Borrowed(ref_name),
        }
    } else if let Some(prefix) = ref_name.strip_suffix("/*") {
        Cow::Owned(format!("{}/", prefix))
    } else {
        Cow::Borrowed(ref_name)
    }
}

/// Validate a section pattern
///
/// Regular expressions must describe valid ref names (so `^^refs/*` is
/// rejected), must not end in a dangling repetition and must compile. Other
/// patterns must be valid ref names, optionally followed by `/*`.
pub fn validate(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::invalid_pattern(pattern, "empty ref pattern"));
    }

    if is_regex(pattern) {
        let sample = pattern.replace(USERNAME_PLACEHOLDER, "username");
        let example = shortest_example(&sample)
            .map_err(|reason| ConfigError::invalid_pattern(pattern, reason))?;
        // `.*` after a slash leaves a trailing slash in the shortest example
        if !is_valid_ref_name(example.strip_suffix('/').unwrap_or(&example)) {
            return Err(ConfigError::invalid_pattern(
                pattern,
                format!("shortest match '{}' is not a valid ref name", example),
            ));
        }
        compile_regex(&pattern.replace(USERNAME_PLACEHOLDER, ""))?;
        return Ok(());
    }

    if pattern == ALL_REFS {
        return Ok(());
    }

    let name = pattern.strip_suffix("/*").unwrap_or(pattern);
    if !is_valid_ref_name(name) {
        return Err(ConfigError::invalid_pattern(pattern, "not a valid ref name"));
    }
    Ok(())
}

/// Git ref name rules (as enforced by `git check-ref-format`)
pub fn is_valid_ref_name(name: &str) -> bool {
    if name.is_empty() || name.ends_with(".lock") {
        return false;
    }

    let len = name.chars().count();
    let mut components = 1;
    let mut prev = '\0';
    for (i, c) in name.chars().enumerate() {
        if c <= ' ' || c == '\u{7f}' {
            return false;
        }
        match c {
            '.' => {
                if matches!(prev, '\0' | '/' | '.') || i == len - 1 {
                    return false;
                }
            }
            '/' => {
                if i == 0 || i == len - 1 || prev == '/' {
                    return false;
                }
                components += 1;
            }
            '{' if prev == '@' => return false,
            '~' | '^' | ':' | '?' | '[' | '*' | '\\' => return false,
            _ => {}
        }
        prev = c;
    }
    components > 1
}

/// Shortest string matched by a `^`-prefixed pattern.
///
/// The leading `^` only marks the pattern as a regular expression; any
/// further `^` is treated as a literal character, which is what makes
/// `^^refs/*` produce an invalid ref name. Dangling repetition operators are
/// reported as errors.
pub fn shortest_example(pattern: &str) -> Result<String, String> {
    let body = pattern.strip_prefix(REGEX_PREFIX).unwrap_or(pattern);
    let mut parser = ExampleParser {
        chars: body.chars().peekable(),
    };
    let example = parser.alternation()?;
    match parser.chars.next() {
        None => Ok(example),
        Some(c) => Err(format!("unmatched '{}'", c)),
    }
}

struct ExampleParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl ExampleParser<'_> {
    fn alternation(&mut self) -> Result<String, String> {
        let mut best = self.sequence()?;
        while self.chars.peek() == Some(&'|') {
            self.chars.next();
            let candidate = self.sequence()?;
            if candidate.len() < best.len() {
                best = candidate;
            }
        }
        Ok(best)
    }

    fn sequence(&mut self) -> Result<String, String> {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '|' || c == ')' {
                break;
            }
            if is_quantifier_start(c) && self.peek_quantifier() {
                return Err(format!("dangling meta character '{}'", c));
            }
            let atom = self.atom()?;
            let repeated = self.quantifier(&atom)?;
            out.push_str(&repeated);
        }
        Ok(out)
    }

    fn atom(&mut self) -> Result<String, String> {
        let Some(c) = self.chars.next() else {
            return Ok(String::new());
        };
        match c {
            '(' => {
                if self.chars.peek() == Some(&'?') {
                    self.chars.next();
                    // non-capturing group or inline flags
                    while let Some(&f) = self.chars.peek() {
                        self.chars.next();
                        if f == ':' {
                            break;
                        }
                        if f == ')' {
                            return Ok(String::new());
                        }
                    }
                }
                let inner = self.alternation()?;
                match self.chars.next() {
                    Some(')') => Ok(inner),
                    _ => Err("unclosed group".to_string()),
                }
            }
            '[' => self.class().map(String::from),
            '.' => Ok("-".to_string()),
            '$' => Ok(String::new()),
            '\\' => match self.chars.next() {
                Some('d') => Ok("0".to_string()),
                Some('w') | Some('D') | Some('S') => Ok("a".to_string()),
                Some('W') => Ok("-".to_string()),
                Some('s') => Ok(" ".to_string()),
                Some('b') | Some('B') | Some('A') | Some('z') | Some('Z') => Ok(String::new()),
                Some(other) => Ok(other.to_string()),
                None => Err("trailing backslash".to_string()),
            },
            other => Ok(other.to_string()),
        }
    }

    fn class(&mut self) -> Result<char, String> {
        let negated = self.chars.peek() == Some(&'^');
        if negated {
            self.chars.next();
        }

        let mut ranges: Vec<(char, char)> = Vec::new();
        let mut first = true;
        loop {
            let c = self.chars.next().ok_or("unclosed character class")?;
            if c == ']' && !first {
                break;
            }
            first = false;
            let start = if c == '\\' {
                match self.chars.next().ok_or("unclosed character class")? {
                    'd' => {
                        ranges.push(('0', '9'));
                        continue;
                    }
                    'w' => {
                        ranges.push(('a', 'z'));
                        continue;
                    }
                    's' => {
                        ranges.push((' ', ' '));
                        continue;
                    }
                    escaped => escaped,
                }
            } else {
                c
            };

            let mut lookahead = self.chars.clone();
            if lookahead.next() == Some('-')
                && let Some(end) = lookahead.next()
                && end != ']'
            {
                self.chars.next();
                self.chars.next();
                ranges.push((start, end));
            } else {
                ranges.push((start, start));
            }
        }

        let covered = |ch: char| ranges.iter().any(|&(lo, hi)| lo <= ch && ch <= hi);
        if negated {
            Ok(['-', 'a', '0', '_', 'x']
                .into_iter()
                .find(|&ch| !covered(ch))
                .unwrap_or('a'))
        } else {
            ranges
                .first()
                .map(|&(lo, _)| lo)
                .ok_or_else(|| "empty character class".to_string())
        }
    }

    /// Applies a repetition following `atom`, if any.
    fn quantifier(&mut self, atom: &str) -> Result<String, String> {
        let repeated = match self.chars.peek().copied() {
            Some('*') | Some('?') => {
                self.chars.next();
                String::new()
            }
            Some('+') => {
                self.chars.next();
                atom.to_string()
            }
            Some('{') if self.peek_quantifier() => {
                self.chars.next();
                let mut min = String::new();
                for c in self.chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    min.push(c);
                }
                let lower = min
                    .split(',')
                    .next()
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .ok_or_else(|| format!("invalid repetition '{{{}}}'", min))?;
                atom.repeat(lower)
            }
            _ => return Ok(atom.to_string()),
        };

        // lazy modifier
        if self.chars.peek() == Some(&'?') {
            self.chars.next();
        }
        if let Some(c) = self.chars.peek().copied()
            && is_quantifier_start(c)
            && self.peek_quantifier()
        {
            return Err(format!("dangling meta character '{}'", c));
        }
        Ok(repeated)
    }

    /// True if the next character starts a repetition operator
    fn peek_quantifier(&self) -> bool {
        let mut lookahead = self.chars.clone();
        match lookahead.next() {
            Some('*') | Some('+') | Some('?') => true,
            Some('{') => {
                let rest: String = lookahead.take_while(|&c| c != '}').collect();
                !rest.is_empty()
                    && rest
                        .split(',')
                        .next()
                        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            }
            _ => false,
        }
    }
}

fn is_quantifier_start(c: char) -> bool {
    matches!(c, '*' | '+' | '?' | '{')
}

/// Literal characters a regular expression pattern starts with
fn regex_literal_prefix(pattern: &str) -> String {
    let body = pattern.strip_prefix(REGEX_PREFIX).unwrap_or(pattern);
    let mut prefix = String::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        let literal = match c {
            '\\' => match chars.next() {
                Some(escaped) if !escaped.is_ascii_alphanumeric() => escaped,
                _ => break,
            },
            '.' | '[' | ']' | '(' | ')' | '*' | '+' | '?' | '{' | '}' | '|' | '$' | '^' => break,
            other => other,
        };
        if matches!(chars.peek(), Some('*') | Some('?') | Some('{')) {
            break;
        }
        prefix.push(literal);
    }
    prefix
}
