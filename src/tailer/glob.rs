// SPDX-License-Identifier: Apache-2.0

//! Restricted shell-style globs for selecting log files.
//!
//! A glob is an absolute path whose wildcards (`*`, `?`, `[...]`, `[^...]`)
//! all live in the final path segment. The parent directory is therefore a
//! literal path that can be watched directly. Patterns are validated with
//! POSIX bracket rules when parsed, so matching never fails.
//!
//! `\` escapes the following character, except on Windows where it is the
//! path separator.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::tailer::error::{Error, Result};

const ESCAPE_ENABLED: bool = !cfg!(windows);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Char(char),
    Separator(char),
    AnyChar,
    AnyRun,
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Token {
    fn is_wildcard(&self) -> bool {
        matches!(self, Token::AnyChar | Token::AnyRun | Token::Class { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: String,
    dir: PathBuf,
    name: Vec<Token>,
}

impl Glob {
    /// Parses `pattern`, resolving it against the current directory when relative.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidGlob {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        // Reject malformed classes before touching the path, so the error
        // names the pattern as written.
        tokenize(pattern).map_err(invalid)?;

        let absolute = std::path::absolute(pattern)
            .map_err(|e| invalid(&format!("cannot make path absolute: {}", e)))?;
        let cleaned = clean(&absolute);
        let cleaned = cleaned
            .to_str()
            .ok_or_else(|| invalid("path is not valid UTF-8"))?
            .to_string();

        let tokens = tokenize(&cleaned).map_err(invalid)?;
        let split = tokens
            .iter()
            .rposition(|t| matches!(t, Token::Separator(_)))
            .ok_or_else(|| invalid("pattern has no directory"))?;
        let (dir_tokens, name_tokens) = tokens.split_at(split);
        let name_tokens = &name_tokens[1..];

        if name_tokens.is_empty() {
            return Err(invalid("pattern does not name a file"));
        }
        if dir_tokens.iter().any(Token::is_wildcard) {
            return Err(invalid(
                "wildcards are only allowed in the last part of the path",
            ));
        }

        let mut dir: String = dir_tokens
            .iter()
            .filter_map(|t| match t {
                Token::Char(c) | Token::Separator(c) => Some(*c),
                _ => None,
            })
            .collect();
        if dir.is_empty() || dir.ends_with(':') {
            // Root directory, keep its trailing separator.
            if let Token::Separator(c) = tokens[split] {
                dir.push(c);
            }
        }

        Ok(Self {
            pattern: cleaned,
            dir: PathBuf::from(dir),
            name: name_tokens.to_vec(),
        })
    }

    /// Returns true when `path` lives directly in [`Glob::dir`] and its file
    /// name matches the final segment of the pattern.
    pub fn matches(&self, path: &Path) -> bool {
        if path.parent() != Some(self.dir.as_path()) {
            return false;
        }
        match path.file_name() {
            Some(name) => {
                let name: Vec<char> = name.to_string_lossy().chars().collect();
                match_tokens(&self.name, &name)
            }
            None => false,
        }
    }

    /// The literal directory holding all files this glob can match.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// The single path this glob matches, if it has no wildcards.
    pub fn literal_path(&self) -> Option<PathBuf> {
        let name = self
            .name
            .iter()
            .map(|t| match t {
                Token::Char(c) => Some(*c),
                _ => None,
            })
            .collect::<Option<String>>()?;
        Some(self.dir.join(name))
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn is_separator(c: char) -> bool {
    std::path::is_separator(c)
}

/// Lexically removes `.` and `..` components and duplicate separators.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn tokenize(pattern: &str) -> std::result::Result<Vec<Token>, &'static str> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                tokens.push(Token::AnyRun);
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyChar);
                i += 1;
            }
            '[' => {
                let (token, next) = parse_class(&chars, i + 1)?;
                tokens.push(token);
                i = next;
            }
            '\\' if ESCAPE_ENABLED => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or("pattern ends with an escape character")?;
                tokens.push(Token::Char(*escaped));
                i += 2;
            }
            c if is_separator(c) => {
                tokens.push(Token::Separator(c));
                i += 1;
            }
            c => {
                tokens.push(Token::Char(c));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Parses a bracket expression whose opening `[` precedes `start`. Returns the
/// class token and the index just past the closing `]`.
fn parse_class(chars: &[char], start: usize) -> std::result::Result<(Token, usize), &'static str> {
    let mut i = start;
    let negated = chars.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    loop {
        match chars.get(i) {
            None => return Err("unterminated character class"),
            Some(']') if ranges.is_empty() => return Err("empty character class"),
            Some(']') => return Ok((Token::Class { negated, ranges }, i + 1)),
            Some(_) => {}
        }

        let (lo, next) = class_char(chars, i)?;
        i = next;
        let mut hi = lo;
        if chars.get(i) == Some(&'-') {
            let (end, next) = class_char(chars, i + 1)?;
            hi = end;
            i = next;
        }
        ranges.push((lo, hi));
    }
}

fn class_char(chars: &[char], i: usize) -> std::result::Result<(char, usize), &'static str> {
    match chars.get(i) {
        None => Err("unterminated character class"),
        Some('-') => Err("misplaced '-' in character class"),
        Some(']') => Err("character range is missing its end"),
        Some('\\') if ESCAPE_ENABLED => chars
            .get(i + 1)
            .map(|c| (*c, i + 2))
            .ok_or("pattern ends with an escape character"),
        Some(c) => Ok((*c, i + 1)),
    }
}

fn match_tokens(tokens: &[Token], name: &[char]) -> bool {
    let (mut t, mut n) = (0, 0);
    // Position of the most recent `*` and the input index it is resumed from.
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        let step = match tokens.get(t) {
            Some(Token::AnyRun) => {
                backtrack = Some((t, n));
                t += 1;
                continue;
            }
            Some(Token::AnyChar) => true,
            Some(Token::Char(c)) | Some(Token::Separator(c)) => *c == name[n],
            Some(Token::Class { negated, ranges }) => {
                let c = name[n];
                ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi) != *negated
            }
            None => false,
        };

        if step {
            t += 1;
            n += 1;
            continue;
        }

        match backtrack {
            Some((star, from)) => {
                backtrack = Some((star, from + 1));
                t = star + 1;
                n = from + 1;
            }
            None => return false,
        }
    }

    tokens[t..].iter().all(|t| *t == Token::AnyRun)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(p: &str) -> String {
        if cfg!(windows) {
            format!("C:{}", p.replace('/', "\\"))
        } else {
            p.to_string()
        }
    }

    #[test]
    fn test_parse_dir() {
        let glob = Glob::parse(&abs("/var/log/*.log")).unwrap();
        assert_eq!(glob.dir(), Path::new(&abs("/var/log")));
        assert_eq!(glob.as_str(), abs("/var/log/*.log"));

        let glob = Glob::parse(&abs("/var/log/./nginx/../app.log")).unwrap();
        assert_eq!(glob.dir(), Path::new(&abs("/var/log")));
        assert_eq!(glob.to_string(), abs("/var/log/app.log"));
    }

    #[test]
    fn test_parse_relative() {
        let glob = Glob::parse("logs/*.log").unwrap();
        let expected = std::env::current_dir().unwrap().join("logs");
        assert_eq!(glob.dir(), expected.as_path());
        assert!(glob.matches(&expected.join("a.log")));
    }

    #[test]
    fn test_parse_root_dir() {
        let glob = Glob::parse(&abs("/*.log")).unwrap();
        assert_eq!(glob.dir(), Path::new(&abs("/")));
        assert!(glob.matches(Path::new(&abs("/a.log"))));
    }

    #[test]
    fn test_invalid_patterns() {
        let cases = [
            "",
            "/var/log/[",
            "/var/log/[]",
            "/var/log/[^]",
            "/var/log/[-a]",
            "/var/log/[a-]",
            "/var/log/[a-z",
            "/var/*/app.log",
            "/var/lo?/app.log",
            "/var/log[12]/app.log",
        ];
        for case in cases {
            let pattern = if case.is_empty() { String::new() } else { abs(case) };
            assert!(Glob::parse(&pattern).is_err(), "expected {:?} to be invalid", case);
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn test_invalid_trailing_escape() {
        assert!(Glob::parse("/var/log/app\\").is_err());
        assert!(Glob::parse("/var/log/[a\\").is_err());
    }

    #[test]
    fn test_valid_patterns() {
        let cases = [
            "/var/log/*",
            "/var/log/app.log",
            "/var/log/app-?.log",
            "/var/log/[abc].log",
            "/var/log/[^abc].log",
            "/var/log/[a-c0-9]*.log",
        ];
        for case in cases {
            assert!(Glob::parse(&abs(case)).is_ok(), "expected {:?} to be valid", case);
        }
    }

    #[test]
    fn test_matches() {
        let glob = Glob::parse(&abs("/var/log/*.log")).unwrap();
        assert!(glob.matches(Path::new(&abs("/var/log/a.log"))));
        assert!(glob.matches(Path::new(&abs("/var/log/.log"))));
        assert!(!glob.matches(Path::new(&abs("/var/log/a.log.1"))));
        assert!(!glob.matches(Path::new(&abs("/var/log/nginx/a.log"))));
        assert!(!glob.matches(Path::new(&abs("/var/a.log"))));
    }

    #[test]
    fn test_literal_path() {
        let glob = Glob::parse(&abs("/var/log/app.log")).unwrap();
        assert_eq!(glob.literal_path(), Some(PathBuf::from(abs("/var/log/app.log"))));

        let glob = Glob::parse(&abs("/var/log/app-?.log")).unwrap();
        assert_eq!(glob.literal_path(), None);
    }

    #[test]
    fn test_matches_classes() {
        let glob = Glob::parse(&abs("/logs/app-[0-9].log")).unwrap();
        assert!(glob.matches(Path::new(&abs("/logs/app-3.log"))));
        assert!(!glob.matches(Path::new(&abs("/logs/app-x.log"))));

        let glob = Glob::parse(&abs("/logs/app-[^0-9].log")).unwrap();
        assert!(!glob.matches(Path::new(&abs("/logs/app-3.log"))));
        assert!(glob.matches(Path::new(&abs("/logs/app-x.log"))));

        let glob = Glob::parse(&abs("/logs/?.log")).unwrap();
        assert!(glob.matches(Path::new(&abs("/logs/a.log"))));
        assert!(!glob.matches(Path::new(&abs("/logs/ab.log"))));
    }

    #[test]
    fn test_matches_star_backtracking() {
        let glob = Glob::parse(&abs("/logs/*a*b.log")).unwrap();
        assert!(glob.matches(Path::new(&abs("/logs/xxaybb.log"))));
        assert!(glob.matches(Path::new(&abs("/logs/ab.log"))));
        assert!(!glob.matches(Path::new(&abs("/logs/ba.log"))));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_escapes() {
        let glob = Glob::parse("/logs/\\*.log").unwrap();
        assert!(glob.matches(Path::new("/logs/*.log")));
        assert!(!glob.matches(Path::new("/logs/a.log")));

        let glob = Glob::parse("/logs/[\\]\\-].log").unwrap();
        assert!(glob.matches(Path::new("/logs/].log")));
        assert!(glob.matches(Path::new("/logs/-.log")));
        assert!(!glob.matches(Path::new("/logs/a.log")));

        let glob = Glob::parse("/lo\\gs/a.log").unwrap();
        assert_eq!(glob.dir(), Path::new("/logs"));
    }
}
