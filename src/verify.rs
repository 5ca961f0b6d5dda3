//! Expected-vs-actual string predicates used by the verify family of actions.
//!
//! Every predicate is false when either side is missing. The negated forms
//! re-check for missing values themselves, so `verify(None, x)` and
//! `verify_not(None, x)` are both false.

use regex::Regex;

/// Exact, case-sensitive equality
pub fn verify(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(e), Some(a)) => e == a,
        _ => false,
    }
}

pub fn verify_not(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(e), Some(a)) => e != a,
        _ => false,
    }
}

/// `*` matches any run of characters (newlines included), `?` matches exactly
/// one; everything else is literal. The whole of `actual` must match.
pub fn verify_wildcard(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(e), Some(a)) => wildcard_matches(e, a),
        _ => false,
    }
}

pub fn verify_not_wildcard(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(e), Some(a)) => !wildcard_matches(e, a),
        _ => false,
    }
}

/// Full-string regex match. Inline flags such as `(?i)` are honoured.
/// An invalid pattern never matches.
pub fn verify_regex(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(e), Some(a)) => regex_matches(e, a).unwrap_or(false),
        _ => false,
    }
}

pub fn verify_not_regex(expected: Option<&str>, actual: Option<&str>) -> bool {
    match (expected, actual) {
        (Some(e), Some(a)) => regex_matches(e, a).map_or(false, |m| !m),
        _ => false,
    }
}

/// Translate a wildcard pattern into an anchored regex source.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::from(r"(?sm)\A(?:");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push_str(r")\z");
    out
}

fn wildcard_matches(pattern: &str, actual: &str) -> bool {
    // the translated pattern only contains escaped literals, `.` and `.*`
    Regex::new(&wildcard_to_regex(pattern))
        .map(|re| re.is_match(actual))
        .unwrap_or(false)
}

fn regex_matches(pattern: &str, actual: &str) -> Option<bool> {
    // `\A` / `\z` anchor to the whole input even when the caller enables (?m)
    let re = Regex::new(&format!(r"\A(?:{})\z", pattern)).ok()?;
    Some(re.is_match(actual))
}

/// The six verify kinds, looked up by action name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyKind {
    Verify,
    VerifyNot,
    VerifyWildcard,
    VerifyNotWildcard,
    VerifyRegex,
    VerifyNotRegex,
}

impl VerifyKind {
    pub const ALL: [VerifyKind; 6] = [
        VerifyKind::Verify,
        VerifyKind::VerifyNot,
        VerifyKind::VerifyWildcard,
        VerifyKind::VerifyNotWildcard,
        VerifyKind::VerifyRegex,
        VerifyKind::VerifyNotRegex,
    ];

    /// Case-insensitive lookup by action name (`VerifyNotRegex`, `verify`, ...)
    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.action_name().eq_ignore_ascii_case(action))
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            VerifyKind::Verify => "Verify",
            VerifyKind::VerifyNot => "VerifyNot",
            VerifyKind::VerifyWildcard => "VerifyWildcard",
            VerifyKind::VerifyNotWildcard => "VerifyNotWildcard",
            VerifyKind::VerifyRegex => "VerifyRegex",
            VerifyKind::VerifyNotRegex => "VerifyNotRegex",
        }
    }

    pub fn check(&self, expected: Option<&str>, actual: Option<&str>) -> bool {
        match self {
            VerifyKind::Verify => verify(expected, actual),
            VerifyKind::VerifyNot => verify_not(expected, actual),
            VerifyKind::VerifyWildcard => verify_wildcard(expected, actual),
            VerifyKind::VerifyNotWildcard => verify_not_wildcard(expected, actual),
            VerifyKind::VerifyRegex => verify_regex(expected, actual),
            VerifyKind::VerifyNotRegex => verify_not_regex(expected, actual),
        }
    }

    /// Human-readable mismatch message
    pub fn failure_message(&self, expected: &str, actual: Option<&str>) -> String {
        let actual = actual.unwrap_or("null");
        match self {
            VerifyKind::Verify => format!("Expected \"{}\" but found \"{}\"", expected, actual),
            VerifyKind::VerifyNot => {
                format!("Expected not \"{}\" but found \"{}\"", expected, actual)
            }
            VerifyKind::VerifyWildcard => format!(
                "Expected match to wildcard pattern \"{}\" but found \"{}\"",
                expected, actual
            ),
            VerifyKind::VerifyNotWildcard => format!(
                "Expected non-match to wildcard pattern \"{}\" but found \"{}\"",
                expected, actual
            ),
            VerifyKind::VerifyRegex => format!(
                "Expected match to regex pattern \"{}\" but found \"{}\"",
                expected, actual
            ),
            VerifyKind::VerifyNotRegex => format!(
                "Expected non-match to regex pattern \"{}\" but found \"{}\"",
                expected, actual
            ),
        }
    }
}
