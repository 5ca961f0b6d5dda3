use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Lines starting with this prefix are comments
pub const COMMENT_PREFIX: &str = "#";

/// Tokens starting with this prefix (and containing `=`) are modifiers
pub const MODIFIER_PREFIX: &str = "%";

/// Wildcard used for any missing componentType, monkeyId or action
pub const WILDCARD: &str = "*";

/// Recognised modifier names (always stored lower-case)
pub mod modifier {
    pub const TIMEOUT: &str = "timeout";
    pub const THINKTIME: &str = "thinktime";
    pub const IGNORE: &str = "ignore";
    pub const SHOULD_FAIL: &str = "shouldfail";
    pub const SCREENSHOT_ON_ERROR: &str = "screenshotonerror";
    pub const ECHO: &str = "echo";
    pub const RETRY_DELAY: &str = "retrydelay";
    pub const ABORT: &str = "abort";

    pub const ALL: &[&str] = &[
        TIMEOUT,
        THINKTIME,
        IGNORE,
        SHOULD_FAIL,
        SCREENSHOT_ON_ERROR,
        ECHO,
        RETRY_DELAY,
        ABORT,
    ];
}

/// One parsed test step.
///
/// A `Command` is immutable: every field is private and the only way to get a
/// different command is to build a new one (see [`Command::with_modifier`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    component_type: String,
    monkey_id: String,
    action: String,
    args: Vec<String>,
    modifiers: BTreeMap<String, String>,
    raw: String,
    is_comment: bool,
}

/// Result of [`Command::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandValidity {
    Ok,
    BadComponentType,
    BadMonkeyId,
    BadAction,
}

impl Command {
    /// Build a command from its parts. Empty componentType, monkeyId or action
    /// fall back to `*`; whitespace is stripped from componentType and action.
    pub fn new(
        component_type: &str,
        monkey_id: &str,
        action: &str,
        args: Vec<String>,
        modifiers: BTreeMap<String, String>,
    ) -> Self {
        let component_type = component_type.trim();
        if component_type.starts_with(COMMENT_PREFIX) {
            return Self::comment(component_type);
        }

        let mut cmd = Self {
            component_type: or_wildcard(import_str(&strip_whitespace(component_type))),
            monkey_id: or_wildcard(import_str(monkey_id)),
            action: or_wildcard(import_str(&strip_whitespace(action))),
            args: args.iter().map(|a| import_str(a)).collect(),
            modifiers: modifiers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            raw: String::new(),
            is_comment: false,
        };
        cmd.raw = cmd.to_command_string();
        cmd
    }

    /// Build a comment command; the text is kept unaltered.
    pub fn comment(text: &str) -> Self {
        Self {
            raw: text.trim().to_string(),
            is_comment: true,
            ..Default::default()
        }
    }

    /// Assemble a command from tokenizer output, keeping `raw` as the source text.
    pub(crate) fn from_tokens(raw: &str, tokens: &[String]) -> Self {
        let raw = raw.trim();
        if raw.starts_with(COMMENT_PREFIX) {
            return Self::comment(raw);
        }

        let mut cmd = Self {
            raw: raw.to_string(),
            ..Default::default()
        };
        if tokens.is_empty() {
            return cmd;
        }

        let mut positional = Vec::new();
        for token in tokens {
            match parse_modifier(token) {
                Some((key, value)) => {
                    cmd.modifiers.insert(key, value);
                }
                None => positional.push(token.as_str()),
            }
        }

        let mut iter = positional.into_iter();
        cmd.component_type = or_wildcard(import_str(&strip_whitespace(
            iter.next().unwrap_or_default(),
        )));
        cmd.monkey_id = iter
            .next()
            .map(|m| or_wildcard(import_str(m)))
            .unwrap_or_default();
        cmd.action = iter
            .next()
            .map(|a| or_wildcard(import_str(&strip_whitespace(a))))
            .unwrap_or_default();
        cmd.args = iter.map(import_str).collect();
        cmd
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn monkey_id(&self) -> &str {
        &self.monkey_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn modifiers(&self) -> &BTreeMap<String, String> {
        &self.modifiers
    }

    pub fn modifier(&self, key: &str) -> Option<&str> {
        self.modifiers.get(key).map(String::as_str)
    }

    /// The source text this command was parsed from (trimmed), or its
    /// canonical rendering when built from parts.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_comment(&self) -> bool {
        self.is_comment
    }

    /// True for a blank line: no componentType and not a comment
    pub fn is_blank(&self) -> bool {
        !self.is_comment && self.component_type.is_empty()
    }

    /// Lower-case `componentType.action`
    pub fn command_name(&self) -> String {
        format!("{}.{}", self.component_type, self.action).to_lowercase()
    }

    pub fn is_ignored(&self) -> bool {
        self.modifier(modifier::IGNORE)
            .map_or(false, |v| v.eq_ignore_ascii_case("true"))
    }

    pub fn should_fail(&self) -> bool {
        self.modifier(modifier::SHOULD_FAIL)
            .map_or(false, |v| v.eq_ignore_ascii_case("true"))
    }

    /// Screenshot-on-error is on unless the modifier is explicitly `false`
    pub fn is_screenshot_on_error(&self) -> bool {
        self.modifier(modifier::SCREENSHOT_ON_ERROR)
            .map_or(true, |v| !v.eq_ignore_ascii_case("false"))
    }

    /// Integer modifier value; non-digits are stripped before parsing.
    pub fn int_modifier(&self, key: &str) -> Option<u64> {
        let value = self.modifier(key)?;
        let digits: String = value.chars().filter(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    /// Copy of this command with one modifier set (or removed when `value` is `None`).
    pub fn with_modifier(&self, key: &str, value: Option<&str>) -> Self {
        let mut modifiers = self.modifiers.clone();
        match value {
            Some(v) => modifiers.insert(key.to_lowercase(), v.to_string()),
            None => modifiers.remove(&key.to_lowercase()),
        };
        Self::new(
            &self.component_type,
            &self.monkey_id,
            &self.action,
            self.args.clone(),
            modifiers,
        )
    }

    /// Copy of this command with a different action and args
    pub fn with_action(&self, action: &str, args: Vec<String>) -> Self {
        Self::new(
            &self.component_type,
            &self.monkey_id,
            action,
            args,
            self.modifiers.clone(),
        )
    }

    /// Args rendered the way they appear in a script line
    pub fn args_as_string(&self) -> String {
        self.args
            .iter()
            .map(|arg| {
                if is_quoted_pair(arg) {
                    return arg.clone();
                }
                let arg = export_str(arg);
                if arg.starts_with(MODIFIER_PREFIX) && arg.contains('=') {
                    format!("\"{}\"", arg)
                } else {
                    arg
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Modifiers rendered as `%key=value`, in key order
    pub fn modifiers_as_string(&self) -> String {
        self.modifiers
            .iter()
            .map(|(k, v)| format!("{}{}={}", MODIFIER_PREFIX, k, export_str(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Canonical script rendering of this command.
    pub fn to_command_string(&self) -> String {
        if self.is_comment {
            return self.raw.clone();
        }
        if self.component_type.is_empty() {
            return String::new();
        }

        let mut parts = vec![self.component_type.clone()];
        let monkey_id = export_str(&self.monkey_id);
        if !monkey_id.is_empty() {
            parts.push(monkey_id);
            if !self.action.is_empty() {
                parts.push(self.action.clone());
                let args = self.args_as_string();
                if !args.is_empty() {
                    parts.push(args);
                }
                let mods = self.modifiers_as_string();
                if !mods.is_empty() {
                    parts.push(mods);
                }
            }
        }
        parts.join(" ")
    }

    pub fn validate(&self) -> CommandValidity {
        if self.component_type.is_empty() {
            CommandValidity::BadComponentType
        } else if self.monkey_id.is_empty() {
            CommandValidity::BadMonkeyId
        } else if self.action.is_empty() {
            CommandValidity::BadAction
        } else {
            CommandValidity::Ok
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate() == CommandValidity::Ok
    }

    /// Wire encoding. With `timings`, the effective timeout and thinktime are
    /// written into the modifiers so the agent sees the resolved values.
    pub fn to_json(&self, timings: Option<(u64, u64)>) -> Value {
        let mut mods: Map<String, Value> = self
            .modifiers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if let Some((timeout, thinktime)) = timings {
            mods.insert(modifier::TIMEOUT.into(), Value::from(timeout));
            mods.insert(modifier::THINKTIME.into(), Value::from(thinktime));
            if !self.is_screenshot_on_error() {
                mods.insert(modifier::SCREENSHOT_ON_ERROR.into(), "false".into());
            }
        }

        let mut json = Map::new();
        json.insert("componentType".into(), self.component_type.clone().into());
        json.insert("monkeyId".into(), self.monkey_id.clone().into());
        json.insert("action".into(), self.action.clone().into());
        json.insert(
            "args".into(),
            Value::Array(self.args.iter().cloned().map(Value::String).collect()),
        );
        json.insert("modifiers".into(), Value::Object(mods));
        Value::Object(json)
    }

    /// Decode a wire message. Modifiers are read from the nested `modifiers`
    /// object, and recognised modifier names are also accepted at top level.
    pub fn from_json(json: &Value) -> Self {
        let component_type = json
            .get("componentType")
            .map(value_to_string)
            .unwrap_or_else(|| WILDCARD.to_string());
        let monkey_id = json
            .get("monkeyId")
            .map(value_to_string)
            .unwrap_or_else(|| WILDCARD.to_string());
        let action = json.get("action").map(value_to_string).unwrap_or_default();

        let args = json
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().map(value_to_string).collect())
            .unwrap_or_default();

        let mut modifiers = BTreeMap::new();
        for name in modifier::ALL {
            if let Some(v) = json.get(*name) {
                modifiers.insert(name.to_string(), value_to_string(v));
            }
        }
        if let Some(mods) = json.get("modifiers").and_then(Value::as_object) {
            for (k, v) in mods {
                modifiers.insert(k.to_lowercase(), value_to_string(v));
            }
        }

        Self::new(&component_type, &monkey_id, &action, args, modifiers)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_command_string())
    }
}

/// componentType and action compare case-insensitively, everything else exactly.
impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        if self.is_comment || other.is_comment {
            return self.is_comment == other.is_comment && self.raw == other.raw;
        }
        self.component_type.eq_ignore_ascii_case(&other.component_type)
            && self.monkey_id == other.monkey_id
            && self.action.eq_ignore_ascii_case(&other.action)
            && self.args == other.args
            && self.modifiers == other.modifiers
    }
}

impl Eq for Command {}

/// Split a `%key=value` token into its lower-cased key and unquoted value.
fn parse_modifier(token: &str) -> Option<(String, String)> {
    let body = token.strip_prefix(MODIFIER_PREFIX)?;
    let (key, value) = body.split_once('=')?;
    Some((key.to_lowercase(), import_str(value)))
}

/// Trim, then strip surrounding quotes if the whole token is quoted
fn import_str(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Quote a value if it is empty or contains whitespace
fn export_str(s: &str) -> String {
    if !s.is_empty() && !s.chars().any(char::is_whitespace) {
        s.to_string()
    } else if s.is_empty() {
        String::new()
    } else {
        format!("\"{}\"", s)
    }
}

/// `name="value"` args are written back unchanged
fn is_quoted_pair(arg: &str) -> bool {
    match arg.split_once('=') {
        Some((name, value)) => {
            !name.is_empty()
                && !name.chars().any(char::is_whitespace)
                && value.len() >= 2
                && value.starts_with('"')
                && value.ends_with('"')
                && !value[1..value.len() - 1].contains('"')
        }
        None => false,
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn or_wildcard(s: String) -> String {
    if s.is_empty() {
        WILDCARD.to_string()
    } else {
        s
    }
}

pub(crate) fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mods(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_new_defaults_to_wildcard() {
        let cmd = Command::new("", "", "", vec![], BTreeMap::new());
        assert_eq!(cmd.component_type(), "*");
        assert_eq!(cmd.monkey_id(), "*");
        assert_eq!(cmd.action(), "*");
        assert_eq!(cmd.raw(), "* * *");
    }

    #[test]
    fn test_new_strips_whitespace_and_quotes() {
        let cmd = Command::new(" But ton ", "\"my id\"", "Ta p", vec![], BTreeMap::new());
        assert_eq!(cmd.component_type(), "Button");
        assert_eq!(cmd.monkey_id(), "my id");
        assert_eq!(cmd.action(), "Tap");
        assert_eq!(cmd.to_command_string(), "Button \"my id\" Tap");
    }

    #[test]
    fn test_command_name_is_lowercase() {
        let cmd = Command::new("Vars", "*", "Define", vec![], BTreeMap::new());
        assert_eq!(cmd.command_name(), "vars.define");
    }

    #[test]
    fn test_flag_modifiers() {
        let cmd = Command::new(
            "Button",
            "OK",
            "Tap",
            vec![],
            mods(&[("ignore", "TRUE"), ("shouldfail", "true"), ("screenshotonerror", "False")]),
        );
        assert!(cmd.is_ignored());
        assert!(cmd.should_fail());
        assert!(!cmd.is_screenshot_on_error());

        let plain = Command::new("Button", "OK", "Tap", vec![], BTreeMap::new());
        assert!(!plain.is_ignored());
        assert!(!plain.should_fail());
        assert!(plain.is_screenshot_on_error());
    }

    #[test]
    fn test_int_modifier_strips_non_digits() {
        let cmd = Command::new(
            "Button",
            "OK",
            "Tap",
            vec![],
            mods(&[("timeout", "1,500ms"), ("thinktime", "abc")]),
        );
        assert_eq!(cmd.int_modifier("timeout"), Some(1500));
        assert_eq!(cmd.int_modifier("thinktime"), None);
        assert_eq!(cmd.int_modifier("retrydelay"), None);
    }

    #[test]
    fn test_modifier_like_args_are_quoted() {
        let cmd = Command::new(
            "Input",
            "name",
            "EnterText",
            vec!["%foo=bar".into(), "two words".into()],
            mods(&[("timeout", "100")]),
        );
        assert_eq!(
            cmd.to_command_string(),
            "Input name EnterText \"%foo=bar\" \"two words\" %timeout=100"
        );
    }

    #[test]
    fn test_with_modifier_leaves_original_untouched() {
        let cmd = Command::new("Label", "*", "Verify", vec!["x".into()], BTreeMap::new());
        let changed = cmd.with_modifier("Timeout", Some("5000"));
        assert_eq!(changed.modifier("timeout"), Some("5000"));
        assert_eq!(cmd.modifier("timeout"), None);
        assert_eq!(changed.with_modifier("timeout", None), cmd);
    }

    #[test]
    fn test_equality_ignores_case_of_type_and_action() {
        let a = Command::new("button", "OK", "tap", vec![], BTreeMap::new());
        let b = Command::new("Button", "OK", "TAP", vec![], BTreeMap::new());
        let c = Command::new("Button", "ok", "Tap", vec![], BTreeMap::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_encode_with_timings() {
        let cmd = Command::new(
            "Button",
            "OK",
            "Tap",
            vec!["a".into()],
            mods(&[("screenshotonerror", "false")]),
        );
        let json = cmd.to_json(Some((2000, 0)));
        assert_eq!(json["componentType"], "Button");
        assert_eq!(json["args"], json!(["a"]));
        assert_eq!(json["modifiers"]["timeout"], 2000);
        assert_eq!(json["modifiers"]["thinktime"], 0);
        assert_eq!(json["modifiers"]["screenshotonerror"], "false");
    }

    #[test]
    fn test_json_decode_defaults_and_top_level_modifiers() {
        let cmd = Command::from_json(&json!({
            "action": "Tap",
            "args": ["1", 2],
            "timeout": 300,
            "modifiers": {"ThinkTime": "10"}
        }));
        assert_eq!(cmd.component_type(), "*");
        assert_eq!(cmd.monkey_id(), "*");
        assert_eq!(cmd.args(), &["1".to_string(), "2".to_string()]);
        assert_eq!(cmd.modifier("timeout"), Some("300"));
        assert_eq!(cmd.modifier("thinktime"), Some("10"));
    }

    #[test]
    fn test_validate() {
        let blank = Command::from_tokens("", &[]);
        assert!(blank.is_blank());
        assert_eq!(blank.validate(), CommandValidity::BadComponentType);

        let partial = Command::from_tokens("Button", &["Button".into()]);
        assert_eq!(partial.validate(), CommandValidity::BadMonkeyId);

        let ok = Command::new("Button", "OK", "Tap", vec![], BTreeMap::new());
        assert!(ok.is_valid());
    }
}
