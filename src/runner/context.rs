use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use super::error::ScriptError;
use crate::parser::Command;

pub const ILLEGAL_VARIABLE_MSG: &str =
    "variables must begin with a letter and contain only letters, numbers, and underscores";

const NO_FILE: &str = "<commands>";

fn variable_name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("name pattern is valid"))
}

fn variable_ref_regex() -> &'static Regex {
    static REF: OnceLock<Regex> = OnceLock::new();
    REF.get_or_init(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").expect("ref pattern is valid"))
}

fn parent_ref_regex() -> &'static Regex {
    static REF: OnceLock<Regex> = OnceLock::new();
    REF.get_or_init(|| Regex::new(r"%\{([A-Za-z0-9]+)\}").expect("ref pattern is valid"))
}

pub fn is_valid_variable(name: &str) -> bool {
    variable_name_regex().is_match(name)
}

/// Variables visible to every scope of a processor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Globals {
    vars: BTreeMap<String, String>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a global. `context` prefixes the error, e.g. "command 'globals.define' has".
    pub fn set(&mut self, name: &str, value: &str, context: Option<&str>) -> Result<(), String> {
        if !is_valid_variable(name) {
            let prefix = context.map(|c| format!("{} ", c)).unwrap_or_default();
            return Err(format!(
                "{}illegal global variable '{}' -- {}",
                prefix, name, ILLEGAL_VARIABLE_MSG
            ));
        }
        self.vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load `name=value` lines (`#` comments allowed). A missing file is not
    /// an error.
    pub fn load(&mut self, path: &Path) -> anyhow::Result<()> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let context = format!("globals file '{}' has", file_name);

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once(['=', ':']) else {
                continue;
            };
            self.set(key.trim(), value.trim(), Some(&context))
                .map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }
}

/// Execution context of one script (or sub-script) run.
///
/// A child scope carries a snapshot of its parent for `%{n}` lookups,
/// hierarchy display and traces.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    filename: Option<String>,
    parent: Option<Box<Scope>>,
    component_type: Option<String>,
    monkey_id: Option<String>,
    action: Option<String>,
    args: Vec<String>,
    variables: BTreeMap<String, String>,
    current_command: Option<Command>,
    current_index: usize,
}

impl Scope {
    pub fn new(filename: Option<&str>) -> Self {
        Self {
            filename: filename.map(str::to_string),
            ..Default::default()
        }
    }

    /// Scope for a sub-script invoked by `command` (the sub-script name is the
    /// command's monkeyId).
    pub fn for_command(command: &Command, parent: &Scope) -> Self {
        Self::for_file(command.monkey_id(), command, parent)
    }

    /// Scope for running `filename` on behalf of `command`
    pub fn for_file(filename: &str, command: &Command, parent: &Scope) -> Self {
        Self {
            filename: Some(filename.to_string()),
            parent: Some(Box::new(parent.clone())),
            component_type: Some(command.component_type().to_string()),
            monkey_id: Some(command.monkey_id().to_string()),
            action: Some(command.action().to_string()),
            args: command.args().to_vec(),
            ..Default::default()
        }
    }

    pub fn with_variables<'a>(
        mut self,
        vars: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> Self {
        for (k, v) in vars {
            self.variables
                .insert(k.to_string(), v.unwrap_or_default().to_string());
        }
        self
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.parent.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Nesting depth; the root scope is 0
    pub fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.depth() + 1)
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }

    pub fn current_command(&self) -> Option<&Command> {
        self.current_command.as_ref()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn set_current(&mut self, command: &Command, index: usize) {
        self.current_command = Some(command.clone());
        self.current_index = index;
    }

    /// File chain from the root, e.g. `suite.mt > login.mt`
    pub fn hierarchy(&self) -> String {
        let name = self.filename.as_deref().unwrap_or(NO_FILE);
        match &self.parent {
            Some(parent) => format!("{} > {}", parent.hierarchy(), name),
            None => name.to_string(),
        }
    }

    /// Stack-trace-like dump, innermost scope first
    pub fn trace(&self) -> String {
        let file = self.filename.as_deref().unwrap_or(NO_FILE);
        let cmd = self
            .current_command
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "<unknown command>".to_string());
        let vars = if self.variables.is_empty() {
            String::new()
        } else {
            let joined = self
                .variables
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            format!(" [{}]", joined)
        };
        let line = format!("  at {}{} ({} : cmd #{})", cmd, vars, file, self.current_index);
        match &self.parent {
            Some(parent) => format!("{}\n{}", line, parent.trace()),
            None => line,
        }
    }

    /// Resolve `%{componentType}`, `%{monkeyId}`, `%{action}`, `%{n}` from
    /// the invoking command and `${name}` from locals (then globals).
    /// A `${name}` with no binding is an error.
    pub fn substitute(&self, command: &Command, globals: &Globals) -> Result<Command, ScriptError> {
        if command.is_comment() || command.is_blank() {
            return Ok(command.clone());
        }

        let mut unresolved: Option<String> = None;
        let mut sub = |text: &str| -> String {
            let text = parent_ref_regex().replace_all(text, |caps: &Captures| {
                self.parent_ref(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            });
            variable_ref_regex()
                .replace_all(&text, |caps: &Captures| {
                    let name = &caps[1];
                    match self.variable(name).or_else(|| globals.get(name)) {
                        Some(value) => value.to_string(),
                        None => {
                            unresolved.get_or_insert_with(|| name.to_string());
                            caps[0].to_string()
                        }
                    }
                })
                .to_string()
        };

        let component_type = sub(command.component_type());
        let monkey_id = sub(command.monkey_id());
        let action = sub(command.action());
        let args: Vec<String> = command.args().iter().map(|a| sub(a)).collect();
        let modifiers = command
            .modifiers()
            .iter()
            .map(|(k, v)| (k.clone(), sub(v)))
            .collect();

        if let Some(name) = unresolved {
            return Err(ScriptError::UnresolvedVariable {
                name,
                command: command.to_string(),
            });
        }
        Ok(Command::new(&component_type, &monkey_id, &action, args, modifiers))
    }

    fn parent_ref(&self, key: &str) -> Option<String> {
        match key {
            "componentType" => self.component_type.clone(),
            "monkeyId" => self.monkey_id.clone(),
            "action" => self.action.clone(),
            n => {
                let i: usize = n.parse().ok()?;
                self.args.get(i.checked_sub(1)?).cloned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    #[test]
    fn test_variable_names() {
        assert!(is_valid_variable("user_1"));
        assert!(!is_valid_variable("1user"));
        assert!(!is_valid_variable("user-name"));
        assert!(!is_valid_variable(""));
    }

    #[test]
    fn test_globals_validation() {
        let mut globals = Globals::new();
        assert!(globals.set("host", "x", None).is_ok());
        let err = globals
            .set("bad name", "x", Some("command 'globals.define' has"))
            .unwrap_err();
        assert_eq!(
            err,
            "command 'globals.define' has illegal global variable 'bad name' -- variables must begin with a letter and contain only letters, numbers, and underscores"
        );
    }

    #[test]
    fn test_globals_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("globals.properties");
        std::fs::write(&path, "# env\nhost = example.com\nuser=bob\n").unwrap();
        let mut globals = Globals::new();
        globals.load(&path).unwrap();
        assert_eq!(globals.get("host"), Some("example.com"));
        assert_eq!(globals.get("user"), Some("bob"));

        assert!(globals.load(&dir.path().join("missing.properties")).is_ok());
    }

    #[test]
    fn test_substitute_variables() {
        let mut globals = Globals::new();
        globals.set("user", "global-user", None).unwrap();
        globals.set("pass", "secret", None).unwrap();

        let mut scope = Scope::new(Some("login.mt"));
        scope.set_variable("user", "local-user");

        let cmd = parse_line(r#"Input ${user} EnterText "${pass}" %timeout=${pass}"#);
        let full = scope.substitute(&cmd, &globals).unwrap();
        assert_eq!(full.monkey_id(), "local-user");
        assert_eq!(full.args(), &["secret".to_string()]);
        assert_eq!(full.modifier("timeout"), Some("secret"));
    }

    #[test]
    fn test_unresolved_variable_is_error() {
        let scope = Scope::new(None);
        let err = scope
            .substitute(&parse_line("Input name EnterText ${missing}"), &Globals::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::UnresolvedVariable { ref name, .. } if name == "missing"));
    }

    #[test]
    fn test_substitute_parent_refs() {
        let root = Scope::new(Some("main.mt"));
        let invoking = parse_line("Login form Submit joe secret");
        let scope = Scope::for_file("login.submit.mt", &invoking, &root);

        let cmd = parse_line("Input %{monkeyId} EnterText %{1} %{2} %{3} %{action}");
        let full = scope.substitute(&cmd, &Globals::new()).unwrap();
        assert_eq!(full.monkey_id(), "form");
        assert_eq!(full.args()[0], "joe");
        assert_eq!(full.args()[1], "secret");
        assert_eq!(full.args()[2], "%{3}");
        assert_eq!(full.args()[3], "Submit");
    }

    #[test]
    fn test_hierarchy_and_depth() {
        let mut root = Scope::new(Some("a.mt"));
        let run_b = parse_line("Script b.mt Run");
        root.set_current(&run_b, 3);
        let child = Scope::for_command(&run_b, &root).with_variables([("x", Some("1"))]);

        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.hierarchy(), "a.mt > b.mt");
        assert_eq!(Scope::new(None).hierarchy(), "<commands>");

        let trace = child.trace();
        assert!(trace.starts_with("  at <unknown command> [x=1] (b.mt : cmd #0)"));
        assert!(trace.contains("  at Script b.mt Run (a.mt : cmd #3)"));
    }

    #[test]
    fn test_comments_pass_through() {
        let cmd = parse_line("# ${not a var}");
        let full = Scope::new(None).substitute(&cmd, &Globals::new()).unwrap();
        assert!(full.is_comment());
    }
}
