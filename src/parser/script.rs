//! Script text tokenizer and line parser.

use regex::Regex;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::OnceLock;

use super::types::{Command, COMMENT_PREFIX};

/// Stand-in for `\"` while scanning, so escaped quotes are not treated as delimiters.
pub(crate) const QUOTE_PLACEHOLDER: &str = "\u{21D0}\u{21D1}\u{21D2}\u{21D3}\u{21D5}\u{21D4}\u{21DD}\u{21DC}";

const ESCAPED_QUOTE: &str = "\\\"";

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r#"[^\s"=]+="[^"]*"|[^\s"]+|"[^"]*""#).expect("token pattern is valid")
    })
}

/// Split one script line into raw tokens.
///
/// A comment line is returned whole as a single token. Quoted tokens keep
/// their quotes; they are removed when the token is imported into a Command.
pub fn tokenize(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    if line.starts_with(COMMENT_PREFIX) {
        return vec![line.to_string()];
    }

    let protected = line.replace(ESCAPED_QUOTE, QUOTE_PLACEHOLDER);
    token_regex()
        .find_iter(&protected)
        .map(|m| m.as_str().replace(QUOTE_PLACEHOLDER, ESCAPED_QUOTE))
        .collect()
}

/// Parse one line of script text. Never fails: malformed text yields a
/// best-effort Command.
pub fn parse_line(line: &str) -> Command {
    Command::from_tokens(line, &tokenize(line))
}

/// Parse script text with the usual defaults: comments kept, blank lines dropped.
pub fn parse(text: &str) -> Vec<Command> {
    parse_script(text, false, true)
}

/// Parse script text into one Command per line.
pub fn parse_script(text: &str, ignore_comments: bool, ignore_blanks: bool) -> Vec<Command> {
    text.lines()
        .map(str::trim)
        .filter(|line| !(ignore_blanks && line.is_empty()))
        .filter(|line| !(ignore_comments && line.starts_with(COMMENT_PREFIX)))
        .map(parse_line)
        .collect()
}

/// Parse a script file.
///
/// Returns `None` when the file does not exist and an empty list when it
/// exists but cannot be read.
pub fn parse_script_file(
    path: &Path,
    ignore_comments: bool,
    ignore_blanks: bool,
) -> Option<Vec<Command>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(parse_script(&text, ignore_comments, ignore_blanks)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            log::warn!("unable to read script {}: {}", path.display(), e);
            Some(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_quoted_and_bare() {
        assert_eq!(
            tokenize(r#"  Input username EnterText "Bo Bo"  "#),
            vec!["Input", "username", "EnterText", "\"Bo Bo\""]
        );
    }

    #[test]
    fn test_tokenize_quoted_pair_is_one_token() {
        assert_eq!(
            tokenize(r#"Vars * Define first="Joe Bob" last"#),
            vec!["Vars", "*", "Define", "first=\"Joe Bob\"", "last"]
        );
    }

    #[test]
    fn test_tokenize_comment_is_single_token() {
        assert_eq!(tokenize("  # Button OK Tap  "), vec!["# Button OK Tap"]);
    }

    #[test]
    fn test_tokenize_escaped_quotes() {
        let tokens = tokenize(r#"Input name EnterText "say \"hi\" now""#);
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[3], r#""say \"hi\" now""#);
    }

    #[test]
    fn test_parse_line_quoted_arg() {
        let cmd = parse_line(r#"Input username EnterText "Bo Bo""#);
        assert_eq!(cmd.component_type(), "Input");
        assert_eq!(cmd.monkey_id(), "username");
        assert_eq!(cmd.action(), "EnterText");
        assert_eq!(cmd.args(), &["Bo Bo".to_string()]);
    }

    #[test]
    fn test_parse_line_modifiers() {
        let cmd = parse_line("Button FOO Tap %thinktime=123 %timeout=456");
        assert_eq!(cmd.component_type(), "Button");
        assert_eq!(cmd.monkey_id(), "FOO");
        assert_eq!(cmd.action(), "Tap");
        assert!(cmd.args().is_empty());
        assert_eq!(cmd.modifiers().len(), 2);
        assert_eq!(cmd.modifier("thinktime"), Some("123"));
        assert_eq!(cmd.modifier("timeout"), Some("456"));
    }

    #[test]
    fn test_parse_line_quoted_modifier_value() {
        let cmd = parse_line(r#"Button OK Tap %ShouldFail="true" arg"#);
        assert_eq!(cmd.modifier("shouldfail"), Some("true"));
        assert_eq!(cmd.args(), &["arg".to_string()]);
        assert!(cmd.should_fail());
    }

    #[test]
    fn test_parse_line_escaped_quote_kept_in_arg() {
        let cmd = parse_line(r#"Input name EnterText "quoted \"and escaped\" arg""#);
        assert_eq!(cmd.args(), &[r#"quoted \"and escaped\" arg"#.to_string()]);
    }

    #[test]
    fn test_parse_line_comment() {
        let cmd = parse_line("# just a note");
        assert!(cmd.is_comment());
        assert_eq!(cmd.raw(), "# just a note");
        assert_eq!(cmd.component_type(), "");
    }

    #[test]
    fn test_parse_line_is_lenient() {
        let cmd = parse_line("Button");
        assert_eq!(cmd.component_type(), "Button");
        assert_eq!(cmd.action(), "");

        let cmd = parse_line(r#"Button "unterminated"#);
        assert_eq!(cmd.component_type(), "Button");
    }

    #[test]
    fn test_raw_round_trip() {
        for line in [
            "Button OK Tap",
            r#"Input username EnterText "Bo Bo""#,
            "Label * Verify foo %timeout=10",
            "# comment",
        ] {
            let cmd = parse_line(line);
            assert_eq!(parse_line(cmd.raw()).raw(), cmd.raw());
            assert_eq!(cmd.raw(), line);
        }
    }

    #[test]
    fn test_parse_script_flags() {
        let text = "Button A Tap\n\n# note\nButton B Tap\n";
        assert_eq!(parse(text).len(), 3);
        assert_eq!(parse_script(text, true, true).len(), 2);
        let all = parse_script(text, false, false);
        assert_eq!(all.len(), 4);
        assert!(all[1].is_blank());
    }

    #[test]
    fn test_parse_script_file_missing() {
        assert!(parse_script_file(Path::new("/no/such/script.mt"), false, true).is_none());
    }

    #[test]
    fn test_parse_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.mt");
        std::fs::write(&path, "Input name EnterText joe\nButton login Tap\n").unwrap();
        let cmds = parse_script_file(&path, false, true).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].command_name(), "button.tap");
    }
}
