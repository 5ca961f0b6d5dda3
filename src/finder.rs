//! Query helpers over a list of Commands.
//!
//! All lookups are case-insensitive and skip commands carrying `%ignore=true`.
//! Missing or empty inputs give `None` / an empty list, never a panic.

use crate::parser::Command;

/// First command whose `componentType.action` equals `name`
pub fn find_command_by_name<'a>(
    commands: Option<&'a [Command]>,
    name: Option<&str>,
) -> Option<&'a Command> {
    find_commands_by_name(commands, name).into_iter().next()
}

/// All commands whose `componentType.action` equals `name`
pub fn find_commands_by_name<'a>(
    commands: Option<&'a [Command]>,
    name: Option<&str>,
) -> Vec<&'a Command> {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return Vec::new();
    };
    let name = name.to_lowercase();
    matching(commands, |cmd| !cmd.is_comment() && cmd.command_name() == name)
}

/// First command with the given componentType
pub fn find_command_by_component_type<'a>(
    commands: Option<&'a [Command]>,
    component_type: Option<&str>,
) -> Option<&'a Command> {
    find_commands_by_component_type(commands, component_type)
        .into_iter()
        .next()
}

/// All commands with the given componentType
pub fn find_commands_by_component_type<'a>(
    commands: Option<&'a [Command]>,
    component_type: Option<&str>,
) -> Vec<&'a Command> {
    let Some(component_type) = component_type.filter(|c| !c.is_empty()) else {
        return Vec::new();
    };
    matching(commands, |cmd| {
        !cmd.is_comment() && cmd.component_type().eq_ignore_ascii_case(component_type)
    })
}

fn matching<'a>(
    commands: Option<&'a [Command]>,
    predicate: impl Fn(&Command) -> bool,
) -> Vec<&'a Command> {
    commands
        .unwrap_or_default()
        .iter()
        .filter(|cmd| !cmd.is_ignored() && predicate(cmd))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn commands() -> Vec<Command> {
        ["foo b a", "bar a b", "baz a b %ignore=true", "foo c a", "foo x y"]
            .iter()
            .map(|l| parse_line(l))
            .collect()
    }

    fn raws(found: &[&Command]) -> Vec<String> {
        found.iter().map(|c| c.raw().to_string()).collect()
    }

    #[test]
    fn test_find_commands_by_component_type() {
        let cmds = commands();
        let found = find_commands_by_component_type(Some(cmds.as_slice()), Some("foo"));
        assert_eq!(raws(&found), vec!["foo b a", "foo c a", "foo x y"]);

        let found = find_commands_by_component_type(Some(cmds.as_slice()), Some("FOO"));
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_ignored_commands_are_skipped() {
        let cmds = commands();
        assert!(find_commands_by_component_type(Some(cmds.as_slice()), Some("baz")).is_empty());
        assert!(find_command_by_component_type(Some(cmds.as_slice()), Some("baz")).is_none());
    }

    #[test]
    fn test_find_command_by_component_type_first() {
        let cmds = commands();
        let found = find_command_by_component_type(Some(cmds.as_slice()), Some("bar")).unwrap();
        assert_eq!(found.raw(), "bar a b");
    }

    #[test]
    fn test_find_by_name() {
        let cmds = commands();
        let found = find_commands_by_name(Some(cmds.as_slice()), Some("Foo.A"));
        assert_eq!(raws(&found), vec!["foo b a", "foo c a"]);
        assert_eq!(
            find_command_by_name(Some(cmds.as_slice()), Some("foo.y")).map(|c| c.raw()),
            Some("foo x y")
        );
        assert!(find_command_by_name(Some(cmds.as_slice()), Some("baz.b")).is_none());
    }

    #[test]
    fn test_missing_inputs() {
        let cmds = commands();
        assert!(find_commands_by_component_type(None, Some("foo")).is_empty());
        assert!(find_commands_by_component_type(Some(&[][..]), Some("foo")).is_empty());
        assert!(find_commands_by_component_type(Some(cmds.as_slice()), None).is_empty());
        assert!(find_commands_by_component_type(Some(cmds.as_slice()), Some("")).is_empty());
        assert!(find_command_by_component_type(None, None).is_none());
        assert!(find_command_by_name(None, Some("foo.a")).is_none());
        assert!(find_commands_by_name(Some(cmds.as_slice()), None).is_empty());
    }
}
