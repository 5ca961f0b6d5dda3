//! Files visible to a playback run: scripts, suites, custom commands and data.
//!
//! Lookups are relative to one root directory and case-insensitive on the
//! file name, so `Script login Run` finds `Login.mt`.

use std::path::{Path, PathBuf};

use crate::finder::find_commands_by_name;
use crate::parser::{parse_script_file, Command};

pub const SCRIPT_EXT: &str = ".mt";
pub const SUITE_EXT: &str = ".mts";
pub const DATA_EXT: &str = ".csv";
pub const GLOBALS_FILE: &str = "globals.properties";

#[derive(Debug, Clone)]
pub struct CommandWorld {
    root: PathBuf,
}

impl CommandWorld {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a file name under the root, ignoring case
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        let direct = self.root.join(name);
        if direct.is_file() {
            return Some(direct);
        }
        let wanted = name.to_lowercase();
        self.entries()
            .into_iter()
            .find(|p| file_name(p).to_lowercase() == wanted)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.file(name).is_some()
    }

    /// A script by name, with or without its `.mt` extension. Suites are
    /// never returned here.
    pub fn script(&self, name: &str) -> Option<PathBuf> {
        if has_ext(name, SUITE_EXT) {
            return None;
        }
        self.with_ext(name, SCRIPT_EXT)
    }

    pub fn suite(&self, name: &str) -> Option<PathBuf> {
        self.with_ext(name, SUITE_EXT)
    }

    pub fn data(&self, name: &str) -> Option<PathBuf> {
        self.with_ext(name, DATA_EXT)
    }

    /// `<componentType>.<action>.mt` implementing `command`, if one exists
    pub fn custom_command(&self, command: &Command) -> Option<PathBuf> {
        self.file(&format!("{}{}", command.command_name(), SCRIPT_EXT))
    }

    /// Playable scripts, excluding custom command files
    pub fn scripts(&self) -> Vec<PathBuf> {
        self.listing(|name| has_ext(name, SCRIPT_EXT) && !is_custom_command_name(name))
    }

    pub fn suites(&self) -> Vec<PathBuf> {
        self.listing(|name| has_ext(name, SUITE_EXT))
    }

    pub fn custom_commands(&self) -> Vec<PathBuf> {
        self.listing(|name| has_ext(name, SCRIPT_EXT) && is_custom_command_name(name))
    }

    pub fn data_files(&self) -> Vec<PathBuf> {
        self.listing(|name| has_ext(name, DATA_EXT))
    }

    /// Variable names a script declares with `Vars * Define`
    pub fn script_vars(&self, name: &str) -> Vec<String> {
        let Some(commands) = self.script(name).and_then(|p| parse_script_file(&p, true, true))
        else {
            return Vec::new();
        };
        find_commands_by_name(Some(&commands), Some("vars.define"))
            .into_iter()
            .flat_map(|cmd| cmd.args().iter())
            .map(|arg| arg.split('=').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn globals_file(&self) -> PathBuf {
        self.root.join(GLOBALS_FILE)
    }

    fn with_ext(&self, name: &str, ext: &str) -> Option<PathBuf> {
        if has_ext(name, ext) {
            self.file(name)
        } else {
            self.file(&format!("{}{}", name, ext))
        }
    }

    fn listing(&self, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .entries()
            .into_iter()
            .filter(|p| keep(&file_name(p)))
            .collect();
        files.sort();
        files
    }

    fn entries(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn has_ext(name: &str, ext: &str) -> bool {
    name.to_lowercase().ends_with(ext)
}

/// `comp.action.mt`: two dots before the extension
pub fn is_custom_command_name(name: &str) -> bool {
    let stem = match name.len().checked_sub(SCRIPT_EXT.len()) {
        Some(n) if has_ext(name, SCRIPT_EXT) => name.get(..n).unwrap_or(name),
        _ => name,
    };
    stem.matches('.').count() == 1
}
