use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::runner::{PlaybackResult, RunReport};

pub const REPORT_FILE: &str = "test-results.json";

/// Pretty JSON of a single script result
pub fn generate(result: &PlaybackResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// Write the whole run as JSON
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(report)?;
    let path = output_dir.join(REPORT_FILE);
    std::fs::write(&path, json)?;
    println!("    Generated JSON report: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{PlaybackStatus, ScriptReport};

    #[test]
    fn test_generate_uses_wire_status_names() {
        let result = PlaybackResult::new(
            PlaybackStatus::Failure,
            Some("Unable to find Button(OK)".into()),
            "login.mt",
        );
        let json = generate(&result).unwrap();
        assert!(json.contains(r#""status": "FAILURE""#));
        assert!(json.contains(r#""scope": "login.mt""#));
        assert!(json.contains(r#""durationMs": 0"#));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = RunReport::new(
            "session-1",
            vec![ScriptReport {
                name: "login.mt".into(),
                path: "scripts/login.mt".into(),
                result: PlaybackResult::new(PlaybackStatus::Ok, None, "login.mt"),
            }],
        );

        let path = write_report(&report, dir.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let parsed: RunReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.session_id, "session-1");
        assert_eq!(parsed.summary.total_scripts, 1);
    }
}
