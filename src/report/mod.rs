pub mod json;
pub mod junit;

use anyhow::{Context, Result};
use std::path::Path;

use crate::runner::RunReport;

/// Write `test-results.json` and `junit.xml` into `output_dir`
pub fn write_reports(report: &RunReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    json::write_report(report, output_dir)?;
    junit::write_report(report, output_dir)?;
    Ok(())
}
