use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::runner::{RunReport, ScriptReport, StepResult, StepStatus};

pub const REPORT_FILE: &str = "junit.xml";

fn seconds(ms: u64) -> String {
    (ms as f64 / 1000.0).to_string()
}

/// JUnit XML: one `<testsuite>` per script, one `<testcase>` per step
pub fn generate_junit_xml(report: &RunReport) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let summary = &report.summary;
    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "monkeytalk-run"));
    suites_start.push_attribute(("tests", summary.total_steps.to_string().as_str()));
    suites_start.push_attribute(("failures", summary.failed.to_string().as_str()));
    suites_start.push_attribute(("errors", summary.errored.to_string().as_str()));
    suites_start.push_attribute(("skipped", summary.skipped.to_string().as_str()));
    suites_start.push_attribute(("time", seconds(summary.total_duration_ms).as_str()));
    writer.write_event(Event::Start(suites_start))?;

    for script in &report.scripts {
        write_test_suite(&mut writer, script, report)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_suite<W: std::io::Write>(
    writer: &mut Writer<W>,
    script: &ScriptReport,
    report: &RunReport,
) -> Result<()> {
    let result = &script.result;
    let (_, failed, errored, skipped) = result.counts();

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", script.name.as_str()));
    suite_start.push_attribute(("tests", result.steps.len().to_string().as_str()));
    suite_start.push_attribute(("failures", failed.to_string().as_str()));
    suite_start.push_attribute(("errors", errored.to_string().as_str()));
    suite_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suite_start.push_attribute(("id", report.session_id.as_str()));
    suite_start.push_attribute(("time", seconds(result.duration_ms).as_str()));
    suite_start.push_attribute(("timestamp", report.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    let classname = script
        .path
        .trim_end_matches(".mt")
        .replace(['/', '\\'], ".");
    for step in &result.steps {
        write_test_case(writer, step, &classname)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_test_case<W: std::io::Write>(
    writer: &mut Writer<W>,
    step: &StepResult,
    classname: &str,
) -> Result<()> {
    let name = format!("{}: {}", step.index, step.command);
    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", name.as_str()));
    case_start.push_attribute(("classname", classname));
    case_start.push_attribute(("time", seconds(step.duration_ms.unwrap_or(0)).as_str()));
    writer.write_event(Event::Start(case_start))?;

    let problem = match &step.status {
        StepStatus::Failed { message } => Some(("failure", "VerifyFailure", message)),
        StepStatus::Errored { message } => Some(("error", "ScriptError", message)),
        _ => None,
    };
    if let Some((tag, kind, message)) = problem {
        let mut start = BytesStart::new(tag);
        start.push_attribute(("message", message.as_str()));
        start.push_attribute(("type", kind));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(message)))?;
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
    } else if let StepStatus::Skipped { reason } = &step.status {
        let mut start = BytesStart::new("skipped");
        start.push_attribute(("message", reason.as_str()));
        writer.write_event(Event::Empty(start))?;
    }

    if let Some(debug) = &step.debug {
        writer.write_event(Event::Start(BytesStart::new("system-out")))?;
        writer.write_event(Event::Text(BytesText::new(debug)))?;
        writer.write_event(Event::End(BytesEnd::new("system-out")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Write `junit.xml` into `output_dir`
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let xml = generate_junit_xml(report)?;
    let path = output_dir.join(REPORT_FILE);
    std::fs::write(&path, xml)?;
    println!("    Generated JUnit report: {}", path.display());
    Ok(path)
}
