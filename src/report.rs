use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

pub const TEST_TAG: &str = "[TEST]";
pub const LOG_TAG: &str = "[LOG]";
pub const ERROR_TAG: &str = "[ERROR]";
pub const RESULT_TAG: &str = "[RESULT]";
pub const PASS_TAG: &str = "[PASS]";
pub const FAIL_TAG: &str = "[FAIL]";
pub const COMPLETE_TAG: &str = "[COMPLETE]";

/* ============================= RESULTS ============================= */

/// Outcome of one check. Also the JSON shape nodes publish to ConfigMaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub message: String,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: true,
            message: message.into(),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: false,
            message: message.into(),
        }
    }
}

/// All internal check results reported by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub name: String,
    pub results: Vec<CheckResult>,
}

impl NodeResult {
    /// A node passes only when every one of its checks passed.
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.result)
    }

    /// Rebuild a node's results from the tagged log its pod printed. A
    /// passing check's message is its `[RESULT]` lines; otherwise the
    /// message is the last `[LOG]` or `[ERROR]` line before the verdict.
    pub fn from_log(name: &str, log: &str) -> Self {
        let mut results = Vec::new();
        let mut current: Option<String> = None;
        let mut message = String::new();
        let mut reported: Option<String> = None;

        for line in log.lines().map(str::trim_end) {
            if let Some(title) = line.strip_prefix(TEST_TAG) {
                current = Some(title.trim().to_string());
                message.clear();
                reported = None;
            } else if let Some(text) = line.strip_prefix(RESULT_TAG) {
                let text = text.strip_prefix(' ').unwrap_or(text);
                match reported.as_mut() {
                    Some(lines) => {
                        lines.push('\n');
                        lines.push_str(text);
                    }
                    None => reported = Some(text.to_string()),
                }
            } else if let Some(text) = line
                .strip_prefix(ERROR_TAG)
                .or_else(|| line.strip_prefix(LOG_TAG))
            {
                message = text.trim().to_string();
            } else if line == PASS_TAG || line == FAIL_TAG {
                if let Some(check) = current.take() {
                    let text = std::mem::take(&mut message);
                    results.push(if line == PASS_TAG {
                        CheckResult::pass(check, reported.take().unwrap_or(text))
                    } else {
                        CheckResult::fail(check, text)
                    });
                }
            }
        }

        Self {
            name: name.to_string(),
            results,
        }
    }
}

fn verdict_cell(passed: bool) -> Cell {
    if passed {
        Cell::new("PASS").fg(Color::Green)
    } else {
        Cell::new("FAIL").fg(Color::Red)
    }
}

fn header(table: &mut Table) {
    table.set_header(vec![
        Cell::new("Test Name").fg(Color::Cyan),
        Cell::new("Result").fg(Color::Cyan),
        Cell::new("Test Message").fg(Color::Cyan),
    ]);
}

/// Summary table printed at the end of a run.
#[derive(Debug, Default)]
pub struct ResultsTable {
    external: Vec<CheckResult>,
    nodes: Vec<NodeResult>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_check(&mut self, result: CheckResult) {
        self.external.push(result);
    }

    pub fn add_node(&mut self, node: NodeResult) {
        self.nodes.push(node);
    }

    pub fn all_passed(&self) -> bool {
        self.external.iter().all(|r| r.result) && self.nodes.iter().all(NodeResult::passed)
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        header(&mut table);

        for check in &self.external {
            table.add_row(vec![
                Cell::new(&check.name),
                verdict_cell(check.result),
                Cell::new(&check.message),
            ]);
        }

        for node in &self.nodes {
            table.add_row(vec![
                Cell::new(format!("Node: {}", node.name)),
                verdict_cell(node.passed()),
                Cell::new(node_table(node).to_string()),
            ]);
        }

        table
    }

    pub fn render(&self) -> String {
        self.to_table().to_string()
    }
}

fn node_table(node: &NodeResult) -> Table {
    let mut table = Table::new();
    header(&mut table);
    for check in &node.results {
        table.add_row(vec![
            Cell::new(&check.name),
            verdict_cell(check.result),
            Cell::new(&check.message),
        ]);
    }
    table
}

/* ============================= CHECK LOG ============================= */

enum Target {
    Stdout,
    File(BufWriter<File>),
    Memory(Vec<String>),
}

/// Tagged, line-oriented log of check progress.
///
/// Only the stdout target is coloured; files and captured lines stay plain
/// so they can be grepped and compared.
pub struct CheckLog {
    target: Target,
}

impl CheckLog {
    pub fn stdout() -> Self {
        Self {
            target: Target::Stdout,
        }
    }

    /// Replace whatever is at `path` with a fresh log file.
    pub fn to_file(path: &Path) -> Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let file = File::create(path)?;
        Ok(Self {
            target: Target::File(BufWriter::new(file)),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            target: Target::Memory(Vec::new()),
        }
    }

    /// Lines written to an in-memory log; empty for other targets.
    pub fn captured(&self) -> &[String] {
        match &self.target {
            Target::Memory(lines) => lines,
            _ => &[],
        }
    }

    fn colored(&self) -> bool {
        matches!(self.target, Target::Stdout)
    }

    /// Write one raw line.
    pub fn write_line(&mut self, line: &str) {
        let outcome = match &mut self.target {
            Target::Stdout => writeln!(io::stdout(), "{line}"),
            Target::File(writer) => writeln!(writer, "{line}"),
            Target::Memory(lines) => {
                lines.push(line.to_string());
                Ok(())
            }
        };
        if let Err(err) = outcome {
            warn!(error = %err, "check_log_write_failed");
        }
    }

    pub fn title(&mut self, name: &str) {
        let line = format!("{TEST_TAG} {name}");
        let underline = "=".repeat(line.chars().count());
        if self.colored() {
            self.write_line(&line.yellow().bold().to_string());
        } else {
            self.write_line(&line);
        }
        self.write_line(&underline);
    }

    pub fn log(&mut self, message: &str) {
        self.write_line(&format!("{LOG_TAG} {message}"));
    }

    pub fn error(&mut self, message: &str) {
        let line = format!("{ERROR_TAG} {message}");
        if self.colored() {
            self.write_line(&line.red().to_string());
        } else {
            self.write_line(&line);
        }
    }

    pub fn pass(&mut self) {
        if self.colored() {
            self.write_line(&PASS_TAG.green().to_string());
        } else {
            self.write_line(PASS_TAG);
        }
        self.write_line("");
    }

    pub fn fail(&mut self) {
        if self.colored() {
            self.write_line(&FAIL_TAG.red().to_string());
        } else {
            self.write_line(FAIL_TAG);
        }
        self.write_line("");
    }

    pub fn complete(&mut self) {
        self.write_line(COMPLETE_TAG);
    }

    /// Record the runner's verdict for `result`.
    pub fn outcome(&mut self, result: &CheckResult) {
        if result.result {
            for line in result.message.lines() {
                self.write_line(&format!("{RESULT_TAG} {line}"));
            }
            self.pass();
        } else {
            self.error(&result.message);
            self.fail();
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match &mut self.target {
            Target::Stdout => io::stdout().flush()?,
            Target::File(writer) => writer.flush()?,
            Target::Memory(_) => {}
        }
        Ok(())
    }
}

impl Drop for CheckLog {
    fn drop(&mut self) {
        if let Target::File(writer) = &mut self.target {
            let _ = writer.flush();
        }
    }
}

/// True once a node's log has reached the end of its check run.
pub fn is_complete(log: &str) -> bool {
    log.lines().any(|line| line.trim_end() == COMPLETE_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── CheckResult ──

    #[test]
    fn test_check_result_json_field_names() {
        let result = CheckResult::pass("OS Info", "Linux");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["name"], "OS Info");
        assert_eq!(json["result"], true);
        assert_eq!(json["message"], "Linux");
    }

    #[test]
    fn test_check_result_missing_fields_default() {
        let parsed: CheckResult = serde_json::from_str(r#"{"name":"Quay.io"}"#).unwrap();
        assert!(!parsed.result);
        assert!(parsed.message.is_empty());
    }

    #[test]
    fn test_node_passes_only_when_all_checks_pass() {
        let mut node = NodeResult {
            name: "worker-1".to_string(),
            results: vec![CheckResult::pass("a", ""), CheckResult::pass("b", "")],
        };
        assert!(node.passed());

        node.results.push(CheckResult::fail("c", "unreachable"));
        assert!(!node.passed());

        node.results.clear();
        assert!(!node.passed(), "a node without results did not pass");
    }

    #[test]
    fn test_node_result_from_log() {
        let log = "\
[TEST] SaaS Backend
===================
[LOG] requesting https://app.run.ai
[LOG] https://app.run.ai answered with status 200
[PASS]

[TEST] Quay.io
==============
[LOG] requesting https://quay.io
[ERROR] HTTP request failed: timeout
[FAIL]

[COMPLETE]
";
        let node = NodeResult::from_log("worker-1", log);
        assert_eq!(node.results.len(), 2);
        assert_eq!(
            node.results[0],
            CheckResult::pass("SaaS Backend", "https://app.run.ai answered with status 200")
        );
        assert_eq!(
            node.results[1],
            CheckResult::fail("Quay.io", "HTTP request failed: timeout")
        );
        assert!(!node.passed());
    }

    #[test]
    fn test_node_result_from_log_ignores_stray_verdicts() {
        let node = NodeResult::from_log("n", "[PASS]\n[LOG] noise\n");
        assert!(node.results.is_empty());
    }

    // ── ResultsTable ──

    #[test]
    fn test_table_lists_checks_and_nodes() {
        let mut table = ResultsTable::new();
        table.add_check(CheckResult::pass("Cluster Version", "v1.27.3"));
        table.add_check(CheckResult::fail("GPU Nodes", "no GPU nodes were found"));
        table.add_node(NodeResult {
            name: "worker-1".to_string(),
            results: vec![CheckResult::pass("Docker Hub", "reachable")],
        });

        let rendered = table.render();
        assert!(rendered.contains("Test Name"));
        assert!(rendered.contains("Test Message"));
        assert!(rendered.contains("Cluster Version"));
        assert!(rendered.contains("no GPU nodes were found"));
        assert!(rendered.contains("Node: worker-1"));
        assert!(rendered.contains("Docker Hub"));
        assert!(rendered.contains("FAIL"));
        assert!(!table.all_passed());
    }

    #[test]
    fn test_all_passed_for_clean_run() {
        let mut table = ResultsTable::new();
        table.add_check(CheckResult::pass("Storage Classes", "standard (default)"));
        table.add_node(NodeResult {
            name: "n1".to_string(),
            results: vec![CheckResult::pass("Quay.io", "")],
        });
        assert!(table.all_passed());
    }

    // ── CheckLog ──

    #[test]
    fn test_memory_log_records_tagged_lines() {
        let mut log = CheckLog::in_memory();
        log.title("Helm Repository");
        log.log("status 200");
        log.outcome(&CheckResult::fail("Helm Repository", "connection refused"));
        log.complete();

        let lines = log.captured();
        assert_eq!(lines[0], "[TEST] Helm Repository");
        assert_eq!(lines[1], "=".repeat("[TEST] Helm Repository".len()));
        assert_eq!(lines[2], "[LOG] status 200");
        assert_eq!(lines[3], "[ERROR] connection refused");
        assert_eq!(lines[4], "[FAIL]");
        assert_eq!(lines.last().unwrap(), "[COMPLETE]");
    }

    #[test]
    fn test_passing_outcome_records_message() {
        let mut log = CheckLog::in_memory();
        log.outcome(&CheckResult::pass("x", "fine"));
        assert_eq!(
            log.captured(),
            &["[RESULT] fine".to_string(), "[PASS]".to_string(), String::new()]
        );
    }

    #[test]
    fn test_from_log_uses_reported_message_over_log_lines() {
        let mut log = CheckLog::in_memory();
        log.title("OS Info");
        log.log("OS info: Linux gpu-1 6.8.0 x86_64");
        log.outcome(&CheckResult::pass("OS Info", "Linux\ngpu-1\n6.8.0"));
        log.title("Backend FQDN Resolve");
        log.outcome(&CheckResult::pass("Backend FQDN Resolve", "skipped: no backend FQDN provided"));

        let node = NodeResult::from_log("gpu-1", &log.captured().join("\n"));
        assert_eq!(node.results[0].message, "Linux\ngpu-1\n6.8.0");
        assert_eq!(node.results[1].message, "skipped: no backend FQDN provided");
    }

    #[test]
    fn test_is_complete_requires_tag_line() {
        assert!(is_complete("[TEST] a\n[PASS]\n[COMPLETE]\n"));
        assert!(!is_complete("[TEST] a\n[PASS]\n"));
        assert!(!is_complete("message mentioning [COMPLETE] inline"));
    }
}
