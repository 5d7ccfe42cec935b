mod common;

use std::fs;

use common::make_results_config_map;
use preinstall_diagnostics::checks::{CheckResult, InternalCheck, conclude};
use preinstall_diagnostics::cluster::node_result_from_config_map;
use preinstall_diagnostics::error::DiagnosticsError;
use preinstall_diagnostics::report::{CheckLog, NodeResult, ResultsTable, is_complete};

// ══════════════════════════════════════════════════════════════════
// Report integration tests (no cluster required)
//
// Node check log → published payload or pod log → node rows →
// final results table, plus the file target of the check log.
// ══════════════════════════════════════════════════════════════════

/// What a node agent would record for a run where Quay.io is blocked.
fn node_run(log: &mut CheckLog) -> Vec<CheckResult> {
    InternalCheck::ALL
        .iter()
        .map(|check| {
            log.title(check.name());
            let outcome = if *check == InternalCheck::QuayIo {
                Err(DiagnosticsError::check("https://quay.io is not reachable, got status code 502"))
            } else {
                Ok(format!("{} ok", check.name()))
            };
            conclude(check.name(), outcome, log)
        })
        .collect()
}

#[test]
fn test_job_mode_payload_to_table_row() {
    let mut log = CheckLog::in_memory();
    let results = node_run(&mut log);

    let cm = make_results_config_map("gpu-1", &results);
    let node = node_result_from_config_map("gpu-1", Some(&cm));
    assert_eq!(node.results, results);
    assert!(!node.passed());

    let mut table = ResultsTable::new();
    table.add_check(CheckResult::pass("Cluster Version", "v1.28.2"));
    table.add_node(node);
    table.add_node(node_result_from_config_map("gpu-2", None));

    let rendered = table.render();
    assert!(rendered.contains("Node: gpu-1"));
    assert!(rendered.contains("Node: gpu-2"));
    assert!(rendered.contains("no results were published by node gpu-2"));
    assert!(!table.all_passed());
}

#[test]
fn test_daemonset_mode_log_to_table_row() {
    let mut log = CheckLog::in_memory();
    let results = node_run(&mut log);
    log.complete();

    let pod_log = log.captured().join("\n");
    assert!(is_complete(&pod_log));

    let node = NodeResult::from_log("cpu-1", &pod_log);
    assert_eq!(node.results.len(), InternalCheck::ALL.len());
    assert_eq!(node.results, results, "same rows as a published payload");

    let quay = node.results.iter().find(|r| r.name == "Quay.io").unwrap();
    assert!(!quay.result);
    assert_eq!(quay.message, "https://quay.io is not reachable, got status code 502");
}

#[test]
fn test_file_log_replaces_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("diagnostics.log");
    fs::write(&path, "stale content from an earlier run\n").unwrap();

    {
        let mut log = CheckLog::to_file(&path).unwrap();
        log.title("Storage Classes");
        log.log("StorageClass: standard (default)");
        log.pass();
        log.flush().unwrap();
    }

    let written = fs::read_to_string(&path).unwrap();
    assert!(!written.contains("stale content"));
    assert!(written.starts_with("[TEST] Storage Classes\n"));
    assert!(written.contains("[LOG] StorageClass: standard (default)\n"));
    assert!(written.contains("[PASS]\n"));
    assert!(!written.contains('\u{1b}'), "file output is not coloured");
}

#[test]
fn test_file_log_creates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.log");

    let mut log = CheckLog::to_file(&path).unwrap();
    log.complete();
    drop(log);

    assert_eq!(fs::read_to_string(&path).unwrap(), "[COMPLETE]\n");
}
