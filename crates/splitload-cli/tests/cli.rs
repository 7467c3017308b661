use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use splitload_contracts::{NUMBERING_REPORT_SCHEMA_VERSION, REPLAY_REPORT_SCHEMA_VERSION};

fn create_temp_dir(prefix: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let base = std::env::temp_dir();
    let pid = std::process::id();
    for _ in 0..10_000 {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("{prefix}_{pid}_{n}"));
        if std::fs::create_dir(&path).is_ok() {
            return path;
        }
    }
    panic!("failed to create temp dir under {}", base.display());
}

fn rm_rf(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

fn splitload(args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_splitload"));
    cmd.args(args)
        .env_remove("SPLITLOAD_MANIFEST")
        .env_remove("RUST_LOG");
    cmd
}

fn run(args: &[&str]) -> std::process::Output {
    splitload(args).output().expect("run splitload")
}

fn parse_json_stdout(out: &std::process::Output) -> Value {
    serde_json::from_slice(&out.stdout).expect("parse stdout JSON")
}

fn write_json(path: &Path, v: &Value) {
    std::fs::write(path, serde_json::to_vec_pretty(v).expect("encode json")).expect("write file");
}

fn assert_success(out: &std::process::Output) {
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn fragments(v: &Value) -> Vec<u64> {
    v.as_array()
        .expect("array")
        .iter()
        .map(|f| f.as_u64().expect("fragment number"))
        .collect()
}

fn scenario_ab_script() -> Value {
    serde_json::json!({
        "schema_version": "splitload.script@0.1.0",
        "steps": [
            {"op": "inject", "split_point": 2},
            {"op": "fragment_loaded", "split_point": 2},
            {"op": "inject", "split_point": 3},
            {"op": "inject", "split_point": 1},
            {"op": "leftovers_loaded"}
        ]
    })
}

#[test]
fn numbering_inline_manifest() {
    let out = run(&["numbering", "--num-entries", "4", "--module-name", "shop"]);
    assert_success(&out);
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], NUMBERING_REPORT_SCHEMA_VERSION);
    assert_eq!(v["module_name"], "shop");
    assert_eq!(v["num_entries"], 4);
    assert_eq!(v["fragment_count"], 10);

    let rows = v["rows"].as_array().expect("rows[]");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["split_point"], 2);
    assert_eq!(rows[1]["exclusive"], 2);
    assert_eq!(rows[1]["base"], 6);
    assert_eq!(rows[1]["leftovers_if_base"], 7);
}

#[test]
fn numbering_reads_manifest_from_env() {
    let dir = create_temp_dir("splitload_cli_env");
    let manifest = dir.join("fragments.json");
    write_json(
        &manifest,
        &serde_json::json!({"schema_version": "splitload.manifest@0.1.0", "num_entries": 1}),
    );

    let out = splitload(&["numbering"])
        .env("SPLITLOAD_MANIFEST", &manifest)
        .output()
        .expect("run splitload");
    assert_success(&out);
    let v = parse_json_stdout(&out);
    assert_eq!(v["fragment_count"], 1);
    assert_eq!(v["rows"].as_array().map(Vec::len), Some(0));

    rm_rf(&dir);
}

#[test]
fn missing_manifest_is_a_usage_error() {
    let out = run(&["numbering"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("missing manifest"), "stderr:\n{stderr}");
}

#[test]
fn numbering_rejects_entry_counts_past_u32_fragments() {
    for n in ["1431655766", "4294967295"] {
        let out = run(&["numbering", "--num-entries", n]);
        assert_eq!(out.status.code(), Some(2), "--num-entries {n}");
        assert!(out.stdout.is_empty());
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains("inline manifest"), "stderr:\n{stderr}");
        assert!(
            stderr.contains("invalid fragment manifest: num_entries must be <= 1431655765"),
            "stderr:\n{stderr}"
        );
    }
}

#[test]
fn replay_reports_requests_in_order() {
    let dir = create_temp_dir("splitload_cli_replay");
    let script = dir.join("script.json");
    write_json(&script, &scenario_ab_script());

    let out = run(&[
        "replay",
        "--num-entries",
        "4",
        "--script",
        script.to_str().unwrap(),
    ]);
    assert_success(&out);
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], REPLAY_REPORT_SCHEMA_VERSION);
    assert_eq!(fragments(&v["requests"]), vec![6, 7, 3, 1]);
    assert_eq!(v["final_state"]["state"], "steady");
    assert_eq!(v["final_state"]["base"], 2);
    assert_eq!(v["final_state"]["pending"].as_array().map(Vec::len), Some(0));

    let steps = v["steps"].as_array().expect("steps[]");
    assert_eq!(steps.len(), 5);
    assert_eq!(steps[2]["op"], "inject");
    assert_eq!(fragments(&steps[2]["requests"]), Vec::<u64>::new());
    assert_eq!(fragments(&steps[4]["requests"]), vec![3, 1]);

    let groups: Vec<&str> = v["events"]
        .as_array()
        .expect("events[]")
        .iter()
        .map(|e| e["evt_group"].as_str().expect("evt_group"))
        .collect();
    assert_eq!(
        groups,
        vec![
            "download2",
            "download2",
            "leftoversDownload",
            "leftoversDownload",
            "download3",
            "download1"
        ]
    );

    rm_rf(&dir);
}

#[test]
fn replay_writes_report_file_and_streams_events() {
    let dir = create_temp_dir("splitload_cli_out");
    let manifest = dir.join("fragments.json");
    write_json(
        &manifest,
        &serde_json::json!({
            "schema_version": "splitload.manifest@0.1.0",
            "num_entries": 4,
            "module_name": "hello"
        }),
    );
    let script = dir.join("script.json");
    write_json(&script, &scenario_ab_script());
    let report_path = dir.join("reports").join("replay.json");

    let out = run(&[
        "replay",
        "--manifest",
        manifest.to_str().unwrap(),
        "--script",
        script.to_str().unwrap(),
        "--events",
        "jsonl",
        "--out",
        report_path.to_str().unwrap(),
    ]);
    assert_success(&out);
    assert!(out.stdout.is_empty());

    let report: Value =
        serde_json::from_slice(&std::fs::read(&report_path).expect("read report"))
            .expect("parse report");
    assert_eq!(report["module_name"], "hello");

    let stderr = String::from_utf8_lossy(&out.stderr);
    let streamed: Vec<Value> = stderr
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| serde_json::from_str(l).expect("event line"))
        .collect();
    assert_eq!(streamed.len(), 6);
    assert_eq!(streamed[0]["module_name"], "hello");
    assert_eq!(streamed[0]["sub_system"], "runAsync");
    assert_eq!(streamed[0]["phase"], "begin");
    assert_eq!(streamed[0]["fragment"], 6);

    rm_rf(&dir);
}

#[test]
fn replay_failure_and_reset_are_reported() {
    let dir = create_temp_dir("splitload_cli_fail");
    let script = dir.join("script.json");
    write_json(
        &script,
        &serde_json::json!({
            "schema_version": "splitload.script@0.1.0",
            "steps": [
                {"op": "inject", "split_point": 2},
                {"op": "inject", "split_point": 1},
                {"op": "fragment_failed", "fragment": 6, "reason": "terminated"},
                {"op": "reset_on_failure"},
                {"op": "inject", "split_point": 1}
            ]
        }),
    );

    let out = run(&[
        "replay",
        "--num-entries",
        "4",
        "--script",
        script.to_str().unwrap(),
    ]);
    assert_success(&out);
    let v = parse_json_stdout(&out);

    let failure = &v["steps"][2]["failure"];
    assert_eq!(failure["error"]["fragment"], 6);
    assert_eq!(failure["error"]["reason"], "terminated");
    assert_eq!(failure["kind"]["kind"], "base");
    assert_eq!(failure["stalled"], true);
    assert_eq!(fragments(&failure["affected"]), vec![2, 1]);

    assert_eq!(fragments(&v["steps"][3]["abandoned"]), vec![1]);
    assert_eq!(fragments(&v["requests"]), vec![6, 4]);
    assert_eq!(v["final_state"]["state"], "base-loading");

    rm_rf(&dir);
}

#[test]
fn replay_rejects_unknown_split_point() {
    let dir = create_temp_dir("splitload_cli_bad");
    let script = dir.join("script.json");
    write_json(
        &script,
        &serde_json::json!({
            "schema_version": "splitload.script@0.1.0",
            "steps": [{"op": "inject", "split_point": 4}]
        }),
    );

    let out = run(&[
        "replay",
        "--num-entries",
        "4",
        "--script",
        script.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("replay step 0 (inject)"), "stderr:\n{stderr}");
    assert!(stderr.contains("split point 4 is not in 1..4"), "stderr:\n{stderr}");

    rm_rf(&dir);
}

fn repo_root() -> PathBuf {
    let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

#[test]
fn demo_script_replays() {
    let root = repo_root();
    let manifest = root.join("demos/fragments.json");
    let script = root.join("demos/early-requests.json");
    assert!(manifest.is_file(), "missing {}", manifest.display());
    assert!(script.is_file(), "missing {}", script.display());

    let out = run(&[
        "replay",
        "--manifest",
        manifest.to_str().unwrap(),
        "--script",
        script.to_str().unwrap(),
    ]);
    assert_success(&out);
    let v = parse_json_stdout(&out);
    assert_eq!(v["module_name"], "demo");
    assert_eq!(fragments(&v["requests"]), vec![6, 7, 3, 1, 1]);

    let failure = &v["steps"][6]["failure"];
    assert_eq!(failure["kind"]["kind"], "exclusive");
    assert_eq!(failure["stalled"], false);
    assert_eq!(fragments(&failure["affected"]), vec![1]);
    assert_eq!(v["final_state"]["state"], "steady");
}
