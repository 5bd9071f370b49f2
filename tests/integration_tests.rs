//! CLI-level smoke tests for `sagacore`, exercising the composition root
//! (`run`/`resume`/`status`/`sweep`) the way a deployment actually invokes
//! the binary, complementing the library-level scenarios in
//! `saga_scenarios.rs`.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn sagacore() -> Command {
    cargo_bin_cmd!("sagacore")
}

fn write_plan(dir: &TempDir, name: &str, steps_json: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let body = format!(r#"{{"id": "p1", "intent_id": "i1", "steps": {steps_json}}}"#);
    fs::write(&path, body).unwrap();
    path
}

mod run_command {
    use super::*;

    #[test]
    fn runs_a_linear_plan_to_completion() {
        let dir = TempDir::new().unwrap();
        let plan_file = write_plan(
            &dir,
            "plan.json",
            r#"[
                {"id": "s0", "step_number": 0, "tool_name": "book_ride", "dependencies": []},
                {"id": "s1", "step_number": 1, "tool_name": "book_hotel", "dependencies": ["s0"]}
            ]"#,
        );

        sagacore()
            .current_dir(dir.path())
            .arg("run")
            .arg(&plan_file)
            .arg("--execution-id")
            .arg("exec-cli-1")
            .assert()
            .success()
            .stdout(predicate::str::contains("completed successfully"));

        sagacore()
            .current_dir(dir.path())
            .arg("status")
            .arg("exec-cli-1")
            .assert()
            .success()
            .stdout(predicate::str::contains("Completed"));
    }

    #[test]
    fn rejects_a_cyclic_plan_before_execution() {
        let dir = TempDir::new().unwrap();
        let plan_file = write_plan(
            &dir,
            "cyclic.json",
            r#"[
                {"id": "s0", "step_number": 0, "tool_name": "a", "dependencies": ["s1"]},
                {"id": "s1", "step_number": 1, "tool_name": "b", "dependencies": ["s0"]}
            ]"#,
        );

        sagacore()
            .current_dir(dir.path())
            .arg("run")
            .arg(&plan_file)
            .assert()
            .failure();
    }
}

mod status_command {
    use super::*;

    #[test]
    fn reports_failure_for_an_unknown_execution() {
        let dir = TempDir::new().unwrap();
        sagacore()
            .current_dir(dir.path())
            .arg("status")
            .arg("no-such-execution")
            .assert()
            .failure();
    }
}

mod sweep_command {
    use super::*;

    #[test]
    fn sweep_on_an_empty_workspace_reports_nothing_stuck() {
        let dir = TempDir::new().unwrap();
        sagacore()
            .current_dir(dir.path())
            .arg("sweep")
            .assert()
            .success()
            .stdout(predicate::str::contains("no stuck executions found"));
    }
}

mod global_flags {
    use super::*;

    #[test]
    fn project_dir_flag_points_at_another_workspace() {
        let dir = TempDir::new().unwrap();
        let other_dir = TempDir::new().unwrap();

        sagacore()
            .current_dir(&other_dir)
            .arg("--project-dir")
            .arg(dir.path())
            .arg("sweep")
            .assert()
            .success();

        assert!(dir.path().join(".sagacore").exists());
    }

    #[test]
    fn json_logs_flag_is_accepted() {
        let dir = TempDir::new().unwrap();
        sagacore()
            .current_dir(dir.path())
            .arg("--json-logs")
            .arg("sweep")
            .assert()
            .success();
    }
}
