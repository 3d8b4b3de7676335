//! End-to-end harness runs over small shell-script suites.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use torture_harness::stage::Command;
use torture_harness::{
    execute, run, AssembleConfig, AssembleStage, CancelSignal, Classification, ExecuteConfig,
    ExecuteStage, HarnessConfig, HarnessError, HarnessRequest, InputSet, RunnerKind,
    RunnerRegistry, Stage, TestUnit, Tester, Tool,
};

const FAILING: [&str; 2] = ["t3.sh", "t7.sh"];

/// Ten scripts `t0.sh`..`t9.sh`; `t3` and `t7` exit 1, the rest exit 0.
fn suite() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..10 {
        let name = format!("t{i}.sh");
        let body = if FAILING.contains(&name.as_str()) {
            "echo failing on purpose\nexit 1\n"
        } else {
            "exit 0\n"
        };
        fs::write(dir.path().join(name), body).unwrap();
    }
    dir
}

fn manifest(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn sh_tester() -> Tester {
    let stage = ExecuteStage::new(
        "execute",
        ExecuteConfig::new("/bin/sh", RunnerKind::Direct),
        &RunnerRegistry::with_builtins(),
    )
    .unwrap();
    let config = HarnessConfig {
        workers: Some(4),
        unit_timeout_secs: 30,
        ..HarnessConfig::default()
    };
    Tester::new(Arc::new(stage)).with_config(config).quiet()
}

fn glob(dir: &Path) -> InputSet {
    InputSet::Glob(format!("{}/*.sh", dir.display()))
}

#[tokio::test]
async fn test_manifest_covers_every_failure() {
    let suite = suite();
    let fails = manifest(suite.path(), "fails.txt", "# known\nt3.sh\nt7.sh\n");
    let request = HarnessRequest::new(glob(suite.path())).fails(fails);

    let report = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(report.unexpected_count(), 0);
    assert_eq!(report.count(Classification::ExpectedPass), 8);
    assert_eq!(report.count(Classification::ExpectedFail), 2);
    assert_eq!(report.total_inputs, 10);
    assert_eq!(report.accounted(), 10);
}

#[tokio::test]
async fn test_unlisted_failure_is_unexpected() {
    let suite = suite();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh\n");
    let request = HarnessRequest::new(glob(suite.path())).fails(fails);

    let report = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(report.unexpected_count(), 1);
    assert_eq!(report.unexpected[0].name, "t7.sh");
    assert_eq!(report.unexpected[0].classification, Classification::UnexpectedFail);
    assert!(report.unexpected[0].output.contains("failing on purpose"));
    assert!(report.unexpected[0].command_line.contains("t7.sh"));
}

#[tokio::test]
async fn test_stale_manifest_entry_is_unexpected_pass() {
    let suite = suite();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh\nt5.sh\nt7.sh\n");
    let request = HarnessRequest::new(glob(suite.path())).fails(fails);

    let report = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(report.unexpected_count(), 1);
    assert_eq!(report.unexpected[0].name, "t5.sh");
    assert_eq!(report.unexpected[0].classification, Classification::UnexpectedPass);
}

#[tokio::test]
async fn test_qualifiers_must_match_run_attributes() {
    let suite = suite();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh O0\nt7.sh O0 # only at -O0\n");

    let o0 = HarnessRequest::new(glob(suite.path()))
        .fails(&fails)
        .attributes(["O0"]);
    let report = execute(&sh_tester(), &o0).await.unwrap();
    assert_eq!(report.count(Classification::ExpectedPass), 8);
    assert_eq!(report.count(Classification::ExpectedFail), 2);
    assert_eq!(report.unexpected_count(), 0);

    let o2 = HarnessRequest::new(glob(suite.path()))
        .fails(&fails)
        .attributes(["O2"]);
    let report = execute(&sh_tester(), &o2).await.unwrap();
    assert_eq!(report.count(Classification::UnexpectedFail), 2);
    assert_eq!(report.unexpected_count(), 2);
    assert_eq!(run(&sh_tester(), &o2).await.unwrap(), 2);
}

#[tokio::test]
async fn test_manifests_are_unioned() {
    let suite = suite();
    let first = manifest(suite.path(), "a.txt", "t3.sh\n");
    let second = manifest(suite.path(), "b.txt", "t7.sh\n");
    let request = HarnessRequest::new(glob(suite.path()))
        .fails(first)
        .fails(second);
    assert_eq!(run(&sh_tester(), &request).await.unwrap(), 0);
}

#[tokio::test]
async fn test_excluded_units_are_never_run() {
    let suite = suite();
    let marker = suite.path().join("ran-t7");
    fs::write(
        suite.path().join("t7.sh"),
        format!("touch {}\nexit 1\n", marker.display()),
    )
    .unwrap();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh\n");
    let exclude = manifest(suite.path(), "exclude.txt", "t7.sh\n");
    let request = HarnessRequest::new(glob(suite.path()))
        .fails(fails)
        .exclude(exclude);

    let report = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(report.unexpected_count(), 0);
    assert_eq!(report.count(Classification::Excluded), 1);
    assert_eq!(report.excluded, vec!["t7.sh".to_string()]);
    assert_eq!(report.accounted(), 10);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_wildcard_exclusion() {
    let suite = suite();
    let exclude = manifest(suite.path(), "exclude.txt", "t?.sh\n");
    let request = HarnessRequest::new(glob(suite.path())).exclude(exclude);

    let report = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(report.count(Classification::Excluded), 10);
    assert_eq!(report.unexpected_count(), 0);
}

#[tokio::test]
async fn test_timeout_is_unexpected_even_when_listed() {
    let suite = suite();
    fs::write(suite.path().join("t3.sh"), "sleep 30\n").unwrap();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh\nt7.sh\n");
    let mut tester = sh_tester();
    tester.config.unit_timeout_secs = 1;
    let request = HarnessRequest::new(glob(suite.path())).fails(fails);

    let report = execute(&tester, &request).await.unwrap();
    assert_eq!(report.unexpected_count(), 1);
    assert_eq!(report.unexpected[0].name, "t3.sh");
    assert!(report.unexpected[0].reason.contains("timed out"));
}

#[tokio::test]
async fn test_filter_restricts_inputs() {
    let suite = suite();
    let mut request = HarnessRequest::new(glob(suite.path()));
    request.filter = Some("t7*".to_string());

    let report = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(report.total_inputs, 1);
    assert_eq!(report.unexpected_count(), 1);
}

#[tokio::test]
async fn test_repeat_runs_agree() {
    let suite = suite();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh\nt5.sh\n");
    let request = HarnessRequest::new(glob(suite.path())).fails(fails);

    let first = execute(&sh_tester(), &request).await.unwrap();
    let second = execute(&sh_tester(), &request).await.unwrap();
    assert_eq!(first.counts, second.counts);
    let names = |r: &torture_harness::AggregateReport| {
        r.unexpected.iter().map(|u| u.name.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(names(&first), vec!["t5.sh".to_string(), "t7.sh".to_string()]);
}

#[tokio::test]
async fn test_cancel_before_start_accounts_for_every_unit() {
    let suite = suite();
    let cancel = CancelSignal::new();
    cancel.cancel();
    let tester = sh_tester().with_cancel(cancel);
    let request = HarnessRequest::new(glob(suite.path()));

    let report = execute(&tester, &request).await.unwrap();
    assert_eq!(report.cancelled, 10);
    assert_eq!(report.accounted(), 10);
    assert_eq!(report.unexpected_count(), 0);
}

#[tokio::test]
async fn test_unreadable_manifest_is_setup_error() {
    let suite = suite();
    let request = HarnessRequest::new(glob(suite.path())).fails(suite.path().join("missing.txt"));
    let err = execute(&sh_tester(), &request).await.unwrap_err();
    assert!(matches!(err, HarnessError::ManifestRead { .. }));
}

/// Writes every unit to the same output file and panics on `t5.sh`.
struct SharedOutputStage {
    commands: AtomicUsize,
}

impl Stage for SharedOutputStage {
    fn name(&self) -> &str {
        "shared"
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new("shell", "/bin/sh")]
    }

    fn requires_output(&self) -> bool {
        false
    }

    fn output_path(&self, outdir: &Path, _unit: &TestUnit) -> PathBuf {
        outdir.join("a.out")
    }

    fn command(&self, unit: &TestUnit, _output: Option<&Path>) -> Command {
        self.commands.fetch_add(1, Ordering::SeqCst);
        if unit.name() == "t5.sh" {
            panic!("cannot build a command for {}", unit.name());
        }
        Command::new("/bin/sh").arg(unit.path())
    }
}

#[tokio::test]
async fn test_output_collision_rejected_before_dispatch() {
    let suite = suite();
    let out = tempfile::tempdir().unwrap();
    let stage = Arc::new(SharedOutputStage {
        commands: AtomicUsize::new(0),
    });
    let tester = Tester::new(stage.clone()).with_outdir(out.path()).quiet();
    let request = HarnessRequest::new(glob(suite.path()));

    let err = execute(&tester, &request).await.unwrap_err();
    assert!(matches!(err, HarnessError::OutputCollision { .. }));
    assert_eq!(stage.commands.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_crashing_unit_is_reported_not_lost() {
    let suite = suite();
    let stage = Arc::new(SharedOutputStage {
        commands: AtomicUsize::new(0),
    });
    // No output directory, so no collision check.
    let tester = Tester::new(stage).quiet();
    let fails = manifest(suite.path(), "fails.txt", "t3.sh\nt7.sh\n");
    let request = HarnessRequest::new(glob(suite.path())).fails(fails);

    let report = execute(&tester, &request).await.unwrap();
    assert_eq!(report.accounted(), 10);
    assert_eq!(report.unexpected_count(), 1);
    assert_eq!(report.unexpected[0].name, "t5.sh");
    assert!(report.unexpected[0].reason.contains("crashed"));
}

#[tokio::test]
async fn test_in_place_assembler_sharing_a_stem_is_rejected() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.wast"), "WAST\n").unwrap();
    fs::write(src.path().join("a.s"), "ASM\n").unwrap();
    let mut cfg = AssembleConfig::new("/bin/sh");
    cfg.writes_in_place = true;
    let tester = Tester::new(Arc::new(AssembleStage::new("assemble", cfg)))
        .with_outdir(out.path())
        .quiet();
    let request = HarnessRequest::new(InputSet::Glob(format!("{}/a.*", src.path().display())));

    let err = execute(&tester, &request).await.unwrap_err();
    match err {
        HarnessError::OutputCollision { output, .. } => {
            assert_eq!(output, out.path().join("a.wasm"));
        }
        other => panic!("expected OutputCollision, got {:?}", other),
    }
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_non_executable_runner_is_setup_error() {
    use std::os::unix::fs::PermissionsExt;

    let suite = suite();
    let runner = suite.path().join("runner");
    fs::write(&runner, "#!/bin/sh\nexec /bin/sh \"$@\"\n").unwrap();
    fs::set_permissions(&runner, fs::Permissions::from_mode(0o644)).unwrap();
    let stage = ExecuteStage::new(
        "execute",
        ExecuteConfig::new(&runner, RunnerKind::Direct),
        &RunnerRegistry::with_builtins(),
    )
    .unwrap();
    let tester = Tester::new(Arc::new(stage)).quiet();

    let err = execute(&tester, &HarnessRequest::new(glob(suite.path())))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::ToolNotExecutable { .. }));
}
