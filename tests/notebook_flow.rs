//! Execute-and-reconcile round trips over on-disk documents

mod common;

use common::{api_with_mock, TestBase};
use rhizome::exec::mock::MockBehavior;
use rhizome::exec::ExecOutput;
use rhizome::{parse, Block, CellId, CellStatus, ExecuteError, RunOptions};
use std::time::Duration;

const CALC: &str = "# Calc\n\nSome prose around the cell.\n\n```python\nprint(2 + 2)\n```\n\nAfter the cell.\n";

fn four() -> ExecOutput {
    ExecOutput {
        stdout: "4\n".into(),
        stderr: String::new(),
        exit_code: 0,
    }
}

#[tokio::test]
async fn first_execution_inserts_one_output_region() {
    let base = TestBase::new(&[("calc.md", CALC)]);
    let (_, api) = api_with_mock(MockBehavior::Scripted(vec![four()]));

    let result = api
        .run_cell(
            "notes",
            &base.root().join("calc.md"),
            &CellId::from("python_0"),
            &RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.stdout, "4\n");
    assert_eq!(result.status, CellStatus::Success);

    let saved = base.read("calc.md");
    let blocks = parse(&saved);
    let regions: Vec<_> = blocks
        .iter()
        .filter_map(|b| match b {
            Block::OutputRegion { cell, text, .. } => Some((cell.as_str(), text.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].0, "python_0");
    assert!(regions[0].1.contains("4"));

    // Everything outside the inserted region is byte-identical.
    assert!(saved.starts_with("# Calc\n\nSome prose around the cell.\n\n```python\nprint(2 + 2)\n```"));
    assert!(saved.ends_with("\n\nAfter the cell.\n"));
}

#[tokio::test]
async fn reexecution_with_identical_output_is_idempotent() {
    let base = TestBase::new(&[("calc.md", CALC)]);
    let (_, api) = api_with_mock(MockBehavior::Scripted(vec![four(), four()]));
    let id = CellId::from("python_0");
    let path = base.root().join("calc.md");

    api.run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();
    let first = base.read("calc.md");

    api.run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(base.read("calc.md"), first);
}

#[tokio::test]
async fn changed_output_replaces_the_region_in_place() {
    let base = TestBase::new(&[("calc.md", CALC)]);
    let (_, api) = api_with_mock(MockBehavior::Scripted(vec![
        four(),
        ExecOutput {
            stdout: "5\n".into(),
            stderr: String::new(),
            exit_code: 0,
        },
    ]));
    let id = CellId::from("python_0");
    let path = base.root().join("calc.md");

    api.run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();
    api.run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();

    let saved = base.read("calc.md");
    assert!(saved.contains("```\n5\n```"));
    assert!(!saved.contains("```\n4\n```"));
    // Still exactly one region.
    let regions = parse(&saved)
        .iter()
        .filter(|b| matches!(b, Block::OutputRegion { .. }))
        .count();
    assert_eq!(regions, 1);
}

#[tokio::test]
async fn cells_in_a_document_run_in_order_on_one_session() {
    let base = TestBase::new(&[(
        "multi.md",
        "```python\nfirst\n```\n\n```python\nsecond\n```\n\n```python\nthird\n```\n",
    )]);
    let (launcher, api) = api_with_mock(MockBehavior::Echo);

    let results = api
        .run_document("notes", &base.root().join("multi.md"), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(launcher.executed(), vec!["first", "second", "third"]);
    // One language, one session name: a single backend serves all three.
    assert_eq!(launcher.launch_count(), 1);
}

#[tokio::test]
async fn timed_out_cell_reports_timeout_and_next_run_gets_a_fresh_session() {
    let base = TestBase::new(&[("slow.md", "```python\nwhile True: pass\n```\n")]);
    let (launcher, api) = api_with_mock(MockBehavior::Delay(Duration::from_secs(60)));
    let id = CellId::from("python_0");
    let path = base.root().join("slow.md");
    let opts = RunOptions::default().with_timeout(Duration::from_millis(30));

    let result = api.run_cell("notes", &path, &id, &opts).await.unwrap();
    assert_eq!(result.status, CellStatus::Timeout);
    // The timeout note is persisted like any other result.
    assert!(base.read("slow.md").contains("*execution timed out*"));

    // Same key, new backend: prior interpreter state is not reused.
    launcher.set_behavior(MockBehavior::Echo);
    let result = api
        .run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status, CellStatus::Success);
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn launch_failure_is_backend_unavailable_and_leaves_the_document_alone() {
    let base = TestBase::new(&[("calc.md", CALC)]);
    let (_, api) = api_with_mock(MockBehavior::LaunchFails);

    let err = api
        .run_cell(
            "notes",
            &base.root().join("calc.md"),
            &CellId::from("python_0"),
            &RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::Exec(rhizome::ExecError::BackendUnavailable { .. })
    ));
    assert_eq!(base.read("calc.md"), CALC);
}

#[tokio::test]
async fn sessions_are_isolated_per_name() {
    let base = TestBase::new(&[
        ("a.md", "```python\nin a\n```\n"),
        ("b.md", "```python\nin b\n```\n"),
    ]);
    let (launcher, api) = api_with_mock(MockBehavior::Echo);

    api.run_cell(
        "notes",
        &base.root().join("a.md"),
        &CellId::from("python_0"),
        &RunOptions::default().with_session("alpha"),
    )
    .await
    .unwrap();
    api.run_cell(
        "notes",
        &base.root().join("b.md"),
        &CellId::from("python_0"),
        &RunOptions::default().with_session("beta"),
    )
    .await
    .unwrap();

    // Two session names, two backends.
    assert_eq!(launcher.launch_count(), 2);
    assert_eq!(api.list_sessions().len(), 2);
    assert_eq!(api.close_all_sessions(), 2);
}

#[tokio::test]
async fn strip_then_reexecute_round_trips() {
    let base = TestBase::new(&[("calc.md", CALC)]);
    let (_, api) = api_with_mock(MockBehavior::Scripted(vec![four(), four()]));
    let id = CellId::from("python_0");
    let path = base.root().join("calc.md");

    api.run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();
    let with_output = base.read("calc.md");

    api.strip_document(&path).await.unwrap();
    assert_eq!(base.read("calc.md"), CALC);

    api.run_cell("notes", &path, &id, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(base.read("calc.md"), with_output);
}

// Requires python3 and bash on PATH; run with `cargo test -- --ignored`.
#[tokio::test]
#[ignore]
async fn real_bash_cell_end_to_end() {
    use rhizome::{FsStore, GraphEngine, ProcessLauncher, RhizomeApi, SessionManager};
    use std::sync::Arc;

    let base = TestBase::new(&[("shell.md", "```bash\necho hello\n```\n")]);
    let api = RhizomeApi::new(
        Arc::new(GraphEngine::new()),
        Arc::new(SessionManager::new(Arc::new(ProcessLauncher::new()))),
        Arc::new(FsStore::new()),
    );

    let result = api
        .run_cell(
            "notes",
            &base.root().join("shell.md"),
            &CellId::from("bash_0"),
            &RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.status, CellStatus::Success);
    assert!(base.read("shell.md").contains("**Output:**\n```\nhello\n```"));
    api.close_all_sessions();
}
