use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use mppj_bench::api::environment_dto::EnvironmentDto;
use mppj_bench::domain::driver::grid::{ExperimentPoint, experiment_points};
use mppj_bench::domain::driver::interrupt::InterruptKind;
use mppj_bench::domain::driver::phase_driver::{PhaseDriver, RunOutcome};
use mppj_bench::domain::driver::record_writer::RecordWriter;
use mppj_bench::domain::environment::Environment;
use mppj_bench::domain::fabric::execution_host::{ExecutionHost, ImageRef, RunSpec};
use mppj_bench::domain::fabric::fabric::ExecutionFabric;
use mppj_bench::domain::fabric::host_mock::{MockBehavior, MockHost, MockOutcome};
use mppj_bench::domain::oracle::verifier::expected_result;
use mppj_bench::domain::utils::id::RoleId;
use mppj_bench::error::Error;
use mppj_bench::{experiment_plan, load_environment};

const LABEL: &str = "mppj-exp";

fn environment() -> Environment {
    let dto = EnvironmentDto {
        source_hosts: vec!["node-0".to_string(), "node-1".to_string()],
        cleanup_delay_ms: 0,
        helper_startup_delay_ms: 0,
        ..Default::default()
    };
    Environment::try_from(dto).unwrap()
}

fn point() -> ExperimentPoint {
    ExperimentPoint { index: 0, n_sources: 2, set_size: 10, join_size: 8, rep: 0 }
}

fn source_ids() -> Vec<RoleId> {
    vec![RoleId::new("source_0"), RoleId::new("source_1")]
}

/// Receiver output holding exactly the given rows.
fn receiver_csv(rows: &BTreeSet<String>) -> String {
    let mut output = String::from("source_0,source_1\n");
    for row in rows {
        output.push_str(row);
        output.push('\n');
    }
    output
}

/// Units that behave like the protocol binaries: the receiver prints `receiver_stdout`, every
/// protocol unit reports statistics on stderr.
fn protocol(receiver_stdout: String) -> MockBehavior {
    Arc::new(move |spec: &RunSpec| {
        let command = spec.command.join(" ");
        if command.contains("gen-data") {
            return MockOutcome::success();
        }
        let stderr = format!("2024/05/01 10:00:00 Stats: {{\"role\": \"{}\", \"time\": 0.25}}\n", spec.name);
        match spec.name.as_str() {
            "receiver" => MockOutcome { exit_code: 0, stdout: receiver_stdout.clone(), stderr },
            "helper" => MockOutcome { exit_code: 0, stdout: "listening on :40000\n".to_string(), stderr },
            _ => MockOutcome { exit_code: 0, stdout: String::new(), stderr },
        }
    })
}

fn hosts(behavior: MockBehavior) -> Vec<MockHost> {
    ["localhost", "node-0", "node-1"]
        .iter()
        .map(|id| {
            let host = MockHost::with_behavior(*id, behavior.clone());
            host.add_image(ImageRef::new("mppj", "base"));
            host
        })
        .collect()
}

fn driver(hosts: &[MockHost]) -> PhaseDriver {
    let fabric = ExecutionFabric::from_hosts(hosts.iter().map(|host| Arc::new(host.clone()) as Arc<dyn ExecutionHost>).collect());
    PhaseDriver::new(environment(), fabric)
}

fn file_writer(path: &std::path::Path) -> RecordWriter {
    let file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    let sinks: Vec<Box<dyn Write + Send>> = vec![Box::new(file)];
    RecordWriter::new(sinks)
}

#[tokio::test]
async fn test_point_with_correct_output_yields_record() {
    // Setup
    let expected = expected_result(&source_ids(), 10, 8, 0).unwrap();
    let hosts = hosts(protocol(receiver_csv(&expected)));
    let driver = driver(&hosts);

    // Execution
    let record = driver.run_point(&point()).await.unwrap();

    // Verification
    assert_eq!(expected.len(), 8);
    assert_eq!((record.n_sources, record.set_size, record.join_size, record.rep), (2, 10, 8, 0));
    assert_eq!(record.nodes_stats.keys().cloned().collect::<Vec<_>>(), vec!["helper", "receiver", "source_0"]);
    assert_eq!(record.nodes_stats["receiver"], Some(serde_json::json!({"role": "receiver", "time": 0.25})));

    for host in &hosts {
        assert!(host.list_units(LABEL).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_units_get_phase_flags_on_their_hosts() {
    let expected = expected_result(&source_ids(), 10, 8, 0).unwrap();
    let hosts = hosts(protocol(receiver_csv(&expected)));
    driver(&hosts).run_point(&point()).await.unwrap();

    let commands = |host: &MockHost| -> Vec<String> { host.launched().iter().map(|spec| spec.command.join(" ")).collect() };

    assert_eq!(
        commands(&hosts[1]),
        vec![
            "sh -c gen-data -source_ids source_0,source_1 -generate 10 -joinsize 8 -seed 0 >> data.csv -id source_0",
            "sh -c cat data.csv | source -id source_0 -helper_address localhost:40000 -n_cpu 4",
        ]
    );
    assert_eq!(commands(&hosts[2])[1], "sh -c cat data.csv | source -id source_1 -helper_address localhost:40000 -n_cpu 4");
    assert_eq!(
        commands(&hosts[0]),
        vec![
            "sh -c helper -id helper -sources source_0,source_1 -n_rows 10",
            "sh -c receiver -id receiver -helper_address localhost:40000 -sources source_0,source_1",
        ]
    );

    // the protocol phase runs from the committed data checkpoints
    let source_run = &hosts[2].launched()[1];
    assert_eq!(source_run.image, ImageRef::new("mppj", "source_1"));
    assert_ne!(hosts[2].image_id(&ImageRef::new("mppj", "source_1")), hosts[2].image_id(&ImageRef::new("mppj", "base")));
}

#[tokio::test]
async fn test_missing_stats_are_null() {
    let expected = expected_result(&source_ids(), 10, 8, 0).unwrap();
    let stdout = receiver_csv(&expected);
    let behavior: MockBehavior = Arc::new(move |spec: &RunSpec| {
        let stdout = if spec.name == "receiver" { stdout.clone() } else { String::new() };
        MockOutcome { exit_code: 0, stdout, stderr: "Stats: not json\n".to_string() }
    });
    let hosts = hosts(behavior);

    let record = driver(&hosts).run_point(&point()).await.unwrap();

    assert_eq!(record.nodes_stats.len(), 3);
    assert!(record.nodes_stats.values().all(Option::is_none));
    assert!(serde_json::to_string(&record).unwrap().contains("\"helper\":null"));
}

#[tokio::test]
async fn test_one_wrong_row_is_mismatch_without_record() {
    // Setup
    let expected = expected_result(&source_ids(), 10, 8, 0).unwrap();
    let mut observed = expected.clone();
    let first = observed.iter().next().cloned().unwrap();
    observed.remove(&first);
    observed.insert("val_source_0_1,val_source_1_1".to_string());

    let hosts = hosts(protocol(receiver_csv(&observed)));
    let driver = driver(&hosts);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");

    // Execution
    let direct = driver.run_point(&point()).await;
    let summary = driver.run_grid(&[point()], &mut file_writer(&path)).await.unwrap();

    // Verification
    match direct {
        Err(Error::ResultMismatchError { expected: e, observed: o }) => {
            assert_eq!(e, expected);
            assert_eq!(o, observed);
        }
        other => panic!("expected a mismatch, got {:?}", other),
    }
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.abandoned, vec![1]);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[tokio::test]
async fn test_failing_receiver_abandons_point() {
    let behavior: MockBehavior = Arc::new(|spec: &RunSpec| {
        if spec.name == "receiver" { MockOutcome { exit_code: 2, stdout: String::new(), stderr: "dial tcp: refused".to_string() } } else { MockOutcome::success() }
    });
    let hosts = hosts(behavior);

    match driver(&hosts).run_point(&point()).await {
        Err(Error::UnitRunError { role, status, logs }) => {
            assert_eq!(role, "receiver");
            assert_eq!(status, 2);
            assert!(logs.contains("refused"));
        }
        other => panic!("expected a run error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_source_abandons_point() {
    let expected = expected_result(&source_ids(), 10, 8, 0).unwrap();
    let receiver_stdout = receiver_csv(&expected);
    let behavior: MockBehavior = Arc::new(move |spec: &RunSpec| {
        let command = spec.command.join(" ");
        match spec.name.as_str() {
            "source_1" if command.contains("| source") => MockOutcome::exit(1),
            "receiver" => MockOutcome { exit_code: 0, stdout: receiver_stdout.clone(), stderr: String::new() },
            _ => MockOutcome::success(),
        }
    });
    let hosts = hosts(behavior);

    let result = driver(&hosts).run_point(&point()).await;
    assert!(matches!(result, Err(Error::UnitRunError { ref role, .. }) if role == "source_1"));
}

#[tokio::test]
async fn test_grid_continues_after_abandoned_point() {
    // Setup
    let good = receiver_csv(&expected_result(&source_ids(), 10, 8, 0).unwrap());
    // point 1 (seed 1) receives the output of seed 0 and must fail the check
    let hosts = hosts(protocol(good));
    let driver = driver(&hosts);
    let points = vec![point(), ExperimentPoint { index: 1, n_sources: 2, set_size: 10, join_size: 8, rep: 1 }];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");

    // Execution
    let summary = driver.run_grid(&points, &mut file_writer(&path)).await.unwrap();

    // Verification
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.abandoned, vec![2]);
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\"rep\":0"));
}

#[tokio::test]
async fn test_lost_host_ends_grid() {
    // Setup
    let good = receiver_csv(&expected_result(&source_ids(), 10, 8, 0).unwrap());
    let hosts = hosts(protocol(good));
    // node-0 serves the generator and the source of the first point, then drops out
    hosts[1].go_down_after_runs(2);
    let driver = driver(&hosts);
    let points: Vec<ExperimentPoint> =
        (0..3).map(|index| ExperimentPoint { index, n_sources: 2, set_size: 10, join_size: 8, rep: index }).collect();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");

    // Execution
    let result = driver.run_grid(&points, &mut file_writer(&path)).await;

    // Verification
    match result {
        Err(Error::ConnectionError { host, .. }) => assert_eq!(host, "node-0"),
        other => panic!("expected a connection error, got {:?}", other),
    }
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\"rep\":0"));
}

#[tokio::test]
async fn test_too_large_join_size_is_point_scoped() {
    let hosts = hosts(protocol(String::new()));
    let driver = driver(&hosts);
    let dir = tempfile::tempdir().unwrap();

    let bad = ExperimentPoint { index: 0, n_sources: 2, set_size: 10, join_size: 10, rep: 0 };
    let summary = driver.run_grid(&[bad], &mut file_writer(&dir.path().join("out.jsonl"))).await.unwrap();

    assert_eq!(summary.abandoned, vec![1]);
}

#[tokio::test]
async fn test_cleanup_interrupt_removes_labelled_units() {
    // Setup
    let hosts = hosts(protocol(String::new()));
    hosts[1].add_stale_unit("source_0", LABEL);
    hosts[2].add_stale_unit("source_1", LABEL);
    let driver = driver(&hosts);
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(InterruptKind::Cleanup).await.unwrap();

    // Execution
    let outcome = driver.run_until_interrupted(&[point()], &mut file_writer(&dir.path().join("out.jsonl")), &mut rx).await.unwrap();

    // Verification
    assert_eq!(outcome, RunOutcome::Interrupted(InterruptKind::Cleanup));
    for host in &hosts {
        assert!(host.list_units(LABEL).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_immediate_interrupt_leaves_units() {
    let hosts = hosts(protocol(String::new()));
    hosts[1].add_stale_unit("source_0", LABEL);
    let driver = driver(&hosts);
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(InterruptKind::Immediate).await.unwrap();

    let outcome = driver.run_until_interrupted(&[point()], &mut file_writer(&dir.path().join("out.jsonl")), &mut rx).await.unwrap();

    assert_eq!(outcome, RunOutcome::Interrupted(InterruptKind::Immediate));
    assert_eq!(hosts[1].list_units(LABEL).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_without_interrupt_finishes() {
    let expected = expected_result(&source_ids(), 10, 8, 0).unwrap();
    let hosts = hosts(protocol(receiver_csv(&expected)));
    let driver = driver(&hosts);
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel::<InterruptKind>(1);
    drop(tx);

    let outcome = driver.run_until_interrupted(&[point()], &mut file_writer(&dir.path().join("out.jsonl")), &mut rx).await.unwrap();

    match outcome {
        RunOutcome::Finished(summary) => assert_eq!(summary.completed, 1),
        other => panic!("expected a finished grid, got {:?}", other),
    }
}

#[test]
fn test_plan_resolves_grid_and_resume_point() {
    let env = load_environment(None).unwrap();

    let light = experiment_plan(&env, "light", 0).unwrap();
    assert_eq!(light.len(), 3 * 3 * 2);
    assert_eq!(light[0], ExperimentPoint { index: 0, n_sources: 2, set_size: 1353, join_size: 1082, rep: 0 });

    let resumed = experiment_plan(&env, "light", 5).unwrap();
    assert_eq!(resumed.len(), light.len() - 4);
    assert_eq!(resumed[0], light[4]);

    assert!(matches!(experiment_plan(&env, "heavy", 0), Err(Error::ConfigError(_))));
    assert_eq!(experiment_points(&env.grid("genmpc_comp").unwrap()).unwrap().len(), 9);
}
