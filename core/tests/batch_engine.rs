mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{context, opts, task, Behavior, CollectingSink, ScriptedExecutor};
use weft_core::api::{
    CheckpointCadence, ExecutionEngine, ExecutorError, MemoryCheckpointStore, TaskError,
    TaskStatus,
};

#[tokio::test]
async fn failure_blocks_only_dependents() {
    let exec = Arc::new(ScriptedExecutor::new().on("a", Behavior::Fail("boom")));
    let ctx = context(exec.clone());
    let opts = opts(4);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &[])];
    let result = engine.run_tasks(&tasks).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status_of("a"), Some(TaskStatus::Failed));
    assert_eq!(result.status_of("b"), Some(TaskStatus::Skipped));
    assert_eq!(result.status_of("c"), Some(TaskStatus::Succeeded));
    assert_eq!(
        result.outcomes["b"].error,
        Some(TaskError::BlockedByFailedDependency {
            dependency: "a".into()
        })
    );
    assert_eq!(exec.call_count("b"), 0);
}

#[tokio::test]
async fn blocking_is_transitive() {
    let exec = Arc::new(ScriptedExecutor::new().on("a", Behavior::Fail("boom")));
    let ctx = context(exec.clone());
    let opts = opts(2);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let tasks = vec![task("a", &[]), task("b", &["a"]), task("d", &["b"])];
    let result = engine.run_tasks(&tasks).await.unwrap();

    assert_eq!(result.skipped(), 2);
    assert_eq!(
        result.outcomes["d"].error,
        Some(TaskError::BlockedByFailedDependency {
            dependency: "b".into()
        })
    );
    assert_eq!(exec.called_ids(), vec!["a"]);
}

#[tokio::test]
async fn dependents_still_run_when_blocking_is_off() {
    let exec = Arc::new(ScriptedExecutor::new().on("a", Behavior::Fail("boom")));
    let ctx = context(exec.clone());
    let mut opts = opts(2);
    opts.block_dependents_on_failure = false;
    let engine = ExecutionEngine::new(&ctx, &opts);

    let result = engine
        .run_tasks(&[task("a", &[]), task("b", &["a"])])
        .await
        .unwrap();

    assert_eq!(result.status_of("b"), Some(TaskStatus::Succeeded));
    assert!(!result.success);
}

#[tokio::test]
async fn in_flight_calls_never_exceed_limit() {
    let mut exec = ScriptedExecutor::new();
    let mut tasks = Vec::new();
    for i in 0..12 {
        let id = format!("t{i}");
        exec = exec.on(&id, Behavior::Sleep(Duration::from_millis(20)));
        tasks.push(task(&id, &[]));
    }
    let exec = Arc::new(exec);
    let ctx = context(exec.clone());
    let opts = opts(3);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let result = engine.run_tasks(&tasks).await.unwrap();

    assert!(result.success);
    assert_eq!(result.succeeded(), 12);
    assert!(exec.peak_concurrency() <= 3, "peak was {}", exec.peak_concurrency());
    assert_eq!(engine.limiter().in_flight(), 0);
}

#[tokio::test]
async fn results_land_in_state_and_reach_dependents() {
    let exec = Arc::new(ScriptedExecutor::new().on("a", Behavior::Succeed(json!({ "v": 1 }))));
    let ctx = context(exec.clone());
    let opts = opts(2);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let result = engine
        .run_tasks(&[task("a", &[]), task("b", &["a"])])
        .await
        .unwrap();

    assert_eq!(result.state.get("a"), Some(&json!({ "v": 1 })));
    assert!(result.state.contains_key("b"));
    let b_call = exec.calls().into_iter().find(|c| c.id == "b").unwrap();
    assert_eq!(b_call.dependency_results, vec!["a"]);
    assert_eq!(result.batches, vec![vec!["a".to_string()], vec!["b".to_string()]]);
}

#[tokio::test]
async fn slow_call_times_out() {
    let exec = Arc::new(ScriptedExecutor::new().on("slow", Behavior::Sleep(Duration::from_secs(5))));
    let ctx = context(exec.clone());
    let mut opts = opts(2);
    opts.default_timeout = Some(Duration::from_millis(50));
    let engine = ExecutionEngine::new(&ctx, &opts);

    let result = engine
        .run_tasks(&[task("slow", &[]), task("after", &["slow"])])
        .await
        .unwrap();

    assert_eq!(result.status_of("slow"), Some(TaskStatus::Failed));
    assert_eq!(result.outcomes["slow"].error, Some(TaskError::Timeout { after_ms: 50 }));
    assert_eq!(result.outcomes["slow"].result, None);
    assert_eq!(result.status_of("after"), Some(TaskStatus::Skipped));
}

#[tokio::test]
async fn per_task_retry_budget() {
    let exec = Arc::new(
        ScriptedExecutor::new()
            .on("flaky", Behavior::FailTimes(2))
            .on("stubborn", Behavior::FailTimes(5)),
    );
    let ctx = context(exec.clone());
    let opts = opts(2);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let tasks = vec![
        task("flaky", &[]).with_retry(2),
        task("stubborn", &[]).with_retry(1),
    ];
    let result = engine.run_tasks(&tasks).await.unwrap();

    assert_eq!(result.status_of("flaky"), Some(TaskStatus::Succeeded));
    assert_eq!(result.outcomes["flaky"].attempts, 3);
    assert_eq!(result.status_of("stubborn"), Some(TaskStatus::Failed));
    assert_eq!(result.outcomes["stubborn"].attempts, 2);
    let attempts: Vec<u32> = exec
        .calls()
        .into_iter()
        .filter(|c| c.id == "flaky")
        .map(|c| c.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn structural_errors_run_nothing() {
    let exec = Arc::new(ScriptedExecutor::new());
    let ctx = context(exec.clone());
    let opts = opts(2);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let unknown_route = vec![task("a", &[]), weft_core::api::Task::new("b", "nowhere")];
    let err = engine.run_tasks(&unknown_route).await.unwrap_err();
    assert_eq!(
        err,
        ExecutorError::UnknownRoute {
            task_id: "b".into(),
            route: "nowhere".into()
        }
    );

    let cyclic = vec![task("x", &["y"]), task("y", &["x"])];
    let err = engine.run_tasks(&cyclic).await.unwrap_err();
    assert!(matches!(err, ExecutorError::CyclicDependency { .. }));

    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn cancellation_before_start_runs_nothing_and_checkpoints() {
    let exec = Arc::new(ScriptedExecutor::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(exec.clone()).with_checkpoint_store(store.clone());
    let opts = opts(2);
    let engine = ExecutionEngine::new(&ctx, &opts);
    engine.cancel_token().cancel();

    let result = engine
        .run_tasks(&[task("a", &[]), task("b", &["a"])])
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.not_run(), 2);
    assert!(exec.calls().is_empty());
    assert!(result.last_checkpoint.is_some());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn cancellation_lets_in_flight_work_finish() {
    let exec = Arc::new(ScriptedExecutor::new().on("a", Behavior::Sleep(Duration::from_millis(150))));
    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(exec.clone()).with_checkpoint_store(store.clone());
    let opts = opts(2);
    let engine = ExecutionEngine::new(&ctx, &opts);

    let token = engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let result = engine
        .run_tasks(&[task("a", &[]), task("b", &["a"])])
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.status_of("a"), Some(TaskStatus::Succeeded));
    assert_eq!(result.status_of("b"), Some(TaskStatus::NotRun));
    assert_eq!(exec.called_ids(), vec!["a"]);

    let manager = engine.checkpoints().unwrap();
    let latest = manager.latest(Some(result.run_id.as_str())).await.unwrap().unwrap();
    assert!(latest.completed_task_ids.contains("a"));
    assert_eq!(latest.current_batch_index, 1);
}

#[tokio::test]
async fn checkpoint_cadence_controls_snapshots() {
    let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];

    for (cadence, expected) in [
        (CheckpointCadence::Batch, 3),
        (CheckpointCadence::Never, 0),
        (CheckpointCadence::Tasks { every: 2 }, 1),
    ] {
        let exec = Arc::new(ScriptedExecutor::new());
        let store = Arc::new(MemoryCheckpointStore::new());
        let ctx = context(exec).with_checkpoint_store(store.clone());
        let mut opts = opts(2);
        opts.checkpoint_cadence = cadence;
        let engine = ExecutionEngine::new(&ctx, &opts);

        let result = engine.run_tasks(&tasks).await.unwrap();
        assert!(result.success);
        assert_eq!(store.len().await, expected, "cadence {cadence:?}");
    }
}

#[tokio::test]
async fn events_follow_run_lifecycle() {
    let exec = Arc::new(ScriptedExecutor::new());
    let sink = Arc::new(CollectingSink::default());
    let ctx = context(exec);
    let mut opts = opts(2);
    opts.checkpoint_cadence = CheckpointCadence::Never;
    let engine = ExecutionEngine::builder(&ctx, &opts).sink(sink.clone()).build();

    engine.run_tasks(&[task("a", &[])]).await.unwrap();

    assert_eq!(
        sink.event_types(),
        vec![
            "run.started",
            "run.plan",
            "batch.started",
            "task.started",
            "task.completed",
            "batch.completed",
            "run.completed",
        ]
    );
}
