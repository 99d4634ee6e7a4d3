//! End-to-end scenarios driven through the public API only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use brainvisor::{
    Brain, Config, ConfigError, ExecutionState, LogLevel, Logger, Supervisor, TaskBuilder,
    TaskError,
};

#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn count(&self, level: LogLevel) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }

    fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(_, m)| m.contains(needle))
    }
}

impl Logger for RecordingLogger {
    fn log(&self, message: &str, level: LogLevel) {
        self.lines
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

#[tokio::test]
async fn basic_one_shot_returns_its_value() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger);
    brain
        .register(
            TaskBuilder::new("t", false, true)
                .build_async(|_ctx| async { Ok(json!(42)) })
                .unwrap(),
        )
        .unwrap();

    let tasks = brain.get_tasks();
    assert_eq!(tasks.len(), 1);

    let report = tasks[0].run().await;
    assert_eq!(report.task_name, "t");
    assert_eq!(report.status, ExecutionState::Correctly);
    assert_eq!(report.result, Some(json!(42)));
}

#[tokio::test(start_paused = true)]
async fn timed_routine_ends_with_timeout() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger);
    brain.input("n", 0i64);
    brain
        .register(
            TaskBuilder::new("incr", false, true)
                .refresh_rate(Duration::from_millis(100))
                .timeout(Duration::from_millis(350))
                .build_async(|ctx| async move {
                    let n: i64 = ctx.shared().get("n").unwrap_or(0);
                    ctx.shared().set("n", n + 1);
                    Ok(json!(n + 1))
                })
                .unwrap(),
        )
        .unwrap();

    let started = tokio::time::Instant::now();
    let report = brain.task("incr").unwrap().run().await;

    assert_eq!(report.status, ExecutionState::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(350));
    let n: i64 = brain.shared().get("n").unwrap_or(0);
    assert!((3..=4).contains(&n), "expected 3 or 4 iterations, got {n}");
}

#[tokio::test(start_paused = true)]
async fn routine_keeps_iterating_past_a_fault() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger.clone());
    brain.input("i", 0i64);
    brain
        .register(
            TaskBuilder::new("divide", false, true)
                .refresh_rate(Duration::from_millis(100))
                .timeout(Duration::from_millis(500))
                .build_async(|ctx| async move {
                    let i: i64 = ctx.shared().get("i").unwrap_or(0);
                    ctx.shared().set("i", i + 1);
                    if i == 0 {
                        return Err(TaskError::fail("division by zero"));
                    }
                    Ok(json!(1.0 / i as f64))
                })
                .unwrap(),
        )
        .unwrap();

    let report = brain.task("divide").unwrap().run().await;

    assert_eq!(report.status, ExecutionState::Timeout);
    // The faulting first iteration did not stop the routine.
    let i: i64 = brain.shared().get("i").unwrap_or(0);
    assert!(i >= 5, "expected 5 iterations, got {i}");
    assert_eq!(logger.count(LogLevel::Error), 1);
    assert!(logger.count(LogLevel::Info) >= 4);
}

#[tokio::test]
async fn non_serializable_attribute_stays_local() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger.clone());

    // Tuple map keys have no JSON form, so the probe rejects the value.
    let mut handle = HashMap::new();
    handle.insert((1u8, 2u8), 3i32);
    brain.input("handle", handle.clone());

    assert!(logger.contains("[dynamic_init] cannot serialize attribute [handle]."));
    assert_eq!(logger.count(LogLevel::Warning), 1);

    // Readable in the main process, absent from the shared view.
    assert_eq!(
        brain.local_get::<HashMap<(u8, u8), i32>>("handle"),
        Some(handle)
    );
    assert!(brain.shared().get_value("handle").is_none());
}

#[tokio::test]
async fn registration_rejects_duplicates() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger);
    brain
        .register(
            TaskBuilder::new("t", false, false)
                .build_async(|_ctx| async { Ok(json!(null)) })
                .unwrap(),
        )
        .unwrap();
    let err = brain
        .register(
            TaskBuilder::new("t", false, false)
                .build_async(|_ctx| async { Ok(json!(null)) })
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateTask { .. }));
}

#[tokio::test]
async fn autostart_subset_preserves_declaration_order() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger);
    for (name, on_start) in [("a", true), ("b", false), ("c", true)] {
        brain
            .register(
                TaskBuilder::new(name, false, on_start)
                    .build_async(|_ctx| async { Ok(json!("done")) })
                    .unwrap(),
            )
            .unwrap();
    }

    let tasks = brain.get_tasks();
    let names: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["a", "c"]);

    // Non-autostart tasks are still bound and callable by name.
    let report = brain.task("b").unwrap().run().await;
    assert_eq!(report.status, ExecutionState::Correctly);
    assert_eq!(report.result, Some(json!("done")));
}

#[tokio::test]
async fn shutdown_ends_a_routine_correctly() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger);
    brain
        .register(
            TaskBuilder::new("spin", false, true)
                .refresh_rate(Duration::from_millis(5))
                .build_async(|_ctx| async { Ok(json!(null)) })
                .unwrap(),
        )
        .unwrap();

    let task = brain.task("spin").unwrap();
    let handle = tokio::spawn(async move { task.run().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    brain.shutdown().await;
    let report = handle.await.unwrap();
    assert_eq!(report.status, ExecutionState::Correctly);
}

#[tokio::test]
async fn supervisor_collects_reports_from_all_brains() {
    let logger = RecordingLogger::arc();

    let left = Brain::new("left", logger.clone());
    left.register(
        TaskBuilder::new("one", false, true)
            .build_async(|_ctx| async { Ok(json!(1)) })
            .unwrap(),
    )
    .unwrap();

    let right = Brain::new("right", logger.clone());
    right
        .register(
            TaskBuilder::new("two", false, true)
                .build_async(|_ctx| async { Ok(json!(2)) })
                .unwrap(),
        )
        .unwrap();
    right
        .register(
            TaskBuilder::new("skipped", false, false)
                .build_async(|_ctx| async { Ok(json!(null)) })
                .unwrap(),
        )
        .unwrap();

    let sup = Supervisor::new(Config::default(), logger);
    let mut reports = sup.run(&[&left, &right]).await.unwrap();
    reports.sort_by(|a, b| a.task_name.cmp(&b.task_name));

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].task_name, "one");
    assert_eq!(reports[1].task_name, "two");
    assert!(reports.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn setting_a_shared_attribute_to_itself_is_stable() {
    let logger = RecordingLogger::arc();
    let brain = Brain::new("demo", logger);
    brain.input("x", 5i64);

    let shared = brain.shared();
    assert!(shared.set("x", 5i64));
    assert_eq!(shared.get::<i64>("x"), Some(5));
}
