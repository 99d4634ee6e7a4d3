//! Cross-process demo: a child-process routine and a main-process watcher
//! incrementing and observing the same shared attribute.
//!
//! The child process is this very binary, re-executed by the runtime; the
//! `child_brain_name` check at the top of `main` routes it into the worker
//! loop. Both processes build the Brain identically.
//!
//! Run with:
//! ```bash
//! cargo run --example cross_process
//! ```

use std::time::Duration;

use brainvisor::{
    child_brain_name, child_main, Brain, Config, ConsoleLogger, LogLevel, LoggerRef, Supervisor,
    TaskBuilder,
};

fn build_brain(logger: LoggerRef) -> Result<Brain, Box<dyn std::error::Error>> {
    let brain = Brain::new("counter", logger);
    brain.input("x", 0i64);

    // Heavy lifting in the child process.
    brain.register(
        TaskBuilder::new("pump", true, true)
            .refresh_rate(Duration::from_millis(500))
            .timeout(Duration::from_secs(3))
            .build_sync(|ctx| {
                let x: i64 = ctx.shared().get("x").unwrap_or(0);
                ctx.shared().set("x", x + 1);
                Ok(serde_json::json!(x + 1))
            })?,
    )?;

    // Observation in the main process.
    brain.register(
        TaskBuilder::new("watch", false, true)
            .refresh_rate(Duration::from_millis(500))
            .timeout(Duration::from_secs(3))
            .build_async(|ctx| async move {
                let x: i64 = ctx.shared().get("x").unwrap_or(0);
                ctx.log(&format!("x is now {x}"), LogLevel::Info);
                Ok(serde_json::json!(x))
            })?,
    )?;

    Ok(brain)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = ConsoleLogger::arc(LogLevel::Debug);
    let brain = build_brain(logger.clone())?;

    if child_brain_name().is_some() {
        child_main(brain).await?;
        return Ok(());
    }

    let reports = Supervisor::new(Config::default(), logger).run(&[&brain]).await?;
    for report in &reports {
        println!("{} -> {:?}", report.task_name, report.status);
    }
    Ok(())
}
