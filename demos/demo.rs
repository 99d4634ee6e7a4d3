//! Minimal main-process demo: a one-shot plus a timed routine.
//!
//! Run with:
//! ```bash
//! cargo run --example demo
//! ```

use std::time::Duration;

use brainvisor::{Brain, Config, ConsoleLogger, LogLevel, Supervisor, TaskBuilder};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = ConsoleLogger::arc(LogLevel::Debug);

    let brain = Brain::new("demo", logger.clone());
    brain.input("ticks", 0u64);

    brain.register(
        TaskBuilder::new("hello", false, true)
            .build_async(|ctx| async move {
                ctx.log("hello from a one-shot", LogLevel::Info);
                Ok(serde_json::json!("hi"))
            })?,
    )?;

    brain.register(
        TaskBuilder::new("tick", false, true)
            .refresh_rate(Duration::from_millis(200))
            .timeout(Duration::from_secs(1))
            .build_async(|ctx| async move {
                let n: u64 = ctx.shared().get("ticks").unwrap_or(0);
                ctx.shared().set("ticks", n + 1);
                Ok(serde_json::json!(n + 1))
            })?,
    )?;

    let sup = Supervisor::new(Config::default(), logger);
    let reports = sup.run(&[&brain]).await?;
    for report in &reports {
        println!("{} -> {:?} {:?}", report.task_name, report.status, report.result);
    }
    Ok(())
}
