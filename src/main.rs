//! Bee Bench 入口：加载配置、初始化日志，对场景集跑一批仿真并打印汇总。
//!
//! 用法：`bee-bench [scenarios.json]`，不给文件时运行内置演示场景。

use std::sync::Arc;

use anyhow::Context;
use bee_bench::config::load_config;
use bee_bench::core::{BatchConfig, BatchRunner, ShutdownManager};
use bee_bench::domains::mock::{demo_scenarios, MockFactory, Scenario};
use bee_bench::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(std::env::var("BEE_BENCH_CONFIG").ok().map(Into::into))
        .context("Failed to load config")?;
    cfg.simulation.validate().context("Invalid config")?;
    observability::init(&cfg.log.level);

    let scenarios: Vec<Scenario> = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read scenarios from {path}"))?;
            serde_json::from_str(&raw).context("Invalid scenarios file")?
        }
        None => demo_scenarios(),
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let factory = MockFactory::new(scenarios);
    let tasks = factory.tasks();
    let runner = BatchRunner::new(factory, BatchConfig::from_app_config(&cfg))
        .with_cancellation(shutdown.token());
    let report = runner.run(tasks).await.context("Batch run failed")?;

    for run in &report.results.simulations {
        let reward = run
            .reward_info
            .as_ref()
            .map(|r| format!("{:.2}", r.reward))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} trial={} messages={:<3} reason={:?} reward={}",
            run.task_id,
            run.trial.unwrap_or(0),
            run.messages.len(),
            run.termination_reason,
            reward
        );
    }
    for (task_id, trial, error) in &report.failures {
        println!("{task_id:<20} trial={trial} FAILED: {error}");
    }
    if let Some(avg) = report.results.average_reward() {
        println!("average reward: {avg:.3}");
    }
    if report.cancelled {
        println!("cancelled before all simulations finished");
    }
    Ok(())
}
