//! 批量调度：对 (task, trial) 组合并发运行仿真
//!
//! 每个组合拥有独立的 Environment / Agent / User / Orchestrator，彼此不共享可变状态；
//! Semaphore 限制同时运行的仿真数，唯一的跨实例共享资源是结果文件（由 Mutex 保护）。
//! 取消时丢弃仍在运行的实例，已完成的结果保留。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::AppConfig;
use crate::core::{Orchestrator, OrchestratorConfig, Result, SimError};
use crate::environment::Environment;
use crate::evaluator::evaluate_simulation;
use crate::model::{Results, RunInfo, SimulationRun, Task};
use crate::user::UserSimulator;

/// 为每次仿真构造全新的参与方
pub trait SimulationFactory: Send + Sync + 'static {
    fn environment(&self, solo_mode: bool) -> Result<Environment>;

    fn agent(&self, environment: &Environment, task: &Task) -> Result<Box<dyn Agent>>;

    fn user(&self, environment: &Environment, task: &Task) -> Result<Box<dyn UserSimulator>>;

    fn agent_name(&self) -> String;

    fn user_name(&self) -> String;
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub domain: String,
    pub num_trials: usize,
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    pub orchestrator: OrchestratorConfig,
    /// 设置后每完成一次仿真就写一次，并支持续跑
    pub save_to: Option<PathBuf>,
    pub evaluate: bool,
}

impl BatchConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            domain: cfg.simulation.domain.clone(),
            num_trials: cfg.simulation.num_trials,
            max_concurrency: cfg.simulation.max_concurrency,
            seed: cfg.simulation.seed,
            orchestrator: cfg.simulation.orchestrator_config(),
            save_to: cfg.output.save_to.clone(),
            evaluate: true,
        }
    }
}

/// 一次批量运行的汇总
#[derive(Debug)]
pub struct BatchReport {
    pub results: Results,
    /// (task_id, trial, 错误描述)
    pub failures: Vec<(String, usize, String)>,
    pub cancelled: bool,
}

/// 由基础种子为每个 trial 派生确定性种子
pub fn trial_seeds(seed: Option<u64>, num_trials: usize) -> Vec<Option<u64>> {
    (0..num_trials)
        .map(|trial| {
            seed.map(|base| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&base.to_le_bytes());
                hasher.update(&(trial as u64).to_le_bytes());
                let digest = hasher.finalize();
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&digest.as_bytes()[..8]);
                u64::from_le_bytes(bytes) % 1_000_000
            })
        })
        .collect()
}

pub struct BatchRunner<F: SimulationFactory> {
    factory: Arc<F>,
    config: BatchConfig,
    cancel: CancellationToken,
}

impl<F: SimulationFactory> BatchRunner<F> {
    pub fn new(factory: F, config: BatchConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn run_info(&self) -> RunInfo {
        RunInfo {
            domain: self.config.domain.clone(),
            agent: self.factory.agent_name(),
            user: self.factory.user_name(),
            num_trials: self.config.num_trials,
            max_steps: self.config.orchestrator.max_steps,
            max_errors: self.config.orchestrator.max_errors,
            seed: self.config.seed,
            solo_mode: self.config.orchestrator.solo_mode,
            git_commit: RunInfo::detect_git_commit(),
        }
    }

    pub async fn run(&self, tasks: Vec<Task>) -> Result<BatchReport> {
        if self.config.num_trials == 0 || self.config.max_concurrency == 0 {
            return Err(SimError::InvalidConfig(
                "num_trials and max_concurrency must be positive".into(),
            ));
        }
        self.config.orchestrator.validate()?;

        let results = match &self.config.save_to {
            Some(path) if path.exists() => {
                let existing = Results::load(path)?;
                tracing::info!(
                    path = %path.display(),
                    done = existing.simulations.len(),
                    "resuming from existing results"
                );
                existing
            }
            _ => Results::new(self.run_info(), tasks.clone()),
        };
        let done = results.done_runs();
        let shared = Arc::new(Mutex::new(results));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut set = JoinSet::new();

        for (trial, seed) in trial_seeds(self.config.seed, self.config.num_trials)
            .into_iter()
            .enumerate()
        {
            for task in &tasks {
                if done.contains(&(Some(trial), task.id.clone(), seed)) {
                    tracing::info!(task_id = %task.id, trial, "skipping finished simulation");
                    continue;
                }
                let factory = Arc::clone(&self.factory);
                let semaphore = Arc::clone(&semaphore);
                let shared = Arc::clone(&shared);
                let cancel = self.cancel.clone();
                let config = self.config.clone();
                let task = task.clone();

                set.spawn(async move {
                    let task_id = task.id.clone();
                    let outcome: Result<SimulationRun> = async {
                        if cancel.is_cancelled() {
                            return Err(SimError::Cancelled);
                        }
                        let _permit = tokio::select! {
                            permit = semaphore.acquire_owned() => permit.map_err(|_| SimError::Cancelled)?,
                            _ = cancel.cancelled() => return Err(SimError::Cancelled),
                        };
                        let run = tokio::select! {
                            run = run_single(factory.as_ref(), &task, trial, seed, &config) => run?,
                            _ = cancel.cancelled() => return Err(SimError::Cancelled),
                        };
                        let mut guard = shared.lock().await;
                        guard.simulations.push(run.clone());
                        if let Some(path) = &config.save_to {
                            guard.save(path)?;
                        }
                        Ok(run)
                    }
                    .await;
                    (task_id, trial, outcome)
                });
            }
        }

        let mut failures = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task_id, trial, Ok(run))) => {
                    tracing::info!(
                        task_id = %task_id,
                        trial,
                        reason = ?run.termination_reason,
                        reward = ?run.reward_info.as_ref().map(|r| r.reward),
                        "simulation done"
                    );
                }
                Ok((_, _, Err(SimError::Cancelled))) => cancelled = true,
                Ok((task_id, trial, Err(e))) => {
                    tracing::error!(task_id = %task_id, trial, error = %e, "simulation failed");
                    failures.push((task_id, trial, e.to_string()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "simulation task panicked");
                    failures.push((String::new(), 0, e.to_string()));
                }
            }
        }

        let mut results = {
            let guard = shared.lock().await;
            guard.clone()
        };
        results
            .simulations
            .sort_by(|a, b| (a.trial, &a.task_id).cmp(&(b.trial, &b.task_id)));
        if let Some(path) = &self.config.save_to {
            results.save(path)?;
        }
        Ok(BatchReport {
            results,
            failures,
            cancelled,
        })
    }
}

/// 运行单个 (task, trial)：构造参与方、跑到结束，按需评估
pub async fn run_single<F: SimulationFactory + ?Sized>(
    factory: &F,
    task: &Task,
    trial: usize,
    seed: Option<u64>,
    config: &BatchConfig,
) -> Result<SimulationRun> {
    let solo_mode = config.orchestrator.solo_mode;
    let environment = factory.environment(solo_mode)?;
    let agent = factory.agent(&environment, task)?;
    let user = factory.user(&environment, task)?;
    let orch_config = OrchestratorConfig {
        seed,
        ..config.orchestrator.clone()
    };

    let mut orchestrator =
        Orchestrator::new(agent, user, environment, task.clone(), orch_config).with_trial(trial);
    let mut run = orchestrator.run().await?;

    if config.evaluate {
        let reward = evaluate_simulation(&run, task, solo_mode, || factory.environment(solo_mode)).await?;
        run.reward_info = Some(reward);
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_seeds_are_deterministic_and_distinct() {
        let a = trial_seeds(Some(300), 4);
        let b = trial_seeds(Some(300), 4);
        assert_eq!(a, b);
        let mut unique: Vec<_> = a.iter().flatten().collect();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        assert_ne!(trial_seeds(Some(301), 1), trial_seeds(Some(300), 1));
    }

    #[test]
    fn test_trial_seeds_without_base_seed() {
        assert_eq!(trial_seeds(None, 2), vec![None, None]);
    }
}
