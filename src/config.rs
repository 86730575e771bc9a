//! 基准配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_BENCH__*` 覆盖（双下划线表示嵌套，如 `BEE_BENCH__SIMULATION__MAX_STEPS=20`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::{OrchestratorConfig, Result, SimError};

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub simulation: SimulationSection,
    pub output: OutputSection,
    pub log: LogSection,
}

/// [simulation] 段：领域、预算、批量并发与种子
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub domain: String,
    pub max_steps: usize,
    pub max_errors: usize,
    pub num_trials: usize,
    /// 同时运行的仿真数上限
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    pub solo_mode: bool,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            domain: "mock".to_string(),
            max_steps: 100,
            max_errors: 10,
            num_trials: 1,
            max_concurrency: 3,
            seed: Some(300),
            solo_mode: false,
        }
    }
}

impl SimulationSection {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_steps", self.max_steps),
            ("max_errors", self.max_errors),
            ("num_trials", self.num_trials),
            ("max_concurrency", self.max_concurrency),
        ] {
            if value == 0 {
                return Err(SimError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// 单次仿真配置（种子由批量调度按 trial 派生后覆盖）
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_steps: self.max_steps,
            max_errors: self.max_errors,
            seed: self.seed,
            solo_mode: self.solo_mode,
        }
    }
}

/// [output] 段：结果文件；未设置时不落盘
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OutputSection {
    pub save_to: Option<PathBuf>,
}

/// [log] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 加载配置：config/default.toml（若存在）→ 指定文件 → 环境变量
pub fn load_config(config_path: Option<PathBuf>) -> std::result::Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_BENCH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.simulation.domain, "mock");
        assert_eq!(cfg.simulation.max_steps, 100);
        assert_eq!(cfg.simulation.max_errors, 10);
        assert_eq!(cfg.simulation.seed, Some(300));
        assert!(cfg.output.save_to.is_none());
        assert!(cfg.simulation.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[simulation]\nmax_steps = 20\nmax_concurrency = 2\n\n[output]\nsave_to = \"out/results.json\""
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.simulation.max_steps, 20);
        assert_eq!(cfg.simulation.max_concurrency, 2);
        assert_eq!(cfg.simulation.max_errors, 10);
        assert_eq!(cfg.output.save_to, Some(PathBuf::from("out/results.json")));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let section = SimulationSection {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(section.validate(), Err(SimError::InvalidConfig(_))));
    }
}
