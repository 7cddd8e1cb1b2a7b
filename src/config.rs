//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `HIVE__EXECUTOR__MAX_ITERATIONS=6`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub executor: ExecutorSection,
    pub critic: CriticSection,
    pub scheduler: SchedulerSection,
    pub recovery: RecoverySection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；有 OPENAI_API_KEY 时默认走 openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// 退避策略（Planner 的 LLM 分解重试）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
}

/// [planner] 段：启发式置信阈值与 LLM 分解重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 启发式结果直接采用的置信阈值
    pub confidence_threshold: f64,
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
    pub backoff_base_ms: u64,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            max_retries: 2,
            backoff: BackoffStrategy::Exponential,
            backoff_base_ms: 500,
        }
    }
}

/// [executor] 段：ReAct 循环边界
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// 单任务最大 ReAct 迭代数
    pub max_iterations: usize,
    /// 单次迭代墙钟超时（毫秒）
    pub iteration_timeout_ms: u64,
    /// THOUGHT 阶段 LLM 调用重试次数
    pub max_retries: u32,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_timeout_ms: 5_000,
            max_retries: 2,
            tool_timeout_secs: 30,
        }
    }
}

/// [critic] 段：校验管线
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CriticSection {
    /// 错误数超过此值直接 ESCALATE
    pub max_errors: usize,
    /// 严格模式：有警告也要求 FIX
    pub strict_mode: bool,
}

impl Default for CriticSection {
    fn default() -> Self {
        Self {
            max_errors: 3,
            strict_mode: false,
        }
    }
}

/// [scheduler] 段：replan 预算与环策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// 单次运行的 replan 总预算
    pub max_replans: u32,
    /// 严格环策略：检测到环即失败（默认宽松丢边）
    pub strict_cycles: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_replans: 1,
            strict_cycles: false,
        }
    }
}

/// [recovery] 段：分类重试与备援
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 整个恢复过程的总时长预算（毫秒）
    pub total_timeout_ms: u64,
    /// 备援 provider 链（按顺序尝试）
    pub fallback_providers: Vec<String>,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            total_timeout_ms: 60_000,
            fallback_providers: Vec::new(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
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
        assert_eq!(cfg.planner.confidence_threshold, 0.75);
        assert_eq!(cfg.executor.max_iterations, 10);
        assert_eq!(cfg.executor.iteration_timeout_ms, 5_000);
        assert_eq!(cfg.scheduler.max_replans, 1);
        assert!(!cfg.scheduler.strict_cycles);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[executor]\nmax_iterations = 4\n\n[scheduler]\nstrict_cycles = true"
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.executor.max_iterations, 4);
        assert!(cfg.scheduler.strict_cycles);
        // 未覆盖的键保持默认
        assert_eq!(cfg.executor.max_retries, 2);
    }
}
