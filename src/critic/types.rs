//! Critic 数据类型：校验器能力集、上下文与校验结果

use serde::Serialize;
use serde_json::Value;

/// 校验后的处置建议，按优先级 Escalate > Replan > Fix > Pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Pass,
    Fix,
    Replan,
    Escalate,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Recommendation::Pass => "PASS",
            Recommendation::Fix => "FIX",
            Recommendation::Replan => "REPLAN",
            Recommendation::Escalate => "ESCALATE",
        };
        f.write_str(s)
    }
}

/// 事实核查标记的可疑断言
#[derive(Debug, Clone, Serialize)]
pub struct Hallucination {
    pub claim: String,
    /// 该断言为幻觉的置信度 [0,1]
    pub confidence: f64,
}

/// 一致性检查结论
#[derive(Debug, Clone, Serialize)]
pub struct Consistency {
    pub consistent: bool,
    pub issues: Vec<String>,
}

impl Default for Consistency {
    fn default() -> Self {
        Self {
            consistent: true,
            issues: Vec::new(),
        }
    }
}

/// 规则校验器的产出
#[derive(Debug, Clone, Default)]
pub struct RuleReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// 测试套件的产出，失败折算为告警
#[derive(Debug, Clone, Default)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    pub failures: Vec<String>,
}

/// Schema 校验器：Ok 表示通过，Err 携带错误列表
pub type SchemaValidator = Box<dyn Fn(&Value) -> Result<(), Vec<String>> + Send + Sync>;
/// 领域规则校验器
pub type RuleValidator = Box<dyn Fn(&Value) -> RuleReport + Send + Sync>;
/// 事实核查器
pub type FactChecker = Box<dyn Fn(&Value) -> Vec<Hallucination> + Send + Sync>;
/// 测试套件
pub type TestSuite = Box<dyn Fn(&Value) -> TestReport + Send + Sync>;

/// 可选校验器能力集：缺哪个就跳过哪个阶段
#[derive(Default)]
pub struct Validators {
    pub schema: Option<SchemaValidator>,
    pub rules: Option<RuleValidator>,
    pub fact_checker: Option<FactChecker>,
    pub test_suite: Option<TestSuite>,
}

impl Validators {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_schema<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), Vec<String>> + Send + Sync + 'static,
    {
        self.schema = Some(Box::new(f));
        self
    }

    pub fn with_rules<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> RuleReport + Send + Sync + 'static,
    {
        self.rules = Some(Box::new(f));
        self
    }

    pub fn with_fact_checker<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Vec<Hallucination> + Send + Sync + 'static,
    {
        self.fact_checker = Some(Box::new(f));
        self
    }

    pub fn with_test_suite<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> TestReport + Send + Sync + 'static,
    {
        self.test_suite = Some(Box::new(f));
        self
    }
}

/// 一致性检查的比对上下文
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// 先前任务的输出，重叠键取值冲突即矛盾
    pub previous_outputs: Vec<Value>,
    /// 期望字段及其值，字符串比较大小写不敏感
    pub expected_fields: Option<serde_json::Map<String, Value>>,
}

/// 校验结果：score 由扣分公式确定性导出
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub hallucinations: Vec<Hallucination>,
    pub consistency: Consistency,
    pub recommendation: Recommendation,
    pub reasoning: Vec<String>,
}
