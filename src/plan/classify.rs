//! 目标分类：关键词匹配到七类目标
//!
//! 各类别独立计分（匹配关键词数），平手按声明顺序取先者；
//! 置信度 = 匹配数 / (0.5 × 关键词总数)，截断到 [0,1]；
//! 工具型类别（Weather / Search）只要命中即抬升到 0.9 下限。

/// 目标类别（声明顺序即平手裁决顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalCategory {
    Analyze,
    Debug,
    Compliance,
    Explain,
    Compare,
    Weather,
    Search,
}

impl GoalCategory {
    pub const ALL: [GoalCategory; 7] = [
        GoalCategory::Analyze,
        GoalCategory::Debug,
        GoalCategory::Compliance,
        GoalCategory::Explain,
        GoalCategory::Compare,
        GoalCategory::Weather,
        GoalCategory::Search,
    ];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            GoalCategory::Analyze => &[
                "analyze", "analysis", "review", "inspect", "examine", "errors", "invoice",
                "report",
            ],
            GoalCategory::Debug => &[
                "debug", "fix", "bug", "broken", "crash", "failing", "stack trace", "exception",
            ],
            GoalCategory::Compliance => &[
                "compliance", "compliant", "regulation", "policy", "audit", "gdpr", "legal",
                "requirement",
            ],
            GoalCategory::Explain => &[
                "explain", "what is", "how does", "describe", "meaning", "why",
            ],
            GoalCategory::Compare => &[
                "compare", "versus", "vs", "difference", "better", "contrast",
            ],
            GoalCategory::Weather => &["weather", "temperature", "forecast", "rain"],
            GoalCategory::Search => &["search", "find", "look up", "news", "latest"],
        }
    }

    /// 工具型类别：命中任一关键词即抬升置信度
    pub fn is_utility(&self) -> bool {
        matches!(self, GoalCategory::Weather | GoalCategory::Search)
    }
}

/// 分类结果
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub category: GoalCategory,
    pub matched: usize,
    pub confidence: f64,
}

/// 对目标做关键词分类；无任何命中返回 None
pub fn classify(goal: &str) -> Option<Classification> {
    let lowered = goal.to_lowercase();
    let mut best: Option<Classification> = None;

    for category in GoalCategory::ALL {
        let keywords = category.keywords();
        let matched = keywords.iter().filter(|k| lowered.contains(*k)).count();
        if matched == 0 {
            continue;
        }
        let mut confidence = matched as f64 / (0.5 * keywords.len() as f64);
        confidence = confidence.clamp(0.0, 1.0);
        if category.is_utility() {
            confidence = confidence.max(0.9);
        }
        // 严格大于：平手时保留先声明的类别
        let better = best.map(|b| confidence > b.confidence).unwrap_or(true);
        if better {
            best = Some(Classification {
                category,
                matched,
                confidence,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_goal_is_analyze() {
        let c = classify("analyze this invoice for errors").unwrap();
        assert_eq!(c.category, GoalCategory::Analyze);
        assert!(c.confidence >= 0.75, "confidence {}", c.confidence);
    }

    #[test]
    fn test_debug_goal() {
        let c = classify("fix the crash in the parser, here is the stack trace").unwrap();
        assert_eq!(c.category, GoalCategory::Debug);
    }

    #[test]
    fn test_utility_floor_boost() {
        let c = classify("weather in tokyo").unwrap();
        assert_eq!(c.category, GoalCategory::Weather);
        assert!(c.confidence >= 0.9);
    }

    #[test]
    fn test_no_match() {
        assert!(classify("zzz qqq").is_none());
    }

    #[test]
    fn test_tie_prefers_declaration_order() {
        // analyze 与 debug 关键词数相同且各命中一个；Analyze 先声明
        let c = classify("review the bug").unwrap();
        assert_eq!(c.category, GoalCategory::Analyze);
    }
}
