//! 过程事件：核心在既定节点发布的进度记录
//!
//! 事件是发布契约而非网络协议；传输方（WebSocket / SSE / 日志）作为订阅者消费
//! mpsc 通道。每个事件带毫秒时间戳与足以重建实时进度视图的标识（task_id、tool、call id）。

use serde::Serialize;

/// 当前 Utc 毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 进度事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 规划开始
    PlanStarted { ts: i64, goal: String },
    /// 规划完成
    PlanCompleted {
        ts: i64,
        task_count: usize,
        execution_order: Vec<String>,
    },
    /// 任务开始执行
    TaskStarted { ts: i64, task_id: String, name: String },
    /// 任务到达终态
    TaskCompleted { ts: i64, task_id: String, success: bool },
    /// Critic 校验未通过
    TaskValidationFailed {
        ts: i64,
        task_id: String,
        recommendation: String,
        score: f64,
    },
    /// ReAct 步数更新（当前第几步）
    StepUpdate {
        ts: i64,
        task_id: String,
        step: usize,
        max_steps: usize,
    },
    /// 正在调用 LLM 思考
    Thinking { ts: i64, task_id: String },
    /// LLM 思考内容增量
    ThinkingDelta { ts: i64, task_id: String, text: String },
    /// 发出工具调用
    ToolCallStarted {
        ts: i64,
        task_id: String,
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResultReady {
        ts: i64,
        task_id: String,
        call_id: String,
        tool: String,
        success: bool,
        preview: String,
    },
    /// 恢复决策（Retry / SwitchProvider / GracefulDegrade / Escalate）
    Recovery {
        ts: i64,
        task_id: String,
        action: String,
        detail: String,
    },
    /// 针对失败任务的 replan
    ReplanStarted { ts: i64, task_id: String, reason: String },
    /// 错误
    Error { ts: i64, text: String },
}

/// 事件发送端（无界通道；订阅者缺席时事件被丢弃）
pub type EventSender = tokio::sync::mpsc::UnboundedSender<ProgressEvent>;

/// 发送事件；无订阅者时静默丢弃
pub fn send_event(tx: &Option<&EventSender>, event: ProgressEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

/// 截断预览
pub fn preview(text: &str, max_chars: usize) -> String {
    let p: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{p}...")
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = ProgressEvent::TaskStarted {
            ts: 1,
            task_id: "parse".to_string(),
            name: "parse".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "task_started");
        assert_eq!(json["task_id"], "parse");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello world", 5), "hello...");
    }
}
