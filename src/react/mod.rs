//! ReAct 层：进度事件与单任务有界执行循环

pub mod events;
pub mod executor;

pub use events::{send_event, EventSender, ProgressEvent};
pub use executor::{StepKind, TaskExecutor, TaskRunResult, TraceStep};
