//! 任务图：数据模型（Task / TaskGraph）与 DAG 算法（拓扑排序 / 并行组 / 关键路径）

pub mod topo;
pub mod types;

pub use topo::{critical_path, parallel_groups, topo_sort};
pub use types::{CyclePolicy, Effort, GraphError, Task, TaskGraph, TaskId};
