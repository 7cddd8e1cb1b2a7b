//! 任务图算法：拓扑排序、并行组、关键路径
//!
//! 排序用显式栈 + 三染色（White 未访问 / Gray 访问中 / Black 完成），不用递归，
//! 大图不受栈深限制。宽松模式下环与未知依赖只记 warn 并丢边；严格模式返回错误。

use std::collections::HashMap;

use crate::graph::types::{CyclePolicy, GraphError, Task, TaskId};

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

struct Frame<'a> {
    id: &'a str,
    next_dep: usize,
}

/// 拓扑排序：依赖出现在依赖者之前；宽松模式下丢弃闭环边与未知依赖，结果无重复 ID
pub fn topo_sort(tasks: &[Task], policy: CyclePolicy) -> Result<Vec<TaskId>, GraphError> {
    let mut index: HashMap<&str, &Task> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        if index.insert(task.id.as_str(), task).is_some() {
            return Err(GraphError::DuplicateId(task.id.clone()));
        }
    }

    let mut color: HashMap<&str, Color> =
        tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();
    let mut order: Vec<TaskId> = Vec::with_capacity(tasks.len());

    // 按声明顺序作为 DFS 根，保证排序稳定
    for root in tasks {
        if color[root.id.as_str()] != Color::White {
            continue;
        }
        let mut stack = vec![Frame {
            id: root.id.as_str(),
            next_dep: 0,
        }];
        color.insert(root.id.as_str(), Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let task = index[frame.id];
            if frame.next_dep < task.dependencies.len() {
                let dep = task.dependencies[frame.next_dep].as_str();
                frame.next_dep += 1;
                match color.get(dep).copied() {
                    None => {
                        if policy == CyclePolicy::Strict {
                            return Err(GraphError::UnknownDependency {
                                task: task.id.clone(),
                                dependency: dep.to_string(),
                            });
                        }
                        tracing::warn!(task = %task.id, dependency = dep, "unknown dependency, dropping edge");
                    }
                    Some(Color::White) => {
                        color.insert(dep, Color::Gray);
                        stack.push(Frame { id: dep, next_dep: 0 });
                    }
                    Some(Color::Gray) => {
                        if policy == CyclePolicy::Strict {
                            return Err(GraphError::Cycle(task.id.clone()));
                        }
                        tracing::warn!(task = %task.id, dependency = dep, "cyclic dependency, dropping edge");
                    }
                    Some(Color::Black) => {}
                }
            } else {
                color.insert(frame.id, Color::Black);
                order.push(frame.id.to_string());
                stack.pop();
            }
        }
    }

    Ok(order)
}

/// 并行组：依赖集相同且依赖均已排入前组的任务聚为一簇（按执行序首次出现的顺序）
pub fn parallel_groups(tasks: &[Task], execution_order: &[TaskId]) -> Vec<Vec<TaskId>> {
    let index: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut groups: Vec<(Vec<TaskId>, Vec<TaskId>)> = Vec::new(); // (排序后的依赖键, 成员)
    let mut scheduled: Vec<&str> = Vec::new();

    for id in execution_order {
        let Some(task) = index.get(id.as_str()) else {
            continue;
        };
        let mut key: Vec<TaskId> = task
            .dependencies
            .iter()
            .filter(|d| scheduled.contains(&d.as_str()))
            .cloned()
            .collect();
        key.sort();

        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(id.clone()),
            None => groups.push((key, vec![id.clone()])),
        }
        scheduled.push(id.as_str());
    }

    groups.into_iter().map(|(_, members)| members).collect()
}

/// 关键路径：沿拓扑序做前向 DP，取 effort 时长累计最大的链
pub fn critical_path(tasks: &[Task], execution_order: &[TaskId]) -> Vec<TaskId> {
    let index: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut dist: HashMap<&str, u64> = HashMap::new();
    let mut pred: HashMap<&str, &str> = HashMap::new();

    for id in execution_order {
        let Some(task) = index.get(id.as_str()) else {
            continue;
        };
        let mut best: u64 = 0;
        let mut best_pred: Option<&str> = None;
        for dep in &task.dependencies {
            if let Some(&d) = dist.get(dep.as_str()) {
                if best_pred.is_none() || d > best {
                    best = d;
                    best_pred = Some(dep.as_str());
                }
            }
        }
        let key = task.id.as_str();
        dist.insert(key, best + task.effort.duration_ms());
        if let Some(p) = best_pred {
            pred.insert(key, p);
        }
    }

    let Some((&end, _)) = dist.iter().max_by_key(|(_, &d)| d) else {
        return Vec::new();
    };

    let mut path = vec![end.to_string()];
    let mut cur = end;
    while let Some(&p) = pred.get(cur) {
        path.push(p.to_string());
        cur = p;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::Effort;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, format!("do {id}"))
            .with_dependencies(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_topological_soundness() {
        let tasks = vec![
            task("d", &["b", "c"]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("a", &[]),
        ];
        let order = topo_sort(&tasks, CyclePolicy::Lenient).unwrap();
        assert_eq!(order.len(), 4);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for t in &tasks {
            for d in &t.dependencies {
                assert!(pos(&t.id) > pos(d), "{} must come after {}", t.id, d);
            }
        }
    }

    #[test]
    fn test_cycle_tolerance_lenient() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let order = topo_sort(&tasks, CyclePolicy::Lenient).unwrap();
        assert_eq!(order.len(), 2);
        let mut dedup = order.clone();
        dedup.dedup();
        assert_eq!(order, dedup);
    }

    #[test]
    fn test_cycle_strict_fails() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            topo_sort(&tasks, CyclePolicy::Strict),
            Err(GraphError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_lenient_drops_edge() {
        let tasks = vec![task("a", &["ghost"]), task("b", &["a"])];
        let order = topo_sort(&tasks, CyclePolicy::Lenient).unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert!(matches!(
            topo_sort(&tasks, CyclePolicy::Lenient),
            Err(GraphError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_parallel_groups_cluster_identical_deps() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let order = topo_sort(&tasks, CyclePolicy::Lenient).unwrap();
        let groups = parallel_groups(&tasks, &order);
        assert!(groups.contains(&vec!["b".to_string(), "c".to_string()]));
    }

    #[test]
    fn test_critical_path_prefers_heavy_chain() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]).with_effort(Effort::High),
            task("c", &["a"]).with_effort(Effort::Low),
            task("d", &["b", "c"]),
        ];
        let order = topo_sort(&tasks, CyclePolicy::Lenient).unwrap();
        let path = critical_path(&tasks, &order);
        assert_eq!(path, vec!["a", "b", "d"]);
    }
}
