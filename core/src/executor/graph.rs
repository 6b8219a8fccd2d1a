use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use crate::error::ExecutorError;
use crate::executor::types::{Batch, TaskLike};

/// Task dependency graph (DAG)
#[derive(Debug, Clone)]
pub struct TaskGraph<T: TaskLike> {
    /// Task nodes: task_id -> Task
    pub nodes: HashMap<String, T>,

    /// Dependency edges: task_id -> list of dependencies still to be satisfied
    pub edges: HashMap<String, Vec<String>>,

    /// Reverse edges: task_id -> list of tasks that depend on it
    pub reverse_edges: HashMap<String, Vec<String>>,

    /// Original insertion order (for stable sorting)
    insertion_order: Vec<String>,
    position: HashMap<String, usize>,
}

impl<T: TaskLike> TaskGraph<T> {
    /// Construct task graph from task list
    pub fn from_tasks(tasks: &[T]) -> Result<Self, ExecutorError> {
        Self::build(tasks, &HashSet::new())
    }

    /// Construct the graph of work left once `satisfied` ids are done.
    ///
    /// Satisfied tasks are left out and dependencies on them are dropped, but
    /// every `depends_on` id is still checked against the full task list.
    pub fn from_remaining(
        tasks: &[T],
        satisfied: &HashSet<String>,
    ) -> Result<Self, ExecutorError> {
        Self::build(tasks, satisfied)
    }

    fn build(tasks: &[T], satisfied: &HashSet<String>) -> Result<Self, ExecutorError> {
        let mut all_ids: HashSet<&str> = HashSet::with_capacity(tasks.len());
        for task in tasks {
            if !all_ids.insert(task.id()) {
                return Err(ExecutorError::DuplicateTaskId(task.id().to_string()));
            }
        }

        for task in tasks {
            for dep in task.dependencies() {
                if !all_ids.contains(dep.as_str()) {
                    return Err(ExecutorError::UnknownDependency {
                        task_id: task.id().to_string(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        let mut nodes = HashMap::new();
        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut insertion_order = Vec::new();
        let mut position = HashMap::new();

        for task in tasks.iter().filter(|t| !satisfied.contains(t.id())) {
            let task_id = task.id().to_string();

            let mut seen = HashSet::new();
            let dependencies: Vec<String> = task
                .dependencies()
                .iter()
                .filter(|dep| !satisfied.contains(dep.as_str()))
                .filter(|dep| seen.insert(dep.as_str()))
                .cloned()
                .collect();

            for dep in &dependencies {
                reverse_edges
                    .entry(dep.clone())
                    .or_default()
                    .push(task_id.clone());
            }

            position.insert(task_id.clone(), insertion_order.len());
            insertion_order.push(task_id.clone());
            edges.insert(task_id.clone(), dependencies);
            nodes.insert(task_id, task.clone());
        }

        Ok(Self {
            nodes,
            edges,
            reverse_edges,
            insertion_order,
            position,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// Returns execution batches where tasks in the same batch can run in
    /// parallel. Every ready task joins the current batch; inside a batch tasks
    /// are ordered by priority (higher first), then by submission order.
    ///
    /// # Time Complexity
    ///
    /// O(V log V + E) where V = number of tasks, E = number of dependencies
    pub fn topological_sort(&self) -> Result<Vec<Batch>, ExecutorError> {
        // edges[A] = [B, C] means A depends on B and C, so A's in-degree = 2
        let mut in_degree: HashMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        let mut batches: Vec<Batch> = Vec::new();
        let mut current: Batch = self
            .insertion_order
            .iter()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .cloned()
            .collect();
        self.order_batch(&mut current);

        let mut processed = 0;

        while !current.is_empty() {
            processed += current.len();

            let mut next = Vec::new();
            for task_id in &current {
                let Some(dependents) = self.reverse_edges.get(task_id) else {
                    continue;
                };
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }

            self.order_batch(&mut next);
            batches.push(std::mem::replace(&mut current, next));
        }

        if processed != self.nodes.len() {
            let remaining: HashSet<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            let cycle = self.find_cycle(&remaining);
            let member = cycle.first().cloned().unwrap_or_default();
            return Err(ExecutorError::CyclicDependency {
                member,
                path: cycle.join(" -> "),
            });
        }

        Ok(batches)
    }

    fn order_batch(&self, batch: &mut Batch) {
        batch.sort_by_key(|id| {
            let priority = self.nodes.get(id).map(|t| t.priority()).unwrap_or(0);
            let pos = self.position.get(id).copied().unwrap_or(usize::MAX);
            (Reverse(priority), pos)
        });
    }

    /// Walk unresolved dependency edges until a node repeats.
    ///
    /// Every node left over by Kahn's algorithm still waits on another leftover
    /// node, so the walk always closes a cycle.
    fn find_cycle(&self, remaining: &HashSet<&str>) -> Vec<String> {
        let Some(start) = self
            .insertion_order
            .iter()
            .find(|id| remaining.contains(id.as_str()))
        else {
            return Vec::new();
        };

        let mut path: Vec<String> = Vec::new();
        let mut on_path: HashMap<String, usize> = HashMap::new();
        let mut current = start.clone();

        loop {
            if let Some(&pos) = on_path.get(&current) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(current);
                return cycle;
            }
            on_path.insert(current.clone(), path.len());
            path.push(current.clone());

            let next = self.edges.get(&current).and_then(|deps| {
                deps.iter()
                    .find(|dep| remaining.contains(dep.as_str()))
                    .cloned()
            });
            match next {
                Some(dep) => current = dep,
                None => return path,
            }
        }
    }
}

/// Resolve a flat task list into ordered execution batches.
///
/// Fails without partial output on duplicate ids, unknown dependencies or cycles.
pub fn resolve<T: TaskLike>(tasks: &[T]) -> Result<Vec<Batch>, ExecutorError> {
    TaskGraph::from_tasks(tasks)?.topological_sort()
}

/// Resolve only the work left once `satisfied` ids are done.
pub fn resolve_remaining<T: TaskLike>(
    tasks: &[T],
    satisfied: &HashSet<String>,
) -> Result<Vec<Batch>, ExecutorError> {
    TaskGraph::from_remaining(tasks, satisfied)?.topological_sort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::Task;
    use pretty_assertions::assert_eq;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, "echo").depends_on(deps.iter().copied())
    }

    #[test]
    fn linear_chain_yields_one_task_per_batch() {
        let tasks = vec![task("c", &["b"]), task("a", &[]), task("b", &["a"])];
        let batches = resolve(&tasks).unwrap();
        assert_eq!(batches, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_groups_independent_tasks() {
        let tasks = vec![
            task("root", &[]),
            task("left", &["root"]),
            task("right", &["root"]),
            task("join", &["left", "right"]),
        ];
        let batches = resolve(&tasks).unwrap();
        assert_eq!(
            batches,
            vec![vec!["root"], vec!["left", "right"], vec!["join"]]
        );
    }

    #[test]
    fn priority_then_submission_order_inside_batch() {
        let tasks = vec![
            task("low", &[]),
            task("first", &[]).with_priority(5),
            task("second", &[]).with_priority(5),
            task("mid", &[]).with_priority(1),
        ];
        let batches = resolve(&tasks).unwrap();
        assert_eq!(batches, vec![vec!["first", "second", "mid", "low"]]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let tasks = vec![task("a", &["ghost"])];
        let err = resolve(&tasks).unwrap_err();
        assert_eq!(
            err,
            ExecutorError::UnknownDependency {
                task_id: "a".into(),
                missing_dep: "ghost".into(),
            }
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert!(matches!(
            resolve(&tasks),
            Err(ExecutorError::DuplicateTaskId(id)) if id == "a"
        ));
    }

    #[test]
    fn cycle_names_a_member() {
        let tasks = vec![
            task("start", &[]),
            task("a", &["start", "c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ];
        match resolve(&tasks) {
            Err(ExecutorError::CyclicDependency { member, path }) => {
                assert!(["a", "b", "c"].contains(&member.as_str()));
                assert_eq!(path, "a -> c -> b -> a");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let tasks = vec![task("loner", &["loner"])];
        match resolve(&tasks) {
            Err(ExecutorError::CyclicDependency { member, path }) => {
                assert_eq!(member, "loner");
                assert_eq!(path, "loner -> loner");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_resolves_to_no_batches() {
        let tasks: Vec<Task> = Vec::new();
        assert!(resolve(&tasks).unwrap().is_empty());
    }

    #[test]
    fn repeated_dependency_does_not_stall() {
        let tasks = vec![task("a", &[]), task("b", &["a", "a"])];
        assert_eq!(resolve(&tasks).unwrap(), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn remaining_drops_satisfied_tasks_and_edges() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        let done: HashSet<String> = ["a".to_string()].into_iter().collect();
        let batches = resolve_remaining(&tasks, &done).unwrap();
        assert_eq!(batches, vec![vec!["b"], vec!["c"]]);
    }

    #[test]
    fn resolution_is_idempotent() {
        let tasks = vec![
            task("x", &[]),
            task("y", &["x"]),
            task("z", &["x"]),
            task("w", &[]),
        ];
        assert_eq!(resolve(&tasks).unwrap(), resolve(&tasks).unwrap());
    }

    /// Pseudo-random DAGs: a task may only depend on tasks created before it.
    #[test]
    fn batches_respect_dependencies_for_generated_dags() {
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        for round in 0..50 {
            let n = 1 + next() % 30;
            let mut tasks = Vec::with_capacity(n);
            for i in 0..n {
                let deps: Vec<String> = (0..i)
                    .filter(|_| next() % 4 == 0)
                    .map(|j| format!("t{round}-{j}"))
                    .collect();
                tasks.push(Task::new(format!("t{round}-{i}"), "echo").depends_on(deps));
            }
            // shuffle submission order
            for i in (1..tasks.len()).rev() {
                let j = next() % (i + 1);
                tasks.swap(i, j);
            }

            let batches = resolve(&tasks).unwrap();
            let mut batch_of: HashMap<&str, usize> = HashMap::new();
            for (idx, batch) in batches.iter().enumerate() {
                for id in batch {
                    assert!(batch_of.insert(id.as_str(), idx).is_none(), "{id} twice");
                }
            }
            assert_eq!(batch_of.len(), tasks.len());
            for t in &tasks {
                for dep in &t.depends_on {
                    assert!(batch_of[dep.as_str()] < batch_of[t.id.as_str()]);
                }
            }
        }
    }
}
