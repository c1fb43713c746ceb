//! Directed Acyclic Graph (DAG) domain models
//!
//! A [`TaskDag`] is only constructed by the dependency graph builder, so every
//! instance is known to be acyclic with all edges pointing at known tasks.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Task;

/// An edge in the execution DAG representing a dependency relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagEdge {
    /// The source node (the dependency)
    pub from: Uuid,
    /// The target node (the dependent task)
    pub to: Uuid,
}

impl DagEdge {
    pub fn new(from: Uuid, to: Uuid) -> Self {
        Self { from, to }
    }
}

/// Validated task graph.
#[derive(Debug, Clone)]
pub struct TaskDag {
    /// Tasks in declaration order
    tasks: Vec<Task>,
    index: HashMap<Uuid, usize>,
    /// dependency -> dependents
    dependents: HashMap<Uuid, Vec<Uuid>>,
}

impl TaskDag {
    /// Assemble a graph from tasks whose edges were already validated.
    pub(crate) fn from_validated(tasks: Vec<Task>) -> Self {
        let index = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for task in &tasks {
            for dep in &task.depends_on {
                dependents.entry(*dep).or_default().push(task.id);
            }
        }
        Self {
            tasks,
            index,
            dependents,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.tasks[i])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn edges(&self) -> Vec<DagEdge> {
        self.tasks
            .iter()
            .flat_map(|t| t.depends_on.iter().map(move |d| DagEdge::new(*d, t.id)))
            .collect()
    }

    /// Direct dependents of a task.
    pub fn dependents_of(&self, id: Uuid) -> &[Uuid] {
        self.dependents.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Every task that transitively depends on `id` (excluding `id`).
    pub fn transitive_dependents(&self, id: Uuid) -> HashSet<Uuid> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<Uuid> = self.dependents_of(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents_of(next).iter().copied());
            }
        }
        seen
    }

    /// Kahn's algorithm; ties keep declaration order.
    pub fn topological_order(&self) -> Vec<Uuid> {
        self.execution_waves().into_iter().flatten().collect()
    }

    /// Group tasks into waves: every task's dependencies sit in earlier waves.
    pub fn execution_waves(&self) -> Vec<Vec<Uuid>> {
        let mut in_degree: HashMap<Uuid, usize> = self
            .tasks
            .iter()
            .map(|t| (t.id, t.depends_on.len()))
            .collect();
        let mut current: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id)
            .collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for id in &current {
                for dependent in self.dependents_of(*id) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            next.sort_by_key(|id| self.index.get(id).copied().unwrap_or(usize::MAX));
            waves.push(std::mem::replace(&mut current, next));
        }

        waves
    }
}
