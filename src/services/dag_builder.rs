//! DAG Builder Service
//!
//! Turns a flat list of task descriptors into a validated [`TaskDag`].
//! Structural problems (duplicate keys, unknown dependencies, cycles) fail the
//! whole plan before any task is persisted or executed.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskDag, TaskDescriptor, TaskStatus};

/// DFS colouring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Builds validated task graphs from descriptors.
#[derive(Debug, Clone)]
pub struct DagBuilder {
    default_max_attempts: u32,
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new(3)
    }
}

// Cycle detection with an explicit stack, so chain depth is bounded by the
// heap. Returns the cycle as indices, with the first node repeated at the end.
fn find_cycle_from(start: usize, edges: &[Vec<usize>], colour: &mut [Colour]) -> Option<Vec<usize>> {
    // (node, index of the next dependency to visit)
    let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
    colour[start] = Colour::Grey;

    while let Some(frame) = stack.last_mut() {
        let (node, cursor) = *frame;
        let Some(&next) = edges[node].get(cursor) else {
            colour[node] = Colour::Black;
            stack.pop();
            continue;
        };
        frame.1 += 1;

        match colour[next] {
            Colour::White => {
                colour[next] = Colour::Grey;
                stack.push((next, 0));
            }
            Colour::Grey => {
                // Back edge: the cycle is the stack suffix starting at `next`.
                let begin = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                let mut cycle: Vec<usize> = stack[begin..].iter().map(|&(n, _)| n).collect();
                cycle.push(next);
                return Some(cycle);
            }
            Colour::Black => {}
        }
    }

    None
}

impl DagBuilder {
    pub fn new(default_max_attempts: u32) -> Self {
        Self {
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    /// Validate descriptors and build the graph for `plan_id`.
    ///
    /// Self-loops and repeated edges are dropped. Tasks without dependencies
    /// start out `ready`; the rest are `pending`.
    #[instrument(skip(self, descriptors), fields(tasks = descriptors.len()))]
    pub fn build(&self, plan_id: Uuid, descriptors: &[TaskDescriptor]) -> DomainResult<TaskDag> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            if descriptor.key.trim().is_empty() {
                return Err(DomainError::ValidationFailed(format!("task #{} has an empty key", i + 1)));
            }
            if descriptor.max_attempts == Some(0) {
                return Err(DomainError::ValidationFailed(format!(
                    "task {} must allow at least one attempt",
                    descriptor.key
                )));
            }
            if index.insert(descriptor.key.as_str(), i).is_some() {
                return Err(DomainError::DuplicateTask(descriptor.key.clone()));
            }
        }

        // edges[i] = dependencies of task i, normalized
        let mut edges: Vec<Vec<usize>> = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            let mut seen = HashSet::new();
            let mut deps = Vec::new();
            for dep_key in &descriptor.depends_on {
                let dep = *index.get(dep_key.as_str()).ok_or_else(|| DomainError::UnknownDependency {
                    task: descriptor.key.clone(),
                    dependency: dep_key.clone(),
                })?;
                if dep == i {
                    debug!(task = %descriptor.key, "ignoring self dependency");
                    continue;
                }
                if seen.insert(dep) {
                    deps.push(dep);
                }
            }
            edges.push(deps);
        }

        let mut colour = vec![Colour::White; descriptors.len()];
        for start in 0..descriptors.len() {
            if colour[start] != Colour::White {
                continue;
            }
            if let Some(cycle) = find_cycle_from(start, &edges, &mut colour) {
                let keys = cycle.into_iter().map(|i| descriptors[i].key.clone()).collect();
                return Err(DomainError::DependencyCycle(keys));
            }
        }

        let mut tasks: Vec<Task> = descriptors
            .iter()
            .map(|d| {
                let mut task = Task::new(plan_id, d.key.clone(), d.description.clone())
                    .with_kind(d.kind)
                    .with_max_attempts(d.max_attempts.unwrap_or(self.default_max_attempts));
                task.code.clone_from(&d.code);
                task
            })
            .collect();

        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        for (task, deps) in tasks.iter_mut().zip(&edges) {
            task.depends_on = deps.iter().map(|&d| ids[d]).collect();
            if task.depends_on.is_empty() {
                task.status = TaskStatus::Ready;
            }
        }

        Ok(TaskDag::from_validated(tasks))
    }
}
